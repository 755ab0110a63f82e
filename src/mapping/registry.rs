use super::Entity;
use crate::core::{DbError, Result, TableSchema};
use lazy_static::lazy_static;
use log::debug;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

// Process-wide schema cache shared by every provider that does not bring
// its own registry.
lazy_static! {
    static ref GLOBAL_REGISTRY: Arc<SchemaRegistry> = Arc::new(SchemaRegistry::new());
}

struct Entry {
    schema: Arc<TableSchema>,
    entity: Option<TypeId>,
}

/// Cache of validated schemas keyed by table name.
///
/// Reads share a read lock. Population re-checks under the write lock, so
/// concurrent first use of the same table always ends with a single cached
/// `Arc`: an equal schema returns the entry already cached, a divergent one
/// fails with [`DbError::SchemaConflict`].
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, Entry>>,
}

impl SchemaRegistry {
    pub fn global() -> &'static Arc<SchemaRegistry> {
        &GLOBAL_REGISTRY
    }

    pub fn new() -> Self {
        Self {
            schemas: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached schema for an entity type, deriving and validating
    /// it on first use.
    pub fn entity<E: Entity>(&self) -> Result<Arc<TableSchema>> {
        let type_id = TypeId::of::<E>();
        {
            let schemas = self.schemas.read()?;
            if let Some(entry) = schemas.get(E::table_name())
                && entry.entity == Some(type_id)
            {
                return Ok(Arc::clone(&entry.schema));
            }
        }

        let schema = E::schema()?;
        self.insert(schema, Some(type_id))
    }

    /// Registers an explicitly built schema under its table name.
    pub fn register(&self, schema: TableSchema) -> Result<Arc<TableSchema>> {
        self.insert(schema, None)
    }

    pub fn get(&self, table: &str) -> Result<Option<Arc<TableSchema>>> {
        let schemas = self.schemas.read()?;
        Ok(schemas.get(table).map(|entry| Arc::clone(&entry.schema)))
    }

    pub fn contains(&self, table: &str) -> Result<bool> {
        Ok(self.schemas.read()?.contains_key(table))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.schemas.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn insert(&self, schema: TableSchema, entity: Option<TypeId>) -> Result<Arc<TableSchema>> {
        let mut schemas = self.schemas.write()?;

        if let Some(entry) = schemas.get_mut(schema.table()) {
            if *entry.schema != schema {
                return Err(DbError::SchemaConflict(format!(
                    "table '{}' is already registered with a different column list",
                    schema.table()
                )));
            }
            if entry.entity.is_none() {
                entry.entity = entity;
            }
            return Ok(Arc::clone(&entry.schema));
        }

        debug!(
            "Registered schema for table '{}' ({} columns)",
            schema.table(),
            schema.column_count()
        );
        let table = schema.table().to_string();
        let schema = Arc::new(schema);
        schemas.insert(
            table,
            Entry {
                schema: Arc::clone(&schema),
                entity,
            },
        );
        Ok(schema)
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnDescriptor, Row, SqlType, Value};
    use std::thread;

    struct Widget {
        id: i64,
    }

    impl Entity for Widget {
        fn table_name() -> &'static str {
            "widgets"
        }

        fn columns() -> Vec<ColumnDescriptor> {
            vec![ColumnDescriptor::new("id", SqlType::Int64).primary_key()]
        }

        fn to_row(&self) -> Row {
            vec![Value::Int64(self.id)]
        }

        fn from_row(row: Row) -> Result<Self> {
            let mut values = row.into_iter();
            Ok(Self {
                id: crate::mapping::take_field(&mut values, "id")?,
            })
        }
    }

    #[test]
    fn test_entity_schema_is_cached() {
        let registry = SchemaRegistry::new();
        let first = registry.entity::<Widget>().unwrap();
        let second = registry.entity::<Widget>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len().unwrap(), 1);
    }

    #[test]
    fn test_equal_schema_reuses_entry() {
        let registry = SchemaRegistry::new();
        let explicit = registry.register(Widget::schema().unwrap()).unwrap();
        let derived = registry.entity::<Widget>().unwrap();
        assert!(Arc::ptr_eq(&explicit, &derived));
    }

    #[test]
    fn test_divergent_schema_conflicts() {
        let registry = SchemaRegistry::new();
        registry.entity::<Widget>().unwrap();

        let other = TableSchema::new(
            "widgets",
            vec![
                ColumnDescriptor::new("id", SqlType::Int64).primary_key(),
                ColumnDescriptor::new("label", SqlType::Text),
            ],
        )
        .unwrap();
        let err = registry.register(other).unwrap_err();
        assert!(matches!(err, DbError::SchemaConflict(_)));
    }

    #[test]
    fn test_concurrent_first_use_yields_one_schema() {
        let registry = Arc::new(SchemaRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.entity::<Widget>().unwrap())
            })
            .collect();

        let schemas: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for schema in &schemas[1..] {
            assert!(Arc::ptr_eq(&schemas[0], schema));
        }
    }
}
