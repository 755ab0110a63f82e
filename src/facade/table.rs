use crate::bulk::{BulkCopier, BulkCopyOptions, BulkCopyResult};
use crate::core::{Result, Row, Value};
use crate::executor::{CreateMode, StatementExecutor, TableRef};
use crate::mapping::Entity;
use crate::query::{Assignments, Predicate};
use futures::stream::{self, Stream};
use std::marker::PhantomData;

/// Typed handle on the table an entity is stored in.
pub struct Table<E: Entity> {
    executor: StatementExecutor,
    table: TableRef,
    bulk_options: BulkCopyOptions,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Table<E> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            table: self.table.clone(),
            bulk_options: self.bulk_options.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Table<E> {
    pub(crate) fn new(executor: StatementExecutor, table: TableRef, bulk_options: BulkCopyOptions) -> Self {
        Self {
            executor,
            table,
            bulk_options,
            _entity: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        self.table.name()
    }

    pub fn table_ref(&self) -> &TableRef {
        &self.table
    }

    /// Creates the table; fails with `SchemaConflict` if it exists.
    pub async fn create(&self) -> Result<()> {
        self.executor.create_table(&self.table, CreateMode::FailIfExists).await
    }

    /// Drops and creates the table in one transaction.
    pub async fn recreate(&self) -> Result<()> {
        self.executor.create_table(&self.table, CreateMode::Replace).await
    }

    pub async fn drop(&self) -> Result<()> {
        self.executor.drop_table(self.table.name()).await
    }

    pub async fn drop_if_exists(&self) -> Result<()> {
        self.executor.drop_table_if_exists(self.table.name()).await
    }

    pub async fn insert(&self, entity: &E) -> Result<u64> {
        self.executor.insert(&self.table, &entity.to_row()).await
    }

    /// Inserts every entity in one transaction.
    pub async fn insert_many(&self, entities: &[E]) -> Result<u64> {
        let rows: Vec<Row> = entities.iter().map(Entity::to_row).collect();
        self.executor.insert_many(&self.table, &rows).await
    }

    pub async fn count(&self) -> Result<u64> {
        self.executor.count(&self.table, None).await
    }

    pub async fn count_where(&self, predicate: &Predicate) -> Result<u64> {
        self.executor.count(&self.table, Some(predicate)).await
    }

    pub async fn exists(&self, predicate: &Predicate) -> Result<bool> {
        self.executor.exists(&self.table, Some(predicate)).await
    }

    /// Looks an entity up by its primary key values, in key order.
    pub async fn find(&self, key: &[Value]) -> Result<Option<E>> {
        self.executor
            .find_by_key(&self.table, key)
            .await?
            .map(E::from_row)
            .transpose()
    }

    pub async fn select(&self, predicate: &Predicate) -> Result<Vec<E>> {
        let rows = self.executor.select(&self.table, Some(predicate)).await?;
        rows.into_iter().map(E::from_row).collect()
    }

    pub async fn all(&self) -> Result<Vec<E>> {
        let rows = self.executor.select(&self.table, None).await?;
        rows.into_iter().map(E::from_row).collect()
    }

    pub async fn update_where(&self, predicate: &Predicate, assignments: &Assignments) -> Result<u64> {
        self.executor.update_where(&self.table, predicate, assignments).await
    }

    pub async fn delete_where(&self, predicate: &Predicate) -> Result<u64> {
        self.executor.delete_where(&self.table, predicate).await
    }

    /// Bulk copier using the provider's default options.
    pub fn bulk_copier(&self) -> Result<BulkCopier> {
        self.bulk_copier_with(self.bulk_options.clone())
    }

    pub fn bulk_copier_with(&self, options: BulkCopyOptions) -> Result<BulkCopier> {
        BulkCopier::new(self.executor.clone(), self.table.clone(), options)
    }

    /// Streams entities into the table through the bulk path.
    pub async fn bulk_copy<S>(&self, entities: S) -> Result<BulkCopyResult>
    where
        S: Stream<Item = E> + Send,
    {
        self.bulk_copier()?.copy_entities(entities).await
    }

    pub async fn bulk_copy_iter<I>(&self, entities: I) -> Result<BulkCopyResult>
    where
        I: IntoIterator<Item = E>,
        I::IntoIter: Send,
    {
        self.bulk_copy(stream::iter(entities)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnDescriptor, SqlType};
    use crate::facade::Provider;
    use crate::mapping::SchemaRegistry;
    use crate::memory::MemoryDatabase;
    use crate::query::col;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: i32,
        body: String,
        pinned: bool,
    }

    crate::declare_entity!(Note => "notes" {
        id: ColumnDescriptor::new("note_id", SqlType::Int32).primary_key(),
        body: ColumnDescriptor::new("body", SqlType::Text),
        pinned: ColumnDescriptor::new("pinned", SqlType::Boolean),
    });

    fn note(id: i32, body: &str, pinned: bool) -> Note {
        Note {
            id,
            body: body.to_string(),
            pinned,
        }
    }

    fn notes() -> Table<Note> {
        Provider::new(Arc::new(MemoryDatabase::new()))
            .with_registry(Arc::new(SchemaRegistry::new()))
            .default_table::<Note>()
            .unwrap()
    }

    #[tokio::test]
    async fn test_typed_crud() {
        let table = notes();
        table.create().await.unwrap();
        table
            .insert_many(&[note(1, "a", false), note(2, "b", true)])
            .await
            .unwrap();
        table.insert(&note(3, "c", true)).await.unwrap();

        assert_eq!(table.count().await.unwrap(), 3);
        assert_eq!(table.find(&[Value::from(2)]).await.unwrap(), Some(note(2, "b", true)));
        assert_eq!(table.find(&[Value::from(9)]).await.unwrap(), None);

        let pinned = table.select(&col("pinned").eq(true)).await.unwrap();
        assert_eq!(pinned.len(), 2);

        table
            .update_where(&col("id").eq(1), &Assignments::new().set("body", "A"))
            .await
            .unwrap();
        assert_eq!(table.find(&[Value::from(1)]).await.unwrap().unwrap().body, "A");

        assert_eq!(table.delete_where(&col("pinned").eq(true)).await.unwrap(), 2);
        assert_eq!(table.all().await.unwrap(), vec![note(1, "A", false)]);
    }

    #[tokio::test]
    async fn test_recreate_empties_table() {
        let table = notes();
        table.create().await.unwrap();
        table.insert(&note(1, "a", false)).await.unwrap();
        assert!(table.create().await.is_err());

        table.recreate().await.unwrap();
        assert_eq!(table.count().await.unwrap(), 0);
        table.drop().await.unwrap();
        table.drop_if_exists().await.unwrap();
    }

    #[tokio::test]
    async fn test_bulk_copy_iter() {
        let table = notes();
        table.create().await.unwrap();
        let result = table
            .bulk_copy_iter((0..1500).map(|i| note(i, "bulk", i % 2 == 0)))
            .await
            .unwrap();
        assert_eq!(result.into_result().unwrap(), 1500);
        assert_eq!(table.count_where(&col("pinned").eq(true)).await.unwrap(), 750);
    }
}
