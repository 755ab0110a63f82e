use super::table::Table;
use crate::bulk::BulkCopyOptions;
use crate::core::{DbError, Result, TableSchema};
use crate::executor::{StatementExecutor, TableRef};
use crate::mapping::{Entity, SchemaRegistry};
use crate::query::StatementLimits;
use crate::session::SessionManager;
use std::sync::Arc;
use std::time::Duration;

/// Entry point for application code.
///
/// A provider pairs a session manager with a schema registry and hands out
/// typed [`Table`] handles. It is cheap to clone and every clone shares the
/// same sessions and schemas.
///
/// # Examples
///
/// ```ignore
/// let db = MemoryDatabase::new();
/// let provider = Provider::new(Arc::new(db));
///
/// let orders = provider.default_table::<Order>()?;
/// orders.create().await?;
/// orders.insert(&order).await?;
/// let open = orders.count_where(&col("status").eq("open")).await?;
/// ```
#[derive(Clone)]
pub struct Provider {
    executor: StatementExecutor,
    registry: Arc<SchemaRegistry>,
    bulk_options: BulkCopyOptions,
}

impl Provider {
    /// Uses the process-wide schema registry.
    pub fn new(sessions: Arc<dyn SessionManager>) -> Self {
        Self {
            executor: StatementExecutor::new(sessions),
            registry: Arc::clone(SchemaRegistry::global()),
            bulk_options: BulkCopyOptions::default(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<SchemaRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_limits(mut self, limits: StatementLimits) -> Result<Self> {
        self.executor = self.executor.with_limits(limits)?;
        Ok(self)
    }

    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.executor = self.executor.with_query_timeout(timeout);
        self
    }

    /// Default options of the bulk copies started from this provider's
    /// tables.
    pub fn with_bulk_options(mut self, options: BulkCopyOptions) -> Result<Self> {
        options.validate().map_err(DbError::Config)?;
        self.bulk_options = options;
        Ok(self)
    }

    /// Handle on the entity's rows stored under `name`.
    pub fn table<E: Entity>(&self, name: &str) -> Result<Table<E>> {
        let schema = self.registry.entity::<E>()?;
        let table = TableRef::named(schema, name)?;
        Ok(Table::new(self.executor.clone(), table, self.bulk_options.clone()))
    }

    /// Handle on the entity's default table.
    pub fn default_table<E: Entity>(&self) -> Result<Table<E>> {
        let schema = self.registry.entity::<E>()?;
        Ok(Table::new(
            self.executor.clone(),
            TableRef::new(schema),
            self.bulk_options.clone(),
        ))
    }

    /// Registers a schema built at runtime and returns a reference usable
    /// with [`Provider::executor`].
    pub fn dynamic_table(&self, schema: TableSchema) -> Result<TableRef> {
        Ok(TableRef::new(self.registry.register(schema)?))
    }

    pub async fn drop_table(&self, name: &str) -> Result<()> {
        self.executor.drop_table(name).await
    }

    pub fn executor(&self) -> &StatementExecutor {
        &self.executor
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn bulk_options(&self) -> &BulkCopyOptions {
        &self.bulk_options
    }
}
