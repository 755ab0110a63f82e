// ============================================================================
// Tabula: typed relational data access
// ============================================================================
//
// Maps statically declared entities to tables, renders typed predicates and
// assignments as parameterized statements, and runs CRUD and batched bulk
// copies over pluggable sessions. `memory` provides an in-process backend.

pub mod core;
pub mod mapping;
pub mod query;
pub mod result;
pub mod session;
pub mod executor;
pub mod bulk;
pub mod facade;
pub mod memory;
pub mod prelude;

// Re-export main types for convenience
pub use crate::core::{ColumnDescriptor, DbError, FromValue, Operation, Result, Row, SqlType, TableSchema, Value, WireValue};
pub use mapping::{Entity, SchemaRegistry};
pub use query::{col, Assignments, Predicate, StatementLimits};
pub use result::ResultSet;

pub use session::{
    Connector, ExecuteOutcome, PoolStats, Session, SessionConfig, SessionError, SessionGuard, SessionManager,
    SessionPool, Statement,
};
pub use executor::{CreateMode, StatementExecutor, TableRef};
pub use bulk::{BulkCopier, BulkCopyOptions, BulkCopyResult, BulkFailure, BulkFailureKind, BulkState};
pub use facade::{Provider, Table};
pub use memory::{MemoryConnector, MemoryDatabase};
