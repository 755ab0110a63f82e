//! Everything application code usually needs.
//!
//! ```ignore
//! use tabula::prelude::*;
//! ```

pub use crate::{
    col, declare_entity, Assignments, BulkCopyOptions, BulkCopyResult, ColumnDescriptor, CreateMode, DbError, Entity,
    Predicate, Provider, Result, Row, SqlType, Table, Value,
};

pub mod backend {
    //! Session plumbing for wiring a provider to a database.
    pub use crate::memory::MemoryDatabase;
    pub use crate::session::{Connector, Session, SessionConfig, SessionManager, SessionPool};
}
