pub mod error;
pub mod types;
pub mod value;

pub use error::{DbError, Operation, Result};
pub use types::{ColumnDescriptor, Row, SqlType, TableSchema, validate_identifier, MAX_DECIMAL_PRECISION};
pub use value::{FromValue, Value, WireValue};
