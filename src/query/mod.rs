pub mod limits;
pub mod predicate;
pub mod translator;

pub use limits::StatementLimits;
pub use predicate::{col, Assignments, ColumnRef, Predicate};
pub use translator::{quote_identifier, Fragment, Translator};
