pub mod engine;
pub mod options;

pub use engine::{BulkCopier, BulkCopyResult, BulkFailure, BulkFailureKind, BulkState};
pub use options::{BulkCopyOptions, DEFAULT_BATCH_SIZE};
