use tokio_util::sync::CancellationToken;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Bulk copy settings.
#[derive(Debug, Clone)]
pub struct BulkCopyOptions {
    /// Rows per batch handed to the session in one bulk call.
    pub batch_size: usize,
    /// Stops the copy between batches once cancelled.
    pub cancel: Option<CancellationToken>,
}

impl Default for BulkCopyOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            cancel: None,
        }
    }
}

impl BulkCopyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|t| t.is_cancelled()).unwrap_or(false)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be greater than 0".to_string());
        }
        Ok(())
    }
}
