use super::options::BulkCopyOptions;
use crate::core::{DbError, Operation, Result, Row, WireValue};
use crate::executor::{StatementExecutor, TableRef};
use crate::mapping::{encode_row, Entity};
use crate::session::{SessionError, SessionGuard, SessionResult};
use futures::stream::{self, Stream, StreamExt};
use log::warn;
use serde::Serialize;
use std::fmt;
use tracing::{event, info_span, Instrument, Level};

/// Lifecycle of one bulk copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BulkState {
    Idle,
    Streaming,
    Draining,
    Completed,
    Failed,
}

impl fmt::Display for BulkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::Draining => "draining",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BulkFailureKind {
    /// A row of the batch did not encode.
    Encoding,
    /// The session refused the batch or the connection failed.
    Session,
    Cancelled,
}

/// Where a failed copy stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkFailure {
    pub kind: BulkFailureKind,
    /// Zero-based index of the batch that was not committed.
    pub batch_index: usize,
    pub batch_rows: usize,
    pub detail: String,
}

/// Outcome of a bulk copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkCopyResult {
    pub table: String,
    /// Rows acknowledged by the session.
    pub rows_copied: u64,
    pub batches_committed: usize,
    pub failed: bool,
    pub failure: Option<BulkFailure>,
    pub state: BulkState,
}

impl BulkCopyResult {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            rows_copied: 0,
            batches_committed: 0,
            failed: false,
            failure: None,
            state: BulkState::Idle,
        }
    }

    fn fail(&mut self, failure: BulkFailure) {
        self.failed = true;
        self.failure = Some(failure);
        self.state = BulkState::Failed;
    }

    /// Number of copied rows, or the error that stopped the copy.
    pub fn into_result(self) -> Result<u64> {
        let Some(failure) = self.failure else {
            return Ok(self.rows_copied);
        };

        Err(match failure.kind {
            BulkFailureKind::Cancelled => DbError::Cancelled {
                operation: Operation::BulkCopy,
                table: self.table,
                rows_committed: self.rows_copied,
                reason: failure.detail,
            },
            BulkFailureKind::Encoding | BulkFailureKind::Session => DbError::BulkBatchFailed {
                table: self.table,
                rows_committed: self.rows_copied,
                batch_index: failure.batch_index,
                batch_rows: failure.batch_rows,
                message: failure.detail,
            },
        })
    }
}

enum Pull {
    Row(Row),
    Exhausted,
    Cancelled,
}

/// Streams rows into one table in fixed-size batches.
///
/// Rows are pulled lazily into a single reusable batch; a full batch is
/// encoded and handed to the session as one bulk call, and the next row is
/// not pulled until that call returns. Memory therefore stays bounded by
/// the batch size whatever the length of the input.
///
/// The copy never retries. A failed batch ends it with the rows of every
/// earlier batch committed. Cancellation between batches drops the rows
/// buffered for the pending batch. A bulk call still running when the
/// token fires or the query timeout expires is abandoned and its session
/// discarded; that batch counts as not committed.
pub struct BulkCopier {
    executor: StatementExecutor,
    table: TableRef,
    options: BulkCopyOptions,
}

impl BulkCopier {
    pub fn new(executor: StatementExecutor, table: TableRef, options: BulkCopyOptions) -> Result<Self> {
        options.validate().map_err(DbError::Config)?;
        Ok(Self {
            executor,
            table,
            options,
        })
    }

    pub fn options(&self) -> &BulkCopyOptions {
        &self.options
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    /// Copies every entity of `entities`.
    pub async fn copy_entities<E, S>(&self, entities: S) -> Result<BulkCopyResult>
    where
        E: Entity,
        S: Stream<Item = E> + Send,
    {
        self.copy_rows(entities.map(|entity| entity.to_row())).await
    }

    pub async fn copy_iter<I>(&self, rows: I) -> Result<BulkCopyResult>
    where
        I: IntoIterator<Item = Row>,
        I::IntoIter: Send,
    {
        self.copy_rows(stream::iter(rows)).await
    }

    /// Copies every row of `rows`.
    ///
    /// Only a failure to open the session is returned as an error. Batch
    /// failures and cancellation are reported in the result; use
    /// [`BulkCopyResult::into_result`] to turn them into errors.
    pub async fn copy_rows<S>(&self, rows: S) -> Result<BulkCopyResult>
    where
        S: Stream<Item = Row> + Send,
    {
        let span = info_span!(
            "bulk.copy",
            table = %self.table.name(),
            batch_size = self.options.batch_size
        );

        async move {
            let mut session = self.executor.open(self.table.name()).await?;
            let mut result = BulkCopyResult::new(self.table.name());
            let transport_failed = self.stream_batches(&mut session, rows, &mut result).await;

            if transport_failed {
                session.discard();
            } else if let Err(err) = session.close().await {
                warn!("Closing bulk copy session on '{}': {}", self.table.name(), err);
            }

            event!(
                Level::INFO,
                rows = result.rows_copied,
                batches = result.batches_committed,
                state = %result.state,
                "bulk copy finished"
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Drives the state machine. Returns `true` when the session hit a
    /// transport failure and must not be reused.
    async fn stream_batches<S>(&self, session: &mut SessionGuard, rows: S, result: &mut BulkCopyResult) -> bool
    where
        S: Stream<Item = Row> + Send,
    {
        let mut rows = std::pin::pin!(rows);
        let batch_size = self.options.batch_size;
        let mut batch: Vec<Row> = Vec::with_capacity(batch_size);
        result.state = BulkState::Streaming;

        loop {
            match self.pull(&mut rows).await {
                Pull::Row(row) => {
                    batch.push(row);
                    if batch.len() < batch_size {
                        continue;
                    }
                    if let Err(failed) = self.submit(session, &mut batch, result).await {
                        return failed;
                    }
                }
                Pull::Exhausted => {
                    result.state = BulkState::Draining;
                    if !batch.is_empty()
                        && let Err(failed) = self.submit(session, &mut batch, result).await
                    {
                        return failed;
                    }
                    result.state = BulkState::Completed;
                    return false;
                }
                Pull::Cancelled => {
                    event!(
                        Level::WARN,
                        rows = result.rows_copied,
                        dropped = batch.len(),
                        "bulk copy cancelled"
                    );
                    result.fail(BulkFailure {
                        kind: BulkFailureKind::Cancelled,
                        batch_index: result.batches_committed,
                        batch_rows: batch.len(),
                        detail: "bulk copy cancelled".to_string(),
                    });
                    return false;
                }
            }
        }
    }

    async fn pull<S>(&self, rows: &mut std::pin::Pin<&mut S>) -> Pull
    where
        S: Stream<Item = Row> + Send,
    {
        let next = match &self.options.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Pull::Cancelled,
                    row = rows.next() => row,
                }
            }
            None => rows.next().await,
        };

        next.map_or(Pull::Exhausted, Pull::Row)
    }

    /// Encodes and submits the batch, clearing it on success. On failure
    /// the result is marked failed and the error carries whether the
    /// session is broken.
    async fn submit(
        &self,
        session: &mut SessionGuard,
        batch: &mut Vec<Row>,
        result: &mut BulkCopyResult,
    ) -> std::result::Result<(), bool> {
        let batch_index = result.batches_committed;
        let batch_rows = batch.len();
        let schema = self.table.schema();

        let wire = match batch
            .iter()
            .map(|row| encode_row(schema, row))
            .collect::<Result<Vec<Vec<WireValue>>>>()
        {
            Ok(wire) => wire,
            Err(err) => {
                event!(Level::ERROR, batch_index, error = %err, "bulk batch failed to encode");
                result.fail(BulkFailure {
                    kind: BulkFailureKind::Encoding,
                    batch_index,
                    batch_rows,
                    detail: err.to_string(),
                });
                return Err(false);
            }
        };

        let columns = schema.physical_names();
        let outcome = match self.ingest(session, &columns, wire).await {
            Ok(outcome) => outcome,
            Err(reason) => {
                event!(Level::WARN, batch_index, rows = result.rows_copied, %reason, "bulk batch interrupted");
                result.fail(BulkFailure {
                    kind: BulkFailureKind::Cancelled,
                    batch_index,
                    batch_rows,
                    detail: reason,
                });
                return Err(true);
            }
        };

        match outcome {
            Ok(_) => {
                result.rows_copied += batch_rows as u64;
                result.batches_committed += 1;
                batch.clear();
                event!(
                    Level::DEBUG,
                    batch_index,
                    batch_rows,
                    total = result.rows_copied,
                    "bulk batch acknowledged"
                );
                Ok(())
            }
            Err(err) => {
                let broken = matches!(err, SessionError::Transport(_) | SessionError::Closed);
                event!(Level::ERROR, batch_index, error = %err, "bulk batch rejected");
                result.fail(BulkFailure {
                    kind: BulkFailureKind::Session,
                    batch_index,
                    batch_rows,
                    detail: err.to_string(),
                });
                Err(broken)
            }
        }
    }

    /// Runs one bulk call under the query timeout and the cancel token.
    /// `Err` carries why the call was abandoned.
    async fn ingest(
        &self,
        session: &mut SessionGuard,
        columns: &[String],
        wire: Vec<Vec<WireValue>>,
    ) -> std::result::Result<SessionResult<u64>, String> {
        let call = session.bulk_ingest(self.table.name(), columns, wire);
        let timed = async {
            match self.executor.query_timeout() {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .map_err(|_| format!("bulk batch exceeded the query timeout of {:?}", limit)),
                None => Ok(call.await),
            }
        };

        match &self.options.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err("bulk copy cancelled during a batch".to_string()),
                    outcome = timed => outcome,
                }
            }
            None => timed.await,
        }
    }
}
