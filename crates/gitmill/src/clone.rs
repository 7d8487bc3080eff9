//! Clone service: materializes just enough repository history, batch by batch.
//!
//! A repository seen for the first time (or whose default branch moved) is
//! cloned in full and handed over as one final batch. Otherwise the service
//! starts from a depth-1 clone and deepens it step by step until the commit
//! processed by the previous run becomes reachable, so a re-sync only ever
//! downloads the new part of the history.
//!
//! # Example
//!
//! ```ignore
//! struct Mine<'a> { commits: &'a CommitService, repo: &'a RepositoryModel }
//!
//! impl BatchHandler for Mine<'_> {
//!     type Error = gitmill::Error;
//!
//!     fn handle_batch(&mut self, batch: CloneBatchInfo) -> BoxFuture<'_, Result<(), Self::Error>> {
//!         Box::pin(async move {
//!             self.commits.process_batch(self.repo, &batch).await?;
//!             Ok(())
//!         })
//!     }
//! }
//!
//! let service = CloneService::new(Arc::clone(&db), CloneOptions::default());
//! service.for_each_batch(&repo, &mut Mine { commits: &commits, repo: &repo }).await?;
//! ```

mod session;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use sea_orm::DatabaseConnection;
use thiserror::Error;

use crate::entity::repository::Model as RepositoryModel;
use crate::entity::service_execution::OperationType;
use crate::metrics::{ErrorCode, ExecutionRecord, ExecutionTimer, record_execution};
use crate::vcs::CommandError;

pub use session::CloneSession;
pub use types::{
    CloneBatchInfo, CloneOptions, CloneStrategy, CloneSummary,
    DEFAULT_COMPACTION_THRESHOLD_BYTES, LARGE_REMOTE_DEPTH, MEDIUM_REMOTE_DEPTH,
    SMALL_REMOTE_DEPTH, batch_depth,
};

/// Errors raised while cloning or deepening.
#[derive(Debug, Error)]
pub enum CloneError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CloneError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            CloneError::Command(e) => e.error_code(),
            CloneError::Io { source, .. } if is_disk_full(source) => ErrorCode::DiskSpace,
            CloneError::Io { .. } => ErrorCode::Internal,
        }
    }
}

fn is_disk_full(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::StorageFull
        || err.to_string().contains("No space left on device")
}

/// Consumes the batches of one clone session, in order.
///
/// The returned future must be `Send`: the worker runs every repository on
/// its own task.
pub trait BatchHandler: Send {
    type Error: From<CloneError> + Send;

    fn handle_batch(&mut self, batch: CloneBatchInfo) -> BoxFuture<'_, Result<(), Self::Error>>;
}

/// Drives clone sessions and records their metrics.
#[derive(Debug, Clone)]
pub struct CloneService {
    db: Arc<DatabaseConnection>,
    options: CloneOptions,
}

impl CloneService {
    pub fn new(db: Arc<DatabaseConnection>, options: CloneOptions) -> Self {
        Self { db, options }
    }

    pub fn options(&self) -> &CloneOptions {
        &self.options
    }

    /// Clone `repo` and call `handler` once per batch, in order.
    ///
    /// Whatever happens (clone failure, handler failure, final batch) the
    /// working directory is removed and a `Clone` execution is recorded before
    /// this returns. A failed removal is recorded as `CLEANUP_FAILED` and does
    /// not change the result. The first handler error stops the iteration and
    /// is returned as is.
    pub async fn for_each_batch<H: BatchHandler>(
        &self,
        repo: &RepositoryModel,
        handler: &mut H,
    ) -> Result<CloneSummary, H::Error> {
        let timer = ExecutionTimer::start();

        let mut session = match CloneSession::open(repo, &self.options).await {
            Ok(session) => session,
            Err(e) => {
                self.record_failure(repo, &timer, &e, None).await;
                return Err(e.into());
            }
        };

        let mut clone_error = None;
        let mut handler_error = None;
        loop {
            match session.next_batch().await {
                Ok(Some(batch)) => {
                    if let Err(e) = handler.handle_batch(batch).await {
                        handler_error = Some(e);
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    clone_error = Some(e);
                    break;
                }
            }
        }

        let summary = session.summary();
        if let Err(e) = session.close().await {
            tracing::error!(repo = %repo.url, error = %e, "Failed to remove clone directory");
            record_execution(
                &self.db,
                ExecutionRecord::failure(
                    repo.id,
                    OperationType::Clone,
                    &timer,
                    ErrorCode::CleanupFailed,
                    e.to_string(),
                ),
            )
            .await;
        }

        if let Some(e) = clone_error {
            self.record_failure(repo, &timer, &e, Some(&summary)).await;
            return Err(e.into());
        }

        record_execution(
            &self.db,
            with_summary(
                ExecutionRecord::success(repo.id, OperationType::Clone, &timer),
                &summary,
            ),
        )
        .await;

        match handler_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    async fn record_failure(
        &self,
        repo: &RepositoryModel,
        timer: &ExecutionTimer,
        err: &CloneError,
        summary: Option<&CloneSummary>,
    ) {
        tracing::warn!(repo = %repo.url, code = %err.error_code(), error = %err, "Clone failed");
        let mut record = ExecutionRecord::failure(
            repo.id,
            OperationType::Clone,
            timer,
            err.error_code(),
            err.to_string(),
        );
        if let Some(summary) = summary {
            record = with_summary(record, summary);
        }
        record_execution(&self.db, record).await;
    }
}

fn with_summary(record: ExecutionRecord, summary: &CloneSummary) -> ExecutionRecord {
    record
        .with_metric("strategy", summary.strategy.to_string())
        .with_metric("batches", summary.batches)
        .with_metric("fetches", summary.fetches)
        .with_metric("compactions", summary.compactions)
        .with_metric("bytes_on_disk", summary.bytes_on_disk)
}
