//! Commit service: turns the history of one clone batch into activities.
//!
//! The batch's `git log` is streamed and cut into raw records, records are
//! grouped into chunks and parsed on a bounded pool, and every finished chunk
//! is persisted and published before the next one is waited for. A failure
//! part-way through leaves earlier chunks delivered; redelivery is harmless
//! because result ids and message keys derive from activity source ids.

mod activity;
mod pipeline;
mod range;
mod record;
mod stats;
mod trailers;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{DatabaseConnection, Set};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::clone::CloneBatchInfo;
use crate::entity::integration_result::{ActiveModel as ResultActiveModel, PENDING_STATE};
use crate::entity::repository::Model as RepositoryModel;
use crate::entity::service_execution::OperationType;
use crate::metrics::{ErrorCode, ExecutionRecord, ExecutionTimer, record_execution};
use crate::queue::{MessageRoute, QueueError, QueueMessage, QueueService};
use crate::registry::{self, RegistryError};
use crate::retry::{fixed_backoff, with_retry};
use crate::vcs::{CommandError, GitCommand, git};

pub use activity::{
    AUTHORED_COMMIT, Activity, ActivityAttributes, COMMITTED_COMMIT, Identity, IdentityType,
    Member, clean_display_name, committed_source_id, derive_activities, timezone_name,
    trailer_source_id,
};
pub use range::{MAX_CHUNK_SIZE, MIN_CHUNK_SIZE, boundary_commit, chunk_size, commit_range};
pub use record::{Commit, LOG_FORMAT, RECORD_SENTINEL, RecordError, parse_record};
pub use stats::{DiffStats, diff_stats, parse_numstat};
pub use trailers::{Trailer, activity_types, extract_trailers};

use pipeline::{ChunkContext, ChunkOutput, RawRecord, process_chunk};

/// Pause between `rev-list --count` attempts.
const COUNT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// How activities reach the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Persist an integration result and publish its id.
    #[default]
    ResultRef,
    /// Publish the activity itself; nothing is persisted.
    Inline,
}

#[derive(Debug, Clone)]
pub struct CommitOptions {
    pub tenant_id: Uuid,
    pub delivery: DeliveryMode,
    /// Chunks parsed concurrently.
    pub parse_workers: usize,
    pub stats_attempts: usize,
    pub count_attempts: usize,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            tenant_id: Uuid::nil(),
            delivery: DeliveryMode::default(),
            parse_workers: std::thread::available_parallelism().map_or(4, |n| n.get()),
            stats_attempts: 3,
            count_attempts: 3,
        }
    }
}

/// Errors that fail a whole batch. Bad records never end up here.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("failed to serialize activity: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("parse worker failed: {0}")]
    Pool(String),
}

impl CommitError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            CommitError::Command(e) => e.error_code(),
            CommitError::Registry(e) => e.error_code(),
            CommitError::Queue(e) => e.error_code(),
            CommitError::Serialization(_) | CommitError::Pool(_) => ErrorCode::Internal,
        }
    }
}

/// Counters for one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total_commits: usize,
    pub processed_commits: usize,
    pub bad_records: usize,
    pub boundary_skips: usize,
    pub stats_failures: usize,
    pub duplicate_activities: usize,
    /// Activities of a fork already produced by its parent.
    pub parent_duplicates: usize,
    pub activities: usize,
    pub results_inserted: u64,
    pub messages_sent: usize,
}

impl BatchSummary {
    fn absorb(&mut self, chunk: &ChunkOutput) {
        self.processed_commits += chunk.commits;
        self.bad_records += chunk.bad_records;
        self.boundary_skips += chunk.boundary_skips;
        self.stats_failures += chunk.stats_failures;
    }
}

/// Where the activities of one batch go.
#[derive(Debug)]
struct DeliveryTarget {
    route: MessageRoute,
    /// Remote the activities were mined from.
    channel: String,
    /// Upstream of a fork. Results already mined from it are not repeated.
    parent_channel: Option<String>,
}

/// Mines clone batches into activities and hands them to the queue.
#[derive(Debug, Clone)]
pub struct CommitService {
    db: Arc<DatabaseConnection>,
    queue: Arc<QueueService>,
    options: CommitOptions,
}

impl CommitService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        queue: Arc<QueueService>,
        options: CommitOptions,
    ) -> Self {
        Self { db, queue, options }
    }

    pub fn options(&self) -> &CommitOptions {
        &self.options
    }

    /// Process every commit of one batch and record a `Commit` execution.
    pub async fn process_batch(
        &self,
        repo: &RepositoryModel,
        batch: &CloneBatchInfo,
    ) -> Result<BatchSummary, CommitError> {
        let timer = ExecutionTimer::start();
        let mut summary = BatchSummary::default();

        let result = self.run_batch(repo, batch, &mut summary).await;
        let record = match &result {
            Ok(()) => ExecutionRecord::success(repo.id, OperationType::Commit, &timer),
            Err(e) => {
                tracing::warn!(
                    repo = %repo.url,
                    batch = batch.batch_number,
                    code = %e.error_code(),
                    error = %e,
                    "Commit batch failed"
                );
                ExecutionRecord::failure(
                    repo.id,
                    OperationType::Commit,
                    &timer,
                    e.error_code(),
                    e.to_string(),
                )
            }
        };
        record_execution(&self.db, with_summary(record, batch, &summary)).await;

        result.map(|()| {
            tracing::info!(
                repo = %repo.url,
                batch = batch.batch_number,
                commits = summary.processed_commits,
                activities = summary.activities,
                bad_records = summary.bad_records,
                "Processed commit batch"
            );
            summary
        })
    }

    async fn run_batch(
        &self,
        repo: &RepositoryModel,
        batch: &CloneBatchInfo,
        summary: &mut BatchSummary,
    ) -> Result<(), CommitError> {
        let range = commit_range(batch);
        summary.total_commits = with_retry(
            || git::count_commits(&batch.repo_path, &range),
            fixed_backoff(COUNT_RETRY_DELAY, self.options.count_attempts),
            |_| true,
            "git rev-list --count",
        )
        .await?;
        if summary.total_commits == 0 {
            return Ok(());
        }

        let workers = self.options.parse_workers.max(1);
        let size = chunk_size(summary.total_commits, workers);
        let context = Arc::new(ChunkContext {
            repo_path: batch.repo_path.clone(),
            remote: batch.remote.clone(),
            edge: boundary_commit(batch),
            stats_attempts: self.options.stats_attempts,
        });
        let permits = Arc::new(Semaphore::new(workers));
        let target = DeliveryTarget {
            route: MessageRoute {
                tenant_id: self.options.tenant_id,
                segment_id: repo.segment_id,
                integration_id: repo.integration_id,
            },
            channel: batch.remote.clone(),
            parent_channel: repo.forked_from.clone(),
        };

        let mut log_args = vec!["log".to_string(), "--no-color".to_string(), LOG_FORMAT.to_string()];
        log_args.extend(range.iter().cloned());
        log_args.push("--".to_string());
        let mut stream = GitCommand::new(log_args).current_dir(&batch.repo_path).stream()?;

        let mut tasks = JoinSet::new();
        let mut seen = HashSet::new();
        let mut record: RawRecord = Vec::new();
        let mut chunk: Vec<RawRecord> = Vec::new();

        while let Some(line) = stream.next_line().await? {
            if line != RECORD_SENTINEL {
                record.push(line);
                continue;
            }
            chunk.push(std::mem::take(&mut record));
            if chunk.len() < size {
                continue;
            }

            // keep at most two chunks per worker in memory
            while tasks.len() >= workers * 2 {
                if let Some(done) = tasks.join_next().await {
                    let output = done.map_err(|e| CommitError::Pool(e.to_string()))??;
                    self.deliver(&target, output, &mut seen, summary).await?;
                }
            }
            tasks.spawn(process_chunk(
                std::mem::take(&mut chunk),
                Arc::clone(&context),
                Arc::clone(&permits),
            ));
            while let Some(done) = tasks.try_join_next() {
                let output = done.map_err(|e| CommitError::Pool(e.to_string()))??;
                self.deliver(&target, output, &mut seen, summary).await?;
            }
        }
        if record.iter().any(|line| !line.trim().is_empty()) {
            chunk.push(record);
        }
        if !chunk.is_empty() {
            tasks.spawn(process_chunk(chunk, Arc::clone(&context), Arc::clone(&permits)));
        }
        stream.finish().await?;

        while let Some(done) = tasks.join_next().await {
            let output = done.map_err(|e| CommitError::Pool(e.to_string()))??;
            self.deliver(&target, output, &mut seen, summary).await?;
        }
        Ok(())
    }

    /// Persist and publish the new activities of a finished chunk.
    async fn deliver(
        &self,
        target: &DeliveryTarget,
        output: ChunkOutput,
        seen: &mut HashSet<String>,
        summary: &mut BatchSummary,
    ) -> Result<(), CommitError> {
        summary.absorb(&output);

        let produced = output.activities.len();
        let mut fresh: Vec<Activity> = output
            .activities
            .into_iter()
            .filter(|activity| seen.insert(activity.source_id.clone()))
            .collect();
        summary.duplicate_activities += produced - fresh.len();

        if let Some(parent) = &target.parent_channel
            && !fresh.is_empty()
        {
            let ids: Vec<Uuid> = fresh.iter().map(Activity::result_id).collect();
            let inherited = registry::find_channel_result_ids(&self.db, parent, &ids).await?;
            let before = fresh.len();
            fresh.retain(|activity| !inherited.contains(&activity.result_id()));
            summary.parent_duplicates += before - fresh.len();
        }

        summary.activities += fresh.len();
        if fresh.is_empty() {
            return Ok(());
        }

        let route = &target.route;
        let messages = match self.options.delivery {
            DeliveryMode::ResultRef => {
                let now = Utc::now().fixed_offset();
                let mut rows = Vec::with_capacity(fresh.len());
                let mut messages = Vec::with_capacity(fresh.len());
                for activity in &fresh {
                    let id = activity.result_id();
                    rows.push(ResultActiveModel {
                        id: Set(id),
                        state: Set(PENDING_STATE.to_string()),
                        data: Set(serde_json::to_value(activity)?),
                        tenant_id: Set(route.tenant_id),
                        integration_id: Set(route.integration_id),
                        channel: Set(Some(target.channel.clone())),
                        created_at: Set(now),
                    });
                    messages.push(QueueMessage::result_ref(route, id)?);
                }
                summary.results_inserted += registry::insert_results(&self.db, rows).await?;
                messages
            }
            DeliveryMode::Inline => fresh
                .into_iter()
                .map(|activity| QueueMessage::inline(route, activity.result_id(), activity))
                .collect::<Result<Vec<_>, _>>()?,
        };

        summary.messages_sent += self.queue.send_batch(messages).await?;
        Ok(())
    }
}

fn with_summary(
    record: ExecutionRecord,
    batch: &CloneBatchInfo,
    summary: &BatchSummary,
) -> ExecutionRecord {
    record
        .with_metric("batch", batch.batch_number)
        .with_metric("total_commits", summary.total_commits as u64)
        .with_metric("processed_commits", summary.processed_commits as u64)
        .with_metric("bad_records", summary.bad_records as u64)
        .with_metric("boundary_skips", summary.boundary_skips as u64)
        .with_metric("stats_failures", summary.stats_failures as u64)
        .with_metric("duplicate_activities", summary.duplicate_activities as u64)
        .with_metric("parent_duplicates", summary.parent_duplicates as u64)
        .with_metric("activities", summary.activities as u64)
        .with_metric("messages_sent", summary.messages_sent as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_mode_reads_snake_case() {
        let mode: DeliveryMode = serde_json::from_str("\"result_ref\"").expect("valid");
        assert_eq!(mode, DeliveryMode::ResultRef);
        let mode: DeliveryMode = serde_json::from_str("\"inline\"").expect("valid");
        assert_eq!(mode, DeliveryMode::Inline);
    }

    #[test]
    fn error_codes_follow_the_failing_layer() {
        assert_eq!(
            CommitError::Queue(QueueError::ShutDown).error_code(),
            ErrorCode::Queue
        );
        assert_eq!(
            CommitError::Pool("panicked".to_string()).error_code(),
            ErrorCode::Internal
        );
        assert_eq!(
            CommitError::Command(CommandError::Timeout {
                command: "git log".to_string(),
                timeout: Duration::from_secs(1),
            })
            .error_code(),
            ErrorCode::Timeout
        );
    }

    #[test]
    fn log_format_ends_with_the_sentinel() {
        assert!(LOG_FORMAT.ends_with(RECORD_SENTINEL));
        assert!(LOG_FORMAT.starts_with("--pretty=format:%H%n"));
    }
}
