use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::Semaphore;

use super::CommitError;
use super::activity::{Activity, derive_activities};
use super::record::{Commit, parse_record, record_hash};
use super::stats::diff_stats;

/// A raw log record: the lines between two sentinels.
pub type RawRecord = Vec<String>;

/// What every chunk task of one batch shares.
#[derive(Debug)]
pub(crate) struct ChunkContext {
    pub repo_path: PathBuf,
    pub remote: String,
    /// Records with this hash belong to the next batch.
    pub edge: Option<String>,
    pub stats_attempts: usize,
}

/// Output of one chunk, consumed as soon as the chunk completes.
#[derive(Debug, Default)]
pub(crate) struct ChunkOutput {
    pub activities: Vec<Activity>,
    pub commits: usize,
    pub bad_records: usize,
    pub boundary_skips: usize,
    pub stats_failures: usize,
}

#[derive(Debug, Default)]
pub(crate) struct ParsedChunk {
    pub commits: Vec<Commit>,
    pub bad_records: usize,
    pub boundary_skips: usize,
}

/// Validate every record of a chunk. CPU-bound.
pub(crate) fn parse_chunk(
    records: Vec<RawRecord>,
    edge: Option<&str>,
    now: DateTime<FixedOffset>,
) -> ParsedChunk {
    let mut parsed = ParsedChunk::default();
    for lines in records {
        if edge.is_some() && record_hash(&lines) == edge {
            parsed.boundary_skips += 1;
            continue;
        }
        match parse_record(&lines, now) {
            Ok(commit) => parsed.commits.push(commit),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed commit record");
                parsed.bad_records += 1;
            }
        }
    }
    parsed
}

/// Parse a chunk, attach diff stats and derive its activities.
///
/// Waits for a parse permit first; parsing and derivation run on the
/// blocking pool, diff stats are fetched commit by commit.
pub(crate) async fn process_chunk(
    records: Vec<RawRecord>,
    context: Arc<ChunkContext>,
    permits: Arc<Semaphore>,
) -> Result<ChunkOutput, CommitError> {
    let _permit = permits
        .acquire_owned()
        .await
        .map_err(|_| CommitError::Pool("parse pool closed".to_string()))?;

    let now = Utc::now().fixed_offset();
    let edge = context.edge.clone();
    let parsed = tokio::task::spawn_blocking(move || parse_chunk(records, edge.as_deref(), now))
        .await
        .map_err(|e| CommitError::Pool(e.to_string()))?;

    let mut commits = parsed.commits;
    let mut stats_failures = 0;
    for commit in &mut commits {
        match diff_stats(&context.repo_path, &commit.hash, context.stats_attempts).await {
            Ok(stats) => {
                commit.insertions = stats.insertions;
                commit.deletions = stats.deletions;
            }
            Err(e) => {
                tracing::warn!(commit = %commit.hash, error = %e, "Diff stats unavailable, using zero");
                stats_failures += 1;
            }
        }
    }

    let count = commits.len();
    let remote = context.remote.clone();
    let activities = tokio::task::spawn_blocking(move || {
        commits
            .iter()
            .flat_map(|commit| derive_activities(commit, &remote))
            .collect::<Vec<_>>()
    })
    .await
    .map_err(|e| CommitError::Pool(e.to_string()))?;

    Ok(ChunkOutput {
        activities,
        commits: count,
        bad_records: parsed.bad_records,
        boundary_skips: parsed.boundary_skips,
        stats_failures,
    })
}
