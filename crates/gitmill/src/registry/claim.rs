use std::time::Duration;

use backon::Retryable;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, EntityTrait, PaginatorTrait, Statement,
    Value,
};

use crate::entity::integration_result::Entity as IntegrationResult;
use crate::entity::repository::{Entity as Repository, Model};
use crate::entity::repository_state::RepositoryState;
use crate::retry::fixed_backoff;

use super::errors::{RegistryError, Result};

// ─── Options ─────────────────────────────────────────────────────────────────

/// Total claim attempts before a locking error is surfaced.
pub const CLAIM_ATTEMPTS: usize = 3;

/// Fixed delay between claim attempts.
pub const CLAIM_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Knobs that decide which repositories are eligible for a claim.
#[derive(Debug, Clone)]
pub struct ClaimOptions {
    /// Upper bound on repositories onboarding at the same time across all workers.
    pub max_concurrent_onboardings: u32,
    /// Onboarding pauses while the results table holds this many rows or more.
    pub max_pending_results: u64,
    /// Minimum age of `last_processed_at` before a repository is refreshed.
    pub refresh_interval: Duration,
}

impl Default for ClaimOptions {
    fn default() -> Self {
        Self {
            max_concurrent_onboardings: 3,
            max_pending_results: 1_000_000,
            refresh_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// The two claim flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimKind {
    /// Brand-new repositories in `pending`.
    Onboarding,
    /// Previously processed repositories due for a refresh.
    Recurrent,
}

impl std::fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaimKind::Onboarding => write!(f, "onboarding"),
            ClaimKind::Recurrent => write!(f, "recurrent"),
        }
    }
}

// ─── Statement Rendering ─────────────────────────────────────────────────────

/// Collects bind values and renders the matching placeholder for the backend.
struct Binds {
    backend: DatabaseBackend,
    values: Vec<Value>,
}

impl Binds {
    fn new(backend: DatabaseBackend) -> Self {
        Self {
            backend,
            values: Vec::new(),
        }
    }

    fn push(&mut self, value: impl Into<Value>) -> String {
        self.values.push(value.into());
        match self.backend {
            DatabaseBackend::Postgres => format!("${}", self.values.len()),
            _ => "?".to_string(),
        }
    }
}

impl ClaimKind {
    fn filter(self, binds: &mut Binds, now: DateTime<FixedOffset>, options: &ClaimOptions) -> String {
        match self {
            ClaimKind::Onboarding => format!(
                "r.state = {} AND r.locked_at IS NULL AND r.deleted_at IS NULL \
                 AND (SELECT COUNT(*) FROM repositories o \
                      WHERE o.state = {} AND o.last_processed_commit IS NULL \
                      AND o.deleted_at IS NULL) < {}",
                binds.push(RepositoryState::Pending.as_str()),
                binds.push(RepositoryState::Processing.as_str()),
                binds.push(i64::from(options.max_concurrent_onboardings)),
            ),
            ClaimKind::Recurrent => {
                let interval = chrono::Duration::from_std(options.refresh_interval)
                    .unwrap_or(chrono::Duration::MAX);
                let cutoff = now.checked_sub_signed(interval).unwrap_or(now);
                format!(
                    "r.state NOT IN ({}, {}, {}) AND r.locked_at IS NULL \
                     AND r.deleted_at IS NULL AND r.last_processed_at < {}",
                    binds.push(RepositoryState::Pending.as_str()),
                    binds.push(RepositoryState::Processing.as_str()),
                    binds.push(RepositoryState::Stuck.as_str()),
                    binds.push(cutoff),
                )
            }
        }
    }

    fn order_by(self) -> &'static str {
        match self {
            ClaimKind::Onboarding => "r.priority ASC, r.created_at ASC",
            ClaimKind::Recurrent => "r.priority ASC, r.last_processed_at ASC",
        }
    }
}

fn set_clause(binds: &mut Binds, now: DateTime<FixedOffset>) -> String {
    format!(
        "state = {}, locked_at = {}, updated_at = {}",
        binds.push(RepositoryState::Processing.as_str()),
        binds.push(now),
        binds.push(now),
    )
}

/// Build the single statement that selects, locks and marks one candidate.
///
/// On Postgres the candidate is selected with `FOR UPDATE SKIP LOCKED` so
/// concurrent claimants never block on, or double-claim, the same row. SQLite
/// serializes writers, so the `locked_at IS NULL` guard on the update suffices.
pub(crate) fn claim_statement(
    backend: DatabaseBackend,
    kind: ClaimKind,
    now: DateTime<FixedOffset>,
    options: &ClaimOptions,
) -> Result<Statement> {
    let mut binds = Binds::new(backend);
    let sql = match backend {
        DatabaseBackend::Postgres => {
            let filter = kind.filter(&mut binds, now, options);
            let set = set_clause(&mut binds, now);
            format!(
                "WITH candidate AS ( \
                     SELECT r.id FROM repositories r \
                     WHERE {filter} \
                     ORDER BY {order} \
                     LIMIT 1 \
                     FOR UPDATE OF r SKIP LOCKED \
                 ) \
                 UPDATE repositories SET {set} \
                 FROM candidate \
                 WHERE repositories.id = candidate.id \
                 RETURNING repositories.*",
                order = kind.order_by(),
            )
        }
        DatabaseBackend::Sqlite => {
            let set = set_clause(&mut binds, now);
            let filter = kind.filter(&mut binds, now, options);
            format!(
                "UPDATE repositories SET {set} \
                 WHERE id = ( \
                     SELECT r.id FROM repositories r \
                     WHERE {filter} \
                     ORDER BY {order} \
                     LIMIT 1 \
                 ) AND locked_at IS NULL \
                 RETURNING *",
                order = kind.order_by(),
            )
        }
        DatabaseBackend::MySql => {
            return Err(RegistryError::InvalidInput {
                message: "repository claims require Postgres or SQLite".to_string(),
            });
        }
    };

    Ok(Statement::from_sql_and_values(backend, sql, binds.values))
}

// ─── Claims ──────────────────────────────────────────────────────────────────

async fn claim_once(
    db: &DatabaseConnection,
    kind: ClaimKind,
    options: &ClaimOptions,
) -> Result<Option<Model>> {
    let now = Utc::now().fixed_offset();
    let stmt = claim_statement(db.get_database_backend(), kind, now, options)?;

    Repository::find()
        .from_raw_sql(stmt)
        .one(db)
        .await
        .map_err(|source| RegistryError::Locking { kind, source })
}

async fn claim(
    db: &DatabaseConnection,
    kind: ClaimKind,
    options: &ClaimOptions,
) -> Result<Option<Model>> {
    let claimed = (|| claim_once(db, kind, options))
        .retry(fixed_backoff(CLAIM_RETRY_DELAY, CLAIM_ATTEMPTS))
        .when(RegistryError::is_locking)
        .notify(|err, dur| {
            tracing::warn!(%kind, retry_in_ms = dur.as_millis() as u64, error = %err, "Claim failed, retrying");
        })
        .await?;

    if let Some(repo) = &claimed {
        tracing::info!(%kind, id = %repo.id, url = %repo.url, "Claimed repository");
    }
    Ok(claimed)
}

/// Claim the oldest, highest-priority repository that has never been processed.
///
/// # Errors
/// Returns `RegistryError::Locking` once every attempt has failed.
pub async fn acquire_onboarding(
    db: &DatabaseConnection,
    options: &ClaimOptions,
) -> Result<Option<Model>> {
    claim(db, ClaimKind::Onboarding, options).await
}

/// Claim the highest-priority repository whose last run is older than the refresh interval.
///
/// Repositories in `pending`, `processing` or `stuck` are never returned.
pub async fn acquire_recurrent(
    db: &DatabaseConnection,
    options: &ClaimOptions,
) -> Result<Option<Model>> {
    claim(db, ClaimKind::Recurrent, options).await
}

/// Whether the downstream results backlog leaves room for another onboarding.
///
/// A failing count query is treated as "no": the database is most likely
/// already under heavy load.
pub async fn can_onboard_more(db: &DatabaseConnection, options: &ClaimOptions) -> bool {
    match IntegrationResult::find().count(db).await {
        Ok(count) => count < options.max_pending_results,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to count integration results");
            false
        }
    }
}

/// Claim the next repository to process, preferring onboarding over refreshes.
pub async fn acquire_repository_for_processing(
    db: &DatabaseConnection,
    options: &ClaimOptions,
) -> Result<Option<Model>> {
    if can_onboard_more(db, options).await {
        if let Some(repo) = acquire_onboarding(db, options).await? {
            return Ok(Some(repo));
        }
    } else {
        tracing::info!("Skipping onboarding, results backlog is full");
    }

    acquire_recurrent(db, options).await
}
