//! Repository worker: the claim → clone → mine → release loop.
//!
//! ```text
//! idle → claim ─┬─ none  → sleep(poll_interval) → idle
//!               └─ repo  ─┬─ fork of a parent not onboarded yet → requires_parent
//!                         └─ clone batches ─→ software value, maintainers (first batch)
//!                                          ─→ commits (every batch)
//!                                          ─→ last commit (final batch)
//!                         → mark terminal state → release → idle
//! ```
//!
//! Every claimed repository is processed in its own supervisor task. The
//! supervisor writes the terminal state and releases the lock no matter how
//! processing ended, panics included.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use sea_orm::DatabaseConnection;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::clone::{BatchHandler, CloneBatchInfo, CloneService};
use crate::commit::{BatchSummary, CommitService};
use crate::entity::repository::Model as RepositoryModel;
use crate::entity::repository_state::RepositoryState;
use crate::error::{Error, Result};
use crate::maintainer::MaintainerService;
use crate::queue::QueueService;
use crate::registry::{self, ClaimOptions};
use crate::software_value::SoftwareValueService;

/// Default pause when there is nothing to claim.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default pause after an unexpected error in the loop.
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(10);
/// Default bound on waiting for running repositories at shutdown.
pub const DEFAULT_WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    /// Repositories processed at the same time by this worker.
    pub max_concurrent_repositories: usize,
    pub shutdown_timeout: Duration,
    pub claim: ClaimOptions,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            max_concurrent_repositories: 1,
            shutdown_timeout: DEFAULT_WORKER_SHUTDOWN_TIMEOUT,
            claim: ClaimOptions::default(),
        }
    }
}

/// What one repository run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryOutcome {
    pub repo_id: uuid::Uuid,
    pub state: RepositoryState,
    pub batches: u32,
    pub commits: usize,
    pub activities: usize,
}

#[derive(Debug)]
struct Services {
    db: Arc<DatabaseConnection>,
    clone: CloneService,
    commits: CommitService,
    maintainer: MaintainerService,
    software_value: SoftwareValueService,
    queue: Arc<QueueService>,
    options: WorkerOptions,
}

/// Polls the registry and processes claimed repositories.
#[derive(Debug, Clone)]
pub struct RepositoryWorker {
    services: Arc<Services>,
}

impl RepositoryWorker {
    pub fn new(
        db: Arc<DatabaseConnection>,
        clone: CloneService,
        commits: CommitService,
        maintainer: MaintainerService,
        software_value: SoftwareValueService,
        queue: Arc<QueueService>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            services: Arc::new(Services {
                db,
                clone,
                commits,
                maintainer,
                software_value,
                queue,
                options,
            }),
        }
    }

    /// Run until `cancel` fires, then drain running repositories and shut the queue down.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let options = &self.services.options;
        let slots = Arc::new(Semaphore::new(options.max_concurrent_repositories.max(1)));
        let tracker = TaskTracker::new();

        tracing::info!(
            max_concurrent = options.max_concurrent_repositories,
            poll_interval_secs = options.poll_interval.as_secs(),
            "Repository worker started"
        );

        loop {
            let permit = tokio::select! {
                () = cancel.cancelled() => break,
                permit = Arc::clone(&slots).acquire_owned() => {
                    permit.map_err(|_| Error::internal("worker slots closed"))?
                }
            };

            let pause = match registry::acquire_repository_for_processing(
                &self.services.db,
                &options.claim,
            )
            .await
            {
                Ok(Some(repo)) => {
                    let worker = self.clone();
                    let span = tracing::info_span!("repository", repo = %repo.url, id = %repo.id);
                    tracker.spawn(
                        async move {
                            let _permit = permit;
                            worker.supervise(repo).await;
                        }
                        .instrument(span),
                    );
                    continue;
                }
                Ok(None) => {
                    tracing::debug!("No repositories to process");
                    options.poll_interval
                }
                Err(e) => {
                    tracing::error!(code = %e.error_code(), error = %e, "Failed to claim a repository");
                    options.error_backoff
                }
            };

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(pause) => {}
            }
        }

        tracing::info!(running = tracker.len(), "Stopping repository worker");
        self.drain(tracker).await
    }

    /// Claim and process at most one repository, then shut the queue down.
    pub async fn run_once(&self) -> Result<Option<RepositoryOutcome>> {
        let claimed = registry::acquire_repository_for_processing(
            &self.services.db,
            &self.services.options.claim,
        )
        .await?;

        let outcome = match claimed {
            Some(repo) => {
                let span = tracing::info_span!("repository", repo = %repo.url, id = %repo.id);
                Some(self.supervise(repo).instrument(span).await)
            }
            None => {
                tracing::info!("No repositories to process");
                None
            }
        };

        self.services.queue.shutdown().await?;
        Ok(outcome)
    }

    async fn drain(&self, tracker: TaskTracker) -> Result<()> {
        tracker.close();
        let timeout = self.services.options.shutdown_timeout;
        if tokio::time::timeout(timeout, tracker.wait()).await.is_err() {
            tracing::warn!(
                running = tracker.len(),
                timeout_secs = timeout.as_secs(),
                "Repositories still running at shutdown timeout"
            );
        }
        self.services.queue.shutdown().await?;
        tracing::info!("Repository worker stopped");
        Ok(())
    }

    /// Process a claimed repository, then record its terminal state and release it.
    async fn supervise(&self, repo: RepositoryModel) -> RepositoryOutcome {
        tracing::info!("Processing repository");
        let worker = self.clone();
        let task_repo = repo.clone();
        let handle = tokio::spawn(
            async move { worker.process(&task_repo).await }.in_current_span(),
        );

        let mut outcome = RepositoryOutcome {
            repo_id: repo.id,
            state: RepositoryState::Failed,
            batches: 0,
            commits: 0,
            activities: 0,
        };
        match handle.await {
            Ok(Ok(Processed::Mined(totals))) => {
                outcome.state = RepositoryState::Completed;
                outcome.batches = totals.batches;
                outcome.commits = totals.commits;
                outcome.activities = totals.activities;
            }
            Ok(Ok(Processed::AwaitingParent)) => {
                outcome.state = RepositoryState::RequiresParent;
            }
            Ok(Err(e)) => {
                tracing::error!(code = %e.code(), error = %e, "Repository processing failed");
            }
            Err(e) => {
                tracing::error!(error = %e, "Repository processing task panicked");
            }
        }

        let db = &self.services.db;
        if let Err(e) = registry::mark_processed(db, repo.id, outcome.state).await {
            tracing::error!(error = %e, state = %outcome.state, "Failed to record terminal state");
        }
        if let Err(e) = registry::release(db, repo.id).await {
            tracing::error!(error = %e, "Failed to release repository");
        }

        tracing::info!(
            state = %outcome.state,
            batches = outcome.batches,
            commits = outcome.commits,
            activities = outcome.activities,
            "Finished repository"
        );
        outcome
    }

    async fn process(&self, repo: &RepositoryModel) -> Result<Processed> {
        let services: &Services = &self.services;

        if let Some(parent_url) = &repo.forked_from {
            match registry::find_by_url(&services.db, parent_url).await? {
                Some(parent) if parent.is_onboarded() => {}
                Some(_) => {
                    tracing::info!(parent = %parent_url, "Parent not onboarded yet, deferring fork");
                    return Ok(Processed::AwaitingParent);
                }
                None => {
                    tracing::warn!(
                        parent = %parent_url,
                        "Parent is not tracked, processing fork without parent deduplication"
                    );
                }
            }
        }

        let mut run = RepositoryRun {
            services,
            repo,
            totals: RunTotals::default(),
        };
        let summary = services.clone.for_each_batch(repo, &mut run).await?;

        let mut totals = run.totals;
        totals.batches = summary.batches;
        Ok(Processed::Mined(totals))
    }
}

/// How processing a claimed repository ended, short of an error.
#[derive(Debug)]
enum Processed {
    Mined(RunTotals),
    /// A fork whose parent has not been onboarded yet.
    AwaitingParent,
}

/// Batch handler for one repository run.
struct RepositoryRun<'a> {
    services: &'a Services,
    repo: &'a RepositoryModel,
    totals: RunTotals,
}

impl RepositoryRun<'_> {
    async fn on_batch(&mut self, batch: CloneBatchInfo) -> Result<()> {
        let Self { services, repo, .. } = *self;

        if batch.is_first_batch {
            if !batch.clone_with_batches && repo.is_onboarded() {
                registry::increase_re_onboarding_count(&services.db, repo.id).await?;
            }
            services.software_value.process(repo, &batch.repo_path).await;
            services.maintainer.process(repo, &batch.repo_path).await;
        }

        let summary = services.commits.process_batch(repo, &batch).await?;
        self.totals.add(&summary);

        if batch.is_final_batch
            && let Some(latest) = &batch.latest_commit_in_repo
        {
            registry::update_last_processed_commit(
                &services.db,
                repo.id,
                latest,
                batch.branch.as_deref(),
            )
            .await?;
        }
        Ok(())
    }
}

impl BatchHandler for RepositoryRun<'_> {
    type Error = Error;

    fn handle_batch(&mut self, batch: CloneBatchInfo) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.on_batch(batch))
    }
}

#[derive(Debug, Default)]
struct RunTotals {
    batches: u32,
    commits: usize,
    activities: usize,
}

impl RunTotals {
    fn add(&mut self, summary: &BatchSummary) {
        self.commits += summary.processed_commits;
        self.activities += summary.activities;
    }
}
