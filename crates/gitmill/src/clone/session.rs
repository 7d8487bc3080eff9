use std::path::{Path, PathBuf};
use std::time::Instant;

use uuid::Uuid;

use crate::entity::repository::Model as RepositoryModel;
use crate::retry::with_retry;
use crate::retry::fixed_backoff;
use crate::vcs::{GitCommand, git};

use super::CloneError;
use super::types::{CloneBatchInfo, CloneOptions, CloneStrategy, CloneSummary};

/// Name of the bare repository inside a session directory.
const REPO_DIR_NAME: &str = "repo.git";

/// One repository's clone, producing batches lazily.
///
/// Each session owns a fresh directory. [`CloneSession::close`] removes it;
/// a session dropped without being closed removes it synchronously.
#[derive(Debug)]
pub struct CloneSession {
    options: CloneOptions,
    remote: String,
    session_dir: PathBuf,
    repo_path: PathBuf,
    branch: Option<String>,
    strategy: CloneStrategy,
    target_commit: Option<String>,
    latest_commit: Option<String>,
    edge: Option<String>,
    batch_number: u32,
    fetches: u32,
    compactions: u32,
    bytes_on_disk: u64,
    finished: bool,
    closed: bool,
}

impl CloneSession {
    /// Resolve the remote branch, pick a strategy and prepare a working directory.
    ///
    /// Nothing is fetched until the first [`next_batch`](Self::next_batch).
    pub async fn open(repo: &RepositoryModel, options: &CloneOptions) -> Result<Self, CloneError> {
        let remote = repo.url.clone();
        let branch = git::remote_default_branch(&remote, options.remote_timeout).await?;

        let strategy = if CloneStrategy::requires_full_clone(
            repo.last_processed_commit.as_deref(),
            repo.branch.as_deref(),
            branch.as_deref(),
        ) {
            CloneStrategy::Full
        } else {
            let refs = git::count_remote_refs(&remote, options.remote_timeout).await?;
            CloneStrategy::minimal(refs)
        };

        let session_dir = options.work_root.join(format!(
            "{}-{}",
            git::repo_name(&remote),
            Uuid::new_v4().simple()
        ));
        tokio::fs::create_dir_all(&session_dir)
            .await
            .map_err(|source| CloneError::Io {
                path: session_dir.clone(),
                source,
            })?;

        tracing::info!(
            remote = %remote,
            branch = branch.as_deref().unwrap_or("<detached>"),
            %strategy,
            dir = %session_dir.display(),
            "Opened clone session"
        );

        Ok(Self {
            options: options.clone(),
            remote,
            repo_path: session_dir.join(REPO_DIR_NAME),
            session_dir,
            branch,
            strategy,
            target_commit: match strategy {
                CloneStrategy::Full => None,
                CloneStrategy::Minimal { .. } => repo.last_processed_commit.clone(),
            },
            latest_commit: None,
            edge: None,
            batch_number: 0,
            fetches: 0,
            compactions: 0,
            bytes_on_disk: 0,
            finished: false,
            closed: false,
        })
    }

    pub fn strategy(&self) -> CloneStrategy {
        self.strategy
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn summary(&self) -> CloneSummary {
        CloneSummary {
            strategy: self.strategy,
            batches: self.batch_number,
            fetches: self.fetches,
            compactions: self.compactions,
            bytes_on_disk: self.bytes_on_disk,
        }
    }

    /// Fetch the next slice of history, or `None` once the final batch was produced.
    pub async fn next_batch(&mut self) -> Result<Option<CloneBatchInfo>, CloneError> {
        if self.finished {
            return Ok(None);
        }
        self.batch_number += 1;
        let is_first = self.batch_number == 1;

        let batch = match self.strategy {
            CloneStrategy::Full => {
                self.clone_repo(None).await?;
                self.latest_commit = Some(git::head_commit(&self.repo_path).await?);
                self.finished = true;
                self.batch_info(is_first, true, None, None, false)
            }
            CloneStrategy::Minimal { depth } => {
                if is_first {
                    self.clone_repo(Some(1)).await?;
                    self.latest_commit = Some(git::head_commit(&self.repo_path).await?);
                }
                let prev_edge = self.edge.clone();
                if is_first || prev_edge.is_some() {
                    self.deepen(depth).await?;
                }

                let edge = git::read_shallow_edge(&self.repo_path)
                    .await
                    .map_err(|source| CloneError::Io {
                        path: self.repo_path.join("shallow"),
                        source,
                    })?;
                let target_reachable = match &self.target_commit {
                    Some(target) => git::commit_exists(&self.repo_path, target).await?,
                    None => false,
                };
                let stalled = !is_first && edge.is_some() && edge == prev_edge;
                let exhausted = self.batch_number >= self.options.max_deepen_iterations;
                if stalled {
                    tracing::warn!(remote = %self.remote, edge = ?edge, "Shallow boundary did not move; final batch mines down to the edge commit");
                }
                if exhausted && !stalled {
                    tracing::warn!(remote = %self.remote, batches = self.batch_number, "Reached deepen limit; final batch mines down to the edge commit");
                }

                let is_final = edge.is_none() || target_reachable || stalled || exhausted;
                self.edge = edge.clone();
                self.finished = is_final;
                self.batch_info(is_first, is_final, edge, prev_edge, target_reachable)
            }
        };

        self.maybe_compact().await;

        tracing::debug!(
            remote = %self.remote,
            batch = batch.batch_number,
            is_final = batch.is_final_batch,
            edge = batch.edge_commit.as_deref().unwrap_or("<root>"),
            "Clone batch ready"
        );
        Ok(Some(batch))
    }

    fn batch_info(
        &self,
        is_first: bool,
        is_final: bool,
        edge: Option<String>,
        prev_edge: Option<String>,
        target_reachable: bool,
    ) -> CloneBatchInfo {
        CloneBatchInfo {
            repo_path: self.repo_path.clone(),
            remote: self.remote.clone(),
            branch: self.branch.clone(),
            batch_number: self.batch_number,
            is_first_batch: is_first,
            is_final_batch: is_final,
            clone_with_batches: self.strategy.is_incremental(),
            edge_commit: edge,
            prev_batch_edge_commit: prev_edge,
            latest_commit_in_repo: self.latest_commit.clone(),
            target_commit: self.target_commit.clone(),
            target_reachable,
        }
    }

    async fn clone_repo(&mut self, depth: Option<u32>) -> Result<(), CloneError> {
        let mut args = vec![
            "clone".to_string(),
            "--bare".to_string(),
            "--single-branch".to_string(),
            "--no-tags".to_string(),
        ];
        if let Some(depth) = depth {
            args.push(format!("--depth={depth}"));
        }
        if let Some(branch) = &self.branch {
            args.push(format!("--branch={branch}"));
        }
        args.push("--".to_string());
        args.push(self.remote.clone());
        args.push(self.repo_path.to_string_lossy().into_owned());

        let started = Instant::now();
        GitCommand::new(args)
            .current_dir(&self.session_dir)
            .timeout(self.options.fetch_timeout)
            .output()
            .await?;
        self.fetches += 1;

        tracing::info!(
            remote = %self.remote,
            depth = depth.map_or_else(|| "full".to_string(), |d| d.to_string()),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cloned repository"
        );
        Ok(())
    }

    async fn deepen(&mut self, depth: u32) -> Result<(), CloneError> {
        let refspec = self.branch.clone().unwrap_or_else(|| "HEAD".to_string());
        let started = Instant::now();
        GitCommand::new([
            "fetch".to_string(),
            format!("--deepen={depth}"),
            "--no-tags".to_string(),
            "origin".to_string(),
            refspec,
        ])
        .current_dir(&self.repo_path)
        .timeout(self.options.fetch_timeout)
        .output()
        .await?;
        self.fetches += 1;

        tracing::debug!(
            remote = %self.remote,
            depth,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Deepened clone"
        );
        Ok(())
    }

    /// Run `git gc` when the working copy grew past the threshold. Never fails.
    async fn maybe_compact(&mut self) {
        let before = self.measure().await;
        self.bytes_on_disk = before;
        if before <= self.options.compaction_threshold_bytes {
            return;
        }

        let started = Instant::now();
        match git::gc(&self.repo_path, self.options.fetch_timeout).await {
            Ok(()) => {
                let after = self.measure().await;
                self.bytes_on_disk = after;
                self.compactions += 1;
                tracing::info!(
                    remote = %self.remote,
                    before_bytes = before,
                    after_bytes = after,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Compacted working copy"
                );
            }
            Err(e) => {
                tracing::warn!(remote = %self.remote, size_bytes = before, error = %e, "Compaction failed, continuing");
            }
        }
    }

    async fn measure(&self) -> u64 {
        let path = self.repo_path.clone();
        tokio::task::spawn_blocking(move || git::dir_size(&path))
            .await
            .unwrap_or(0)
    }

    /// Remove the working directory, retrying a bounded number of times.
    pub async fn close(mut self) -> std::io::Result<()> {
        self.closed = true;
        let dir = self.session_dir.clone();

        with_retry(
            || remove_dir(&dir),
            fixed_backoff(self.options.cleanup_delay, self.options.cleanup_attempts),
            |_| true,
            "remove clone directory",
        )
        .await
    }
}

async fn remove_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl Drop for CloneSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.session_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(dir = %self.session_dir.display(), error = %e, "Failed to remove abandoned clone directory");
            }
        }
    }
}
