use std::path::PathBuf;
use std::time::Duration;

/// Default size above which a working copy is compacted (10 GiB).
pub const DEFAULT_COMPACTION_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Deepen step for remotes with up to 200 refs.
pub const SMALL_REMOTE_DEPTH: u32 = 100;
/// Deepen step for remotes with up to 1000 refs.
pub const MEDIUM_REMOTE_DEPTH: u32 = 50;
/// Deepen step for remotes with more than 1000 refs.
pub const LARGE_REMOTE_DEPTH: u32 = 5;

/// Options for the clone service.
#[derive(Debug, Clone)]
pub struct CloneOptions {
    /// Directory under which per-session working copies are created.
    pub work_root: PathBuf,
    /// Timeout for `clone` and `fetch` invocations.
    pub fetch_timeout: Option<Duration>,
    /// Timeout for `ls-remote` invocations.
    pub remote_timeout: Option<Duration>,
    /// Working copies larger than this are compacted with `git gc`.
    pub compaction_threshold_bytes: u64,
    /// Hard stop for incremental deepening; the batch reaching it is final.
    pub max_deepen_iterations: u32,
    /// Attempts made to remove the working copy.
    pub cleanup_attempts: usize,
    /// Delay between removal attempts.
    pub cleanup_delay: Duration,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            work_root: std::env::temp_dir().join("gitmill"),
            fetch_timeout: Some(Duration::from_secs(2 * 60 * 60)),
            remote_timeout: Some(Duration::from_secs(120)),
            compaction_threshold_bytes: DEFAULT_COMPACTION_THRESHOLD_BYTES,
            max_deepen_iterations: 10_000,
            cleanup_attempts: 3,
            cleanup_delay: Duration::from_secs(1),
        }
    }
}

/// How a repository's history is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneStrategy {
    /// One bare clone with the whole branch history; a single final batch.
    Full,
    /// Depth-1 clone, then repeated `fetch --deepen=depth` until the last
    /// processed commit is reached.
    Minimal { depth: u32 },
}

impl CloneStrategy {
    /// Whether a repository has to be cloned in full.
    ///
    /// That is the case when it was never processed or when the remote
    /// default branch moved away from the branch processed last time.
    pub fn requires_full_clone(
        last_processed_commit: Option<&str>,
        last_branch: Option<&str>,
        remote_branch: Option<&str>,
    ) -> bool {
        last_processed_commit.is_none() || last_branch != remote_branch
    }

    /// Incremental strategy sized for a remote advertising `ref_count` refs.
    pub fn minimal(ref_count: usize) -> Self {
        CloneStrategy::Minimal {
            depth: batch_depth(ref_count),
        }
    }

    pub fn is_incremental(self) -> bool {
        matches!(self, CloneStrategy::Minimal { .. })
    }
}

impl std::fmt::Display for CloneStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloneStrategy::Full => write!(f, "full"),
            CloneStrategy::Minimal { depth } => write!(f, "minimal(depth={depth})"),
        }
    }
}

/// Deepen step for a remote advertising `ref_count` branches and tags.
///
/// Every fetch negotiates against all refs, so busier remotes get smaller steps.
pub fn batch_depth(ref_count: usize) -> u32 {
    match ref_count {
        0..=200 => SMALL_REMOTE_DEPTH,
        201..=1000 => MEDIUM_REMOTE_DEPTH,
        _ => LARGE_REMOTE_DEPTH,
    }
}

/// Descriptor handed from the clone session to the commit service for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneBatchInfo {
    /// Local bare repository.
    pub repo_path: PathBuf,
    /// Remote URL.
    pub remote: String,
    /// Remote default branch, if it could be resolved.
    pub branch: Option<String>,
    /// 1-based batch counter.
    pub batch_number: u32,
    pub is_first_batch: bool,
    pub is_final_batch: bool,
    /// `false` for a one-shot full clone.
    pub clone_with_batches: bool,
    /// Shallow boundary after this batch's fetch.
    pub edge_commit: Option<String>,
    /// Shallow boundary of the previous batch.
    pub prev_batch_edge_commit: Option<String>,
    /// Tip of the fetched branch.
    pub latest_commit_in_repo: Option<String>,
    /// Commit processed by the previous run, if any.
    pub target_commit: Option<String>,
    /// Whether `target_commit` is present in the local object store.
    pub target_reachable: bool,
}

/// What a clone session did, for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloneSummary {
    pub strategy: CloneStrategy,
    pub batches: u32,
    pub fetches: u32,
    pub compactions: u32,
    pub bytes_on_disk: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_depth_shrinks_with_ref_count() {
        assert_eq!(batch_depth(0), 100);
        assert_eq!(batch_depth(200), 100);
        assert_eq!(batch_depth(201), 50);
        assert_eq!(batch_depth(1000), 50);
        assert_eq!(batch_depth(1001), 5);
    }

    #[test]
    fn never_processed_repositories_clone_in_full() {
        assert!(CloneStrategy::requires_full_clone(None, Some("main"), Some("main")));
    }

    #[test]
    fn branch_change_forces_full_clone() {
        assert!(CloneStrategy::requires_full_clone(Some("abc"), Some("master"), Some("main")));
        assert!(CloneStrategy::requires_full_clone(Some("abc"), None, Some("main")));
    }

    #[test]
    fn processed_repositories_deepen_incrementally() {
        assert!(!CloneStrategy::requires_full_clone(Some("abc"), Some("main"), Some("main")));
        let strategy = CloneStrategy::minimal(500);
        assert_eq!(strategy, CloneStrategy::Minimal { depth: 50 });
        assert!(strategy.is_incremental());
        assert_eq!(strategy.to_string(), "minimal(depth=50)");
    }
}
