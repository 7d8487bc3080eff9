use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::retry::{fixed_backoff, with_retry};
use crate::vcs::{CommandError, GitCommand};

/// Pause between numstat attempts.
const STATS_RETRY_DELAY: Duration = Duration::from_millis(200);

static NUMSTAT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s+(\d+)").expect("numstat pattern is valid"));

/// Lines added and removed by a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub insertions: u64,
    pub deletions: u64,
}

/// Sum `git show --numstat` output. Binary files (`-\t-\tpath`) contribute nothing.
pub fn parse_numstat(output: &str) -> DiffStats {
    output
        .lines()
        .filter_map(|line| NUMSTAT_LINE.captures(line))
        .fold(DiffStats::default(), |acc, caps| DiffStats {
            insertions: acc.insertions + caps[1].parse::<u64>().unwrap_or(0),
            deletions: acc.deletions + caps[2].parse::<u64>().unwrap_or(0),
        })
}

/// Diff stats of one commit, retried up to `attempts` times.
pub async fn diff_stats(
    repo_path: &Path,
    hash: &str,
    attempts: usize,
) -> Result<DiffStats, CommandError> {
    let cmd = GitCommand::new(["show", "--cc", "--numstat", "--format=", hash]).current_dir(repo_path);
    let output = with_retry(
        || cmd.output(),
        fixed_backoff(STATS_RETRY_DELAY, attempts),
        |_| true,
        "git show --numstat",
    )
    .await?;
    Ok(parse_numstat(&output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_text_files_and_skips_binaries() {
        let output = "10\t2\tsrc/lib.rs\n-\t-\tassets/logo.png\n0\t7\tREADME.md\n\n";
        assert_eq!(
            parse_numstat(output),
            DiffStats {
                insertions: 10,
                deletions: 9
            }
        );
    }

    #[test]
    fn empty_output_is_zero() {
        assert_eq!(parse_numstat(""), DiffStats::default());
    }

    #[tokio::test]
    async fn unknown_commit_fails_after_retries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = diff_stats(dir.path(), &"0".repeat(40), 2).await;
        assert!(result.is_err());
    }
}
