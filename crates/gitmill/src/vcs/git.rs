use std::path::Path;
use std::time::Duration;

use walkdir::WalkDir;

use super::command::GitCommand;
use super::errors::CommandError;

/// Branches tried when the remote does not advertise its HEAD.
const FALLBACK_BRANCHES: &[&str] = &["master", "main"];

/// Parse the branch out of `git ls-remote --symref <remote> HEAD` output.
///
/// The interesting line looks like `ref: refs/heads/main\tHEAD`.
pub fn parse_symref(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.strip_prefix("ref:")?;
        let (target, name) = rest.trim().split_once('\t')?;
        if name.trim() != "HEAD" {
            return None;
        }
        target
            .trim()
            .strip_prefix("refs/heads/")
            .map(str::to_string)
    })
}

/// Resolve the default branch of a remote.
///
/// Falls back to probing the conventional branch names; `None` means the
/// remote has a detached or unknown HEAD.
pub async fn remote_default_branch(
    remote: &str,
    timeout: Option<Duration>,
) -> Result<Option<String>, CommandError> {
    let symref = GitCommand::new(["ls-remote", "--symref", remote, "HEAD"])
        .timeout(timeout)
        .output()
        .await?;
    if let Some(branch) = parse_symref(&symref) {
        return Ok(Some(branch));
    }

    for candidate in FALLBACK_BRANCHES {
        let heads = GitCommand::new(["ls-remote", "--heads", remote, candidate])
            .timeout(timeout)
            .output()
            .await?;
        if !heads.trim().is_empty() {
            return Ok(Some((*candidate).to_string()));
        }
    }

    tracing::debug!(remote, "Remote default branch could not be determined");
    Ok(None)
}

/// Number of branches and tags advertised by a remote. Peeled tag entries are not counted.
pub async fn count_remote_refs(
    remote: &str,
    timeout: Option<Duration>,
) -> Result<usize, CommandError> {
    let refs = GitCommand::new(["ls-remote", "--heads", "--tags", remote])
        .timeout(timeout)
        .output()
        .await?;
    Ok(refs
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.ends_with("^{}"))
        .count())
}

/// First commit recorded in the shallow file of a bare repository.
///
/// `None` when the file is missing or empty, which means the full history is present.
pub async fn read_shallow_edge(repo_path: &Path) -> std::io::Result<Option<String>> {
    match tokio::fs::read_to_string(repo_path.join("shallow")).await {
        Ok(contents) => Ok(contents
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Hash of the commit `HEAD` points to.
pub async fn head_commit(repo_path: &Path) -> Result<String, CommandError> {
    let out = GitCommand::new(["rev-parse", "HEAD"])
        .current_dir(repo_path)
        .output()
        .await?;
    Ok(out.trim().to_string())
}

/// Whether `hash` names a commit present in the local object store.
pub async fn commit_exists(repo_path: &Path, hash: &str) -> Result<bool, CommandError> {
    GitCommand::new(["cat-file", "-e", &format!("{hash}^{{commit}}")])
        .current_dir(repo_path)
        .succeeds()
        .await
}

/// Number of commits selected by a revision range.
pub async fn count_commits(repo_path: &Path, range: &[String]) -> Result<usize, CommandError> {
    let mut args = vec!["rev-list".to_string(), "--count".to_string()];
    args.extend(range.iter().cloned());

    let cmd = GitCommand::new(args).current_dir(repo_path);
    let out = cmd.output().await?;
    out.trim()
        .parse()
        .map_err(|_| CommandError::Execution {
            command: cmd.display(),
            status: "exit status: 0".to_string(),
            stderr: format!("unexpected output: {}", out.trim()),
        })
}

/// Non-blank line counts of the text files in the `HEAD` tree, keyed by path.
///
/// Binary files are skipped. An empty tree gives an empty list.
pub async fn count_lines_at_head(
    repo_path: &Path,
    timeout: Option<Duration>,
) -> Result<Vec<(String, u64)>, CommandError> {
    let out = GitCommand::new(["grep", "-I", "-c", "-e", "[^[:space:]]", "HEAD", "--"])
        .current_dir(repo_path)
        .timeout(timeout)
        .output_accepting(&[1])
        .await?;
    Ok(out.lines().filter_map(parse_grep_count).collect())
}

/// Parse a `HEAD:<path>:<count>` line of `git grep -c HEAD`.
pub fn parse_grep_count(line: &str) -> Option<(String, u64)> {
    let rest = line.strip_prefix("HEAD:")?;
    let (path, count) = rest.rsplit_once(':')?;
    Some((path.to_string(), count.parse().ok()?))
}

/// Recursively summed size of regular files under `path`. Blocking.
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

/// Repack and prune unreachable objects.
pub async fn gc(repo_path: &Path, timeout: Option<Duration>) -> Result<(), CommandError> {
    GitCommand::new(["gc", "--prune=now", "--quiet"])
        .current_dir(repo_path)
        .timeout(timeout)
        .output()
        .await
        .map(|_| ())
}

/// Filesystem-friendly name for a remote URL.
///
/// `https://github.com/owner/repo.git` becomes `github.com-owner-repo`.
pub fn repo_name(url: &str) -> String {
    let without_scheme = url
        .split_once("://")
        .map_or(url, |(_, rest)| rest);
    let trimmed = without_scheme
        .trim_end_matches('/')
        .trim_end_matches(".git");

    let name = trimmed
        .split(['/', ':'])
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            segment
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                        c
                    } else {
                        '_'
                    }
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("-");

    if name.is_empty() {
        "repository".to_string()
    } else {
        name
    }
}
