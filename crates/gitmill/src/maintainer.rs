//! Maintainer discovery.
//!
//! On the first batch of a run, the maintainer file of the repository (if
//! any) is read from `HEAD` and handed to a [`MaintainerClassifier`]. The
//! people it returns are synced into the maintainer history of the
//! repository (see [`registry::sync_maintainers`]). This step is advisory:
//! its failures are recorded as a `Maintainer` execution and never fail the
//! repository.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::repository::Model as RepositoryModel;
use crate::entity::repository_maintainer::{CONTRIBUTOR_ROLE, MAINTAINER_ROLE};
use crate::entity::service_execution::OperationType;
use crate::metrics::{ErrorCode, ExecutionRecord, ExecutionTimer, record_execution};
use crate::registry::{self, MaintainerChanges, MaintainerEntry, RegistryError};
use crate::vcs::{CommandError, GitCommand};

/// Files tried, in order, when no maintainer file is known yet.
pub const MAINTAINER_CANDIDATES: &[&str] = &[
    "MAINTAINERS",
    "MAINTAINERS.md",
    "CODEOWNERS",
    ".github/CODEOWNERS",
    "OWNERS",
    "GOVERNANCE.md",
];

/// Default time between two classifier runs for the same repository.
pub const DEFAULT_MAINTAINER_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A person the classifier found in a maintainer file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintainerInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub github_username: Option<String>,
    /// Free-form role such as `maintainer` or `reviewer`.
    pub role: String,
}

/// Placeholder classifiers use when a person has no known account.
const UNKNOWN_USERNAME: &str = "unknown";

/// Titles that make someone a maintainer rather than a contributor.
const MAINTAINER_TITLES: &[&str] = &[
    "maintainer",
    "owner",
    "lead",
    "admin",
    "core",
    "committer",
    "approver",
];

impl MaintainerInfo {
    /// Stable key of the person: GitHub username, else email, lowercased.
    ///
    /// `None` when neither is known.
    pub fn identity(&self) -> Option<String> {
        let username = self
            .github_username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty() && !u.eq_ignore_ascii_case(UNKNOWN_USERNAME));
        let email = self.email.as_deref().map(str::trim).filter(|e| e.contains('@'));
        username.or(email).map(str::to_lowercase)
    }

    /// `maintainer` or `contributor`.
    pub fn normalized_role(&self) -> &'static str {
        let role = self.role.to_lowercase();
        if MAINTAINER_TITLES.iter().any(|title| role.contains(title)) {
            MAINTAINER_ROLE
        } else {
            CONTRIBUTOR_ROLE
        }
    }

    fn to_entry(&self) -> Option<MaintainerEntry> {
        Some(MaintainerEntry {
            identity: self.identity()?,
            name: self.name.clone(),
            email: self.email.clone(),
            github_username: self.github_username.clone(),
            role: self.normalized_role().to_string(),
            original_role: role_slug(&self.role),
        })
    }
}

/// Slug of a free-form title, without filler words.
///
/// `"Active Project Maintainer"` becomes `maintainer`.
pub fn role_slug(title: &str) -> String {
    let title = title
        .to_lowercase()
        .replace("repository", "")
        .replace("active", "")
        .replace("project", "");
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Debug, Error)]
pub enum MaintainerError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("maintainer classifier failed: {0}")]
    Classifier(String),
}

impl MaintainerError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            MaintainerError::Command(e) => e.error_code(),
            MaintainerError::Registry(e) => e.error_code(),
            MaintainerError::Classifier(_) => ErrorCode::Network,
        }
    }
}

/// Extracts maintainers from the text of a maintainer file.
#[async_trait]
pub trait MaintainerClassifier: Send + Sync {
    async fn classify(
        &self,
        file_name: &str,
        content: &str,
    ) -> Result<Vec<MaintainerInfo>, MaintainerError>;
}

/// Classifier behind an HTTP JSON endpoint.
///
/// Sends `{"fileName", "content"}` and expects `{"maintainers": [...]}` back.
#[cfg(feature = "http-classifier")]
pub mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    use super::{MaintainerClassifier, MaintainerError, MaintainerInfo};

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct ClassifyRequest<'a> {
        file_name: &'a str,
        content: &'a str,
    }

    #[derive(Deserialize)]
    struct ClassifyResponse {
        #[serde(default)]
        maintainers: Vec<MaintainerInfo>,
    }

    #[derive(Debug, Clone)]
    pub struct HttpClassifier {
        client: reqwest::Client,
        endpoint: String,
    }

    impl HttpClassifier {
        pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, MaintainerError> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| MaintainerError::Classifier(e.to_string()))?;
            Ok(Self {
                client,
                endpoint: endpoint.into(),
            })
        }
    }

    #[async_trait]
    impl MaintainerClassifier for HttpClassifier {
        async fn classify(
            &self,
            file_name: &str,
            content: &str,
        ) -> Result<Vec<MaintainerInfo>, MaintainerError> {
            let response = self
                .client
                .post(&self.endpoint)
                .json(&ClassifyRequest { file_name, content })
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| MaintainerError::Classifier(e.to_string()))?;

            let body: ClassifyResponse = response
                .json()
                .await
                .map_err(|e| MaintainerError::Classifier(e.to_string()))?;
            Ok(body.maintainers)
        }
    }
}

#[derive(Debug, Clone)]
pub struct MaintainerOptions {
    pub interval: Duration,
}

impl Default for MaintainerOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_MAINTAINER_INTERVAL,
        }
    }
}

/// Result of a maintainer run that actually happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintainerOutcome {
    pub file: Option<String>,
    pub maintainers: Vec<MaintainerInfo>,
    /// Stored history changes; all zero when no file was found.
    pub changes: MaintainerChanges,
}

/// Whether a repository last scanned at `last_run` is due again at `now`.
pub fn is_due(
    last_run: Option<DateTime<FixedOffset>>,
    interval: Duration,
    now: DateTime<FixedOffset>,
) -> bool {
    let interval = TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX);
    match last_run {
        None => true,
        Some(last) => now.signed_duration_since(last) >= interval,
    }
}

async fn exists_at_head(repo_path: &Path, file: &str) -> Result<bool, CommandError> {
    GitCommand::new(["cat-file", "-e", &format!("HEAD:{file}")])
        .current_dir(repo_path)
        .succeeds()
        .await
}

/// Locate and read the maintainer file at `HEAD`.
///
/// The previously recorded file wins while it still exists; otherwise the
/// first existing entry of [`MAINTAINER_CANDIDATES`] is used.
pub async fn find_maintainer_file(
    repo_path: &Path,
    known: Option<&str>,
) -> Result<Option<(String, String)>, CommandError> {
    let candidates = known
        .into_iter()
        .chain(MAINTAINER_CANDIDATES.iter().copied().filter(|c| Some(*c) != known));

    for file in candidates {
        if exists_at_head(repo_path, file).await? {
            let content = GitCommand::new(["show", &format!("HEAD:{file}")])
                .current_dir(repo_path)
                .output()
                .await?;
            return Ok(Some((file.to_string(), content)));
        }
    }
    Ok(None)
}

/// Runs the classifier on the first batch of a repository when it is due.
#[derive(Clone)]
pub struct MaintainerService {
    db: Arc<DatabaseConnection>,
    classifier: Option<Arc<dyn MaintainerClassifier>>,
    options: MaintainerOptions,
}

impl std::fmt::Debug for MaintainerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintainerService")
            .field("classifier", &self.classifier.is_some())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl MaintainerService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        classifier: Option<Arc<dyn MaintainerClassifier>>,
        options: MaintainerOptions,
    ) -> Self {
        Self {
            db,
            classifier,
            options,
        }
    }

    /// Run maintainer discovery for `repo` if a classifier is configured and
    /// the last run is old enough. Returns `None` when skipped or failed.
    pub async fn process(
        &self,
        repo: &RepositoryModel,
        repo_path: &Path,
    ) -> Option<MaintainerOutcome> {
        let classifier = self.classifier.as_ref()?;
        if !is_due(
            repo.last_maintainer_run_at,
            self.options.interval,
            Utc::now().fixed_offset(),
        ) {
            tracing::debug!(repo = %repo.url, "Maintainer scan not due yet");
            return None;
        }

        let timer = ExecutionTimer::start();
        match self.run(classifier.as_ref(), repo, repo_path).await {
            Ok(outcome) => {
                tracing::info!(
                    repo = %repo.url,
                    file = outcome.file.as_deref().unwrap_or("<none>"),
                    maintainers = outcome.maintainers.len(),
                    "Maintainer scan finished"
                );
                let record = ExecutionRecord::success(repo.id, OperationType::Maintainer, &timer)
                    .with_metric("maintainer_file", outcome.file.clone())
                    .with_metric("maintainers", outcome.maintainers.len() as u64)
                    .with_metric("added", outcome.changes.added as u64)
                    .with_metric("role_changes", outcome.changes.role_changes as u64)
                    .with_metric("ended", outcome.changes.ended as u64);
                record_execution(&self.db, record).await;
                Some(outcome)
            }
            Err(e) => {
                tracing::warn!(repo = %repo.url, code = %e.error_code(), error = %e, "Maintainer scan failed");
                record_execution(
                    &self.db,
                    ExecutionRecord::failure(
                        repo.id,
                        OperationType::Maintainer,
                        &timer,
                        e.error_code(),
                        e.to_string(),
                    ),
                )
                .await;
                None
            }
        }
    }

    async fn run(
        &self,
        classifier: &dyn MaintainerClassifier,
        repo: &RepositoryModel,
        repo_path: &Path,
    ) -> Result<MaintainerOutcome, MaintainerError> {
        let found = find_maintainer_file(repo_path, repo.maintainer_file.as_deref()).await?;
        let outcome = match found {
            Some((file, content)) => {
                let maintainers = classifier.classify(&file, &content).await?;
                let entries: Vec<_> = maintainers
                    .iter()
                    .filter_map(MaintainerInfo::to_entry)
                    .collect();
                let skipped = maintainers.len() - entries.len();
                if skipped > 0 {
                    tracing::debug!(repo = %repo.url, skipped, "Skipping maintainers without identity");
                }
                MaintainerOutcome {
                    changes: registry::sync_maintainers(&self.db, repo.id, &entries).await?,
                    maintainers,
                    file: Some(file),
                }
            }
            None => MaintainerOutcome {
                file: None,
                maintainers: Vec::new(),
                changes: MaintainerChanges::default(),
            },
        };

        registry::update_maintainer_run(&self.db, repo.id, outcome.file.as_deref()).await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(raw: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(raw).expect("valid timestamp")
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
            .args(args)
            .current_dir(dir)
            .status()
            .expect("git runs");
        assert!(status.success(), "git {args:?} failed");
    }

    fn repo_with(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        git(dir.path(), &["init", "--quiet"]);
        for (name, content) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().expect("has parent")).expect("mkdir");
            std::fs::write(path, content).expect("write");
        }
        git(dir.path(), &["add", "--all"]);
        git(dir.path(), &["commit", "--quiet", "--allow-empty", "-m", "init"]);
        dir
    }

    #[test]
    fn never_scanned_repositories_are_due() {
        assert!(is_due(None, DEFAULT_MAINTAINER_INTERVAL, at("2025-01-01T00:00:00Z")));
    }

    #[test]
    fn interval_controls_rescans() {
        let interval = Duration::from_secs(3600);
        let last = Some(at("2025-01-01T00:00:00Z"));
        assert!(!is_due(last, interval, at("2025-01-01T00:30:00Z")));
        assert!(is_due(last, interval, at("2025-01-01T01:00:00Z")));
    }

    #[tokio::test]
    async fn first_existing_candidate_is_read() {
        let repo = repo_with(&[
            (".github/CODEOWNERS", "* @octocat\n"),
            ("OWNERS", "approvers:\n- jane\n"),
        ]);

        let found = find_maintainer_file(repo.path(), None).await.expect("git ran");
        assert_eq!(
            found,
            Some((".github/CODEOWNERS".to_string(), "* @octocat\n".to_string()))
        );
    }

    #[tokio::test]
    async fn known_file_is_preferred_while_it_exists() {
        let repo = repo_with(&[("MAINTAINERS", "Jane <j@x.org>\n"), ("OWNERS", "- jane\n")]);

        let found = find_maintainer_file(repo.path(), Some("OWNERS"))
            .await
            .expect("git ran");
        assert_eq!(found.map(|(file, _)| file), Some("OWNERS".to_string()));

        let found = find_maintainer_file(repo.path(), Some("docs/GONE.md"))
            .await
            .expect("git ran");
        assert_eq!(found.map(|(file, _)| file), Some("MAINTAINERS".to_string()));
    }

    #[tokio::test]
    async fn repositories_without_candidates_yield_none() {
        let repo = repo_with(&[("README.md", "hello\n")]);
        assert_eq!(find_maintainer_file(repo.path(), None).await.expect("git ran"), None);
    }

    #[test]
    fn maintainer_info_reads_partial_json() {
        let info: MaintainerInfo =
            serde_json::from_str(r#"{"githubUsername":"octocat","role":"maintainer"}"#)
                .expect("valid");
        assert_eq!(info.github_username.as_deref(), Some("octocat"));
        assert_eq!(info.name, None);
    }

    fn info(username: Option<&str>, email: Option<&str>, role: &str) -> MaintainerInfo {
        MaintainerInfo {
            name: None,
            email: email.map(str::to_string),
            github_username: username.map(str::to_string),
            role: role.to_string(),
        }
    }

    #[test]
    fn identity_prefers_username_then_email() {
        assert_eq!(
            info(Some("OctoCat"), Some("cat@x.org"), "maintainer").identity().as_deref(),
            Some("octocat")
        );
        assert_eq!(
            info(Some("unknown"), Some("Jane@X.org"), "maintainer").identity().as_deref(),
            Some("jane@x.org")
        );
        assert_eq!(info(Some("  "), None, "maintainer").identity(), None);
        assert_eq!(info(None, Some("not-an-email"), "maintainer").identity(), None);
    }

    #[test]
    fn roles_are_normalized_to_two_buckets() {
        assert_eq!(info(None, None, "Lead Maintainer").normalized_role(), MAINTAINER_ROLE);
        assert_eq!(info(None, None, "Code Owner").normalized_role(), MAINTAINER_ROLE);
        assert_eq!(info(None, None, "reviewer").normalized_role(), CONTRIBUTOR_ROLE);
        assert_eq!(info(None, None, "").normalized_role(), CONTRIBUTOR_ROLE);
    }

    #[test]
    fn role_slug_drops_filler_words() {
        assert_eq!(role_slug("Active Project Maintainer"), "maintainer");
        assert_eq!(role_slug("Repository Co-Owner (docs)"), "co-owner-docs");
        assert_eq!(role_slug("  "), "");
    }

    #[test]
    fn entries_skip_people_without_identity() {
        assert!(info(Some("unknown"), None, "maintainer").to_entry().is_none());

        let entry = info(Some("octocat"), None, "Active Maintainer")
            .to_entry()
            .expect("has identity");
        assert_eq!(entry.identity, "octocat");
        assert_eq!(entry.role, MAINTAINER_ROLE);
        assert_eq!(entry.original_role, "maintainer");
    }
}
