//! Shared fixtures for the integration tests: a migrated SQLite database on
//! disk and throwaway git repositories to clone from.

#![allow(dead_code)]

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use gitmill::clone::CloneOptions;
use gitmill::connect_and_migrate;
use gitmill::entity::repository::ActiveModel;
use gitmill::{RepositoryModel, RepositoryPriority, RepositoryState};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use tempfile::TempDir;
use uuid::Uuid;

/// A migrated database living in its own directory.
///
/// File-backed so every pooled connection sees the same data. Shared the
/// way services share it.
pub struct TestDb {
    pub db: Arc<DatabaseConnection>,
    _dir: TempDir,
}

pub async fn setup_test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("gitmill.db").display());
    let db = connect_and_migrate(&url)
        .await
        .expect("Failed to create test database");
    TestDb {
        db: Arc::new(db),
        _dir: dir,
    }
}

pub fn now() -> DateTime<FixedOffset> {
    Utc::now().fixed_offset()
}

pub fn hours_ago(hours: i64) -> DateTime<FixedOffset> {
    now() - chrono::Duration::hours(hours)
}

/// A pending, never processed repository.
pub fn pending_repository(url: &str) -> ActiveModel {
    let now = now();
    ActiveModel {
        id: Set(Uuid::new_v4()),
        url: Set(url.to_string()),
        branch: Set(None),
        forked_from: Set(None),
        state: Set(RepositoryState::Pending),
        priority: Set(RepositoryPriority::Normal),
        last_processed_at: Set(None),
        last_processed_commit: Set(None),
        locked_at: Set(None),
        re_onboarding_count: Set(0),
        maintainer_file: Set(None),
        last_maintainer_run_at: Set(None),
        software_value: Set(None),
        segment_id: Set(Uuid::new_v4()),
        integration_id: Set(Uuid::new_v4()),
        created_at: Set(now),
        updated_at: Set(now),
        deleted_at: Set(None),
    }
}

/// A repository that finished a run `hours` ago.
pub fn processed_repository(url: &str, state: RepositoryState, hours: i64) -> ActiveModel {
    let mut model = pending_repository(url);
    model.state = Set(state);
    model.last_processed_at = Set(Some(hours_ago(hours)));
    model.last_processed_commit = Set(Some("0".repeat(40)));
    model.branch = Set(Some("main".to_string()));
    model
}

/// A pending fork of the repository at `parent_url`.
pub fn forked_repository(url: &str, parent_url: &str) -> ActiveModel {
    let mut model = pending_repository(url);
    model.forked_from = Set(Some(parent_url.to_string()));
    model
}

pub async fn insert(db: &DatabaseConnection, model: ActiveModel) -> RepositoryModel {
    model.insert(db).await.expect("insert repository")
}

pub fn clone_options(work_root: &Path) -> CloneOptions {
    CloneOptions {
        work_root: work_root.to_path_buf(),
        fetch_timeout: Some(Duration::from_secs(60)),
        remote_timeout: Some(Duration::from_secs(30)),
        cleanup_delay: Duration::from_millis(10),
        ..CloneOptions::default()
    }
}

/// Who a fixture commit is attributed to.
#[derive(Debug, Clone, Copy)]
pub struct Person<'a> {
    pub name: &'a str,
    pub email: &'a str,
}

pub const ADA: Person<'static> = Person {
    name: "Ada Lovelace",
    email: "ada@example.com",
};

pub const GRACE: Person<'static> = Person {
    name: "Grace Hopper",
    email: "grace@example.com",
};

/// A non-bare repository on `main` that tests clone from over `file://`.
pub struct GitFixture {
    dir: TempDir,
    commits: usize,
}

impl GitFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        run_git(dir.path(), &["init", "--quiet", "--initial-branch=main"], &[]);
        Self { dir, commits: 0 }
    }

    /// A copy of `upstream` with its whole history, as a fork starts out.
    pub fn clone_of(upstream: &GitFixture) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let source = upstream.dir.path().to_string_lossy().to_string();
        let target = dir.path().to_string_lossy().to_string();
        run_git(
            upstream.dir.path(),
            &["clone", "--quiet", "--no-hardlinks", &source, &target],
            &[],
        );
        Self {
            dir,
            commits: upstream.commits,
        }
    }

    pub fn url(&self) -> String {
        format!("file://{}", self.dir.path().display())
    }

    /// Stage an extra file for the next commit.
    pub fn write_file(&self, name: &str, content: &str) {
        std::fs::write(self.dir.path().join(name), content).expect("write fixture file");
    }

    /// Add a file with `lines` lines and commit it.
    pub fn commit(
        &mut self,
        message: &str,
        author: Person<'_>,
        committer: Person<'_>,
        lines: usize,
    ) -> String {
        self.commits += 1;
        let content: String = (0..lines).map(|i| format!("line {i}\n")).collect();
        std::fs::write(self.dir.path().join(format!("file{}.txt", self.commits)), content)
            .expect("write fixture file");

        // one minute apart so history order is stable
        let date = format!(
            "2025-03-01T{:02}:{:02}:00+02:00",
            8 + self.commits / 60,
            self.commits % 60
        );
        let env = [
            ("GIT_AUTHOR_NAME", author.name),
            ("GIT_AUTHOR_EMAIL", author.email),
            ("GIT_AUTHOR_DATE", date.as_str()),
            ("GIT_COMMITTER_NAME", committer.name),
            ("GIT_COMMITTER_EMAIL", committer.email),
            ("GIT_COMMITTER_DATE", date.as_str()),
        ];
        run_git(self.dir.path(), &["add", "--all"], &env);
        run_git(
            self.dir.path(),
            &["-c", "commit.gpgsign=false", "commit", "--quiet", "-m", message],
            &env,
        );
        self.head()
    }

    pub fn head(&self) -> String {
        let output = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(self.dir.path())
            .output()
            .expect("git runs");
        assert!(output.status.success(), "git rev-parse failed");
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }
}

fn run_git(dir: &Path, args: &[&str], env: &[(&str, &str)]) {
    let status = Command::new("git")
        .args(args)
        .envs(env.iter().copied())
        .current_dir(dir)
        .status()
        .expect("git runs");
    assert!(status.success(), "git {args:?} failed");
}
