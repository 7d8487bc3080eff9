//! Configuration file support for gitmill.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. Environment variables (prefixed with `GITMILL_`, sections separated by
//!    `__`, e.g. `GITMILL_DATABASE__URL`)
//! 2. Local config file (./gitmill.toml)
//! 3. XDG config file (~/.config/gitmill/config.toml)
//! 4. Built-in defaults
//!
//! The database URL defaults to `sqlite://~/.local/state/gitmill/gitmill.db` on Linux
//! (using the XDG state directory) if not explicitly configured.
//!
//! Example config file:
//! ```toml
//! [database]
//! url = "postgres://gitmill@localhost/gitmill"
//! max_connections = 20
//!
//! [tenant]
//! id = "6a1f0a4e-3e0b-4ad5-9c43-2f4bd7d1c0aa"
//!
//! [worker]
//! poll_interval_secs = 5
//! max_concurrent_repositories = 2
//!
//! [clone]
//! work_root = "/var/lib/gitmill/work"
//!
//! [commit]
//! delivery = "result_ref"  # or "inline"
//!
//! [queue]
//! redis_url = "redis://localhost:6379"  # required unless `run --dry-run`
//! stream = "gitmill:activities"
//!
//! [maintainer]
//! classifier_url = "http://classifier.internal/classify"  # unset: disabled
//! interval_hours = 168
//!
//! [software_value]
//! average_wage = 56286
//! overhead = 2.4
//! ```

use std::path::PathBuf;
use std::time::Duration;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use gitmill::DatabaseOptions;
use gitmill::clone::CloneOptions;
use gitmill::commit::{CommitOptions, DeliveryMode};
use gitmill::maintainer::MaintainerOptions;
use gitmill::queue::QueueOptions;
use gitmill::registry::ClaimOptions;
use gitmill::retry::RetryConfig;
use gitmill::software_value::SoftwareValueOptions;
use gitmill::worker::WorkerOptions;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

const HOUR: u64 = 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub tenant: TenantConfig,
    pub worker: WorkerConfig,
    pub clone: CloneConfig,
    pub commit: CommitConfig,
    pub queue: QueueConfig,
    pub maintainer: MaintainerConfig,
    pub software_value: SoftwareValueConfig,
}

/// Database configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL.
    /// Supports sqlite:// and postgres:// schemes.
    /// Defaults to `sqlite://~/.local/state/gitmill/gitmill.db` if not specified.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: gitmill::db::DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Tenant the produced activities belong to.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TenantConfig {
    pub id: Option<Uuid>,
}

/// Worker loop and claim settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_interval_secs: u64,
    pub error_backoff_secs: u64,
    pub max_concurrent_repositories: usize,
    pub shutdown_timeout_secs: u64,
    /// Cap on repositories onboarding at once across every worker.
    pub max_concurrent_onboardings: u32,
    /// Onboarding pauses while this many results are waiting.
    pub max_pending_results: u64,
    pub refresh_interval_hours: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let claim = ClaimOptions::default();
        Self {
            poll_interval_secs: gitmill::worker::DEFAULT_POLL_INTERVAL.as_secs(),
            error_backoff_secs: gitmill::worker::DEFAULT_ERROR_BACKOFF.as_secs(),
            max_concurrent_repositories: 1,
            shutdown_timeout_secs: gitmill::worker::DEFAULT_WORKER_SHUTDOWN_TIMEOUT.as_secs(),
            max_concurrent_onboardings: claim.max_concurrent_onboardings,
            max_pending_results: claim.max_pending_results,
            refresh_interval_hours: claim.refresh_interval.as_secs() / HOUR,
        }
    }
}

/// Working copy settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CloneConfig {
    /// Defaults to `work` under the XDG cache directory.
    pub work_root: Option<PathBuf>,
    /// Zero disables the timeout.
    pub fetch_timeout_secs: u64,
    pub remote_timeout_secs: u64,
    pub compaction_threshold_mb: u64,
    pub max_deepen_iterations: u32,
}

impl Default for CloneConfig {
    fn default() -> Self {
        let defaults = CloneOptions::default();
        Self {
            work_root: None,
            fetch_timeout_secs: defaults.fetch_timeout.map_or(0, |t| t.as_secs()),
            remote_timeout_secs: defaults.remote_timeout.map_or(0, |t| t.as_secs()),
            compaction_threshold_mb: defaults.compaction_threshold_bytes / (1024 * 1024),
            max_deepen_iterations: defaults.max_deepen_iterations,
        }
    }
}

/// Commit mining settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    pub delivery: DeliveryMode,
    /// Defaults to the number of CPUs.
    pub parse_workers: Option<usize>,
    pub stats_attempts: usize,
    pub count_attempts: usize,
}

impl Default for CommitConfig {
    fn default() -> Self {
        let defaults = CommitOptions::default();
        Self {
            delivery: defaults.delivery,
            parse_workers: None,
            stats_attempts: defaults.stats_attempts,
            count_attempts: defaults.count_attempts,
        }
    }
}

/// Broker settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Redis URL. Required by `gitmill run` unless `--dry-run` is given.
    pub redis_url: Option<String>,
    pub stream: String,
    pub max_len: u64,
    pub shutdown_timeout_secs: u64,
    pub reconnect_max_retries: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            stream: "gitmill:activities".to_string(),
            max_len: 1_000_000,
            shutdown_timeout_secs: gitmill::queue::DEFAULT_SHUTDOWN_TIMEOUT.as_secs(),
            reconnect_max_retries: RetryConfig::default().max_retries,
        }
    }
}

/// Maintainer discovery settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MaintainerConfig {
    /// Classifier endpoint. Maintainer discovery is off when unset.
    pub classifier_url: Option<String>,
    pub interval_hours: u64,
    pub timeout_secs: u64,
}

impl Default for MaintainerConfig {
    fn default() -> Self {
        Self {
            classifier_url: None,
            interval_hours: MaintainerOptions::default().interval.as_secs() / HOUR,
            timeout_secs: 60,
        }
    }
}

/// Software value estimate settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SoftwareValueConfig {
    pub enabled: bool,
    /// Yearly salary of one developer.
    pub average_wage: f64,
    pub overhead: f64,
    /// Zero disables the timeout.
    pub timeout_secs: u64,
}

impl Default for SoftwareValueConfig {
    fn default() -> Self {
        let defaults = SoftwareValueOptions::default();
        Self {
            enabled: defaults.enabled,
            average_wage: defaults.average_wage,
            overhead: defaults.overhead,
            timeout_secs: defaults.timeout.map_or(0, |t| t.as_secs()),
        }
    }
}

fn optional_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/gitmill/config.toml)
    /// 3. Local config file (./gitmill.toml)
    /// 4. Environment variables with GITMILL_ prefix
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(xdg_config) = Self::default_config_path()
            && xdg_config.exists()
        {
            tracing::debug!("Loading config from {:?}", xdg_config);
            builder = builder.add_source(
                File::from(xdg_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        let local_config = PathBuf::from("gitmill.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./gitmill.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // GITMILL_WORKER__POLL_INTERVAL_SECS -> worker.poll_interval_secs
        builder = builder.add_source(
            Environment::with_prefix("GITMILL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize::<Config>()?)
    }

    /// Check everything `gitmill run` depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.tenant.id {
            None => return Err(ConfigError::invalid("tenant.id", "is required")),
            Some(id) if id.is_nil() => {
                return Err(ConfigError::invalid("tenant.id", "must not be the nil UUID"));
            }
            Some(_) => {}
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::invalid("database.max_connections", "must be at least 1"));
        }
        if self.worker.max_concurrent_repositories == 0 {
            return Err(ConfigError::invalid(
                "worker.max_concurrent_repositories",
                "must be at least 1",
            ));
        }
        if self.worker.poll_interval_secs == 0 {
            return Err(ConfigError::invalid("worker.poll_interval_secs", "must be positive"));
        }
        if self.commit.parse_workers == Some(0) {
            return Err(ConfigError::invalid("commit.parse_workers", "must be at least 1"));
        }
        if self.commit.stats_attempts == 0 || self.commit.count_attempts == 0 {
            return Err(ConfigError::invalid(
                "commit.stats_attempts/count_attempts",
                "must be at least 1",
            ));
        }
        if self.queue.redis_url.is_some() && self.queue.stream.trim().is_empty() {
            return Err(ConfigError::invalid("queue.stream", "must not be empty"));
        }
        if let Some(url) = &self.maintainer.classifier_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(ConfigError::invalid(
                "maintainer.classifier_url",
                format!("must be an http(s) URL, got {url:?}"),
            ));
        }
        let value = &self.software_value;
        if !(value.average_wage.is_finite() && value.average_wage > 0.0) {
            return Err(ConfigError::invalid("software_value.average_wage", "must be positive"));
        }
        if !(value.overhead.is_finite() && value.overhead > 0.0) {
            return Err(ConfigError::invalid("software_value.overhead", "must be positive"));
        }
        Ok(())
    }

    /// Get the database URL, falling back to the default state directory path.
    ///
    /// The `mode=rwc` parameter enables read-write access and creates the file if it doesn't exist.
    pub fn database_url(&self) -> Option<String> {
        self.database.url.clone().or_else(|| {
            Self::default_state_dir().map(|state_dir| {
                let db_path = state_dir.join("gitmill.db");
                format!("sqlite://{}?mode=rwc", db_path.display())
            })
        })
    }

    pub fn database_options(&self, url: String) -> DatabaseOptions {
        DatabaseOptions {
            max_connections: self.database.max_connections,
            ..DatabaseOptions::new(url)
        }
    }

    pub fn worker_options(&self) -> WorkerOptions {
        let worker = &self.worker;
        WorkerOptions {
            poll_interval: Duration::from_secs(worker.poll_interval_secs),
            error_backoff: Duration::from_secs(worker.error_backoff_secs),
            max_concurrent_repositories: worker.max_concurrent_repositories,
            shutdown_timeout: Duration::from_secs(worker.shutdown_timeout_secs),
            claim: ClaimOptions {
                max_concurrent_onboardings: worker.max_concurrent_onboardings,
                max_pending_results: worker.max_pending_results,
                refresh_interval: Duration::from_secs(worker.refresh_interval_hours * HOUR),
            },
        }
    }

    pub fn clone_options(&self) -> CloneOptions {
        let defaults = CloneOptions::default();
        let work_root = self
            .clone
            .work_root
            .clone()
            .or_else(|| Self::default_cache_dir().map(|dir| dir.join("work")))
            .unwrap_or(defaults.work_root);
        CloneOptions {
            work_root,
            fetch_timeout: optional_secs(self.clone.fetch_timeout_secs),
            remote_timeout: optional_secs(self.clone.remote_timeout_secs),
            compaction_threshold_bytes: self.clone.compaction_threshold_mb * 1024 * 1024,
            max_deepen_iterations: self.clone.max_deepen_iterations,
            ..defaults
        }
    }

    pub fn commit_options(&self) -> CommitOptions {
        let defaults = CommitOptions::default();
        CommitOptions {
            tenant_id: self.tenant.id.unwrap_or_default(),
            delivery: self.commit.delivery,
            parse_workers: self.commit.parse_workers.unwrap_or(defaults.parse_workers),
            stats_attempts: self.commit.stats_attempts,
            count_attempts: self.commit.count_attempts,
        }
    }

    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            reconnect: RetryConfig {
                max_retries: self.queue.reconnect_max_retries,
                ..RetryConfig::default()
            },
            shutdown_timeout: Duration::from_secs(self.queue.shutdown_timeout_secs),
        }
    }

    pub fn maintainer_options(&self) -> MaintainerOptions {
        MaintainerOptions {
            interval: Duration::from_secs(self.maintainer.interval_hours * HOUR),
        }
    }

    pub fn software_value_options(&self) -> SoftwareValueOptions {
        let value = &self.software_value;
        SoftwareValueOptions {
            enabled: value.enabled,
            average_wage: value.average_wage,
            overhead: value.overhead,
            timeout: optional_secs(value.timeout_secs),
        }
    }

    /// Get the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "gitmill").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the default cache directory path.
    pub fn default_cache_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "gitmill").map(|dirs| dirs.cache_dir().to_path_buf())
    }

    /// Get the default state directory path.
    ///
    /// On Linux, this is `$XDG_STATE_HOME/gitmill` or `~/.local/state/gitmill`.
    /// On macOS/Windows, falls back to the data directory.
    pub fn default_state_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "gitmill").map(|dirs| {
            // state_dir() returns None on macOS/Windows, fall back to data_dir
            dirs.state_dir()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| dirs.data_dir().to_path_buf())
        })
    }
}
