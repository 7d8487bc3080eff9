//! Software value estimate.
//!
//! On the first batch of a run the `HEAD` tree is measured (non-blank lines
//! of every text file, grouped by language) and turned into a basic COCOMO
//! cost estimate, which is stored on the repository. Like maintainer
//! discovery this step is advisory: failures are recorded as a
//! `SoftwareValue` execution and never fail the repository.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::entity::repository::Model as RepositoryModel;
use crate::entity::service_execution::OperationType;
use crate::metrics::{ErrorCode, ExecutionRecord, ExecutionTimer, record_execution};
use crate::registry::{self, RegistryError};
use crate::vcs::{CommandError, git};

/// Organic-mode COCOMO coefficients: `effort = A * KLOC^B` person-months.
pub const COCOMO_ORGANIC_A: f64 = 2.4;
pub const COCOMO_ORGANIC_B: f64 = 1.05;
/// Yearly salary used to price one person-year.
pub const DEFAULT_AVERAGE_WAGE: f64 = 56_286.0;
/// Multiplier covering everything beyond salaries.
pub const DEFAULT_OVERHEAD: f64 = 2.4;

const DEFAULT_MEASURE_TIMEOUT: Duration = Duration::from_secs(600);

/// Label for files whose extension is not recognized.
pub const OTHER_LANGUAGE: &str = "Other";

const LANGUAGES: &[(&str, &[&str])] = &[
    ("C", &["c", "h"]),
    ("C#", &["cs"]),
    ("C++", &["cc", "cpp", "cxx", "hh", "hpp", "hxx"]),
    ("CSS", &["css", "scss", "sass", "less"]),
    ("Go", &["go"]),
    ("HTML", &["htm", "html"]),
    ("Java", &["java"]),
    ("JavaScript", &["cjs", "js", "jsx", "mjs"]),
    ("JSON", &["json"]),
    ("Kotlin", &["kt", "kts"]),
    ("Markdown", &["md", "markdown"]),
    ("PHP", &["php"]),
    ("Python", &["py", "pyi"]),
    ("Ruby", &["rb"]),
    ("Rust", &["rs"]),
    ("Scala", &["scala"]),
    ("Shell", &["bash", "sh", "zsh"]),
    ("SQL", &["sql"]),
    ("Swift", &["swift"]),
    ("TOML", &["toml"]),
    ("TypeScript", &["ts", "tsx"]),
    ("YAML", &["yaml", "yml"]),
];

/// Language a file is counted under, by extension.
pub fn language_for(path: &str) -> &'static str {
    let file = path.rsplit('/').next().unwrap_or(path);
    if file == "Makefile" {
        return "Makefile";
    }
    if file == "Dockerfile" {
        return "Dockerfile";
    }
    let Some((_, ext)) = file.rsplit_once('.') else {
        return OTHER_LANGUAGE;
    };
    let ext = ext.to_ascii_lowercase();
    LANGUAGES
        .iter()
        .find(|(_, exts)| exts.contains(&ext.as_str()))
        .map_or(OTHER_LANGUAGE, |(name, _)| name)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageStats {
    pub language: &'static str,
    pub files: u64,
    pub code_lines: u64,
}

/// Group per-file line counts by language, largest first.
pub fn summarize(counts: &[(String, u64)]) -> Vec<LanguageStats> {
    let mut by_language: BTreeMap<&'static str, (u64, u64)> = BTreeMap::new();
    for (path, lines) in counts {
        let entry = by_language.entry(language_for(path)).or_default();
        entry.0 += 1;
        entry.1 += lines;
    }

    let mut stats: Vec<_> = by_language
        .into_iter()
        .map(|(language, (files, code_lines))| LanguageStats {
            language,
            files,
            code_lines,
        })
        .collect();
    stats.sort_by(|a, b| b.code_lines.cmp(&a.code_lines).then(a.language.cmp(b.language)));
    stats
}

#[derive(Debug, Clone)]
pub struct SoftwareValueOptions {
    pub enabled: bool,
    pub average_wage: f64,
    pub overhead: f64,
    /// Bound on measuring the tree. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for SoftwareValueOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            average_wage: DEFAULT_AVERAGE_WAGE,
            overhead: DEFAULT_OVERHEAD,
            timeout: Some(DEFAULT_MEASURE_TIMEOUT),
        }
    }
}

/// Estimated person-months for `code_lines` lines.
pub fn estimate_effort(code_lines: u64) -> f64 {
    let kloc = code_lines as f64 / 1000.0;
    COCOMO_ORGANIC_A * kloc.powf(COCOMO_ORGANIC_B)
}

/// Estimated cost, in currency units, of writing `code_lines` lines.
pub fn estimate_cost(code_lines: u64, options: &SoftwareValueOptions) -> f64 {
    estimate_effort(code_lines) * (options.average_wage / 12.0) * options.overhead
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoftwareValueReport {
    pub languages: Vec<LanguageStats>,
    pub files: u64,
    pub code_lines: u64,
    pub effort_person_months: f64,
    pub cost: f64,
}

impl SoftwareValueReport {
    pub fn from_counts(counts: &[(String, u64)], options: &SoftwareValueOptions) -> Self {
        let languages = summarize(counts);
        let code_lines = languages.iter().map(|l| l.code_lines).sum();
        Self {
            files: languages.iter().map(|l| l.files).sum(),
            effort_person_months: estimate_effort(code_lines),
            cost: estimate_cost(code_lines, options),
            code_lines,
            languages,
        }
    }

    /// Rounded value stored on the repository.
    pub fn value(&self) -> i64 {
        self.cost.round() as i64
    }
}

#[derive(Debug, Error)]
pub enum SoftwareValueError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl SoftwareValueError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            SoftwareValueError::Command(e) => e.error_code(),
            SoftwareValueError::Registry(e) => e.error_code(),
        }
    }
}

/// Measures the checked-out tree and stores its estimated value.
#[derive(Debug, Clone)]
pub struct SoftwareValueService {
    db: Arc<DatabaseConnection>,
    options: SoftwareValueOptions,
}

impl SoftwareValueService {
    pub fn new(db: Arc<DatabaseConnection>, options: SoftwareValueOptions) -> Self {
        Self { db, options }
    }

    /// Measure `repo_path` and store the estimate on `repo`.
    ///
    /// Returns `None` when disabled or failed.
    pub async fn process(
        &self,
        repo: &RepositoryModel,
        repo_path: &Path,
    ) -> Option<SoftwareValueReport> {
        if !self.options.enabled {
            return None;
        }

        let timer = ExecutionTimer::start();
        match self.run(repo, repo_path).await {
            Ok(report) => {
                tracing::info!(
                    repo = %repo.url,
                    code_lines = report.code_lines,
                    value = report.value(),
                    "Software value estimated"
                );
                let languages = serde_json::to_value(&report.languages).unwrap_or(Value::Null);
                let record = ExecutionRecord::success(repo.id, OperationType::SoftwareValue, &timer)
                    .with_metric("files", report.files)
                    .with_metric("code_lines", report.code_lines)
                    .with_metric("value", report.value())
                    .with_metric("languages", languages);
                record_execution(&self.db, record).await;
                Some(report)
            }
            Err(e) => {
                tracing::warn!(repo = %repo.url, code = %e.error_code(), error = %e, "Software value estimate failed");
                record_execution(
                    &self.db,
                    ExecutionRecord::failure(
                        repo.id,
                        OperationType::SoftwareValue,
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
        repo: &RepositoryModel,
        repo_path: &Path,
    ) -> Result<SoftwareValueReport, SoftwareValueError> {
        let counts = git::count_lines_at_head(repo_path, self.options.timeout).await?;
        let report = SoftwareValueReport::from_counts(&counts, &self.options);
        registry::update_software_value(&self.db, repo.id, report.value()).await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn languages_come_from_extensions() {
        assert_eq!(language_for("src/lib.rs"), "Rust");
        assert_eq!(language_for("web/App.TSX"), "TypeScript");
        assert_eq!(language_for("include/util.h"), "C");
        assert_eq!(language_for("build/Makefile"), "Makefile");
        assert_eq!(language_for("LICENSE"), OTHER_LANGUAGE);
        assert_eq!(language_for(".github/workflows/ci.yml"), "YAML");
    }

    #[test]
    fn summary_orders_languages_by_size() {
        let counts = vec![
            ("src/main.rs".to_string(), 120),
            ("src/lib.rs".to_string(), 80),
            ("README.md".to_string(), 40),
            ("scripts/release.sh".to_string(), 40),
        ];
        let stats = summarize(&counts);
        assert_eq!(
            stats,
            vec![
                LanguageStats { language: "Rust", files: 2, code_lines: 200 },
                LanguageStats { language: "Markdown", files: 1, code_lines: 40 },
                LanguageStats { language: "Shell", files: 1, code_lines: 40 },
            ]
        );
    }

    #[test]
    fn cocomo_estimate_for_ten_thousand_lines() {
        let effort = estimate_effort(10_000);
        // 2.4 * 10^1.05
        assert!((effort - 26.93).abs() < 0.01, "effort was {effort}");

        let cost = estimate_cost(10_000, &SoftwareValueOptions::default());
        let expected = effort * (DEFAULT_AVERAGE_WAGE / 12.0) * DEFAULT_OVERHEAD;
        assert!((cost - expected).abs() < 1e-6);
        assert!(cost > 300_000.0 && cost < 310_000.0, "cost was {cost}");
    }

    #[test]
    fn empty_tree_is_worth_nothing() {
        let report = SoftwareValueReport::from_counts(&[], &SoftwareValueOptions::default());
        assert_eq!(report.code_lines, 0);
        assert_eq!(report.files, 0);
        assert_eq!(report.value(), 0);
        assert!(report.languages.is_empty());
    }
}
