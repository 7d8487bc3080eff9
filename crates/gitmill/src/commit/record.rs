use std::sync::LazyLock;

use chrono::{DateTime, Duration, FixedOffset};
use regex::Regex;
use thiserror::Error;

/// Line emitted after every commit record in the log stream.
pub const RECORD_SENTINEL: &str = "--GITMILL-END-OF-COMMIT--";

/// `git log` pretty format: one field per line, message last, then the sentinel.
pub const LOG_FORMAT: &str = "--pretty=format:%H%n%aI%n%an%n%ae%n%cI%n%cn%n%ce%n%P%n%D%n%B%n--GITMILL-END-OF-COMMIT--";

/// Minimum number of lines a usable record has.
const MIN_RECORD_LINES: usize = 8;

/// Committer dates more than this many days ahead are replaced by the author date.
const MAX_FUTURE_SKEW_DAYS: i64 = 1;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
});

/// Why a log record was rejected. Rejected records are counted, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("record has {0} lines, expected at least 8")]
    TooFewLines(usize),
    #[error("commit {0} has no author email")]
    MissingEmail(String),
    #[error("invalid commit hash {0:?}")]
    InvalidHash(String),
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
}

/// A validated commit parsed from one log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub hash: String,
    pub author_name: String,
    pub author_email: String,
    pub author_date: DateTime<FixedOffset>,
    pub committer_name: String,
    pub committer_email: String,
    pub committer_date: DateTime<FixedOffset>,
    pub parents: Vec<String>,
    pub refs: Vec<String>,
    pub message: Vec<String>,
    pub insertions: u64,
    pub deletions: u64,
}

impl Commit {
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

fn is_valid_hash(hash: &str) -> bool {
    hash.len() == 40
        && hash
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<FixedOffset>, RecordError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map_err(|_| RecordError::InvalidTimestamp(raw.trim().to_string()))
}

/// Hash of a raw record, if it has one. Used to recognize boundary commits cheaply.
pub fn record_hash(lines: &[String]) -> Option<&str> {
    lines
        .iter()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim())
}

/// Validate and parse one log record.
///
/// Checks run in a fixed order: line count, author email, hash, timestamps.
/// A committer date more than a day after `now` is replaced by the author date.
pub fn parse_record(lines: &[String], now: DateTime<FixedOffset>) -> Result<Commit, RecordError> {
    let start = lines
        .iter()
        .position(|line| !line.trim().is_empty())
        .unwrap_or(lines.len());
    let lines = &lines[start..];
    if lines.len() < MIN_RECORD_LINES {
        return Err(RecordError::TooFewLines(lines.len()));
    }

    let hash = lines[0].trim();
    let author_name = lines[2].trim();
    let mut author_email = lines[3].trim();
    if author_email.is_empty() {
        if EMAIL_PATTERN.is_match(author_name) {
            author_email = author_name;
        } else {
            return Err(RecordError::MissingEmail(hash.to_string()));
        }
    }

    if !is_valid_hash(hash) {
        return Err(RecordError::InvalidHash(hash.to_string()));
    }

    let author_date = parse_timestamp(&lines[1])?;
    let mut committer_date = parse_timestamp(&lines[4])?;
    if committer_date > now + Duration::days(MAX_FUTURE_SKEW_DAYS) {
        committer_date = author_date;
    }

    let refs = lines
        .get(8)
        .map(|line| {
            line.split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut message: Vec<String> = lines.iter().skip(9).cloned().collect();
    while message.last().is_some_and(|line| line.trim().is_empty()) {
        message.pop();
    }

    Ok(Commit {
        hash: hash.to_string(),
        author_name: author_name.to_string(),
        author_email: author_email.to_string(),
        author_date,
        committer_name: lines[5].trim().to_string(),
        committer_email: lines[6].trim().to_string(),
        committer_date,
        parents: lines[7].split_whitespace().map(str::to_string).collect(),
        refs,
        message,
        insertions: 0,
        deletions: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    fn record(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    fn now() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2025-03-01T12:00:00+00:00").expect("valid")
    }

    fn sample(author_email: &str, committer_date: &str) -> Vec<String> {
        record(&[
            HASH,
            "2025-02-01T10:00:00+02:00",
            "Ada Lovelace",
            author_email,
            committer_date,
            "Charles Babbage",
            "charles@example.com",
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
            "HEAD -> main, origin/main",
            "Merge the engines",
            "",
            "Signed-off-by: Ada Lovelace <ada@example.com>",
            "",
        ])
    }

    #[test]
    fn parses_a_complete_record() {
        let commit =
            parse_record(&sample("ada@example.com", "2025-02-02T09:30:00-05:00"), now())
                .expect("valid record");

        assert_eq!(commit.hash, HASH);
        assert_eq!(commit.author_email, "ada@example.com");
        assert_eq!(commit.committer_name, "Charles Babbage");
        assert!(commit.is_merge());
        assert_eq!(commit.refs, ["HEAD -> main", "origin/main"]);
        assert_eq!(
            commit.message,
            ["Merge the engines", "", "Signed-off-by: Ada Lovelace <ada@example.com>"]
        );
        assert_eq!(commit.committer_date.offset().local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn short_records_are_rejected() {
        let err = parse_record(&record(&[HASH, "2025-02-01T10:00:00Z", "x"]), now())
            .expect_err("too short");
        assert_eq!(err, RecordError::TooFewLines(3));
    }

    #[test]
    fn leading_blank_lines_are_ignored() {
        let mut lines = vec![String::new()];
        lines.extend(sample("ada@example.com", "2025-02-02T09:30:00Z"));
        assert!(parse_record(&lines, now()).is_ok());
    }

    #[test]
    fn missing_email_falls_back_to_email_like_name() {
        let mut lines = sample("", "2025-02-02T09:30:00Z");
        lines[2] = "ada@example.com".to_string();
        let commit = parse_record(&lines, now()).expect("name is an email");
        assert_eq!(commit.author_email, "ada@example.com");

        let err = parse_record(&sample("", "2025-02-02T09:30:00Z"), now())
            .expect_err("no usable email");
        assert!(matches!(err, RecordError::MissingEmail(_)));
    }

    #[test]
    fn email_is_checked_before_hash() {
        let mut lines = sample("", "2025-02-02T09:30:00Z");
        lines[0] = "not-a-hash".to_string();
        assert!(matches!(
            parse_record(&lines, now()),
            Err(RecordError::MissingEmail(_))
        ));
    }

    #[test]
    fn invalid_hash_is_rejected() {
        let mut lines = sample("ada@example.com", "2025-02-02T09:30:00Z");
        lines[0] = HASH.to_uppercase();
        assert!(matches!(
            parse_record(&lines, now()),
            Err(RecordError::InvalidHash(_))
        ));
    }

    #[test]
    fn invalid_timestamp_is_rejected() {
        let err = parse_record(&sample("ada@example.com", "yesterday"), now())
            .expect_err("bad date");
        assert_eq!(err, RecordError::InvalidTimestamp("yesterday".to_string()));
    }

    #[test]
    fn far_future_committer_date_uses_author_date() {
        let commit = parse_record(&sample("ada@example.com", "2031-01-01T00:00:00Z"), now())
            .expect("valid record");
        assert_eq!(commit.committer_date, commit.author_date);

        let commit = parse_record(&sample("ada@example.com", "2025-03-02T06:00:00Z"), now())
            .expect("valid record");
        assert_ne!(commit.committer_date, commit.author_date);
    }

    #[test]
    fn record_hash_skips_separator_lines() {
        let lines = record(&["", HASH, "rest"]);
        assert_eq!(record_hash(&lines), Some(HASH));
    }
}
