use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use uuid::Uuid;

use super::record::Commit;
use super::trailers::extract_trailers;

pub const PLATFORM: &str = "git";
pub const AUTHORED_COMMIT: &str = "authored-commit";
pub const COMMITTED_COMMIT: &str = "committed-commit";

/// Salt mixed into committed-commit source ids.
///
/// The spelling is part of the id scheme: changing it would re-key every
/// committed-commit activity ever ingested.
const COMMITTED_SALT: &str = "commited-commit";

static REVIEWED_BY_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Reviewed[- ]by:").expect("pattern is valid"));
static FROM_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)from:").expect("pattern is valid"));
static CC_TAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)cc:.*").expect("pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityType {
    Username,
    Email,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub platform: String,
    pub value: String,
    #[serde(rename = "type")]
    pub identity_type: IdentityType,
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub display_name: String,
    pub identities: Vec<Identity>,
}

impl Member {
    /// A member known by one email address.
    pub fn from_email(name: &str, email: &str) -> Self {
        let mut display_name = clean_display_name(name);
        if display_name.is_empty() {
            display_name = email.split('@').next().unwrap_or_default().to_string();
        }

        Self {
            display_name,
            identities: vec![
                Identity {
                    platform: PLATFORM.to_string(),
                    value: email.to_string(),
                    identity_type: IdentityType::Username,
                    verified: true,
                },
                Identity {
                    platform: PLATFORM.to_string(),
                    value: email.to_string(),
                    identity_type: IdentityType::Email,
                    verified: false,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityAttributes {
    pub insertions: u64,
    pub deletions: u64,
    /// Net lines: insertions minus deletions.
    pub lines: i64,
    pub is_merge: bool,
    pub timezone: String,
    pub is_main_branch: bool,
}

/// An attributed contribution derived from a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type")]
    pub activity_type: String,
    pub timestamp: DateTime<FixedOffset>,
    pub source_id: String,
    /// Empty for authored commits, the commit hash for everything derived from it.
    pub source_parent_id: String,
    pub platform: String,
    pub channel: String,
    pub body: String,
    pub is_contribution: bool,
    pub url: String,
    pub member: Member,
    pub attributes: ActivityAttributes,
}

impl Activity {
    /// Deterministic integration-result id: the same activity always maps to the same row.
    pub fn result_id(&self) -> Uuid {
        let name = format!("{}:{}", self.source_id, self.activity_type);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
    }
}

/// Strip mail-header noise that ends up in names taken from trailers.
pub fn clean_display_name(name: &str) -> String {
    let name = REVIEWED_BY_PREFIX.replace_all(name, "");
    let name = FROM_PREFIX.replace_all(&name, "");
    let name = CC_TAIL.replace_all(&name, "");
    name.trim().to_string()
}

/// Timezone label in the `UTC`, `UTC+02:00`, `UTC-05:30` form.
pub fn timezone_name(offset: &FixedOffset) -> String {
    let seconds = offset.local_minus_utc();
    if seconds == 0 {
        return "UTC".to_string();
    }
    let sign = if seconds < 0 { '-' } else { '+' };
    let minutes = seconds.unsigned_abs() / 60;
    format!("UTC{sign}{:02}:{:02}", minutes / 60, minutes % 60)
}

fn sha1_hex(parts: &[&str]) -> String {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Source id of the committed-commit activity of `hash`.
pub fn committed_source_id(hash: &str, committer_email: &str) -> String {
    sha1_hex(&[hash, COMMITTED_SALT, committer_email])
}

/// Source id of a trailer-derived activity.
pub fn trailer_source_id(hash: &str, activity_type: &str, email: &str) -> String {
    sha1_hex(&[hash, activity_type, email])
}

fn committer_differs(commit: &Commit) -> bool {
    commit.author_name != commit.committer_name
        || !commit
            .author_email
            .eq_ignore_ascii_case(&commit.committer_email)
}

/// Derive every activity a commit produces.
///
/// Always one authored-commit; a committed-commit when someone other than
/// the author committed; one activity per recognized trailer and type.
/// Duplicate source ids within the commit are dropped.
pub fn derive_activities(commit: &Commit, remote: &str) -> Vec<Activity> {
    let body = commit.message.join("\n");
    let attributes = |timestamp: &DateTime<FixedOffset>| ActivityAttributes {
        insertions: commit.insertions,
        deletions: commit.deletions,
        lines: commit.insertions as i64 - commit.deletions as i64,
        is_merge: commit.is_merge(),
        timezone: timezone_name(timestamp.offset()),
        is_main_branch: true,
    };
    let activity = |activity_type: &str,
                    timestamp: DateTime<FixedOffset>,
                    source_id: String,
                    source_parent_id: String,
                    member: Member| Activity {
        activity_type: activity_type.to_string(),
        timestamp,
        source_id,
        source_parent_id,
        platform: PLATFORM.to_string(),
        channel: remote.to_string(),
        body: body.clone(),
        is_contribution: true,
        url: remote.to_string(),
        member,
        attributes: attributes(&timestamp),
    };

    let mut activities = vec![activity(
        AUTHORED_COMMIT,
        commit.author_date,
        commit.hash.clone(),
        String::new(),
        Member::from_email(&commit.author_name, &commit.author_email),
    )];

    if committer_differs(commit) && !commit.committer_email.is_empty() {
        activities.push(activity(
            COMMITTED_COMMIT,
            commit.committer_date,
            committed_source_id(&commit.hash, &commit.committer_email),
            commit.hash.clone(),
            Member::from_email(&commit.committer_name, &commit.committer_email),
        ));
    }

    for trailer in extract_trailers(&commit.message) {
        activities.push(activity(
            trailer.activity_type,
            commit.committer_date,
            trailer_source_id(&commit.hash, trailer.activity_type, &trailer.email),
            commit.hash.clone(),
            Member::from_email(&trailer.name, &trailer.email),
        ));
    }

    let mut seen = HashSet::new();
    activities.retain(|a| seen.insert(a.source_id.clone()));
    activities
}
