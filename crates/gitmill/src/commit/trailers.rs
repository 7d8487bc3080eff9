use std::sync::LazyLock;

use regex::Regex;

/// `Label: Name <email>` lines at the end of a commit message.
static TRAILER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^:]*):\s*(.*?)\s+<{1,2}([^>]+)>+$").expect("trailer pattern is valid")
});

/// Recognized trailer labels (lower-case) and the activities each one produces.
const TRAILER_ACTIVITIES: &[(&str, &[&str])] = &[
    ("signed-off-by", &["signed-off-commit"]),
    ("reviewed-by", &["reviewed-commit"]),
    ("tested-by", &["tested-commit"]),
    ("co-authored-by", &["co-authored-commit"]),
    ("reported-by", &["reported-commit"]),
    ("acked-by", &["approved-commit"]),
    ("approved-by", &["approved-commit"]),
    ("suggested-by", &["influenced-commit"]),
    ("helped-by", &["influenced-commit"]),
    ("influenced-by", &["influenced-commit"]),
    ("informed-by", &["informed-commit"]),
    ("resolved-by", &["resolved-commit"]),
    ("reviewed-and-tested-by", &["reviewed-commit", "tested-commit"]),
    ("reported-and-tested-by", &["reported-commit", "tested-commit"]),
];

/// Activity types produced by a trailer label, matched case-insensitively.
pub fn activity_types(label: &str) -> &'static [&'static str] {
    let label = label.trim().to_lowercase();
    TRAILER_ACTIVITIES
        .iter()
        .find(|(known, _)| *known == label)
        .map(|(_, types)| *types)
        .unwrap_or(&[])
}

/// A person credited by a commit trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trailer {
    pub activity_type: &'static str,
    pub name: String,
    pub email: String,
}

/// Extract every recognized trailer from the message lines, in order.
pub fn extract_trailers(message: &[String]) -> Vec<Trailer> {
    let mut trailers = Vec::new();
    for line in message {
        let Some(caps) = TRAILER_PATTERN.captures(line) else {
            continue;
        };
        let name = caps[2].trim();
        let email = caps[3].trim();
        for &activity_type in activity_types(&caps[1]) {
            trailers.push(Trailer {
                activity_type,
                name: name.to_string(),
                email: email.to_string(),
            });
        }
    }
    trailers
}
