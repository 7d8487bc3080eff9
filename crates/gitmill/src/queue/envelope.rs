use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::Result;
use crate::commit::Activity;

/// Envelope type for a reference to a persisted integration result.
pub const RESULT_MESSAGE_TYPE: &str = "process_integration_result";
/// Envelope type for an activity shipped inline.
pub const INLINE_MESSAGE_TYPE: &str = "create_and_process_activity_result";

/// Largest encoded envelope the broker accepts.
pub const MAX_MESSAGE_BYTES: usize = 262_144;
/// Room left for encoding overhead when a body has to be cut.
pub const TRUNCATION_HEADROOM_BYTES: usize = 6_000;

const OPERATION: &str = "upsert_activities_with_members";
const PLATFORM: &str = "git";

/// Who a message is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRoute {
    pub tenant_id: Uuid,
    pub segment_id: Uuid,
    pub integration_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnvelopePayload {
    ResultId(Uuid),
    ActivityData(Activity),
}

/// JSON document published for every activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: String,
    pub tenant_id: Uuid,
    pub segment_id: Uuid,
    pub integration_id: Uuid,
    #[serde(flatten)]
    pub payload: EnvelopePayload,
}

impl Envelope {
    fn new(route: &MessageRoute, payload: EnvelopePayload) -> Self {
        let message_type = match payload {
            EnvelopePayload::ResultId(_) => RESULT_MESSAGE_TYPE,
            EnvelopePayload::ActivityData(_) => INLINE_MESSAGE_TYPE,
        };
        Self {
            message_type: message_type.to_string(),
            tenant_id: route.tenant_id,
            segment_id: route.segment_id,
            integration_id: route.integration_id,
            payload,
        }
    }
}

/// An encoded message ready for the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Deduplication key; identical for every redelivery of the same activity.
    pub key: String,
    pub payload: String,
}

/// Broker key for the activity whose integration result id is `dedupe_id`.
pub fn message_key(tenant_id: Uuid, dedupe_id: Uuid) -> String {
    format!("{tenant_id}-{OPERATION}-{PLATFORM}-{dedupe_id}")
}

impl QueueMessage {
    /// Reference a persisted integration result.
    pub fn result_ref(route: &MessageRoute, result_id: Uuid) -> Result<Self> {
        let envelope = Envelope::new(route, EnvelopePayload::ResultId(result_id));
        Ok(Self {
            key: message_key(route.tenant_id, result_id),
            payload: serde_json::to_string(&envelope)?,
        })
    }

    /// Ship the activity itself, cutting its body if the envelope would be too large.
    pub fn inline(route: &MessageRoute, dedupe_id: Uuid, activity: Activity) -> Result<Self> {
        Ok(Self {
            key: message_key(route.tenant_id, dedupe_id),
            payload: encode_inline(route, activity)?,
        })
    }
}

fn encode(route: &MessageRoute, activity: &Activity) -> Result<String> {
    let envelope = Envelope::new(route, EnvelopePayload::ActivityData(activity.clone()));
    Ok(serde_json::to_string(&envelope)?)
}

fn encode_inline(route: &MessageRoute, mut activity: Activity) -> Result<String> {
    let encoded = encode(route, &activity)?;
    if encoded.len() <= MAX_MESSAGE_BYTES {
        return Ok(encoded);
    }

    let original_bytes = encoded.len();
    let body = std::mem::take(&mut activity.body);
    let baseline = encode(route, &activity)?.len();
    let mut budget = MAX_MESSAGE_BYTES.saturating_sub(baseline + TRUNCATION_HEADROOM_BYTES);

    loop {
        activity.body = truncate_to_boundary(&body, budget).to_string();
        let encoded = encode(route, &activity)?;
        // escaping can still push a cut body over the limit
        if encoded.len() <= MAX_MESSAGE_BYTES || budget == 0 {
            tracing::warn!(
                source_id = %activity.source_id,
                original_bytes,
                truncated_bytes = encoded.len(),
                "Activity body too large, truncated"
            );
            return Ok(encoded);
        }
        budget /= 2;
    }
}

/// Longest prefix of `s` that fits in `max_bytes` without splitting a character.
pub fn truncate_to_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;
    use crate::commit::{ActivityAttributes, Member};

    fn route() -> MessageRoute {
        MessageRoute {
            tenant_id: Uuid::from_u128(1),
            segment_id: Uuid::from_u128(2),
            integration_id: Uuid::from_u128(3),
        }
    }

    fn activity(body: String) -> Activity {
        Activity {
            activity_type: "authored-commit".to_string(),
            timestamp: DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z").expect("valid"),
            source_id: "a".repeat(40),
            source_parent_id: String::new(),
            platform: "git".to_string(),
            channel: "r".to_string(),
            body,
            is_contribution: true,
            url: "r".to_string(),
            member: Member::from_email("Ada", "ada@example.com"),
            attributes: ActivityAttributes {
                insertions: 1,
                deletions: 0,
                lines: 1,
                is_merge: false,
                timezone: "UTC".to_string(),
                is_main_branch: true,
            },
        }
    }

    #[test]
    fn key_embeds_tenant_and_dedupe_id() {
        let key = message_key(Uuid::from_u128(1), Uuid::from_u128(9));
        assert_eq!(
            key,
            "00000000-0000-0000-0000-000000000001-upsert_activities_with_members-git-00000000-0000-0000-0000-000000000009"
        );
    }

    #[test]
    fn result_ref_envelope_is_flat() {
        let message = QueueMessage::result_ref(&route(), Uuid::from_u128(9)).expect("encodes");
        let json: serde_json::Value = serde_json::from_str(&message.payload).expect("json");

        assert_eq!(json["type"], RESULT_MESSAGE_TYPE);
        assert_eq!(json["tenantId"], Uuid::from_u128(1).to_string());
        assert_eq!(json["resultId"], Uuid::from_u128(9).to_string());
        assert!(json.get("activityData").is_none());
    }

    #[test]
    fn small_inline_messages_are_untouched() {
        let message = QueueMessage::inline(&route(), Uuid::from_u128(9), activity("hello".to_string()))
            .expect("encodes");
        let envelope: Envelope = serde_json::from_str(&message.payload).expect("decodes");
        assert_eq!(envelope.message_type, INLINE_MESSAGE_TYPE);
        match envelope.payload {
            EnvelopePayload::ActivityData(a) => assert_eq!(a.body, "hello"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn oversized_bodies_are_cut_below_the_ceiling() {
        let body = "é".repeat(MAX_MESSAGE_BYTES);
        let message =
            QueueMessage::inline(&route(), Uuid::from_u128(9), activity(body)).expect("encodes");
        assert!(message.payload.len() <= MAX_MESSAGE_BYTES);

        let envelope: Envelope = serde_json::from_str(&message.payload).expect("still valid json");
        let EnvelopePayload::ActivityData(a) = envelope.payload else {
            panic!("inline payload expected");
        };
        assert!(!a.body.is_empty());
        assert!(a.body.chars().all(|c| c == 'é'));
    }

    #[test]
    fn escaped_bodies_still_fit() {
        let body = "\"".repeat(MAX_MESSAGE_BYTES);
        let message =
            QueueMessage::inline(&route(), Uuid::from_u128(9), activity(body)).expect("encodes");
        assert!(message.payload.len() <= MAX_MESSAGE_BYTES);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_to_boundary("héllo", 2), "h");
        assert_eq!(truncate_to_boundary("héllo", 3), "hé");
        assert_eq!(truncate_to_boundary("hi", 10), "hi");
    }
}
