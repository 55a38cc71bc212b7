//! Sorting decoded response items into data and control signals
//!
//! A response from the streaming or REST API mixes tweets with items that
//! must never reach the mapper: delete notices, keep-alive integers, stream
//! control notices, and (as the first item only) a `{message, code}` status
//! envelope.

use serde_json::Value;
use std::fmt;

/// Status code Twitter uses for "Rate limit exceeded".
pub const RATE_LIMIT_CODE: i64 = 88;

/// Object keys that mark a streaming control notice rather than a tweet.
const CONTROL_KEYS: &[&str] = &[
    "limit",
    "scrub_geo",
    "status_withheld",
    "user_withheld",
    "warning",
    "disconnect",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEnvelope {
    pub code: i64,
    pub message: String,
}

impl StatusEnvelope {
    pub fn is_rate_limit(&self) -> bool {
        self.code == RATE_LIMIT_CODE
    }
}

impl fmt::Display for StatusEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{code: {}, message: {:?}}}", self.code, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    DeleteNotice,
    Heartbeat,
    /// Streaming notice such as `limit` or `scrub_geo`.
    Control(&'static str),
    /// Neither an object nor a heartbeat.
    Unrecognized,
}

/// What the orchestrator should do with one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// A tweet; hand it to the mapper.
    Forward,
    /// Ignore this item and keep reading.
    Skip(SkipReason),
    /// Rate limited: wait the long interval, then repeat the whole request.
    RetryRequest(StatusEnvelope),
    /// Any other status: warn and drop the rest of this response.
    AbandonResponse(StatusEnvelope),
}

fn status_envelope(map: &serde_json::Map<String, Value>) -> Option<StatusEnvelope> {
    let message = map.get("message")?;
    let code = match map.get("code")? {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    let message = match message {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Some(StatusEnvelope { code, message })
}

/// Classify the item at position `index` of a response.
pub fn classify(index: usize, item: &Value) -> Disposition {
    let map = match item {
        Value::Object(map) => map,
        Value::Number(_) | Value::Null => return Disposition::Skip(SkipReason::Heartbeat),
        _ => return Disposition::Skip(SkipReason::Unrecognized),
    };

    if map.contains_key("delete") {
        return Disposition::Skip(SkipReason::DeleteNotice);
    }

    if index == 0 {
        if let Some(status) = status_envelope(map) {
            return if status.is_rate_limit() {
                Disposition::RetryRequest(status)
            } else {
                Disposition::AbandonResponse(status)
            };
        }
    }

    if let Some(key) = CONTROL_KEYS.iter().copied().find(|key| map.contains_key(*key)) {
        return Disposition::Skip(SkipReason::Control(key));
    }

    Disposition::Forward
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tweets_are_forwarded() {
        assert_eq!(classify(0, &json!({"id_str": "1", "text": "hi"})), Disposition::Forward);
        assert_eq!(classify(5, &json!({"id_str": "2"})), Disposition::Forward);
    }

    #[test]
    fn test_heartbeats_and_deletes_are_skipped() {
        assert_eq!(classify(3, &json!(1024)), Disposition::Skip(SkipReason::Heartbeat));
        assert_eq!(
            classify(0, &json!({"delete": {"status": {"id": 1, "user_id": 2}}})),
            Disposition::Skip(SkipReason::DeleteNotice)
        );
        assert_eq!(
            classify(7, &json!({"limit": {"track": 12}})),
            Disposition::Skip(SkipReason::Control("limit"))
        );
        assert_eq!(classify(1, &json!("oops")), Disposition::Skip(SkipReason::Unrecognized));
    }

    #[test]
    fn test_rate_limit_envelope_retries_request() {
        let item = json!({"code": 88, "message": "Rate limit exceeded"});
        assert_eq!(
            classify(0, &item),
            Disposition::RetryRequest(StatusEnvelope {
                code: 88,
                message: "Rate limit exceeded".to_string()
            })
        );
    }

    #[test]
    fn test_other_envelopes_abandon_response() {
        let item = json!({"code": 34, "message": "Sorry, that page does not exist"});
        assert!(matches!(
            classify(0, &item),
            Disposition::AbandonResponse(StatusEnvelope { code: 34, .. })
        ));
    }

    #[test]
    fn test_envelopes_only_recognised_first() {
        let item = json!({"code": 88, "message": "Rate limit exceeded"});
        assert_eq!(classify(1, &item), Disposition::Forward);
    }
}
