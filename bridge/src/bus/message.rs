//! Message types delivered by the bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A published message as seen by subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub channel: String,
    pub payload: Value,
    pub meta: MessageMeta,
}

/// Delivery metadata attached to every message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    pub timestamp: DateTime<Utc>,

    /// Module that published the message, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,

    #[serde(rename = "correlation-id", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Channel a responder should publish its answer on
    #[serde(rename = "reply-to", skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

/// Caller-supplied metadata for `publish_with`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishMeta {
    pub sender: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
}

impl PublishMeta {
    pub fn from_sender(sender: impl Into<String>) -> Self {
        Self {
            sender: Some(sender.into()),
            ..Default::default()
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>, reply_to: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self.reply_to = Some(reply_to.into());
        self
    }

    pub(crate) fn stamp(self) -> MessageMeta {
        MessageMeta {
            timestamp: Utc::now(),
            sender: self.sender,
            correlation_id: self.correlation_id,
            reply_to: self.reply_to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_serialization() {
        let msg = Message {
            channel: "file:saved".to_string(),
            payload: json!({"path": "notes.md"}),
            meta: PublishMeta::from_sender("editor")
                .with_correlation("c-1", "file:saved:response:c-1")
                .stamp(),
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("correlation-id"));
        assert!(json.contains("reply-to"));

        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.meta.sender.as_deref(), Some("editor"));
        assert_eq!(back.payload["path"], "notes.md");
    }

    #[test]
    fn test_anonymous_meta_omits_optional_fields() {
        let meta = PublishMeta::default().stamp();
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("sender").is_none());
        assert!(json.get("timestamp").is_some());
    }
}
