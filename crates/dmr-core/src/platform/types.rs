use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::UserId;

/// Text the platform uses for messages without a text body (media, likes).
pub const NO_TEXT_PLACEHOLDER: &str = "no text";

/// Realtime topics to subscribe to when connecting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriptions {
    pub message_topics: Vec<String>,
    pub presence_topics: Vec<String>,
}

impl Default for Subscriptions {
    fn default() -> Self {
        Self {
            message_topics: vec!["direct".to_string(), "direct_message_sync".to_string()],
            presence_topics: vec!["presence".to_string(), "typing".to_string()],
        }
    }
}

/// An inbound message as delivered by the transport, before sequencing.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RawMessage {
    pub from: UserId,
    #[serde(default)]
    pub text: Option<String>,
}

impl RawMessage {
    /// The message text, if it carries any displayable text.
    pub fn text_body(&self) -> Option<&str> {
        self.text
            .as_deref()
            .filter(|t| !t.trim().is_empty() && *t != NO_TEXT_PLACEHOLDER)
    }
}

pub type MessageHandler = Arc<dyn Fn(RawMessage) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_and_blank_texts_are_skipped() {
        let msg = |t: Option<&str>| RawMessage {
            from: UserId("u".to_string()),
            text: t.map(str::to_string),
        };
        assert_eq!(msg(Some("hi")).text_body(), Some("hi"));
        assert_eq!(msg(Some("no text")).text_body(), None);
        assert_eq!(msg(Some("   ")).text_body(), None);
        assert_eq!(msg(None).text_body(), None);
    }
}
