//! Chat transcript and model catalog records.

use serde::{Deserialize, Serialize};
use strum::Display;

/// Suffix appended to an assistant turn's stats when the user stops generation.
pub const STOPPED_MARKER: &str = "[Stopped]";

/// Role in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of the chat transcript.
///
/// Serialized with a `role` tag so the history can be forwarded to the relay
/// as `[{"role": "user", "content": ...}, ...]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        stats: String,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>, stats: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
            stats: stats.into(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Message::User { .. } => Role::User,
            Message::Assistant { .. } => Role::Assistant,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::User { content } | Message::Assistant { content, .. } => content,
        }
    }

    pub fn stats(&self) -> Option<&str> {
        match self {
            Message::User { .. } => None,
            Message::Assistant { stats, .. } => Some(stats),
        }
    }

    /// Append the stop marker to an assistant turn. User turns are left untouched.
    pub fn mark_stopped(&mut self) {
        if let Message::Assistant { stats, .. } = self {
            if stats.ends_with(STOPPED_MARKER) {
                return;
            }
            if !stats.is_empty() {
                stats.push(' ');
            }
            stats.push_str(STOPPED_MARKER);
        }
    }
}

/// A model the upstream server reports as installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

impl ModelInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            modified_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_serialize_with_role_tag() {
        let history = vec![Message::user("hi"), Message::assistant("hello", "")];
        let json = serde_json::to_value(&history).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"}
            ])
        );
    }

    #[test]
    fn mark_stopped_appends_once() {
        let mut message = Message::assistant("partial", "3 tokens | 1.5 tokens/s");
        message.mark_stopped();
        message.mark_stopped();
        assert_eq!(message.stats(), Some("3 tokens | 1.5 tokens/s [Stopped]"));

        let mut user = Message::user("question");
        user.mark_stopped();
        assert_eq!(user, Message::user("question"));
    }

    #[test]
    fn model_info_ignores_unknown_upstream_fields() {
        let info: ModelInfo = serde_json::from_value(serde_json::json!({
            "name": "llama3:8b",
            "model": "llama3:8b",
            "size": 4_661_224_676_u64,
            "digest": "365c0bd3c000",
            "details": {"family": "llama"}
        }))
        .unwrap();
        assert_eq!(info.name, "llama3:8b");
        assert_eq!(info.size, Some(4_661_224_676));
    }
}
