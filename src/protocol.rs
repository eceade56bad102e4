//! Wire protocol types: one JSON object per read/write, no length prefix.
//!
//! A message must fit in the server's receive buffer in a single read;
//! anything that does not parse as one object is treated as malformed.

use serde::{Deserialize, Serialize};

/// Message sent by the client. `token` may be absent on the very first
/// handshake; `code` only accompanies the `run` command. Unknown fields
/// are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl ClientMessage {
    /// Field accessor that treats an empty string the same as a missing
    /// field.
    pub fn field(value: &Option<String>) -> Option<&str> {
        value.as_deref().filter(|s| !s.is_empty())
    }
}

/// Message sent back to the client. Exactly one key per reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Error { error: String },
    Output { output: String },
    Message { message: String },
    NewToken { new_token: String },
    Uptime { uptime: String },
}

impl Reply {
    pub fn error(text: impl Into<String>) -> Self {
        Reply::Error { error: text.into() }
    }

    pub fn output(text: impl Into<String>) -> Self {
        Reply::Output { output: text.into() }
    }

    pub fn message(text: impl Into<String>) -> Self {
        Reply::Message { message: text.into() }
    }

    pub fn new_token(token: impl Into<String>) -> Self {
        Reply::NewToken { new_token: token.into() }
    }

    pub fn uptime(formatted: impl Into<String>) -> Self {
        Reply::Uptime { uptime: formatted.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_serializes_as_single_key_object() {
        let cases = [
            (Reply::error("bad"), r#"{"error":"bad"}"#),
            (Reply::output("hi\n"), r#"{"output":"hi\n"}"#),
            (Reply::message("Goodbye"), r#"{"message":"Goodbye"}"#),
            (Reply::new_token("abc123"), r#"{"new_token":"abc123"}"#),
            (Reply::uptime("0:01:02"), r#"{"uptime":"0:01:02"}"#),
        ];
        for (reply, expected) in cases {
            assert_eq!(serde_json::to_string(&reply).unwrap(), expected);
        }
    }

    #[test]
    fn client_message_ignores_unknown_fields() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"id":"Jarvis","token":"t","extra_field":"malicious_payload"}"#,
        )
        .unwrap();
        assert_eq!(msg.id.as_deref(), Some("Jarvis"));
        assert_eq!(msg.token.as_deref(), Some("t"));
        assert!(msg.command.is_none());
    }

    #[test]
    fn empty_string_counts_as_missing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"id":"","token":"t","command":"run","code":""}"#).unwrap();
        assert!(ClientMessage::field(&msg.id).is_none());
        assert!(ClientMessage::field(&msg.token).is_some());
        assert!(ClientMessage::field(&msg.code).is_none());
    }
}
