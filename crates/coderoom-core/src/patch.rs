//! Interpreting assistant replies.
//!
//! An assistant reply is free text that may hold a JSON envelope:
//!
//! ```json
//! {
//!   "text": "Added an express server",
//!   "fileTree": { "server.js": { "file": { "contents": "..." } } },
//!   "startCommand": { "mainItem": "node", "commands": ["server.js"] }
//! }
//! ```
//!
//! [`interpret`] never fails. Anything it cannot read as an envelope is
//! treated as a plain chat reply.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::tree::codec::{flat_from_value, normalize_keys};
use crate::tree::FlatTree;

/// Text used when an envelope carries a file tree but no usable text.
pub const DEFAULT_REPLY_TEXT: &str = "Here are the requested changes.";

/// A program invocation suggested by the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    pub main_item: String,
    #[serde(default)]
    pub commands: Vec<String>,
}

/// What an assistant reply turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchEnvelope {
    /// Text plus a file-tree patch.
    Structured {
        text: String,
        file_tree: FlatTree,
        build_command: Option<CommandSpec>,
        start_command: Option<CommandSpec>,
    },
    /// Chat-only reply.
    Plain { text: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_tree: Option<&'a FlatTree>,
    #[serde(skip_serializing_if = "Option::is_none")]
    build_command: Option<&'a CommandSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_command: Option<&'a CommandSpec>,
}

/// Wire form: `{"text", "fileTree"?, "buildCommand"?, "startCommand"?}`.
/// Plain replies carry only `text`.
impl Serialize for PatchEnvelope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            PatchEnvelope::Structured {
                text,
                file_tree,
                build_command,
                start_command,
            } => WireEnvelope {
                text,
                file_tree: Some(file_tree),
                build_command: build_command.as_ref(),
                start_command: start_command.as_ref(),
            },
            PatchEnvelope::Plain { text } => WireEnvelope {
                text,
                file_tree: None,
                build_command: None,
                start_command: None,
            },
        };
        wire.serialize(serializer)
    }
}

impl PatchEnvelope {
    pub fn plain(text: impl Into<String>) -> Self {
        PatchEnvelope::Plain { text: text.into() }
    }

    pub fn text(&self) -> &str {
        match self {
            PatchEnvelope::Structured { text, .. } | PatchEnvelope::Plain { text } => text,
        }
    }

    /// The file-tree patch, if any.
    pub fn file_tree(&self) -> Option<&FlatTree> {
        match self {
            PatchEnvelope::Structured { file_tree, .. } => Some(file_tree),
            PatchEnvelope::Plain { .. } => None,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, PatchEnvelope::Structured { .. })
    }

    /// The message body to persist and broadcast: the envelope as JSON,
    /// which [`interpret`] reads back to an equal envelope.
    pub fn to_message_body(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            serde_json::json!({ "text": self.text() }).to_string()
        })
    }
}

/// Turn a raw assistant reply into a [`PatchEnvelope`].
pub fn interpret(raw: &str) -> PatchEnvelope {
    let Some(Value::Object(obj)) = parse_json(raw) else {
        return PatchEnvelope::plain(raw);
    };
    if !obj.contains_key("text") && !obj.contains_key("fileTree") {
        return PatchEnvelope::plain(raw);
    }

    let text = coerce_text(obj.get("text"));
    match obj.get("fileTree") {
        Some(tree @ Value::Object(_)) => PatchEnvelope::Structured {
            text,
            file_tree: normalize_keys(&flat_from_value(tree)),
            build_command: command(&obj, "buildCommand"),
            start_command: command(&obj, "startCommand"),
        },
        Some(_) => {
            debug!("fileTree is not an object, treating reply as plain text");
            PatchEnvelope::Plain { text }
        }
        None => PatchEnvelope::Plain { text },
    }
}

/// Parse the reply as JSON, tolerating a surrounding markdown code fence.
fn parse_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    let body = trimmed.strip_prefix("```")?.strip_suffix("```")?;
    // Drop the info string ("json") on the opening fence line.
    let body = body.split_once('\n').map_or("", |(_, rest)| rest);
    serde_json::from_str(body.trim()).ok()
}

fn coerce_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => v.to_string(),
        Some(Value::Array(items)) if !items.is_empty() => Value::Array(items.clone()).to_string(),
        Some(Value::Object(map)) if !map.is_empty() => Value::Object(map.clone()).to_string(),
        _ => DEFAULT_REPLY_TEXT.to_string(),
    }
}

fn command(obj: &Map<String, Value>, key: &str) -> Option<CommandSpec> {
    let value = obj.get(key)?;
    match serde_json::from_value(value.clone()) {
        Ok(spec) => Some(spec),
        Err(e) => {
            debug!(key, error = %e, "ignoring malformed command");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::FlatNode;

    #[test]
    fn test_structured_reply() {
        let raw = r#"{"text":"hi","fileTree":{"a.js":{"file":{"contents":"1"}}}}"#;
        let envelope = interpret(raw);

        assert!(envelope.is_structured());
        assert_eq!(envelope.text(), "hi");
        let tree = envelope.file_tree().unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get("a.js"), Some(&FlatNode::file("1")));
    }

    #[test]
    fn test_plain_text_reply() {
        let envelope = interpret("plain words");
        assert_eq!(envelope, PatchEnvelope::plain("plain words"));
    }

    #[test]
    fn test_json_without_known_keys_is_plain_raw() {
        let raw = r#"{"answer": 42}"#;
        assert_eq!(interpret(raw), PatchEnvelope::plain(raw));
        assert_eq!(interpret("[1,2]"), PatchEnvelope::plain("[1,2]"));
    }

    #[test]
    fn test_text_only_json_is_plain() {
        let envelope = interpret(r#"{"text": "just talking"}"#);
        assert_eq!(envelope, PatchEnvelope::plain("just talking"));
    }

    #[test]
    fn test_text_coercion() {
        let envelope = interpret(r#"{"text": 7, "fileTree": {}}"#);
        assert_eq!(envelope.text(), "7");

        let envelope = interpret(r#"{"text": "   ", "fileTree": {}}"#);
        assert_eq!(envelope.text(), DEFAULT_REPLY_TEXT);

        let envelope = interpret(r#"{"fileTree": {"x": {"directory": true}}}"#);
        assert_eq!(envelope.text(), DEFAULT_REPLY_TEXT);
        assert!(envelope.file_tree().unwrap().get("x").unwrap().is_dir());
    }

    #[test]
    fn test_non_object_file_tree_is_plain() {
        let envelope = interpret(r#"{"text": "hmm", "fileTree": "nope"}"#);
        assert_eq!(envelope, PatchEnvelope::plain("hmm"));
    }

    #[test]
    fn test_keys_are_normalized() {
        let raw = r#"{"text":"t","fileTree":{
            "/src//index.js": {"file": {"contents": "ok"}},
            "../escape.sh": {"file": {"contents": "rm"}}
        }}"#;
        let tree = interpret(raw).file_tree().cloned().unwrap();
        assert_eq!(tree.len(), 1);
        assert!(tree.contains_key("src/index.js"));
    }

    #[test]
    fn test_fenced_reply() {
        let raw = "```json\n{\"text\":\"fenced\",\"fileTree\":{}}\n```";
        let envelope = interpret(raw);
        assert!(envelope.is_structured());
        assert_eq!(envelope.text(), "fenced");
    }

    #[test]
    fn test_commands_parsed() {
        let raw = r#"{"text":"run it","fileTree":{},
            "buildCommand":{"mainItem":"npm","commands":["install"]},
            "startCommand":{"mainItem":7}}"#;
        match interpret(raw) {
            PatchEnvelope::Structured {
                build_command,
                start_command,
                ..
            } => {
                assert_eq!(
                    build_command,
                    Some(CommandSpec {
                        main_item: "npm".to_string(),
                        commands: vec!["install".to_string()],
                    })
                );
                assert!(start_command.is_none());
            }
            other => panic!("expected structured envelope, got {other:?}"),
        }
    }

    #[test]
    fn test_message_body_reinterprets() {
        let original = interpret(r#"{"text":"hi","fileTree":{"a/b.txt":{"file":{"contents":"x"}}}}"#);
        let body = original.to_message_body();
        assert_eq!(interpret(&body), original);

        let plain = PatchEnvelope::plain("words");
        assert_eq!(plain.to_message_body(), r#"{"text":"words"}"#);
        assert_eq!(interpret(&plain.to_message_body()), plain);
    }

    #[test]
    fn test_json_text_stays_text_after_reencoding() {
        let inner = r#"{"text":"x","fileTree":{"evil.js":{"file":{"contents":"boom"}}}}"#;
        let raw = serde_json::json!({ "text": inner }).to_string();

        let envelope = interpret(&raw);
        assert_eq!(envelope, PatchEnvelope::plain(inner));

        let reread = interpret(&envelope.to_message_body());
        assert!(!reread.is_structured());
        assert_eq!(reread.text(), inner);
    }

    #[test]
    fn test_structured_text_coerces_collections() {
        let envelope = interpret(r#"{"text": ["a", 1], "fileTree": {}}"#);
        assert_eq!(envelope.text(), r#"["a",1]"#);

        let envelope = interpret(r#"{"text": {"k": "v"}, "fileTree": {}}"#);
        assert_eq!(envelope.text(), r#"{"k":"v"}"#);

        let envelope = interpret(r#"{"text": [], "fileTree": {}}"#);
        assert_eq!(envelope.text(), DEFAULT_REPLY_TEXT);

        let envelope = interpret(r#"{"text": null, "fileTree": {}}"#);
        assert_eq!(envelope.text(), DEFAULT_REPLY_TEXT);
    }
}
