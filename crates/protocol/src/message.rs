//! A2A messages and their parts.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Part — tagged by "kind", unknown kinds preserved losslessly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One piece of message content.
///
/// Decoding is exhaustive over the known kinds; any other `kind` is kept as
/// the raw JSON object and re-emitted verbatim on serialization.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text { text: String },
    Data { data: Value },
    Error { error: Value },
    Unknown { raw: Value },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn data(data: Value) -> Self {
        Part::Data { data }
    }

    /// The textual content, if this is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }
}

impl Serialize for Part {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Part::Text { text } => json!({ "kind": "text", "text": text }).serialize(serializer),
            Part::Data { data } => json!({ "kind": "data", "data": data }).serialize(serializer),
            Part::Error { error } => {
                json!({ "kind": "error", "error": error }).serialize(serializer)
            }
            Part::Unknown { raw } => raw.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Part {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let kind = value.get("kind").and_then(Value::as_str);
        match kind {
            Some("text") => {
                let text = value
                    .get("text")
                    .and_then(Value::as_str)
                    .ok_or_else(|| D::Error::custom("text part missing \"text\""))?;
                Ok(Part::Text { text: text.to_owned() })
            }
            Some("data") => Ok(Part::Data {
                data: value.get("data").cloned().unwrap_or(Value::Null),
            }),
            Some("error") => Ok(Part::Error {
                error: value.get("error").cloned().unwrap_or(Value::Null),
            }),
            _ => Ok(Part::Unknown { raw: value }),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum A2aRole {
    User,
    Agent,
    System,
}

/// An A2A message (`kind: "message"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct A2aMessage {
    /// Always `"message"`.
    pub kind: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub role: A2aRole,
    pub parts: Vec<Part>,
    #[serde(rename = "contextId", skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(rename = "taskId", skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl A2aMessage {
    pub fn user_text(message_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: "message".into(),
            message_id: message_id.into(),
            role: A2aRole::User,
            parts: vec![Part::text(text)],
            context_id: None,
            task_id: None,
            metadata: None,
        }
    }

    pub fn agent_text(message_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: "message".into(),
            message_id: message_id.into(),
            role: A2aRole::Agent,
            parts: vec![Part::text(text)],
            context_id: None,
            task_id: None,
            metadata: None,
        }
    }

    /// All text-part contents joined with newlines.
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Metadata value under `key`, if present.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_part_kinds_round_trip() {
        let parts = vec![
            Part::text("hello"),
            Part::data(json!({ "x": 42 })),
            Part::Error { error: json!("boom") },
        ];
        let wire = serde_json::to_string(&parts).unwrap();
        let back: Vec<Part> = serde_json::from_str(&wire).unwrap();
        assert_eq!(parts, back);
    }

    #[test]
    fn unknown_part_kind_round_trips_losslessly() {
        let wire = r#"{"kind":"file","uri":"s3://bucket/key","mimeType":"text/csv"}"#;
        let part: Part = serde_json::from_str(wire).unwrap();
        match &part {
            Part::Unknown { raw } => assert_eq!(raw["mimeType"], "text/csv"),
            other => panic!("expected Unknown, got {other:?}"),
        }
        let emitted: Value = serde_json::from_str(&serde_json::to_string(&part).unwrap()).unwrap();
        let original: Value = serde_json::from_str(wire).unwrap();
        assert_eq!(emitted, original);
    }

    #[test]
    fn text_part_missing_text_is_an_error() {
        assert!(serde_json::from_str::<Part>(r#"{"kind":"text"}"#).is_err());
    }

    #[test]
    fn message_text_content_joins_parts() {
        let mut msg = A2aMessage::user_text("m1", "first");
        msg.parts.push(Part::data(json!(1)));
        msg.parts.push(Part::text("second"));
        assert_eq!(msg.text_content(), "first\nsecond");
    }

    #[test]
    fn message_wire_field_names() {
        let msg = A2aMessage::user_text("m1", "hi");
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["kind"], "message");
        assert_eq!(wire["messageId"], "m1");
        assert_eq!(wire["role"], "user");
        assert!(wire.get("contextId").is_none());
    }

    #[test]
    fn metadata_str_reads_agent_key() {
        let mut msg = A2aMessage::user_text("m1", "hi");
        let mut meta = Map::new();
        meta.insert("agent".into(), json!("EchoAgent"));
        msg.metadata = Some(meta);
        assert_eq!(msg.metadata_str("agent"), Some("EchoAgent"));
        assert_eq!(msg.metadata_str("missing"), None);
    }
}
