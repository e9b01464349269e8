//! Core data types shared by retrieval, prompt assembly and the server.

use serde::{Deserialize, Serialize};

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Missing or unrecognized wire role (`tool`, `function`, ...). Rendered
    /// like a user turn but never used as the retrieval query.
    Other,
}

impl Role {
    pub fn from_wire(role: Option<&str>) -> Self {
        match role {
            Some("system") => Role::System,
            Some("user") => Role::User,
            Some("assistant") => Role::Assistant,
            _ => Role::Other,
        }
    }
}

/// One message of the caller's conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// A message as it arrives on the wire. Both fields are optional.
#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<WireContent>,
}

/// `content` is either a plain string or a list of typed parts.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        let content = match wire.content {
            Some(WireContent::Text(s)) => s,
            Some(WireContent::Parts(parts)) => parts
                .into_iter()
                .filter(|p| p.kind.as_deref().unwrap_or("text") == "text")
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join(""),
            None => String::new(),
        };
        Message {
            role: Role::from_wire(wire.role.as_deref()),
            content,
        }
    }
}

/// Body of `POST /v1/chat/completions`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<WireMessage>,
    /// `null` and absent both mean buffered.
    #[serde(default)]
    pub stream: Option<bool>,
}

impl ChatRequest {
    pub fn wants_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }
}

/// A single retrieved text, already truncated to its collection's cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFragment {
    pub source_collection: String,
    pub text: String,
    /// 0 is the most relevant.
    pub relevance_rank: usize,
}

/// Fragments of one collection together with the label that heads them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBlock {
    pub label: String,
    pub fragments: Vec<ContextFragment>,
}

impl ContextBlock {
    pub fn render(&self) -> String {
        let mut lines = Vec::with_capacity(self.fragments.len() + 1);
        lines.push(self.label.as_str());
        lines.extend(self.fragments.iter().map(|f| f.text.as_str()));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_and_missing_roles_map_to_other() {
        assert_eq!(Role::from_wire(Some("system")), Role::System);
        assert_eq!(Role::from_wire(Some("user")), Role::User);
        assert_eq!(Role::from_wire(Some("assistant")), Role::Assistant);
        assert_eq!(Role::from_wire(Some("tool")), Role::Other);
        assert_eq!(Role::from_wire(Some("User")), Role::Other);
        assert_eq!(Role::from_wire(None), Role::Other);
    }

    #[test]
    fn wire_message_accepts_text_parts() {
        let wire: WireMessage = serde_json::from_value(serde_json::json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "hola "},
                {"type": "image_url", "image_url": {"url": "x"}},
                {"type": "text", "text": "tío"}
            ]
        }))
        .unwrap();
        let msg = Message::from(wire);
        assert_eq!(msg.content, "hola tío");
    }

    #[test]
    fn chat_request_defaults() {
        let req: ChatRequest = serde_json::from_str("{}").unwrap();
        assert!(req.model.is_none());
        assert!(req.messages.is_empty());
        assert!(!req.wants_stream());
    }

    #[test]
    fn null_stream_is_buffered() {
        let req: ChatRequest = serde_json::from_str(r#"{"stream": null}"#).unwrap();
        assert!(!req.wants_stream());
        let req: ChatRequest = serde_json::from_str(r#"{"stream": true}"#).unwrap();
        assert!(req.wants_stream());
        assert!(serde_json::from_str::<ChatRequest>(r#"{"stream": "yes"}"#).is_err());
    }

    #[test]
    fn context_block_renders_label_then_fragments() {
        let block = ContextBlock {
            label: "LABEL:".into(),
            fragments: vec![
                ContextFragment {
                    source_collection: "c".into(),
                    text: "one".into(),
                    relevance_rank: 0,
                },
                ContextFragment {
                    source_collection: "c".into(),
                    text: "two".into(),
                    relevance_rank: 1,
                },
            ],
        };
        assert_eq!(block.render(), "LABEL:\none\ntwo");
    }
}
