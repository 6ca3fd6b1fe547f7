//! Write-side models
//!
//! [`Memory`] is the single input type for `store_memory` / `store_memories`.
//! Role and target id select the operation:
//!
//! | role | memory_id | operation |
//! |------|-----------|-----------|
//! | -    | -         | create document |
//! | -    | set       | append to document |
//! | set  | -         | create conversation (+ first message) |
//! | set  | set       | append message to conversation |

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::ContentPart;

/// Free-form metadata attached to memories, messages and chunks
pub type Metadata = HashMap<String, Value>;

/// Content of a write request
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryContent {
    /// Plain text
    Text(String),
    /// Pre-chunked text segments
    Chunks(Vec<String>),
    /// Conversation messages
    Messages(Vec<Message>),
    /// Multimodal content parts
    Parts(Vec<ContentPart>),
    /// Caller-supplied JSON, classified when the request is planned
    Json(Value),
}

impl MemoryContent {
    /// True when there is nothing to send
    pub fn is_empty(&self) -> bool {
        match self {
            MemoryContent::Text(text) => text.is_empty(),
            MemoryContent::Chunks(chunks) => chunks.is_empty(),
            MemoryContent::Messages(messages) => messages.is_empty(),
            MemoryContent::Parts(parts) => parts.is_empty(),
            MemoryContent::Json(value) => match value {
                Value::Null => true,
                Value::String(s) => s.is_empty(),
                Value::Array(items) => items.is_empty(),
                _ => false,
            },
        }
    }

    /// Multimodal when the first element of a sequence carries a type discriminator
    pub fn is_multimodal(&self) -> bool {
        match self {
            MemoryContent::Parts(parts) => !parts.is_empty(),
            MemoryContent::Json(Value::Array(items)) => items
                .first()
                .and_then(Value::as_object)
                .is_some_and(|first| first.contains_key("type")),
            _ => false,
        }
    }

    /// Whether any part needs vision/audio/document processing
    pub fn has_non_text_parts(&self) -> bool {
        match self {
            MemoryContent::Parts(parts) => parts.iter().any(|p| !p.is_text()),
            MemoryContent::Json(Value::Array(items)) => items.iter().any(|item| {
                item.get("type")
                    .and_then(Value::as_str)
                    .is_some_and(|t| t != "text")
            }),
            _ => false,
        }
    }
}

impl Default for MemoryContent {
    fn default() -> Self {
        MemoryContent::Text(String::new())
    }
}

impl From<String> for MemoryContent {
    fn from(text: String) -> Self {
        MemoryContent::Text(text)
    }
}

impl From<&str> for MemoryContent {
    fn from(text: &str) -> Self {
        MemoryContent::Text(text.to_string())
    }
}

impl From<Vec<String>> for MemoryContent {
    fn from(chunks: Vec<String>) -> Self {
        MemoryContent::Chunks(chunks)
    }
}

impl From<Vec<ContentPart>> for MemoryContent {
    fn from(parts: Vec<ContentPart>) -> Self {
        MemoryContent::Parts(parts)
    }
}

impl From<Vec<Message>> for MemoryContent {
    fn from(messages: Vec<Message>) -> Self {
        MemoryContent::Messages(messages)
    }
}

impl From<Value> for MemoryContent {
    fn from(value: Value) -> Self {
        MemoryContent::Json(value)
    }
}

/// Body of a conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

/// A conversation message as sent to the append endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<f64>,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<MessageContent>) -> Self {
        Self {
            content: content.into(),
            role: Some(role.into()),
            metadata: Metadata::new(),
            authority: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Unified input for writing memories
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Memory {
    /// Collection UUID or name (required)
    pub collection_id: String,
    pub content: MemoryContent,
    /// Speaker role; presence makes this a conversation write
    pub role: Option<String>,
    /// Existing memory to append to
    pub memory_id: Option<String>,
    pub metadata: Metadata,
    /// Confidence/priority score in [0.0, 1.0]
    pub authority: Option<f64>,
    /// Vision model override for image processing
    pub vision_model: Option<String>,
    /// Audio transcription model override
    pub audio_model: Option<String>,
    /// Fast text extraction for PDFs; server default when unset
    pub fast_mode: Option<bool>,
}

impl Memory {
    pub fn new(collection_id: impl Into<String>, content: impl Into<MemoryContent>) -> Self {
        Self {
            collection_id: collection_id.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_memory_id(mut self, memory_id: impl Into<String>) -> Self {
        self.memory_id = Some(memory_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_authority(mut self, authority: f64) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn with_vision_model(mut self, model: impl Into<String>) -> Self {
        self.vision_model = Some(model.into());
        self
    }

    pub fn with_audio_model(mut self, model: impl Into<String>) -> Self {
        self.audio_model = Some(model.into());
        self
    }

    pub fn with_fast_mode(mut self, fast_mode: bool) -> Self {
        self.fast_mode = Some(fast_mode);
        self
    }

    /// Role present (and non-empty)
    pub fn is_conversation(&self) -> bool {
        self.role.as_deref().is_some_and(|r| !r.is_empty())
    }

    /// Target id present (and non-empty)
    pub fn target_id(&self) -> Option<&str> {
        self.memory_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Memory-level properties for `update_memory`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_ids: Option<Vec<String>>,
    /// Merge `metadata` into the existing metadata instead of replacing it
    #[serde(skip)]
    pub merge_metadata: bool,
}

impl MemoryUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.metadata.is_none() && self.collection_ids.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_multimodal_classification() {
        let parts = MemoryContent::Parts(vec![ContentPart::text("hi")]);
        assert!(parts.is_multimodal());
        assert!(!parts.has_non_text_parts());

        let json = MemoryContent::Json(json!([{"type": "image", "data": "x"}]));
        assert!(json.is_multimodal());
        assert!(json.has_non_text_parts());

        let messages = MemoryContent::Json(json!([{"role": "user", "content": "x"}]));
        assert!(!messages.is_multimodal());

        assert!(!MemoryContent::Text("hi".into()).is_multimodal());
        assert!(!MemoryContent::Parts(vec![]).is_multimodal());
    }

    #[test]
    fn test_empty_content() {
        assert!(MemoryContent::default().is_empty());
        assert!(MemoryContent::Json(Value::Null).is_empty());
        assert!(!MemoryContent::Json(json!(42)).is_empty());
        assert!(!MemoryContent::from("x").is_empty());
    }

    #[test]
    fn test_role_and_id_blank_are_absent() {
        let memory = Memory::new("c1", "x").with_role("").with_memory_id("");
        assert!(!memory.is_conversation());
        assert_eq!(memory.target_id(), None);
    }

    #[test]
    fn test_message_serialization() {
        let msg = Message::new("user", "hello");
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"content": "hello", "role": "user"})
        );
    }
}
