//! Memory write normalization
//!
//! Turns one [`Memory`] into a [`WritePlan`]: which server operation(s) to
//! issue and with which payloads. Planning is pure; the async and blocking
//! clients execute the plan over their own transport.
//!
//! Reserved metadata keys written by the normalizer: [`MEMORY_TYPE_KEY`],
//! [`CONTENT_HASH_KEY`] and [`AUTHORITY_KEY`]. Caller values under these keys
//! are overwritten on document creation.

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{NebulaError, Result};
use crate::memory::{Memory, MemoryContent, Message, MessageContent, Metadata};

pub const MEMORY_TYPE_KEY: &str = "memory_type";
pub const CONTENT_HASH_KEY: &str = "content_hash";
pub const AUTHORITY_KEY: &str = "authority";

/// Metadata keys the normalizer writes into
pub const RESERVED_METADATA_KEYS: &[&str] = &[MEMORY_TYPE_KEY, CONTENT_HASH_KEY, AUTHORITY_KEY];

/// `memory_type` value stamped on documents
pub const DOCUMENT_MEMORY_TYPE: &str = "memory";

pub const DEFAULT_INGESTION_MODE: &str = "fast";

/// Server operation selected by role × target id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateDocument,
    AppendDocument,
    CreateConversation,
    AppendConversation,
}

impl Operation {
    pub fn classify(memory: &Memory) -> Self {
        match (memory.is_conversation(), memory.target_id().is_some()) {
            (false, false) => Operation::CreateDocument,
            (false, true) => Operation::AppendDocument,
            (true, false) => Operation::CreateConversation,
            (true, true) => Operation::AppendConversation,
        }
    }

    pub fn is_append(&self) -> bool {
        matches!(self, Operation::AppendDocument | Operation::AppendConversation)
    }
}

/// Two-phase conversation creation
///
/// `create` is sent first and yields the conversation id. When
/// `first_message` is set it is appended to that id afterwards; if that
/// second call fails the conversation already exists and is left in place.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationPlan {
    pub create: Value,
    pub first_message: Option<Value>,
}

/// What to send for one write request
#[derive(Debug, Clone, PartialEq)]
pub enum WritePlan {
    CreateDocument { payload: Value },
    Append { memory_id: String, payload: Value },
    CreateConversation(ConversationPlan),
}

impl WritePlan {
    /// Number of HTTP calls the plan issues on success
    pub fn call_count(&self) -> usize {
        match self {
            WritePlan::CreateDocument { .. } | WritePlan::Append { .. } => 1,
            WritePlan::CreateConversation(plan) => 1 + usize::from(plan.first_message.is_some()),
        }
    }
}

/// Content after classification into a wire shape
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Shape {
    Text(String),
    Chunks(Vec<String>),
    /// Message objects, passed through
    Messages(Vec<Value>),
    /// Content part objects
    Parts(Vec<Value>),
}

/// Classify content into exactly one wire shape
pub(crate) fn classify_content(content: &MemoryContent) -> Result<Shape> {
    match content {
        MemoryContent::Text(text) => Ok(Shape::Text(text.clone())),
        MemoryContent::Chunks(chunks) => Ok(Shape::Chunks(chunks.clone())),
        MemoryContent::Messages(messages) => Ok(Shape::Messages(
            messages
                .iter()
                .map(serde_json::to_value)
                .collect::<std::result::Result<_, _>>()?,
        )),
        MemoryContent::Parts(parts) => Ok(Shape::Parts(
            parts.iter().map(|p| p.to_value()).collect(),
        )),
        MemoryContent::Json(value) => classify_json(value),
    }
}

fn classify_json(value: &Value) -> Result<Shape> {
    match value {
        Value::String(text) => Ok(Shape::Text(text.clone())),
        Value::Array(items) => match items.first() {
            None => Ok(Shape::Chunks(Vec::new())),
            Some(Value::Object(first)) => {
                if !items.iter().all(Value::is_object) {
                    return Err(invalid_shape());
                }
                if first.contains_key("type") {
                    Ok(Shape::Parts(items.clone()))
                } else {
                    Ok(Shape::Messages(items.clone()))
                }
            }
            Some(Value::String(_)) => items
                .iter()
                .map(|item| item.as_str().map(String::from).ok_or_else(invalid_shape))
                .collect::<Result<Vec<_>>>()
                .map(Shape::Chunks),
            Some(_) => Err(invalid_shape()),
        },
        _ => Err(invalid_shape()),
    }
}

fn invalid_shape() -> NebulaError {
    NebulaError::client("content must be a string, list of strings, or list of message objects")
}

/// Stable SHA-256 hex digest of UTF-8 text
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Keep an authority score only when it is a number within [0.0, 1.0]
pub fn validate_authority(authority: f64) -> Option<f64> {
    (0.0..=1.0).contains(&authority).then_some(authority)
}

/// Plan a single write request
pub fn plan_write(memory: &Memory) -> Result<WritePlan> {
    let operation = Operation::classify(memory);
    tracing::debug!(
        "Planning {:?} for collection {}",
        operation,
        memory.collection_id
    );

    match operation {
        Operation::CreateDocument => Ok(WritePlan::CreateDocument {
            payload: document_payload(memory)?,
        }),
        Operation::AppendDocument | Operation::AppendConversation => {
            let memory_id = memory.target_id().unwrap_or_default().to_string();
            Ok(WritePlan::Append {
                memory_id,
                payload: append_payload(memory)?,
            })
        }
        Operation::CreateConversation => {
            Ok(WritePlan::CreateConversation(plan_conversation(memory, None)?))
        }
    }
}

fn to_object(metadata: &Metadata) -> Map<String, Value> {
    metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn fold_authority(metadata: &mut Map<String, Value>, authority: Option<f64>) {
    let Some(raw) = authority else {
        return;
    };
    match validate_authority(raw) {
        Some(value) => {
            metadata.insert(AUTHORITY_KEY.to_string(), json!(value));
        }
        None => tracing::warn!("Dropping out-of-range authority {}", raw),
    }
}

/// Attach vision/audio/fast-mode overrides when the caller set them
fn attach_overrides(payload: &mut Map<String, Value>, memory: &Memory) {
    if let Some(model) = &memory.vision_model {
        payload.insert("vision_model".to_string(), json!(model));
    }
    if let Some(model) = &memory.audio_model {
        payload.insert("audio_model".to_string(), json!(model));
    }
    if let Some(fast_mode) = memory.fast_mode {
        payload.insert("fast_mode".to_string(), json!(fast_mode));
    }
}

fn document_payload(memory: &Memory) -> Result<Value> {
    let mut metadata = to_object(&memory.metadata);
    metadata.insert(MEMORY_TYPE_KEY.to_string(), json!(DOCUMENT_MEMORY_TYPE));
    fold_authority(&mut metadata, memory.authority);

    let mut payload = Map::new();
    payload.insert("collection_ref".to_string(), json!(memory.collection_id));
    payload.insert("engram_type".to_string(), json!("document"));
    payload.insert("ingestion_mode".to_string(), json!(DEFAULT_INGESTION_MODE));

    match classify_content(&memory.content)? {
        Shape::Text(text) => {
            if text.is_empty() {
                return Err(NebulaError::client(
                    "Content is required for document memories",
                ));
            }
            metadata.insert(CONTENT_HASH_KEY.to_string(), json!(content_hash(&text)));
            payload.insert("raw_text".to_string(), json!(text));
        }
        Shape::Chunks(chunks) => {
            if chunks.is_empty() {
                return Err(NebulaError::client(
                    "Content is required for document memories",
                ));
            }
            metadata.insert(
                CONTENT_HASH_KEY.to_string(),
                json!(content_hash(&chunks.join("\n"))),
            );
            payload.insert("chunks".to_string(), json!(chunks));
        }
        Shape::Parts(parts) => {
            if parts.is_empty() {
                return Err(NebulaError::client(
                    "Content is required for document memories",
                ));
            }
            payload.insert("content_parts".to_string(), Value::Array(parts));
            if memory.content.has_non_text_parts() {
                attach_overrides(&mut payload, memory);
            }
        }
        Shape::Messages(_) => {
            return Err(NebulaError::client(
                "Message content requires a role; set `role` to write a conversation",
            ));
        }
    }

    payload.insert("metadata".to_string(), Value::Object(metadata));
    Ok(Value::Object(payload))
}

/// Build one message object from the request's content
fn message_value(content: MessageContent, memory: &Memory) -> Result<Value> {
    let message = Message {
        content,
        role: memory.role.clone(),
        metadata: memory.metadata.clone(),
        authority: memory.authority,
    };
    Ok(serde_json::to_value(message)?)
}

/// Message objects carrying the request's content, in order
pub(crate) fn messages_for(memory: &Memory) -> Result<Vec<Value>> {
    match classify_content(&memory.content)? {
        Shape::Text(text) => Ok(vec![message_value(MessageContent::Text(text), memory)?]),
        Shape::Chunks(chunks) => chunks
            .into_iter()
            .map(|chunk| message_value(MessageContent::Text(chunk), memory))
            .collect(),
        Shape::Parts(parts) => {
            let mut message = Map::new();
            message.insert("content".to_string(), Value::Array(parts));
            if let Some(role) = &memory.role {
                message.insert("role".to_string(), json!(role));
            }
            message.insert(
                "metadata".to_string(),
                Value::Object(to_object(&memory.metadata)),
            );
            Ok(vec![Value::Object(message)])
        }
        Shape::Messages(messages) => Ok(messages
            .into_iter()
            .map(|mut message| {
                if let (Some(obj), Some(role)) = (message.as_object_mut(), &memory.role) {
                    obj.entry("role").or_insert_with(|| json!(role));
                }
                message
            })
            .collect()),
    }
}

/// Plan a conversation creation, optionally naming the conversation
pub fn plan_conversation(memory: &Memory, name: Option<&str>) -> Result<ConversationPlan> {
    let multimodal = memory.content.is_multimodal();

    let mut create = Map::new();
    create.insert("collection_ref".to_string(), json!(memory.collection_id));
    create.insert("engram_type".to_string(), json!("conversation"));
    create.insert("messages".to_string(), json!([]));
    create.insert(
        "metadata".to_string(),
        Value::Object(to_object(&memory.metadata)),
    );
    if let Some(name) = name {
        create.insert("name".to_string(), json!(name));
    }
    if multimodal {
        attach_overrides(&mut create, memory);
    }

    let first_message = if memory.content.is_empty() {
        None
    } else {
        let mut append = Map::new();
        append.insert("collection_id".to_string(), json!(memory.collection_id));
        append.insert("messages".to_string(), Value::Array(messages_for(memory)?));
        if multimodal {
            attach_overrides(&mut append, memory);
        }
        Some(Value::Object(append))
    };

    Ok(ConversationPlan {
        create: Value::Object(create),
        first_message,
    })
}

fn append_payload(memory: &Memory) -> Result<Value> {
    let mut payload = Map::new();
    payload.insert("collection_id".to_string(), json!(memory.collection_id));

    let conversation = memory.is_conversation();
    let multimodal = memory.content.is_multimodal();

    match classify_content(&memory.content)? {
        Shape::Messages(_) | Shape::Parts(_) => {
            payload.insert("messages".to_string(), Value::Array(messages_for(memory)?));
        }
        Shape::Chunks(chunks) if !conversation => {
            payload.insert("chunks".to_string(), json!(chunks));
        }
        Shape::Text(text) if !conversation => {
            payload.insert("raw_text".to_string(), json!(text));
        }
        Shape::Chunks(_) | Shape::Text(_) => {
            payload.insert("messages".to_string(), Value::Array(messages_for(memory)?));
        }
    }

    let mut metadata = to_object(&memory.metadata);
    if !conversation {
        fold_authority(&mut metadata, memory.authority);
    }
    if !metadata.is_empty() {
        payload.insert("metadata".to_string(), Value::Object(metadata));
    }
    if multimodal {
        attach_overrides(&mut payload, memory);
    }

    Ok(Value::Object(payload))
}
