//! Response mapping
//!
//! Converts raw API JSON into typed read models. Mapping is total: missing
//! optional fields become empty containers or `None`. The server has used
//! several names for the same field over time; every alias set lives in the
//! tables below and is applied only here.
//!
//! A missing identifier maps to an empty string, which callers must read as
//! "result unknown". Graph search results are the one strict case: an
//! unrecognized `result_type` fails with [`NebulaError::Decode`].

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::content::{ContentPart, MediaKind};
use crate::error::{NebulaError, Result};
use crate::memory::Metadata;

/// Envelope key wrapping successful payloads
pub const RESULTS_KEY: &str = "results";

/// Identifier of a memory, collection or created entity
pub const ID_KEYS: &[&str] = &["id", "engram_id"];
/// Document creation answers with `engram_id` first
pub const DOCUMENT_ID_KEYS: &[&str] = &["engram_id", "id"];
/// Flat content of a memory
pub const CONTENT_KEYS: &[&str] = &["content", "text"];
/// Content of a chunk; binary parts echo their payload under `data`
pub const CHUNK_CONTENT_KEYS: &[&str] = &["content", "text", "data"];
/// Identifier of a chunk inside a search result
pub const CHUNK_ID_KEYS: &[&str] = &["id", "chunk_id"];
/// Parent memory of a search result
pub const MEMORY_ID_KEYS: &[&str] = &["memory_id", "engram_id"];
/// Number of memories in a collection
pub const MEMORY_COUNT_KEYS: &[&str] = &["engram_count", "memory_count"];

/// Strip the `results` envelope when present
pub fn unwrap_results(value: &Value) -> &Value {
    value.get(RESULTS_KEY).unwrap_or(value)
}

/// Items of a list response: `{results: [...]}`, a bare array, or a single object
pub fn list_items(value: &Value) -> Vec<&Value> {
    match unwrap_results(value) {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// First non-null value among `keys`
pub fn first_value<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find(|v| !v.is_null())
}

/// First non-null, non-empty value among `keys`, rendered as a string
pub fn first_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .filter_map(value_to_string)
        .find(|s| !s.is_empty())
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn opt_string(value: &Value, key: &str) -> Option<String> {
    first_string(value, &[key])
}

fn string_or_empty(value: &Value, key: &str) -> String {
    opt_string(value, key).unwrap_or_default()
}

fn metadata_of(value: &Value, key: &str) -> Metadata {
    value
        .get(key)
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(value_to_string).collect())
}

fn id_map(value: Option<&Value>) -> HashMap<String, Vec<String>> {
    value
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .map(|(k, v)| (k.clone(), string_list(Some(v)).unwrap_or_default()))
                .collect()
        })
        .unwrap_or_default()
}

fn value_list(value: &Value, key: &str) -> Vec<Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Parse an RFC 3339 timestamp; naive timestamps are read as UTC
pub fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = value?.as_str()?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Identifier of a newly created entity, if the response carries one
pub fn created_id(response: &Value, keys: &[&str]) -> Option<String> {
    first_string(unwrap_results(response), keys)
}

/// A chunk or message within a memory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Speaker role for conversation messages
    pub role: Option<String>,
    /// Part discriminator (`text`, `image`, ...) for multimodal chunks
    pub content_type: Option<String>,
    pub media_type: Option<String>,
    pub filename: Option<String>,
}

impl Chunk {
    pub fn from_value(value: &Value) -> Self {
        if let Value::String(text) = value {
            // Legacy: plain string chunks without ids
            return Chunk {
                content: text.clone(),
                ..Default::default()
            };
        }

        Chunk {
            id: first_string(value, CHUNK_ID_KEYS).unwrap_or_default(),
            content: first_value(value, CHUNK_CONTENT_KEYS)
                .and_then(value_to_string)
                .unwrap_or_default(),
            metadata: metadata_of(value, "metadata"),
            role: opt_string(value, "role"),
            content_type: opt_string(value, "type"),
            media_type: opt_string(value, "media_type"),
            filename: opt_string(value, "filename"),
        }
    }

    /// Rebuild the content part this chunk echoes, when it is one
    pub fn to_content_part(&self) -> Option<ContentPart> {
        let kind = match self.content_type.as_deref()? {
            "text" => return Some(ContentPart::text(self.content.clone())),
            "image" => MediaKind::Image,
            "audio" => MediaKind::Audio,
            "document" => MediaKind::Document,
            _ => return None,
        };

        let data = self.content.clone();
        let media_type = self
            .media_type
            .clone()
            .unwrap_or_else(|| kind.default_media_type().to_string());
        let filename = self.filename.clone();

        Some(match kind {
            MediaKind::Image => ContentPart::Image {
                data,
                media_type,
                filename,
            },
            MediaKind::Audio => ContentPart::Audio {
                data,
                media_type,
                filename,
                duration_seconds: None,
            },
            MediaKind::Document => ContentPart::Document {
                data,
                media_type,
                filename,
            },
        })
    }
}

/// Read model returned by `get_memory` / `list_memories`
///
/// Flat `content` and `chunks` are normally exclusive; both may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryResponse {
    pub id: String,
    pub content: Option<String>,
    pub chunks: Option<Vec<Chunk>>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub collection_ids: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl MemoryResponse {
    pub fn from_value(value: &Value) -> Self {
        let value = unwrap_results(value);

        let chunks = value
            .get("chunks")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(Chunk::from_value).collect::<Vec<_>>())
            .filter(|chunks| !chunks.is_empty());

        let mut metadata = metadata_of(value, "metadata");
        if let Some(engram_id) = opt_string(value, "engram_id") {
            metadata.insert("engram_id".to_string(), Value::String(engram_id));
        }
        metadata.extend(metadata_of(value, "engram_metadata"));

        MemoryResponse {
            id: first_string(value, ID_KEYS).unwrap_or_default(),
            content: first_value(value, CONTENT_KEYS).and_then(value_to_string),
            chunks,
            metadata,
            collection_ids: string_list(value.get("collection_ids")).unwrap_or_default(),
            created_at: parse_timestamp(value.get("created_at")),
            updated_at: parse_timestamp(value.get("updated_at")),
        }
    }

    /// Chunk contents in order (empty when the memory has flat content)
    pub fn chunk_texts(&self) -> Vec<&str> {
        self.chunks
            .iter()
            .flatten()
            .map(|c| c.content.as_str())
            .collect()
    }
}

/// A collection of memories
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Server metadata plus derived status/count fields
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub memory_count: i64,
    pub owner_id: Option<String>,
}

impl Collection {
    pub fn from_value(value: &Value) -> Self {
        let value = unwrap_results(value);

        let memory_count = first_value(value, MEMORY_COUNT_KEYS)
            .and_then(Value::as_i64)
            .unwrap_or(0);

        let mut metadata = metadata_of(value, "metadata");
        metadata.insert(
            "graph_collection_status".to_string(),
            Value::String(string_or_empty(value, "graph_collection_status")),
        );
        metadata.insert(
            "graph_sync_status".to_string(),
            Value::String(string_or_empty(value, "graph_sync_status")),
        );
        metadata.insert(
            "user_count".to_string(),
            Value::from(value.get("user_count").and_then(Value::as_i64).unwrap_or(0)),
        );
        metadata.insert("engram_count".to_string(), Value::from(memory_count));

        Collection {
            id: first_string(value, ID_KEYS).unwrap_or_default(),
            name: string_or_empty(value, "name"),
            description: opt_string(value, "description"),
            metadata,
            created_at: parse_timestamp(value.get("created_at")),
            updated_at: parse_timestamp(value.get("updated_at")),
            memory_count,
            owner_id: opt_string(value, "owner_id"),
        }
    }
}

/// Graph search result discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphResultType {
    Entity,
    Relationship,
    Community,
}

impl std::fmt::Display for GraphResultType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphResultType::Entity => write!(f, "entity"),
            GraphResultType::Relationship => write!(f, "relationship"),
            GraphResultType::Community => write!(f, "community"),
        }
    }
}

impl FromStr for GraphResultType {
    type Err = NebulaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "entity" => Ok(GraphResultType::Entity),
            "relationship" => Ok(GraphResultType::Relationship),
            "community" => Ok(GraphResultType::Community),
            _ => Err(NebulaError::Decode(format!(
                "Unknown graph result_type: '{}'",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphEntity {
    pub id: Option<String>,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphRelationship {
    pub id: Option<String>,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub subject_id: Option<String>,
    pub object_id: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphCommunity {
    pub id: Option<String>,
    pub name: String,
    pub summary: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Exactly one graph payload, selected by `result_type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result_type", content = "content", rename_all = "lowercase")]
pub enum GraphPayload {
    Entity(GraphEntity),
    Relationship(GraphRelationship),
    Community(GraphCommunity),
}

impl GraphPayload {
    pub fn result_type(&self) -> GraphResultType {
        match self {
            GraphPayload::Entity(_) => GraphResultType::Entity,
            GraphPayload::Relationship(_) => GraphResultType::Relationship,
            GraphPayload::Community(_) => GraphResultType::Community,
        }
    }

    fn from_content(result_type: GraphResultType, content: &Value) -> Self {
        let id = opt_string(content, "id");
        let metadata = metadata_of(content, "metadata");
        match result_type {
            GraphResultType::Entity => GraphPayload::Entity(GraphEntity {
                id,
                name: string_or_empty(content, "name"),
                description: string_or_empty(content, "description"),
                metadata,
            }),
            GraphResultType::Relationship => GraphPayload::Relationship(GraphRelationship {
                id,
                subject: string_or_empty(content, "subject"),
                predicate: string_or_empty(content, "predicate"),
                object: string_or_empty(content, "object"),
                subject_id: opt_string(content, "subject_id"),
                object_id: opt_string(content, "object_id"),
                description: opt_string(content, "description"),
                metadata,
            }),
            GraphResultType::Community => GraphPayload::Community(GraphCommunity {
                id,
                name: string_or_empty(content, "name"),
                summary: string_or_empty(content, "summary"),
                metadata,
            }),
        }
    }
}

/// Search hit: chunk-style (`content` + score) or graph-style (`graph`)
///
/// `id` is the chunk id; `memory_id` is the containing memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: Metadata,
    pub memory_id: Option<String>,
    pub owner_id: Option<String>,
    pub content: Option<String>,
    pub graph: Option<GraphPayload>,
    pub chunk_ids: Option<Vec<String>>,
    /// Speaker role for conversation utterances
    pub source_role: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Human-readable label, e.g. "user on 2025-01-15"
    pub display_name: Option<String>,
}

impl SearchResult {
    /// Map a chunk-style hit
    pub fn from_chunk_value(value: &Value) -> Self {
        SearchResult {
            id: first_string(value, CHUNK_ID_KEYS).unwrap_or_default(),
            score: value.get("score").and_then(Value::as_f64).unwrap_or(0.0),
            metadata: metadata_of(value, "metadata"),
            memory_id: first_string(value, MEMORY_ID_KEYS),
            owner_id: opt_string(value, "owner_id"),
            content: first_string(value, CONTENT_KEYS),
            ..Default::default()
        }
    }

    /// Map a graph-style hit; the `result_type` must be recognized
    pub fn from_graph_value(value: &Value) -> Result<Self> {
        let raw_type = value
            .get("result_type")
            .and_then(Value::as_str)
            .ok_or_else(|| NebulaError::Decode("Graph result is missing result_type".to_string()))?;
        let result_type: GraphResultType = raw_type.parse()?;

        let empty = Value::Object(Map::new());
        let content = value
            .get("content")
            .filter(|c| c.is_object())
            .unwrap_or(&empty);

        Ok(SearchResult {
            id: opt_string(value, "id").unwrap_or_default(),
            score: value.get("score").and_then(Value::as_f64).unwrap_or(0.0),
            metadata: metadata_of(value, "metadata"),
            memory_id: first_string(value, MEMORY_ID_KEYS),
            owner_id: opt_string(value, "owner_id"),
            content: None,
            graph: Some(GraphPayload::from_content(result_type, content)),
            chunk_ids: string_list(value.get("chunk_ids")),
            source_role: opt_string(value, "source_role"),
            timestamp: parse_timestamp(value.get("timestamp")),
            display_name: opt_string(value, "display_name"),
        })
    }

    pub fn graph_result_type(&self) -> Option<GraphResultType> {
        self.graph.as_ref().map(GraphPayload::result_type)
    }
}

/// Hierarchical recall: entities, facts and utterances with cross references
///
/// Nested records are kept as raw JSON. The cross-reference maps are returned
/// as the server sent them; referential integrity is not checked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecall {
    pub query: String,
    pub entities: Vec<Value>,
    pub facts: Vec<Value>,
    pub utterances: Vec<Value>,
    pub fact_to_chunks: HashMap<String, Vec<String>>,
    pub entity_to_facts: HashMap<String, Vec<String>>,
    pub retrieved_at: String,
    pub focus: Option<Value>,
    pub total_traversal_time_ms: Option<f64>,
    pub query_intent: Option<String>,
}

impl MemoryRecall {
    /// Recall with nothing in it
    pub fn empty(query: &str) -> Self {
        MemoryRecall {
            query: query.to_string(),
            ..Default::default()
        }
    }

    pub fn from_value(value: &Value, query: &str) -> Self {
        let value = unwrap_results(value);
        MemoryRecall {
            query: opt_string(value, "query").unwrap_or_else(|| query.to_string()),
            entities: value_list(value, "entities"),
            facts: value_list(value, "facts"),
            utterances: value_list(value, "utterances"),
            fact_to_chunks: id_map(value.get("fact_to_chunks")),
            entity_to_facts: id_map(value.get("entity_to_facts")),
            retrieved_at: string_or_empty(value, "retrieved_at"),
            focus: value.get("focus").filter(|f| !f.is_null()).cloned(),
            total_traversal_time_ms: value.get("total_traversal_time_ms").and_then(Value::as_f64),
            query_intent: opt_string(value, "query_intent"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.facts.is_empty() && self.utterances.is_empty()
    }
}

/// Output of on-the-fly multimodal processing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessedContent {
    #[serde(default)]
    pub extracted_text: String,
    #[serde(default)]
    pub content_parts_count: u64,
    pub vision_model: Option<String>,
    pub audio_model: Option<String>,
    pub fast_mode: Option<bool>,
}

impl ProcessedContent {
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(unwrap_results(value).clone())
            .map_err(|e| NebulaError::Decode(format!("Invalid multimodal response: {}", e)))
    }
}

/// Presigned upload URL for files too large to inline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTicket {
    /// URL to `PUT` the file to
    pub upload_url: String,
    /// Key to reference in an [`ContentPart::S3Reference`]
    pub s3_key: String,
    pub bucket: Option<String>,
    pub expires_in: Option<u64>,
    pub max_size: Option<u64>,
}

impl UploadTicket {
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(unwrap_results(value).clone())
            .map_err(|e| NebulaError::Decode(format!("Invalid upload-url response: {}", e)))
    }

    /// Content part referencing the uploaded object
    pub fn into_part(self, media_type: &str, filename: Option<&str>, size_bytes: Option<u64>) -> ContentPart {
        ContentPart::S3Reference {
            s3_key: self.s3_key,
            bucket: self.bucket,
            media_type: media_type.to_string(),
            filename: filename.map(String::from),
            size_bytes,
        }
    }
}
