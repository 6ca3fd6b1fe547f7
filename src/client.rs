//! Async Nebula client
//!
//! Executes the plans produced by [`crate::normalizer`] and [`crate::batch`]
//! over a pooled `reqwest` client and maps every response through
//! [`crate::response`]. Calls belonging to one write are issued strictly in
//! sequence; nothing is retried.

use reqwest::{Method, Url};
use serde_json::{json, Map, Value};

use crate::auth::auth_headers;
use crate::batch::{plan_batch, BatchPlan, BatchReport, ConversationGroup};
use crate::config::ClientConfig;
use crate::content::ContentPart;
use crate::error::{EntityKind, NebulaError, Result};
use crate::memory::{Memory, MemoryUpdate, Metadata};
use crate::normalizer::{plan_write, ConversationPlan, WritePlan, DEFAULT_INGESTION_MODE};
use crate::response::{
    created_id, list_items, Collection, MemoryRecall, MemoryResponse, ProcessedContent,
    UploadTicket, DOCUMENT_ID_KEYS, ID_KEYS, RESULTS_KEY,
};

const COLLECTIONS: &str = "/v1/collections";
const MEMORIES: &str = "/v1/memories";
const CHUNKS: &str = "/v1/chunks";
const DELETE_MANY: &str = "/v1/memories/delete";
const SEARCH: &str = "/v1/retrieval/search";
const HEALTH: &str = "/v1/health";
const MULTIMODAL_PROCESS: &str = "/v1/multimodal/process";
const UPLOAD_URL: &str = "/v1/upload-url";

/// Default page size for list operations
pub const DEFAULT_LIST_LIMIT: usize = 100;
/// Default number of search results
pub const DEFAULT_SEARCH_LIMIT: usize = 10;
pub const DEFAULT_SEARCH_MODE: &str = "super";

/// Paging and filtering for `list_memories`
#[derive(Debug, Clone, PartialEq)]
pub struct ListOptions {
    pub limit: usize,
    pub offset: usize,
    /// MongoDB-style filter, sent JSON-encoded in the query string
    pub metadata_filters: Option<Value>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIST_LIMIT,
            offset: 0,
            metadata_filters: None,
        }
    }
}

/// Options for `search`
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    /// Collection ids or names to scope the search; blank entries are ignored
    pub collection_ids: Vec<String>,
    pub limit: usize,
    /// Metadata filters, merged over `search_settings.filters`
    pub filters: Option<Map<String, Value>>,
    pub search_mode: String,
    /// Extra settings passed through to the retrieval backend
    pub search_settings: Option<Map<String, Value>>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            collection_ids: Vec::new(),
            limit: DEFAULT_SEARCH_LIMIT,
            filters: None,
            search_mode: DEFAULT_SEARCH_MODE.to_string(),
            search_settings: None,
        }
    }
}

impl SearchOptions {
    pub fn in_collections<I, S>(collection_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            collection_ids: collection_ids.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_filters(mut self, filters: Map<String, Value>) -> Self {
        self.filters = Some(filters);
        self
    }
}

/// Model overrides for `process_multimodal_content`
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOptions {
    pub vision_model: Option<String>,
    pub audio_model: Option<String>,
    pub fast_mode: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            vision_model: None,
            audio_model: None,
            fast_mode: true,
        }
    }
}

/// Fields to change on a collection; unset fields are left alone
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<Metadata>,
}

/// Async client for the Nebula API
pub struct Nebula {
    http: reqwest::Client,
    config: ClientConfig,
}

impl Nebula {
    /// Create a client; auth headers are attached to every request
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(auth_headers(config.api_key())?)
            .user_agent(concat!("nebula-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NebulaError::client_with_source("Failed to build HTTP client", e))?;

        Ok(Self { http, config })
    }

    /// Create a client from `NEBULA_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Release pooled connections
    pub async fn close(self) {
        tracing::debug!("Closing client for {}", self.config.base_url);
        drop(self.http);
    }

    fn endpoint(&self, base: &str, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.config.url(base))
            .map_err(|e| NebulaError::client_with_source("Invalid base URL", e))?;
        if !segments.is_empty() {
            url.path_segments_mut()
                .map_err(|_| NebulaError::client("Base URL cannot carry a path"))?
                .extend(segments);
        }
        Ok(url)
    }

    async fn request(
        &self,
        method: Method,
        url: Url,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        tracing::debug!("{} {}", method, url.path());

        let mut builder = self.http.request(method, url);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(e, &self.config))?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, &self.config))?;

        if matches!(status, 200 | 202) {
            if bytes.is_empty() {
                return Ok(Value::Object(Map::new()));
            }
            return serde_json::from_slice(&bytes)
                .map_err(|e| NebulaError::Decode(format!("Response is not valid JSON: {}", e)));
        }

        let body = if bytes.is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        Err(error_for_status(status, body))
    }

    async fn get(&self, url: Url, query: &[(&str, String)]) -> Result<Value> {
        self.request(Method::GET, url, query, None).await
    }

    async fn post(&self, url: Url, body: &Value) -> Result<Value> {
        self.request(Method::POST, url, &[], Some(body)).await
    }

    // --- memory writes ---

    /// Store one memory: create a document or conversation, or append to an existing one
    ///
    /// Returns the id of the created or appended-to memory. A document
    /// creation whose response carries no id yields an empty string.
    pub async fn store_memory(&self, memory: &Memory) -> Result<String> {
        let plan = plan_write(memory)?;
        self.execute_plan(plan).await
    }

    pub async fn execute_plan(&self, plan: WritePlan) -> Result<String> {
        match plan {
            WritePlan::CreateDocument { payload } => {
                let id = self.create_memory(&payload, DOCUMENT_ID_KEYS).await?;
                if id.is_none() {
                    tracing::warn!("Document created but the response carried no id");
                }
                Ok(id.unwrap_or_default())
            }
            WritePlan::Append { memory_id, payload } => {
                self.append(&memory_id, &payload).await?;
                Ok(memory_id)
            }
            WritePlan::CreateConversation(plan) => self.create_conversation(plan).await,
        }
    }

    async fn create_memory(&self, payload: &Value, id_keys: &[&str]) -> Result<Option<String>> {
        let response = self.post(self.endpoint(MEMORIES, &[])?, payload).await?;
        let id = created_id(&response, id_keys);
        if let Some(id) = &id {
            tracing::info!("Created memory {}", id);
        }
        Ok(id)
    }

    async fn create_conversation(&self, plan: ConversationPlan) -> Result<String> {
        let conversation_id = self.create_conversation_id(&plan.create).await?;
        if let Some(first_message) = &plan.first_message {
            self.append(&conversation_id, first_message)
                .await
                .map_err(|e| orphaned(&conversation_id, e))?;
        }
        Ok(conversation_id)
    }

    async fn create_conversation_id(&self, payload: &Value) -> Result<String> {
        self.create_memory(payload, ID_KEYS)
            .await?
            .ok_or_else(|| NebulaError::client("Failed to create conversation: no id returned"))
    }

    async fn append(&self, memory_id: &str, payload: &Value) -> Result<()> {
        let url = self.endpoint(MEMORIES, &[memory_id, "append"])?;
        self.post(url, payload)
            .await
            .map_err(|e| e.into_not_found(EntityKind::Memory, memory_id))?;
        Ok(())
    }

    /// Store a batch, failing on the first error
    ///
    /// Returns one id per input, in input order; grouped conversation
    /// messages share their conversation's id.
    pub async fn store_memories(&self, memories: &[Memory]) -> Result<Vec<String>> {
        let plan = plan_batch(memories)?;
        let mut report = BatchReport::new(plan.len);

        for group in &plan.groups {
            let id = self.run_group(group).await?;
            report.record_success(&group.positions, &id);
        }
        for (position, write) in plan.others {
            let id = self.execute_plan(write).await?;
            report.record_success(&[position], &id);
        }

        Ok(report.into_ids())
    }

    /// Store a batch, continuing past failed groups
    ///
    /// Malformed content still fails the whole call before anything is sent.
    pub async fn store_memories_best_effort(&self, memories: &[Memory]) -> Result<BatchReport> {
        let BatchPlan { groups, others, len } = plan_batch(memories)?;
        let mut report = BatchReport::new(len);

        for group in &groups {
            match self.run_group(group).await {
                Ok(id) => report.record_success(&group.positions, &id),
                Err(e) => report.record_failure(group.positions.clone(), e),
            }
        }
        for (position, write) in others {
            match self.execute_plan(write).await {
                Ok(id) => report.record_success(&[position], &id),
                Err(e) => report.record_failure(vec![position], e),
            }
        }

        Ok(report)
    }

    async fn run_group(&self, group: &ConversationGroup) -> Result<String> {
        if let Some(id) = group.existing_id() {
            self.append(id, &group.append).await?;
            return Ok(id.to_string());
        }

        let create = group
            .create
            .as_ref()
            .ok_or_else(|| NebulaError::client("New conversation group has no create payload"))?;
        let conversation_id = self.create_conversation_id(create).await?;
        self.append(&conversation_id, &group.append)
            .await
            .map_err(|e| orphaned(&conversation_id, e))?;
        Ok(conversation_id)
    }

    /// Create a document from raw text
    pub async fn create_document_text(
        &self,
        collection_ref: &str,
        raw_text: &str,
        metadata: Option<Metadata>,
        ingestion_mode: Option<&str>,
    ) -> Result<String> {
        let payload = document_payload(collection_ref, "raw_text", json!(raw_text), metadata, ingestion_mode);
        self.create_document(&payload).await
    }

    /// Create a document from pre-chunked text
    pub async fn create_document_chunks(
        &self,
        collection_ref: &str,
        chunks: &[String],
        metadata: Option<Metadata>,
        ingestion_mode: Option<&str>,
    ) -> Result<String> {
        let payload = document_payload(collection_ref, "chunks", json!(chunks), metadata, ingestion_mode);
        self.create_document(&payload).await
    }

    async fn create_document(&self, payload: &Value) -> Result<String> {
        let response = self.post(self.endpoint(MEMORIES, &[])?, payload).await?;
        if response.get(RESULTS_KEY).is_none() {
            return Err(NebulaError::client("Failed to create document: invalid response"));
        }
        Ok(created_id(&response, DOCUMENT_ID_KEYS).unwrap_or_default())
    }

    // --- memory reads, updates and deletes ---

    pub async fn get_memory(&self, memory_id: &str) -> Result<MemoryResponse> {
        let response = self
            .get(self.endpoint(MEMORIES, &[memory_id])?, &[])
            .await
            .map_err(|e| e.into_not_found(EntityKind::Memory, memory_id))?;
        Ok(MemoryResponse::from_value(&response))
    }

    /// List memories in one or more collections
    pub async fn list_memories(
        &self,
        collection_ids: &[String],
        options: &ListOptions,
    ) -> Result<Vec<MemoryResponse>> {
        if collection_ids.is_empty() {
            return Err(NebulaError::client(
                "collection_ids must be provided to list_memories()",
            ));
        }

        let mut query = vec![
            ("limit", options.limit.to_string()),
            ("offset", options.offset.to_string()),
        ];
        query.extend(collection_ids.iter().map(|id| ("collection_ids", id.clone())));
        if let Some(filters) = &options.metadata_filters {
            query.push(("metadata_filters", serde_json::to_string(filters)?));
        }

        let response = self.get(self.endpoint(MEMORIES, &[])?, &query).await?;
        Ok(list_items(&response)
            .into_iter()
            .map(|item| {
                let mut memory = MemoryResponse::from_value(item);
                if item.get("collection_ids").is_none() {
                    memory.collection_ids = collection_ids.to_vec();
                }
                memory
            })
            .collect())
    }

    pub async fn delete(&self, memory_id: &str) -> Result<()> {
        let url = self.endpoint(MEMORIES, &[memory_id])?;
        self.request(Method::DELETE, url, &[], None)
            .await
            .map_err(|e| e.into_not_found(EntityKind::Memory, memory_id))?;
        tracing::info!("Deleted memory {}", memory_id);
        Ok(())
    }

    /// Delete several memories in one call; returns the server's report verbatim
    pub async fn delete_many(&self, memory_ids: &[String]) -> Result<Value> {
        self.post(self.endpoint(DELETE_MANY, &[])?, &json!({ "ids": memory_ids }))
            .await
    }

    /// Change memory-level properties without touching content
    pub async fn update_memory(&self, memory_id: &str, update: &MemoryUpdate) -> Result<()> {
        let payload = update_payload(update)?;
        let url = self.endpoint(MEMORIES, &[memory_id])?;
        self.request(Method::PATCH, url, &[], Some(&payload))
            .await
            .map_err(|e| e.into_not_found(EntityKind::Memory, memory_id))?;
        Ok(())
    }

    pub async fn delete_chunk(&self, chunk_id: &str) -> Result<()> {
        let url = self.endpoint(CHUNKS, &[chunk_id])?;
        self.request(Method::DELETE, url, &[], None)
            .await
            .map_err(|e| e.into_not_found(EntityKind::Chunk, chunk_id))?;
        Ok(())
    }

    pub async fn update_chunk(
        &self,
        chunk_id: &str,
        content: &str,
        metadata: Option<Metadata>,
    ) -> Result<()> {
        let mut payload = Map::new();
        payload.insert("content".to_string(), json!(content));
        if let Some(metadata) = metadata {
            payload.insert("metadata".to_string(), json!(metadata));
        }

        let url = self.endpoint(CHUNKS, &[chunk_id])?;
        self.request(Method::PATCH, url, &[], Some(&Value::Object(payload)))
            .await
            .map_err(|e| e.into_not_found(EntityKind::Chunk, chunk_id))?;
        Ok(())
    }

    // --- collections ---

    pub async fn create_collection(
        &self,
        name: &str,
        description: Option<&str>,
        metadata: Option<Metadata>,
    ) -> Result<Collection> {
        let mut payload = Map::new();
        payload.insert("name".to_string(), json!(name));
        if let Some(description) = description.filter(|d| !d.is_empty()) {
            payload.insert("description".to_string(), json!(description));
        }
        if let Some(metadata) = metadata.filter(|m| !m.is_empty()) {
            payload.insert("metadata".to_string(), json!(metadata));
        }

        let response = self
            .post(self.endpoint(COLLECTIONS, &[])?, &Value::Object(payload))
            .await?;
        let collection = Collection::from_value(&response);
        tracing::info!("Created collection {} ({})", collection.name, collection.id);
        Ok(collection)
    }

    pub async fn get_collection(&self, collection_id: &str) -> Result<Collection> {
        let response = self
            .get(self.endpoint(COLLECTIONS, &[collection_id])?, &[])
            .await
            .map_err(|e| e.into_not_found(EntityKind::Collection, collection_id))?;
        Ok(Collection::from_value(&response))
    }

    pub async fn get_collection_by_name(&self, name: &str) -> Result<Collection> {
        let response = self
            .get(self.endpoint(COLLECTIONS, &["name", name])?, &[])
            .await
            .map_err(|e| e.into_not_found(EntityKind::Collection, name))?;
        Ok(Collection::from_value(&response))
    }

    pub async fn list_collections(&self, limit: usize, offset: usize) -> Result<Vec<Collection>> {
        let query = [("limit", limit.to_string()), ("offset", offset.to_string())];
        let response = self.get(self.endpoint(COLLECTIONS, &[])?, &query).await?;
        Ok(list_items(&response)
            .into_iter()
            .map(Collection::from_value)
            .collect())
    }

    pub async fn update_collection(
        &self,
        collection_id: &str,
        update: &CollectionUpdate,
    ) -> Result<Collection> {
        let mut payload = Map::new();
        if let Some(name) = &update.name {
            payload.insert("name".to_string(), json!(name));
        }
        if let Some(description) = &update.description {
            payload.insert("description".to_string(), json!(description));
        }
        if let Some(metadata) = &update.metadata {
            payload.insert("metadata".to_string(), json!(metadata));
        }

        let url = self.endpoint(COLLECTIONS, &[collection_id])?;
        let response = self
            .post(url, &Value::Object(payload))
            .await
            .map_err(|e| e.into_not_found(EntityKind::Collection, collection_id))?;
        Ok(Collection::from_value(&response))
    }

    pub async fn delete_collection(&self, collection_id: &str) -> Result<()> {
        let url = self.endpoint(COLLECTIONS, &[collection_id])?;
        self.request(Method::DELETE, url, &[], None)
            .await
            .map_err(|e| e.into_not_found(EntityKind::Collection, collection_id))?;
        tracing::info!("Deleted collection {}", collection_id);
        Ok(())
    }

    // --- retrieval and utilities ---

    /// Hierarchical search over memories
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<MemoryRecall> {
        let payload = search_payload(query, options);
        let response = self.post(self.endpoint(SEARCH, &[])?, &payload).await?;

        match response.get(RESULTS_KEY) {
            Some(results) => Ok(MemoryRecall::from_value(results, query)),
            None => Ok(MemoryRecall::empty(query)),
        }
    }

    /// Service health, returned verbatim
    pub async fn health_check(&self) -> Result<Value> {
        self.get(self.endpoint(HEALTH, &[])?, &[]).await
    }

    /// Extract text from multimodal parts without storing anything
    pub async fn process_multimodal_content(
        &self,
        parts: &[ContentPart],
        options: &ProcessOptions,
    ) -> Result<ProcessedContent> {
        let mut payload = Map::new();
        payload.insert("content_parts".to_string(), serde_json::to_value(parts)?);
        payload.insert("fast_mode".to_string(), json!(options.fast_mode));
        if let Some(model) = &options.vision_model {
            payload.insert("vision_model".to_string(), json!(model));
        }
        if let Some(model) = &options.audio_model {
            payload.insert("audio_model".to_string(), json!(model));
        }

        let response = self
            .post(self.endpoint(MULTIMODAL_PROCESS, &[])?, &Value::Object(payload))
            .await?;
        ProcessedContent::from_value(&response)
    }

    /// Presigned URL for uploading a file larger than the inline limit
    pub async fn get_upload_url(
        &self,
        filename: &str,
        content_type: &str,
        file_size: u64,
    ) -> Result<UploadTicket> {
        let query = [
            ("filename", filename.to_string()),
            ("content_type", content_type.to_string()),
            ("file_size", file_size.to_string()),
        ];
        let url = self.endpoint(UPLOAD_URL, &[])?;
        let response = self.request(Method::POST, url, &query, None).await?;
        UploadTicket::from_value(&response)
    }
}

impl std::fmt::Debug for Nebula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nebula")
            .field("base_url", &self.config.base_url)
            .field("timeout", &self.config.timeout)
            .finish()
    }
}

fn orphaned(conversation_id: &str, source: NebulaError) -> NebulaError {
    tracing::warn!(
        "Conversation {} created but first append failed: {}",
        conversation_id,
        source
    );
    NebulaError::ConversationOrphaned {
        conversation_id: conversation_id.to_string(),
        source: Box::new(source),
    }
}

fn transport_error(error: reqwest::Error, config: &ClientConfig) -> NebulaError {
    let message = if error.is_connect() {
        format!(
            "Failed to connect to {}. Check your internet connection.",
            config.base_url
        )
    } else if error.is_timeout() {
        format!("Request timed out after {} seconds", config.timeout.as_secs())
    } else {
        format!("Request failed: {}", error)
    };
    NebulaError::transport(message, error)
}

/// Map a non-success status and its body onto the error taxonomy
pub(crate) fn error_for_status(status: u16, body: Value) -> NebulaError {
    let message = body.get("message").and_then(Value::as_str).map(String::from);

    match status {
        401 => NebulaError::Authentication(message.unwrap_or_else(|| "Invalid API key".to_string())),
        429 => NebulaError::RateLimited(message.unwrap_or_else(|| "Rate limit exceeded".to_string())),
        400 => NebulaError::Validation {
            message: message.unwrap_or_else(|| "Validation error".to_string()),
            details: body.get("details").and_then(Value::as_object).cloned(),
        },
        _ => NebulaError::Api {
            status,
            message: message.unwrap_or_else(|| format!("API error: {}", status)),
            body,
        },
    }
}

fn document_payload(
    collection_ref: &str,
    content_key: &str,
    content: Value,
    metadata: Option<Metadata>,
    ingestion_mode: Option<&str>,
) -> Value {
    let mut payload = Map::new();
    payload.insert("collection_ref".to_string(), json!(collection_ref));
    payload.insert("engram_type".to_string(), json!("document"));
    payload.insert(content_key.to_string(), content);
    payload.insert("metadata".to_string(), json!(metadata.unwrap_or_default()));
    payload.insert(
        "ingestion_mode".to_string(),
        json!(ingestion_mode.unwrap_or(DEFAULT_INGESTION_MODE)),
    );
    Value::Object(payload)
}

pub(crate) fn update_payload(update: &MemoryUpdate) -> Result<Value> {
    if update.is_empty() {
        return Err(NebulaError::validation(
            "At least one field (name, metadata, or collection_ids) must be provided to update",
        ));
    }

    let mut payload = match serde_json::to_value(update)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if update.metadata.is_some() {
        payload.insert("merge_metadata".to_string(), json!(update.merge_metadata));
    }
    Ok(Value::Object(payload))
}

pub(crate) fn search_payload(query: &str, options: &SearchOptions) -> Value {
    let mut settings = options.search_settings.clone().unwrap_or_default();
    settings.insert("limit".to_string(), json!(options.limit));

    let mut filters = settings
        .get("filters")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    if let Some(extra) = &options.filters {
        filters.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    let collection_ids: Vec<&str> = options
        .collection_ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .collect();
    if !collection_ids.is_empty() {
        filters.insert(
            "collection_ids".to_string(),
            json!({ "$overlap": collection_ids }),
        );
    }
    settings.insert("filters".to_string(), Value::Object(filters));

    json!({
        "query": query,
        "search_mode": options.search_mode,
        "search_settings": settings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            error_for_status(401, json!({})),
            NebulaError::Authentication(_)
        ));
        assert!(matches!(
            error_for_status(429, json!({})),
            NebulaError::RateLimited(_)
        ));

        match error_for_status(400, json!({"message": "bad", "details": {"field": "name"}})) {
            NebulaError::Validation { message, details } => {
                assert_eq!(message, "bad");
                assert_eq!(details.unwrap()["field"], "name");
            }
            other => panic!("unexpected {:?}", other),
        }

        match error_for_status(400, json!({"details": ["not", "a", "map"]})) {
            NebulaError::Validation { details, .. } => assert!(details.is_none()),
            other => panic!("unexpected {:?}", other),
        }

        match error_for_status(503, json!({})) {
            NebulaError::Api { status, message, .. } => {
                assert_eq!(status, 503);
                assert_eq!(message, "API error: 503");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_search_payload() {
        let mut filters = Map::new();
        filters.insert("metadata.verified".to_string(), json!(true));
        let mut settings = Map::new();
        settings.insert("filters".to_string(), json!({"metadata.lang": "en"}));

        let options = SearchOptions {
            collection_ids: vec!["c1".into(), "  ".into(), "".into()],
            limit: 5,
            filters: Some(filters),
            search_settings: Some(settings),
            ..Default::default()
        };
        let payload = search_payload("who", &options);

        assert_eq!(payload["query"], "who");
        assert_eq!(payload["search_mode"], "super");
        assert_eq!(payload["search_settings"]["limit"], 5);
        assert_eq!(
            payload["search_settings"]["filters"],
            json!({
                "metadata.lang": "en",
                "metadata.verified": true,
                "collection_ids": {"$overlap": ["c1"]}
            })
        );
    }

    #[test]
    fn test_search_payload_without_collections() {
        let payload = search_payload("q", &SearchOptions::in_collections([" "]));
        assert_eq!(payload["search_settings"]["filters"], json!({}));
        assert_eq!(payload["search_settings"]["limit"], 10);
    }

    #[test]
    fn test_update_payload() {
        let err = update_payload(&MemoryUpdate::default()).unwrap_err();
        assert!(matches!(err, NebulaError::Validation { .. }));

        let update = MemoryUpdate {
            name: Some("renamed".into()),
            ..Default::default()
        };
        assert_eq!(update_payload(&update).unwrap(), json!({"name": "renamed"}));

        let update = MemoryUpdate {
            metadata: Some(Metadata::from([("k".to_string(), json!(1))])),
            merge_metadata: true,
            ..Default::default()
        };
        assert_eq!(
            update_payload(&update).unwrap(),
            json!({"metadata": {"k": 1}, "merge_metadata": true})
        );
    }

    #[test]
    fn test_document_payload_defaults() {
        let payload = document_payload("c1", "raw_text", json!("hello"), None, None);
        assert_eq!(payload["ingestion_mode"], "fast");
        assert_eq!(payload["metadata"], json!({}));
        assert_eq!(payload["raw_text"], "hello");
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let client = Nebula::new(
            ClientConfig::new("key_a.b")
                .unwrap()
                .with_base_url("http://localhost:9/"),
        )
        .unwrap();
        let url = client.endpoint(COLLECTIONS, &["name", "my notes"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:9/v1/collections/name/my%20notes");
    }

    #[tokio::test]
    async fn test_invalid_base_url_is_not_retryable() {
        let client = Nebula::new(
            ClientConfig::new("key_a.b")
                .unwrap()
                .with_base_url("not a url"),
        )
        .unwrap();
        let err = client.health_check().await.unwrap_err();
        assert!(matches!(err, NebulaError::Client { transport: false, .. }));
        assert!(!err.is_retryable());
    }
}
