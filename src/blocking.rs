//! Blocking Nebula client
//!
//! Wraps [`Nebula`] and drives it on a runtime owned by the client, so the
//! operation surface and semantics are identical to the async client. Must
//! not be used from inside an async context.

use serde_json::Value;
use tokio::runtime::{Builder, Runtime};

use crate::batch::BatchReport;
use crate::client::{CollectionUpdate, ListOptions, Nebula, ProcessOptions, SearchOptions};
use crate::config::ClientConfig;
use crate::content::ContentPart;
use crate::error::{NebulaError, Result};
use crate::memory::{Memory, MemoryUpdate, Metadata};
use crate::response::{Collection, MemoryRecall, MemoryResponse, ProcessedContent, UploadTicket};

/// Blocking client for the Nebula API
#[derive(Debug)]
pub struct BlockingNebula {
    inner: Nebula,
    rt: Runtime,
}

impl BlockingNebula {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let rt = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| NebulaError::client_with_source("Failed to start runtime", e))?;

        Ok(Self {
            inner: Nebula::new(config)?,
            rt,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        self.inner.config()
    }

    /// Release pooled connections and shut the runtime down
    pub fn close(self) {
        let BlockingNebula { inner, rt } = self;
        rt.block_on(inner.close());
    }

    pub fn store_memory(&self, memory: &Memory) -> Result<String> {
        self.rt.block_on(self.inner.store_memory(memory))
    }

    pub fn store_memories(&self, memories: &[Memory]) -> Result<Vec<String>> {
        self.rt.block_on(self.inner.store_memories(memories))
    }

    pub fn store_memories_best_effort(&self, memories: &[Memory]) -> Result<BatchReport> {
        self.rt.block_on(self.inner.store_memories_best_effort(memories))
    }

    pub fn create_document_text(
        &self,
        collection_ref: &str,
        raw_text: &str,
        metadata: Option<Metadata>,
        ingestion_mode: Option<&str>,
    ) -> Result<String> {
        self.rt.block_on(
            self.inner
                .create_document_text(collection_ref, raw_text, metadata, ingestion_mode),
        )
    }

    pub fn create_document_chunks(
        &self,
        collection_ref: &str,
        chunks: &[String],
        metadata: Option<Metadata>,
        ingestion_mode: Option<&str>,
    ) -> Result<String> {
        self.rt.block_on(
            self.inner
                .create_document_chunks(collection_ref, chunks, metadata, ingestion_mode),
        )
    }

    pub fn get_memory(&self, memory_id: &str) -> Result<MemoryResponse> {
        self.rt.block_on(self.inner.get_memory(memory_id))
    }

    pub fn list_memories(
        &self,
        collection_ids: &[String],
        options: &ListOptions,
    ) -> Result<Vec<MemoryResponse>> {
        self.rt.block_on(self.inner.list_memories(collection_ids, options))
    }

    pub fn delete(&self, memory_id: &str) -> Result<()> {
        self.rt.block_on(self.inner.delete(memory_id))
    }

    pub fn delete_many(&self, memory_ids: &[String]) -> Result<Value> {
        self.rt.block_on(self.inner.delete_many(memory_ids))
    }

    pub fn update_memory(&self, memory_id: &str, update: &MemoryUpdate) -> Result<()> {
        self.rt.block_on(self.inner.update_memory(memory_id, update))
    }

    pub fn delete_chunk(&self, chunk_id: &str) -> Result<()> {
        self.rt.block_on(self.inner.delete_chunk(chunk_id))
    }

    pub fn update_chunk(&self, chunk_id: &str, content: &str, metadata: Option<Metadata>) -> Result<()> {
        self.rt.block_on(self.inner.update_chunk(chunk_id, content, metadata))
    }

    pub fn create_collection(
        &self,
        name: &str,
        description: Option<&str>,
        metadata: Option<Metadata>,
    ) -> Result<Collection> {
        self.rt
            .block_on(self.inner.create_collection(name, description, metadata))
    }

    pub fn get_collection(&self, collection_id: &str) -> Result<Collection> {
        self.rt.block_on(self.inner.get_collection(collection_id))
    }

    pub fn get_collection_by_name(&self, name: &str) -> Result<Collection> {
        self.rt.block_on(self.inner.get_collection_by_name(name))
    }

    pub fn list_collections(&self, limit: usize, offset: usize) -> Result<Vec<Collection>> {
        self.rt.block_on(self.inner.list_collections(limit, offset))
    }

    pub fn update_collection(&self, collection_id: &str, update: &CollectionUpdate) -> Result<Collection> {
        self.rt
            .block_on(self.inner.update_collection(collection_id, update))
    }

    pub fn delete_collection(&self, collection_id: &str) -> Result<()> {
        self.rt.block_on(self.inner.delete_collection(collection_id))
    }

    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<MemoryRecall> {
        self.rt.block_on(self.inner.search(query, options))
    }

    pub fn health_check(&self) -> Result<Value> {
        self.rt.block_on(self.inner.health_check())
    }

    pub fn process_multimodal_content(
        &self,
        parts: &[ContentPart],
        options: &ProcessOptions,
    ) -> Result<ProcessedContent> {
        self.rt
            .block_on(self.inner.process_multimodal_content(parts, options))
    }

    pub fn get_upload_url(&self, filename: &str, content_type: &str, file_size: u64) -> Result<UploadTicket> {
        self.rt
            .block_on(self.inner.get_upload_url(filename, content_type, file_size))
    }

    /// Download a URL into a content part
    pub fn load_url(&self, url: &str, filename: Option<&str>) -> Result<ContentPart> {
        self.rt.block_on(crate::content::load_url(url, filename))
    }
}
