//! Nebula - client SDK for the Nebula memory and retrieval API
//!
//! Store documents and conversations (text or multimodal), append to them,
//! and run hierarchical search over collections. Async by default, with a
//! blocking client behind the `blocking` feature.

pub mod auth;
pub mod batch;
#[cfg(feature = "blocking")]
pub mod blocking;
pub mod client;
pub mod config;
pub mod content;
pub mod error;
pub mod memory;
pub mod normalizer;
pub mod response;

pub use batch::{BatchFailure, BatchReport};
#[cfg(feature = "blocking")]
pub use blocking::BlockingNebula;
pub use client::{CollectionUpdate, ListOptions, Nebula, ProcessOptions, SearchOptions};
pub use config::ClientConfig;
pub use content::{load_file, load_url, ContentPart, MediaKind};
pub use error::{EntityKind, NebulaError, Result};
pub use memory::{Memory, MemoryContent, MemoryUpdate, Message, MessageContent, Metadata};
pub use response::{
    Chunk, Collection, GraphPayload, GraphResultType, MemoryRecall, MemoryResponse,
    ProcessedContent, SearchResult, UploadTicket,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
