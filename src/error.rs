//! Error types for the Nebula client

use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

/// Result type alias for Nebula operations
pub type Result<T> = std::result::Result<T, NebulaError>;

/// Boxed source error carried by client-side failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Kind of entity addressed by an identifier-based operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Memory,
    Chunk,
    Collection,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Memory => write!(f, "Memory"),
            EntityKind::Chunk => write!(f, "Chunk"),
            EntityKind::Collection => write!(f, "Collection"),
        }
    }
}

/// Main error type for the Nebula client
#[derive(Error, Debug)]
pub enum NebulaError {
    /// Local misuse or a transport failure (connection refused, timeout)
    #[error("Client error: {message}")]
    Client {
        message: String,
        #[source]
        source: Option<BoxError>,
        /// Set only when the request never got a response
        transport: bool,
    },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        details: Option<Map<String, Value>>,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("API error {status}: {message}")]
    Api {
        status: u16,
        message: String,
        body: Value,
    },

    #[error("Decode error: {0}")]
    Decode(String),

    /// The conversation was created but its first message could not be appended.
    /// `conversation_id` stays valid server-side.
    #[error("Conversation {conversation_id} was created but its first message failed: {source}")]
    ConversationOrphaned {
        conversation_id: String,
        #[source]
        source: Box<NebulaError>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NebulaError {
    /// Client error without an underlying cause
    pub fn client(message: impl Into<String>) -> Self {
        NebulaError::Client {
            message: message.into(),
            source: None,
            transport: false,
        }
    }

    /// Client error wrapping an underlying cause
    pub fn client_with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        NebulaError::Client {
            message: message.into(),
            source: Some(source.into()),
            transport: false,
        }
    }

    /// Client error for a request that failed before any response arrived
    pub fn transport(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        NebulaError::Client {
            message: message.into(),
            source: Some(source.into()),
            transport: true,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        NebulaError::Validation {
            message: message.into(),
            details: None,
        }
    }

    /// HTTP status associated with this error, when one is known
    pub fn status(&self) -> Option<u16> {
        match self {
            NebulaError::Authentication(_) => Some(401),
            NebulaError::RateLimited(_) => Some(429),
            NebulaError::Validation { .. } => Some(400),
            NebulaError::NotFound { .. } => Some(404),
            NebulaError::Api { status, .. } => Some(*status),
            NebulaError::ConversationOrphaned { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            NebulaError::RateLimited(_) => true,
            NebulaError::Client { transport, .. } => *transport,
            NebulaError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, NebulaError::NotFound { .. })
    }

    /// Re-interpret a generic 404 from an identifier-addressed call
    pub(crate) fn into_not_found(self, kind: EntityKind, id: &str) -> Self {
        match self {
            NebulaError::Api { status: 404, .. } => NebulaError::NotFound {
                kind,
                id: id.to_string(),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn api(status: u16) -> NebulaError {
        NebulaError::Api {
            status,
            message: format!("API error: {}", status),
            body: json!({}),
        }
    }

    #[test]
    fn test_into_not_found_only_rewrites_404() {
        let err = api(404).into_not_found(EntityKind::Memory, "m-1");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Memory not found: m-1");

        let err = api(500).into_not_found(EntityKind::Chunk, "c-1");
        assert_eq!(err.status(), Some(500));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(NebulaError::Authentication("x".into()).status(), Some(401));
        assert_eq!(NebulaError::RateLimited("x".into()).status(), Some(429));
        assert_eq!(NebulaError::validation("x").status(), Some(400));
        assert_eq!(NebulaError::client("x").status(), None);
    }

    #[test]
    fn test_retryable() {
        assert!(NebulaError::RateLimited("slow down".into()).is_retryable());
        assert!(api(503).is_retryable());
        assert!(!api(409).is_retryable());
        assert!(!NebulaError::client("missing key").is_retryable());
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        assert!(NebulaError::transport("Request timed out", io).is_retryable());
    }

    #[test]
    fn test_wrapped_local_failures_are_not_retryable() {
        let io = std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad header");
        let err = NebulaError::client_with_source("API key is not a valid header value", io);
        assert!(!err.is_retryable());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_orphaned_conversation_keeps_inner_status() {
        let err = NebulaError::ConversationOrphaned {
            conversation_id: "conv-1".into(),
            source: Box::new(api(502)),
        };
        assert_eq!(err.status(), Some(502));
        assert!(err.to_string().contains("conv-1"));
    }
}
