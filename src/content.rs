//! Multimodal content parts
//!
//! A memory's content can be a sequence of typed parts. Binary parts carry
//! base64 data inline; files above [`INLINE_SIZE_LIMIT`] are uploaded out of
//! band via a presigned URL and referenced with [`ContentPart::S3Reference`].
//!
//! # Usage
//!
//! ```no_run
//! use nebula::content::{load_file, ContentPart};
//!
//! # fn main() -> nebula::Result<()> {
//! let parts = vec![
//!     load_file("photo.jpg")?,
//!     ContentPart::text("What is in this picture?"),
//! ];
//! # Ok(())
//! # }
//! ```

use std::fs;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::error::{NebulaError, Result};

/// Files larger than this should be uploaded and sent as an S3 reference
pub const INLINE_SIZE_LIMIT: u64 = 5 * 1024 * 1024;

pub const DEFAULT_IMAGE_MEDIA_TYPE: &str = "image/jpeg";
pub const DEFAULT_AUDIO_MEDIA_TYPE: &str = "audio/mpeg";
pub const DEFAULT_DOCUMENT_MEDIA_TYPE: &str = "application/pdf";
pub const DEFAULT_S3_MEDIA_TYPE: &str = "application/octet-stream";

/// Timeout for URL downloads
const FETCH_TIMEOUT_SECS: u64 = 60;

/// One typed unit of memory content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        /// Base64 encoded bytes
        data: String,
        media_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    Audio {
        data: String,
        media_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_seconds: Option<f64>,
    },
    Document {
        data: String,
        media_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    /// Reference to an object already uploaded to storage
    #[serde(rename = "s3_ref")]
    S3Reference {
        s3_key: String,
        /// Server default bucket applies when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bucket: Option<String>,
        media_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size_bytes: Option<u64>,
    },
}

/// Binary content kind, used for detection and defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
    Document,
}

impl MediaKind {
    /// Fallback media type when neither an override nor the extension tells us
    pub fn default_media_type(&self) -> &'static str {
        match self {
            MediaKind::Image => DEFAULT_IMAGE_MEDIA_TYPE,
            MediaKind::Audio => DEFAULT_AUDIO_MEDIA_TYPE,
            MediaKind::Document => DEFAULT_DOCUMENT_MEDIA_TYPE,
        }
    }

    /// Media type registered for an extension within this kind
    pub fn media_type_for_extension(&self, ext: &str) -> Option<&'static str> {
        match self {
            MediaKind::Image => image_media_type(ext),
            MediaKind::Audio => audio_media_type(ext),
            MediaKind::Document => document_media_type(ext),
        }
    }

    /// Classify a filename by extension, falling back to the media type's top-level token
    pub fn detect(filename: Option<&str>, media_type: Option<&str>) -> Option<Self> {
        if let Some(ext) = filename.and_then(extension_of) {
            if image_media_type(&ext).is_some() {
                return Some(MediaKind::Image);
            }
            if audio_media_type(&ext).is_some() {
                return Some(MediaKind::Audio);
            }
            if document_media_type(&ext).is_some() {
                return Some(MediaKind::Document);
            }
        }

        let media_type = media_type?;
        if media_type.starts_with("image/") {
            Some(MediaKind::Image)
        } else if media_type.starts_with("audio/") {
            Some(MediaKind::Audio)
        } else if media_type.starts_with("application/") || media_type.starts_with("text/") {
            Some(MediaKind::Document)
        } else {
            None
        }
    }
}

fn image_media_type(ext: &str) -> Option<&'static str> {
    match ext {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

fn audio_media_type(ext: &str) -> Option<&'static str> {
    match ext {
        "mp3" => Some("audio/mpeg"),
        "wav" => Some("audio/wav"),
        "m4a" => Some("audio/mp4"),
        "ogg" => Some("audio/ogg"),
        "flac" => Some("audio/flac"),
        "aac" => Some("audio/aac"),
        "webm" => Some("audio/webm"),
        _ => None,
    }
}

fn document_media_type(ext: &str) -> Option<&'static str> {
    match ext {
        "pdf" => Some("application/pdf"),
        "doc" => Some("application/msword"),
        "docx" => Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
        "txt" => Some("text/plain"),
        "csv" => Some("text/csv"),
        "rtf" => Some("application/rtf"),
        "md" => Some("text/markdown"),
        "json" => Some("application/json"),
        _ => None,
    }
}

/// Every extension the loaders recognize, for error messages
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "svg", "mp3", "wav", "m4a", "ogg", "flac", "aac",
    "webm", "pdf", "doc", "docx", "txt", "csv", "rtf", "md", "json",
];

/// Lowercased extension of a filename, without the dot
fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Resolve a media type: explicit override, then extension table, then kind default
fn resolve_media_type(kind: MediaKind, filename: Option<&str>, explicit: Option<&str>) -> String {
    if let Some(mt) = explicit {
        return mt.to_string();
    }
    filename
        .and_then(extension_of)
        .and_then(|ext| kind.media_type_for_extension(&ext))
        .unwrap_or_else(|| kind.default_media_type())
        .to_string()
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().and_then(|n| n.to_str()).map(String::from)
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Build a binary part of `kind` from raw bytes
    pub fn from_bytes(
        kind: MediaKind,
        bytes: &[u8],
        filename: Option<&str>,
        media_type: Option<&str>,
    ) -> Self {
        let data = BASE64.encode(bytes);
        let media_type = resolve_media_type(kind, filename, media_type);
        let filename = filename.map(String::from);

        match kind {
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
        }
    }

    pub fn image_from_bytes(bytes: &[u8], filename: Option<&str>, media_type: Option<&str>) -> Self {
        Self::from_bytes(MediaKind::Image, bytes, filename, media_type)
    }

    pub fn audio_from_bytes(bytes: &[u8], filename: Option<&str>, media_type: Option<&str>) -> Self {
        Self::from_bytes(MediaKind::Audio, bytes, filename, media_type)
    }

    pub fn document_from_bytes(
        bytes: &[u8],
        filename: Option<&str>,
        media_type: Option<&str>,
    ) -> Self {
        Self::from_bytes(MediaKind::Document, bytes, filename, media_type)
    }

    /// Read a local file as a part of `kind`; I/O failures propagate
    pub fn from_path(kind: MediaKind, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let filename = file_name_of(path);
        Ok(Self::from_bytes(kind, &bytes, filename.as_deref(), None))
    }

    /// Download a URL as a part of `kind`
    ///
    /// The filename defaults to the last URL path segment. A non-success status fails.
    pub async fn from_url(kind: MediaKind, url: &str, filename: Option<&str>) -> Result<Self> {
        let fetched = fetch_url(url).await?;
        let filename = filename.map(String::from).or(fetched.filename);
        let header_type = fetched
            .content_type
            .filter(|ct| MediaKind::detect(None, Some(ct)) == Some(kind));
        Ok(Self::from_bytes(
            kind,
            &fetched.bytes,
            filename.as_deref(),
            header_type.as_deref(),
        ))
    }

    /// Reference an uploaded object
    pub fn s3_reference(s3_key: impl Into<String>, media_type: Option<&str>) -> Self {
        ContentPart::S3Reference {
            s3_key: s3_key.into(),
            bucket: None,
            media_type: media_type.unwrap_or(DEFAULT_S3_MEDIA_TYPE).to_string(),
            filename: None,
            size_bytes: None,
        }
    }

    /// Wire discriminator
    pub fn type_tag(&self) -> &'static str {
        match self {
            ContentPart::Text { .. } => "text",
            ContentPart::Image { .. } => "image",
            ContentPart::Audio { .. } => "audio",
            ContentPart::Document { .. } => "document",
            ContentPart::S3Reference { .. } => "s3_ref",
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ContentPart::Text { .. })
    }

    pub fn media_type(&self) -> Option<&str> {
        match self {
            ContentPart::Text { .. } => None,
            ContentPart::Image { media_type, .. }
            | ContentPart::Audio { media_type, .. }
            | ContentPart::Document { media_type, .. }
            | ContentPart::S3Reference { media_type, .. } => Some(media_type),
        }
    }

    pub fn filename(&self) -> Option<&str> {
        match self {
            ContentPart::Text { .. } => None,
            ContentPart::Image { filename, .. }
            | ContentPart::Audio { filename, .. }
            | ContentPart::Document { filename, .. }
            | ContentPart::S3Reference { filename, .. } => filename.as_deref(),
        }
    }

    /// Wire representation of this part
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Load a local file, detecting image/audio/document from its extension
pub fn load_file(path: impl AsRef<Path>) -> Result<ContentPart> {
    let path = path.as_ref();
    let filename = file_name_of(path);
    let kind = MediaKind::detect(filename.as_deref(), None)
        .ok_or_else(|| unsupported_file(filename.as_deref().unwrap_or_default()))?;

    let bytes = fs::read(path)?;
    Ok(ContentPart::from_bytes(kind, &bytes, filename.as_deref(), None))
}

/// Download a URL, detecting the kind from the filename, the URL path, or the response MIME type
pub async fn load_url(url: &str, filename: Option<&str>) -> Result<ContentPart> {
    let fetched = fetch_url(url).await?;
    let filename = filename.map(String::from).or(fetched.filename);
    let kind = MediaKind::detect(filename.as_deref(), fetched.content_type.as_deref())
        .ok_or_else(|| unsupported_file(filename.as_deref().unwrap_or(url)))?;

    // Only trust the header when the extension table has nothing for this file
    let from_table = filename
        .as_deref()
        .and_then(extension_of)
        .and_then(|ext| kind.media_type_for_extension(&ext));
    let media_type = match from_table {
        Some(mt) => Some(mt.to_string()),
        None => fetched.content_type,
    };

    Ok(ContentPart::from_bytes(
        kind,
        &fetched.bytes,
        filename.as_deref(),
        media_type.as_deref(),
    ))
}

fn unsupported_file(name: &str) -> NebulaError {
    NebulaError::client(format!(
        "Cannot detect file type for '{}'. Supported extensions: {}",
        name,
        SUPPORTED_EXTENSIONS.join(", ")
    ))
}

struct Fetched {
    bytes: Vec<u8>,
    filename: Option<String>,
    content_type: Option<String>,
}

async fn fetch_url(url: &str) -> Result<Fetched> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(FETCH_TIMEOUT_SECS))
        .build()
        .map_err(|e| NebulaError::client_with_source("Failed to build HTTP client", e))?;

    tracing::debug!("Fetching content from {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| NebulaError::transport(format!("Failed to fetch {}", url), e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(NebulaError::client(format!(
            "Failed to fetch {}: HTTP {}",
            url, status
        )));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let filename = response
        .url()
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .map(String::from);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| NebulaError::transport(format!("Failed to read body of {}", url), e))?
        .to_vec();

    Ok(Fetched {
        bytes,
        filename,
        content_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_text_wire_format() {
        let part = ContentPart::text("hello");
        assert_eq!(part.to_value(), json!({"type": "text", "text": "hello"}));
    }

    #[test]
    fn test_image_from_bytes_uses_extension() {
        let part = ContentPart::image_from_bytes(b"abc", Some("photo.PNG"), None);
        assert_eq!(part.media_type(), Some("image/png"));
        assert_eq!(part.filename(), Some("photo.PNG"));
        match part {
            ContentPart::Image { data, .. } => assert_eq!(data, "YWJj"),
            other => panic!("expected image, got {:?}", other),
        }
    }

    #[test]
    fn test_media_type_priority() {
        // explicit override wins over the extension
        let part = ContentPart::audio_from_bytes(b"x", Some("a.wav"), Some("audio/x-custom"));
        assert_eq!(part.media_type(), Some("audio/x-custom"));

        // unknown extension falls back to the kind default
        let part = ContentPart::document_from_bytes(b"x", Some("notes.xyz"), None);
        assert_eq!(part.media_type(), Some(DEFAULT_DOCUMENT_MEDIA_TYPE));

        let part = ContentPart::audio_from_bytes(b"x", None, None);
        assert_eq!(part.media_type(), Some(DEFAULT_AUDIO_MEDIA_TYPE));
    }

    #[test]
    fn test_s3_reference_wire_format() {
        let part = ContentPart::s3_reference("multimodal/abc/image.jpg", Some("image/jpeg"));
        assert_eq!(
            part.to_value(),
            json!({
                "type": "s3_ref",
                "s3_key": "multimodal/abc/image.jpg",
                "media_type": "image/jpeg"
            })
        );
    }

    #[test]
    fn test_detect_kind() {
        assert_eq!(MediaKind::detect(Some("a.jpeg"), None), Some(MediaKind::Image));
        assert_eq!(MediaKind::detect(Some("a.flac"), None), Some(MediaKind::Audio));
        assert_eq!(MediaKind::detect(Some("a.md"), None), Some(MediaKind::Document));
        assert_eq!(
            MediaKind::detect(Some("blob"), Some("image/avif")),
            Some(MediaKind::Image)
        );
        assert_eq!(
            MediaKind::detect(None, Some("text/html")),
            Some(MediaKind::Document)
        );
        assert_eq!(MediaKind::detect(Some("a.exe"), Some("video/mp4")), None);
        assert_eq!(MediaKind::detect(None, None), None);
    }

    #[test]
    fn test_load_file_detects_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.mp3");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(b"ID3").unwrap();

        let part = load_file(&path).unwrap();
        assert_eq!(part.type_tag(), "audio");
        assert_eq!(part.media_type(), Some("audio/mpeg"));
        assert_eq!(part.filename(), Some("recording.mp3"));
    }

    #[test]
    fn test_load_file_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("binary.exe");
        fs::write(&path, b"MZ").unwrap();

        let err = load_file(&path).unwrap_err();
        assert!(err.to_string().contains("Cannot detect file type"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = ContentPart::from_path(MediaKind::Image, "/nonexistent/photo.jpg").unwrap_err();
        assert!(matches!(err, NebulaError::Io(_)));
    }

    #[test]
    fn test_deserialize_tagged() {
        let part: ContentPart = serde_json::from_value(json!({
            "type": "document",
            "data": "JVBERi0=",
            "media_type": "application/pdf",
            "filename": "report.pdf"
        }))
        .unwrap();
        assert_eq!(part.type_tag(), "document");
        assert_eq!(part.filename(), Some("report.pdf"));
    }
}
