//! Credential handling
//!
//! Nebula accepts two credential shapes:
//! - API keys of the form `<public>.<raw>` whose public part starts with a
//!   recognized prefix, sent via the `X-API-Key` header
//! - anything else (session JWTs), sent as a bearer token

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};

use crate::error::{NebulaError, Result};

/// Header used for opaque API keys
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Prefixes that mark the public segment of a Nebula API key
pub const API_KEY_PREFIXES: &[&str] = &["key_", "neb_"];

/// How a credential is presented to the API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    ApiKey,
    Bearer,
}

impl AuthScheme {
    /// Select the scheme from the credential's shape
    pub fn detect(credential: &str) -> Self {
        if is_api_key(credential) {
            AuthScheme::ApiKey
        } else {
            AuthScheme::Bearer
        }
    }
}

/// Check whether a credential looks like a Nebula API key (`public.raw`)
///
/// Exactly one dot, a recognized prefix on the public part, and a non-empty raw part.
pub fn is_api_key(credential: &str) -> bool {
    let mut parts = credential.split('.');
    let (Some(public), Some(raw), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };

    !raw.is_empty() && API_KEY_PREFIXES.iter().any(|p| public.starts_with(p))
}

/// Build the authentication headers for a credential
pub fn auth_headers(credential: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    match AuthScheme::detect(credential) {
        AuthScheme::ApiKey => {
            let mut value = HeaderValue::from_str(credential)
                .map_err(|e| NebulaError::client_with_source("API key is not a valid header value", e))?;
            value.set_sensitive(true);
            headers.insert(HeaderName::from_static("x-api-key"), value);
        }
        AuthScheme::Bearer => {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", credential))
                .map_err(|e| NebulaError::client_with_source("Token is not a valid header value", e))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_detection() {
        assert!(is_api_key("key_abc.secretpart"));
        assert!(is_api_key("neb_public.raw"));
        assert!(!is_api_key("key_abc."));
        assert!(!is_api_key("key_abc"));
        assert!(!is_api_key("other_abc.raw"));
        // JWTs have two dots
        assert!(!is_api_key("eyJhbGciOi.eyJzdWIiOi.c2lnbmF0dXJl"));
        assert!(!is_api_key(""));
    }

    #[test]
    fn test_api_key_header() {
        let headers = auth_headers("key_public.raw").unwrap();
        assert_eq!(headers.get(API_KEY_HEADER).unwrap(), "key_public.raw");
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_bearer_header() {
        let headers = auth_headers("eyJ.abc.def").unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer eyJ.abc.def");
        assert!(headers.get(API_KEY_HEADER).is_none());
    }

    #[test]
    fn test_invalid_header_value() {
        let err = auth_headers("bad\ntoken").unwrap_err();
        assert!(matches!(err, NebulaError::Client { .. }));
    }
}
