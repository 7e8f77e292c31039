//! Schema-tolerant token metadata.
//!
//! Token metadata JSON in the wild only loosely follows the ERC-721 schema:
//! media fields may be plain strings, nested objects, or community-specific
//! keys. [`TokenMetadata`] wraps the raw document and exposes typed
//! accessors for the keys the pipeline cares about, with the raw
//! [`serde_json::Value`] kept as an escape hatch.

use crate::chain::Chain;
use crate::token_uri::{sanitize_json_string, TokenUri};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("metadata is not valid UTF-8")]
    InvalidUtf8,
}

/// Media URLs selected out of a metadata document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaCandidates {
    pub image: Option<TokenUri>,
    pub animation: Option<TokenUri>,
}

impl MediaCandidates {
    /// The URI the preview pipeline should fetch first: animations take
    /// priority over stills when both are present.
    pub fn primary(&self) -> Option<&TokenUri> {
        self.animation.as_ref().or(self.image.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_none() && self.animation.is_none()
    }
}

/// A parsed token metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenMetadata {
    value: serde_json::Value,
}

impl TokenMetadata {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Parse metadata bytes, repairing broken JSON (control characters,
    /// unescaped quotes) before giving up.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MetadataError> {
        let text = std::str::from_utf8(bytes).map_err(|_| MetadataError::InvalidUtf8)?;
        Self::from_str_lossy(text)
    }

    /// Parse a metadata string, sanitizing on a first-parse failure.
    pub fn from_str_lossy(text: &str) -> Result<Self, MetadataError> {
        match serde_json::from_str(text) {
            Ok(value) => Ok(Self { value }),
            Err(first_err) => {
                let sanitized = sanitize_json_string(text);
                serde_json::from_str(&sanitized)
                    .map(|value| Self { value })
                    .map_err(|_| MetadataError::InvalidJson(first_err))
            }
        }
    }

    /// The raw document, for callers that need keys without an accessor.
    pub fn raw(&self) -> &serde_json::Value {
        &self.value
    }

    pub fn name(&self) -> Option<&str> {
        self.value.get("name").and_then(|v| v.as_str())
    }

    pub fn description(&self) -> Option<&str> {
        self.value.get("description").and_then(|v| v.as_str())
    }

    /// Look up a URL-valued field, tolerating the nested-object shape
    /// `{"image": {"url": "..."}}` alongside plain strings.
    pub fn url_field(&self, key: &str) -> Option<&str> {
        let field = self.value.get(key)?;
        match field {
            serde_json::Value::String(s) if !s.is_empty() => Some(s),
            serde_json::Value::Object(obj) => obj
                .get("url")
                .or_else(|| obj.get("uri"))
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty()),
            _ => None,
        }
    }

    /// First matching URL for a keyword priority list.
    pub fn first_url(&self, keywords: &[&str]) -> Option<&str> {
        keywords.iter().find_map(|key| self.url_field(key))
    }

    /// Select image/animation candidates using the chain's keyword table.
    pub fn media_candidates(&self, chain: Chain) -> MediaCandidates {
        let (image_keywords, animation_keywords) = chain.media_keywords();
        MediaCandidates {
            image: self.first_url(image_keywords).map(TokenUri::new),
            animation: self.first_url(animation_keywords).map(TokenUri::new),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_image_field() {
        let metadata = TokenMetadata::new(json!({"image": "ipfs://QmTest/img.png"}));
        let candidates = metadata.media_candidates(Chain::Ethereum);
        assert_eq!(
            candidates.image.unwrap().as_str(),
            "ipfs://QmTest/img.png"
        );
        assert!(candidates.animation.is_none());
    }

    #[test]
    fn test_nested_image_object() {
        let metadata = TokenMetadata::new(json!({"image": {"url": "https://x.test/a.png"}}));
        assert_eq!(metadata.url_field("image"), Some("https://x.test/a.png"));
    }

    #[test]
    fn test_animation_takes_priority() {
        let metadata = TokenMetadata::new(json!({
            "image": "https://x.test/a.png",
            "animation_url": "https://x.test/a.mp4",
        }));
        let candidates = metadata.media_candidates(Chain::Ethereum);
        assert_eq!(
            candidates.primary().unwrap().as_str(),
            "https://x.test/a.mp4"
        );
    }

    #[test]
    fn test_keyword_priority_order() {
        // "image" outranks "image_url" in the base table.
        let metadata = TokenMetadata::new(json!({
            "image_url": "https://x.test/second.png",
            "image": "https://x.test/first.png",
        }));
        let candidates = metadata.media_candidates(Chain::Ethereum);
        assert_eq!(
            candidates.image.unwrap().as_str(),
            "https://x.test/first.png"
        );
    }

    #[test]
    fn test_broken_json_repaired() {
        let broken = r#"{"name":""Rage Shout" DireWolf","image":"https://x.test/w.png"}"#;
        let metadata = TokenMetadata::from_str_lossy(broken).unwrap();
        assert_eq!(metadata.name(), Some("\"Rage Shout\" DireWolf"));
    }

    #[test]
    fn test_empty_string_fields_skipped() {
        let metadata = TokenMetadata::new(json!({"image": "", "image_url": "https://x.test/a.png"}));
        let candidates = metadata.media_candidates(Chain::Ethereum);
        assert_eq!(candidates.image.unwrap().as_str(), "https://x.test/a.png");
    }
}
