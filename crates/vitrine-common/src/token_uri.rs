//! Token URI classification and inline decoding.
//!
//! A token's metadata URI is classified by scheme before any network call is
//! made: inline `data:` payloads decode in-process, `ipfs://` and `ar://`
//! URIs go through gateway clients, and plain HTTP URLs are fetched
//! directly. The classification is a transient value and is never persisted.

use alloy::primitives::U256;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

const BASE64_JSON_PREFIX: &str = "data:application/json;base64,";
const BASE64_TEXT_PREFIX: &str = "data:text/plain;base64,";
const BASE64_SVG_PREFIX: &str = "data:image/svg+xml;base64,";

/// Scheme classification of a token URI, checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UriType {
    /// Inline base64 JSON (`data:application/json;base64,` or text/plain).
    Base64Json,
    /// Inline base64 SVG (`data:image/svg+xml;base64,`).
    Base64Svg,
    /// `ipfs://` URI, fetched through a gateway.
    Ipfs,
    /// An `ipfs.io/api` style URL; fetched as plain HTTP.
    IpfsApi,
    /// `ar://` URI or bare Arweave transaction id.
    Arweave,
    /// Plain `http://` / `https://` URL.
    Http,
    /// Unclassifiable; surfaces as a classification error, not a fetch error.
    Unknown,
}

/// A raw token URI string plus its derived classification helpers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUri(String);

impl TokenUri {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw: String = raw.into();
        // NUL bytes show up in felt/bytes32-packed URIs; strip them along
        // with surrounding whitespace before classifying.
        Self(raw.trim().replace('\u{0}', ""))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// ERC-1155 URIs may carry a literal `{id}` placeholder which clients
    /// substitute with the 64-hex-digit, zero-padded token id.
    pub fn with_id_substitution(&self, token_id: U256) -> TokenUri {
        if self.0.contains("{id}") {
            let token_id_hex = format!("{token_id:064x}");
            TokenUri(self.0.replace("{id}", &token_id_hex))
        } else {
            self.clone()
        }
    }

    /// Classify the URI by scheme. Checks are ordered: inline payloads
    /// first, then content-addressed schemes, then plain HTTP.
    pub fn uri_type(&self) -> UriType {
        let s = self.0.as_str();
        if s.starts_with(BASE64_JSON_PREFIX) || s.starts_with(BASE64_TEXT_PREFIX) {
            UriType::Base64Json
        } else if s.starts_with(BASE64_SVG_PREFIX) {
            UriType::Base64Svg
        } else if s.starts_with("ipfs://") {
            UriType::Ipfs
        } else if s.contains("ipfs.io/api") {
            UriType::IpfsApi
        } else if s.starts_with("ar://") || is_arweave_tx_id(s) {
            UriType::Arweave
        } else if s.starts_with("http://") || s.starts_with("https://") {
            UriType::Http
        } else {
            UriType::Unknown
        }
    }

    /// CID/path portion of an `ipfs://` URI, with any duplicated `/ipfs/`
    /// prefix stripped (`ipfs://ipfs/Qm...` is seen in the wild).
    pub fn ipfs_path(&self) -> Option<&str> {
        let path = self.0.strip_prefix("ipfs://")?;
        let path = path.strip_prefix("ipfs/").unwrap_or(path);
        Some(path.trim_start_matches('/'))
    }

    /// Transaction id portion of an Arweave URI.
    pub fn arweave_tx_id(&self) -> Option<&str> {
        if let Some(id) = self.0.strip_prefix("ar://") {
            return Some(id);
        }
        if is_arweave_tx_id(&self.0) {
            return Some(&self.0);
        }
        None
    }

    /// Decode an inline base64 payload (`Base64Json` / `Base64Svg`).
    ///
    /// Returns `None` for non-inline URIs or undecodable payloads.
    pub fn decode_inline(&self) -> Option<Vec<u8>> {
        let encoded = self
            .0
            .strip_prefix(BASE64_JSON_PREFIX)
            .or_else(|| self.0.strip_prefix(BASE64_TEXT_PREFIX))
            .or_else(|| self.0.strip_prefix(BASE64_SVG_PREFIX))?;
        // Some inline payloads are additionally URL-encoded.
        let encoded = encoded.trim();
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .or_else(|_| {
                let unescaped = urlencoding::decode(encoded)
                    .map(|decoded| decoded.into_owned())
                    .unwrap_or_else(|_| encoded.to_string());
                base64::engine::general_purpose::STANDARD.decode(unescaped.trim())
            })
            .ok()
    }
}

impl fmt::Display for TokenUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TokenUri {
    fn from(raw: &str) -> Self {
        TokenUri::new(raw)
    }
}

/// Bare Arweave transaction ids are 43 characters of base64url.
fn is_arweave_tx_id(s: &str) -> bool {
    s.len() == 43
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Sanitize a JSON string by filtering control characters and escaping
/// unescaped double quotes inside string values.
///
/// Broken metadata of this shape exists on-chain (names containing raw
/// quotes); parsing it verbatim fails, so the string is repaired before
/// handing it to serde.
pub fn sanitize_json_string(s: &str) -> String {
    let filtered: String = s
        .chars()
        .filter(|c| !c.is_ascii_control() || *c == '\n' || *c == '\r' || *c == '\t')
        .collect();

    let mut result = String::with_capacity(filtered.len());
    let mut chars = filtered.chars().peekable();
    let mut in_string = false;
    let mut backslash_count: usize = 0;

    while let Some(c) = chars.next() {
        if !in_string {
            if c == '"' {
                in_string = true;
                backslash_count = 0;
            }
            result.push(c);
            continue;
        }

        if c == '\\' {
            backslash_count += 1;
            result.push('\\');
            continue;
        }

        if c == '"' {
            if backslash_count % 2 == 0 {
                // Unescaped quote: decide whether it terminates the string
                // by peeking past whitespace for a structural character.
                let mut lookahead = chars.clone();
                while let Some(&next) = lookahead.peek() {
                    if next.is_whitespace() {
                        lookahead.next();
                    } else {
                        break;
                    }
                }
                match lookahead.peek() {
                    Some(&next) if next != ':' && next != ',' && next != '}' && next != ']' => {
                        // Interior quote; escape it.
                        result.push_str("\\\"");
                    }
                    _ => {
                        result.push('"');
                        in_string = false;
                    }
                }
            } else {
                result.push('"');
            }
            backslash_count = 0;
            continue;
        }

        result.push(c);
        backslash_count = 0;
    }

    result
}
