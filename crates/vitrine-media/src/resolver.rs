//! URI resolution: classify a token URI by scheme and fetch its bytes.
//!
//! Inline `data:` payloads decode without touching the network. IPFS and
//! Arweave URIs go through a configured gateway list with a bounded timeout
//! per gateway attempt; a gateway timeout or non-2xx falls through to the
//! next gateway before any error surfaces. Plain HTTP URLs have no
//! alternates and instead get a small retry budget for transient transport
//! errors (never for 4xx).

use std::time::Duration;

use thiserror::Error;
use vitrine_common::{TokenUri, UriType};

const DEFAULT_IPFS_GATEWAYS: &[&str] = &["https://ipfs.io", "https://cloudflare-ipfs.com"];
const DEFAULT_ARWEAVE_GATEWAYS: &[&str] = &["https://arweave.net", "https://ar-io.net"];

/// Default cap on fetched payloads. Tokens pointing at multi-hundred-MB
/// videos exist; the pipeline refuses to buffer them.
const DEFAULT_MAX_RESPONSE_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// IPFS gateway base URLs, tried in order.
    pub ipfs_gateways: Vec<String>,
    /// Arweave gateway base URLs, tried in order.
    pub arweave_gateways: Vec<String>,
    /// Timeout per gateway attempt / HTTP request.
    pub gateway_timeout: Duration,
    /// Retry budget for transient HTTP errors.
    pub http_retries: usize,
    /// Initial backoff between HTTP retries (doubles per attempt).
    pub retry_backoff: Duration,
    /// Hard cap on response size.
    pub max_response_bytes: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ipfs_gateways: DEFAULT_IPFS_GATEWAYS.iter().map(|s| s.to_string()).collect(),
            arweave_gateways: DEFAULT_ARWEAVE_GATEWAYS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            gateway_timeout: Duration::from_secs(5),
            http_retries: 2,
            retry_backoff: Duration::from_millis(250),
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The URI does not match any supported scheme. A classification
    /// error, not a fetch error: retrying will not help.
    #[error("unsupported uri scheme: {0:?}")]
    UnsupportedScheme(String),

    #[error("inline data uri failed to decode")]
    InlineDecode,

    /// Definitive HTTP rejection (4xx); not retried.
    #[error("{url} returned status {status}")]
    Rejected { url: String, status: u16 },

    /// Every configured gateway failed.
    #[error("all gateways failed for {uri}; last error: {last_error}")]
    GatewaysExhausted { uri: String, last_error: String },

    /// Transport failure that survived the retry budget.
    #[error("fetching {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("response exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

impl ResolveError {
    /// Classification errors are permanent; fetch errors may clear up.
    pub fn is_classification(&self) -> bool {
        matches!(self, ResolveError::UnsupportedScheme(_))
    }
}

/// The outcome of resolving a URI: its classification plus the raw bytes.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub uri_type: UriType,
    pub bytes: Vec<u8>,
    /// Server-reported content type, when fetched over HTTP. Advisory only;
    /// classification goes by sniffing the bytes.
    pub content_type: Option<String>,
}

pub struct UriResolver {
    config: ResolverConfig,
    client: reqwest::Client,
}

impl UriResolver {
    pub fn new(config: ResolverConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.gateway_timeout)
            .build()?;
        Ok(Self { config, client })
    }

    /// Classify and fetch a token URI.
    pub async fn resolve(&self, uri: &TokenUri) -> Result<Resolved, ResolveError> {
        let uri_type = uri.uri_type();
        match uri_type {
            UriType::Base64Json | UriType::Base64Svg => {
                let bytes = uri.decode_inline().ok_or(ResolveError::InlineDecode)?;
                Ok(Resolved {
                    uri_type,
                    bytes,
                    content_type: None,
                })
            }
            UriType::Ipfs => {
                let path = uri.ipfs_path().ok_or(ResolveError::InlineDecode)?;
                let urls: Vec<String> = self
                    .config
                    .ipfs_gateways
                    .iter()
                    .map(|gateway| format!("{}/ipfs/{}", gateway.trim_end_matches('/'), path))
                    .collect();
                self.fetch_via_gateways(uri.as_str(), &urls)
                    .await
                    .map(|(bytes, content_type)| Resolved {
                        uri_type,
                        bytes,
                        content_type,
                    })
            }
            UriType::Arweave => {
                let tx_id = uri.arweave_tx_id().ok_or(ResolveError::InlineDecode)?;
                let urls: Vec<String> = self
                    .config
                    .arweave_gateways
                    .iter()
                    .map(|gateway| format!("{}/{}", gateway.trim_end_matches('/'), tx_id))
                    .collect();
                self.fetch_via_gateways(uri.as_str(), &urls)
                    .await
                    .map(|(bytes, content_type)| Resolved {
                        uri_type,
                        bytes,
                        content_type,
                    })
            }
            UriType::Http | UriType::IpfsApi => self
                .fetch_http_with_retry(uri.as_str())
                .await
                .map(|(bytes, content_type)| Resolved {
                    uri_type,
                    bytes,
                    content_type,
                }),
            UriType::Unknown => Err(ResolveError::UnsupportedScheme(truncate_for_error(
                uri.as_str(),
            ))),
        }
    }

    /// Try each gateway once, in order; first success wins.
    async fn fetch_via_gateways(
        &self,
        original_uri: &str,
        urls: &[String],
    ) -> Result<(Vec<u8>, Option<String>), ResolveError> {
        let mut last_error = String::from("no gateways configured");
        for url in urls {
            match self.fetch_once(url).await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    tracing::debug!(
                        target: "vitrine_media::resolver",
                        url = %url,
                        error = %err,
                        "gateway attempt failed, falling through"
                    );
                    last_error = err.to_string();
                }
            }
        }
        Err(ResolveError::GatewaysExhausted {
            uri: truncate_for_error(original_uri),
            last_error,
        })
    }

    /// Fetch a plain HTTP URL with exponential backoff on transient errors.
    async fn fetch_http_with_retry(
        &self,
        url: &str,
    ) -> Result<(Vec<u8>, Option<String>), ResolveError> {
        let mut attempts = 0;
        let mut backoff = self.config.retry_backoff;
        loop {
            match self.fetch_once(url).await {
                Ok(result) => return Ok(result),
                // 4xx and oversize responses are definitive.
                Err(err @ (ResolveError::Rejected { .. } | ResolveError::TooLarge { .. })) => {
                    return Err(err)
                }
                Err(err) if attempts < self.config.http_retries => {
                    attempts += 1;
                    tracing::debug!(
                        target: "vitrine_media::resolver",
                        url = %url,
                        attempt = attempts,
                        error = %err,
                        "http fetch failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One GET with the per-attempt timeout, status check, and size cap.
    async fn fetch_once(&self, url: &str) -> Result<(Vec<u8>, Option<String>), ResolveError> {
        let response = self
            .client
            .get(url)
            .timeout(self.config.gateway_timeout)
            .send()
            .await
            .map_err(|err| ResolveError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if status.is_client_error() {
            return Err(ResolveError::Rejected {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(ResolveError::Transport {
                url: url.to_string(),
                message: format!("status {status}"),
            });
        }

        if let Some(length) = response.content_length() {
            if length as usize > self.config.max_response_bytes {
                return Err(ResolveError::TooLarge {
                    limit: self.config.max_response_bytes,
                });
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|err| ResolveError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        if bytes.len() > self.config.max_response_bytes {
            return Err(ResolveError::TooLarge {
                limit: self.config.max_response_bytes,
            });
        }

        Ok((bytes.to_vec(), content_type))
    }
}

fn truncate_for_error(s: &str) -> String {
    const MAX: usize = 120;
    if s.len() <= MAX {
        s.to_string()
    } else {
        let cut = s
            .char_indices()
            .take_while(|(i, _)| *i < MAX)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(MAX);
        format!("{}…", &s[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inline_json_resolves_without_network() {
        let resolver = UriResolver::new(ResolverConfig::default()).unwrap();
        let uri = TokenUri::new("data:application/json;base64,eyJuYW1lIjoidGVzdCJ9");
        let resolved = resolver.resolve(&uri).await.unwrap();
        assert_eq!(resolved.uri_type, UriType::Base64Json);
        assert_eq!(resolved.bytes, br#"{"name":"test"}"#);
    }

    #[tokio::test]
    async fn test_inline_svg_resolves_without_network() {
        let resolver = UriResolver::new(ResolverConfig::default()).unwrap();
        let uri = TokenUri::new("data:image/svg+xml;base64,PHN2Zz48L3N2Zz4=");
        let resolved = resolver.resolve(&uri).await.unwrap();
        assert_eq!(resolved.uri_type, UriType::Base64Svg);
        assert_eq!(resolved.bytes, b"<svg></svg>");
    }

    #[tokio::test]
    async fn test_unknown_scheme_is_classification_error() {
        let resolver = UriResolver::new(ResolverConfig::default()).unwrap();
        let err = resolver
            .resolve(&TokenUri::new("mystery://nothing"))
            .await
            .unwrap_err();
        assert!(err.is_classification());
    }

    #[tokio::test]
    async fn test_bad_inline_payload() {
        let resolver = UriResolver::new(ResolverConfig::default()).unwrap();
        let err = resolver
            .resolve(&TokenUri::new("data:application/json;base64,%%%%"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::InlineDecode));
    }
}
