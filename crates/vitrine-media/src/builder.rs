//! Media classification and publication.
//!
//! Takes a token's metadata document, picks the media candidate via the
//! chain's keyword table, fetches it through the URI resolver, sniffs the
//! bytes, builds a preview where applicable, and publishes both to blob
//! storage under deterministic token-addressed keys. Produces the
//! [`MediaRecord`] for the persistence layer to save (supersession of the
//! previous active record happens there, inside one transaction).

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use thiserror::Error;
use vitrine_common::{
    sniff_media_type, Chain, MediaRecord, MediaType, TokenMetadata, TokenUri,
};

use crate::blob::BlobStorage;
use crate::preview::{build_image_preview, build_video_preview, PreviewError};
use crate::resolver::{ResolveError, UriResolver};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("metadata has no recognized media field")]
    NoMediaField,
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("preview generation failed: {0}")]
    Preview(#[from] PreviewError),
    #[error("blob upload failed: {0}")]
    Upload(anyhow::Error),
}

pub struct MediaProcessor {
    resolver: Arc<UriResolver>,
    blob_store: Arc<dyn BlobStorage>,
}

impl MediaProcessor {
    pub fn new(resolver: Arc<UriResolver>, blob_store: Arc<dyn BlobStorage>) -> Self {
        Self {
            resolver,
            blob_store,
        }
    }

    /// Deterministic token-addressed object key.
    fn media_key(chain: Chain, contract: Address, token_id: U256) -> String {
        format!("media/{}/{:#x}-{:#x}", chain, contract, token_id)
    }

    /// Build (and publish) the media record for one token definition.
    pub async fn build_media(
        &self,
        chain: Chain,
        contract: Address,
        token_id: U256,
        metadata: &TokenMetadata,
    ) -> Result<MediaRecord, MediaError> {
        let candidates = metadata.media_candidates(chain);
        let uri = candidates.primary().ok_or(MediaError::NoMediaField)?;
        self.build_media_from_uri(chain, contract, token_id, uri)
            .await
    }

    /// Same as [`build_media`], for callers that already hold the media URI
    /// (refresh passes, tokens whose metadata *is* the media).
    pub async fn build_media_from_uri(
        &self,
        chain: Chain,
        contract: Address,
        token_id: U256,
        uri: &TokenUri,
    ) -> Result<MediaRecord, MediaError> {
        let resolved = self.resolver.resolve(uri).await?;
        let (media_type, sniffed_content_type) = sniff_media_type(&resolved.bytes);
        let key = Self::media_key(chain, contract, token_id);

        tracing::debug!(
            target: "vitrine_media::builder",
            %chain,
            contract = %contract,
            token_id = %token_id,
            media_type = %media_type,
            size = resolved.bytes.len(),
            "classified media"
        );

        let record = match media_type {
            MediaType::Svg => {
                // Vector content needs no raster preview; the SVG itself is
                // both the media and its own thumbnail.
                let url = self
                    .blob_store
                    .put(&key, resolved.bytes, "image/svg+xml")
                    .await
                    .map_err(MediaError::Upload)?;
                MediaRecord {
                    id: None,
                    chain,
                    contract,
                    token_id,
                    media_type,
                    media_url: url,
                    thumbnail_url: None,
                    dimensions: None,
                    active: true,
                    deleted: false,
                }
            }
            MediaType::Image | MediaType::Gif => {
                let preview = build_image_preview(&resolved.bytes)?;
                let url = self
                    .blob_store
                    .put(&key, resolved.bytes, sniffed_content_type)
                    .await
                    .map_err(MediaError::Upload)?;
                let thumb_url = self
                    .blob_store
                    .put(
                        &format!("{key}-thumb"),
                        preview.bytes,
                        preview.content_type,
                    )
                    .await
                    .map_err(MediaError::Upload)?;
                MediaRecord {
                    id: None,
                    chain,
                    contract,
                    token_id,
                    media_type,
                    media_url: url,
                    thumbnail_url: Some(thumb_url),
                    dimensions: Some(preview.source_dimensions),
                    active: true,
                    deleted: false,
                }
            }
            MediaType::Video | MediaType::Animation => {
                let url = self
                    .blob_store
                    .put(&key, resolved.bytes.clone(), sniffed_content_type)
                    .await
                    .map_err(MediaError::Upload)?;

                // First-frame thumbnail is best-effort: no ffmpeg (or an
                // undecodable container) leaves the record without one.
                let mut thumbnail_url = None;
                let mut dimensions = None;
                if media_type == MediaType::Video {
                    match build_video_preview(&resolved.bytes).await {
                        Ok(preview) => {
                            let thumb_url = self
                                .blob_store
                                .put(
                                    &format!("{key}-thumb"),
                                    preview.bytes,
                                    preview.content_type,
                                )
                                .await
                                .map_err(MediaError::Upload)?;
                            dimensions = Some(preview.source_dimensions);
                            thumbnail_url = Some(thumb_url);
                        }
                        Err(err) => {
                            tracing::warn!(
                                target: "vitrine_media::builder",
                                contract = %contract,
                                token_id = %token_id,
                                error = %err,
                                "video thumbnail unavailable"
                            );
                        }
                    }
                }

                MediaRecord {
                    id: None,
                    chain,
                    contract,
                    token_id,
                    media_type,
                    media_url: url,
                    thumbnail_url,
                    dimensions,
                    active: true,
                    deleted: false,
                }
            }
            // Unclassifiable payloads are recorded uncached: the original
            // URI is kept as the media URL so clients can still try it.
            MediaType::Html | MediaType::Text | MediaType::Json | MediaType::Audio
            | MediaType::Unknown => MediaRecord {
                id: None,
                chain,
                contract,
                token_id,
                media_type,
                media_url: uri.to_string(),
                thumbnail_url: None,
                dimensions: None,
                active: true,
                deleted: false,
            },
        };

        Ok(record)
    }
}
