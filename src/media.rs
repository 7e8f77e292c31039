//! Media backfill pass: sweep tokens without an active media record through
//! the URI resolver and preview builder.
//!
//! Media resolution is decoupled from transfer indexing: the catch-up path
//! only writes ownership. This pass picks up tokens with no active media
//! record, fetches their metadata, builds and publishes media, and saves
//! the record with supersession. Failures are isolated per token: a token
//! that fails stays media-less and is picked up again by a later pass.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use vitrine_chain::ChainClient;
use vitrine_common::{sniff_media_type, MediaRecord, MediaType, Token, TokenMetadata, TokenUri};
use vitrine_media::{MediaProcessor, UriResolver};
use vitrine_storage::{MediaRepo, TokenRepo};

#[derive(Debug, Clone)]
pub struct MediaPipelineConfig {
    /// Tokens per sweep.
    pub batch_size: i64,
    /// Concurrent token pipelines.
    pub worker_concurrency: usize,
}

impl Default for MediaPipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            worker_concurrency: 8,
        }
    }
}

/// Aggregate outcome of one sweep. Per-token failures are already logged;
/// the counts let the caller decide whether another pass is worthwhile.
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaPassReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Tokens whose contract exposes no URI; retrying is pointless until a
    /// metadata-bearing event shows up.
    pub no_uri: usize,
}

enum TokenOutcome {
    Succeeded,
    NoUri,
    Failed,
    Cancelled,
}

#[derive(Clone)]
pub struct MediaPipeline {
    client: Arc<dyn ChainClient>,
    resolver: Arc<UriResolver>,
    processor: Arc<MediaProcessor>,
    tokens: TokenRepo,
    media: MediaRepo,
    config: MediaPipelineConfig,
    cancel: CancellationToken,
}

impl MediaPipeline {
    pub fn new(
        client: Arc<dyn ChainClient>,
        resolver: Arc<UriResolver>,
        processor: Arc<MediaProcessor>,
        tokens: TokenRepo,
        media: MediaRepo,
        config: MediaPipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            resolver,
            processor,
            tokens,
            media,
            config,
            cancel,
        }
    }

    /// Run one sweep over media-less tokens with bounded concurrency.
    pub async fn process_medialess(&self) -> Result<MediaPassReport> {
        let batch = self
            .tokens
            .medialess_tokens(self.config.batch_size)
            .await
            .context("listing medialess tokens")?;

        if batch.is_empty() {
            return Ok(MediaPassReport::default());
        }

        tracing::info!(
            target: "vitrine::media",
            tokens = batch.len(),
            concurrency = self.config.worker_concurrency,
            "starting media pass"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.worker_concurrency.max(1)));
        let mut join_set = JoinSet::new();

        for token in batch {
            let this = self.clone();
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return TokenOutcome::Cancelled;
                };
                tokio::select! {
                    _ = this.cancel.cancelled() => TokenOutcome::Cancelled,
                    outcome = this.process_token(&token) => outcome,
                }
            });
        }

        let mut report = MediaPassReport::default();
        while let Some(joined) = join_set.join_next().await {
            report.processed += 1;
            match joined {
                Ok(TokenOutcome::Succeeded) => report.succeeded += 1,
                Ok(TokenOutcome::NoUri) => report.no_uri += 1,
                Ok(TokenOutcome::Failed) | Err(_) => report.failed += 1,
                Ok(TokenOutcome::Cancelled) => {}
            }
        }

        tracing::info!(
            target: "vitrine::media",
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            no_uri = report.no_uri,
            "media pass complete"
        );
        Ok(report)
    }

    /// Resolve and publish media for a single token. Never propagates an
    /// error; the outcome feeds the aggregate report and the token remains
    /// eligible for the next pass.
    async fn process_token(&self, token: &Token) -> TokenOutcome {
        let uri = match self
            .client
            .token_uri(token.contract, token.token_id, token.token_type)
            .await
        {
            Ok(Some(uri)) => uri,
            Ok(None) => {
                tracing::debug!(
                    target: "vitrine::media",
                    contract = %token.contract,
                    token_id = %token.token_id,
                    "token exposes no URI"
                );
                return TokenOutcome::NoUri;
            }
            Err(err) => {
                tracing::warn!(
                    target: "vitrine::media",
                    contract = %token.contract,
                    token_id = %token.token_id,
                    error = %err,
                    "token URI fetch failed"
                );
                return TokenOutcome::Failed;
            }
        };

        let record = match self.build_record(token, &uri).await {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(
                    target: "vitrine::media",
                    contract = %token.contract,
                    token_id = %token.token_id,
                    uri = %uri,
                    error = %err,
                    "media resolution failed"
                );
                return TokenOutcome::Failed;
            }
        };

        match self.media.save_with_supersession(&record).await {
            Ok(_) => TokenOutcome::Succeeded,
            Err(err) => {
                tracing::warn!(
                    target: "vitrine::media",
                    contract = %token.contract,
                    token_id = %token.token_id,
                    error = %err,
                    "failed to save media record"
                );
                TokenOutcome::Failed
            }
        }
    }

    /// Fetch what the token URI points at and turn it into a media record.
    ///
    /// Most URIs resolve to a metadata JSON document whose media field is
    /// then fetched; some point straight at the media (inline SVGs, plain
    /// image URLs), which short-circuits the metadata step.
    async fn build_record(&self, token: &Token, uri: &TokenUri) -> Result<MediaRecord> {
        let resolved = self.resolver.resolve(uri).await?;
        let (payload_type, _) = sniff_media_type(&resolved.bytes);

        if payload_type == MediaType::Json {
            let metadata = TokenMetadata::from_bytes(&resolved.bytes)?;
            let record = self
                .processor
                .build_media(token.chain, token.contract, token.token_id, &metadata)
                .await?;
            return Ok(record);
        }

        // The URI itself is the media.
        let record = self
            .processor
            .build_media_from_uri(token.chain, token.contract, token.token_id, uri)
            .await?;
        Ok(record)
    }
}
