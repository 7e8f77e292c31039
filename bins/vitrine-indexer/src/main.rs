//! Vitrine Indexer - NFT transfer indexing and token-media resolution.
//!
//! # Features
//!
//! - Chunked catch-up over a block range with durable checkpointing
//! - ERC-721 ownership tracking with append-only ownership history
//! - ERC-1155 per-owner balance tracking
//! - Contract owner/creator resolution (Ownable, creation-tx sender)
//! - Token metadata resolution over HTTP, IPFS, Arweave and inline data URIs
//! - Media classification, preview generation, and blob publication
//! - Maintenance passes: duplicate-row repair, missing-owner re-resolution,
//!   media backfill
//!
//! # Usage
//!
//! ```bash
//! # Catch up a range once
//! vitrine-indexer --from-block 15000000 --to-block 15100000
//!
//! # Resume from the checkpoint and follow the chain head
//! vitrine-indexer --follow --media-pass
//! ```

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use config::Config;
use tokio_util::sync::CancellationToken;
use vitrine::{
    merge_all_duplicates, CatchUpConfig, CatchUpCoordinator, ContractResolver, MediaPipeline,
    MediaPipelineConfig, TokenMerger,
};
use vitrine_chain::{ChainClient, JsonRpcChainClient, JsonRpcConfig};
use vitrine_media::{FsBlobStore, MediaProcessor, ResolverConfig, UriResolver};
use vitrine_storage::{ContractRepo, MediaRepo, StatsRepo, TokenRepo};

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    let config = Config::parse();
    run_indexer(config).await
}

async fn run_indexer(config: Config) -> Result<()> {
    tracing::info!("Starting Vitrine Indexer");
    tracing::info!("Chain: {}", config.chain);
    tracing::info!("RPC URL: {}", config.rpc_url);
    tracing::info!("From block: {}", config.from_block);
    if let Some(to_block) = config.to_block {
        tracing::info!("To block: {}", to_block);
    } else {
        tracing::info!("To block: current chain head");
    }

    let pool = vitrine_storage::connect(&config.database_url, config.db_max_connections).await?;
    let contracts = ContractRepo::new(pool.clone());
    let tokens = TokenRepo::new(pool.clone());
    let media = MediaRepo::new(pool.clone());
    let stats = StatsRepo::new(pool);

    let client: Arc<dyn ChainClient> = Arc::new(JsonRpcChainClient::new(JsonRpcConfig::new(
        config.rpc_url.clone(),
    ))?);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested, finishing current chunk");
                cancel.cancel();
            }
        });
    }

    let resolver = Arc::new(ContractResolver::new(
        client.clone(),
        contracts.clone(),
        config.owner_concurrency,
    ));
    let merger = TokenMerger::new(tokens.clone(), contracts.clone());
    let coordinator = CatchUpCoordinator::new(
        client.clone(),
        merger,
        resolver.clone(),
        stats.clone(),
        CatchUpConfig {
            chain: config.chain,
            chunk_size: config.chunk_size,
            resolve_contract_owners: !config.skip_owner_resolution,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
        },
        cancel.clone(),
    );

    let uri_resolver = Arc::new(UriResolver::new(ResolverConfig {
        ipfs_gateways: config.ipfs_gateways.clone(),
        arweave_gateways: config.arweave_gateways.clone(),
        gateway_timeout: Duration::from_secs(config.gateway_timeout_secs),
        ..ResolverConfig::default()
    })?);
    let blob_store = Arc::new(FsBlobStore::new(&config.blob_dir, &config.blob_base_url));
    let processor = Arc::new(MediaProcessor::new(uri_resolver.clone(), blob_store));
    let media_pipeline = MediaPipeline::new(
        client.clone(),
        uri_resolver,
        processor,
        tokens.clone(),
        media,
        MediaPipelineConfig {
            batch_size: config.media_batch_size,
            worker_concurrency: config.media_concurrency,
        },
        cancel.clone(),
    );

    let mut next_block = config.from_block;

    if !config.skip_catchup {
        // Resume from the durable checkpoint when it is ahead of the
        // requested start.
        let checkpoint = stats.checkpoint().await?;
        let start = checkpoint
            .map(|cp| cp.max(config.from_block))
            .unwrap_or(config.from_block);
        let target = match config.to_block {
            Some(to_block) => to_block,
            None => client.latest_block().await?,
        };

        if start <= target {
            let report = coordinator.run(start, target).await?;
            tracing::info!(
                "catch-up finished: {} chunks, {} logs, {} transfers, {} tokens, {} contracts",
                report.chunks,
                report.total_logs,
                report.total_transfers,
                report.total_tokens,
                report.total_contracts,
            );
            next_block = target + 1;
        } else {
            tracing::info!(
                "nothing to catch up (checkpoint {} already past target {})",
                start,
                target
            );
            next_block = start;
        }
    }

    if config.merge_duplicates {
        let summary = merge_all_duplicates(&tokens, 1_000).await?;
        tracing::info!(
            "duplicate repair: {} groups merged ({} rows folded)",
            summary.groups,
            summary.rows_merged
        );
    }

    if config.resolve_missing_owners {
        let resolved = resolver.clone().resolve_missing(500).await?;
        tracing::info!("missing-owner sweep resolved {} contracts", resolved);
    }

    if config.media_pass {
        let report = media_pipeline.process_medialess().await?;
        tracing::info!(
            "media pass: {} processed, {} succeeded, {} failed, {} without uri",
            report.processed,
            report.succeeded,
            report.failed,
            report.no_uri,
        );
    }

    if config.follow && !cancel.is_cancelled() {
        coordinator.follow(next_block).await?;
    }

    tracing::info!("Vitrine shutdown complete");
    Ok(())
}
