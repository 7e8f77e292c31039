//! Configuration for the vitrine indexer.

use clap::Parser;
use vitrine_common::Chain;

/// NFT transfer indexer and token-media resolver
///
/// Mirrors on-chain NFT transfer activity into Postgres and resolves token
/// metadata URIs into servable media cached in blob storage.
///
/// # Examples
///
/// ```bash
/// # One-shot catch-up over a block range
/// vitrine-indexer --from-block 15000000 --to-block 15100000
///
/// # Catch up from the stored checkpoint and keep following the head
/// vitrine-indexer --follow
///
/// # Maintenance: repair duplicate token rows, re-resolve missing owners
/// vitrine-indexer --merge-duplicates --resolve-missing-owners --skip-catchup
/// ```
#[derive(Parser, Debug)]
#[command(name = "vitrine-indexer")]
#[command(about = "Index NFT transfers and resolve token media", long_about = None)]
pub struct Config {
    /// Ethereum JSON-RPC URL
    #[arg(long, env = "ETH_RPC_URL", default_value = "http://localhost:8545")]
    pub rpc_url: String,

    /// Postgres connection URL
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost/vitrine"
    )]
    pub database_url: String,

    /// Maximum Postgres connections
    #[arg(long, default_value = "10")]
    pub db_max_connections: u32,

    /// Chain being indexed
    #[arg(long, default_value = "ethereum")]
    pub chain: Chain,

    /// Starting block number (ignored when a later checkpoint exists)
    #[arg(long, default_value = "0")]
    pub from_block: u64,

    /// Ending block number (None = current chain head)
    #[arg(long)]
    pub to_block: Option<u64>,

    /// Blocks per eth_getLogs call
    ///
    /// Providers cap response sizes; a few thousand blocks per call is the
    /// practical ceiling on busy chains.
    #[arg(long, default_value = "2000")]
    pub chunk_size: u64,

    /// Keep polling the chain head after catch-up completes
    #[arg(long)]
    pub follow: bool,

    /// Head-polling interval in seconds (follow mode)
    #[arg(long, default_value = "12")]
    pub poll_interval_secs: u64,

    /// Skip the catch-up run (maintenance-only invocations)
    #[arg(long)]
    pub skip_catchup: bool,

    /// Skip contract owner resolution during catch-up
    #[arg(long)]
    pub skip_owner_resolution: bool,

    /// Concurrent on-chain owner resolutions
    #[arg(long, default_value = "8")]
    pub owner_concurrency: usize,

    /// Run the media backfill pass after catch-up
    #[arg(long)]
    pub media_pass: bool,

    /// Tokens per media sweep
    #[arg(long, default_value = "200")]
    pub media_batch_size: i64,

    /// Concurrent token media pipelines
    #[arg(long, default_value = "8")]
    pub media_concurrency: usize,

    /// Run the duplicate-token repair pass
    #[arg(long)]
    pub merge_duplicates: bool,

    /// Re-resolve contracts whose owner is still unresolved
    #[arg(long)]
    pub resolve_missing_owners: bool,

    /// IPFS gateway base URLs, tried in order (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "https://ipfs.io,https://cloudflare-ipfs.com"
    )]
    pub ipfs_gateways: Vec<String>,

    /// Arweave gateway base URLs, tried in order (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "https://arweave.net,https://ar-io.net"
    )]
    pub arweave_gateways: Vec<String>,

    /// Per-gateway fetch timeout in seconds
    #[arg(long, default_value = "5")]
    pub gateway_timeout_secs: u64,

    /// Directory where published media blobs are written
    #[arg(long, default_value = "./vitrine-media")]
    pub blob_dir: String,

    /// Public base URL the blob directory is served from
    #[arg(long, default_value = "http://localhost:8080/media")]
    pub blob_base_url: String,
}
