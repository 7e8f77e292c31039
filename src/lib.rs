//! Vitrine - NFT transfer indexing and token-media resolution pipeline.
//!
//! Mirrors on-chain NFT transfer activity into Postgres and resolves each
//! token's metadata URI into servable media cached in blob storage. The
//! engine is built from four cooperating parts:
//!
//! - [`catchup::CatchUpCoordinator`] drives chunked log retrieval over a
//!   block range, advancing a durable checkpoint per chunk.
//! - [`merger::TokenMerger`] folds decoded transfer events into token and
//!   contract rows via atomic upserts.
//! - [`resolver::ContractResolver`] resolves contract owner/creator with a
//!   shared cache and single-flight deduplication.
//! - [`media::MediaPipeline`] sweeps tokens without media through the URI
//!   resolver and preview builder.

pub mod catchup;
pub mod maintenance;
pub mod media;
pub mod merger;
pub mod resolver;

pub use catchup::{CatchUpConfig, CatchUpCoordinator, CatchUpReport};
pub use maintenance::merge_all_duplicates;
pub use media::{MediaPassReport, MediaPipeline, MediaPipelineConfig};
pub use merger::{MergeOutcome, TokenMerger};
pub use resolver::ContractResolver;
