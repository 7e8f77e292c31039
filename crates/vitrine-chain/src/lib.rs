//! EVM chain access: the [`ChainClient`] seam the pipeline consumes, its
//! JSON-RPC implementation, and transfer-log decoding.

pub mod client;
pub mod events;
pub mod jsonrpc;

pub use client::ChainClient;
pub use events::{decode_transfer_logs, transfer_topics};
pub use jsonrpc::{JsonRpcChainClient, JsonRpcConfig};
