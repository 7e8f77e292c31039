//! The chain-access seam consumed by the pipeline.

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use anyhow::Result;
use async_trait::async_trait;
use vitrine_common::{TokenType, TokenUri};

/// JSON-RPC chain access as the pipeline needs it.
///
/// Every method takes a bounded amount of time: implementations apply
/// per-call timeouts and bounded retries internally, so callers treat an
/// `Err` as already-retried. "The contract doesn't expose this" is `None`,
/// not an error.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Number of the most recent block.
    async fn latest_block(&self) -> Result<u64>;

    /// All logs in `[from_block, to_block]` whose topic-0 is in `topics`.
    async fn get_logs(&self, from_block: u64, to_block: u64, topics: &[B256]) -> Result<Vec<Log>>;

    /// The token's declared metadata URI (`tokenURI` / `uri`), with the
    /// ERC-1155 `{id}` placeholder already substituted.
    async fn token_uri(
        &self,
        contract: Address,
        token_id: U256,
        token_type: TokenType,
    ) -> Result<Option<TokenUri>>;

    /// Current owner per `ownerOf`, if the contract exposes it.
    async fn owner_of(&self, contract: Address, token_id: U256) -> Result<Option<Address>>;

    /// `owner()` of an Ownable contract.
    async fn contract_owner(&self, contract: Address) -> Result<Option<Address>>;

    /// Sender of the contract-creation transaction.
    async fn contract_creator(&self, contract: Address) -> Result<Option<Address>>;

    /// Collection `name()` / `symbol()`, each independently optional.
    async fn contract_name_symbol(
        &self,
        contract: Address,
    ) -> Result<(Option<String>, Option<String>)>;
}
