//! Alloy-backed [`ChainClient`] implementation.
//!
//! Wraps a `DynProvider` with per-call timeouts and bounded retries for the
//! calls the pipeline makes. Contract calls that revert or hit a missing
//! selector resolve to `None` rather than an error; only transport-level
//! failures surface after the retry budget is spent.

use crate::client::ChainClient;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{BlockId, Filter, Log};
use alloy::sol;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::future::{Future, IntoFuture};
use std::time::Duration;
use tokio::time::sleep;
use url::Url;
use vitrine_common::{TokenType, TokenUri};

sol! {
    #[sol(rpc)]
    contract Erc721Abi {
        function tokenURI(uint256 tokenId) external view returns (string);
        function ownerOf(uint256 tokenId) external view returns (address);
        function owner() external view returns (address);
        function name() external view returns (string);
        function symbol() external view returns (string);
    }

    #[sol(rpc)]
    contract Erc1155Abi {
        function uri(uint256 id) external view returns (string);
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcConfig {
    pub rpc_url: String,
    #[serde(default)]
    pub request_retry: Option<usize>,
    #[serde(default)]
    pub request_backoff_ms: Option<u64>,
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,
}

impl JsonRpcConfig {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            request_retry: None,
            request_backoff_ms: None,
            call_timeout_secs: None,
        }
    }
}

pub struct JsonRpcChainClient {
    provider: DynProvider,
    request_retry: usize,
    request_backoff: Duration,
    call_timeout: Duration,
}

impl JsonRpcChainClient {
    pub fn new(config: JsonRpcConfig) -> Result<Self> {
        let url: Url = config
            .rpc_url
            .parse()
            .with_context(|| format!("invalid rpc url: {}", config.rpc_url))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();

        Ok(Self {
            provider,
            request_retry: config.request_retry.unwrap_or(2),
            request_backoff: Duration::from_millis(config.request_backoff_ms.unwrap_or(250)),
            call_timeout: Duration::from_secs(config.call_timeout_secs.unwrap_or(10)),
        })
    }

    /// Run a call with the per-call timeout and retry-with-backoff budget.
    async fn with_retry<T, F, Fut, E>(&self, label: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempts = 0;
        loop {
            match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) if attempts < self.request_retry => {
                    attempts += 1;
                    tracing::warn!(
                        target: "vitrine_chain::jsonrpc",
                        call = label,
                        attempt = attempts,
                        error = %err,
                        "rpc call failed, backing off"
                    );
                    sleep(self.request_backoff).await;
                }
                Ok(Err(err)) => return Err(anyhow!("{label} failed: {err}")),
                Err(_) if attempts < self.request_retry => {
                    attempts += 1;
                    tracing::warn!(
                        target: "vitrine_chain::jsonrpc",
                        call = label,
                        attempt = attempts,
                        timeout_secs = self.call_timeout.as_secs(),
                        "rpc call timed out, backing off"
                    );
                    sleep(self.request_backoff).await;
                }
                Err(_) => {
                    return Err(anyhow!(
                        "{label} timed out after {}s",
                        self.call_timeout.as_secs()
                    ))
                }
            }
        }
    }

    /// A contract call that reverts or lacks the selector yields `None`.
    async fn optional_call<T, Fut>(&self, label: &str, fut: Fut) -> Option<T>
    where
        Fut: IntoFuture<Output = Result<T, alloy::contract::Error>>,
    {
        match tokio::time::timeout(self.call_timeout, fut.into_future()).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                tracing::debug!(
                    target: "vitrine_chain::jsonrpc",
                    call = label,
                    error = %err,
                    "contract call failed"
                );
                None
            }
            Err(_) => {
                tracing::debug!(
                    target: "vitrine_chain::jsonrpc",
                    call = label,
                    timeout_secs = self.call_timeout.as_secs(),
                    "contract call timed out"
                );
                None
            }
        }
    }

    /// First block at which the address has code, found by binary search.
    async fn creation_block(&self, contract: Address, latest: u64) -> Result<Option<u64>> {
        let code = self
            .with_retry("eth_getCode", || {
                self.provider
                    .get_code_at(contract)
                    .block_id(BlockId::number(latest))
                    .into_future()
            })
            .await?;
        if code.is_empty() {
            return Ok(None);
        }

        let (mut lo, mut hi) = (0u64, latest);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let code = self
                .with_retry("eth_getCode", || {
                    self.provider
                        .get_code_at(contract)
                        .block_id(BlockId::number(mid))
                        .into_future()
                })
                .await?;
            if code.is_empty() {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(Some(lo))
    }
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn latest_block(&self) -> Result<u64> {
        self.with_retry("eth_blockNumber", || self.provider.get_block_number())
            .await
    }

    async fn get_logs(&self, from_block: u64, to_block: u64, topics: &[B256]) -> Result<Vec<Log>> {
        let filter = Filter::new()
            .select(from_block..=to_block)
            .event_signature(topics.to_vec());
        self.with_retry("eth_getLogs", || self.provider.get_logs(&filter))
            .await
    }

    async fn token_uri(
        &self,
        contract: Address,
        token_id: U256,
        token_type: TokenType,
    ) -> Result<Option<TokenUri>> {
        let erc721 = Erc721Abi::new(contract, self.provider.clone());
        let erc1155 = Erc1155Abi::new(contract, self.provider.clone());

        // Try the standard's own selector first, then the sibling: ERC-721
        // contracts occasionally expose uri() and vice versa.
        let raw = match token_type {
            TokenType::Erc721 => {
                match self
                    .optional_call("tokenURI", erc721.tokenURI(token_id).call())
                    .await
                {
                    Some(uri) => Some(uri),
                    None => self.optional_call("uri", erc1155.uri(token_id).call()).await,
                }
            }
            TokenType::Erc1155 => {
                match self.optional_call("uri", erc1155.uri(token_id).call()).await {
                    Some(uri) => Some(uri),
                    None => {
                        self.optional_call("tokenURI", erc721.tokenURI(token_id).call())
                            .await
                    }
                }
            }
        };

        Ok(raw
            .map(TokenUri::new)
            .filter(|uri| !uri.is_empty())
            .map(|uri| match token_type {
                TokenType::Erc1155 => uri.with_id_substitution(token_id),
                TokenType::Erc721 => uri,
            }))
    }

    async fn owner_of(&self, contract: Address, token_id: U256) -> Result<Option<Address>> {
        let erc721 = Erc721Abi::new(contract, self.provider.clone());
        Ok(self
            .optional_call("ownerOf", erc721.ownerOf(token_id).call())
            .await)
    }

    async fn contract_owner(&self, contract: Address) -> Result<Option<Address>> {
        let erc721 = Erc721Abi::new(contract, self.provider.clone());
        Ok(self
            .optional_call("owner", erc721.owner().call())
            .await
            .filter(|owner| *owner != Address::ZERO))
    }

    async fn contract_creator(&self, contract: Address) -> Result<Option<Address>> {
        let latest = self.latest_block().await?;
        let Some(creation_block) = self.creation_block(contract, latest).await? else {
            return Ok(None);
        };

        let receipts = self
            .with_retry("eth_getBlockReceipts", || {
                self.provider
                    .get_block_receipts(BlockId::number(creation_block))
            })
            .await?;

        let creator = receipts.into_iter().flatten().find_map(|receipt| {
            (receipt.contract_address == Some(contract)).then_some(receipt.from)
        });

        if creator.is_none() {
            // Contracts deployed by factories have no creation receipt of
            // their own; the deployment is an internal transaction.
            tracing::debug!(
                target: "vitrine_chain::jsonrpc",
                contract = %contract,
                block = creation_block,
                "no creation receipt found in creation block"
            );
        }
        Ok(creator)
    }

    async fn contract_name_symbol(
        &self,
        contract: Address,
    ) -> Result<(Option<String>, Option<String>)> {
        let erc721 = Erc721Abi::new(contract, self.provider.clone());
        let name = self
            .optional_call("name", erc721.name().call())
            .await
            .filter(|name| !name.is_empty());
        let symbol = self
            .optional_call("symbol", erc721.symbol().call())
            .await
            .filter(|symbol| !symbol.is_empty());
        Ok((name, symbol))
    }
}
