//! Contract ownership resolution with a shared cache and single-flight
//! deduplication.
//!
//! Resolution strategies run in priority order: the contract's own
//! `owner()` (Ownable), then the creation-transaction sender. Failure of
//! every strategy is non-fatal: the contract row keeps a NULL owner and
//! stays eligible for the [`resolve_missing`](ContractResolver::resolve_missing)
//! sweep. Concurrent resolutions for one address collapse into a single
//! in-flight call; all callers await the same result.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::Address;
use anyhow::Result;
use tokio::sync::{Mutex, OnceCell, Semaphore};
use vitrine_chain::ChainClient;
use vitrine_common::{Chain, ContractOwnership, OwnerMethod};
use vitrine_storage::ContractRepo;

type CacheKey = (Chain, Address);

pub struct ContractResolver {
    client: Arc<dyn ChainClient>,
    contracts: ContractRepo,
    /// Per-address cells: the OnceCell is the single-flight; concurrent
    /// callers race to initialize it and all but one await.
    cells: Mutex<HashMap<CacheKey, Arc<OnceCell<ContractOwnership>>>>,
    /// Bounds concurrent on-chain resolutions across all workers.
    permits: Semaphore,
}

impl ContractResolver {
    pub fn new(
        client: Arc<dyn ChainClient>,
        contracts: ContractRepo,
        max_concurrent: usize,
    ) -> Self {
        Self {
            client,
            contracts,
            cells: Mutex::new(HashMap::new()),
            permits: Semaphore::new(max_concurrent.max(1)),
        }
    }

    /// Resolve (and cache) a contract's owner and creator.
    ///
    /// Cached results are returned without touching the chain; a miss runs
    /// the strategy chain once no matter how many workers ask at the same
    /// time. Total strategy failure yields an unresolved result, not an
    /// error.
    pub async fn resolve_owner(&self, chain: Chain, address: Address) -> ContractOwnership {
        let cell = {
            let mut cells = self.cells.lock().await;
            cells
                .entry((chain, address))
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        *cell
            .get_or_init(|| async {
                let _permit = self.permits.acquire().await;
                self.resolve_uncached(chain, address).await
            })
            .await
    }

    /// Run the strategy chain without consulting the cache.
    async fn resolve_uncached(&self, chain: Chain, address: Address) -> ContractOwnership {
        // Creator comes from the creation transaction regardless of which
        // owner strategy wins; it is its own column.
        let creator = match self.client.contract_creator(address).await {
            Ok(creator) => creator,
            Err(err) => {
                tracing::debug!(
                    target: "vitrine::resolver",
                    %chain,
                    contract = %address,
                    error = %err,
                    "creator lookup failed"
                );
                None
            }
        };

        match self.client.contract_owner(address).await {
            Ok(Some(owner)) => {
                return ContractOwnership {
                    owner: Some(owner),
                    creator,
                    method: OwnerMethod::Ownable,
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::debug!(
                    target: "vitrine::resolver",
                    %chain,
                    contract = %address,
                    error = %err,
                    "owner() lookup failed"
                );
            }
        }

        if let Some(creator) = creator {
            return ContractOwnership {
                owner: Some(creator),
                creator: Some(creator),
                method: OwnerMethod::CreationTx,
            };
        }

        tracing::info!(
            target: "vitrine::resolver",
            %chain,
            contract = %address,
            "all owner resolution strategies failed"
        );
        ContractOwnership::unresolved()
    }

    /// Resolve a batch of contracts and persist the results, bounded by the
    /// resolver's permit pool. Per-contract failures are isolated.
    pub async fn resolve_and_store(self: Arc<Self>, batch: &[(Chain, Address)]) -> Result<usize> {
        let mut resolved = 0usize;
        let mut join_set = tokio::task::JoinSet::new();

        for &(chain, address) in batch {
            let this = Arc::clone(&self);
            join_set.spawn(async move {
                let ownership = this.resolve_owner(chain, address).await;
                let (name, symbol) = match this.client.contract_name_symbol(address).await {
                    Ok(pair) => pair,
                    Err(_) => (None, None),
                };
                let stored = this
                    .contracts
                    .update_ownership(chain, address, &ownership, name.as_deref(), symbol.as_deref())
                    .await;
                if let Err(err) = stored {
                    tracing::warn!(
                        target: "vitrine::resolver",
                        %chain,
                        contract = %address,
                        error = %err,
                        "failed to store contract ownership"
                    );
                    return false;
                }
                ownership.owner.is_some()
            });
        }

        while let Some(result) = join_set.join_next().await {
            if matches!(result, Ok(true)) {
                resolved += 1;
            }
        }
        Ok(resolved)
    }

    /// Sweep contracts whose owner is still NULL, paged by id, re-running
    /// the strategy chain for each. Returns how many gained an owner.
    pub async fn resolve_missing(self: Arc<Self>, page_size: i64) -> Result<usize> {
        let mut after_id = 0i64;
        let mut resolved = 0usize;

        loop {
            let page = self
                .contracts
                .contracts_missing_owner(after_id, page_size)
                .await?;
            if page.is_empty() {
                break;
            }

            let batch: Vec<(Chain, Address)> =
                page.iter().map(|c| (c.chain, c.address)).collect();
            after_id = page.iter().filter_map(|c| c.id).max().unwrap_or(after_id);

            // Bypass the cache: these were already resolved-and-failed once.
            {
                let mut cells = self.cells.lock().await;
                for key in &batch {
                    cells.remove(key);
                }
            }

            resolved += Arc::clone(&self).resolve_and_store(&batch).await?;
        }

        tracing::info!(
            target: "vitrine::resolver",
            resolved,
            "missing-owner sweep complete"
        );
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{B256, U256};
    use alloy::rpc::types::Log;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use vitrine_common::{TokenType, TokenUri};

    fn addr(n: u64) -> Address {
        Address::from_word(B256::from(U256::from(n)))
    }

    /// A ContractRepo over a lazy pool: usable for constructing the
    /// resolver in tests that never touch the database.
    fn detached_contract_repo() -> ContractRepo {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/vitrine_test_detached")
            .expect("lazy pool");
        ContractRepo::new(pool)
    }

    struct MockChain {
        owner: Option<Address>,
        creator: Option<Address>,
        owner_calls: AtomicUsize,
        creator_calls: AtomicUsize,
    }

    impl MockChain {
        fn new(owner: Option<Address>, creator: Option<Address>) -> Self {
            Self {
                owner,
                creator,
                owner_calls: AtomicUsize::new(0),
                creator_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChainClient for MockChain {
        async fn latest_block(&self) -> Result<u64> {
            Ok(0)
        }

        async fn get_logs(&self, _: u64, _: u64, _: &[B256]) -> Result<Vec<Log>> {
            Ok(Vec::new())
        }

        async fn token_uri(
            &self,
            _: Address,
            _: U256,
            _: TokenType,
        ) -> Result<Option<TokenUri>> {
            Ok(None)
        }

        async fn owner_of(&self, _: Address, _: U256) -> Result<Option<Address>> {
            Ok(None)
        }

        async fn contract_owner(&self, _: Address) -> Result<Option<Address>> {
            self.owner_calls.fetch_add(1, Ordering::SeqCst);
            // Slow enough that concurrent callers overlap.
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(self.owner)
        }

        async fn contract_creator(&self, _: Address) -> Result<Option<Address>> {
            self.creator_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.creator)
        }

        async fn contract_name_symbol(
            &self,
            _: Address,
        ) -> Result<(Option<String>, Option<String>)> {
            Ok((None, None))
        }
    }

    #[tokio::test]
    async fn test_concurrent_resolutions_single_flight() {
        let chain_client = Arc::new(MockChain::new(Some(addr(0xbeef)), None));
        let resolver = Arc::new(ContractResolver::new(
            chain_client.clone(),
            detached_contract_repo(),
            8,
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = Arc::clone(&resolver);
            handles.push(tokio::spawn(async move {
                resolver.resolve_owner(Chain::Ethereum, addr(0xabc)).await
            }));
        }

        for handle in handles {
            let ownership = handle.await.unwrap();
            assert_eq!(ownership.owner, Some(addr(0xbeef)));
            assert_eq!(ownership.method, OwnerMethod::Ownable);
        }

        // All eight callers collapsed into one underlying resolution.
        assert_eq!(chain_client.owner_calls.load(Ordering::SeqCst), 1);
        assert_eq!(chain_client.creator_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_creation_tx_fallback() {
        let chain_client = Arc::new(MockChain::new(None, Some(addr(0xcafe))));
        let resolver = Arc::new(ContractResolver::new(
            chain_client,
            detached_contract_repo(),
            4,
        ));

        let ownership = resolver.resolve_owner(Chain::Ethereum, addr(0x1)).await;
        assert_eq!(ownership.owner, Some(addr(0xcafe)));
        assert_eq!(ownership.creator, Some(addr(0xcafe)));
        assert_eq!(ownership.method, OwnerMethod::CreationTx);
    }

    #[tokio::test]
    async fn test_total_failure_is_unresolved_not_error() {
        let chain_client = Arc::new(MockChain::new(None, None));
        let resolver = Arc::new(ContractResolver::new(
            chain_client,
            detached_contract_repo(),
            4,
        ));

        let ownership = resolver.resolve_owner(Chain::Ethereum, addr(0x2)).await;
        assert_eq!(ownership.owner, None);
        assert_eq!(ownership.method, OwnerMethod::Failed);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_chain() {
        let chain_client = Arc::new(MockChain::new(Some(addr(0x9)), None));
        let resolver = Arc::new(ContractResolver::new(
            chain_client.clone(),
            detached_contract_repo(),
            4,
        ));

        resolver.resolve_owner(Chain::Ethereum, addr(0x3)).await;
        resolver.resolve_owner(Chain::Ethereum, addr(0x3)).await;
        assert_eq!(chain_client.owner_calls.load(Ordering::SeqCst), 1);

        // A different address misses the cache.
        resolver.resolve_owner(Chain::Ethereum, addr(0x4)).await;
        assert_eq!(chain_client.owner_calls.load(Ordering::SeqCst), 2);
    }
}
