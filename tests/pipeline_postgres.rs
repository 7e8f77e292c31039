//! End-to-end pipeline tests against a real Postgres.
//!
//! Ignored by default: set `DATABASE_URL` to a scratch database and run
//!
//! ```bash
//! cargo test -p vitrine --test pipeline_postgres -- --ignored --test-threads=1
//! ```
//!
//! The tests truncate the pipeline tables, so point them at a dedicated
//! database and keep them single-threaded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, LogData, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolValue;
use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use vitrine::{merge_all_duplicates, CatchUpConfig, CatchUpCoordinator, ContractResolver, TokenMerger};
use vitrine_chain::{transfer_topics, ChainClient};
use vitrine_common::{
    AddressAtBlock, Chain, MediaRecord, MediaType, Token, TokenType, TokenUri,
};
use vitrine_storage::{ContractRepo, MediaRepo, StatsRepo, TokenRepo};

fn addr(n: u64) -> Address {
    Address::from_word(B256::from(U256::from(n)))
}

fn word(address: Address) -> B256 {
    address.into_word()
}

fn erc721_log(contract: Address, from: Address, to: Address, token_id: u64, block: u64) -> Log {
    let topics = transfer_topics();
    Log {
        inner: alloy::primitives::Log {
            address: contract,
            data: LogData::new_unchecked(
                vec![
                    topics[0], // Transfer
                    word(from),
                    word(to),
                    B256::from(U256::from(token_id)),
                ],
                Bytes::new(),
            ),
        },
        block_hash: None,
        block_number: Some(block),
        block_timestamp: None,
        transaction_hash: Some(B256::from(U256::from(block))),
        transaction_index: None,
        log_index: None,
        removed: false,
    }
}

fn erc1155_log(
    contract: Address,
    from: Address,
    to: Address,
    token_id: u64,
    amount: u64,
    block: u64,
) -> Log {
    let topics = transfer_topics();
    let data = (U256::from(token_id), U256::from(amount)).abi_encode();
    Log {
        inner: alloy::primitives::Log {
            address: contract,
            data: LogData::new_unchecked(
                vec![
                    topics[1], // TransferSingle
                    word(addr(0xfeed)),
                    word(from),
                    word(to),
                ],
                Bytes::from(data),
            ),
        },
        block_hash: None,
        block_number: Some(block),
        block_timestamp: None,
        transaction_hash: Some(B256::from(U256::from(block))),
        transaction_index: None,
        log_index: None,
        removed: false,
    }
}

/// Chain client serving a fixed log set, with an optional failure window
/// for checkpoint-resume tests.
struct FixtureChain {
    logs: Vec<Log>,
    fail_from_block: AtomicU64,
}

impl FixtureChain {
    fn new(logs: Vec<Log>) -> Self {
        Self {
            logs,
            fail_from_block: AtomicU64::new(u64::MAX),
        }
    }

    fn fail_from(&self, block: u64) {
        self.fail_from_block.store(block, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainClient for FixtureChain {
    async fn latest_block(&self) -> Result<u64> {
        Ok(self
            .logs
            .iter()
            .filter_map(|log| log.block_number)
            .max()
            .unwrap_or(0))
    }

    async fn get_logs(&self, from_block: u64, to_block: u64, _: &[B256]) -> Result<Vec<Log>> {
        if from_block >= self.fail_from_block.load(Ordering::SeqCst) {
            anyhow::bail!("simulated provider outage");
        }
        Ok(self
            .logs
            .iter()
            .filter(|log| {
                log.block_number
                    .map(|block| block >= from_block && block <= to_block)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn token_uri(&self, _: Address, _: U256, _: TokenType) -> Result<Option<TokenUri>> {
        Ok(None)
    }

    async fn owner_of(&self, _: Address, _: U256) -> Result<Option<Address>> {
        Ok(None)
    }

    async fn contract_owner(&self, _: Address) -> Result<Option<Address>> {
        Ok(None)
    }

    async fn contract_creator(&self, _: Address) -> Result<Option<Address>> {
        Ok(None)
    }

    async fn contract_name_symbol(&self, _: Address) -> Result<(Option<String>, Option<String>)> {
        Ok((None, None))
    }
}

struct Harness {
    pool: sqlx::PgPool,
    tokens: TokenRepo,
    contracts: ContractRepo,
    media: MediaRepo,
    stats: StatsRepo,
}

impl Harness {
    async fn new() -> Harness {
        let url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must point at a scratch postgres database");
        let pool = vitrine_storage::connect(&url, 5).await.expect("connect");
        sqlx::raw_sql(
            "TRUNCATE contracts, tokens, media_records, indexer_statistics, indexer_state CASCADE",
        )
        .execute(&pool)
        .await
        .expect("truncate");

        Harness {
            tokens: TokenRepo::new(pool.clone()),
            contracts: ContractRepo::new(pool.clone()),
            media: MediaRepo::new(pool.clone()),
            stats: StatsRepo::new(pool.clone()),
            pool,
        }
    }

    fn coordinator(&self, chain_client: Arc<FixtureChain>) -> CatchUpCoordinator {
        let resolver = Arc::new(ContractResolver::new(
            chain_client.clone(),
            self.contracts.clone(),
            4,
        ));
        let merger = TokenMerger::new(self.tokens.clone(), self.contracts.clone());
        CatchUpCoordinator::new(
            chain_client,
            merger,
            resolver,
            self.stats.clone(),
            CatchUpConfig {
                chain: Chain::Ethereum,
                chunk_size: 2_000,
                resolve_contract_owners: false,
                poll_interval: Duration::from_millis(50),
            },
            CancellationToken::new(),
        )
    }
}

#[tokio::test]
#[ignore = "requires postgres (set DATABASE_URL)"]
async fn test_catchup_concrete_scenario_and_idempotency() {
    let harness = Harness::new().await;
    let contract = addr(0xabc);

    // Token 42: minted to 0x111 at block 100, moved to 0x222 at block 105.
    let chain_client = Arc::new(FixtureChain::new(vec![
        erc721_log(contract, Address::ZERO, addr(0x111), 42, 100),
        erc721_log(contract, addr(0x111), addr(0x222), 42, 105),
    ]));
    let coordinator = harness.coordinator(chain_client);

    let report = coordinator.run(100, 105).await.unwrap();
    assert_eq!(report.chunks, 1);
    assert_eq!(report.total_transfers, 2);

    let token = harness
        .tokens
        .get_token(Chain::Ethereum, contract, U256::from(42u64), addr(0x222))
        .await
        .unwrap()
        .expect("token row");
    assert_eq!(token.owner_address, addr(0x222));
    assert_eq!(token.block_number, 105);
    assert_eq!(token.quantity, U256::from(1u64));
    assert_eq!(
        token.ownership_history,
        vec![
            AddressAtBlock {
                address: addr(0x111),
                block: 100
            },
            AddressAtBlock {
                address: addr(0x222),
                block: 105
            },
        ]
    );

    // Checkpoint advanced past the processed chunk.
    assert_eq!(harness.stats.checkpoint().await.unwrap(), Some(106));

    // Re-running the same range changes nothing: same single row, same
    // history, no duplicated entries.
    coordinator.run(100, 105).await.unwrap();
    let rows = harness
        .tokens
        .tokens_for_definition(Chain::Ethereum, contract, U256::from(42u64))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].ownership_history.len(), 2);
}

#[tokio::test]
#[ignore = "requires postgres (set DATABASE_URL)"]
async fn test_erc1155_quantities_never_negative() {
    let harness = Harness::new().await;
    let contract = addr(0xdef);
    let (a, b, c) = (addr(0xa), addr(0xb), addr(0xc));

    // A mints 10, sends 3 to B; B sends 5 to C having only 3 (a missed
    // prior event): B clamps to zero instead of going negative.
    let chain_client = Arc::new(FixtureChain::new(vec![
        erc1155_log(contract, Address::ZERO, a, 1, 10, 100),
        erc1155_log(contract, a, b, 1, 3, 101),
        erc1155_log(contract, b, c, 1, 5, 102),
    ]));
    let coordinator = harness.coordinator(chain_client);
    coordinator.run(100, 102).await.unwrap();

    let quantity = |owner: Address| {
        let tokens = harness.tokens.clone();
        async move {
            tokens
                .get_token(Chain::Ethereum, contract, U256::from(1u64), owner)
                .await
                .unwrap()
                .map(|token| token.quantity)
                .unwrap_or(U256::ZERO)
        }
    };

    assert_eq!(quantity(a).await, U256::from(7u64));
    assert_eq!(quantity(b).await, U256::ZERO);
    assert_eq!(quantity(c).await, U256::from(5u64));
}

#[tokio::test]
#[ignore = "requires postgres (set DATABASE_URL)"]
async fn test_merge_duplicates_union_law_and_idempotency() {
    let harness = Harness::new().await;
    let contract = addr(0x77);
    let token_id = U256::from(9u64);

    // Two rows for the same logical token (different owners), as left by
    // racing catch-up runs.
    let mk_token = |owner: Address, history: Vec<AddressAtBlock>, block: u64| Token {
        id: None,
        chain: Chain::Ethereum,
        contract,
        token_id,
        token_type: TokenType::Erc721,
        owner_address: owner,
        quantity: U256::from(1u64),
        ownership_history: history,
        block_number: block,
        is_spam: false,
        deleted: false,
    };
    harness
        .tokens
        .upsert_tokens(&[
            mk_token(
                addr(0x1),
                vec![AddressAtBlock {
                    address: addr(0x1),
                    block: 100,
                }],
                100,
            ),
            mk_token(
                addr(0x2),
                vec![
                    AddressAtBlock {
                        address: addr(0x1),
                        block: 100,
                    },
                    AddressAtBlock {
                        address: addr(0x2),
                        block: 105,
                    },
                ],
                105,
            ),
        ])
        .await
        .unwrap();

    let summary = merge_all_duplicates(&harness.tokens, 100).await.unwrap();
    assert_eq!(summary.groups, 1);
    assert_eq!(summary.rows_merged, 1);

    let rows = harness
        .tokens
        .tokens_for_definition(Chain::Ethereum, contract, token_id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let canonical = &rows[0];
    // Highest-block row survived.
    assert_eq!(canonical.owner_address, addr(0x2));
    assert_eq!(canonical.block_number, 105);
    // Union of both histories, ordered by block, nothing dropped.
    let blocks: Vec<u64> = canonical.ownership_history.iter().map(|e| e.block).collect();
    assert_eq!(blocks, vec![100, 100, 105]);

    // Re-running over the merged set is a no-op.
    let summary = merge_all_duplicates(&harness.tokens, 100).await.unwrap();
    assert_eq!(summary.groups, 0);
    assert_eq!(summary.rows_merged, 0);
}

#[tokio::test]
#[ignore = "requires postgres (set DATABASE_URL)"]
async fn test_failed_chunk_leaves_checkpoint_resumable() {
    let harness = Harness::new().await;
    let contract = addr(0xabc);

    let chain_client = Arc::new(FixtureChain::new(vec![
        erc721_log(contract, Address::ZERO, addr(0x1), 1, 500),
        erc721_log(contract, Address::ZERO, addr(0x2), 2, 2_500),
    ]));
    let coordinator = harness.coordinator(chain_client.clone());

    // Second chunk (starting at 2000) hits a provider outage: the run
    // fails, the checkpoint stays at the last good chunk boundary.
    chain_client.fail_from(2_000);
    let err = coordinator.run(0, 3_999).await.unwrap_err();
    assert!(err.to_string().contains("checkpoint not advanced"));
    assert_eq!(harness.stats.checkpoint().await.unwrap(), Some(2_000));

    // The statistics row for the failed chunk is closed unsuccessfully.
    let failed: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM indexer_statistics WHERE success = FALSE",
    )
    .fetch_one(&harness.pool)
    .await
    .unwrap();
    assert_eq!(failed, 1);

    // Provider recovers; resuming from the checkpoint finishes the range.
    chain_client.fail_from(u64::MAX);
    let resume_from = harness.stats.checkpoint().await.unwrap().unwrap();
    coordinator.run(resume_from, 3_999).await.unwrap();
    assert_eq!(harness.stats.checkpoint().await.unwrap(), Some(4_000));

    let token = harness
        .tokens
        .get_token(Chain::Ethereum, contract, U256::from(2u64), addr(0x2))
        .await
        .unwrap();
    assert!(token.is_some());
}

#[tokio::test]
#[ignore = "requires postgres (set DATABASE_URL)"]
async fn test_media_record_supersession() {
    let harness = Harness::new().await;
    let contract = addr(0x55);
    let token_id = U256::from(3u64);

    let record = |url: &str| MediaRecord {
        id: None,
        chain: Chain::Ethereum,
        contract,
        token_id,
        media_type: MediaType::Image,
        media_url: url.to_string(),
        thumbnail_url: None,
        dimensions: Some((640, 480)),
        active: true,
        deleted: false,
    };

    harness
        .media
        .save_with_supersession(&record("https://media.test/v1.png"))
        .await
        .unwrap();
    harness
        .media
        .save_with_supersession(&record("https://media.test/v2.png"))
        .await
        .unwrap();

    // The new record is the single active one; the old record still exists,
    // deactivated rather than deleted.
    let active = harness
        .media
        .active_record(Chain::Ethereum, contract, token_id)
        .await
        .unwrap()
        .expect("active record");
    assert_eq!(active.media_url, "https://media.test/v2.png");

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media_records")
        .fetch_one(&harness.pool)
        .await
        .unwrap();
    assert_eq!(total, 2);

    let active_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM media_records WHERE active = TRUE AND deleted = FALSE",
    )
    .fetch_one(&harness.pool)
    .await
    .unwrap();
    assert_eq!(active_count, 1);
}
