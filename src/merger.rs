//! Token merger: folds decoded transfer events into row images and applies
//! them through the storage layer's atomic upserts.
//!
//! Events for the same logical token inside one batch are folded in block
//! order before touching the database, so the batch produces exactly one
//! row image per `(contract, token_id, owner)` no matter how many times the
//! token moved inside the chunk. Cross-batch ordering is enforced by the
//! upsert statements themselves (history appends are guarded on block
//! number), which keeps re-runs of the same chunk idempotent.

use std::collections::HashMap;

use alloy::primitives::{Address, U256};
use anyhow::Result;
use vitrine_common::{
    AddressAtBlock, Chain, Contract, Token, TokenType, TransferEvent,
};
use vitrine_storage::{ContractRepo, Erc1155Delta, SupersedeKey, TokenRepo};

/// Counts from one merged batch, reported into chunk statistics.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub transfers: u64,
    pub tokens_written: u64,
    pub contracts_written: u64,
    pub superseded: u64,
    /// Contracts observed in the batch, for the ownership-resolution pass.
    pub contracts_seen: Vec<(Chain, Address)>,
}

/// In-memory fold of a batch, ready for the storage layer.
#[derive(Debug, Default)]
pub(crate) struct FoldedBatch {
    pub owner_rows: Vec<Token>,
    pub supersede: Vec<SupersedeKey>,
    pub deltas: Vec<Erc1155Delta>,
    pub contracts: Vec<Contract>,
}

/// Fold a batch of transfer events in block order.
///
/// ERC-721: the last receiver in the batch owns the token; every `(to,
/// block)` hop lands in that owner's history, and every other owner's row
/// is superseded. A batch-final burn produces only the supersession.
/// ERC-1155: per-(owner, token) signed quantity deltas, with history
/// entries appended on the receiving side.
pub(crate) fn fold_events(events: &[TransferEvent]) -> FoldedBatch {
    let mut sorted: Vec<&TransferEvent> = events.iter().collect();
    sorted.sort_by_key(|event| event.block_number);

    let mut contracts: HashMap<(Chain, Address), u64> = HashMap::new();

    // ERC-721 per-token state: (current owner, hops, last block).
    struct NftState {
        owner: Address,
        history: Vec<AddressAtBlock>,
        block: u64,
    }
    let mut nfts: HashMap<(Chain, Address, U256), NftState> = HashMap::new();

    // ERC-1155 per-(token, owner) state.
    #[derive(Default)]
    struct BalanceState {
        received: U256,
        sent: U256,
        history: Vec<AddressAtBlock>,
        block: u64,
    }
    let mut balances: HashMap<(Chain, Address, U256, Address), BalanceState> = HashMap::new();

    for event in sorted {
        let contract_block = contracts
            .entry((event.chain, event.contract))
            .or_default();
        *contract_block = (*contract_block).max(event.block_number);

        match event.token_type {
            TokenType::Erc721 => {
                let state = nfts
                    .entry((event.chain, event.contract, event.token_id))
                    .or_insert_with(|| NftState {
                        owner: event.from,
                        history: Vec::new(),
                        block: event.block_number,
                    });
                if event.to != Address::ZERO {
                    state.history.push(AddressAtBlock {
                        address: event.to,
                        block: event.block_number,
                    });
                }
                state.owner = event.to;
                state.block = event.block_number;
            }
            TokenType::Erc1155 => {
                if event.to != Address::ZERO {
                    let state = balances
                        .entry((event.chain, event.contract, event.token_id, event.to))
                        .or_default();
                    state.received += event.amount;
                    state.history.push(AddressAtBlock {
                        address: event.to,
                        block: event.block_number,
                    });
                    state.block = state.block.max(event.block_number);
                }
                if event.from != Address::ZERO {
                    let state = balances
                        .entry((event.chain, event.contract, event.token_id, event.from))
                        .or_default();
                    state.sent += event.amount;
                    state.block = state.block.max(event.block_number);
                }
            }
        }
    }

    let mut folded = FoldedBatch::default();

    for ((chain, address), latest_block) in contracts {
        folded.contracts.push(Contract::new(chain, address, latest_block));
    }
    // Deterministic application order.
    folded
        .contracts
        .sort_by_key(|c| (c.chain.as_str(), c.address));

    for ((chain, contract, token_id), state) in nfts {
        folded.supersede.push(SupersedeKey {
            chain,
            contract,
            token_id,
            new_owner: state.owner,
            block_number: state.block,
        });
        if state.owner != Address::ZERO {
            folded.owner_rows.push(Token {
                id: None,
                chain,
                contract,
                token_id,
                token_type: TokenType::Erc721,
                owner_address: state.owner,
                quantity: U256::from(1u64),
                ownership_history: state.history,
                block_number: state.block,
                is_spam: false,
                deleted: false,
            });
        }
    }
    folded
        .owner_rows
        .sort_by_key(|t| (t.contract, t.token_id, t.owner_address));
    folded
        .supersede
        .sort_by_key(|k| (k.contract, k.token_id));

    for ((chain, contract, token_id, owner), state) in balances {
        let (amount, negative) = if state.received >= state.sent {
            (state.received - state.sent, false)
        } else {
            (state.sent - state.received, true)
        };
        if amount.is_zero() && state.history.is_empty() {
            continue;
        }
        folded.deltas.push(Erc1155Delta {
            chain,
            contract,
            token_id,
            owner,
            amount,
            negative,
            block_number: state.block,
            history: state.history,
        });
    }
    folded
        .deltas
        .sort_by_key(|d| (d.contract, d.token_id, d.owner));

    folded
}

/// Applies folded batches through the repositories.
#[derive(Clone)]
pub struct TokenMerger {
    tokens: TokenRepo,
    contracts: ContractRepo,
}

impl TokenMerger {
    pub fn new(tokens: TokenRepo, contracts: ContractRepo) -> Self {
        Self { tokens, contracts }
    }

    /// Bulk-upsert a batch of decoded transfer events.
    pub async fn upsert_events(&self, events: &[TransferEvent]) -> Result<MergeOutcome> {
        if events.is_empty() {
            return Ok(MergeOutcome::default());
        }

        let folded = fold_events(events);
        let contracts_seen: Vec<(Chain, Address)> = folded
            .contracts
            .iter()
            .map(|c| (c.chain, c.address))
            .collect();

        let contracts_written = self.contracts.upsert_contracts(&folded.contracts).await?;
        let tokens_written = self.tokens.upsert_tokens(&folded.owner_rows).await?;
        let superseded = self.tokens.supersede_owners(&folded.supersede).await?;
        let deltas_written = self.tokens.apply_erc1155_deltas(&folded.deltas).await?;

        tracing::debug!(
            target: "vitrine::merger",
            transfers = events.len(),
            tokens = tokens_written + deltas_written,
            contracts = contracts_written,
            superseded,
            "merged transfer batch"
        );

        Ok(MergeOutcome {
            transfers: events.len() as u64,
            tokens_written: tokens_written + deltas_written,
            contracts_written,
            superseded,
            contracts_seen,
        })
    }
}
