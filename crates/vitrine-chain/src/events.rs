//! Transfer-event topic set and log decoding.
//!
//! The pipeline tracks three event signatures: ERC-721 `Transfer` (which
//! shares its signature hash with ERC-20; the two are told apart by topic
//! count), ERC-1155 `TransferSingle`, and ERC-1155 `TransferBatch`. Batch
//! events are flattened into one normalized event per id/amount pair.

use alloy::primitives::{B256, U256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use vitrine_common::{Chain, TokenType, TransferEvent};

sol! {
    /// ERC-721 Transfer. ERC-20 emits the same signature with only three
    /// topics (value lives in data), so decoding doubles as the filter.
    event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);

    /// ERC-1155 single transfer.
    event TransferSingle(
        address indexed operator,
        address indexed from,
        address indexed to,
        uint256 id,
        uint256 value
    );

    /// ERC-1155 batch transfer.
    event TransferBatch(
        address indexed operator,
        address indexed from,
        address indexed to,
        uint256[] ids,
        uint256[] values
    );
}

/// The topic-0 set handed to `eth_getLogs` filters.
pub fn transfer_topics() -> Vec<B256> {
    vec![
        Transfer::SIGNATURE_HASH,
        TransferSingle::SIGNATURE_HASH,
        TransferBatch::SIGNATURE_HASH,
    ]
}

/// Decode raw logs into normalized transfer events.
///
/// Logs that do not decode (ERC-20 transfers caught by the shared
/// signature, malformed data) are skipped with a trace/warn, never an
/// error: one bad log must not fail a chunk.
pub fn decode_transfer_logs(chain: Chain, logs: &[Log]) -> Vec<TransferEvent> {
    let mut events = Vec::with_capacity(logs.len());
    for log in logs {
        decode_transfer_log(chain, log, &mut events);
    }
    events
}

fn decode_transfer_log(chain: Chain, log: &Log, out: &mut Vec<TransferEvent>) {
    let Some(&topic0) = log.topic0() else {
        return;
    };
    let Some(block_number) = log.block_number else {
        tracing::warn!(
            target: "vitrine_chain::events",
            contract = %log.address(),
            "skipping pending log without block number"
        );
        return;
    };
    let tx_hash = log.transaction_hash.unwrap_or(B256::ZERO);

    if topic0 == Transfer::SIGNATURE_HASH {
        // Four topics means ERC-721; three means ERC-20, which decode_log
        // rejects because tokenId is declared indexed.
        let Ok(decoded) = Transfer::decode_log(&log.inner) else {
            tracing::trace!(
                target: "vitrine_chain::events",
                contract = %log.address(),
                topics = log.inner.topics().len(),
                "Transfer log is not ERC-721, skipping"
            );
            return;
        };
        out.push(TransferEvent {
            chain,
            contract: log.address(),
            token_id: decoded.tokenId,
            from: decoded.from,
            to: decoded.to,
            amount: U256::from(1u64),
            token_type: TokenType::Erc721,
            block_number,
            tx_hash,
        });
    } else if topic0 == TransferSingle::SIGNATURE_HASH {
        let Ok(decoded) = TransferSingle::decode_log(&log.inner) else {
            tracing::warn!(
                target: "vitrine_chain::events",
                contract = %log.address(),
                tx_hash = %tx_hash,
                "malformed TransferSingle log"
            );
            return;
        };
        out.push(TransferEvent {
            chain,
            contract: log.address(),
            token_id: decoded.id,
            from: decoded.from,
            to: decoded.to,
            amount: decoded.value,
            token_type: TokenType::Erc1155,
            block_number,
            tx_hash,
        });
    } else if topic0 == TransferBatch::SIGNATURE_HASH {
        let Ok(decoded) = TransferBatch::decode_log(&log.inner) else {
            tracing::warn!(
                target: "vitrine_chain::events",
                contract = %log.address(),
                tx_hash = %tx_hash,
                "malformed TransferBatch log"
            );
            return;
        };
        if decoded.ids.len() != decoded.values.len() {
            tracing::warn!(
                target: "vitrine_chain::events",
                contract = %log.address(),
                ids = decoded.ids.len(),
                values = decoded.values.len(),
                "TransferBatch id/value length mismatch, zipping short"
            );
        }
        for (&id, &value) in decoded.ids.iter().zip(decoded.values.iter()) {
            out.push(TransferEvent {
                chain,
                contract: log.address(),
                token_id: id,
                from: decoded.from,
                to: decoded.to,
                amount: value,
                token_type: TokenType::Erc1155,
                block_number,
                tx_hash,
            });
        }
    }
}
