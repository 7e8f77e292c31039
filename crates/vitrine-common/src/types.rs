//! Core data model: normalized transfer events, token and contract rows,
//! ownership history, and media records.

use crate::chain::Chain;
use crate::media_type::MediaType;
use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Token standard of an indexed contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    Erc721,
    Erc1155,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Erc721 => "ERC-721",
            TokenType::Erc1155 => "ERC-1155",
        }
    }
}

/// A decoded, chain-normalized transfer event.
///
/// ERC-721 `Transfer` events carry an implicit amount of 1; ERC-1155
/// `TransferSingle`/`TransferBatch` events carry explicit amounts (batch
/// events are flattened into one `TransferEvent` per id/amount pair).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub chain: Chain,
    pub contract: Address,
    pub token_id: U256,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub token_type: TokenType,
    pub block_number: u64,
    pub tx_hash: B256,
}

impl TransferEvent {
    /// Mint transfers originate from the zero address.
    pub fn is_mint(&self) -> bool {
        self.from == Address::ZERO
    }

    /// Burn transfers send to the zero address.
    pub fn is_burn(&self) -> bool {
        self.to == Address::ZERO
    }
}

/// One entry of a token's ownership history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressAtBlock {
    pub address: Address,
    pub block: u64,
}

/// Union a set of ownership histories into one, ordered non-decreasing by
/// block number. Entries are never dropped; duplicates are kept as-is (the
/// union law cares about set-of-entries equality, and stable sort keeps
/// same-block entries in their incoming order).
pub fn union_ownership_histories(histories: &[Vec<AddressAtBlock>]) -> Vec<AddressAtBlock> {
    let mut merged: Vec<AddressAtBlock> = histories.iter().flatten().copied().collect();
    merged.sort_by_key(|entry| entry.block);
    merged
}

/// How a contract's owner was resolved, recorded so a later pass can tell
/// resolved-and-failed apart from never-attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnerMethod {
    /// All strategies failed; eligible for re-resolution.
    Failed,
    /// The contract exposed `owner()` (OpenZeppelin Ownable).
    Ownable,
    /// Taken from the sender of the contract-creation transaction.
    CreationTx,
}

impl OwnerMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerMethod::Failed => "failed",
            OwnerMethod::Ownable => "ownable",
            OwnerMethod::CreationTx => "creation_tx",
        }
    }
}

/// Result of resolving a contract's owner and creator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractOwnership {
    pub owner: Option<Address>,
    pub creator: Option<Address>,
    pub method: OwnerMethod,
}

impl ContractOwnership {
    pub fn unresolved() -> Self {
        Self {
            owner: None,
            creator: None,
            method: OwnerMethod::Failed,
        }
    }
}

/// An indexed contract row. Unique per `(chain, address)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    pub id: Option<i64>,
    pub chain: Chain,
    pub address: Address,
    pub owner_address: Option<Address>,
    pub creator_address: Option<Address>,
    pub owner_method: OwnerMethod,
    pub name: Option<String>,
    pub symbol: Option<String>,
    /// Highest block at which this contract was observed in a transfer log.
    pub latest_block: u64,
    pub deleted: bool,
}

impl Contract {
    pub fn new(chain: Chain, address: Address, latest_block: u64) -> Self {
        Self {
            id: None,
            chain,
            address,
            owner_address: None,
            creator_address: None,
            owner_method: OwnerMethod::Failed,
            name: None,
            symbol: None,
            latest_block,
            deleted: false,
        }
    }
}

/// An indexed token row. Unique per `(chain, contract, token_id, owner)`
/// among non-deleted rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: Option<i64>,
    pub chain: Chain,
    pub contract: Address,
    pub token_id: U256,
    pub token_type: TokenType,
    pub owner_address: Address,
    /// ERC-721 rows hold 0 or 1; ERC-1155 rows hold the owner's balance.
    pub quantity: U256,
    pub ownership_history: Vec<AddressAtBlock>,
    /// Last block that touched this row.
    pub block_number: u64,
    pub is_spam: bool,
    pub deleted: bool,
}

/// A resolved media record for one token definition. At most one
/// `active && !deleted` record exists per `(chain, contract, token_id)`;
/// supersession deactivates the previous record rather than deleting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRecord {
    pub id: Option<i64>,
    pub chain: Chain,
    pub contract: Address,
    pub token_id: U256,
    pub media_type: MediaType,
    pub media_url: String,
    pub thumbnail_url: Option<String>,
    pub dimensions: Option<(u32, u32)>,
    pub active: bool,
    pub deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_word(B256::from(U256::from(n)))
    }

    #[test]
    fn test_union_orders_by_block() {
        let h1 = vec![
            AddressAtBlock {
                address: addr(1),
                block: 100,
            },
            AddressAtBlock {
                address: addr(2),
                block: 300,
            },
        ];
        let h2 = vec![AddressAtBlock {
            address: addr(3),
            block: 200,
        }];

        let merged = union_ownership_histories(&[h1, h2]);
        let blocks: Vec<u64> = merged.iter().map(|e| e.block).collect();
        assert_eq!(blocks, vec![100, 200, 300]);
    }

    #[test]
    fn test_union_keeps_all_entries() {
        let h1 = vec![AddressAtBlock {
            address: addr(1),
            block: 100,
        }];
        let h2 = vec![AddressAtBlock {
            address: addr(1),
            block: 100,
        }];

        // The union law never drops entries, even exact duplicates.
        let merged = union_ownership_histories(&[h1, h2]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_mint_and_burn_detection() {
        let mut event = TransferEvent {
            chain: Chain::Ethereum,
            contract: addr(0xabc),
            token_id: U256::from(42u64),
            from: Address::ZERO,
            to: addr(0x111),
            amount: U256::from(1u64),
            token_type: TokenType::Erc721,
            block_number: 100,
            tx_hash: B256::ZERO,
        };
        assert!(event.is_mint());
        assert!(!event.is_burn());

        event.from = addr(0x111);
        event.to = Address::ZERO;
        assert!(event.is_burn());
    }
}
