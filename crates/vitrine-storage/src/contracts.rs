//! Contract repository.
//!
//! Upserts use coalesce-with-existing semantics: a later write with an
//! unresolved owner or empty name never blanks out a value an earlier
//! resolution already filled in.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use vitrine_common::codec::{address_from_text, address_to_text};
use vitrine_common::{Chain, Contract, ContractOwnership, OwnerMethod};

const UPSERT_CONTRACT_SQL: &str = r#"
INSERT INTO contracts (chain, address, owner_address, creator_address, owner_method,
                       name, symbol, latest_block)
VALUES ($1, $2, $3, $4, $5, NULLIF($6, ''), NULLIF($7, ''), $8)
ON CONFLICT (chain, address) WHERE parent_id IS NULL
DO UPDATE SET
    owner_address = COALESCE(EXCLUDED.owner_address, contracts.owner_address),
    creator_address = COALESCE(EXCLUDED.creator_address, contracts.creator_address),
    owner_method = CASE
        WHEN EXCLUDED.owner_method <> 'failed' THEN EXCLUDED.owner_method
        ELSE contracts.owner_method
    END,
    name = COALESCE(NULLIF(EXCLUDED.name, ''), contracts.name),
    symbol = COALESCE(NULLIF(EXCLUDED.symbol, ''), contracts.symbol),
    latest_block = GREATEST(contracts.latest_block, EXCLUDED.latest_block),
    last_updated = now()
"#;

#[derive(Clone)]
pub struct ContractRepo {
    pool: PgPool,
}

impl ContractRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_contracts(&self, contracts: &[Contract]) -> Result<u64> {
        let mut written = 0u64;
        for contract in contracts {
            let result = sqlx::query(UPSERT_CONTRACT_SQL)
                .bind(contract.chain.as_str())
                .bind(address_to_text(&contract.address))
                .bind(contract.owner_address.as_ref().map(address_to_text))
                .bind(contract.creator_address.as_ref().map(address_to_text))
                .bind(contract.owner_method.as_str())
                .bind(contract.name.clone().unwrap_or_default())
                .bind(contract.symbol.clone().unwrap_or_default())
                .bind(contract.latest_block as i64)
                .execute(&self.pool)
                .await
                .context("upserting contract")?;
            written += result.rows_affected();
        }
        Ok(written)
    }

    /// Record a resolution result (and any name/symbol fetched with it).
    pub async fn update_ownership(
        &self,
        chain: Chain,
        address: Address,
        ownership: &ContractOwnership,
        name: Option<&str>,
        symbol: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE contracts
            SET owner_address = COALESCE($3, owner_address),
                creator_address = COALESCE($4, creator_address),
                owner_method = $5,
                name = COALESCE(NULLIF($6, ''), name),
                symbol = COALESCE(NULLIF($7, ''), symbol),
                last_updated = now()
            WHERE chain = $1 AND address = $2 AND parent_id IS NULL
            "#,
        )
        .bind(chain.as_str())
        .bind(address_to_text(&address))
        .bind(ownership.owner.as_ref().map(address_to_text))
        .bind(ownership.creator.as_ref().map(address_to_text))
        .bind(ownership.method.as_str())
        .bind(name.unwrap_or_default())
        .bind(symbol.unwrap_or_default())
        .execute(&self.pool)
        .await
        .context("updating contract ownership")?;
        Ok(())
    }

    pub async fn get_contract(&self, chain: Chain, address: Address) -> Result<Option<Contract>> {
        let row = sqlx::query(&format!("{CONTRACT_SELECT} WHERE chain = $1 AND address = $2 AND parent_id IS NULL"))
            .bind(chain.as_str())
            .bind(address_to_text(&address))
            .fetch_optional(&self.pool)
            .await
            .context("fetching contract")?;
        row.as_ref().map(row_to_contract).transpose()
    }

    /// Contracts with an unresolved owner, paged by id. Feeds the
    /// re-resolution sweep.
    pub async fn contracts_missing_owner(
        &self,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<Contract>> {
        let rows = sqlx::query(&format!(
            r#"{CONTRACT_SELECT}
            WHERE id > $1 AND owner_address IS NULL AND deleted = FALSE AND parent_id IS NULL
            ORDER BY id
            LIMIT $2"#
        ))
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("listing contracts missing owner")?;
        rows.iter().map(row_to_contract).collect()
    }
}

const CONTRACT_SELECT: &str = r#"
SELECT id, chain, address, owner_address, creator_address, owner_method,
       name, symbol, latest_block, deleted
FROM contracts
"#;

fn row_to_contract(row: &PgRow) -> Result<Contract> {
    let owner_method = match row.get::<String, _>("owner_method").as_str() {
        "ownable" => OwnerMethod::Ownable,
        "creation_tx" => OwnerMethod::CreationTx,
        _ => OwnerMethod::Failed,
    };
    Ok(Contract {
        id: Some(row.get::<i64, _>("id")),
        chain: row.get::<String, _>("chain").parse()?,
        address: address_from_text(row.get::<String, _>("address").as_str())?,
        owner_address: row
            .get::<Option<String>, _>("owner_address")
            .map(|s| address_from_text(&s))
            .transpose()?,
        creator_address: row
            .get::<Option<String>, _>("creator_address")
            .map(|s| address_from_text(&s))
            .transpose()?,
        owner_method,
        name: row.get("name"),
        symbol: row.get("symbol"),
        latest_block: row.get::<i64, _>("latest_block") as u64,
        deleted: row.get("deleted"),
    })
}
