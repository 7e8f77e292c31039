//! Token repository: atomic upserts, ERC-1155 balance deltas, previous-owner
//! supersession, and the duplicate-row repair pass.
//!
//! All steady-state writes are single-statement upserts keyed on the
//! `(token_id, contract, chain, owner) WHERE deleted = false` identity, so
//! concurrent workers cannot lose updates. History appends and
//! `last_synced` monotonicity are enforced inside the statement: a re-run
//! of the same chunk sees `EXCLUDED.block_number <= tokens.block_number`
//! and leaves the history untouched, which is what makes catch-up
//! idempotent.

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use vitrine_common::codec::{
    address_from_text, address_to_text, u256_from_decimal, u256_to_decimal, u256_to_hex,
};
use vitrine_common::{
    union_ownership_histories, AddressAtBlock, Chain, Token, TokenType,
};

const UPSERT_TOKEN_SQL: &str = r#"
INSERT INTO tokens
    (chain, contract_address, token_id, token_type, owner_address,
     quantity, ownership_history, block_number)
VALUES ($1, $2, $3, $4, $5, $6::numeric, $7, $8)
ON CONFLICT (token_id, contract_address, chain, owner_address) WHERE deleted = FALSE
DO UPDATE SET
    quantity = EXCLUDED.quantity,
    ownership_history = CASE
        WHEN EXCLUDED.block_number > tokens.block_number
            THEN tokens.ownership_history || EXCLUDED.ownership_history
        ELSE tokens.ownership_history
    END,
    block_number = GREATEST(tokens.block_number, EXCLUDED.block_number),
    last_synced = GREATEST(tokens.last_synced, now())
"#;

const APPLY_DELTA_SQL: &str = r#"
INSERT INTO tokens
    (chain, contract_address, token_id, token_type, owner_address,
     quantity, ownership_history, block_number)
VALUES ($1, $2, $3, 'ERC-1155', $4, GREATEST($5::numeric, 0), $6, $7)
ON CONFLICT (token_id, contract_address, chain, owner_address) WHERE deleted = FALSE
DO UPDATE SET
    quantity = CASE
        WHEN EXCLUDED.block_number > tokens.block_number
            THEN GREATEST(tokens.quantity + $5::numeric, 0)
        ELSE tokens.quantity
    END,
    ownership_history = CASE
        WHEN EXCLUDED.block_number > tokens.block_number
            THEN tokens.ownership_history || EXCLUDED.ownership_history
        ELSE tokens.ownership_history
    END,
    block_number = GREATEST(tokens.block_number, EXCLUDED.block_number),
    last_synced = GREATEST(tokens.last_synced, now())
"#;

const SUPERSEDE_SQL: &str = r#"
UPDATE tokens
SET quantity = 0,
    block_number = GREATEST(block_number, $5),
    last_synced = GREATEST(last_synced, now())
WHERE chain = $1 AND contract_address = $2 AND token_id = $3
  AND owner_address <> $4
  AND token_type = 'ERC-721'
  AND deleted = FALSE
  AND quantity > 0
  AND block_number <= $5
"#;

/// A signed ERC-1155 balance change for one `(owner, token)` pair.
#[derive(Debug, Clone)]
pub struct Erc1155Delta {
    pub chain: Chain,
    pub contract: Address,
    pub token_id: U256,
    pub owner: Address,
    /// Magnitude of the change.
    pub amount: U256,
    /// True for the sending side of a transfer.
    pub negative: bool,
    pub block_number: u64,
    /// History entries to append (receives only).
    pub history: Vec<AddressAtBlock>,
}

/// Identifies the ERC-721 rows to supersede after an ownership change:
/// every other owner's live row for the token gets its quantity zeroed.
#[derive(Debug, Clone)]
pub struct SupersedeKey {
    pub chain: Chain,
    pub contract: Address,
    pub token_id: U256,
    pub new_owner: Address,
    pub block_number: u64,
}

/// Outcome of one duplicate-group merge.
#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    /// Rows deleted after folding into the canonical row.
    pub merged_rows: usize,
    pub canonical_id: Option<i64>,
}

#[derive(Clone)]
pub struct TokenRepo {
    pool: PgPool,
}

impl TokenRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert owner-row images (ERC-721 path). Returns rows written.
    pub async fn upsert_tokens(&self, tokens: &[Token]) -> Result<u64> {
        let mut written = 0u64;
        for token in tokens {
            let history = serde_json::to_value(&token.ownership_history)
                .context("encoding ownership history")?;
            let result = sqlx::query(UPSERT_TOKEN_SQL)
                .bind(token.chain.as_str())
                .bind(address_to_text(&token.contract))
                .bind(u256_to_hex(&token.token_id))
                .bind(token.token_type.as_str())
                .bind(address_to_text(&token.owner_address))
                .bind(u256_to_decimal(&token.quantity))
                .bind(history)
                .bind(token.block_number as i64)
                .execute(&self.pool)
                .await
                .context("upserting token")?;
            written += result.rows_affected();
        }
        Ok(written)
    }

    /// Apply ERC-1155 balance deltas. Balances clamp at zero; a delta that
    /// would go negative is a sign of a missed prior event and is logged as
    /// a reconciliation warning, never an error.
    pub async fn apply_erc1155_deltas(&self, deltas: &[Erc1155Delta]) -> Result<u64> {
        let mut written = 0u64;
        for delta in deltas {
            if delta.negative {
                self.warn_if_insufficient(delta).await;
            }

            let signed = if delta.negative {
                format!("-{}", u256_to_decimal(&delta.amount))
            } else {
                u256_to_decimal(&delta.amount)
            };
            let history =
                serde_json::to_value(&delta.history).context("encoding ownership history")?;

            let result = sqlx::query(APPLY_DELTA_SQL)
                .bind(delta.chain.as_str())
                .bind(address_to_text(&delta.contract))
                .bind(u256_to_hex(&delta.token_id))
                .bind(address_to_text(&delta.owner))
                .bind(signed)
                .bind(history)
                .bind(delta.block_number as i64)
                .execute(&self.pool)
                .await
                .context("applying erc1155 delta")?;
            written += result.rows_affected();
        }
        Ok(written)
    }

    /// Advisory pre-check for the reconciliation warning. The clamp itself
    /// happens atomically in SQL; this read only decides whether to log.
    async fn warn_if_insufficient(&self, delta: &Erc1155Delta) {
        let current = sqlx::query_scalar::<_, String>(
            r#"
            SELECT quantity::text FROM tokens
            WHERE chain = $1 AND contract_address = $2 AND token_id = $3
              AND owner_address = $4 AND deleted = FALSE
            "#,
        )
        .bind(delta.chain.as_str())
        .bind(address_to_text(&delta.contract))
        .bind(u256_to_hex(&delta.token_id))
        .bind(address_to_text(&delta.owner))
        .fetch_optional(&self.pool)
        .await
        .ok()
        .flatten()
        .and_then(|text| u256_from_decimal(&text).ok())
        .unwrap_or(U256::ZERO);

        if current < delta.amount {
            tracing::warn!(
                target: "vitrine_storage::tokens",
                chain = %delta.chain,
                contract = %delta.contract,
                token_id = %delta.token_id,
                owner = %delta.owner,
                held = %current,
                outgoing = %delta.amount,
                block = delta.block_number,
                "erc1155 balance would go negative; clamping to zero (missed prior event?)"
            );
        }
    }

    /// Zero out previous owners' rows after an ERC-721 ownership change.
    pub async fn supersede_owners(&self, keys: &[SupersedeKey]) -> Result<u64> {
        let mut superseded = 0u64;
        for key in keys {
            let result = sqlx::query(SUPERSEDE_SQL)
                .bind(key.chain.as_str())
                .bind(address_to_text(&key.contract))
                .bind(u256_to_hex(&key.token_id))
                .bind(address_to_text(&key.new_owner))
                .bind(key.block_number as i64)
                .execute(&self.pool)
                .await
                .context("superseding previous owners")?;
            superseded += result.rows_affected();
        }
        Ok(superseded)
    }

    /// ERC-721 identities with more than one live row (the precondition of
    /// the repair pass).
    pub async fn duplicate_token_groups(
        &self,
        limit: i64,
    ) -> Result<Vec<(Chain, Address, U256)>> {
        let rows = sqlx::query(
            r#"
            SELECT chain, contract_address, token_id
            FROM tokens
            WHERE token_type = 'ERC-721' AND deleted = FALSE
            GROUP BY chain, contract_address, token_id
            HAVING COUNT(*) > 1
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("listing duplicate token groups")?;

        rows.iter()
            .map(|row| {
                let chain: Chain = row.get::<String, _>("chain").parse()?;
                let contract = address_from_text(row.get::<String, _>("contract_address").as_str())?;
                let token_id =
                    vitrine_common::codec::u256_from_hex(row.get::<String, _>("token_id").as_str())?;
                Ok((chain, contract, token_id))
            })
            .collect()
    }

    /// Merge duplicate rows for one token identity: the highest-block row
    /// becomes canonical, every history is unioned into it (ordered by
    /// block), and the other rows are deleted. Safe to re-run: a merged set
    /// has one row and the pass is a no-op.
    pub async fn merge_duplicates(
        &self,
        chain: Chain,
        contract: Address,
        token_id: U256,
    ) -> Result<MergeReport> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, ownership_history, block_number
            FROM tokens
            WHERE chain = $1 AND contract_address = $2 AND token_id = $3 AND deleted = FALSE
            ORDER BY block_number DESC, id DESC
            FOR UPDATE
            "#,
        )
        .bind(chain.as_str())
        .bind(address_to_text(&contract))
        .bind(u256_to_hex(&token_id))
        .fetch_all(&mut *tx)
        .await
        .context("locking duplicate rows")?;

        if rows.len() <= 1 {
            tx.commit().await?;
            return Ok(MergeReport::default());
        }

        let canonical_id: i64 = rows[0].get("id");
        let max_block: i64 = rows[0].get("block_number");
        let histories: Vec<Vec<AddressAtBlock>> = rows
            .iter()
            .map(|row| {
                let value: serde_json::Value = row.get("ownership_history");
                serde_json::from_value(value).context("decoding ownership history")
            })
            .collect::<Result<_>>()?;
        let unioned = union_ownership_histories(&histories);
        let duplicate_ids: Vec<i64> = rows[1..].iter().map(|row| row.get::<i64, _>("id")).collect();

        sqlx::query(
            r#"
            UPDATE tokens
            SET ownership_history = $2,
                block_number = $3,
                last_synced = GREATEST(last_synced, now())
            WHERE id = $1
            "#,
        )
        .bind(canonical_id)
        .bind(serde_json::to_value(&unioned).context("encoding unioned history")?)
        .bind(max_block)
        .execute(&mut *tx)
        .await
        .context("updating canonical row")?;

        sqlx::query("DELETE FROM tokens WHERE id = ANY($1)")
            .bind(&duplicate_ids)
            .execute(&mut *tx)
            .await
            .context("deleting duplicate rows")?;

        tx.commit().await?;

        tracing::info!(
            target: "vitrine_storage::tokens",
            %chain,
            contract = %contract,
            token_id = %token_id,
            canonical = canonical_id,
            merged = duplicate_ids.len(),
            "merged duplicate token rows"
        );

        Ok(MergeReport {
            merged_rows: duplicate_ids.len(),
            canonical_id: Some(canonical_id),
        })
    }

    /// Live rows for one token identity, newest block first.
    pub async fn tokens_for_definition(
        &self,
        chain: Chain,
        contract: Address,
        token_id: U256,
    ) -> Result<Vec<Token>> {
        let rows = sqlx::query(TOKEN_SELECT_BY_DEFINITION)
            .bind(chain.as_str())
            .bind(address_to_text(&contract))
            .bind(u256_to_hex(&token_id))
            .fetch_all(&self.pool)
            .await
            .context("fetching token rows")?;
        rows.iter().map(row_to_token).collect()
    }

    /// One owner's row for a token identity.
    pub async fn get_token(
        &self,
        chain: Chain,
        contract: Address,
        token_id: U256,
        owner: Address,
    ) -> Result<Option<Token>> {
        let row = sqlx::query(
            r#"
            SELECT id, chain, contract_address, token_id, token_type, owner_address,
                   quantity::text AS quantity, ownership_history, block_number, is_spam, deleted
            FROM tokens
            WHERE chain = $1 AND contract_address = $2 AND token_id = $3
              AND owner_address = $4 AND deleted = FALSE
            "#,
        )
        .bind(chain.as_str())
        .bind(address_to_text(&contract))
        .bind(u256_to_hex(&token_id))
        .bind(address_to_text(&owner))
        .fetch_optional(&self.pool)
        .await
        .context("fetching token")?;
        row.as_ref().map(row_to_token).transpose()
    }

    /// Tokens with a live balance but no active media record, oldest first.
    /// Feeds the media backfill pass.
    pub async fn medialess_tokens(&self, limit: i64) -> Result<Vec<Token>> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.chain, t.contract_address, t.token_id, t.token_type,
                   t.owner_address, t.quantity::text AS quantity, t.ownership_history,
                   t.block_number, t.is_spam, t.deleted
            FROM tokens t
            LEFT JOIN media_records m
              ON m.chain = t.chain
             AND m.contract_address = t.contract_address
             AND m.token_id = t.token_id
             AND m.active = TRUE AND m.deleted = FALSE
            WHERE m.id IS NULL AND t.deleted = FALSE AND t.quantity > 0
            ORDER BY t.id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("listing medialess tokens")?;
        rows.iter().map(row_to_token).collect()
    }
}

const TOKEN_SELECT_BY_DEFINITION: &str = r#"
SELECT id, chain, contract_address, token_id, token_type, owner_address,
       quantity::text AS quantity, ownership_history, block_number, is_spam, deleted
FROM tokens
WHERE chain = $1 AND contract_address = $2 AND token_id = $3 AND deleted = FALSE
ORDER BY block_number DESC, id DESC
"#;

fn row_to_token(row: &PgRow) -> Result<Token> {
    let token_type = match row.get::<String, _>("token_type").as_str() {
        "ERC-1155" => TokenType::Erc1155,
        _ => TokenType::Erc721,
    };
    let history: serde_json::Value = row.get("ownership_history");
    Ok(Token {
        id: Some(row.get::<i64, _>("id")),
        chain: row.get::<String, _>("chain").parse()?,
        contract: address_from_text(row.get::<String, _>("contract_address").as_str())?,
        token_id: vitrine_common::codec::u256_from_hex(row.get::<String, _>("token_id").as_str())?,
        token_type,
        owner_address: address_from_text(row.get::<String, _>("owner_address").as_str())?,
        quantity: u256_from_decimal(row.get::<String, _>("quantity").as_str())?,
        ownership_history: serde_json::from_value(history).context("decoding ownership history")?,
        block_number: row.get::<i64, _>("block_number") as u64,
        is_spam: row.get("is_spam"),
        deleted: row.get("deleted"),
    })
}
