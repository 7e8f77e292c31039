//! Media record repository.
//!
//! Saving a record supersedes the previous active record for the same token
//! definition inside one transaction: the old record is deactivated, never
//! deleted, so history stays inspectable.

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use vitrine_common::codec::{address_from_text, address_to_text, u256_from_hex, u256_to_hex};
use vitrine_common::{Chain, MediaRecord, MediaType};

#[derive(Clone)]
pub struct MediaRepo {
    pool: PgPool,
}

impl MediaRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deactivate the previous active record and insert the new one, in one
    /// transaction. Returns the new record's id.
    pub async fn save_with_supersession(&self, record: &MediaRecord) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE media_records
            SET active = FALSE
            WHERE chain = $1 AND contract_address = $2 AND token_id = $3
              AND active = TRUE AND deleted = FALSE
            "#,
        )
        .bind(record.chain.as_str())
        .bind(address_to_text(&record.contract))
        .bind(u256_to_hex(&record.token_id))
        .execute(&mut *tx)
        .await
        .context("deactivating previous media record")?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO media_records
                (chain, contract_address, token_id, media_type, media_url,
                 thumbnail_url, width, height, active, deleted)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, FALSE)
            RETURNING id
            "#,
        )
        .bind(record.chain.as_str())
        .bind(address_to_text(&record.contract))
        .bind(u256_to_hex(&record.token_id))
        .bind(record.media_type.as_str())
        .bind(&record.media_url)
        .bind(record.thumbnail_url.as_deref())
        .bind(record.dimensions.map(|(w, _)| w as i64))
        .bind(record.dimensions.map(|(_, h)| h as i64))
        .fetch_one(&mut *tx)
        .await
        .context("inserting media record")?;

        tx.commit().await?;

        tracing::debug!(
            target: "vitrine_storage::media",
            chain = %record.chain,
            contract = %record.contract,
            token_id = %record.token_id,
            media_type = %record.media_type,
            id,
            "saved media record"
        );
        Ok(id)
    }

    /// The single active record for a token definition, if any.
    pub async fn active_record(
        &self,
        chain: Chain,
        contract: Address,
        token_id: U256,
    ) -> Result<Option<MediaRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, chain, contract_address, token_id, media_type, media_url,
                   thumbnail_url, width, height, active, deleted
            FROM media_records
            WHERE chain = $1 AND contract_address = $2 AND token_id = $3
              AND active = TRUE AND deleted = FALSE
            "#,
        )
        .bind(chain.as_str())
        .bind(address_to_text(&contract))
        .bind(u256_to_hex(&token_id))
        .fetch_optional(&self.pool)
        .await
        .context("fetching active media record")?;
        row.as_ref().map(row_to_media_record).transpose()
    }
}

fn row_to_media_record(row: &PgRow) -> Result<MediaRecord> {
    let media_type = match row.get::<String, _>("media_type").as_str() {
        "image" => MediaType::Image,
        "gif" => MediaType::Gif,
        "svg" => MediaType::Svg,
        "video" => MediaType::Video,
        "audio" => MediaType::Audio,
        "animation" => MediaType::Animation,
        "html" => MediaType::Html,
        "text" => MediaType::Text,
        "json" => MediaType::Json,
        _ => MediaType::Unknown,
    };
    let width: Option<i64> = row.get("width");
    let height: Option<i64> = row.get("height");
    Ok(MediaRecord {
        id: Some(row.get::<i64, _>("id")),
        chain: row.get::<String, _>("chain").parse()?,
        contract: address_from_text(row.get::<String, _>("contract_address").as_str())?,
        token_id: u256_from_hex(row.get::<String, _>("token_id").as_str())?,
        media_type,
        media_url: row.get("media_url"),
        thumbnail_url: row.get("thumbnail_url"),
        dimensions: width.zip(height).map(|(w, h)| (w as u32, h as u32)),
        active: row.get("active"),
        deleted: row.get("deleted"),
    })
}
