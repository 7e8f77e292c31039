//! Checkpoint cursor and per-chunk run statistics.
//!
//! Each catch-up chunk gets one `indexer_statistics` row, written
//! incrementally as sub-stages complete so a crashed run is diagnosable
//! from the partial row. The durable checkpoint itself is a single
//! `indexer_state` key; a failed checkpoint write is fatal to the run.

use anyhow::{Context, Result};
use sqlx::PgPool;

const CHECKPOINT_KEY: &str = "last_synced_block";

#[derive(Clone)]
pub struct StatsRepo {
    pool: PgPool,
}

impl StatsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a statistics row for a chunk. Returns its id.
    pub async fn insert_run(&self, block_start: u64, block_end: u64) -> Result<i64> {
        sqlx::query_scalar(
            r#"
            INSERT INTO indexer_statistics (block_start, block_end)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(block_start as i64)
        .bind(block_end as i64)
        .fetch_one(&self.pool)
        .await
        .context("inserting statistics row")
    }

    /// Record the raw log count once the fetch stage completes.
    pub async fn record_logs(&self, stats_id: i64, total_logs: u64) -> Result<()> {
        sqlx::query("UPDATE indexer_statistics SET total_logs = $2 WHERE id = $1")
            .bind(stats_id)
            .bind(total_logs as i64)
            .execute(&self.pool)
            .await
            .context("recording log count")?;
        Ok(())
    }

    /// Record merge-stage counts.
    pub async fn record_counts(
        &self,
        stats_id: i64,
        total_transfers: u64,
        total_tokens: u64,
        total_contracts: u64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE indexer_statistics
            SET total_transfers = $2, total_tokens = $3, total_contracts = $4
            WHERE id = $1
            "#,
        )
        .bind(stats_id)
        .bind(total_transfers as i64)
        .bind(total_tokens as i64)
        .bind(total_contracts as i64)
        .execute(&self.pool)
        .await
        .context("recording merge counts")?;
        Ok(())
    }

    /// Close out the row with the outcome and wall-clock time.
    pub async fn finish(
        &self,
        stats_id: i64,
        processing_time_secs: f64,
        success: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE indexer_statistics
            SET processing_time_secs = $2, success = $3
            WHERE id = $1
            "#,
        )
        .bind(stats_id)
        .bind(processing_time_secs)
        .bind(success)
        .execute(&self.pool)
        .await
        .context("finishing statistics row")?;
        Ok(())
    }

    /// The durable checkpoint: the next block to index, or `None` before
    /// the first successful chunk.
    pub async fn checkpoint(&self) -> Result<Option<u64>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM indexer_state WHERE key = $1")
                .bind(CHECKPOINT_KEY)
                .fetch_optional(&self.pool)
                .await
                .context("reading checkpoint")?;
        value
            .map(|v| v.parse::<u64>().context("checkpoint is not a block number"))
            .transpose()
    }

    /// Advance the checkpoint. Only the coordinator calls this, and only
    /// after every task for the chunk has been acknowledged.
    pub async fn set_checkpoint(&self, next_block: u64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO indexer_state (key, value, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE SET value = $2, updated_at = now()
            "#,
        )
        .bind(CHECKPOINT_KEY)
        .bind(next_block.to_string())
        .execute(&self.pool)
        .await
        .context("persisting checkpoint")?;
        Ok(())
    }
}
