//! Postgres persistence: contract, token, media and checkpoint
//! repositories, plus the embedded schema.
//!
//! The pipeline owns these tables exclusively; all writes go through the
//! repository types here. Upserts are single-statement
//! `INSERT ... ON CONFLICT DO UPDATE` so concurrent workers never lose
//! updates to read-then-write races.

pub mod contracts;
pub mod media;
pub mod schema;
pub mod stats;
pub mod tokens;

pub use contracts::ContractRepo;
pub use media::MediaRepo;
pub use schema::run_migrations;
pub use stats::StatsRepo;
pub use tokens::{Erc1155Delta, MergeReport, SupersedeKey, TokenRepo};

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connect to Postgres and apply the schema.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("connecting to postgres")?;
    run_migrations(&pool).await?;
    Ok(pool)
}
