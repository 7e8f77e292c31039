//! Embedded schema, applied idempotently at startup.

use anyhow::{Context, Result};
use sqlx::PgPool;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS contracts (
    id BIGSERIAL PRIMARY KEY,
    chain TEXT NOT NULL,
    address TEXT NOT NULL,
    owner_address TEXT,
    creator_address TEXT,
    owner_method TEXT NOT NULL DEFAULT 'failed',
    name TEXT,
    symbol TEXT,
    latest_block BIGINT NOT NULL DEFAULT 0,
    parent_id BIGINT REFERENCES contracts(id),
    deleted BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    last_updated TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE UNIQUE INDEX IF NOT EXISTS contracts_chain_address_idx
    ON contracts (chain, address) WHERE parent_id IS NULL;

CREATE TABLE IF NOT EXISTS tokens (
    id BIGSERIAL PRIMARY KEY,
    chain TEXT NOT NULL,
    contract_address TEXT NOT NULL,
    token_id TEXT NOT NULL,
    token_type TEXT NOT NULL,
    owner_address TEXT NOT NULL,
    quantity NUMERIC(78, 0) NOT NULL DEFAULT 0,
    ownership_history JSONB NOT NULL DEFAULT '[]'::jsonb,
    block_number BIGINT NOT NULL,
    last_synced TIMESTAMPTZ NOT NULL DEFAULT now(),
    is_spam BOOLEAN NOT NULL DEFAULT FALSE,
    deleted BOOLEAN NOT NULL DEFAULT FALSE
);
CREATE UNIQUE INDEX IF NOT EXISTS tokens_identity_idx
    ON tokens (token_id, contract_address, chain, owner_address) WHERE deleted = FALSE;
CREATE INDEX IF NOT EXISTS tokens_owner_idx ON tokens (owner_address) WHERE deleted = FALSE;
CREATE INDEX IF NOT EXISTS tokens_contract_idx ON tokens (chain, contract_address);

CREATE TABLE IF NOT EXISTS media_records (
    id BIGSERIAL PRIMARY KEY,
    chain TEXT NOT NULL,
    contract_address TEXT NOT NULL,
    token_id TEXT NOT NULL,
    media_type TEXT NOT NULL,
    media_url TEXT NOT NULL,
    thumbnail_url TEXT,
    width BIGINT,
    height BIGINT,
    active BOOLEAN NOT NULL DEFAULT TRUE,
    deleted BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE UNIQUE INDEX IF NOT EXISTS media_records_active_idx
    ON media_records (chain, contract_address, token_id) WHERE active = TRUE AND deleted = FALSE;
CREATE INDEX IF NOT EXISTS media_records_token_idx
    ON media_records (chain, contract_address, token_id);

CREATE TABLE IF NOT EXISTS indexer_statistics (
    id BIGSERIAL PRIMARY KEY,
    block_start BIGINT NOT NULL,
    block_end BIGINT NOT NULL,
    success BOOLEAN NOT NULL DEFAULT FALSE,
    total_logs BIGINT,
    total_transfers BIGINT,
    total_tokens BIGINT,
    total_contracts BIGINT,
    processing_time_secs DOUBLE PRECISION,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS indexer_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;

/// Apply the embedded schema. Every statement is `IF NOT EXISTS`, so this
/// is safe to run on every startup.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .context("applying schema")?;
    tracing::info!(target: "vitrine_storage::schema", "schema applied");
    Ok(())
}
