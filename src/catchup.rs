//! Catch-up coordinator: chunked log retrieval with durable checkpointing.
//!
//! A run splits `[from_block, to_block]` into fixed-size chunks and
//! processes them strictly in order. Each chunk opens a statistics row,
//! fetches and decodes the chunk's transfer logs, hands them to the merger
//! in bulk, then closes the statistics row and advances the checkpoint to
//! `chunk_end + 1`. A failed chunk leaves the checkpoint untouched, so a
//! retry resumes at the same chunk. Downstream upserts are idempotent, so
//! at-least-once delivery is safe. Only the coordinator writes the
//! checkpoint, and only after all work for the chunk is acknowledged.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use vitrine_chain::{decode_transfer_logs, transfer_topics, ChainClient};
use vitrine_common::Chain;
use vitrine_storage::StatsRepo;

use crate::merger::{MergeOutcome, TokenMerger};
use crate::resolver::ContractResolver;

#[derive(Debug, Clone)]
pub struct CatchUpConfig {
    pub chain: Chain,
    /// Blocks per `eth_getLogs` call. Providers cap response sizes, so this
    /// stays in the low thousands.
    pub chunk_size: u64,
    /// Resolve owners for contracts first seen in a chunk.
    pub resolve_contract_owners: bool,
    /// Head-polling interval for follow mode.
    pub poll_interval: Duration,
}

impl Default for CatchUpConfig {
    fn default() -> Self {
        Self {
            chain: Chain::Ethereum,
            chunk_size: 2_000,
            resolve_contract_owners: true,
            poll_interval: Duration::from_secs(12),
        }
    }
}

/// Totals across one catch-up run.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatchUpReport {
    pub chunks: u64,
    pub total_logs: u64,
    pub total_transfers: u64,
    pub total_tokens: u64,
    pub total_contracts: u64,
}

impl CatchUpReport {
    fn accumulate(&mut self, logs: usize, outcome: &MergeOutcome) {
        self.total_logs += logs as u64;
        self.total_transfers += outcome.transfers;
        self.total_tokens += outcome.tokens_written;
        self.total_contracts += outcome.contracts_written;
    }
}

/// Split an inclusive block range into inclusive chunks.
fn chunk_ranges(from_block: u64, to_block: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    let chunk_size = chunk_size.max(1);
    let mut ranges = Vec::new();
    let mut start = from_block;
    while start <= to_block {
        let end = to_block.min(start.saturating_add(chunk_size - 1));
        ranges.push((start, end));
        start = end + 1;
    }
    ranges
}

pub struct CatchUpCoordinator {
    client: Arc<dyn ChainClient>,
    merger: TokenMerger,
    resolver: Arc<ContractResolver>,
    stats: StatsRepo,
    config: CatchUpConfig,
    cancel: CancellationToken,
}

impl CatchUpCoordinator {
    pub fn new(
        client: Arc<dyn ChainClient>,
        merger: TokenMerger,
        resolver: Arc<ContractResolver>,
        stats: StatsRepo,
        config: CatchUpConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            merger,
            resolver,
            stats,
            config,
            cancel,
        }
    }

    /// Index `[from_block, to_block]`, advancing the checkpoint per chunk.
    pub async fn run(&self, from_block: u64, to_block: u64) -> Result<CatchUpReport> {
        anyhow::ensure!(
            from_block <= to_block,
            "invalid range: from_block {from_block} > to_block {to_block}"
        );

        tracing::info!(
            target: "vitrine::catchup",
            chain = %self.config.chain,
            from_block,
            to_block,
            chunk_size = self.config.chunk_size,
            "starting catch-up"
        );

        let mut report = CatchUpReport::default();

        for (chunk_start, chunk_end) in chunk_ranges(from_block, to_block, self.config.chunk_size)
        {
            if self.cancel.is_cancelled() {
                anyhow::bail!("catch-up cancelled before chunk starting at {chunk_start}");
            }

            let stats_id = self.stats.insert_run(chunk_start, chunk_end).await?;
            let started = Instant::now();

            let result = tokio::select! {
                _ = self.cancel.cancelled() => {
                    Err(anyhow::anyhow!(
                        "catch-up cancelled during chunk [{chunk_start}, {chunk_end}]"
                    ))
                }
                result = self.process_chunk(chunk_start, chunk_end, stats_id, &mut report) => result,
            };

            let elapsed = started.elapsed().as_secs_f64();
            match result {
                Ok(()) => {
                    self.stats.finish(stats_id, elapsed, true).await?;
                    // A checkpoint that cannot be persisted must not be
                    // silently skipped: fail the run, resumable from the
                    // last good checkpoint.
                    self.stats
                        .set_checkpoint(chunk_end + 1)
                        .await
                        .context("checkpoint write failed")?;
                    report.chunks += 1;
                }
                Err(err) => {
                    // Best-effort close of the stats row; the checkpoint is
                    // deliberately left untouched.
                    if let Err(stats_err) = self.stats.finish(stats_id, elapsed, false).await {
                        tracing::warn!(
                            target: "vitrine::catchup",
                            error = %stats_err,
                            "failed to close statistics row for failed chunk"
                        );
                    }
                    return Err(err.context(format!(
                        "chunk [{chunk_start}, {chunk_end}] failed; checkpoint not advanced"
                    )));
                }
            }
        }

        tracing::info!(
            target: "vitrine::catchup",
            chunks = report.chunks,
            logs = report.total_logs,
            transfers = report.total_transfers,
            tokens = report.total_tokens,
            contracts = report.total_contracts,
            "catch-up complete"
        );
        Ok(report)
    }

    async fn process_chunk(
        &self,
        chunk_start: u64,
        chunk_end: u64,
        stats_id: i64,
        report: &mut CatchUpReport,
    ) -> Result<()> {
        let logs = self
            .client
            .get_logs(chunk_start, chunk_end, &transfer_topics())
            .await
            .context("fetching transfer logs")?;
        self.stats.record_logs(stats_id, logs.len() as u64).await?;

        if logs.is_empty() {
            tracing::debug!(
                target: "vitrine::catchup",
                chunk_start,
                chunk_end,
                "empty chunk"
            );
            return Ok(());
        }

        let events = decode_transfer_logs(self.config.chain, &logs);
        let outcome = self.merger.upsert_events(&events).await?;
        self.stats
            .record_counts(
                stats_id,
                outcome.transfers,
                outcome.tokens_written,
                outcome.contracts_written,
            )
            .await?;
        report.accumulate(logs.len(), &outcome);

        if self.config.resolve_contract_owners && !outcome.contracts_seen.is_empty() {
            // Ownership resolution failures never fail the chunk; the rows
            // stay eligible for the missing-owner sweep.
            let resolver = Arc::clone(&self.resolver);
            if let Err(err) = resolver.resolve_and_store(&outcome.contracts_seen).await {
                tracing::warn!(
                    target: "vitrine::catchup",
                    error = %err,
                    "contract ownership resolution pass failed"
                );
            }
        }

        tracing::info!(
            target: "vitrine::catchup",
            chunk_start,
            chunk_end,
            logs = logs.len(),
            transfers = outcome.transfers,
            tokens = outcome.tokens_written,
            contracts = outcome.contracts_written,
            "processed chunk"
        );
        Ok(())
    }

    /// Follow the chain head after catch-up: poll for new blocks and index
    /// them chunk by chunk. Returns when cancelled.
    pub async fn follow(&self, mut next_block: u64) -> Result<()> {
        tracing::info!(
            target: "vitrine::catchup",
            next_block,
            poll_secs = self.config.poll_interval.as_secs(),
            "following chain head"
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.client.latest_block().await {
                Ok(head) if head + 1 < next_block => {
                    // The head moved backwards past our checkpoint: a reorg
                    // deeper than the confirmation window. Not corrected
                    // automatically; the affected range needs an
                    // administrative re-index.
                    tracing::warn!(
                        target: "vitrine::catchup",
                        head,
                        checkpoint = next_block,
                        "chain head below checkpoint; reorg beyond confirmation window, \
                         re-index the affected range manually"
                    );
                }
                Ok(head) if head >= next_block => {
                    self.run(next_block, head).await?;
                    next_block = head + 1;
                }
                Ok(_) => {
                    tracing::debug!(target: "vitrine::catchup", next_block, "no new blocks");
                }
                Err(err) => {
                    tracing::warn!(
                        target: "vitrine::catchup",
                        error = %err,
                        "failed to fetch chain head"
                    );
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        tracing::info!(target: "vitrine::catchup", "follow loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_ranges_exact_multiple() {
        let ranges = chunk_ranges(0, 5_999, 2_000);
        assert_eq!(ranges, vec![(0, 1_999), (2_000, 3_999), (4_000, 5_999)]);
    }

    #[test]
    fn test_chunk_ranges_with_remainder() {
        let ranges = chunk_ranges(100, 4_500, 2_000);
        assert_eq!(ranges, vec![(100, 2_099), (2_100, 4_099), (4_100, 4_500)]);
    }

    #[test]
    fn test_chunk_ranges_single_block() {
        assert_eq!(chunk_ranges(42, 42, 2_000), vec![(42, 42)]);
    }

    #[test]
    fn test_chunk_ranges_zero_size_clamped() {
        // A zero chunk size would never terminate; it is clamped to one.
        let ranges = chunk_ranges(0, 2, 0);
        assert_eq!(ranges, vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn test_chunk_ranges_cover_without_gaps() {
        let ranges = chunk_ranges(7, 10_007, 512);
        assert_eq!(ranges.first().unwrap().0, 7);
        assert_eq!(ranges.last().unwrap().1, 10_007);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].1 + 1, pair[1].0);
        }
    }
}
