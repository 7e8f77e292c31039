//! Duplicate-token repair pass.
//!
//! Duplicate rows for one `(chain, contract, token_id)` can exist if
//! overlapping catch-up runs raced before the atomic upserts landed, or
//! after a manual re-index. The pass is idempotent: the highest-block row
//! wins, histories are unioned, and re-running over a merged set is a
//! no-op.

use anyhow::Result;
use vitrine_storage::TokenRepo;

/// Totals from one repair sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeSummary {
    pub groups: usize,
    pub rows_merged: usize,
}

/// Merge every duplicate ERC-721 group, batch by batch, until none remain.
pub async fn merge_all_duplicates(tokens: &TokenRepo, batch_limit: i64) -> Result<MergeSummary> {
    let mut summary = MergeSummary::default();

    loop {
        let groups = tokens.duplicate_token_groups(batch_limit).await?;
        if groups.is_empty() {
            break;
        }

        let mut merged_this_round = 0usize;
        for (chain, contract, token_id) in groups {
            let report = tokens.merge_duplicates(chain, contract, token_id).await?;
            if report.merged_rows > 0 {
                summary.groups += 1;
                summary.rows_merged += report.merged_rows;
                merged_this_round += report.merged_rows;
            }
        }

        // Every listed group should have merged; if nothing moved, stop
        // rather than spin on rows another writer is touching.
        if merged_this_round == 0 {
            break;
        }
    }

    tracing::info!(
        target: "vitrine::maintenance",
        groups = summary.groups,
        rows = summary.rows_merged,
        "duplicate repair pass complete"
    );
    Ok(summary)
}
