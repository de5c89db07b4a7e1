// Per-batch orchestration: diff, then the two reconciliation passes.
//
// The reconcilers read the same finalized diff set and write disjoint
// tables, but the transaction pass depends on the property pass having
// created any new properties, so the pipeline runs them in order.

use anyhow::Result;
use rusqlite::Connection;

use crate::config::PipelineConfig;
use crate::diff::{self, DiffSummary};
use crate::properties::{self, PropertyGrader};
use crate::transactions;

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub job_id: i64,
    pub diff_summary: DiffSummary,
    pub properties_processed: usize,
    pub transactions_processed: usize,
}

/// Run the full pipeline for one batch: generate diffs against the
/// predecessor, reconcile the property registry, reconcile episode
/// history. One batch completes start to finish before the next begins.
pub fn run_batch(
    conn: &Connection,
    job_id: i64,
    config: &PipelineConfig,
    grader: &dyn PropertyGrader,
) -> Result<BatchReport> {
    let diff_summary = diff::generate_import_diffs(conn, job_id)?;
    let properties_processed = properties::generate_properties(conn, job_id, grader)?;
    let transactions_processed = transactions::generate_transactions(conn, job_id, config)?;

    Ok(BatchReport {
        job_id,
        diff_summary,
        properties_processed,
        transactions_processed,
    })
}

// ============================================================================
// TESTS
// ============================================================================
