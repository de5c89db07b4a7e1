// Listing Registry - batch diffing and reconciliation for scraped
// real-estate listings. Exposes all modules for use in the CLI and tests.

pub mod cashflow;
pub mod config;
pub mod db;
pub mod diff;
pub mod error;
pub mod formatter;
pub mod ingest;
pub mod pipeline;
pub mod properties;
pub mod sources;
pub mod transactions;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use db::{
    count_diffs_for_job, create_import_job, diffs_for_job, find_property, get_import_job,
    is_abnormal, previous_job_id, set_abnormal, setup_database, transactions_for_property,
    DiffType, ImportDiff, ImportJob, ListingRecord, Property, PropertyTransaction,
};
pub use diff::{generate_import_diffs, DiffSummary};
pub use error::PipelineError;
pub use ingest::{import_batch, load_csv, ImportStats, RawListingRow};
pub use pipeline::{run_batch, BatchReport};
pub use properties::{generate_properties, NoopGrader, PropertyGrader};
pub use sources::{rules_for, Source, SourceRules};
pub use transactions::{generate_transactions, guess_transaction};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
