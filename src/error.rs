// Pipeline errors that callers need to tell apart.
// Everything else travels as anyhow::Error with context attached.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Reconciliation was invoked on a batch flagged abnormal. Nothing has
    /// been written when this is returned.
    #[error("reconciliation blocked: import job {job_id} is flagged abnormal")]
    AbnormalBatch { job_id: i64 },

    /// A diff referenced a property that does not exist yet. The property
    /// reconciler's create path must run before transactions are built.
    #[error("no property exists for origin_url {origin_url}")]
    MissingProperty { origin_url: String },

    /// A source tag with no registered rules variant.
    #[error("unknown listing source: {0}")]
    UnknownSource(String),

    /// A row or diff is missing a field the current operation requires.
    #[error("malformed record: {0}")]
    MalformedRecord(String),
}
