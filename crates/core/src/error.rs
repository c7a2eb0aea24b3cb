//! Pipeline error taxonomy.

use thiserror::Error;

/// Result type used across the reconciliation pipeline.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failure categories of the reconciliation pipeline.
///
/// Only `MalformedSignal` and `NotFound` are ever surfaced to a caller as a
/// client error. Downstream and projection failures are logged by the
/// pipeline and never undo a committed recording write.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Transport failure or non-success HTTP status from the vendor.
    #[error("vendor unavailable: {0}")]
    VendorUnavailable(String),

    /// The vendor reported the job itself as failed.
    #[error("vendor reported failure: {0}")]
    VendorTerminalError(String),

    /// Missing/invalid correlation id, unknown status, or inconsistent payload.
    #[error("malformed signal: {0}")]
    MalformedSignal(String),

    /// The analysis hand-off could not be enqueued or executed.
    #[error("downstream trigger failed: {0}")]
    DownstreamTriggerFailure(String),

    /// The denormalized projection could not be written.
    #[error("projection sync failed: {0}")]
    ProjectionSyncFailure(String),

    /// The referenced job or recording does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The job record store failed.
    #[error("store error: {0}")]
    Store(String),
}

impl PipelineError {
    pub fn vendor_unavailable(msg: impl Into<String>) -> Self {
        Self::VendorUnavailable(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedSignal(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Short machine-readable code, used in HTTP bodies and sweep summaries.
    pub fn code(&self) -> &'static str {
        match self {
            Self::VendorUnavailable(_) => "vendor_unavailable",
            Self::VendorTerminalError(_) => "vendor_terminal_error",
            Self::MalformedSignal(_) => "malformed_signal",
            Self::DownstreamTriggerFailure(_) => "downstream_trigger_failure",
            Self::ProjectionSyncFailure(_) => "projection_sync_failure",
            Self::NotFound(_) => "not_found",
            Self::Store(_) => "store_error",
        }
    }
}
