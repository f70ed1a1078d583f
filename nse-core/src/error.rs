//! Shared error taxonomy.
//!
//! Follows the spec's distinction between *errors* (bugs, transient I/O) and
//! *outcomes* (gate rejections, missing data): only the former are modelled
//! as `Error` types here. Rejection reasons live in [`crate::model::RejectionReason`]
//! and flow through typed `Result`/`Outcome` values, never through this enum.

use thiserror::Error;

/// Aggregate error type for the shared primitives in this crate.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum CoreError {
    /// A configuration record failed to load or validate.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A partition executor's channel receiver was dropped.
    #[error("partition channel closed")]
    PartitionClosed,

    /// An invariant the caller was required to uphold was violated.
    ///
    /// Reserved for the "treat as a bug" class in the spec's error design
    /// (e.g. a partial candle with `close_ts < open_ts`). Never raised on
    /// reachable external input.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for CoreError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::PartitionClosed
    }
}
