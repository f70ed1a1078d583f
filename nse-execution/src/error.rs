//! Error taxonomy for the execution orchestrator and exit monitor.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Store(#[from] nse_store::StoreError),

    #[error(transparent)]
    Core(#[from] nse_core::error::CoreError),

    #[error(transparent)]
    Signals(#[from] nse_signals::SignalsError),

    /// A row the caller's foreign key promised would exist was not found.
    /// Reserved for genuine invariant violations (a delivery referencing a
    /// vanished broker or signal) — never raised for a gate rejection, which
    /// is always a typed `RejectionReason` instead.
    #[error("missing {what} referenced by {context}")]
    MissingData { what: &'static str, context: String },
}

impl ExecutionError {
    pub(crate) fn missing(what: &'static str, context: impl std::fmt::Display) -> Self {
        Self::MissingData {
            what,
            context: context.to_string(),
        }
    }
}
