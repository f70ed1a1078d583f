use thiserror::Error;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum CandleError {
    #[error("store error: {0}")]
    Store(String),

    /// A closed candle failed its own invariants (P1). Treated as a bug per
    /// the spec's error-handling design: logged loudly, operation refused.
    #[error("invariant violation on {symbol}/{timeframe}: {detail}")]
    Invariant {
        symbol: String,
        timeframe: String,
        detail: String,
    },
}

impl From<nse_store::StoreError> for CandleError {
    fn from(value: nse_store::StoreError) -> Self {
        Self::Store(value.to_string())
    }
}
