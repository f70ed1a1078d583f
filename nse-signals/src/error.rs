//! Error taxonomy for the signal management service.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalsError {
    #[error(transparent)]
    Store(#[from] nse_store::StoreError),

    #[error(transparent)]
    Core(#[from] nse_core::error::CoreError),
}
