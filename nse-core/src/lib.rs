#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! # nse-core
//!
//! Shared domain model, session clock, configuration record, error taxonomy
//! and partition-executor primitives for the NSE multi-timeframe decision
//! core. Every other crate in the workspace (`nse-candles`, `nse-zones`,
//! `nse-risk`, `nse-signals`, `nse-execution`, `nse-store`) depends on this
//! crate for its vocabulary types.

pub mod clock;
pub mod config;
pub mod error;
pub mod model;
pub mod partition;

pub use error::CoreError;
