#![forbid(unsafe_code)]
#![warn(unused, missing_debug_implementations, rust_2018_idioms)]
#![allow(clippy::too_many_arguments)]

//! # nse-execution
//!
//! The order-placement side of the pipeline: [`orchestrator::ExecutionOrchestrator`]
//! (§4.15) turns a `CREATED` `SignalDelivery` into a sized, qualified
//! `TradeIntent` and places the resulting order; [`monitor::ExitMonitor`]
//! (§4.16) watches every tick for an open trade's exit condition and hands
//! qualifying exits to [`nse_signals::exit::ExitCoordinator`].

pub mod error;
pub mod monitor;
pub mod orchestrator;

pub use error::ExecutionError;
