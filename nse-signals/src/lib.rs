#![forbid(unsafe_code)]
#![warn(unused, missing_debug_implementations, rust_2018_idioms)]
#![allow(clippy::too_many_arguments)]

//! # nse-signals
//!
//! Signal Management (SMS, §4.13): the sole mutator of `signals`,
//! `signal_deliveries`, `exit_signals` and `exit_intents`. Two partitioned
//! coordinators own the entry and exit lifecycles respectively —
//! [`entry::EntryCoordinator`] by symbol, [`exit::ExitCoordinator`] by trade
//! id — backed by the shared [`delivery_index::SignalDeliveryIndex`] and the
//! exit-qualification checks in [`qualification`].

pub mod delivery_index;
pub mod entry;
pub mod error;
pub mod exit;
pub mod qualification;

pub use error::SignalsError;
