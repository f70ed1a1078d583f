#![forbid(unsafe_code)]
#![warn(unused, missing_debug_implementations, rust_2018_idioms)]
#![allow(clippy::type_complexity)]

//! # nse-store
//!
//! The external-interface boundary: typed repository traits (`Store`),
//! `BrokerFeed`/`BrokerExecutor` and the `EventBus` facade. The decision
//! core depends only on these traits; persistence, broker transport and
//! fan-out transport are injected by the binary that wires the engine
//! together, per §1/§6 of the spec.

pub mod error;
pub mod event;
pub mod memory;
pub mod repository;
pub mod traits;

pub use error::StoreError;
pub use event::{EventBus, EventPayload, EventScope, EventType};
pub use traits::{BrokerExecutor, BrokerFeed};
