#![forbid(unsafe_code)]
#![warn(unused, missing_debug_implementations, rust_2018_idioms)]

//! # nse-zones
//!
//! The zone detector (§4.6) and confluence calculator (§4.7). Both are pure
//! functions over candle slices; neither holds state.

pub mod confluence;
pub mod zone;

pub use confluence::{compute_confluence, ConfluenceInput, ConfluenceOutput};
pub use zone::detect_zone;
