//! Common types and utilities shared across the base station core.

pub mod types;
pub mod utils;

pub use types::*;
pub use utils::{pack_bits, unpack_bits, Latency, LatencyReport};
