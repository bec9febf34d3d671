//! Shared utilities used across the store and transaction layers.

mod util;

pub use util::*;
