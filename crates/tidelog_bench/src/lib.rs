//! Shared helpers for the Tidelog benchmarks.

pub mod utils;
