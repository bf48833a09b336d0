//! # Tidelog Testkit
//!
//! Test utilities for Tidelog.
//!
//! This crate provides:
//! - Temporary store fixtures and common scenarios
//! - Property-based test generators using proptest
//! - Crash simulation backends and on-disk corruption helpers
//! - Fuzz testing harnesses for the frame and index decoders
//! - Stress testing utilities for concurrent producers
//! - Frame encoding test vectors
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tidelog_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_store() {
//!     with_temp_store(|store| {
//!         store.open_topic("events", 1, TopicConfig::default()).unwrap();
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod stress;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::fuzz::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use crate::vectors::*;
    pub use tidelog_core::{LogStore, PartitionId, StoreConfig, TopicConfig};
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
pub use vectors::*;
