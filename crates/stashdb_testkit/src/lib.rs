//! # stashdb Testkit
//!
//! Test utilities for stashdb.
//!
//! This crate provides:
//! - [`TestStore`]: a store in a temporary directory with blocking calls
//!   and a test-controlled clock
//! - Property-based generators and a reference model
//! - A crash harness that cuts the binlog at every offset
//! - Fuzz targets for the binlog decoder and replay
//! - End-to-end and stress scenarios
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stashdb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_store() {
//!     with_temp_store(|store| {
//!         store.put(1u128, b"ABC").unwrap();
//!         assert_eq!(store.get(1u128), b"ABC");
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::fuzz::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use crash::CrashHarness;
pub use fixtures::*;
pub use generators::*;
pub use integration::IntegrationHarness;
pub use stress::{StressConfig, StressTestResult};
