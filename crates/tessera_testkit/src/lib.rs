//! # Tessera Testkit
//!
//! Test utilities for tessera.
//!
//! This crate provides:
//! - The `Sample` schema covering every property shape, and opened realms
//!   over an [`tessera_engine::InMemoryEngine`]
//! - Property-based test strategies using proptest
//! - One-time `tracing` setup for tests
//!
//! ## Usage
//!
//! ```rust
//! use tessera_testkit::prelude::*;
//!
//! with_sample_realm(|realm| {
//!     let sample = realm
//!         .write(|w| w.create_object_with_primary_key("Sample", 1, UpdatePolicy::Error))
//!         .unwrap();
//!     assert_eq!(sample.class_name(), "Sample");
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use tessera_core::{
        CoreError, CoreResult, Object, ObjectCache, Realm, UpdatePolicy, Value,
    };
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
