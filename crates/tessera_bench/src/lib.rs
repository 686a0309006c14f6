//! Benchmark support for tessera.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod utils;
