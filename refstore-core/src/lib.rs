//! # refstore-core
//!
//! Shared I/O building blocks for the refstore crates:
//!
//! - [`utils`] - compression-transparent readers and extension-driven writers
//! - [`models`] - the [`Region`](models::Region) type used for region-based extraction
//! - [`errors`] - the [`CoreError`](errors::CoreError) type returned by everything here

pub mod errors;
pub mod models;
pub mod utils;
