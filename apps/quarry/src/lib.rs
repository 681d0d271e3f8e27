//! # quarry
//!
//! The indexing daemon built on `quarry-core`: the async engine, the
//! extractor gateway, the filesystem monitor, the HTTP control surface and
//! the CLI. The binary in `main.rs` is a thin wrapper; integration tests
//! drive the same pieces through this library.

pub mod api;
pub mod cli;
pub mod client;
pub mod engine;
pub mod gateway;
pub mod monitor;
