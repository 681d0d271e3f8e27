//! # Storage Module
//!
//! Durable backing for the resource graph.

pub mod redb_store;

pub use redb_store::RedbStore;
