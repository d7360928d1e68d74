//! Shared types, the storage adapter trait, and error types for the
//! ActingWeb distributed actor framework.
//!
//! This crate has no engine logic of its own: it exists so adapter crates
//! (`actingweb-storage-memory`, `actingweb-storage-sql`) and the engine crate
//! (`actingweb`) can depend on a common vocabulary without pulling the whole
//! engine into a storage adapter's compile graph.

pub mod error;
pub mod prelude;
pub mod storage;
pub mod trust_type;
pub mod types;

// vim: ts=4
