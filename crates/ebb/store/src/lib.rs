//! # Ebb Store - Entity persistence
//!
//! Layers, workloads and secrets are persisted through the [`StateStore`]
//! trait. Layer state changes go through [`StateStore::transition`], a
//! compare-and-set on the current phase: a second operation issued while a
//! transient state is in flight is rejected, not queued.
//!
//! ## Key Components
//!
//! - [`InMemoryStateStore`]: dashmap-backed, for tests and embedding
//! - [`FileStateStore`]: JSON snapshot on disk, used by the CLI

#![deny(unsafe_code)]

pub mod error;
pub mod file;
pub mod memory;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use file::FileStateStore;
pub use memory::InMemoryStateStore;
pub use store::{Snapshot, StateStore, Transition};
