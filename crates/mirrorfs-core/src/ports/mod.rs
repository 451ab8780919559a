//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the interfaces the rest of mirrorfs (filesystem layer, upload
//! and download workers, tooling) programs against. Their implementations
//! live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IInodeStateStore`] - Persisted inode state machine and state queries

pub mod state_store;

pub use state_store::IInodeStateStore;
