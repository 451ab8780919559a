//! mirrorfs Core - Inode state machine and shared contracts
//!
//! This crate contains the pure part of the mirrorfs state layer:
//! - **Domain types** - `InodeId`, `InodeState`, `Transition`
//! - **State machine** - the transition table with its allowed predecessors
//! - **Errors** - `IllegalTransition` and parsing failures
//! - **Configuration** - the YAML config shared by every mirrorfs process
//! - **Ports** - `IInodeStateStore`, implemented by `mirrorfs-state`
//!
//! # Architecture
//!
//! Nothing in here touches the database. The storage adapter in
//! `mirrorfs-state` reads the current state inside a transaction and asks
//! [`domain::Transition::apply`] what the next state must be.

pub mod config;
pub mod domain;
pub mod ports;
