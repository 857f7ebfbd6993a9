//! GasWatch Core - Domain types and ports for the live-query layer
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain types** - `QueryDescriptor`, `IdentityKey`, `SyncState`, `ClassifiedError`
//! - **Port definitions** - Traits for backend adapters: `IDataService`, `IChangeFeed`
//! - **Configuration** - YAML-backed settings shared by the sync engine and the CLI
//!
//! # Architecture
//!
//! The domain module contains pure value types with no I/O.
//! Ports define trait interfaces that adapter crates (SQLite, hosted
//! backends, test doubles) implement. The sync crate orchestrates the
//! domain types through these ports.

pub mod config;
pub mod domain;
pub mod ports;
