//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the sync engine
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IDataService`] - Point-in-time list and document reads
//! - [`IChangeFeed`] - Push subscriptions delivering coarse change events

pub mod change_feed;
pub mod data_service;

pub use change_feed::{
    ChangeEvent, ChangeOperation, ChangeScope, ChangeSubscription, IChangeFeed,
    SubscriptionHandle,
};
pub use data_service::IDataService;
