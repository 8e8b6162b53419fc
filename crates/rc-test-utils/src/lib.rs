//! # RC Test Utilities
//!
//! Shared test utilities for the Room Controller.
//!
//! This crate provides in-memory implementations of the external
//! collaborator traits so coordinator behavior can be tested without
//! real identity or persistence services.
//!
//! ## Modules
//!
//! - `stores` - Mock credential and persistence stores
//! - `sinks` - Event sink helpers for observing deliveries
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rc_test_utils::{MockCredentialStore, MockPersistenceStore};
//!
//! let credentials = MockCredentialStore::new()
//!     .with_user("alice", "proof-a")
//!     .with_admin("root", "proof-r")
//!     .with_banned("mallory");
//!
//! let store = MockPersistenceStore::new();
//! // ...wire them into a SessionCoordinator and assert on
//! // store.messages() / store.bans() afterwards.
//! ```

pub mod sinks;
pub mod stores;

pub use sinks::{event_sink, recv_event};
pub use stores::{MockCredentialStore, MockPersistenceStore};
