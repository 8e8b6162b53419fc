//! Room Controller Library
//!
//! This library provides the core functionality for the Parley Room
//! Controller - the signaling coordination core for WebRTC sessions:
//!
//! - Connection lifecycle and identity binding (connection registry)
//! - Ephemeral rooms that exist exactly while occupied (room directory)
//! - Opaque SDP/ICE relay between peers in a room (signaling relay)
//! - Admin kick/ban/broadcast and global user listing (moderation engine)
//! - Event delivery to local connections and, through a pub/sub
//!   backplane, to sibling instances (presence fanout)
//!
//! # Architecture
//!
//! Per-room mutations are serialized by one actor task per live room:
//!
//! ```text
//! SessionCoordinator (one per instance)
//! ├── ConnectionRegistry (connection id -> identity, admin, room)
//! ├── RoomDirectory
//! │   └── supervises N RoomActors (one per occupied room)
//! ├── PresenceFanout (sinks, room/identity subscriptions, backplane)
//! └── ModerationEngine (admin-gated operations)
//! ```
//!
//! # Key Design Decisions
//!
//! - **One room per connection**: joining a room implicitly leaves the
//!   previous one.
//! - **Rooms exist iff occupied**: actors materialize on first join and
//!   retire when membership reaches zero; empty rooms are unobservable.
//! - **Opaque signaling**: SDP and ICE payloads are relayed untouched,
//!   annotated only with the sender's connection id.
//! - **Silent moderation failures**: refused kicks/bans/broadcasts give
//!   the prober no feedback.
//! - **Stateless core**: identity verification and message/ban
//!   persistence live behind the [`stores`] traits.
//!
//! # Modules
//!
//! - [`coordinator`] - Per-connection event dispatch
//! - [`rooms`] - Room actors and their supervising directory
//! - [`fanout`] - Local delivery plus backplane mirroring
//! - [`backplane`] - Redis and in-memory pub/sub adapters
//! - [`config`] - Service configuration from environment

pub mod backplane;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod events;
pub mod fanout;
pub mod moderation;
pub mod observability;
pub mod registry;
pub mod relay;
pub mod rooms;
pub mod stores;

pub use coordinator::SessionCoordinator;
pub use errors::CoreError;
pub use events::{ClientEvent, ServerEvent};

// Unit tests cannot use the mocks through the rc-test-utils crate: the
// dev-dependency cycle makes those mocks implement the traits of the
// separately compiled non-test rlib, which the test build rejects as a
// different crate. Instead the mock source is compiled directly into the
// test build; the self-alias lets its `use room_controller::...` imports
// resolve to the crate under test.
#[cfg(test)]
extern crate self as room_controller;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[path = "../../rc-test-utils/src/stores.rs"]
mod test_mocks;
