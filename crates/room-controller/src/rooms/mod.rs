//! Room Directory: per-room actors and their supervising directory.
//!
//! Every mutation of one room's membership goes through that room's
//! actor mailbox, which is the per-room critical section the concurrency
//! model requires. The directory owns room lifecycle: actors materialize
//! on first join and retire when their membership reaches zero.

mod actor;
mod directory;

pub use actor::{LeaveReason, RoomHandle};
pub use directory::RoomDirectory;
