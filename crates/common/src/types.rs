//! Common data types for Parley components.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a live connection.
///
/// Assigned by the connection registry from a process-local counter and
/// never reused within a process lifetime. Serializes as a plain number
/// on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
