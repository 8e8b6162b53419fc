//! Room Controller error types.
//!
//! Error types map to stable snake_case wire codes for client `error`
//! events. Internal details are logged server-side but not exposed to
//! clients, and some failures are deliberately silent at the wire.

use thiserror::Error;

/// Room Controller error type.
///
/// Wire code mapping:
/// - `Unauthenticated`: `unauthenticated`
/// - `NotInRoom`: `not_in_room`
/// - `TargetNotInRoom`: `target_not_in_room`
/// - `CapacityExceeded`: `capacity_exceeded`
/// - `PermissionDenied`: `permission_denied` (silent; see [`CoreError::is_silent`])
/// - `RoomNotFound`, `Store`, `Backplane`, `Config`, `Internal`: `internal_error`
#[derive(Debug, Error)]
pub enum CoreError {
    /// Operation attempted before an identity was bound.
    #[error("Not authenticated")]
    Unauthenticated,

    /// Signaling or chat attempted while not a member of any room.
    #[error("Not in a room")]
    NotInRoom,

    /// Targeted envelope addressed to a peer outside the sender's room.
    #[error("Target {0} is not in the room")]
    TargetNotInRoom(common::types::ConnectionId),

    /// Moderation attempted without the admin capability.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Room lookup failed. Rooms materialize on demand, so this only
    /// occurs on internal paths and is never user-visible.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Connection registration refused at the configured cap.
    #[error("Connection capacity exceeded")]
    CapacityExceeded,

    /// Persistence store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Backplane publish or subscribe failed.
    #[error("Backplane error: {0}")]
    Backplane(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns the stable wire code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Unauthenticated => "unauthenticated",
            CoreError::NotInRoom => "not_in_room",
            CoreError::TargetNotInRoom(_) => "target_not_in_room",
            CoreError::PermissionDenied(_) => "permission_denied",
            CoreError::CapacityExceeded => "capacity_exceeded",
            CoreError::RoomNotFound(_)
            | CoreError::Store(_)
            | CoreError::Backplane(_)
            | CoreError::Config(_)
            | CoreError::Internal(_) => "internal_error",
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            CoreError::Unauthenticated => "Authenticate before performing this action".to_string(),
            CoreError::NotInRoom => "Join a room before performing this action".to_string(),
            CoreError::TargetNotInRoom(_) => "Target peer is not in your room".to_string(),
            CoreError::PermissionDenied(_) => "Permission denied".to_string(),
            CoreError::CapacityExceeded => "Server is at capacity, please try again".to_string(),
            CoreError::RoomNotFound(_)
            | CoreError::Store(_)
            | CoreError::Backplane(_)
            | CoreError::Config(_)
            | CoreError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Whether this error must NOT be surfaced to the client at all.
    ///
    /// Failed moderation attempts are ignored without feedback so probing
    /// clients learn nothing, and room lookups are an internal concern.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            CoreError::PermissionDenied(_) | CoreError::RoomNotFound(_)
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::ConnectionId;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(CoreError::Unauthenticated.error_code(), "unauthenticated");
        assert_eq!(CoreError::NotInRoom.error_code(), "not_in_room");
        assert_eq!(
            CoreError::TargetNotInRoom(ConnectionId(7)).error_code(),
            "target_not_in_room"
        );
        assert_eq!(
            CoreError::PermissionDenied("not admin".to_string()).error_code(),
            "permission_denied"
        );
        assert_eq!(CoreError::CapacityExceeded.error_code(), "capacity_exceeded");

        // Infrastructure failures collapse to a single opaque code
        assert_eq!(
            CoreError::RoomNotFound("r1".to_string()).error_code(),
            "internal_error"
        );
        assert_eq!(
            CoreError::Store("write failed".to_string()).error_code(),
            "internal_error"
        );
        assert_eq!(
            CoreError::Backplane("conn refused".to_string()).error_code(),
            "internal_error"
        );
        assert_eq!(
            CoreError::Internal("oops".to_string()).error_code(),
            "internal_error"
        );
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let store_err = CoreError::Store("connection refused at 192.168.1.100:5432".to_string());
        assert!(!store_err.client_message().contains("192.168"));
        assert_eq!(store_err.client_message(), "An internal error occurred");

        let backplane_err = CoreError::Backplane("NOAUTH Authentication required".to_string());
        assert!(!backplane_err.client_message().contains("NOAUTH"));

        let denied = CoreError::PermissionDenied("conn 12 lacks admin".to_string());
        assert!(!denied.client_message().contains("12"));
    }

    #[test]
    fn test_silent_errors() {
        assert!(CoreError::PermissionDenied("not admin".to_string()).is_silent());
        assert!(CoreError::RoomNotFound("r9".to_string()).is_silent());

        assert!(!CoreError::Unauthenticated.is_silent());
        assert!(!CoreError::NotInRoom.is_silent());
        assert!(!CoreError::TargetNotInRoom(ConnectionId(3)).is_silent());
        assert!(!CoreError::CapacityExceeded.is_silent());
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", CoreError::TargetNotInRoom(ConnectionId(9))),
            "Target 9 is not in the room"
        );
        assert_eq!(
            format!("{}", CoreError::Store("timeout".to_string())),
            "Store error: timeout"
        );
    }
}
