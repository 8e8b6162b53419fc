//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate with Parley-specific
//! guidance. Use these types for all sensitive values like backplane URLs with
//! embedded credentials, API keys, and credential proofs.
//!
//! # Compile-Time Safety
//!
//! `SecretBox<T>` and `SecretString` implement `Debug` with redaction, so any
//! code that derives `Debug` on a struct containing secrets automatically gets
//! safe logging behavior. This makes it **impossible** to accidentally log
//! secrets via `{:?}` or tracing.
//!
//! # Memory Safety
//!
//! Secrets are automatically zeroized when dropped, preventing sensitive
//! data from lingering in memory after use.
//!
//! # Example
//!
//! ```rust
//! use common::secret::SecretString;
//! use secrecy::ExposeSecret;
//!
//! #[derive(Debug)]
//! struct BackplaneConfig {
//!     instance_id: String,
//!     redis_url: SecretString,  // Safe: Debug shows "[REDACTED]"
//! }
//!
//! let cfg = BackplaneConfig {
//!     instance_id: "rc-1".to_string(),
//!     redis_url: SecretString::from("redis://:hunter2@redis:6379"),
//! };
//!
//! // This is safe - the URL (and its password) is redacted
//! println!("{:?}", cfg);
//!
//! // To access the actual value, you must explicitly call expose_secret()
//! let url: &str = cfg.redis_url.expose_secret();
//! ```
//!
//! # Parley Usage Guidelines
//!
//! Use `SecretString` for:
//! - Connection URLs that may embed passwords (Redis)
//! - Credential proofs passed through to the identity store
//! - API keys and bearer tokens
//!
//! Use `SecretBox<T>` for:
//! - Custom secret types (e.g., `SecretBox<[u8]>` for binary keys)

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("hunter2");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("redis://:pw@localhost:6379");
        assert_eq!(secret.expose_secret(), "redis://:pw@localhost:6379");
    }

    #[test]
    fn test_struct_with_secret_is_safe() {
        #[allow(dead_code)]
        #[derive(Debug)]
        struct StoreCredentials {
            account: String,
            token: SecretString,
        }

        let creds = StoreCredentials {
            account: "alice".to_string(),
            token: SecretString::from("super-secret"),
        };

        let debug_str = format!("{creds:?}");

        // Account should be visible
        assert!(debug_str.contains("alice"));
        // Token should be redacted
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("super-secret"));
    }

    #[test]
    fn test_deserialize() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct Credentials {
            identity: String,
            proof: SecretString,
        }

        let json = r#"{"identity": "bob", "proof": "my-secret-value"}"#;
        let creds: Credentials = serde_json::from_str(json).expect("deserialize");

        // Verify we can access the secret
        assert_eq!(creds.proof.expose_secret(), "my-secret-value");

        // Verify debug doesn't expose the value
        let debug = format!("{creds:?}");
        assert!(!debug.contains("my-secret-value"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_clone_works() {
        let secret = SecretString::from("cloneable");
        let cloned = secret.clone();
        assert_eq!(cloned.expose_secret(), "cloneable");
    }
}
