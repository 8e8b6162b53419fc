//! Room Controller configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:9091";

/// Default cap on concurrent registered connections.
pub const DEFAULT_MAX_CONNECTIONS: u64 = 10_000;

/// Default per-room actor mailbox capacity.
pub const DEFAULT_ROOM_MAILBOX_CAPACITY: usize = 64;

/// Default grace period transports give unauthenticated connections.
pub const DEFAULT_AUTH_GRACE_SECONDS: u64 = 30;

/// Default shutdown drain timeout.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "rc";

/// Which backplane adapter to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackplaneMode {
    /// Redis pub/sub; requires `REDIS_URL` and is selected whenever one
    /// is set.
    Redis,
    /// In-process only; the default when `REDIS_URL` is absent. For
    /// single-instance deployments and tests.
    Memory,
}

/// Room Controller configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// Unique identifier for this instance, tagged onto backplane frames.
    pub instance_id: String,

    /// Backplane adapter selection; follows `REDIS_URL` presence unless
    /// pinned by `RC_BACKPLANE`.
    pub backplane_mode: BackplaneMode,

    /// Redis connection URL; required when `backplane_mode` is redis.
    /// Protected by `SecretString` to prevent accidental logging.
    pub redis_url: Option<SecretString>,

    /// Health endpoint bind address (default: "0.0.0.0:9091").
    pub health_bind_address: String,

    /// Maximum concurrent registered connections.
    pub max_connections: u64,

    /// Per-room actor mailbox capacity.
    pub room_mailbox_capacity: usize,

    /// Grace period (seconds) transports should allow a connection to
    /// authenticate before closing it. Advisory: enforced at the
    /// transport layer, carried here so all adapters agree.
    pub auth_grace_seconds: u64,

    /// How long graceful shutdown waits for room actors to drain.
    pub shutdown_timeout_seconds: u64,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("instance_id", &self.instance_id)
            .field("backplane_mode", &self.backplane_mode)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("health_bind_address", &self.health_bind_address)
            .field("max_connections", &self.max_connections)
            .field("room_mailbox_capacity", &self.room_mailbox_capacity)
            .field("auth_grace_seconds", &self.auth_grace_seconds)
            .field("shutdown_timeout_seconds", &self.shutdown_timeout_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let redis_url = vars.get("REDIS_URL").cloned().map(SecretString::from);

        // RC_BACKPLANE pins the adapter; unset, REDIS_URL presence decides
        let backplane_mode = match vars.get("RC_BACKPLANE").map(String::as_str) {
            Some("redis") => BackplaneMode::Redis,
            Some("memory") => BackplaneMode::Memory,
            None => {
                if redis_url.is_some() {
                    BackplaneMode::Redis
                } else {
                    BackplaneMode::Memory
                }
            }
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "RC_BACKPLANE must be \"redis\" or \"memory\", got \"{other}\""
                )))
            }
        };
        if backplane_mode == BackplaneMode::Redis && redis_url.is_none() {
            return Err(ConfigError::MissingEnvVar("REDIS_URL".to_string()));
        }

        let health_bind_address = vars
            .get("RC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let max_connections = parse_var(vars, "RC_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        let room_mailbox_capacity = parse_var(
            vars,
            "RC_ROOM_MAILBOX_CAPACITY",
            DEFAULT_ROOM_MAILBOX_CAPACITY,
        )?;
        let auth_grace_seconds = parse_var(vars, "RC_AUTH_GRACE_SECONDS", DEFAULT_AUTH_GRACE_SECONDS)?;
        let shutdown_timeout_seconds = parse_var(
            vars,
            "RC_SHUTDOWN_TIMEOUT_SECONDS",
            DEFAULT_SHUTDOWN_TIMEOUT_SECONDS,
        )?;

        // Generate instance ID when not pinned by the deployment
        let instance_id = vars.get("RC_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            instance_id,
            backplane_mode,
            redis_url,
            health_bind_address,
            max_connections,
            room_mailbox_capacity,
            auth_grace_seconds,
            shutdown_timeout_seconds,
        })
    }
}

/// Parse an optional numeric variable, rejecting malformed values
/// instead of silently falling back to the default.
fn parse_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name} must be numeric, got \"{raw}\""))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "REDIS_URL".to_string(),
            "redis://localhost:6379".to_string(),
        )])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let vars = base_vars();

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.backplane_mode, BackplaneMode::Redis);
        assert_eq!(
            config.redis_url.unwrap().expose_secret(),
            "redis://localhost:6379"
        );
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.room_mailbox_capacity, DEFAULT_ROOM_MAILBOX_CAPACITY);
        assert_eq!(config.auth_grace_seconds, DEFAULT_AUTH_GRACE_SECONDS);
        assert_eq!(
            config.shutdown_timeout_seconds,
            DEFAULT_SHUTDOWN_TIMEOUT_SECONDS
        );
        // Instance ID should be auto-generated
        assert!(config.instance_id.starts_with("rc-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert(
            "RC_HEALTH_BIND_ADDRESS".to_string(),
            "127.0.0.1:9191".to_string(),
        );
        vars.insert("RC_MAX_CONNECTIONS".to_string(), "500".to_string());
        vars.insert("RC_ROOM_MAILBOX_CAPACITY".to_string(), "128".to_string());
        vars.insert("RC_AUTH_GRACE_SECONDS".to_string(), "10".to_string());
        vars.insert("RC_SHUTDOWN_TIMEOUT_SECONDS".to_string(), "5".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.health_bind_address, "127.0.0.1:9191");
        assert_eq!(config.max_connections, 500);
        assert_eq!(config.room_mailbox_capacity, 128);
        assert_eq!(config.auth_grace_seconds, 10);
        assert_eq!(config.shutdown_timeout_seconds, 5);
    }

    #[test]
    fn test_instance_id_custom_value() {
        let mut vars = base_vars();
        vars.insert("RC_INSTANCE_ID".to_string(), "rc-custom-001".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");
        assert_eq!(config.instance_id, "rc-custom-001");
    }

    #[test]
    fn test_memory_backplane_needs_no_redis_url() {
        let vars = HashMap::from([("RC_BACKPLANE".to_string(), "memory".to_string())]);

        let config = Config::from_vars(&vars).expect("Config should load successfully");
        assert_eq!(config.backplane_mode, BackplaneMode::Memory);
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_absent_redis_url_selects_memory_backplane() {
        // Single-instance deployments boot with no backplane env at all
        let vars = HashMap::new();

        let config = Config::from_vars(&vars).expect("Config should load successfully");
        assert_eq!(config.backplane_mode, BackplaneMode::Memory);
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_explicit_redis_mode_requires_redis_url() {
        let vars = HashMap::from([("RC_BACKPLANE".to_string(), "redis".to_string())]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "REDIS_URL"));
    }

    #[test]
    fn test_explicit_memory_mode_overrides_present_redis_url() {
        let mut vars = base_vars();
        vars.insert("RC_BACKPLANE".to_string(), "memory".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");
        assert_eq!(config.backplane_mode, BackplaneMode::Memory);
    }

    #[test]
    fn test_unknown_backplane_mode_rejected() {
        let mut vars = base_vars();
        vars.insert("RC_BACKPLANE".to_string(), "carrier-pigeon".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_malformed_numeric_rejected() {
        let mut vars = base_vars();
        vars.insert("RC_MAX_CONNECTIONS".to_string(), "lots".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(v)) if v.contains("RC_MAX_CONNECTIONS")));
    }

    #[test]
    fn test_debug_redacts_sensitive_fields() {
        let vars = base_vars();
        let config = Config::from_vars(&vars).expect("Config should load successfully");

        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("redis://"));
    }
}
