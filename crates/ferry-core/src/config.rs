//! Environment-driven configuration
//!
//! Deployment configuration comes entirely from the environment. The
//! server refuses to start on any invalid value; there are no silent
//! fallbacks beyond the documented defaults.

use thiserror::Error;
use tracing::warn;

/// Default listen port
pub const DEFAULT_PORT: u16 = 4000;

/// Main configuration structure
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path, or `:memory:`
    pub database_url: String,
    /// Listen port
    pub port: u16,
    /// Allowed CORS origin for the HTTP API
    pub client_url: Option<String>,
    /// Metadata encryption key material (raw hex or passphrase)
    pub metadata_key: Option<String>,
    /// TURN relay settings, when a relay is deployed
    pub turn: Option<TurnConfig>,
    /// Production deployments enforce the encryption key
    pub production: bool,
}

/// TURN relay configuration
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Relay hostname, optionally with port
    pub host: String,
    /// Shared secret used to mint time-limited credentials
    pub secret: String,
    /// Also advertise a TLS (turns:) entry
    pub tls_enabled: bool,
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup function.
    /// Tests use this to avoid touching the real environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::MissingDatabaseUrl)?;

        let port = match get("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(raw))?,
            None => DEFAULT_PORT,
        };

        let production = get("NODE_ENV").as_deref() == Some("production");

        let metadata_key = get("METADATA_ENCRYPTION_KEY");
        if production && metadata_key.is_none() {
            return Err(ConfigError::MissingEncryptionKey);
        }

        let turn_server = get("TURN_SERVER");
        let turn_secret = get("TURN_SECRET");
        let tls_enabled = matches!(
            get("TURNS_ENABLED").as_deref(),
            Some("true") | Some("1") | Some("yes")
        );

        let turn = match (turn_server, turn_secret) {
            (Some(host), Some(secret)) => Some(TurnConfig {
                host,
                secret,
                tls_enabled,
            }),
            (None, None) => {
                if tls_enabled {
                    return Err(ConfigError::TurnIncomplete);
                }
                None
            }
            _ => return Err(ConfigError::TurnIncomplete),
        };

        let client_url = get("CLIENT_URL");
        if client_url.is_none() {
            warn!("CLIENT_URL not set, cross-origin API requests will be refused");
        }

        Ok(Self {
            database_url,
            port,
            client_url,
            metadata_key,
            turn,
            production,
        })
    }
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DATABASE_URL is required")]
    MissingDatabaseUrl,

    #[error("PORT is not a valid port number: {0}")]
    InvalidPort(String),

    #[error("METADATA_ENCRYPTION_KEY is required in production")]
    MissingEncryptionKey,

    #[error("TURN_SERVER, TURN_SECRET and TURNS_ENABLED must be configured together")]
    TurnIncomplete,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        move |key| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn test_minimal_config() {
        let config = Config::from_lookup(env(&[("DATABASE_URL", "ferry.db")])).unwrap();
        assert_eq!(config.database_url, "ferry.db");
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.turn.is_none());
        assert!(!config.production);
    }

    #[test]
    fn test_database_url_required() {
        let err = Config::from_lookup(env(&[])).unwrap_err();
        assert_eq!(err, ConfigError::MissingDatabaseUrl);
    }

    #[test]
    fn test_blank_value_is_missing() {
        let err = Config::from_lookup(env(&[("DATABASE_URL", "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::MissingDatabaseUrl);
    }

    #[test]
    fn test_invalid_port() {
        let err =
            Config::from_lookup(env(&[("DATABASE_URL", "ferry.db"), ("PORT", "notaport")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(_)));
    }

    #[test]
    fn test_production_requires_key() {
        let err = Config::from_lookup(env(&[
            ("DATABASE_URL", "ferry.db"),
            ("NODE_ENV", "production"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingEncryptionKey);

        let ok = Config::from_lookup(env(&[
            ("DATABASE_URL", "ferry.db"),
            ("NODE_ENV", "production"),
            ("METADATA_ENCRYPTION_KEY", "passphrase"),
        ]));
        assert!(ok.is_ok());
    }

    #[test]
    fn test_turn_pair_required_together() {
        let err = Config::from_lookup(env(&[
            ("DATABASE_URL", "ferry.db"),
            ("TURN_SERVER", "turn.example.com"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::TurnIncomplete);

        let config = Config::from_lookup(env(&[
            ("DATABASE_URL", "ferry.db"),
            ("TURN_SERVER", "turn.example.com"),
            ("TURN_SECRET", "s3cret"),
            ("TURNS_ENABLED", "true"),
        ]))
        .unwrap();
        let turn = config.turn.unwrap();
        assert_eq!(turn.host, "turn.example.com");
        assert!(turn.tls_enabled);
    }
}
