//! Configuration management for the server.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Attribute used as the identity key during change detection
    pub identity_field: String,
    /// Upper bound on pooled database connections
    pub max_connections: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingDatabaseUrl)?;

        let identity_field = lookup("IDENTITY_FIELD").unwrap_or_else(|| "id".to_string());
        if identity_field.is_empty() {
            return Err(ConfigError::EmptyIdentityField);
        }

        let max_connections = lookup("MAX_CONNECTIONS")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .ok()
            .filter(|&n: &u32| n > 0)
            .ok_or(ConfigError::InvalidMaxConnections)?;

        Ok(Self {
            host,
            port,
            database_url,
            identity_field,
            max_connections,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("IDENTITY_FIELD must not be empty")]
    EmptyIdentityField,

    #[error("Invalid MAX_CONNECTIONS value")]
    InvalidMaxConnections,
}
