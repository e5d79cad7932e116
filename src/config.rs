use std::env;
use std::time::Duration;
use thiserror::Error;

/// Settings consumed by [`crate::Server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Document served for an empty path (default: `default`)
    pub default_document: String,
    /// Purge deleted CRDT content (default: true)
    pub gc: bool,
    /// Awareness entries not renewed within this window are removed.
    /// `None` keeps them until their connection leaves.
    pub awareness_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_document: "default".to_string(),
            gc: true,
            awareness_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Process configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 1234)
    pub port: u16,
    /// Leading path segments owned by sibling subsystems (default: chat)
    pub reserved_prefixes: Vec<String>,
    pub server: ServerConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid PORT environment variable")]
    InvalidPort,
    #[error("invalid boolean in {0}")]
    InvalidBool(&'static str),
    #[error("invalid number of seconds in {0}")]
    InvalidSeconds(&'static str),
    #[error("CORAL_DEFAULT_DOC must not be empty")]
    EmptyDefaultDocument,
}

impl Config {
    /// Load configuration from the environment, reading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = lookup("PORT")
            .unwrap_or_else(|| "1234".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let reserved_prefixes = lookup("CORAL_RESERVED_PREFIXES")
            .unwrap_or_else(|| "chat".to_string())
            .split(',')
            .map(|s| s.trim().trim_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let default_document = lookup("CORAL_DEFAULT_DOC").unwrap_or_else(|| "default".to_string());
        if default_document.trim().is_empty() {
            return Err(ConfigError::EmptyDefaultDocument);
        }

        let gc = match lookup("CORAL_DOC_GC") {
            None => true,
            Some(v) => parse_bool(&v).ok_or(ConfigError::InvalidBool("CORAL_DOC_GC"))?,
        };

        let awareness_timeout = match lookup("CORAL_AWARENESS_TIMEOUT_SECS") {
            None => Some(Duration::from_secs(30)),
            Some(v) => match v.trim().parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => return Err(ConfigError::InvalidSeconds("CORAL_AWARENESS_TIMEOUT_SECS")),
            },
        };

        Ok(Config {
            host,
            port,
            reserved_prefixes,
            server: ServerConfig { default_document, gc, awareness_timeout },
        })
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
