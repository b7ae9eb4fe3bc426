//! Configuration for the lottery service

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::error::{LotteryError, Result};

/// Configuration for the lottery service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotteryConfig {
    /// Database connection URL (PostgreSQL, MySQL/TiDB or SQLite)
    pub database_url: String,

    /// Listen address for the HTTP server
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Public base URL, used to build ticket receipt links
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Hex-encoded Ed25519 public key of the token issuer
    pub issuer_public_key: String,

    /// Expected `aud` claim on bearer tokens
    #[serde(default = "default_audience")]
    pub audience: String,

    /// Maximum database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Database connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Enable SQL query logging
    #[serde(default)]
    pub enable_sql_logging: bool,

    /// Requests allowed per client address in one rate-limit window
    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: u32,

    /// Length of the rate-limit window in seconds
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,
}

impl Default for LotteryConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            listen_addr: default_listen_addr(),
            base_url: default_base_url(),
            issuer_public_key: String::new(),
            audience: default_audience(),
            max_connections: default_max_connections(),
            connection_timeout_secs: default_connection_timeout(),
            enable_sql_logging: false,
            rate_limit_max_requests: default_rate_limit_max_requests(),
            rate_limit_window_secs: default_rate_limit_window(),
        }
    }
}

impl LotteryConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(LotteryError::Config("database URL must be set".to_string()));
        }

        url::Url::parse(&self.base_url).map_err(|e| {
            LotteryError::Config(format!("invalid base URL '{}': {}", self.base_url, e))
        })?;

        let key = hex::decode(&self.issuer_public_key).map_err(|e| {
            LotteryError::Config(format!("issuer public key must be hex: {}", e))
        })?;
        if key.len() != 32 {
            return Err(LotteryError::Config(
                "issuer public key must be 32 bytes".to_string(),
            ));
        }

        if self.audience.is_empty() {
            return Err(LotteryError::Config("audience must not be empty".to_string()));
        }

        if self.max_connections == 0 {
            return Err(LotteryError::Config(
                "max connections must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_max_requests == 0 || self.rate_limit_window_secs == 0 {
            return Err(LotteryError::Config(
                "rate limit requests and window must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Link printed on a ticket receipt, resolved by `/public/ticket/{code}`
    pub fn receipt_url(&self, ticket_code: &str) -> String {
        format!(
            "{}/public/ticket/{}",
            self.base_url.trim_end_matches('/'),
            ticket_code
        )
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_audience() -> String {
    "loto-645-api".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_rate_limit_max_requests() -> u32 {
    100
}

fn default_rate_limit_window() -> u64 {
    15 * 60
}
