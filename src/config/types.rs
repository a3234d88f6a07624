//! Configuration Types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::protocol::{DEFAULT_HOST, DEFAULT_MAX_LINE_LENGTH, DEFAULT_PORT};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    pub tcp_nodelay: bool,
}

/// Broadcast relay configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    pub sender_policy: SenderPolicy,
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    /// Longest line a client may send, in bytes
    pub max_line_length: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

/// Whether a broadcasting session receives its own payload
///
/// Parsed case-insensitively from both TOML and the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum SenderPolicy {
    #[default]
    Include,
    Exclude,
}

impl SenderPolicy {
    /// Whether the sender is among its own broadcast's recipients
    pub fn includes_sender(&self) -> bool {
        matches!(self, SenderPolicy::Include)
    }
}

impl fmt::Display for SenderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenderPolicy::Include => write!(f, "include"),
            SenderPolicy::Exclude => write!(f, "exclude"),
        }
    }
}

impl FromStr for SenderPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "include" => Ok(SenderPolicy::Include),
            "exclude" => Ok(SenderPolicy::Exclude),
            other => anyhow::bail!("sender policy must be 'include' or 'exclude', got '{}'", other),
        }
    }
}

impl TryFrom<String> for SenderPolicy {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(
                DEFAULT_HOST
                    .parse::<IpAddr>()
                    .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
                DEFAULT_PORT,
            ),
            shutdown_timeout: Duration::from_secs(10),
            tcp_nodelay: true,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            sender_policy: SenderPolicy::Include,
            write_timeout: Duration::from_secs(5),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
