//! Configuration Manager

use super::{Config, SenderPolicy};
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const MAX_LINE_LENGTH_LIMIT: usize = 16 * 1024 * 1024;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!("Configuration file not found at {}, using defaults", path.display());
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        Self::load_from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source over the defaults
    pub fn load_from_vars<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(bind_addr) = lookup("LINERELAY_BIND_ADDR") {
            config.server.bind_addr = bind_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid LINERELAY_BIND_ADDR: {}", bind_addr))?;
        }

        if let Some(timeout) = lookup("LINERELAY_SHUTDOWN_TIMEOUT") {
            config.server.shutdown_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid LINERELAY_SHUTDOWN_TIMEOUT: {}", timeout))?;
        }

        if let Some(timeout) = lookup("LINERELAY_WRITE_TIMEOUT") {
            config.relay.write_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid LINERELAY_WRITE_TIMEOUT: {}", timeout))?;
        }

        if let Some(policy) = lookup("LINERELAY_SENDER_POLICY") {
            config.relay.sender_policy = policy
                .parse::<SenderPolicy>()
                .with_context(|| format!("Invalid LINERELAY_SENDER_POLICY: {}", policy))?;
        }

        if let Some(length) = lookup("LINERELAY_MAX_LINE_LENGTH") {
            config.relay.max_line_length = length
                .parse::<usize>()
                .with_context(|| format!("Invalid LINERELAY_MAX_LINE_LENGTH: {}", length))?;
        }

        if let Some(log_level) = lookup("LINERELAY_LOG_LEVEL") {
            config.logging.level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_relay_config()
            .with_context(|| "Relay configuration validation failed")?;

        self.validate_logging_config()
            .with_context(|| "Logging configuration validation failed")?;

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        if self.server.shutdown_timeout > Duration::from_secs(600) {
            bail!("shutdown_timeout cannot exceed 10 minutes");
        }

        Ok(())
    }

    fn validate_relay_config(&self) -> Result<()> {
        if self.relay.write_timeout.is_zero() {
            bail!("write_timeout must be greater than 0");
        }

        if self.relay.write_timeout > Duration::from_secs(3600) {
            bail!("write_timeout cannot exceed 1 hour");
        }

        if self.relay.max_line_length == 0 {
            bail!("max_line_length must be greater than 0");
        }

        if self.relay.max_line_length > MAX_LINE_LENGTH_LIMIT {
            bail!("max_line_length cannot exceed {} bytes", MAX_LINE_LENGTH_LIMIT);
        }

        Ok(())
    }

    fn validate_logging_config(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            bail!("logging.level must be one of: {}", VALID_LOG_LEVELS.join(", "));
        }

        Ok(())
    }

    /// Merge with CLI arguments. An unparsable bind address is an error.
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        exclude_sender: bool,
        write_timeout: Option<u64>,
        max_line_length: Option<usize>,
    ) -> Result<()> {
        // Override bind address if provided
        if let Some(bind_str) = bind {
            let addr = bind_str
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid bind address: {}", bind_str))?;
            self.server.bind_addr = addr;
            tracing::info!("CLI override: bind address set to {}", addr);
        }

        // Override port if provided
        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        if exclude_sender {
            self.relay.sender_policy = SenderPolicy::Exclude;
            tracing::info!("CLI override: sender excluded from its own broadcasts");
        }

        if let Some(timeout_secs) = write_timeout {
            self.relay.write_timeout = Duration::from_secs(timeout_secs);
            tracing::info!("CLI override: write timeout set to {}s", timeout_secs);
        }

        if let Some(length) = max_line_length {
            self.relay.max_line_length = length;
            tracing::info!("CLI override: max line length set to {} bytes", length);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.relay.sender_policy, SenderPolicy::Include);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
bind_addr = "0.0.0.0:9000"
shutdown_timeout = "3s"

[relay]
sender_policy = "exclude"
write_timeout = "250ms"
"#
        )
        .unwrap();

        let config = ConfigManager::load_from_file(file.path()).unwrap();
        assert_eq!(config.server.bind_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.server.shutdown_timeout, Duration::from_secs(3));
        assert!(config.server.tcp_nodelay);
        assert_eq!(config.relay.sender_policy, SenderPolicy::Exclude);
        assert_eq!(config.relay.write_timeout, Duration::from_millis(250));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigManager::load_from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.bind_addr, Config::default().server.bind_addr);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"loud\"").unwrap();

        let err = ConfigManager::load_from_file(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("logging.level"));
    }

    #[test]
    fn test_load_from_vars() {
        let config = ConfigManager::load_from_vars(vars(&[
            ("LINERELAY_BIND_ADDR", "127.0.0.1:7000"),
            ("LINERELAY_WRITE_TIMEOUT", "2s"),
            ("LINERELAY_SENDER_POLICY", "Exclude"),
            ("LINERELAY_LOG_LEVEL", "debug"),
        ]))
        .unwrap();

        assert_eq!(config.server.bind_addr.port(), 7000);
        assert_eq!(config.relay.write_timeout, Duration::from_secs(2));
        assert_eq!(config.relay.sender_policy, SenderPolicy::Exclude);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_vars_are_errors() {
        assert!(ConfigManager::load_from_vars(vars(&[("LINERELAY_BIND_ADDR", "nowhere")])).is_err());
        assert!(ConfigManager::load_from_vars(vars(&[("LINERELAY_SENDER_POLICY", "maybe")])).is_err());
        assert!(ConfigManager::load_from_vars(vars(&[("LINERELAY_WRITE_TIMEOUT", "0s")])).is_err());
    }

    #[test]
    fn test_merge_with_cli_args() {
        let mut config = Config::default();
        config
            .merge_with_cli_args(Some("10.0.0.1:1234"), Some(4321), true, Some(9), Some(1024))
            .unwrap();

        assert_eq!(config.server.bind_addr, "10.0.0.1:4321".parse().unwrap());
        assert_eq!(config.relay.sender_policy, SenderPolicy::Exclude);
        assert_eq!(config.relay.write_timeout, Duration::from_secs(9));
        assert_eq!(config.relay.max_line_length, 1024);
    }

    #[test]
    fn test_invalid_cli_bind_is_rejected() {
        let mut config = Config::default();
        let err = config
            .merge_with_cli_args(Some("nowhere"), None, false, None, None)
            .unwrap_err();

        assert!(format!("{:#}", err).contains("Invalid bind address: nowhere"));
        assert_eq!(config.server.bind_addr, Config::default().server.bind_addr);
    }

    #[test]
    fn test_sender_policy_is_case_insensitive_in_toml() {
        let config: Config = toml::from_str("[relay]\nsender_policy = \"Exclude\"").unwrap();
        assert_eq!(config.relay.sender_policy, SenderPolicy::Exclude);

        let err = toml::from_str::<Config>("[relay]\nsender_policy = \"sometimes\"").unwrap_err();
        assert!(err.to_string().contains("sender policy must be"));
    }

    #[test]
    fn test_max_line_length_bounds() {
        let mut config = Config::default();
        assert_eq!(config.relay.max_line_length, 64 * 1024);

        config.relay.max_line_length = 0;
        assert!(config.validate().is_err());

        config.relay.max_line_length = MAX_LINE_LENGTH_LIMIT + 1;
        assert!(config.validate().is_err());

        let config = ConfigManager::load_from_vars(vars(&[("LINERELAY_MAX_LINE_LENGTH", "4096")])).unwrap();
        assert_eq!(config.relay.max_line_length, 4096);
        assert!(ConfigManager::load_from_vars(vars(&[("LINERELAY_MAX_LINE_LENGTH", "lots")])).is_err());
    }
}
