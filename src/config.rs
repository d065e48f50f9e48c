//! Configuration Module
//!
//! Handles configuration loading from a YAML file, environment variables, and
//! command-line arguments, in that override order.

use crate::{GatewayError, Result};
use clap::{Arg, ArgAction, Command};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Custom deserializer for Duration from string format like "30s", "5m", "1h"
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty duration string".to_string());
        }

        let (number, unit) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
            Some(idx) => (&s[..idx], s[idx..].trim()),
            None => (s, ""),
        };

        let value: f64 = number
            .parse()
            .map_err(|e| format!("invalid duration number '{}': {}", number, e))?;

        let secs = match unit {
            "ms" => value / 1000.0,
            // Bare numbers are seconds
            "" | "s" | "sec" | "secs" => value,
            "m" | "min" | "mins" => value * 60.0,
            "h" | "hr" | "hrs" => value * 3600.0,
            "d" | "day" | "days" => value * 86400.0,
            _ => return Err(format!("unknown duration unit '{}'", unit)),
        };

        Ok(Duration::from_secs_f64(secs))
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the gateway listens on for client requests
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Serve GET responses by hijacking the client socket and copying the
    /// upstream response verbatim. When disabled every GET goes through the
    /// buffered lazy-stream path.
    #[serde(default = "default_passthrough_enabled")]
    pub passthrough_enabled: bool,
    /// Upper bound on the metadata fetch against the storage backend
    #[serde(
        deserialize_with = "duration_serde::deserialize",
        default = "default_request_timeout"
    )]
    pub request_timeout: Duration,
    /// How long a kept-alive connection may sit idle between requests
    #[serde(
        deserialize_with = "duration_serde::deserialize",
        default = "default_idle_timeout"
    )]
    pub idle_timeout: Duration,
}

fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_passthrough_enabled() -> bool {
    true
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            passthrough_enabled: default_passthrough_enabled(),
            request_timeout: default_request_timeout(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

impl ServerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.listen_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "listen_address must be a host:port socket address, got '{}'",
                self.listen_address
            ));
        }

        if self.request_timeout.is_zero() {
            return Err("request_timeout must be greater than zero".to_string());
        }

        if self.idle_timeout.is_zero() {
            return Err("idle_timeout must be greater than zero".to_string());
        }

        Ok(())
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Hostname of the object storage endpoint
    #[serde(default = "default_endpoint_host")]
    pub endpoint_host: String,
    /// Port of the object storage endpoint
    #[serde(default = "default_endpoint_port")]
    pub endpoint_port: u16,
    /// Whether outbound connections to the endpoint use TLS
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
    /// Region used in the signature credential scope
    #[serde(default = "default_region")]
    pub region: String,
    /// Domain suffix for virtual-hosted addressing
    /// (`Host: <bucket>.<virtual_host_domain>`); defaults to endpoint_host
    #[serde(default)]
    pub virtual_host_domain: String,
}

fn default_endpoint_host() -> String {
    "s3.amazonaws.com".to_string()
}

fn default_endpoint_port() -> u16 {
    443
}

fn default_use_tls() -> bool {
    true
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint_host: default_endpoint_host(),
            endpoint_port: default_endpoint_port(),
            use_tls: default_use_tls(),
            region: default_region(),
            virtual_host_domain: String::new(),
        }
    }
}

impl StorageConfig {
    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.endpoint_host.is_empty() {
            return Err("endpoint_host cannot be empty".to_string());
        }

        if self.endpoint_port == 0 {
            return Err("endpoint_port cannot be zero".to_string());
        }

        if self.region.is_empty() {
            return Err("region cannot be empty".to_string());
        }

        Ok(())
    }

    /// URI scheme for outbound requests
    pub fn scheme(&self) -> &'static str {
        if self.use_tls {
            "https"
        } else {
            "http"
        }
    }

    /// Host header value for outbound requests. The port is omitted when it
    /// is the scheme default so the signed Host header matches what the wire
    /// carries.
    pub fn authority(&self) -> String {
        let default_port = if self.use_tls { 443 } else { 80 };
        if self.endpoint_port == default_port {
            self.endpoint_host.clone()
        } else {
            format!("{}:{}", self.endpoint_host, self.endpoint_port)
        }
    }
}

/// Static credentials, optional; the environment provider is consulted when
/// the file carries none
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialsConfig {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

impl CredentialsConfig {
    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(_), None) => {
                Err("access_key_id is set but secret_access_key is missing".to_string())
            }
            (None, Some(_)) => {
                Err("secret_access_key is set but access_key_id is missing".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// When set, application logs also go to a daily-rolling file here
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_dir: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            credentials: CredentialsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, environment, and command line
    pub fn load() -> Result<Self> {
        let matches = Self::build_cli().get_matches();

        let mut config = if let Some(config_path) = matches.get_one::<String>("config") {
            Self::from_file(config_path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&matches);
        config.normalize();
        config.validate_all()?;

        info!(
            "Configuration loaded: listen={}, endpoint={}://{}, region={}, passthrough={}",
            config.server.listen_address,
            config.storage.scheme(),
            config.storage.authority(),
            config.storage.region,
            config.server.passthrough_enabled
        );

        Ok(config)
    }

    /// Load configuration from a YAML file only
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::ConfigError(format!("failed to read config file {}: {}", path, e))
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            GatewayError::ConfigError(format!("failed to parse config file {}: {}", path, e))
        })?;

        info!("Configuration loaded from file: {}", path);
        Ok(config)
    }

    /// Build CLI argument parser
    fn build_cli() -> Command {
        Command::new("s3-gateway")
            .version(env!("CARGO_PKG_VERSION"))
            .about("HTTP gateway serving S3 objects as plain HTTP resources")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path"),
            )
            .arg(
                Arg::new("listen-address")
                    .long("listen-address")
                    .value_name("ADDR")
                    .help("Listen address (default: 0.0.0.0:8080)"),
            )
            .arg(
                Arg::new("log-level")
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level: trace, debug, info, warn, error"),
            )
            .arg(
                Arg::new("no-passthrough")
                    .long("no-passthrough")
                    .action(ArgAction::SetTrue)
                    .help("Disable raw-socket passthrough; serve every GET via the buffered path"),
            )
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("LISTEN_ADDRESS") {
            self.server.listen_address = addr;
        }

        if let Ok(enabled) = std::env::var("PASSTHROUGH_ENABLED") {
            if let Ok(enabled) = enabled.parse() {
                self.server.passthrough_enabled = enabled;
            }
        }

        if let Ok(host) = std::env::var("STORAGE_ENDPOINT") {
            self.storage.endpoint_host = host;
        }

        if let Ok(port) = std::env::var("STORAGE_PORT") {
            if let Ok(port) = port.parse() {
                self.storage.endpoint_port = port;
            }
        }

        if let Ok(use_tls) = std::env::var("STORAGE_USE_TLS") {
            if let Ok(use_tls) = use_tls.parse() {
                self.storage.use_tls = use_tls;
            }
        }

        if let Ok(region) = std::env::var("STORAGE_REGION") {
            self.storage.region = region;
        } else if let Ok(region) = std::env::var("AWS_REGION") {
            self.storage.region = region;
        }

        if let Ok(domain) = std::env::var("VIRTUAL_HOST_DOMAIN") {
            self.storage.virtual_host_domain = domain;
        }

        if let Ok(log_level) = std::env::var("LOG_LEVEL") {
            self.logging.log_level = log_level;
        }

        if let Ok(log_dir) = std::env::var("LOG_DIR") {
            self.logging.log_dir = Some(PathBuf::from(log_dir));
        }
    }

    /// Apply command line argument overrides
    fn apply_cli_overrides(&mut self, matches: &clap::ArgMatches) {
        if let Some(addr) = matches.get_one::<String>("listen-address") {
            self.server.listen_address = addr.clone();
        }

        if let Some(level) = matches.get_one::<String>("log-level") {
            self.logging.log_level = level.clone();
        }

        if matches.get_flag("no-passthrough") {
            self.server.passthrough_enabled = false;
        }
    }

    /// Fill derived defaults that serde cannot express
    pub fn normalize(&mut self) {
        if self.storage.virtual_host_domain.is_empty() {
            self.storage.virtual_host_domain = self.storage.endpoint_host.clone();
        }
    }

    /// Run every section's validation
    pub fn validate_all(&self) -> Result<()> {
        if let Err(e) = self.server.validate() {
            return Err(GatewayError::ConfigError(format!(
                "invalid server configuration: {}",
                e
            )));
        }

        if let Err(e) = self.storage.validate() {
            return Err(GatewayError::ConfigError(format!(
                "invalid storage configuration: {}",
                e
            )));
        }

        if let Err(e) = self.credentials.validate() {
            return Err(GatewayError::ConfigError(format!(
                "invalid credentials configuration: {}",
                e
            )));
        }

        Ok(())
    }
}
