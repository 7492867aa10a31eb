//! Configuration module for the uptime exporter.
//!
//! Service settings come from environment variables with sensible defaults.
//! The endpoint list comes from a YAML or JSON file.

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Configuration error types.
///
/// Any of these aborts startup (or a reload); they are never per-scrape conditions.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("endpoint {endpoint}: {message}")]
    Tls { endpoint: String, message: String },
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the endpoint file (default: "config.yml")
    pub config_file: PathBuf,
    /// Address the HTTP server binds to (default: 0.0.0.0:9428)
    pub listen_address: SocketAddr,
    /// Path under which metrics are exposed (default: "/metrics")
    pub telemetry_path: String,
    /// Upper bound on a single scrape round (default: 5 minutes)
    pub scrape_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_file: PathBuf::from("config.yml"),
            listen_address: SocketAddr::from(([0, 0, 0, 0], 9428)),
            telemetry_path: "/metrics".to_string(),
            scrape_timeout: Duration::from_secs(300),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `UPTIME_CONFIG_FILE`: endpoint file path (default: "config.yml")
    /// - `UPTIME_LISTEN_ADDRESS`: listen address, `:9428` style accepted (default: 0.0.0.0:9428)
    /// - `UPTIME_TELEMETRY_PATH`: metrics path (default: "/metrics")
    /// - `UPTIME_SCRAPE_TIMEOUT_SECONDS`: scrape round bound (default: 300)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(path) = env::var("UPTIME_CONFIG_FILE") {
            cfg.config_file = PathBuf::from(path);
        }

        if let Ok(addr) = env::var("UPTIME_LISTEN_ADDRESS") {
            match parse_listen_address(&addr) {
                Some(parsed) => cfg.listen_address = parsed,
                None => tracing::warn!(value = %addr, "Ignoring unparseable UPTIME_LISTEN_ADDRESS"),
            }
        }

        if let Ok(path) = env::var("UPTIME_TELEMETRY_PATH") {
            let path = normalize_path(&path);
            if path == "/" || path == "/health" {
                tracing::warn!(value = %path, "UPTIME_TELEMETRY_PATH clashes with a built-in page; keeping default");
            } else {
                cfg.telemetry_path = path;
            }
        }

        if let Ok(secs) = env::var("UPTIME_SCRAPE_TIMEOUT_SECONDS") {
            match secs.parse::<u64>() {
                Ok(s) if s > 0 => cfg.scrape_timeout = Duration::from_secs(s),
                _ => tracing::warn!(value = %secs, "Ignoring invalid UPTIME_SCRAPE_TIMEOUT_SECONDS"),
            }
        }

        cfg
    }
}

/// Parse a listen address, accepting the host-less `:port` form.
fn parse_listen_address(addr: &str) -> Option<SocketAddr> {
    let addr = addr.trim();
    if let Some(port) = addr.strip_prefix(':') {
        return port
            .parse::<u16>()
            .ok()
            .map(|p| SocketAddr::from(([0, 0, 0, 0], p)));
    }
    addr.parse().ok()
}

fn normalize_path(path: &str) -> String {
    let path = path.trim();
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_success_pattern() -> String {
    "2xx".to_string()
}

/// Contents of the endpoint file.
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    pub endpoints: Vec<EndpointSpec>,

    /// Caps the number of requests in flight during one scrape round.
    /// Unbounded when absent.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

/// A single health-checked endpoint as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EndpointSpec {
    pub name: String,
    pub address: String,

    #[serde(default = "default_method")]
    pub method: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout", rename = "timeout")]
    pub timeout_seconds: u64,

    /// Status template such as `2xx` or `404`.
    #[serde(default = "default_success_pattern", rename = "successful_status_code")]
    pub success_pattern: String,

    #[serde(default)]
    pub inverse_status: bool,

    #[serde(default, rename = "tls_configuration")]
    pub tls: TlsSpec,
}

impl EndpointSpec {
    /// Create an endpoint with default method, timeout and pattern.
    #[cfg(test)]
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            method: default_method(),
            timeout_seconds: default_timeout(),
            success_pattern: default_success_pattern(),
            inverse_status: false,
            tls: TlsSpec::default(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Raw TLS settings: file paths plus the insecure opt-in.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TlsSpec {
    #[serde(default)]
    pub certificate_authority_path: Option<PathBuf>,
    #[serde(default)]
    pub client_certificate_path: Option<PathBuf>,
    #[serde(default)]
    pub client_key_path: Option<PathBuf>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl Configuration {
    /// Read, parse and validate an endpoint file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config = if is_json {
            Self::from_json(&contents)
        } else {
            Self::from_yaml(&contents)
        }
        .map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;

        config.validate()?;
        Ok(config)
    }

    fn from_yaml(contents: &str) -> Result<Self, String> {
        serde_yaml::from_str(contents).map_err(|e| e.to_string())
    }

    fn from_json(contents: &str) -> Result<Self, String> {
        serde_json::from_str(contents).map_err(|e| e.to_string())
    }

    /// Check the invariants the probe engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one endpoint is required".to_string(),
            ));
        }

        if self.max_concurrency == Some(0) {
            return Err(ConfigError::Invalid(
                "max_concurrency must be greater than zero".to_string(),
            ));
        }

        for (i, endpoint) in self.endpoints.iter().enumerate() {
            if endpoint.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "endpoint #{} has an empty name",
                    i + 1
                )));
            }
            if endpoint.address.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "endpoint {} has an empty address",
                    endpoint.name
                )));
            }
            if reqwest::Method::from_bytes(endpoint.method.as_bytes()).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "endpoint {} has an invalid method {:?}",
                    endpoint.name, endpoint.method
                )));
            }
            if endpoint.timeout_seconds == 0 {
                return Err(ConfigError::Invalid(format!(
                    "endpoint {} must have a timeout greater than zero",
                    endpoint.name
                )));
            }

            let pattern = &endpoint.success_pattern;
            if pattern.is_empty() || !pattern.chars().all(|c| c == 'x' || c.is_ascii_digit()) {
                return Err(ConfigError::Invalid(format!(
                    "endpoint {} has an invalid successful_status_code {:?}: use digits and 'x'",
                    endpoint.name, pattern
                )));
            }
            if pattern.len() != 3 {
                tracing::warn!(
                    endpoint = %endpoint.name,
                    pattern = %pattern,
                    "successful_status_code is not 3 characters long and will never match"
                );
            }
        }

        Ok(())
    }
}
