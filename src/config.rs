//! Load balancer configuration.
//!
//! Configuration is read from the YAML file named by `SLUICE_CONFIG`. The
//! `LISTEN` environment variable overrides the listen address.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{ProxyError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Backend nodes in priority order
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Upper bound for sending the request and receiving the response head
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// A backend node and its per-minute budget.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Backend base URL (e.g. "http://localhost:8081")
    pub url: String,

    /// Optional name for logging
    #[serde(default)]
    pub name: Option<String>,

    pub bytes_per_minute: u64,

    pub requests_per_minute: u64,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}

impl Config {
    /// Loads the configuration from the environment.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("SLUICE_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(listen_addr) = std::env::var("LISTEN") {
            config.server.listen_addr = listen_addr;
        }

        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("{path}: {e}")))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).map_err(|e| ProxyError::Config(e.to_string()))
    }
}
