//! Server configuration.
//!
//! [`Settings`] is the loose, serde-facing form read from YAML and overlaid
//! with command-line values. [`Settings::into_config`] validates it into the
//! immutable [`ServerConfig`] every component receives.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::http::parser::{DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_HEADER_BYTES, ParseLimits};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid bind address {0:?}")]
    InvalidBind(String),
    #[error("root directory {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("root {0} is not a directory")]
    RootNotDirectory(PathBuf),
    #[error("{0}")]
    Invalid(&'static str),
}

/// How accepted connections are given to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// One task per connection; refuse connections beyond the limit.
    Task,
    /// Fixed pool of workers behind a bounded queue.
    Pool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub server: ServerSettings,
    pub limits: LimitSettings,
    pub static_files: StaticFileSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    pub bind: String,
    pub port: u16,
    pub backlog: u32,
    pub max_connections: usize,
    pub dispatch: DispatchMode,
    pub queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8000,
            backlog: 1024,
            max_connections: 256,
            dispatch: DispatchMode::Task,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitSettings {
    pub request_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub drain_timeout_secs: u64,
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            write_timeout_secs: 30,
            drain_timeout_secs: 10,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StaticFileSettings {
    pub root: PathBuf,
    pub index_files: Vec<String>,
    pub directory_listing: bool,
}

impl Default for StaticFileSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            index_files: vec!["index.html".to_string(), "index.htm".to_string()],
            directory_listing: true,
        }
    }
}

impl Settings {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    /// Validates the settings and canonicalizes the root directory.
    pub fn into_config(self) -> Result<ServerConfig, ConfigError> {
        let Settings {
            server,
            limits,
            static_files,
        } = self;

        let ip: IpAddr = server
            .bind
            .trim_matches(['[', ']'])
            .parse()
            .map_err(|_| ConfigError::InvalidBind(server.bind.clone()))?;

        if server.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be greater than zero"));
        }
        if server.dispatch == DispatchMode::Pool && server.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be greater than zero in pool mode"));
        }
        if limits.request_timeout_secs == 0 || limits.write_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be at least one second"));
        }

        let root = std::fs::canonicalize(&static_files.root).map_err(|source| ConfigError::Root {
            path: static_files.root.clone(),
            source,
        })?;
        if !root.is_dir() {
            return Err(ConfigError::RootNotDirectory(root));
        }

        Ok(ServerConfig {
            root,
            bind_addr: SocketAddr::new(ip, server.port),
            backlog: server.backlog,
            max_connections: server.max_connections,
            dispatch: server.dispatch,
            queue_capacity: server.queue_capacity,
            request_timeout: Duration::from_secs(limits.request_timeout_secs),
            write_timeout: Duration::from_secs(limits.write_timeout_secs),
            drain_timeout: Duration::from_secs(limits.drain_timeout_secs),
            limits: ParseLimits {
                max_header_bytes: limits.max_header_bytes,
                max_body_bytes: limits.max_body_bytes,
            },
            index_files: static_files.index_files,
            directory_listing: static_files.directory_listing,
        })
    }
}

/// Validated, immutable configuration fixed at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Canonical served directory.
    pub root: PathBuf,
    pub bind_addr: SocketAddr,
    pub backlog: u32,
    pub max_connections: usize,
    pub dispatch: DispatchMode,
    pub queue_capacity: usize,
    /// Deadline for receiving one complete request, idle keep-alive wait included.
    pub request_timeout: Duration,
    /// Deadline for each write to the client.
    pub write_timeout: Duration,
    /// How long shutdown waits for in-flight connections.
    pub drain_timeout: Duration,
    pub limits: ParseLimits,
    pub index_files: Vec<String>,
    pub directory_listing: bool,
}

impl ServerConfig {
    /// Default settings serving `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut settings = Settings::default();
        settings.static_files.root = root.into();
        settings.into_config()
    }
}
