//! Command-line surfaces of the server and the load generator.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::{ConfigError, DispatchMode, Settings};
use crate::loadgen::{LoadConfig, LoadError, LoadMode, Target};

/// Serve a directory over HTTP/1.1.
#[derive(Debug, Parser)]
#[command(name = "harbor", version, about)]
pub struct Cli {
    /// Port to listen on [default: 8000]
    #[arg(value_name = "PORT", env = "HARBOR_PORT")]
    pub port: Option<u16>,

    /// Directory to serve [default: current directory]
    #[arg(short, long, value_name = "DIR", env = "HARBOR_ROOT")]
    pub directory: Option<PathBuf>,

    /// Address to bind [default: 127.0.0.1]
    #[arg(short, long, value_name = "ADDR", env = "HARBOR_BIND")]
    pub bind: Option<String>,

    /// YAML configuration file; flags take precedence over it
    #[arg(long, value_name = "FILE", env = "HARBOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen backlog
    #[arg(long, env = "HARBOR_BACKLOG")]
    pub backlog: Option<u32>,

    /// Maximum concurrent connections (pool size in pool mode)
    #[arg(long, env = "HARBOR_MAX_CONNECTIONS")]
    pub max_connections: Option<usize>,

    /// Connection dispatch strategy
    #[arg(long, value_enum, env = "HARBOR_DISPATCH")]
    pub dispatch: Option<DispatchMode>,

    /// Pending connections queued in pool mode
    #[arg(long, env = "HARBOR_QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    /// Seconds allowed to receive a request, idle keep-alive included
    #[arg(long, value_name = "SECS", env = "HARBOR_REQUEST_TIMEOUT")]
    pub request_timeout: Option<u64>,

    /// Seconds allowed for each write to a client
    #[arg(long, value_name = "SECS", env = "HARBOR_WRITE_TIMEOUT")]
    pub write_timeout: Option<u64>,

    /// Seconds to wait for in-flight connections on shutdown
    #[arg(long, value_name = "SECS", env = "HARBOR_DRAIN_TIMEOUT")]
    pub drain_timeout: Option<u64>,

    /// Answer directory requests without an index file with 403
    #[arg(long)]
    pub no_listing: bool,

    /// Log filter, e.g. `info` or `harbor=debug`
    #[arg(long, value_name = "FILTER", env = "HARBOR_LOG", default_value = "info")]
    pub log: String,
}

impl Cli {
    /// Loads the config file, if any, and overlays the flags given.
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let mut settings = match &self.config {
            Some(path) => Settings::from_file(path)?,
            None => Settings::default(),
        };
        self.apply(&mut settings);
        Ok(settings)
    }

    pub fn apply(&self, settings: &mut Settings) {
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(dir) = &self.directory {
            settings.static_files.root = dir.clone();
        }
        if let Some(bind) = &self.bind {
            settings.server.bind = bind.clone();
        }
        if let Some(backlog) = self.backlog {
            settings.server.backlog = backlog;
        }
        if let Some(max) = self.max_connections {
            settings.server.max_connections = max;
        }
        if let Some(dispatch) = self.dispatch {
            settings.server.dispatch = dispatch;
        }
        if let Some(capacity) = self.queue_capacity {
            settings.server.queue_capacity = capacity;
        }
        if let Some(secs) = self.request_timeout {
            settings.limits.request_timeout_secs = secs;
        }
        if let Some(secs) = self.write_timeout {
            settings.limits.write_timeout_secs = secs;
        }
        if let Some(secs) = self.drain_timeout {
            settings.limits.drain_timeout_secs = secs;
        }
        if self.no_listing {
            settings.static_files.directory_listing = false;
        }
    }
}

/// Measure the latency of an HTTP server under concurrent GET requests.
#[derive(Debug, Parser)]
#[command(name = "harbor-bench", version, about)]
pub struct BenchCli {
    /// Start one task per request, all at once [default]
    #[arg(short = 't', long = "tasks", conflicts_with = "pool")]
    pub per_request: bool,

    /// Send requests from a pool of SIZE workers
    #[arg(short, long, value_name = "SIZE")]
    pub pool: Option<usize>,

    /// URL to request, e.g. http://127.0.0.1:8000/index.html
    #[arg(value_name = "URL")]
    pub url: String,

    /// Number of requests to send
    #[arg(value_name = "REQUESTS", default_value_t = 1)]
    pub requests: usize,

    /// Seconds allowed for each request
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub timeout: u64,

    /// CSV file the summary row is appended to
    #[arg(short, long, value_name = "FILE", default_value = "output.csv")]
    pub output: PathBuf,

    /// Print the summary without writing the CSV row
    #[arg(long)]
    pub no_csv: bool,

    /// Log filter, e.g. `info` or `harbor=debug`
    #[arg(long, value_name = "FILTER", env = "HARBOR_LOG", default_value = "warn")]
    pub log: String,
}

impl BenchCli {
    pub fn mode(&self) -> LoadMode {
        match self.pool {
            Some(size) => LoadMode::Pool(size),
            None => LoadMode::PerRequest,
        }
    }

    pub fn load_config(&self) -> Result<LoadConfig, LoadError> {
        let target = Target::parse(&self.url)?;
        let mut config = LoadConfig::new(target, self.requests, self.mode());
        config.timeout = Duration::from_secs(self.timeout);
        Ok(config)
    }
}
