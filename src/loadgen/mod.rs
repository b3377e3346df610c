//! Load generator for measuring an HTTP server's latency.
//!
//! Sends a fixed number of GET requests to one URL, each on its own
//! connection, and summarizes response latency and time to first byte.
//! Requests are driven by one of two strategies:
//!
//! - [`LoadMode::PerRequest`]: every request gets its own task, all started
//!   at once.
//! - [`LoadMode::Pool`]: a fixed set of workers drains a queue holding one
//!   job per request.

pub mod client;
pub mod report;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tracing::{debug, error};

pub use client::{Sample, Target};
pub use report::Report;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported scheme {0:?}, only http is supported")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error("request count must be at least 1")]
    NoRequests,
    #[error("pool size must be at least 1")]
    EmptyPool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    PerRequest,
    /// Number of workers.
    Pool(usize),
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadMode::PerRequest => f.write_str("per-request"),
            LoadMode::Pool(size) => write!(f, "pool-{}", size),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub target: Target,
    pub requests: usize,
    pub mode: LoadMode,
    /// Allowed for each request, connecting included.
    pub timeout: Duration,
}

impl LoadConfig {
    pub fn new(target: Target, requests: usize, mode: LoadMode) -> Self {
        Self {
            target,
            requests,
            mode,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

type Outcome = anyhow::Result<Sample>;

/// Sends every request and waits for all of them to finish.
///
/// Individual request failures are counted in the report, not returned.
pub async fn run(config: LoadConfig) -> Result<Report, LoadError> {
    if config.requests == 0 {
        return Err(LoadError::NoRequests);
    }
    if config.mode == LoadMode::Pool(0) {
        return Err(LoadError::EmptyPool);
    }

    debug!(
        url = %config.target.url(),
        requests = config.requests,
        mode = %config.mode,
        "Starting load run"
    );

    let target = Arc::new(config.target);
    let started = Instant::now();
    let outcomes = match config.mode {
        LoadMode::PerRequest => per_request(target, config.requests, config.timeout).await,
        LoadMode::Pool(workers) => pooled(target, config.requests, workers, config.timeout).await,
    };

    Ok(Report::new(
        config.mode,
        config.requests,
        outcomes,
        started.elapsed(),
    ))
}

async fn per_request(target: Arc<Target>, requests: usize, limit: Duration) -> Vec<Outcome> {
    let handles: Vec<_> = (0..requests)
        .map(|request| {
            let target = Arc::clone(&target);
            tokio::spawn(async move {
                let outcome = client::fetch(&target, limit).await;
                if let Err(e) = &outcome {
                    debug!(request, error = %e, "Request failed");
                }
                outcome
            })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(requests);
    for handle in handles {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => outcomes.push(Err(anyhow::anyhow!("request task failed: {}", e))),
        }
    }
    outcomes
}

async fn pooled(
    target: Arc<Target>,
    requests: usize,
    workers: usize,
    limit: Duration,
) -> Vec<Outcome> {
    let (tx, rx) = mpsc::channel(requests);
    for request in 0..requests {
        if tx.send(request).await.is_err() {
            break;
        }
    }
    drop(tx);
    let rx = Arc::new(Mutex::new(rx));

    let handles: Vec<_> = (0..workers.min(requests))
        .map(|worker| {
            let rx = Arc::clone(&rx);
            let target = Arc::clone(&target);
            tokio::spawn(async move {
                let mut outcomes = Vec::new();
                loop {
                    let job = rx.lock().await.recv().await;
                    let Some(request) = job else {
                        break;
                    };

                    let outcome = client::fetch(&target, limit).await;
                    if let Err(e) = &outcome {
                        debug!(worker, request, error = %e, "Request failed");
                    }
                    outcomes.push(outcome);
                }
                debug!(worker, sent = outcomes.len(), "Worker exiting");
                outcomes
            })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(requests);
    for (worker, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(done) => outcomes.extend(done),
            // Its requests are missing from the report and count as failed.
            Err(e) => error!(worker, error = %e, "Load worker failed"),
        }
    }
    outcomes
}
