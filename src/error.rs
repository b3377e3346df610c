use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors that stop the server as a whole.
///
/// Anything that goes wrong on a single connection is handled where that
/// connection is served and never surfaces here. Configuration problems are
/// reported as [`ConfigError`](crate::config::ConfigError) before a server exists.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}
