use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::http::connection::{Connection, ServeContext};
use crate::server::dispatcher::Dispatcher;
use crate::server::lifecycle::LifecycleState;

/// Pause after a failed accept, e.g. when file descriptors run out.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The bound listening socket.
pub struct Acceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Acceptor {
    /// Binds the configured address. Failure here is fatal for the server.
    pub fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let addr = config.bind_addr;
        let bind_error = |source: std::io::Error| ServerError::Bind { addr, source };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_error)?;

        #[cfg(unix)]
        socket.set_reuseaddr(true).map_err(bind_error)?;

        socket.bind(addr).map_err(bind_error)?;
        let listener = socket.listen(config.backlog).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        info!(address = %local_addr, backlog = config.backlog, "Listening");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until `shutdown` resolves, then closes the socket.
    ///
    /// Accepting never waits on the connections it hands out.
    pub async fn run<F>(
        self,
        dispatcher: &dyn Dispatcher,
        ctx: Arc<ServeContext>,
        lifecycle: watch::Receiver<LifecycleState>,
        shutdown: F,
    ) where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        debug!(%peer, "Accepted connection");
                        let _ = socket.set_nodelay(true);

                        let conn = Connection::new(socket, peer, Arc::clone(&ctx), lifecycle.clone());
                        if let Err(e) = dispatcher.dispatch(conn) {
                            warn!(%peer, error = %e, "Connection refused");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        }
    }
}
