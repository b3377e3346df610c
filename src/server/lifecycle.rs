//! Server startup and graceful shutdown.
//!
//! ```text
//! Stopped ─bind─▶ Starting ─▶ Running ─shutdown─▶ Draining ─▶ Stopped
//! ```
//!
//! The current state is published on a watch channel that every connection
//! holds. `Draining` tells connections to finish their current response and
//! close. `Stopped`, published after the drain deadline, makes any remaining
//! connection drop its socket immediately.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::{DispatchMode, ServerConfig};
use crate::error::ServerError;
use crate::http::connection::ServeContext;
use crate::server::dispatcher::{Dispatcher, PoolDispatcher, SpawnDispatcher};
use crate::server::listener::Acceptor;
use crate::server::tracker::ConnectionTracker;

/// Time granted to force-closed connections to release their slots.
const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Draining,
}

/// True once shutdown has begun.
pub fn is_draining(rx: &watch::Receiver<LifecycleState>) -> bool {
    matches!(*rx.borrow(), LifecycleState::Draining | LifecycleState::Stopped)
}

/// Resolves when shutdown begins. Never resolves if the server is gone.
pub async fn draining(rx: &mut watch::Receiver<LifecycleState>) {
    let started = rx
        .wait_for(|s| matches!(s, LifecycleState::Draining | LifecycleState::Stopped))
        .await
        .is_ok();
    if !started {
        std::future::pending::<()>().await;
    }
}

/// Resolves when remaining connections must be dropped.
pub async fn stopped(rx: &mut watch::Receiver<LifecycleState>) {
    if rx.wait_for(|s| *s == LifecycleState::Stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}

pub struct Server {
    config: Arc<ServerConfig>,
    state: watch::Sender<LifecycleState>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let (state, _) = watch::channel(LifecycleState::Stopped);
        Self {
            config: Arc::new(config),
            state,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Binds the listening socket.
    pub async fn bind(self) -> Result<BoundServer, ServerError> {
        transition(&self.state, LifecycleState::Starting);

        let acceptor = match Acceptor::bind(&self.config) {
            Ok(acceptor) => acceptor,
            Err(e) => {
                transition(&self.state, LifecycleState::Stopped);
                return Err(e);
            }
        };

        Ok(BoundServer {
            config: self.config,
            state: self.state,
            acceptor,
            tracker: ConnectionTracker::new(),
        })
    }
}

/// A server whose socket is bound but which is not yet accepting.
pub struct BoundServer {
    config: Arc<ServerConfig>,
    state: watch::Sender<LifecycleState>,
    acceptor: Acceptor,
    tracker: ConnectionTracker,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Handle on the in-flight connection count.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Serves until `shutdown` resolves, then drains and stops.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let BoundServer {
            config,
            state,
            acceptor,
            tracker,
        } = self;

        let ctx = Arc::new(ServeContext::new(Arc::clone(&config)));
        let dispatcher: Box<dyn Dispatcher> = match config.dispatch {
            DispatchMode::Task => Box::new(SpawnDispatcher::new(tracker.clone(), config.max_connections)),
            DispatchMode::Pool => Box::new(PoolDispatcher::<TcpStream>::new(
                config.max_connections,
                config.queue_capacity,
                tracker.clone(),
            )),
        };

        transition(&state, LifecycleState::Running);
        info!(
            address = %acceptor.local_addr(),
            root = %config.root.display(),
            dispatch = ?config.dispatch,
            max_connections = config.max_connections,
            "Serving HTTP"
        );

        acceptor
            .run(dispatcher.as_ref(), ctx, state.subscribe(), shutdown)
            .await;

        transition(&state, LifecycleState::Draining);
        // Lets pool workers exit once the queue is empty.
        drop(dispatcher);

        info!(in_flight = tracker.active(), deadline = ?config.drain_timeout, "Draining connections");
        if timeout(config.drain_timeout, tracker.wait_idle()).await.is_err() {
            warn!(remaining = tracker.active(), "Drain deadline passed, closing remaining connections");
        }

        transition(&state, LifecycleState::Stopped);
        if timeout(FORCE_CLOSE_GRACE, tracker.wait_idle()).await.is_err() {
            warn!(remaining = tracker.active(), "Connections still open after forced close");
        }

        info!("Server stopped");
        Ok(())
    }
}

fn transition(state: &watch::Sender<LifecycleState>, next: LifecycleState) {
    let previous = state.send_replace(next);
    tracing::debug!(from = ?previous, to = ?next, "Lifecycle transition");
}
