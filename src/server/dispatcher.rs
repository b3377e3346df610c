//! Hands accepted connections to units of concurrent execution.
//!
//! The acceptor only knows the [`Dispatcher`] trait; the concurrency strategy
//! is chosen at startup. Each strategy applies a single capacity policy:
//!
//! - [`SpawnDispatcher`]: a task per connection, refused outright at the limit.
//! - [`PoolDispatcher`]: a fixed set of workers fed by a bounded queue,
//!   refused when the queue is full.

use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, warn};

use crate::http::connection::{Connection, Transport};
use crate::server::tracker::{ConnectionGuard, ConnectionTracker};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("connection limit of {0} reached")]
    AtCapacity(usize),
    #[error("worker queue is full")]
    QueueFull,
    #[error("dispatcher is shut down")]
    Closed,
}

pub trait Dispatcher<S = TcpStream>: Send + Sync {
    /// Schedules `conn` without waiting for it to be served.
    ///
    /// A refused connection is dropped, which closes it.
    fn dispatch(&self, conn: Connection<S>) -> Result<(), DispatchError>;
}

/// Serves one connection, logging how it ended.
async fn serve<S: Transport>(mut conn: Connection<S>, guard: ConnectionGuard) {
    let peer = conn.peer();
    debug!(connection_id = %guard.id(), %peer, "Serving connection");
    if let Err(e) = conn.run().await {
        warn!(connection_id = %guard.id(), %peer, error = %e, "Connection error");
    }
}

pub struct SpawnDispatcher {
    tracker: ConnectionTracker,
    limit: usize,
}

impl SpawnDispatcher {
    pub fn new(tracker: ConnectionTracker, limit: usize) -> Self {
        Self { tracker, limit }
    }
}

impl<S: Transport> Dispatcher<S> for SpawnDispatcher {
    fn dispatch(&self, conn: Connection<S>) -> Result<(), DispatchError> {
        let guard = self
            .tracker
            .try_acquire(self.limit)
            .ok_or(DispatchError::AtCapacity(self.limit))?;

        // A panic ends only this task; the guard is released while unwinding.
        tokio::spawn(serve(conn, guard));
        Ok(())
    }
}

struct Job<S> {
    conn: Connection<S>,
    guard: ConnectionGuard,
}

pub struct PoolDispatcher<S = TcpStream> {
    queue: mpsc::Sender<Job<S>>,
    tracker: ConnectionTracker,
    limit: usize,
}

impl<S: Transport> PoolDispatcher<S> {
    /// Starts `workers` workers behind a queue of `queue_capacity` slots.
    ///
    /// Workers exit once the dispatcher is dropped and the queue is empty.
    pub fn new(workers: usize, queue_capacity: usize, tracker: ConnectionTracker) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..workers {
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                loop {
                    let job = rx.lock().await.recv().await;
                    let Some(Job { conn, guard }) = job else {
                        break;
                    };

                    let peer = conn.peer();
                    // Served in its own task so a panic cannot take the worker down.
                    if let Err(e) = tokio::spawn(serve(conn, guard)).await {
                        error!(worker, %peer, error = %e, "Connection task failed");
                    }
                }
                debug!(worker, "Worker exiting");
            });
        }

        Self {
            queue: tx,
            tracker,
            limit: workers + queue_capacity,
        }
    }
}

impl<S: Transport> Dispatcher<S> for PoolDispatcher<S> {
    fn dispatch(&self, conn: Connection<S>) -> Result<(), DispatchError> {
        let guard = self
            .tracker
            .try_acquire(self.limit)
            .ok_or(DispatchError::QueueFull)?;

        self.queue
            .try_send(Job { conn, guard })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
            })
    }
}
