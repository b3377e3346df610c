use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::files::Resolver;
use crate::http::handler;
use crate::http::parser::{ParseError, RequestParser};
use crate::http::request::{Method, Request, Version};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::{ResponseWriter, WriteOptions};
use crate::server::lifecycle::{self, LifecycleState};

/// Byte streams a connection can be served over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Read-only state shared by every connection.
#[derive(Debug)]
pub struct ServeContext {
    pub config: Arc<ServerConfig>,
    pub resolver: Resolver,
}

impl ServeContext {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        let resolver = Resolver::from_config(&config);
        Self { config, resolver }
    }
}

/// Why reading a request stopped.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed request: {0}")]
    Parse(#[from] ParseError),
    /// `idle` is true when no byte of the next request had arrived.
    #[error("timed out waiting for request")]
    Timeout { idle: bool },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub struct Connection<S = TcpStream> {
    stream: S,
    peer: SocketAddr,
    buffer: BytesMut,
    /// Carries partial progress between reads of one request.
    parser: RequestParser,
    state: ConnectionState,
    ctx: Arc<ServeContext>,
    lifecycle: watch::Receiver<LifecycleState>,
    served: u64,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter),
    Closed,
}

impl<S: Transport> Connection<S> {
    pub fn new(
        stream: S,
        peer: SocketAddr,
        ctx: Arc<ServeContext>,
        lifecycle: watch::Receiver<LifecycleState>,
    ) -> Self {
        Self {
            stream,
            peer,
            buffer: BytesMut::with_capacity(4096),
            parser: RequestParser::new(ctx.config.limits),
            state: ConnectionState::Reading,
            ctx,
            lifecycle,
            served: 0,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Serves requests until the client or the server ends the connection.
    ///
    /// Returns early, dropping the stream, if the server is forced to stop.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut stop = self.lifecycle.clone();
        tokio::select! {
            res = self.serve() => res,
            _ = lifecycle::stopped(&mut stop) => {
                debug!(peer = %self.peer, "Closing connection at forced shutdown");
                Ok(())
            }
        }
    }

    async fn serve(&mut self) -> anyhow::Result<()> {
        loop {
            let state = std::mem::replace(&mut self.state, ConnectionState::Closed);
            self.state = match state {
                ConnectionState::Reading => {
                    if self.served > 0 && lifecycle::is_draining(&self.lifecycle) {
                        ConnectionState::Closed
                    } else {
                        match self.read_request().await {
                            Ok(Some(req)) => ConnectionState::Processing(req),
                            Ok(None) => ConnectionState::Closed,
                            Err(e) => self.reject(e)?,
                        }
                    }
                }

                ConnectionState::Processing(req) => {
                    let mut response = handler::handle(&req, &self.ctx.resolver).await;
                    handler::stamp(&mut response);

                    let keep_alive = req.keep_alive() && !lifecycle::is_draining(&self.lifecycle);
                    let writer = ResponseWriter::new(
                        response,
                        WriteOptions {
                            keep_alive,
                            head_only: req.method == Method::HEAD,
                            http10: req.version == Version::Http10,
                        },
                    );

                    info!(
                        peer = %self.peer,
                        method = %req.method,
                        path = %req.target,
                        status = writer.status().as_u16(),
                        length = ?writer.content_length(),
                        "Request served"
                    );
                    ConnectionState::Writing(writer)
                }

                ConnectionState::Writing(mut writer) => {
                    writer
                        .write_to_stream(&mut self.stream, self.ctx.config.write_timeout)
                        .await?;
                    self.served += 1;

                    if writer.keep_alive() {
                        debug!(peer = %self.peer, served = self.served, "Keeping connection open");
                        ConnectionState::Reading // go back for next request
                    } else {
                        ConnectionState::Closed
                    }
                }

                ConnectionState::Closed => {
                    break;
                }
            };
        }

        let _ = self.stream.shutdown().await;
        Ok(())
    }

    /// Reads the next request.
    ///
    /// `Ok(None)` means the connection should close quietly: the client hung
    /// up, or the server began draining while the connection was idle.
    pub async fn read_request(&mut self) -> Result<Option<Request>, RequestError> {
        let limits = *self.parser.limits();
        let deadline = Instant::now() + self.ctx.config.request_timeout;

        loop {
            // Try parsing whatever we already have
            if !self.buffer.is_empty() {
                match self.parser.parse(&self.buffer) {
                    Ok((request, consumed)) => {
                        self.buffer.advance(consumed);
                        return Ok(Some(request));
                    }
                    Err(ParseError::Incomplete) => {}
                    Err(e) => return Err(e.into()),
                }
                if self.buffer.len() > limits.max_request_bytes() {
                    return Err(ParseError::BodyTooLarge(limits.max_body_bytes).into());
                }
            }

            let idle = self.buffer.is_empty();
            let read = timeout_at(deadline, self.stream.read_buf(&mut self.buffer));
            let n = tokio::select! {
                res = read => match res {
                    Ok(res) => res?,
                    Err(_) => return Err(RequestError::Timeout { idle }),
                },
                _ = lifecycle::draining(&mut self.lifecycle), if idle => return Ok(None),
            };

            if n == 0 {
                // Client closed connection
                return Ok(None);
            }
        }
    }

    /// Chooses the state after a failed read: an error response when the
    /// client can still be answered, otherwise closing.
    fn reject(&self, err: RequestError) -> anyhow::Result<ConnectionState> {
        let status = match &err {
            RequestError::Parse(e) => e.status(),
            RequestError::Timeout { idle: false } => StatusCode::RequestTimeout,
            RequestError::Timeout { idle: true } => {
                debug!(peer = %self.peer, "Idle connection timed out");
                return Ok(ConnectionState::Closed);
            }
            RequestError::Io(_) => return Err(err.into()),
        };

        debug!(peer = %self.peer, error = %err, status = status.as_u16(), "Rejecting request");
        let mut response = Response::error(status);
        handler::stamp(&mut response);
        Ok(ConnectionState::Writing(ResponseWriter::new(
            response,
            WriteOptions::default(),
        )))
    }
}
