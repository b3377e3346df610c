use std::future::Future;
use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::http::response::{Body, Response, StatusCode};

const HTTP_VERSION: &str = "HTTP/1.1";

/// Bodies are copied through a buffer of this size.
const BUFFER_SIZE: usize = 8192;

/// Headers emitted by the writer itself; caller-supplied copies are dropped.
const MANAGED_HEADERS: [&str; 4] = [
    "Content-Type",
    "Content-Length",
    "Transfer-Encoding",
    "Connection",
];

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("connection closed while writing")]
    Closed,
    #[error("timed out writing response")]
    Timeout,
    #[error("body ended after {written} of {expected} declared bytes")]
    ShortBody { written: u64, expected: u64 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Per-response settings derived from the request and connection state.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Leave the connection open after this response.
    pub keep_alive: bool,
    /// Answering a HEAD request: headers only.
    pub head_only: bool,
    /// The client spoke HTTP/1.0 and cannot receive chunked bodies.
    pub http10: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Length(u64),
    Chunked,
    /// Body runs until the connection closes (HTTP/1.0 clients, unknown length).
    UntilClose,
    NoBody,
}

fn serialize_head(
    status: StatusCode,
    headers: &[(String, String)],
    framing: Framing,
    keep_alive: bool,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        status.as_u16(),
        status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    // Content-Type, framing, Connection, then everything else in insertion order
    if let Some((_, value)) = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("Content-Type"))
    {
        push_header(&mut buf, "Content-Type", value);
    }
    match framing {
        Framing::Length(len) => push_header(&mut buf, "Content-Length", &len.to_string()),
        Framing::Chunked => push_header(&mut buf, "Transfer-Encoding", "chunked"),
        Framing::UntilClose | Framing::NoBody => {}
    }
    push_header(
        &mut buf,
        "Connection",
        if keep_alive { "keep-alive" } else { "close" },
    );
    for (k, v) in headers {
        if MANAGED_HEADERS.iter().any(|m| k.eq_ignore_ascii_case(m)) {
            continue;
        }
        if k.contains(['\r', '\n']) || v.contains(['\r', '\n']) {
            tracing::warn!(header = %k, "Dropping header containing a line break");
            continue;
        }
        push_header(&mut buf, k, v);
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    buf
}

fn push_header(buf: &mut Vec<u8>, name: &str, value: &str) {
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value.as_bytes());
    buf.extend_from_slice(b"\r\n");
}

/// Serializes one response onto a stream.
pub struct ResponseWriter {
    head: Vec<u8>,
    written: usize,
    body: Body,
    framing: Framing,
    status: StatusCode,
    keep_alive: bool,
}

impl ResponseWriter {
    pub fn new(response: Response, options: WriteOptions) -> Self {
        let Response {
            status,
            headers,
            body,
        } = response;

        let framing = if !status.allows_body() {
            Framing::NoBody
        } else {
            match body.len() {
                Some(len) => Framing::Length(len),
                None if options.http10 => Framing::UntilClose,
                None => Framing::Chunked,
            }
        };
        let keep_alive = options.keep_alive && framing != Framing::UntilClose;

        let body = if options.head_only || framing == Framing::NoBody {
            Body::Empty
        } else {
            body
        };

        Self {
            head: serialize_head(status, &headers, framing, keep_alive),
            written: 0,
            body,
            framing,
            status,
            keep_alive,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Whether the connection may be reused once this response is written.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// The Content-Length this response declares, if any.
    pub fn content_length(&self) -> Option<u64> {
        match self.framing {
            Framing::Length(len) => Some(len),
            _ => None,
        }
    }

    /// Writes the head and streams the body.
    ///
    /// Every socket write and body read is bounded by `write_timeout`.
    /// Returns the number of body bytes sent, excluding chunk framing.
    pub async fn write_to_stream<W>(
        &mut self,
        stream: &mut W,
        write_timeout: Duration,
    ) -> Result<u64, WriteError>
    where
        W: AsyncWrite + Unpin,
    {
        while self.written < self.head.len() {
            let n = timed(write_timeout, stream.write(&self.head[self.written..])).await?;

            if n == 0 {
                return Err(WriteError::Closed);
            }

            self.written += n;
        }

        let sent = match std::mem::replace(&mut self.body, Body::Empty) {
            Body::Empty => 0,
            Body::Bytes(bytes) => {
                let mut reader: &[u8] = &bytes;
                copy_body(&mut reader, stream, self.framing, write_timeout).await?
            }
            Body::File { file, len } => {
                let mut reader = file.take(len);
                copy_body(&mut reader, stream, self.framing, write_timeout).await?
            }
            Body::Stream(mut reader) => {
                copy_body(&mut reader, stream, self.framing, write_timeout).await?
            }
        };

        timed(write_timeout, stream.flush()).await?;
        Ok(sent)
    }
}

async fn copy_body<R, W>(
    reader: &mut R,
    stream: &mut W,
    framing: Framing,
    write_timeout: Duration,
) -> Result<u64, WriteError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut chunk = Vec::new();
    let mut sent = 0u64;

    loop {
        let n = timed(write_timeout, reader.read(&mut buf)).await?;
        if n == 0 {
            break;
        }

        if framing == Framing::Chunked {
            chunk.clear();
            chunk.extend_from_slice(format!("{:X}\r\n", n).as_bytes());
            chunk.extend_from_slice(&buf[..n]);
            chunk.extend_from_slice(b"\r\n");
            timed(write_timeout, stream.write_all(&chunk)).await?;
        } else {
            timed(write_timeout, stream.write_all(&buf[..n])).await?;
        }
        sent += n as u64;
    }

    match framing {
        Framing::Chunked => timed(write_timeout, stream.write_all(b"0\r\n\r\n")).await?,
        Framing::Length(expected) if sent != expected => {
            return Err(WriteError::ShortBody {
                written: sent,
                expected,
            });
        }
        _ => {}
    }

    Ok(sent)
}

async fn timed<T>(
    limit: Duration,
    fut: impl Future<Output = io::Result<T>>,
) -> Result<T, WriteError> {
    timeout(limit, fut)
        .await
        .map_err(|_| WriteError::Timeout)?
        .map_err(WriteError::from)
}
