//! A one-shot HTTP/1.1 GET client that times its own exchange.

use std::time::Duration;

use anyhow::{Context, Result};
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout};
use url::Url;

use crate::loadgen::LoadError;

const BUFFER_SIZE: usize = 8192;
const MAX_HEADER_SIZE: usize = 64 * 1024;

/// The URL under load, with its request pre-built.
#[derive(Debug, Clone)]
pub struct Target {
    url: Url,
    addr: String,
    request: String,
}

impl Target {
    /// Accepts `http` URLs only.
    pub fn parse(raw: &str) -> Result<Self, LoadError> {
        let url = Url::parse(raw)?;
        if url.scheme() != "http" {
            return Err(LoadError::UnsupportedScheme(url.scheme().to_string()));
        }
        let host = url.host_str().ok_or(LoadError::MissingHost)?;
        let port = url.port().unwrap_or(80);

        let host_header = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: harbor-bench/{}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
            path,
            host_header,
            env!("CARGO_PKG_VERSION"),
        );

        Ok(Self {
            addr: format!("{}:{}", host, port),
            url,
            request,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Timings and size of one completed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub status: u16,
    /// From the start of connecting to the first response byte.
    pub ttfb: Duration,
    /// From the start of connecting to the end of the body.
    pub latency: Duration,
    /// Body bytes as framed on the wire.
    pub bytes: u64,
}

/// Sends one GET on a fresh connection and reads the whole response.
pub async fn fetch(target: &Target, limit: Duration) -> Result<Sample> {
    let started = Instant::now();
    timeout(limit, exchange(target, started))
        .await
        .context("Request timeout")?
}

async fn exchange(target: &Target, started: Instant) -> Result<Sample> {
    let mut stream = TcpStream::connect(&target.addr)
        .await
        .with_context(|| format!("Failed to connect to {}", target.addr))?;

    stream.write_all(target.request.as_bytes()).await?;
    stream.flush().await?;

    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
    let mut first_byte = None;

    let headers_end = loop {
        let n = stream.read_buf(&mut buffer).await?;
        if n == 0 {
            anyhow::bail!("Connection closed before complete response headers received");
        }
        if first_byte.is_none() {
            first_byte = Some(started.elapsed());
        }
        if let Some(pos) = find_headers_end(&buffer) {
            break pos;
        }
        if buffer.len() > MAX_HEADER_SIZE {
            anyhow::bail!("Response headers too large");
        }
    };
    let ttfb = first_byte.unwrap_or_else(|| started.elapsed());

    let head = std::str::from_utf8(&buffer[..headers_end]).context("Invalid UTF-8 in headers")?;
    let (status, content_length) = parse_head(head)?;
    buffer.advance(headers_end + 4);

    let bytes = if !has_body(status) {
        0
    } else if let Some(len) = content_length {
        while buffer.len() < len {
            if stream.read_buf(&mut buffer).await? == 0 {
                anyhow::bail!(
                    "Connection closed after {} of {} body bytes",
                    buffer.len(),
                    len
                );
            }
        }
        len as u64
    } else {
        // Chunked or close-delimited; the request asked for Connection: close.
        let mut total = buffer.len() as u64;
        buffer.clear();
        loop {
            let n = stream.read_buf(&mut buffer).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
            buffer.clear();
        }
        total
    };

    Ok(Sample {
        status,
        ttfb,
        latency: started.elapsed(),
        bytes,
    })
}

/// Status code and Content-Length from a response head.
fn parse_head(head: &str) -> Result<(u16, Option<usize>)> {
    let mut lines = head.split("\r\n");

    let status_line = lines.next().context("Empty response")?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().context("Missing HTTP version")?;
    if !version.starts_with("HTTP/1.") {
        anyhow::bail!("Unexpected protocol {:?}", version);
    }
    let status = parts
        .next()
        .context("Missing status code")?
        .parse::<u16>()
        .context("Invalid status code")?;

    let mut content_length = None;
    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("Content-Length") {
            let len = value.trim().parse::<usize>().context("Invalid Content-Length")?;
            content_length = Some(len);
        }
    }

    Ok((status, content_length))
}

fn has_body(status: u16) -> bool {
    !matches!(status, 100..=199 | 204 | 304)
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
