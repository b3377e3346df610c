#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use harbor::config::ServerConfig;
use harbor::error::ServerError;
use harbor::server::{LifecycleState, Server};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A running server over a temporary root directory.
pub struct TestServer {
    pub addr: SocketAddr,
    pub root: PathBuf,
    pub state: watch::Receiver<LifecycleState>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<(), ServerError>>>,
    _dir: TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Starts a server after letting `configure` adjust the defaults.
    pub async fn start_with(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();

        let mut config = ServerConfig::with_root(&root).unwrap();
        config.bind_addr = "127.0.0.1:0".parse().unwrap();
        configure(&mut config);

        let bound = Server::new(config).bind().await.unwrap();
        let addr = bound.local_addr();
        let mut state = bound.subscribe();

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(bound.run_until(async {
            let _ = rx.await;
        }));
        state
            .wait_for(|s| *s == LifecycleState::Running)
            .await
            .unwrap();

        Self {
            addr,
            root,
            state,
            shutdown: Some(tx),
            handle: Some(handle),
            _dir: dir,
        }
    }

    pub fn write_file(&self, relative: &str, contents: impl AsRef<[u8]>) -> PathBuf {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn trigger_shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    /// Begins shutdown and waits for the server to stop.
    pub async fn stop(&mut self) -> Result<(), ServerError> {
        self.trigger_shutdown();
        let handle = self.handle.take().expect("server already stopped");
        tokio::time::timeout(Duration::from_secs(15), handle)
            .await
            .expect("server did not stop in time")
            .unwrap()
    }

    pub async fn connect(&self) -> Client {
        Client::connect(self.addr).await
    }

    /// Sends one `Connection: close` GET and returns the response.
    pub async fn get(&self, target: &str) -> RawResponse {
        let mut client = self.connect().await;
        client
            .send(&format!(
                "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
                target
            ))
            .await;
        client.response().await
    }
}

#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A raw HTTP/1.1 client that reads responses off one connection.
pub struct Client {
    pub stream: TcpStream,
    buf: Vec<u8>,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = tokio::time::timeout(TIMEOUT, TcpStream::connect(addr))
            .await
            .expect("connect timed out")
            .unwrap();
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    pub async fn send(&mut self, raw: &str) {
        self.send_bytes(raw.as_bytes()).await;
    }

    pub async fn send_bytes(&mut self, raw: &[u8]) {
        self.stream.write_all(raw).await.unwrap();
    }

    /// Reads more bytes into the buffer. Returns 0 at end of stream.
    async fn fill(&mut self) -> usize {
        let mut chunk = [0u8; 16 * 1024];
        let n = tokio::time::timeout(TIMEOUT, self.stream.read(&mut chunk))
            .await
            .expect("read timed out")
            .unwrap_or(0);
        self.buf.extend_from_slice(&chunk[..n]);
        n
    }

    /// Reads one response head, without its body.
    pub async fn head(&mut self) -> RawResponse {
        let end = loop {
            if let Some(pos) = find(&self.buf, b"\r\n\r\n") {
                break pos;
            }
            if self.fill().await == 0 {
                panic!(
                    "connection closed before response head: {:?}",
                    String::from_utf8_lossy(&self.buf)
                );
            }
        };

        let head = String::from_utf8(self.buf[..end].to_vec()).unwrap();
        self.buf.drain(..end + 4);

        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap();
        let mut parts = status_line.splitn(3, ' ');
        assert_eq!(parts.next(), Some("HTTP/1.1"));
        let status = parts.next().unwrap().parse().unwrap();

        let headers = lines
            .map(|line| {
                let (k, v) = line.split_once(": ").unwrap();
                (k.to_string(), v.to_string())
            })
            .collect();

        RawResponse {
            status,
            headers,
            body: Vec::new(),
        }
    }

    /// Reads one complete response, decoding its framing.
    pub async fn response(&mut self) -> RawResponse {
        let mut response = self.head().await;

        if response.status == 304 {
            return response;
        }
        if response.header("Transfer-Encoding") == Some("chunked") {
            response.body = self.chunked_body().await;
        } else if let Some(len) = response.header("Content-Length") {
            let len: usize = len.parse().unwrap();
            response.body = self.exact(len).await;
        } else {
            // Delimited by connection close.
            while self.fill().await > 0 {}
            response.body = std::mem::take(&mut self.buf);
        }
        response
    }

    /// Reads exactly `len` bytes.
    pub async fn exact(&mut self, len: usize) -> Vec<u8> {
        while self.buf.len() < len {
            if self.fill().await == 0 {
                panic!("connection closed after {} of {} bytes", self.buf.len(), len);
            }
        }
        self.buf.drain(..len).collect()
    }

    async fn line(&mut self) -> String {
        loop {
            if let Some(pos) = find(&self.buf, b"\r\n") {
                let line = String::from_utf8(self.buf[..pos].to_vec()).unwrap();
                self.buf.drain(..pos + 2);
                return line;
            }
            if self.fill().await == 0 {
                panic!("connection closed inside chunked body");
            }
        }
    }

    async fn chunked_body(&mut self) -> Vec<u8> {
        let mut body = Vec::new();
        loop {
            let size = usize::from_str_radix(self.line().await.trim(), 16).unwrap();
            if size == 0 {
                assert_eq!(self.line().await, "");
                return body;
            }
            body.extend(self.exact(size).await);
            assert_eq!(self.line().await, "");
        }
    }

    /// True if the server closed the connection without sending anything more.
    pub async fn is_closed(&mut self) -> bool {
        self.buf.is_empty() && self.fill().await == 0
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Deterministic non-text payload.
pub fn binary_payload(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x2545_f491;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}
