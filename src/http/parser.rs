use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::http::request::{Headers, Method, Request, Version};
use crate::http::response::StatusCode;

pub const DEFAULT_MAX_HEADER_BYTES: usize = 8 * 1024;
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Longest chunk-size line accepted, extensions included.
const MAX_CHUNK_LINE: usize = 1024;

/// Size limits applied while parsing one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseLimits {
    /// Request line plus headers, terminating blank line excluded.
    pub max_header_bytes: usize,
    /// Decoded body size.
    pub max_body_bytes: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ParseLimits {
    /// Upper bound on buffered bytes for a single request, framing overhead included.
    pub fn max_request_bytes(&self) -> usize {
        self.max_header_bytes
            .saturating_add(self.max_body_bytes.saturating_mul(2))
            .saturating_add(4096)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("incomplete request")]
    Incomplete,
    #[error("invalid request line")]
    InvalidRequest,
    #[error("unknown method")]
    InvalidMethod,
    #[error("unsupported HTTP version")]
    UnsupportedVersion,
    #[error("invalid request target")]
    InvalidTarget,
    #[error("invalid header")]
    InvalidHeader,
    #[error("header section exceeds {0} bytes")]
    HeadersTooLarge(usize),
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("both Content-Length and Transfer-Encoding present")]
    AmbiguousFraming,
    #[error("unsupported transfer coding")]
    UnsupportedTransferEncoding,
    #[error("invalid chunked body")]
    InvalidChunk,
    #[error("body exceeds {0} bytes")]
    BodyTooLarge(usize),
}

impl ParseError {
    /// Status used to answer a request that failed with this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ParseError::InvalidMethod | ParseError::UnsupportedTransferEncoding => {
                StatusCode::NotImplemented
            }
            ParseError::UnsupportedVersion => StatusCode::HttpVersionNotSupported,
            ParseError::HeadersTooLarge(_) => StatusCode::RequestHeaderFieldsTooLarge,
            ParseError::BodyTooLarge(_) => StatusCode::PayloadTooLarge,
            _ => StatusCode::BadRequest,
        }
    }
}

/// Parses one request from the front of `buf`.
///
/// Returns the request and the number of bytes it occupied, or
/// `ParseError::Incomplete` when more input is needed.
pub fn parse_http_request(buf: &[u8], limits: &ParseLimits) -> Result<(Request, usize), ParseError> {
    RequestParser::new(*limits).parse(buf)
}

/// Parses requests off a connection buffer that grows between calls.
///
/// After `Incomplete` the parser remembers how far it got: the header
/// terminator search resumes where it stopped, a parsed head is kept, and
/// chunks already decoded are not decoded again. The caller must pass the
/// same buffer, grown only at the end, until a request or an error comes
/// back; the parser then starts afresh.
#[derive(Debug)]
pub struct RequestParser {
    limits: ParseLimits,
    /// Bytes already searched for the end of the header section.
    scanned: usize,
    pending: Option<Pending>,
}

/// A parsed head waiting for its body.
#[derive(Debug)]
struct Pending {
    head: Head,
    body_start: usize,
    framing: Framing,
}

#[derive(Debug)]
struct Head {
    method: Method,
    target: String,
    raw_path: String,
    path: String,
    query: Option<String>,
    version: Version,
    headers: Headers,
}

#[derive(Debug)]
enum Framing {
    Length(usize),
    Chunked(ChunkedDecoder),
}

impl RequestParser {
    pub fn new(limits: ParseLimits) -> Self {
        Self {
            limits,
            scanned: 0,
            pending: None,
        }
    }

    pub fn limits(&self) -> &ParseLimits {
        &self.limits
    }

    pub fn parse(&mut self, buf: &[u8]) -> Result<(Request, usize), ParseError> {
        let result = self.advance(buf);
        if !matches!(result, Err(ParseError::Incomplete)) {
            self.scanned = 0;
            self.pending = None;
        }
        result
    }

    fn advance(&mut self, buf: &[u8]) -> Result<(Request, usize), ParseError> {
        let mut pending = match self.pending.take() {
            Some(pending) => pending,
            None => self.parse_head(buf)?,
        };

        match pending.body(buf, &self.limits) {
            Ok((body, consumed)) => Ok((pending.head.into_request(body), consumed)),
            Err(ParseError::Incomplete) => {
                self.pending = Some(pending);
                Err(ParseError::Incomplete)
            }
            Err(e) => Err(e),
        }
    }

    fn parse_head(&mut self, buf: &[u8]) -> Result<Pending, ParseError> {
        let limits = self.limits;

        // Stray CRLFs between pipelined requests are ignored.
        let start = leading_empty_lines(buf);
        if buf.len() == start {
            return Err(ParseError::Incomplete);
        }

        // The terminator may straddle the previous end of input.
        let from = self.scanned.saturating_sub(3).clamp(start, buf.len());
        let headers_end = match find_headers_end(&buf[from..]).map(|end| from + end - start) {
            Some(end) if end > limits.max_header_bytes => {
                return Err(ParseError::HeadersTooLarge(limits.max_header_bytes));
            }
            Some(end) => end,
            None if buf.len() - start > limits.max_header_bytes + 3 => {
                return Err(ParseError::HeadersTooLarge(limits.max_header_bytes));
            }
            None => {
                self.scanned = buf.len();
                return Err(ParseError::Incomplete);
            }
        };

        let header_bytes = &buf[start..start + headers_end];
        let headers_str =
            std::str::from_utf8(header_bytes).map_err(|_| ParseError::InvalidRequest)?;

        let mut lines = headers_str.split("\r\n");

        // Request line
        let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
        let (method, target, version) = parse_request_line(request_line)?;
        let (raw_path, query) = split_target(target)?;
        let path = decode_path(&raw_path)?;

        // Headers
        let mut headers = Headers::new();
        for line in lines {
            let (name, value) = parse_header_line(line)?;
            headers.append(name, value);
        }

        let framing = body_framing(&headers, &limits)?;

        Ok(Pending {
            head: Head {
                method,
                target: target.to_string(),
                raw_path,
                path,
                query,
                version,
                headers,
            },
            body_start: start + headers_end + 4,
            framing,
        })
    }
}

impl Pending {
    /// Returns the body and the offset just past it.
    fn body(&mut self, buf: &[u8], limits: &ParseLimits) -> Result<(Bytes, usize), ParseError> {
        let rest = buf.get(self.body_start..).ok_or(ParseError::Incomplete)?;
        let (body, used) = match &mut self.framing {
            Framing::Length(len) => {
                let len = *len;
                if rest.len() < len {
                    return Err(ParseError::Incomplete);
                }
                (Bytes::copy_from_slice(&rest[..len]), len)
            }
            Framing::Chunked(decoder) => decoder.decode(rest, limits.max_body_bytes)?,
        };
        Ok((body, self.body_start + used))
    }
}

impl Head {
    fn into_request(self, body: Bytes) -> Request {
        Request {
            method: self.method,
            target: self.target,
            raw_path: self.raw_path,
            path: self.path,
            query: self.query,
            version: self.version,
            headers: self.headers,
            body,
        }
    }
}

fn body_framing(headers: &Headers, limits: &ParseLimits) -> Result<Framing, ParseError> {
    let content_length = parse_content_length(headers.get_all("Content-Length"))?;
    let transfer_encoding = headers.get_all("Transfer-Encoding");

    if !transfer_encoding.is_empty() {
        if content_length.is_some() {
            return Err(ParseError::AmbiguousFraming);
        }
        if !is_chunked(transfer_encoding) {
            return Err(ParseError::UnsupportedTransferEncoding);
        }
        return Ok(Framing::Chunked(ChunkedDecoder::default()));
    }

    let len = content_length.unwrap_or(0);
    if len > limits.max_body_bytes {
        return Err(ParseError::BodyTooLarge(limits.max_body_bytes));
    }
    Ok(Framing::Length(len))
}

fn leading_empty_lines(buf: &[u8]) -> usize {
    let mut pos = 0;
    while buf[pos..].starts_with(b"\r\n") {
        pos += 2;
    }
    pos
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// `METHOD SP request-target SP HTTP-version`, single spaces only.
fn parse_request_line(line: &str) -> Result<(Method, &str, Version), ParseError> {
    let mut parts = line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::InvalidRequest);
    };

    if method.is_empty() || !method.bytes().all(is_token_byte) {
        return Err(ParseError::InvalidRequest);
    }
    if target.is_empty() || target.bytes().any(|b| b.is_ascii_control()) {
        return Err(ParseError::InvalidRequest);
    }

    let version = parse_version(version)?;
    let method = Method::from_str(method).ok_or(ParseError::InvalidMethod)?;
    Ok((method, target, version))
}

fn parse_version(version: &str) -> Result<Version, ParseError> {
    match version {
        "HTTP/1.1" => Ok(Version::Http11),
        "HTTP/1.0" => Ok(Version::Http10),
        _ => {
            let well_formed = version
                .strip_prefix("HTTP/")
                .map(|v| v.as_bytes())
                .is_some_and(|v| {
                    v.len() == 3 && v[0].is_ascii_digit() && v[1] == b'.' && v[2].is_ascii_digit()
                });
            if well_formed {
                Err(ParseError::UnsupportedVersion)
            } else {
                Err(ParseError::InvalidRequest)
            }
        }
    }
}

/// Splits a request target into its still-encoded path and query.
fn split_target(target: &str) -> Result<(String, Option<String>), ParseError> {
    if target == "*" {
        return Ok((target.to_string(), None));
    }

    if target.starts_with('/') {
        let target = target.split('#').next().unwrap_or(target);
        return Ok(match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (target.to_string(), None),
        });
    }

    // absolute-form, as sent to proxies
    let url = url::Url::parse(target).map_err(|_| ParseError::InvalidTarget)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ParseError::InvalidTarget);
    }
    Ok((url.path().to_string(), url.query().map(str::to_string)))
}

fn decode_path(raw: &str) -> Result<String, ParseError> {
    let decoded = urlencoding::decode(raw).map_err(|_| ParseError::InvalidTarget)?;
    if decoded.contains('\0') {
        return Err(ParseError::InvalidTarget);
    }
    Ok(decoded.into_owned())
}

fn parse_header_line(line: &str) -> Result<(&str, &str), ParseError> {
    // obs-fold continuation lines are rejected, not unfolded
    if line.starts_with([' ', '\t']) {
        return Err(ParseError::InvalidHeader);
    }

    let (name, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
    if name.is_empty() || !name.bytes().all(is_token_byte) {
        return Err(ParseError::InvalidHeader);
    }

    let value = value.trim_matches([' ', '\t']);
    if value.bytes().any(|b| (b.is_ascii_control() && b != b'\t') || b == 0x7f) {
        return Err(ParseError::InvalidHeader);
    }
    Ok((name, value))
}

/// All Content-Length values must be plain digits and agree with each other.
fn parse_content_length(values: &[String]) -> Result<Option<usize>, ParseError> {
    let mut length = None;
    for item in values.iter().flat_map(|v| v.split(',')) {
        let item = item.trim();
        if item.is_empty() || !item.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::InvalidContentLength);
        }
        let parsed: usize = item.parse().map_err(|_| ParseError::InvalidContentLength)?;
        match length {
            Some(existing) if existing != parsed => return Err(ParseError::InvalidContentLength),
            _ => length = Some(parsed),
        }
    }
    Ok(length)
}

/// Only a lone `chunked` coding is understood.
fn is_chunked(values: &[String]) -> bool {
    let mut codings = values
        .iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|c| !c.is_empty());
    matches!(
        (codings.next(), codings.next()),
        (Some(coding), None) if coding.eq_ignore_ascii_case("chunked")
    )
}

/// Decodes a chunked body, one complete chunk at a time.
///
/// `pos` only moves past chunks that were fully present, so a call that
/// ends in `Incomplete` can be repeated on a longer buffer.
#[derive(Debug, Default)]
struct ChunkedDecoder {
    pos: usize,
    body: BytesMut,
    in_trailers: bool,
}

impl ChunkedDecoder {
    /// Returns the body and the bytes consumed, trailers included.
    fn decode(&mut self, buf: &[u8], max_body: usize) -> Result<(Bytes, usize), ParseError> {
        loop {
            let rest = buf.get(self.pos..).ok_or(ParseError::Incomplete)?;

            if self.in_trailers {
                // Trailer fields are read and dropped.
                let end = find_crlf(rest).ok_or(ParseError::Incomplete)?;
                self.pos += end + 2;
                if end == 0 {
                    let body = std::mem::take(&mut self.body).freeze();
                    return Ok((body, self.pos));
                }
                continue;
            }

            let line_end = match find_crlf(rest) {
                Some(end) => end,
                None if rest.len() > MAX_CHUNK_LINE => return Err(ParseError::InvalidChunk),
                None => return Err(ParseError::Incomplete),
            };
            let size = parse_chunk_size(&rest[..line_end])?;
            let data = line_end + 2;

            if size == 0 {
                self.pos += data;
                self.in_trailers = true;
                continue;
            }

            if self
                .body
                .len()
                .checked_add(size)
                .is_none_or(|total| total > max_body)
            {
                return Err(ParseError::BodyTooLarge(max_body));
            }
            if rest.len() < data + size + 2 {
                return Err(ParseError::Incomplete);
            }
            if &rest[data + size..data + size + 2] != b"\r\n" {
                return Err(ParseError::InvalidChunk);
            }
            self.body.extend_from_slice(&rest[data..data + size]);
            self.pos += data + size + 2;
        }
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    let size = line.split(|&b| b == b';').next().unwrap_or(line);
    let size = std::str::from_utf8(size)
        .map_err(|_| ParseError::InvalidChunk)?
        .trim_matches([' ', '\t']);
    if size.is_empty() || size.len() > 16 || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseError::InvalidChunk);
    }
    usize::from_str_radix(size, 16).map_err(|_| ParseError::InvalidChunk)
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}
