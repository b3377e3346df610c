//! Turns a parsed request into a response from the static file tree.

use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::files::{ResolveError, Resolved, Resolver, ServedFile};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};

pub const SERVER_NAME: &str = concat!("harbor/", env!("CARGO_PKG_VERSION"));

pub async fn handle(request: &Request, resolver: &Resolver) -> Response {
    if !matches!(request.method, Method::GET | Method::HEAD) {
        return ResponseBuilder::new(StatusCode::MethodNotAllowed)
            .header("Content-Type", "text/plain; charset=utf-8")
            .header("Allow", "GET, HEAD")
            .body("405 Method Not Allowed")
            .build();
    }

    match resolver.resolve(&request.path).await {
        Ok(Resolved::File(file)) => file_response(request, file),
        Ok(Resolved::Listing(listing)) => ResponseBuilder::new(StatusCode::Ok)
            .header("Content-Type", "text/html; charset=utf-8")
            .stream(listing)
            .build(),
        Ok(Resolved::Redirect) => ResponseBuilder::new(StatusCode::MovedPermanently)
            .header("Location", redirect_location(request))
            .build(),
        Err(ResolveError::NotFound) => Response::not_found(),
        Err(ResolveError::Forbidden) => Response::forbidden(),
        Err(ResolveError::Io(e)) => {
            tracing::warn!(path = %request.path, error = %e, "Failed to resolve path");
            Response::internal_error()
        }
    }
}

/// The request's own path with a trailing slash, query kept.
///
/// Leading slashes are collapsed to one: `//host/..` must stay a path and
/// never read as a protocol-relative URL.
fn redirect_location(request: &Request) -> String {
    let path = request.raw_path.trim_start_matches('/');
    let mut location = format!("/{}/", path);
    if let Some(query) = &request.query {
        location.push('?');
        location.push_str(query);
    }
    location
}

fn file_response(request: &Request, served: ServedFile) -> Response {
    let modified = served.modified.map(to_http_time);

    if let (Some(modified), Some(since)) = (modified, if_modified_since(request)) {
        if modified <= since {
            return ResponseBuilder::new(StatusCode::NotModified)
                .header("Last-Modified", http_date(modified))
                .build();
        }
    }

    let mut builder = ResponseBuilder::new(StatusCode::Ok).header("Content-Type", served.content_type);
    if let Some(modified) = modified {
        builder = builder.header("Last-Modified", http_date(modified));
    }
    builder.file(served.file, served.len).build()
}

fn if_modified_since(request: &Request) -> Option<DateTime<Utc>> {
    let value = request.header("If-Modified-Since")?;
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// HTTP dates have one-second resolution.
fn to_http_time(time: SystemTime) -> DateTime<Utc> {
    let time: DateTime<Utc> = time.into();
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or(time)
}

/// IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Prepends the `Date` and `Server` headers every response carries.
pub fn stamp(response: &mut Response) {
    response
        .headers
        .insert(0, ("Server".to_string(), SERVER_NAME.to_string()));
    response
        .headers
        .insert(0, ("Date".to_string(), http_date(Utc::now())));
}
