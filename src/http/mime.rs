//! Content-Type lookup by file extension.

use std::path::Path;

/// Type used when the extension is missing or unknown.
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// Returns the Content-Type for `path` from a fixed extension table.
///
/// Extensions are compared case-insensitively.
///
/// ```
/// # use harbor::http::mime;
/// # use std::path::Path;
/// assert_eq!(mime::from_path(Path::new("index.HTML")), "text/html; charset=utf-8");
/// assert_eq!(mime::from_path(Path::new("archive.bin")), "application/octet-stream");
/// ```
pub fn from_path(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| from_extension(&ext.to_ascii_lowercase()))
        .unwrap_or(DEFAULT_MIME)
}

fn from_extension(ext: &str) -> &'static str {
    match ext {
        // text
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "txt" | "text" | "log" => "text/plain; charset=utf-8",
        "md" | "markdown" => "text/markdown; charset=utf-8",
        "csv" => "text/csv; charset=utf-8",
        "xml" => "application/xml",
        "json" | "map" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "toml" => "application/toml",

        // images
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/vnd.microsoft.icon",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "bmp" => "image/bmp",

        // fonts
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",

        // audio / video
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",

        // archives and binaries
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "wasm" => "application/wasm",

        _ => DEFAULT_MIME,
    }
}
