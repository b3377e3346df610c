//! Maps request paths onto files below the served root.
//!
//! Every path handed out is a descendant of the canonical root. Lexical
//! escapes (`..` past the root) and symbolic links leading outside the root
//! are refused with [`ResolveError::Forbidden`] before anything outside the
//! root is examined for existence.

use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::time::SystemTime;

use thiserror::Error;
use tokio::fs::{self, File};

use crate::config::ServerConfig;
use crate::files::listing::{self, ListingBody};
use crate::http::mime;

/// Links followed while judging one unresolvable link.
const MAX_LINK_HOPS: usize = 40;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for ResolveError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => ResolveError::NotFound,
            io::ErrorKind::PermissionDenied => ResolveError::Forbidden,
            _ => ResolveError::Io(e),
        }
    }
}

/// An opened regular file ready to stream.
#[derive(Debug)]
pub struct ServedFile {
    pub path: PathBuf,
    pub file: File,
    pub len: u64,
    pub content_type: &'static str,
    pub modified: Option<SystemTime>,
}

#[derive(Debug)]
pub enum Resolved {
    File(ServedFile),
    Listing(ListingBody),
    /// A directory was requested without its trailing slash.
    Redirect,
}

#[derive(Debug, Clone)]
pub struct Resolver {
    root: PathBuf,
    index_files: Vec<String>,
    directory_listing: bool,
}

impl Resolver {
    /// `root` must already be canonical.
    pub fn new(root: PathBuf, index_files: Vec<String>, directory_listing: bool) -> Self {
        Self {
            root,
            index_files,
            directory_listing,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.root.clone(),
            config.index_files.clone(),
            config.directory_listing,
        )
    }

    /// Resolves a percent-decoded request path.
    pub async fn resolve(&self, request_path: &str) -> Result<Resolved, ResolveError> {
        let segments = normalize(request_path)?;
        let path = self.confine(&segments).await?;
        let metadata = fs::metadata(&path).await?;

        if metadata.is_dir() {
            if !request_path.ends_with('/') {
                return Ok(Resolved::Redirect);
            }
            return self.resolve_directory(request_path, &segments, &path).await;
        }

        if metadata.is_file() {
            if request_path.ends_with('/') {
                return Err(ResolveError::NotFound);
            }
            return open(path, &metadata).await.map(Resolved::File);
        }

        // sockets, fifos, devices
        Err(ResolveError::Forbidden)
    }

    async fn resolve_directory(
        &self,
        request_path: &str,
        segments: &[&str],
        dir: &Path,
    ) -> Result<Resolved, ResolveError> {
        for name in &self.index_files {
            let mut candidate = segments.to_vec();
            candidate.push(name.as_str());

            let path = match self.confine(&candidate).await {
                Ok(path) => path,
                Err(ResolveError::NotFound | ResolveError::Forbidden) => continue,
                Err(e) => return Err(e),
            };
            match fs::metadata(&path).await {
                Ok(metadata) if metadata.is_file() => {
                    return open(path, &metadata).await.map(Resolved::File);
                }
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if !self.directory_listing {
            return Err(ResolveError::Forbidden);
        }

        let entries = listing::read_entries(dir).await?;
        Ok(Resolved::Listing(ListingBody::new(request_path, entries)))
    }

    async fn confine(&self, segments: &[&str]) -> Result<PathBuf, ResolveError> {
        self.walk(segments, 0).await
    }

    /// Walks `segments` from the root, following symbolic links, and fails
    /// with `Forbidden` as soon as a link points outside the root.
    ///
    /// A link that cannot be canonicalized is judged by where it points
    /// before its own error is reported, whatever that error is. A target
    /// inside the root is walked again so chained links get the same check.
    fn walk<'a>(
        &'a self,
        segments: &'a [&'a str],
        hops: usize,
    ) -> Pin<Box<dyn Future<Output = Result<PathBuf, ResolveError>> + Send + 'a>> {
        Box::pin(async move {
            let mut current = self.root.clone();

            for segment in segments {
                let candidate = current.join(segment);
                let metadata = fs::symlink_metadata(&candidate).await?;

                if !metadata.file_type().is_symlink() {
                    current = candidate;
                    continue;
                }

                current = match fs::canonicalize(&candidate).await {
                    Ok(target) => target,
                    Err(e) => {
                        let target = fs::read_link(&candidate).await?;
                        let target = lexical_normalize(&current.join(target));
                        let Ok(inside) = target.strip_prefix(&self.root) else {
                            return Err(ResolveError::Forbidden);
                        };
                        if hops >= MAX_LINK_HOPS {
                            return Err(ResolveError::Forbidden);
                        }
                        let inner = inside
                            .iter()
                            .map(|c| c.to_str())
                            .collect::<Option<Vec<_>>>()
                            .ok_or(ResolveError::Forbidden)?;
                        self.walk(&inner, hops + 1).await?;
                        return Err(e.into());
                    }
                };

                if !current.starts_with(&self.root) {
                    return Err(ResolveError::Forbidden);
                }
            }

            Ok(current)
        })
    }
}

async fn open(path: PathBuf, metadata: &std::fs::Metadata) -> Result<ServedFile, ResolveError> {
    let file = File::open(&path).await?;
    Ok(ServedFile {
        content_type: mime::from_path(&path),
        len: metadata.len(),
        modified: metadata.modified().ok(),
        file,
        path,
    })
}

/// Splits a decoded request path into segments, applying `.` and `..`.
///
/// Climbing above the root is refused rather than clamped.
fn normalize(request_path: &str) -> Result<Vec<&str>, ResolveError> {
    let mut segments = Vec::new();
    for segment in request_path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(ResolveError::Forbidden);
                }
            }
            s if s.contains(['\\', '\0']) => return Err(ResolveError::Forbidden),
            s => segments.push(s),
        }
    }
    Ok(segments)
}

/// Resolves `.` and `..` without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_applies_dot_segments() {
        assert_eq!(normalize("/a/./b/../c/").unwrap(), vec!["a", "c"]);
        assert_eq!(normalize("/").unwrap(), Vec::<&str>::new());
        assert_eq!(normalize("//a//b").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn normalize_refuses_escape() {
        assert!(matches!(normalize("/.."), Err(ResolveError::Forbidden)));
        assert!(matches!(normalize("/a/../../etc"), Err(ResolveError::Forbidden)));
        assert!(matches!(normalize("/a\\..\\b"), Err(ResolveError::Forbidden)));
    }

    #[test]
    fn lexical_normalize_strips_parents() {
        assert_eq!(
            lexical_normalize(Path::new("/srv/www/../etc/./passwd")),
            PathBuf::from("/srv/etc/passwd")
        );
    }
}
