//! Static file serving: path resolution below the root and directory listings.

pub mod listing;
pub mod resolver;

pub use resolver::{ResolveError, Resolved, Resolver, ServedFile};
