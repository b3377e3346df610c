//! Harbor - concurrent static file server
//!
//! Core library for serving a directory over HTTP/1.1, plus the load
//! generator used to measure it.

pub mod cli;
pub mod config;
pub mod error;
pub mod files;
pub mod http;
pub mod loadgen;
pub mod server;
