//! # RRDP Sync Transport
//!
//! HTTP implementation of the [`rrdp_sync_core::Fetcher`] trait.
//!
//! - Retries with linear backoff on connection errors and 5xx responses
//! - TLS verification toggle and custom CA certificate (rustls)
//! - IPv4 / IPv6 selection through the local bind address
//! - Optional fallback to an external `curl`-compatible downloader

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod options;

pub use client::HttpFetcher;
pub use options::{IpFamily, TransportError, TransportOptions};
