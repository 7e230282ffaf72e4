//! Transport configuration.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Address family used for outgoing connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IpFamily {
    /// Let the resolver decide
    #[default]
    Any,
    /// IPv4 only
    V4,
    /// IPv6 only
    V6,
}

impl IpFamily {
    /// Local address to bind to, restricting connections to this family.
    #[must_use]
    pub fn local_address(self) -> Option<IpAddr> {
        match self {
            Self::Any => None,
            Self::V4 => Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            Self::V6 => Some(IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
        }
    }
}

impl FromStr for IpFamily {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "any" => Ok(Self::Any),
            "4" | "v4" | "ipv4" => Ok(Self::V4),
            "6" | "v6" | "ipv6" => Ok(Self::V6),
            other => Err(TransportError::InvalidOption(format!(
                "unknown IP family: {other}"
            ))),
        }
    }
}

/// HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Extra attempts after the first failed one
    pub retries: u32,
    /// Base delay between attempts; attempt `n` waits `n * retry_delay`
    pub retry_delay: Duration,
    /// Verify server certificates
    pub verify_tls: bool,
    /// Address family for outgoing connections
    pub ip_family: IpFamily,
    /// Per-request timeout
    pub timeout: Duration,
    /// Value of the User-Agent header
    pub user_agent: String,
    /// Additional trusted CA certificate (PEM format)
    pub ca_cert_path: Option<PathBuf>,
    /// `curl`-compatible program to run when every HTTP attempt failed
    pub downloader: Option<PathBuf>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            retries: 2,
            retry_delay: Duration::from_secs(1),
            verify_tls: true,
            ip_family: IpFamily::Any,
            timeout: Duration::from_secs(60),
            user_agent: concat!("rrdp-sync/", env!("CARGO_PKG_VERSION")).to_string(),
            ca_cert_path: None,
            downloader: None,
        }
    }
}

/// Errors building the transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// HTTP client initialization failed
    #[error("transport init error: {0}")]
    Init(String),
    /// An option value could not be understood
    #[error("invalid transport option: {0}")]
    InvalidOption(String),
}
