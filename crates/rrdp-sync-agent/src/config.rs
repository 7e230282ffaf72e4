//! Agent configuration.

use anyhow::{bail, Context, Result};
use rrdp_sync_core::IntegrityMode;
use rrdp_sync_transport::{IpFamily, TransportOptions};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Notification URLs of the repositories to mirror
    pub repositories: Vec<String>,

    /// Directory the mirror is written under
    pub mirror_root: PathBuf,

    /// `SQLite` database holding sync state and the change log
    pub db_path: PathBuf,

    /// Time between sync passes
    pub sync_interval: Duration,

    /// Handling of snapshot and delta hash mismatches
    pub integrity: IntegrityMode,

    /// HTTP transport settings
    pub transport: TransportOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            repositories: Vec::new(),
            mirror_root: PathBuf::from("./rrdp-mirror"),
            db_path: PathBuf::from("./rrdp-sync.db"),
            sync_interval: Duration::from_secs(600),
            integrity: IntegrityMode::Permissive,
            transport: TransportOptions::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `RRDP_REPOSITORIES`: JSON list of notification URLs
    /// - `RRDP_MIRROR_ROOT`: mirror directory
    /// - `RRDP_DB_PATH`: `SQLite` database path
    /// - `RRDP_SYNC_INTERVAL_SECS`: seconds between passes
    /// - `RRDP_RETRIES`: extra HTTP attempts per document
    /// - `RRDP_VERIFY_TLS`: "false" disables certificate checks
    /// - `RRDP_IP_FAMILY`: "any", "ipv4" or "ipv6"
    /// - `RRDP_TIMEOUT_SECS`: per-request timeout
    /// - `RRDP_DOWNLOADER`: `curl`-compatible fallback program
    /// - `RRDP_CA_CERT`: extra trusted CA certificate (PEM)
    /// - `RRDP_STRICT_HASH`: "true" rejects hash mismatches
    ///
    /// # Errors
    ///
    /// Returns error if a variable cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(repos_json) = std::env::var("RRDP_REPOSITORIES") {
            config.repositories =
                serde_json::from_str(&repos_json).context("Invalid RRDP_REPOSITORIES JSON")?;
        }

        if let Ok(root) = std::env::var("RRDP_MIRROR_ROOT") {
            config.mirror_root = PathBuf::from(root);
        }

        if let Ok(db_path) = std::env::var("RRDP_DB_PATH") {
            config.db_path = PathBuf::from(db_path);
        }

        if let Ok(secs) = std::env::var("RRDP_SYNC_INTERVAL_SECS") {
            config.sync_interval = Duration::from_secs(
                secs.parse()
                    .context("Invalid RRDP_SYNC_INTERVAL_SECS")?,
            );
        }

        if let Ok(retries) = std::env::var("RRDP_RETRIES") {
            config.transport.retries = retries.parse().context("Invalid RRDP_RETRIES")?;
        }

        if let Ok(verify) = std::env::var("RRDP_VERIFY_TLS") {
            config.transport.verify_tls = parse_bool(&verify).context("Invalid RRDP_VERIFY_TLS")?;
        }

        if let Ok(family) = std::env::var("RRDP_IP_FAMILY") {
            config.transport.ip_family = family
                .parse::<IpFamily>()
                .context("Invalid RRDP_IP_FAMILY")?;
        }

        if let Ok(secs) = std::env::var("RRDP_TIMEOUT_SECS") {
            config.transport.timeout =
                Duration::from_secs(secs.parse().context("Invalid RRDP_TIMEOUT_SECS")?);
        }

        if let Ok(downloader) = std::env::var("RRDP_DOWNLOADER") {
            config.transport.downloader = Some(PathBuf::from(downloader));
        }

        if let Ok(ca_cert) = std::env::var("RRDP_CA_CERT") {
            config.transport.ca_cert_path = Some(PathBuf::from(ca_cert));
        }

        if let Ok(strict) = std::env::var("RRDP_STRICT_HASH") {
            if parse_bool(&strict).context("Invalid RRDP_STRICT_HASH")? {
                config.integrity = IntegrityMode::Strict;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the interval and that every repository URL is an absolute
    /// HTTP(S) URL.
    ///
    /// # Errors
    ///
    /// Returns error naming the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.sync_interval.is_zero() {
            bail!("Sync interval must be greater than zero");
        }
        for repo in &self.repositories {
            let url = Url::parse(repo).with_context(|| format!("Invalid repository URL {repo}"))?;
            if !matches!(url.scheme(), "http" | "https") {
                bail!("Repository URL {repo} must use http or https");
            }
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got {other:?}"),
    }
}
