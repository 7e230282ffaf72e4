//! HTTP fetcher for RRDP documents.

use crate::options::{IpFamily, TransportError, TransportOptions};
use async_trait::async_trait;
use reqwest::Client;
use rrdp_sync_core::{FetchError, Fetcher};
use std::fs;
use std::path::Path;
use tokio::process::Command;
use url::Url;

/// Fetches documents over HTTP(S).
pub struct HttpFetcher {
    client: Client,
    options: TransportOptions,
}

/// Outcome of a failed attempt.
enum Attempt {
    Retry(FetchError),
    Fatal(FetchError),
}

impl HttpFetcher {
    /// Create a fetcher.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created, or if the CA
    /// certificate file cannot be read or parsed.
    pub fn new(options: TransportOptions) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .timeout(options.timeout)
            .user_agent(options.user_agent.clone())
            .danger_accept_invalid_certs(!options.verify_tls)
            .local_address(options.ip_family.local_address());

        if let Some(ca_path) = &options.ca_cert_path {
            let ca_cert = fs::read(ca_path).map_err(|e| {
                TransportError::Init(format!(
                    "failed to read CA certificate {}: {e}",
                    ca_path.display()
                ))
            })?;
            let cert = reqwest::Certificate::from_pem(&ca_cert).map_err(|e| {
                TransportError::Init(format!("failed to parse CA certificate: {e}"))
            })?;
            builder = builder.add_root_certificate(cert);
            tracing::debug!(ca_path = %ca_path.display(), "Loaded custom CA certificate");
        }

        if !options.verify_tls {
            tracing::warn!("TLS certificate verification disabled");
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Init(e.to_string()))?;

        Ok(Self { client, options })
    }

    /// The options this fetcher was built with.
    #[must_use]
    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, Attempt> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Attempt::Retry(request_error(url, &e)))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(Attempt::Fatal(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }));
        }
        if !status.is_success() {
            return Err(Attempt::Retry(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| Attempt::Retry(request_error(url, &e)))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::Request {
                url: url.to_string(),
                message: format!("unsupported scheme: {}", parsed.scheme()),
            });
        }

        tracing::debug!(url, "GET");

        let mut attempt = 0;
        let error = loop {
            match self.get(url).await {
                Ok(body) => {
                    tracing::debug!(url, bytes = body.len(), "Fetched");
                    return Ok(body);
                }
                Err(Attempt::Fatal(e)) => return Err(e),
                Err(Attempt::Retry(e)) if attempt < self.options.retries => {
                    attempt += 1;
                    let delay = self.options.retry_delay * attempt;
                    tracing::warn!(url, attempt, error = %e, ?delay, "Fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(Attempt::Retry(e)) => break e,
            }
        };

        match &self.options.downloader {
            Some(program) => {
                tracing::warn!(
                    url,
                    error = %error,
                    downloader = %program.display(),
                    "HTTP fetch failed, trying external downloader"
                );
                run_downloader(program, &self.options, url).await
            }
            None => Err(error),
        }
    }
}

fn request_error(url: &str, e: &reqwest::Error) -> FetchError {
    FetchError::Request {
        url: url.to_string(),
        message: e.to_string(),
    }
}

/// Command line for a `curl`-compatible downloader writing the body to stdout.
fn downloader_args(options: &TransportOptions, url: &str) -> Vec<String> {
    let mut args = vec![
        "--silent".to_string(),
        "--show-error".to_string(),
        "--fail".to_string(),
        "--location".to_string(),
        "--max-time".to_string(),
        options.timeout.as_secs().max(1).to_string(),
        "--user-agent".to_string(),
        options.user_agent.clone(),
    ];
    match options.ip_family {
        IpFamily::Any => {}
        IpFamily::V4 => args.push("--ipv4".to_string()),
        IpFamily::V6 => args.push("--ipv6".to_string()),
    }
    if !options.verify_tls {
        args.push("--insecure".to_string());
    }
    if let Some(ca_path) = &options.ca_cert_path {
        args.push("--cacert".to_string());
        args.push(ca_path.display().to_string());
    }
    args.push(url.to_string());
    args
}

async fn run_downloader(
    program: &Path,
    options: &TransportOptions,
    url: &str,
) -> Result<Vec<u8>, FetchError> {
    let output = Command::new(program)
        .args(downloader_args(options, url))
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| FetchError::Downloader {
            url: url.to_string(),
            message: format!("failed to run {}: {e}", program.display()),
        })?;

    if !output.status.success() {
        return Err(FetchError::Downloader {
            url: url.to_string(),
            message: format!(
                "{} exited with {}: {}",
                program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    tracing::debug!(url, bytes = output.stdout.len(), "Fetched with external downloader");
    Ok(output.stdout)
}
