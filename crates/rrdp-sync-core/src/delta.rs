//! Delta document client.
//!
//! Deltas newer than the caller's serial are fetched in parallel, one task
//! per delta, with at most `concurrency` fetches in flight. Completion order
//! is arbitrary; results are sorted ascending by serial before returning.
//!
//! Failure handling is fail-fast without cancellation: every task is allowed
//! to finish, then the first error observed is returned.

use crate::error::{ProtocolError, SyncError};
use crate::fetch::Fetcher;
use crate::hash::{sha256_hex, IntegrityMode};
use crate::model::{check_header, Delta, DeltaRef, Notification};
use rrdp_sync_proto::parse_delta;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Fetches and validates delta documents.
#[derive(Clone)]
pub struct DeltaClient {
    fetcher: Arc<dyn Fetcher>,
    integrity: IntegrityMode,
    concurrency: usize,
}

impl DeltaClient {
    /// Create a permissive client with one fetch slot per available CPU.
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        let concurrency = std::thread::available_parallelism().map_or(4, NonZeroUsize::get);
        Self {
            fetcher,
            integrity: IntegrityMode::default(),
            concurrency,
        }
    }

    /// Set how a delta hash mismatch is handled.
    #[must_use]
    pub fn with_integrity(mut self, integrity: IntegrityMode) -> Self {
        self.integrity = integrity;
        self
    }

    /// Limit the number of concurrent fetches (at least one).
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Fetch every delta of `n` with a serial above `last_serial`.
    ///
    /// # Errors
    ///
    /// Returns the first fetch, parse or validation error, after all
    /// outstanding fetches have completed.
    pub async fn fetch_all(
        &self,
        n: &Notification,
        last_serial: u64,
    ) -> Result<Vec<Delta>, SyncError> {
        let work: Vec<DeltaRef> = n
            .deltas
            .iter()
            .filter(|d| d.serial > last_serial)
            .cloned()
            .collect();

        if work.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(
            last_serial,
            count = work.len(),
            concurrency = self.concurrency,
            "Fetching deltas"
        );

        let notification = Arc::new(n.clone());
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for delta_ref in work {
            let fetcher = Arc::clone(&self.fetcher);
            let notification = Arc::clone(&notification);
            let semaphore = Arc::clone(&semaphore);
            let integrity = self.integrity;

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| SyncError::Task("delta fetch semaphore closed".into()))?;
                fetch_delta(fetcher.as_ref(), &notification, &delta_ref, integrity).await
            });
        }

        let mut deltas = Vec::with_capacity(tasks.len());
        let mut first_error = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(delta)) => deltas.push(delta),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Delta fetch failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Delta task did not complete");
                    if first_error.is_none() {
                        first_error = Some(SyncError::Task(e.to_string()));
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        deltas.sort_by_key(|d| d.serial);
        Ok(deltas)
    }

    /// Check a delta against the notification that referenced it.
    ///
    /// # Errors
    ///
    /// Returns error on a version or session id problem, when the serial is
    /// not listed in the notification, or (strict mode only) when the content
    /// hash differs from the declared delta hash.
    pub fn validate(&self, delta: &Delta, n: &Notification) -> Result<(), ProtocolError> {
        validate_delta(delta, n, self.integrity)
    }
}

fn validate_delta(
    delta: &Delta,
    n: &Notification,
    integrity: IntegrityMode,
) -> Result<(), ProtocolError> {
    check_header(&delta.version, &delta.session_id)?;

    if delta.session_id != n.session_id {
        return Err(ProtocolError::SessionIdMismatch {
            expected: n.session_id.clone(),
            found: delta.session_id.clone(),
        });
    }

    let delta_ref = n
        .delta_ref(delta.serial)
        .ok_or(ProtocolError::SerialNotInDeltas(delta.serial))?;

    integrity.check(&delta.source_uri, &delta_ref.hash, &delta.content_hash)
}

async fn fetch_delta(
    fetcher: &dyn Fetcher,
    n: &Notification,
    delta_ref: &DeltaRef,
    integrity: IntegrityMode,
) -> Result<Delta, SyncError> {
    let url = delta_ref.uri.as_str();
    tracing::debug!(serial = delta_ref.serial, url, "Fetching delta");

    let raw = fetcher.fetch(url).await?;
    let content_hash = sha256_hex(&raw);
    let doc = parse_delta(&raw).map_err(|e| SyncError::parse(url, e))?;
    let delta = Delta::from_doc(doc, content_hash, url);

    if delta.serial != delta_ref.serial {
        return Err(ProtocolError::SerialMismatch {
            expected: delta_ref.serial,
            found: delta.serial,
        }
        .into());
    }
    validate_delta(&delta, n, integrity)?;

    tracing::debug!(
        serial = delta.serial,
        publishes = delta.publishes.len(),
        withdraws = delta.withdraws.len(),
        "Delta fetched"
    );

    Ok(delta)
}
