//! Snapshot document client.

use crate::error::{ProtocolError, SyncError};
use crate::fetch::Fetcher;
use crate::hash::{sha256_hex, IntegrityMode};
use crate::model::{check_header, Notification, Snapshot};
use rrdp_sync_proto::parse_snapshot;
use std::sync::Arc;

/// Fetches and validates snapshot documents.
#[derive(Clone)]
pub struct SnapshotClient {
    fetcher: Arc<dyn Fetcher>,
    integrity: IntegrityMode,
}

impl SnapshotClient {
    /// Create a permissive client fetching through `fetcher`.
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            integrity: IntegrityMode::default(),
        }
    }

    /// Set how a snapshot hash mismatch is handled.
    #[must_use]
    pub fn with_integrity(mut self, integrity: IntegrityMode) -> Self {
        self.integrity = integrity;
        self
    }

    /// Fetch and parse the snapshot at `url`.
    ///
    /// Records the SHA-256 of the raw bytes and the source URL; publish URIs
    /// are normalized. Call [`SnapshotClient::validate`] before applying.
    ///
    /// # Errors
    ///
    /// Returns error if the fetch fails or the document is malformed.
    pub async fn fetch(&self, url: &str) -> Result<Snapshot, SyncError> {
        tracing::debug!(url, "Fetching snapshot");

        let raw = self.fetcher.fetch(url).await?;
        let content_hash = sha256_hex(&raw);
        let doc = parse_snapshot(&raw).map_err(|e| SyncError::parse(url, e))?;
        let snapshot = Snapshot::from_doc(doc, content_hash, url);

        tracing::debug!(
            url,
            serial = snapshot.serial,
            objects = snapshot.publishes.len(),
            bytes = raw.len(),
            "Snapshot fetched"
        );

        Ok(snapshot)
    }

    /// Check a snapshot against the notification that referenced it.
    ///
    /// # Errors
    ///
    /// Returns error on a version or session id problem, when the serial is
    /// not listed among the notification's deltas, or (strict mode only) when
    /// the content hash differs from the declared snapshot hash.
    pub fn validate(&self, s: &Snapshot, n: &Notification) -> Result<(), ProtocolError> {
        check_header(&s.version, &s.session_id)?;

        if s.session_id != n.session_id {
            return Err(ProtocolError::SessionIdMismatch {
                expected: n.session_id.clone(),
                found: s.session_id.clone(),
            });
        }

        if !n.serial_index.is_empty() && !n.has_serial(s.serial) {
            return Err(ProtocolError::SerialNotInDeltas(s.serial));
        }

        self.integrity
            .check(&s.source_uri, &n.snapshot.hash, &s.content_hash)
    }
}
