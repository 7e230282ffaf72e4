//! Notification document client.

use crate::error::{ProtocolError, SyncError};
use crate::fetch::Fetcher;
use crate::model::{check_header, DeltaRef, Notification, SnapshotRef};
use crate::uri::normalize_uri;
use rrdp_sync_proto::{parse_notification, NotificationDoc};
use std::collections::HashSet;
use std::sync::Arc;

/// Fetches and validates notification documents.
#[derive(Clone)]
pub struct NotificationClient {
    fetcher: Arc<dyn Fetcher>,
}

impl NotificationClient {
    /// Create a client fetching through `fetcher`.
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetch, parse and validate the notification at `url`.
    ///
    /// The returned deltas are sorted ascending by serial.
    ///
    /// # Errors
    ///
    /// Returns error if the fetch fails, the document is malformed, or it
    /// violates protocol rules (version, session id, duplicate serials, a
    /// serial not present among its own deltas).
    pub async fn fetch(&self, url: &str) -> Result<Notification, SyncError> {
        tracing::debug!(url, "Fetching notification");

        let raw = self.fetcher.fetch(url).await?;
        let doc = parse_notification(&raw).map_err(|e| SyncError::parse(url, e))?;
        let notification = build(doc)?;
        Self::validate(&notification, Some(notification.serial))?;

        tracing::debug!(
            url,
            session_id = %notification.session_id,
            serial = notification.serial,
            min_serial = notification.min_serial,
            max_serial = notification.max_serial,
            deltas = notification.deltas.len(),
            "Notification fetched"
        );

        Ok(notification)
    }

    /// Check version and session id, and that `declared_serial` (when given)
    /// is one of the listed delta serials. A notification without deltas
    /// accepts any serial.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(n: &Notification, declared_serial: Option<u64>) -> Result<(), ProtocolError> {
        check_header(&n.version, &n.session_id)?;

        if let Some(serial) = declared_serial {
            if !n.serial_index.is_empty() && !n.has_serial(serial) {
                return Err(ProtocolError::SerialNotInDeltas(serial));
            }
        }

        Ok(())
    }
}

fn build(doc: NotificationDoc) -> Result<Notification, ProtocolError> {
    let header = doc.header;
    check_header(&header.version, &header.session_id)?;

    let mut serial_index = HashSet::with_capacity(doc.deltas.len());
    let mut min_serial = u64::MAX;
    let mut max_serial = 0;
    let mut deltas = Vec::with_capacity(doc.deltas.len());

    for delta in doc.deltas {
        if !serial_index.insert(delta.serial) {
            return Err(ProtocolError::DuplicateSerial(delta.serial));
        }
        min_serial = min_serial.min(delta.serial);
        max_serial = max_serial.max(delta.serial);
        deltas.push(DeltaRef {
            serial: delta.serial,
            uri: normalize_uri(&delta.uri),
            hash: delta.hash,
        });
    }
    deltas.sort_by_key(|d| d.serial);

    if deltas.is_empty() {
        min_serial = 0;
    }

    Ok(Notification {
        version: header.version,
        session_id: header.session_id,
        serial: header.serial,
        snapshot: SnapshotRef {
            uri: doc.snapshot.uri,
            hash: doc.snapshot.hash,
        },
        deltas,
        serial_index,
        min_serial,
        max_serial,
    })
}
