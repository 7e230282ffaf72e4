//! Validated RRDP documents and mirror change records.

use crate::error::ProtocolError;
use crate::uri::normalize_uri;
use rrdp_sync_proto::{DeltaDoc, PublishElement, SnapshotDoc, WithdrawElement};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// The only RRDP protocol version this client speaks.
pub const PROTOCOL_VERSION: &str = "1";

/// Reject documents with an unknown version or no session id.
pub(crate) fn check_header(version: &str, session_id: &str) -> Result<(), ProtocolError> {
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version.to_string()));
    }
    if session_id.is_empty() {
        return Err(ProtocolError::MissingSessionId);
    }
    Ok(())
}

/// Snapshot location from a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    /// Snapshot document URL
    pub uri: String,
    /// Declared SHA-256 (hex)
    pub hash: String,
}

/// Delta entry from a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaRef {
    /// Serial the delta produces
    pub serial: u64,
    /// Delta document URL
    pub uri: String,
    /// Declared SHA-256 (hex)
    pub hash: String,
}

/// A fetched and validated notification.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Protocol version
    pub version: String,
    /// Current session
    pub session_id: String,
    /// Current serial
    pub serial: u64,
    /// Snapshot for the current serial
    pub snapshot: SnapshotRef,
    /// Available deltas, ascending by serial, unique
    pub deltas: Vec<DeltaRef>,
    /// Serials present in `deltas`
    pub serial_index: HashSet<u64>,
    /// Lowest delta serial (0 when there are no deltas)
    pub min_serial: u64,
    /// Highest delta serial (0 when there are no deltas)
    pub max_serial: u64,
}

impl Notification {
    /// Whether `serial` is listed among the deltas.
    #[must_use]
    pub fn has_serial(&self, serial: u64) -> bool {
        self.serial_index.contains(&serial)
    }

    /// The delta entry for `serial`, if listed.
    #[must_use]
    pub fn delta_ref(&self, serial: u64) -> Option<&DeltaRef> {
        self.deltas
            .binary_search_by_key(&serial, |d| d.serial)
            .ok()
            .map(|i| &self.deltas[i])
    }

    /// Whether every serial in `(after, max_serial]` is listed.
    #[must_use]
    pub fn covers_serials_after(&self, after: u64) -> bool {
        !self.deltas.is_empty()
            && after < self.max_serial
            && (after + 1..=self.max_serial).all(|s| self.has_serial(s))
    }
}

/// A publish operation with its decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOp {
    /// Normalized object URI
    pub uri: String,
    /// Hash of the object being replaced (deltas only)
    pub expected_hash: Option<String>,
    /// Object bytes
    pub payload: Vec<u8>,
}

/// A withdraw operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawOp {
    /// Normalized object URI
    pub uri: String,
    /// Hash of the object being withdrawn
    pub expected_hash: Option<String>,
}

/// A fetched snapshot document.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Protocol version
    pub version: String,
    /// Session id
    pub session_id: String,
    /// Serial
    pub serial: u64,
    /// Every published object
    pub publishes: Vec<PublishOp>,
    /// SHA-256 of the raw document
    pub content_hash: String,
    /// URL the document was fetched from
    pub source_uri: String,
}

impl Snapshot {
    pub(crate) fn from_doc(doc: SnapshotDoc, content_hash: String, source_uri: &str) -> Self {
        Self {
            version: doc.header.version,
            session_id: doc.header.session_id,
            serial: doc.header.serial,
            publishes: doc
                .publishes
                .into_iter()
                .map(|p| PublishOp {
                    expected_hash: None,
                    ..publish_op(p)
                })
                .collect(),
            content_hash,
            source_uri: source_uri.to_string(),
        }
    }
}

/// A fetched delta document.
#[derive(Debug, Clone)]
pub struct Delta {
    /// Protocol version
    pub version: String,
    /// Session id
    pub session_id: String,
    /// Serial this delta produces
    pub serial: u64,
    /// Objects added or replaced
    pub publishes: Vec<PublishOp>,
    /// Objects removed
    pub withdraws: Vec<WithdrawOp>,
    /// SHA-256 of the raw document
    pub content_hash: String,
    /// URL the document was fetched from
    pub source_uri: String,
}

impl Delta {
    pub(crate) fn from_doc(doc: DeltaDoc, content_hash: String, source_uri: &str) -> Self {
        Self {
            version: doc.header.version,
            session_id: doc.header.session_id,
            serial: doc.header.serial,
            publishes: doc.publishes.into_iter().map(publish_op).collect(),
            withdraws: doc.withdraws.into_iter().map(withdraw_op).collect(),
            content_hash,
            source_uri: source_uri.to_string(),
        }
    }
}

fn publish_op(element: PublishElement) -> PublishOp {
    PublishOp {
        uri: normalize_uri(&element.uri),
        expected_hash: element.hash,
        payload: element.payload,
    }
}

fn withdraw_op(element: WithdrawElement) -> WithdrawOp {
    WithdrawOp {
        uri: normalize_uri(&element.uri),
        expected_hash: element.hash,
    }
}

/// Kind of mirror mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    /// File written from a snapshot
    Add,
    /// File written from a delta
    Update,
    /// File removed by a delta
    Del,
}

impl SyncType {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Del => "del",
        }
    }

    /// Inverse of [`SyncType::as_str`].
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "add" => Some(Self::Add),
            "update" => Some(Self::Update),
            "del" => Some(Self::Del),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One filesystem mutation made during a sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorChangeRecord {
    /// Directory holding the file
    pub file_path: PathBuf,
    /// File name within `file_path`
    pub file_name: String,
    /// What happened to the file
    pub sync_type: SyncType,
    /// URL of the snapshot or delta document that caused the change
    pub source_uri: String,
}

impl MirrorChangeRecord {
    /// Full path of the affected file.
    #[must_use]
    pub fn full_path(&self) -> PathBuf {
        self.file_path.join(&self.file_name)
    }
}
