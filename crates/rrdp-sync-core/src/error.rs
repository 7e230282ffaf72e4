//! Error taxonomy for a sync pass.
//!
//! | Kind | Effect |
//! |------|--------|
//! | [`FetchError`] | Recoverable while fetching deltas (snapshot fallback), fatal otherwise |
//! | [`ProtocolError`] | Document inconsistent with the protocol or the notification |
//! | [`MirrorError`] | Filesystem mapping or I/O failure; aborts the apply step |
//!
//! Hash mismatches are only errors in [`IntegrityMode::Strict`](crate::IntegrityMode).

use crate::model::MirrorChangeRecord;
use rrdp_sync_proto::ParseError;
use std::path::PathBuf;

/// Errors returned by a [`Fetcher`](crate::Fetcher).
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// The request could not be sent or the body could not be read
    #[error("request to {url} failed: {message}")]
    Request {
        /// Requested URL
        url: String,
        /// Transport error
        message: String,
    },
    /// The server answered with a non-success status
    #[error("{url} returned HTTP status {status}")]
    Status {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },
    /// The external downloader failed
    #[error("downloader failed for {url}: {message}")]
    Downloader {
        /// Requested URL
        url: String,
        /// Process error or stderr output
        message: String,
    },
    /// No document is known for the URL
    #[error("no document at {0}")]
    NotFound(String),
}

/// Violations of RRDP consistency rules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Document version is not `"1"`
    #[error("unsupported protocol version '{0}'")]
    UnsupportedVersion(String),
    /// Document has no session id
    #[error("missing session id")]
    MissingSessionId,
    /// Document belongs to a different session than the notification
    #[error("session id mismatch: expected {expected}, found {found}")]
    SessionIdMismatch {
        /// Session id of the notification
        expected: String,
        /// Session id of the document
        found: String,
    },
    /// Serial is not listed among the notification's deltas
    #[error("serial {0} is not listed in the notification deltas")]
    SerialNotInDeltas(u64),
    /// Notification lists the same delta serial twice
    #[error("notification lists delta serial {0} more than once")]
    DuplicateSerial(u64),
    /// A delta document carries a different serial than the one referencing it
    #[error("delta document has serial {found}, notification references serial {expected}")]
    SerialMismatch {
        /// Serial from the notification entry
        expected: u64,
        /// Serial from the delta document
        found: u64,
    },
    /// Computed document hash differs from the declared one
    #[error("hash mismatch for {uri}: declared {declared}, computed {computed}")]
    HashMismatch {
        /// Document URL
        uri: String,
        /// Hash declared by the notification
        declared: String,
        /// SHA-256 of the fetched bytes
        computed: String,
    },
}

/// Errors mapping a URI into the mirror or mutating the mirror.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MirrorError {
    /// Mapped path exceeds the portable path length limit
    #[error("path too long ({len} bytes): {}", .path.display())]
    PathTooLong {
        /// Offending path
        path: PathBuf,
        /// Length in bytes
        len: usize,
    },
    /// A path component exceeds the portable file name limit
    #[error("file name too long ({len} bytes): {name}")]
    NameTooLong {
        /// Offending component
        name: String,
        /// Length in bytes
        len: usize,
    },
    /// URI has no usable path or cannot be decoded
    #[error("invalid object URI: {0}")]
    InvalidUri(String),
    /// Filesystem call failed
    #[error("I/O error on {}: {message}", .path.display())]
    Io {
        /// Path being read or written
        path: PathBuf,
        /// OS error
        message: String,
    },
}

impl MirrorError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// A mirror update that stopped part way.
///
/// Changes already made are not rolled back; `applied` lists them in the
/// order they were made so the caller can still index them.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error} ({} changes applied before the failure)", .applied.len())]
pub struct PartialApply {
    /// Changes made before the failure
    pub applied: Vec<MirrorChangeRecord>,
    /// The failure
    #[source]
    pub error: MirrorError,
}

/// Errors of a single client call or sync pass.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    /// Fetching a document failed
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    /// A document could not be parsed
    #[error("failed to parse {url}: {source}")]
    Parse {
        /// Document URL
        url: String,
        /// Parser error
        source: ParseError,
    },
    /// A document violates protocol rules
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// Applying changes to the mirror failed
    #[error("mirror update failed: {0}")]
    Apply(#[from] PartialApply),
    /// A delta fetch task panicked or was aborted
    #[error("delta task failed: {0}")]
    Task(String),
}

impl SyncError {
    pub(crate) fn parse(url: &str, source: ParseError) -> Self {
        Self::Parse {
            url: url.to_string(),
            source,
        }
    }
}
