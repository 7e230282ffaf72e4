//! # RRDP Sync Core
//!
//! Keeps a local file mirror of an RRDP (RFC 8182) repository in sync.
//!
//! This crate provides:
//! - Notification, snapshot and delta clients with protocol validation
//! - Bounded parallel delta fetching with serial ordering guarantees
//! - A mirror writer applying publish/withdraw operations to the filesystem
//! - A sync orchestrator choosing between deltas and a full snapshot
//!
//! Transport is pluggable through the [`Fetcher`] trait. Nothing in this
//! crate holds process-wide state: the mirror root, integrity mode and the
//! previously synced `(session_id, serial)` are passed in on every call.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod delta;
pub mod error;
pub mod fetch;
pub mod hash;
pub mod mirror;
pub mod model;
pub mod notification;
pub mod orchestrator;
pub mod snapshot;
pub mod uri;

#[cfg(test)]
mod fixtures;

pub use delta::DeltaClient;
pub use error::{FetchError, MirrorError, PartialApply, ProtocolError, SyncError};
pub use fetch::{Fetcher, StaticFetcher};
pub use hash::{sha256_hex, IntegrityMode};
pub use mirror::MirrorWriter;
pub use model::{
    Delta, DeltaRef, MirrorChangeRecord, Notification, PublishOp, Snapshot, SnapshotRef,
    SyncType, WithdrawOp,
};
pub use notification::NotificationClient;
pub use orchestrator::{
    RepositoryState, SyncFailure, SyncMethod, SyncOrchestrator, SyncOutcome, SyncState,
};
pub use snapshot::SnapshotClient;
