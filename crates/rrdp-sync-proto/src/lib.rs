//! # RRDP Protocol
//!
//! Wire shapes of the three RRDP documents (RFC 8182) and a strict parser
//! for each of them.
//!
//! ## Documents
//!
//! - **Notification**: current session and serial, snapshot location, and the
//!   list of available deltas
//! - **Snapshot**: every published object at one serial
//! - **Delta**: publish/withdraw operations moving serial N-1 to serial N
//!
//! The parser checks document *shape* only. Protocol rules (version, session
//! consistency, serial membership) are enforced by the sync core.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod document;
pub mod encoding;
pub mod xml;

pub use document::{
    DeltaDoc, DeltaRefDoc, DocHeader, NotificationDoc, PublishElement, SnapshotDoc,
    SnapshotRefDoc, WithdrawElement,
};
pub use encoding::{decode_payload, encode_payload, EncodingError};
pub use xml::{parse_delta, parse_notification, parse_snapshot, ParseError};
