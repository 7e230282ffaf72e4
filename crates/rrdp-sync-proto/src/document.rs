//! Parsed document shapes.
//!
//! These mirror the XML one to one. Attribute values are kept verbatim;
//! nothing here is normalized or validated beyond what the parser needs to
//! build the struct.

/// Attributes shared by the root element of every RRDP document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocHeader {
    /// Protocol version (`"1"` for RFC 8182)
    pub version: String,
    /// Session identifier; empty when the attribute is absent
    pub session_id: String,
    /// Repository serial
    pub serial: u64,
}

/// Location of the snapshot referenced by a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRefDoc {
    /// Snapshot document URL
    pub uri: String,
    /// Declared SHA-256 of the snapshot document (hex)
    pub hash: String,
}

/// A delta entry of a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaRefDoc {
    /// Serial the delta moves the repository to
    pub serial: u64,
    /// Delta document URL
    pub uri: String,
    /// Declared SHA-256 of the delta document (hex)
    pub hash: String,
}

/// `<notification>` document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationDoc {
    /// Root attributes
    pub header: DocHeader,
    /// The single `<snapshot>` child
    pub snapshot: SnapshotRefDoc,
    /// `<delta>` children, in document order
    pub deltas: Vec<DeltaRefDoc>,
}

/// A `<publish>` element with its decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishElement {
    /// Object URI
    pub uri: String,
    /// Hash of the object being replaced, if any
    pub hash: Option<String>,
    /// Base64-decoded object bytes
    pub payload: Vec<u8>,
}

/// A `<withdraw>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawElement {
    /// Object URI
    pub uri: String,
    /// Hash of the object being withdrawn
    pub hash: Option<String>,
}

/// `<snapshot>` document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDoc {
    /// Root attributes
    pub header: DocHeader,
    /// `<publish>` children, in document order
    pub publishes: Vec<PublishElement>,
}

/// `<delta>` document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaDoc {
    /// Root attributes
    pub header: DocHeader,
    /// `<publish>` children, in document order
    pub publishes: Vec<PublishElement>,
    /// `<withdraw>` children, in document order
    pub withdraws: Vec<WithdrawElement>,
}
