//! SHA-256 hashing and declared-hash checks.

use crate::error::ProtocolError;
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Compare two hex digests ignoring case and surrounding whitespace.
#[must_use]
pub fn hashes_match(declared: &str, computed: &str) -> bool {
    declared.trim().eq_ignore_ascii_case(computed.trim())
}

/// What to do when a fetched document does not hash to its declared value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IntegrityMode {
    /// Log a warning and keep going
    #[default]
    Permissive,
    /// Reject the document with [`ProtocolError::HashMismatch`]
    Strict,
}

impl IntegrityMode {
    /// Check `computed` against `declared` for the document at `uri`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::HashMismatch`] in strict mode when the hashes
    /// differ.
    pub fn check(self, uri: &str, declared: &str, computed: &str) -> Result<(), ProtocolError> {
        if hashes_match(declared, computed) {
            return Ok(());
        }

        match self {
            Self::Permissive => {
                tracing::warn!(uri, declared, computed, "Document hash mismatch, continuing");
                Ok(())
            }
            Self::Strict => Err(ProtocolError::HashMismatch {
                uri: uri.to_string(),
                declared: declared.to_string(),
                computed: computed.to_string(),
            }),
        }
    }
}
