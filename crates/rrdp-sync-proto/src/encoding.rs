//! Publish payload encoding.
//!
//! RRDP carries object bytes as standard base64 (with padding) in the text
//! content of `<publish>` elements. Publishers commonly wrap the text at 64
//! or 76 columns, so ASCII whitespace is stripped before decoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Decode the text content of a `<publish>` element.
///
/// # Errors
///
/// Returns error if the text is not valid base64 once whitespace is removed.
///
/// # Examples
///
/// ```
/// use rrdp_sync_proto::decode_payload;
///
/// let bytes = decode_payload("aGVs\n  bG8=\n").unwrap();
/// assert_eq!(bytes, b"hello");
/// ```
pub fn decode_payload(text: &str) -> Result<Vec<u8>, EncodingError> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| EncodingError::Base64Decode(e.to_string()))
}

/// Encode object bytes as `<publish>` text content.
#[must_use]
pub fn encode_payload(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Errors that can occur while decoding payloads.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EncodingError {
    /// Base64 decoding failed
    #[error("base64 decode error: {0}")]
    Base64Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_wrapped_text() {
        let encoded = encode_payload(&[0u8; 100]);
        let wrapped: String = encoded
            .as_bytes()
            .chunks(64)
            .map(|c| format!("\n    {}", std::str::from_utf8(c).unwrap()))
            .collect();

        assert_eq!(decode_payload(&wrapped).unwrap(), vec![0u8; 100]);
    }

    #[test]
    fn decode_empty_text() {
        assert!(decode_payload("  \n ").unwrap().is_empty());
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode_payload("not*base64").unwrap_err();
        assert!(err.to_string().contains("base64 decode error"));
    }
}
