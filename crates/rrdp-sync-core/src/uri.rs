//! Object URI normalization and mapping into the mirror.
//!
//! An object URI such as `rsync://rpki.example.net/repo/ca/roa.roa` maps to
//! `<root>/rpki.example.net/repo/ca/roa.roa`. The scheme is dropped, the rest
//! is percent-decoded, and `.`/`..`/empty components are discarded so that a
//! mapped path can never leave the mirror root.

use crate::error::MirrorError;
use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};

/// Longest mapped path accepted, in bytes.
pub const MAX_PATH_LEN: usize = 4096;

/// Longest single path component accepted, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Rewrite every `../` segment to `/`.
///
/// Applied to every URI taken from a document before it is used anywhere.
///
/// # Examples
///
/// ```
/// use rrdp_sync_core::uri::normalize_uri;
///
/// assert_eq!(normalize_uri("rsync://h/a/../../b.cer"), "rsync://h/a///b.cer");
/// ```
#[must_use]
pub fn normalize_uri(uri: &str) -> String {
    let mut normalized = uri.to_string();
    // Replacement can create a new "../" (e.g. "..../"), so repeat
    while normalized.contains("../") {
        normalized = normalized.replace("../", "/");
    }
    normalized
}

/// Map an object URI to a path under `root`.
///
/// Length limits are checked here so that a batch can be rejected before
/// any file is touched.
///
/// # Errors
///
/// Returns [`MirrorError::InvalidUri`] if nothing usable remains of the URI,
/// and [`MirrorError::NameTooLong`] / [`MirrorError::PathTooLong`] when the
/// result exceeds portable limits.
pub fn map_uri_to_path(root: &Path, uri: &str) -> Result<PathBuf, MirrorError> {
    let without_scheme = uri.find("://").map_or(uri, |idx| &uri[idx + 3..]);
    let decoded = percent_decode_str(without_scheme)
        .decode_utf8()
        .map_err(|_| MirrorError::InvalidUri(uri.to_string()))?;
    let decoded = normalize_uri(&decoded);

    let mut path = root.to_path_buf();
    let mut components = 0usize;
    for component in decoded
        .split(['/', '\\'])
        .filter(|c| !c.is_empty() && *c != "." && *c != "..")
    {
        if component.len() > MAX_NAME_LEN {
            return Err(MirrorError::NameTooLong {
                name: component.to_string(),
                len: component.len(),
            });
        }
        path.push(component);
        components += 1;
    }

    if components == 0 {
        return Err(MirrorError::InvalidUri(uri.to_string()));
    }

    let len = path.as_os_str().len();
    if len > MAX_PATH_LEN {
        return Err(MirrorError::PathTooLong { path, len });
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_traversal() {
        assert_eq!(normalize_uri("rsync://h/../../etc/passwd"), "rsync://h///etc/passwd");
        assert_eq!(normalize_uri("a/..../b"), "a//b");
        assert_eq!(normalize_uri("rsync://h/plain.cer"), "rsync://h/plain.cer");
    }

    #[test]
    fn maps_host_and_path() {
        let root = Path::new("/mirror");
        let path = map_uri_to_path(root, "rsync://rpki.example.net/repo/ca/a.roa").unwrap();
        assert_eq!(path, Path::new("/mirror/rpki.example.net/repo/ca/a.roa"));
    }

    #[test]
    fn traversal_stays_under_root() {
        let root = Path::new("/mirror");
        for uri in [
            "rsync://host/../../etc/passwd",
            "../../etc/passwd",
            "rsync://host/a/..",
            "rsync://host/%2e%2e/%2e%2e/etc/passwd",
            "rsync://host/..\\..\\etc\\passwd",
        ] {
            let path = map_uri_to_path(root, uri).unwrap();
            assert!(path.starts_with(root), "{uri} escaped to {}", path.display());
            assert!(
                !path.components().any(|c| c == std::path::Component::ParentDir),
                "{uri} kept a parent component"
            );
        }
    }

    #[test]
    fn percent_decoding() {
        let root = Path::new("/mirror");
        let path = map_uri_to_path(root, "rsync://host/my%20file.cer").unwrap();
        assert_eq!(path, Path::new("/mirror/host/my file.cer"));
    }

    #[test]
    fn empty_uri_rejected() {
        let root = Path::new("/mirror");
        assert!(matches!(
            map_uri_to_path(root, "rsync://"),
            Err(MirrorError::InvalidUri(_))
        ));
        assert!(matches!(
            map_uri_to_path(root, "rsync://../.."),
            Err(MirrorError::InvalidUri(_))
        ));
    }

    #[test]
    fn name_too_long() {
        let uri = format!("rsync://host/{}.cer", "n".repeat(MAX_NAME_LEN));
        assert!(matches!(
            map_uri_to_path(Path::new("/mirror"), &uri),
            Err(MirrorError::NameTooLong { .. })
        ));
    }

    #[test]
    fn path_too_long() {
        let segment = "d".repeat(200);
        let uri = format!("rsync://host/{}", vec![segment; 25].join("/"));
        assert!(matches!(
            map_uri_to_path(Path::new("/mirror"), &uri),
            Err(MirrorError::PathTooLong { .. })
        ));
    }
}
