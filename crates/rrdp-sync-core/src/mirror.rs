//! Applying snapshots and deltas to the local mirror.
//!
//! # Delta folding
//!
//! Deltas arrive ascending by serial but are folded newest first. The first
//! time a path is seen decides its final state; older operations on the same
//! path are skipped, so every path is touched at most once per batch. Within
//! one delta a withdraw and a publish of the same path net out as the publish.
//!
//! Every URI of the batch is mapped and length-checked before the first
//! filesystem call. Deletions are then performed before writes, and the
//! change records come back in that same order.

use crate::error::{MirrorError, PartialApply};
use crate::model::{Delta, MirrorChangeRecord, Snapshot, SyncType};
use crate::uri::map_uri_to_path;
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Writes RRDP objects into a directory tree.
///
/// The writer is stateless; the mirror root is passed to every call. It
/// assumes it is the only writer under that root for the duration of a call.
#[derive(Debug, Clone, Copy, Default)]
pub struct MirrorWriter;

struct Step<'a> {
    path: PathBuf,
    payload: Option<&'a [u8]>,
    source_uri: &'a str,
}

impl MirrorWriter {
    /// Create a writer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Write every object of `snapshot` under `root`.
    ///
    /// Existing files are overwritten, so applying the same snapshot again
    /// yields the same tree. Files not in the snapshot are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`PartialApply`] with the records written so far when a URI
    /// cannot be mapped (nothing is written in that case) or a write fails.
    pub fn apply_snapshot(
        &self,
        snapshot: &Snapshot,
        root: &Path,
    ) -> Result<Vec<MirrorChangeRecord>, PartialApply> {
        let steps = snapshot
            .publishes
            .iter()
            .map(|publish| {
                Ok(Step {
                    path: map_uri_to_path(root, &publish.uri)?,
                    payload: Some(publish.payload.as_slice()),
                    source_uri: &snapshot.source_uri,
                })
            })
            .collect::<Result<Vec<_>, MirrorError>>()
            .map_err(|error| PartialApply {
                applied: Vec::new(),
                error,
            })?;

        let records = execute(&steps, root, SyncType::Add)?;

        tracing::info!(
            serial = snapshot.serial,
            root = %root.display(),
            written = records.len(),
            "Snapshot applied"
        );

        Ok(records)
    }

    /// Apply `deltas` (ascending by serial) under `root`.
    ///
    /// # Errors
    ///
    /// Returns [`PartialApply`] with the records applied so far when a URI
    /// cannot be mapped (nothing is touched in that case) or a filesystem
    /// call fails.
    pub fn apply_deltas(
        &self,
        deltas: &[Delta],
        root: &Path,
    ) -> Result<Vec<MirrorChangeRecord>, PartialApply> {
        let (withdraws, publishes) = plan_deltas(deltas, root).map_err(|error| PartialApply {
            applied: Vec::new(),
            error,
        })?;

        let mut records = execute(&withdraws, root, SyncType::Del)?;
        match execute(&publishes, root, SyncType::Update) {
            Ok(written) => records.extend(written),
            Err(mut partial) => {
                records.append(&mut partial.applied);
                return Err(PartialApply {
                    applied: records,
                    error: partial.error,
                });
            }
        }

        tracing::info!(
            deltas = deltas.len(),
            first_serial = deltas.first().map(|d| d.serial),
            last_serial = deltas.last().map(|d| d.serial),
            root = %root.display(),
            withdrawn = withdraws.len(),
            written = publishes.len(),
            "Deltas applied"
        );

        Ok(records)
    }
}

/// Fold `deltas` newest first into withdraw and publish steps.
fn plan_deltas<'a>(
    deltas: &'a [Delta],
    root: &Path,
) -> Result<(Vec<Step<'a>>, Vec<Step<'a>>), MirrorError> {
    let mut seen = HashSet::new();
    let mut withdraws = Vec::new();
    let mut publishes = Vec::new();

    for delta in deltas.iter().rev() {
        let mut published_here = HashSet::new();
        let mut publish_paths = Vec::with_capacity(delta.publishes.len());
        for publish in &delta.publishes {
            let path = map_uri_to_path(root, &publish.uri)?;
            published_here.insert(path.clone());
            publish_paths.push(path);
        }

        for withdraw in &delta.withdraws {
            let path = map_uri_to_path(root, &withdraw.uri)?;
            if published_here.contains(&path) || !seen.insert(path.clone()) {
                tracing::debug!(uri = %withdraw.uri, serial = delta.serial, "Withdraw superseded");
                continue;
            }
            withdraws.push(Step {
                path,
                payload: None,
                source_uri: &delta.source_uri,
            });
        }

        for (publish, path) in delta.publishes.iter().zip(publish_paths) {
            if !seen.insert(path.clone()) {
                tracing::debug!(uri = %publish.uri, serial = delta.serial, "Publish superseded");
                continue;
            }
            publishes.push(Step {
                path,
                payload: Some(publish.payload.as_slice()),
                source_uri: &delta.source_uri,
            });
        }
    }

    Ok((withdraws, publishes))
}

fn execute(
    steps: &[Step<'_>],
    root: &Path,
    sync_type: SyncType,
) -> Result<Vec<MirrorChangeRecord>, PartialApply> {
    let mut applied = Vec::with_capacity(steps.len());

    for step in steps {
        let result = match step.payload {
            Some(payload) => write_object(&step.path, payload),
            None => remove_object(&step.path, root),
        };
        if let Err(error) = result {
            tracing::error!(path = %step.path.display(), error = %error, "Mirror update failed");
            return Err(PartialApply { applied, error });
        }
        applied.push(record(&step.path, sync_type, step.source_uri));
    }

    Ok(applied)
}

fn write_object(path: &Path, payload: &[u8]) -> Result<(), MirrorError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| MirrorError::io(parent, &e))?;
    }
    fs::write(path, payload).map_err(|e| MirrorError::io(path, &e))
}

fn remove_object(path: &Path, root: &Path) -> Result<(), MirrorError> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "Withdrawn file already absent");
        }
        Err(e) => return Err(MirrorError::io(path, &e)),
    }

    if let Some(parent) = path.parent() {
        remove_dir_if_empty(parent, root);
    }
    Ok(())
}

/// Remove `dir` if it has no entries left. Never removes `root` itself.
fn remove_dir_if_empty(dir: &Path, root: &Path) {
    if dir == root || !dir.starts_with(root) {
        return;
    }

    let is_empty = match fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => return,
    };

    if is_empty {
        if let Err(e) = fs::remove_dir(dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove empty directory");
        }
    }
}

fn record(path: &Path, sync_type: SyncType, source_uri: &str) -> MirrorChangeRecord {
    MirrorChangeRecord {
        file_path: path.parent().map(Path::to_path_buf).unwrap_or_default(),
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        sync_type,
        source_uri: source_uri.to_string(),
    }
}
