//! One synchronization pass for a repository.
//!
//! A pass walks `Start → Notified → {Snapshotting | DeltaFetching} → Applied
//! → Done`, with `Failed` absorbing. The states visited are returned with the
//! outcome, or with the error when the pass fails.
//!
//! A delta attempt that fails while fetching, parsing or validating falls
//! back to the snapshot once. Notification, snapshot and mirror errors end
//! the pass.

use crate::delta::DeltaClient;
use crate::error::{PartialApply, SyncError};
use crate::fetch::Fetcher;
use crate::hash::IntegrityMode;
use crate::mirror::MirrorWriter;
use crate::model::{MirrorChangeRecord, Notification};
use crate::notification::NotificationClient;
use crate::snapshot::SnapshotClient;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Position of a pass in the sync state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Nothing fetched yet
    Start,
    /// Notification fetched and validated
    Notified,
    /// Fetching and applying the snapshot
    Snapshotting,
    /// Fetching deltas
    DeltaFetching,
    /// Changes written to the mirror
    Applied,
    /// Pass finished
    Done,
    /// Pass aborted
    Failed,
}

impl SyncState {
    /// Lowercase name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Notified => "notified",
            Self::Snapshotting => "snapshotting",
            Self::DeltaFetching => "delta_fetching",
            Self::Applied => "applied",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the mirror was brought up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMethod {
    /// Full snapshot applied
    Snapshot,
    /// Deltas applied
    Deltas,
    /// Already at the repository serial
    UpToDate,
}

/// What a previous pass left the mirror at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryState {
    /// Session id of the repository
    pub session_id: String,
    /// Last applied serial
    pub serial: u64,
}

/// Result of a successful pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    /// Session id now mirrored
    pub session_id: String,
    /// Serial now mirrored
    pub serial: u64,
    /// How the mirror was updated
    pub method: SyncMethod,
    /// Changes made, deletions first
    pub records: Vec<MirrorChangeRecord>,
    /// States visited
    pub trace: Vec<SyncState>,
    /// Whether a failed delta attempt was replaced by the snapshot
    pub fell_back: bool,
}

impl SyncOutcome {
    /// State to pass to the next call of [`SyncOrchestrator::sync`].
    #[must_use]
    pub fn state(&self) -> RepositoryState {
        RepositoryState {
            session_id: self.session_id.clone(),
            serial: self.serial,
        }
    }
}

/// A failed pass.
#[derive(Debug, Clone, thiserror::Error)]
#[error("sync failed: {error}")]
pub struct SyncFailure {
    /// States visited, ending in [`SyncState::Failed`]
    pub trace: Vec<SyncState>,
    /// What went wrong
    #[source]
    pub error: SyncError,
}

impl SyncFailure {
    /// Records written to the mirror before the failure.
    #[must_use]
    pub fn applied(&self) -> &[MirrorChangeRecord] {
        match &self.error {
            SyncError::Apply(PartialApply { applied, .. }) => applied.as_slice(),
            _ => &[],
        }
    }

    /// The state the pass was in when it failed.
    #[must_use]
    pub fn failed_in(&self) -> SyncState {
        self.trace
            .iter()
            .rev()
            .copied()
            .find(|s| *s != SyncState::Failed)
            .unwrap_or(SyncState::Start)
    }
}

enum Plan {
    UpToDate,
    Snapshot(&'static str),
    Deltas { after: u64 },
}

struct Applied {
    session_id: String,
    serial: u64,
    method: SyncMethod,
    records: Vec<MirrorChangeRecord>,
    fell_back: bool,
}

/// Runs sync passes against one mirror root at a time.
#[derive(Clone)]
pub struct SyncOrchestrator {
    notifications: NotificationClient,
    snapshots: SnapshotClient,
    deltas: DeltaClient,
    writer: MirrorWriter,
}

impl SyncOrchestrator {
    /// Create an orchestrator fetching through `fetcher` in permissive mode.
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            notifications: NotificationClient::new(Arc::clone(&fetcher)),
            snapshots: SnapshotClient::new(Arc::clone(&fetcher)),
            deltas: DeltaClient::new(fetcher),
            writer: MirrorWriter::new(),
        }
    }

    /// Set how snapshot and delta hash mismatches are handled.
    #[must_use]
    pub fn with_integrity(mut self, integrity: IntegrityMode) -> Self {
        self.snapshots = self.snapshots.with_integrity(integrity);
        self.deltas = self.deltas.with_integrity(integrity);
        self
    }

    /// Bound the number of concurrent delta fetches.
    #[must_use]
    pub fn with_delta_concurrency(mut self, concurrency: usize) -> Self {
        self.deltas = self.deltas.with_concurrency(concurrency);
        self
    }

    /// Bring the mirror under `root` up to date with the repository behind
    /// `notification_url`.
    ///
    /// `previous` is what the last successful pass returned through
    /// [`SyncOutcome::state`]; `None` forces a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SyncFailure`] with the visited states when the notification
    /// or snapshot cannot be used, or the mirror cannot be written.
    pub async fn sync(
        &self,
        notification_url: &str,
        root: &Path,
        previous: Option<&RepositoryState>,
    ) -> Result<SyncOutcome, SyncFailure> {
        let mut trace = vec![SyncState::Start];

        match self.run(notification_url, root, previous, &mut trace).await {
            Ok(applied) => {
                trace.push(SyncState::Done);
                tracing::info!(
                    url = notification_url,
                    session_id = %applied.session_id,
                    serial = applied.serial,
                    method = ?applied.method,
                    changes = applied.records.len(),
                    fell_back = applied.fell_back,
                    "Sync complete"
                );
                Ok(SyncOutcome {
                    session_id: applied.session_id,
                    serial: applied.serial,
                    method: applied.method,
                    records: applied.records,
                    trace,
                    fell_back: applied.fell_back,
                })
            }
            Err(error) => {
                let state = trace.last().copied().unwrap_or(SyncState::Start);
                trace.push(SyncState::Failed);
                tracing::error!(url = notification_url, state = %state, error = %error, "Sync failed");
                Err(SyncFailure { trace, error })
            }
        }
    }

    async fn run(
        &self,
        url: &str,
        root: &Path,
        previous: Option<&RepositoryState>,
        trace: &mut Vec<SyncState>,
    ) -> Result<Applied, SyncError> {
        let n = self.notifications.fetch(url).await?;
        trace.push(SyncState::Notified);

        match plan(&n, previous) {
            Plan::UpToDate => {
                tracing::debug!(url, serial = n.serial, "Mirror already up to date");
                Ok(Applied {
                    session_id: n.session_id,
                    serial: n.serial,
                    method: SyncMethod::UpToDate,
                    records: Vec::new(),
                    fell_back: false,
                })
            }
            Plan::Snapshot(reason) => {
                tracing::info!(url, reason, serial = n.serial, "Syncing from snapshot");
                self.snapshot_pass(&n, root, trace, false).await
            }
            Plan::Deltas { after } => {
                trace.push(SyncState::DeltaFetching);
                tracing::info!(url, from = after, to = n.max_serial, "Syncing from deltas");

                let deltas = match self.deltas.fetch_all(&n, after).await {
                    Ok(deltas) => deltas,
                    Err(e) => {
                        tracing::warn!(url, error = %e, "Delta sync failed, falling back to snapshot");
                        return self.snapshot_pass(&n, root, trace, true).await;
                    }
                };

                let records = self.writer.apply_deltas(&deltas, root)?;
                trace.push(SyncState::Applied);

                Ok(Applied {
                    serial: deltas.last().map_or(n.serial, |d| d.serial),
                    session_id: n.session_id,
                    method: SyncMethod::Deltas,
                    records,
                    fell_back: false,
                })
            }
        }
    }

    async fn snapshot_pass(
        &self,
        n: &Notification,
        root: &Path,
        trace: &mut Vec<SyncState>,
        fell_back: bool,
    ) -> Result<Applied, SyncError> {
        trace.push(SyncState::Snapshotting);

        let snapshot = self.snapshots.fetch(&n.snapshot.uri).await?;
        self.snapshots.validate(&snapshot, n)?;
        let records = self.writer.apply_snapshot(&snapshot, root)?;
        trace.push(SyncState::Applied);

        Ok(Applied {
            session_id: snapshot.session_id,
            serial: snapshot.serial,
            method: SyncMethod::Snapshot,
            records,
            fell_back,
        })
    }
}

fn plan(n: &Notification, previous: Option<&RepositoryState>) -> Plan {
    let Some(prev) = previous else {
        return Plan::Snapshot("no previous state");
    };

    if prev.session_id != n.session_id {
        return Plan::Snapshot("session changed");
    }
    if prev.serial == n.serial {
        return Plan::UpToDate;
    }
    if prev.serial > n.serial {
        return Plan::Snapshot("local serial ahead of repository");
    }
    if n.deltas.is_empty() || prev.serial.saturating_add(1) < n.min_serial {
        return Plan::Snapshot("deltas do not reach local serial");
    }
    if !n.covers_serials_after(prev.serial) {
        return Plan::Snapshot("delta chain incomplete");
    }

    Plan::Deltas { after: prev.serial }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::StaticFetcher;
    use crate::fixtures::{delta_url, delta_xml, snapshot_url, Repository, NOTIFICATION_URL};
    use crate::model::SyncType;
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;

    fn state(session: &str, serial: u64) -> RepositoryState {
        RepositoryState {
            session_id: session.to_string(),
            serial,
        }
    }

    fn object_path(root: &Path, name: &str) -> PathBuf {
        root.join("rpki.example.net/repo").join(name)
    }

    /// Session "abc" at serial 3 with deltas 1..=3. Delta 2 withdraws
    /// `a.cer`, delta 3 publishes it again.
    fn three_deltas() -> Repository<'static> {
        Repository {
            session: "abc",
            serial: 3,
            objects: vec![("a.cer", b"a3".as_slice()), ("b.roa", b"b1".as_slice())],
            deltas: vec![
                (1, delta_xml("abc", 1, &[("a.cer", b"a1".as_slice()), ("b.roa", b"b1".as_slice())], &[])),
                (2, delta_xml("abc", 2, &[], &["a.cer"])),
                (3, delta_xml("abc", 3, &[("a.cer", b"a3".as_slice())], &[])),
            ],
        }
    }

    fn orchestrator(fetcher: &Arc<StaticFetcher>) -> SyncOrchestrator {
        SyncOrchestrator::new(fetcher.clone())
    }

    #[tokio::test]
    async fn deltas_applied_from_last_serial() {
        let fetcher = Arc::new(StaticFetcher::new());
        three_deltas().serve(&fetcher);
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(object_path(dir.path(), "")).unwrap();
        fs::write(object_path(dir.path(), "a.cer"), b"a1").unwrap();

        let outcome = orchestrator(&fetcher)
            .sync(NOTIFICATION_URL, dir.path(), Some(&state("abc", 1)))
            .await
            .unwrap();

        assert_eq!(outcome.method, SyncMethod::Deltas);
        assert_eq!(outcome.serial, 3);
        assert!(!outcome.fell_back);
        assert_eq!(
            outcome.trace,
            vec![
                SyncState::Start,
                SyncState::Notified,
                SyncState::DeltaFetching,
                SyncState::Applied,
                SyncState::Done,
            ]
        );

        let requested = fetcher.requested();
        assert!(requested.contains(&delta_url(2)));
        assert!(requested.contains(&delta_url(3)));
        assert!(!requested.contains(&delta_url(1)));
        assert!(!requested.contains(&snapshot_url(3)));

        assert_eq!(fs::read(object_path(dir.path(), "a.cer")).unwrap(), b"a3");
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].sync_type, SyncType::Update);
        assert_eq!(outcome.state(), state("abc", 3));
    }

    #[tokio::test]
    async fn gap_before_min_serial_goes_straight_to_snapshot() {
        let fetcher = Arc::new(StaticFetcher::new());
        Repository {
            session: "abc",
            serial: 6,
            objects: vec![("a.cer", b"a".as_slice())],
            deltas: vec![
                (5, delta_xml("abc", 5, &[("a.cer", b"a".as_slice())], &[])),
                (6, delta_xml("abc", 6, &[], &["z.cer"])),
            ],
        }
        .serve(&fetcher);
        let dir = tempfile::tempdir().unwrap();

        let outcome = orchestrator(&fetcher)
            .sync(NOTIFICATION_URL, dir.path(), Some(&state("abc", 0)))
            .await
            .unwrap();

        assert_eq!(outcome.method, SyncMethod::Snapshot);
        assert!(!outcome.fell_back);
        assert_eq!(outcome.serial, 6);
        assert!(fetcher
            .requested()
            .iter()
            .all(|url| !url.ends_with("delta.xml")));
        assert!(object_path(dir.path(), "a.cer").exists());
    }

    #[tokio::test]
    async fn failed_delta_falls_back_to_snapshot() {
        let fetcher = Arc::new(StaticFetcher::new());
        three_deltas().serve(&fetcher);
        fetcher.fail(delta_url(3), "connection reset", Duration::from_millis(5));
        let dir = tempfile::tempdir().unwrap();

        let outcome = orchestrator(&fetcher)
            .sync(NOTIFICATION_URL, dir.path(), Some(&state("abc", 1)))
            .await
            .unwrap();

        assert_eq!(outcome.method, SyncMethod::Snapshot);
        assert!(outcome.fell_back);
        assert_eq!(
            outcome.trace,
            vec![
                SyncState::Start,
                SyncState::Notified,
                SyncState::DeltaFetching,
                SyncState::Snapshotting,
                SyncState::Applied,
                SyncState::Done,
            ]
        );
        assert!(outcome.records.iter().all(|r| r.sync_type == SyncType::Add));
        assert_eq!(fs::read(object_path(dir.path(), "b.roa")).unwrap(), b"b1");
    }

    #[tokio::test]
    async fn up_to_date_touches_nothing() {
        let fetcher = Arc::new(StaticFetcher::new());
        three_deltas().serve(&fetcher);
        let dir = tempfile::tempdir().unwrap();

        let outcome = orchestrator(&fetcher)
            .sync(NOTIFICATION_URL, dir.path(), Some(&state("abc", 3)))
            .await
            .unwrap();

        assert_eq!(outcome.method, SyncMethod::UpToDate);
        assert!(outcome.records.is_empty());
        assert_eq!(
            outcome.trace,
            vec![SyncState::Start, SyncState::Notified, SyncState::Done]
        );
        assert_eq!(fetcher.requested(), vec![NOTIFICATION_URL.to_string()]);
    }

    #[tokio::test]
    async fn session_change_forces_snapshot() {
        let fetcher = Arc::new(StaticFetcher::new());
        three_deltas().serve(&fetcher);
        let dir = tempfile::tempdir().unwrap();

        let outcome = orchestrator(&fetcher)
            .sync(NOTIFICATION_URL, dir.path(), Some(&state("old-session", 2)))
            .await
            .unwrap();

        assert_eq!(outcome.method, SyncMethod::Snapshot);
        assert_eq!(outcome.state(), state("abc", 3));
    }

    #[tokio::test]
    async fn local_serial_ahead_forces_snapshot() {
        let fetcher = Arc::new(StaticFetcher::new());
        three_deltas().serve(&fetcher);
        let dir = tempfile::tempdir().unwrap();

        let outcome = orchestrator(&fetcher)
            .sync(NOTIFICATION_URL, dir.path(), Some(&state("abc", 9)))
            .await
            .unwrap();

        assert_eq!(outcome.method, SyncMethod::Snapshot);
    }

    #[tokio::test]
    async fn notification_failure_is_fatal() {
        let fetcher = Arc::new(StaticFetcher::new());
        let dir = tempfile::tempdir().unwrap();

        let failure = orchestrator(&fetcher)
            .sync(NOTIFICATION_URL, dir.path(), None)
            .await
            .unwrap_err();

        assert_eq!(failure.trace, vec![SyncState::Start, SyncState::Failed]);
        assert_eq!(failure.failed_in(), SyncState::Start);
        assert!(matches!(failure.error, SyncError::Fetch(_)));
        assert!(failure.applied().is_empty());
    }

    #[tokio::test]
    async fn mirror_failure_reports_applied_records() {
        let fetcher = Arc::new(StaticFetcher::new());
        Repository {
            session: "abc",
            serial: 1,
            objects: vec![("a.cer", b"a".as_slice()), ("blocker/b.cer", b"b".as_slice())],
            deltas: Vec::new(),
        }
        .serve(&fetcher);
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(object_path(dir.path(), "")).unwrap();
        fs::write(object_path(dir.path(), "blocker"), b"file").unwrap();

        let failure = orchestrator(&fetcher)
            .sync(NOTIFICATION_URL, dir.path(), None)
            .await
            .unwrap_err();

        assert_eq!(failure.failed_in(), SyncState::Snapshotting);
        assert_eq!(failure.applied().len(), 1);
        assert_eq!(failure.applied()[0].file_name, "a.cer");
    }

    #[tokio::test]
    async fn outcome_serializes_for_reporting() {
        let fetcher = Arc::new(StaticFetcher::new());
        three_deltas().serve(&fetcher);
        let dir = tempfile::tempdir().unwrap();

        let outcome = orchestrator(&fetcher)
            .sync(NOTIFICATION_URL, dir.path(), None)
            .await
            .unwrap();
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["method"], "snapshot");
        assert_eq!(json["serial"], 3);
        assert_eq!(json["trace"][2], "snapshotting");
        assert_eq!(json["records"][0]["sync_type"], "add");
    }
}
