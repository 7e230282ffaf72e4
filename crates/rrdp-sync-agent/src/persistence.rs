//! `SQLite` persistence layer.

use rrdp_sync_core::{MirrorChangeRecord, RepositoryState, SyncType};
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use std::path::{Path, PathBuf};

/// A change log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedChange {
    /// Serial the pass reached, `None` for a failed pass
    pub serial: Option<u64>,
    /// The mirror change
    pub record: MirrorChangeRecord,
}

/// `SQLite`-backed sync state and change log.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create a `SQLite` database.
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be opened or initialized.
    pub fn open(path: &Path) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be created.
    #[cfg(test)]
    pub fn in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> SqliteResult<()> {
        self.conn.execute_batch(
            r"
            -- Last successfully applied (session, serial) per repository
            CREATE TABLE IF NOT EXISTS repo_state (
                notification_url TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                serial INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Every mirror mutation, including those of failed passes
            CREATE TABLE IF NOT EXISTS change_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                notification_url TEXT NOT NULL,
                serial INTEGER,
                file_path TEXT NOT NULL,
                file_name TEXT NOT NULL,
                sync_type TEXT NOT NULL,
                source_uri TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_change_log_url ON change_log(notification_url);
            ",
        )?;

        Ok(())
    }

    /// State left by the last successful pass for `notification_url`.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub fn load_state(&self, notification_url: &str) -> SqliteResult<Option<RepositoryState>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT session_id, serial FROM repo_state
            WHERE notification_url = ?1
            ",
        )?;

        let state = stmt
            .query_row([notification_url], |row| {
                Ok(RepositoryState {
                    session_id: row.get(0)?,
                    serial: from_i64(row.get(1)?)?,
                })
            })
            .optional()?;

        Ok(state)
    }

    /// Record the state reached by a successful pass.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails.
    pub fn save_state(&self, notification_url: &str, state: &RepositoryState) -> SqliteResult<()> {
        self.conn.execute(
            r"
            INSERT OR REPLACE INTO repo_state (notification_url, session_id, serial, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ",
            (
                notification_url,
                &state.session_id,
                to_i64(state.serial)?,
                to_i64(now_secs())?,
            ),
        )?;

        Ok(())
    }

    /// Append `records` to the change log in one transaction.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails.
    pub fn append_changes(
        &mut self,
        notification_url: &str,
        serial: Option<u64>,
        records: &[MirrorChangeRecord],
    ) -> SqliteResult<usize> {
        let serial = serial.map(to_i64).transpose()?;
        let now = to_i64(now_secs())?;

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r"
                INSERT INTO change_log
                    (notification_url, serial, file_path, file_name, sync_type, source_uri, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ",
            )?;
            for record in records {
                stmt.execute((
                    notification_url,
                    serial,
                    record.file_path.to_string_lossy().into_owned(),
                    &record.file_name,
                    record.sync_type.as_str(),
                    &record.source_uri,
                    now,
                ))?;
            }
        }
        tx.commit()?;

        Ok(records.len())
    }

    /// Logged changes for `notification_url`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails or a row holds an unknown sync type.
    #[allow(dead_code)]
    pub fn changes_for(&self, notification_url: &str) -> SqliteResult<Vec<LoggedChange>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT serial, file_path, file_name, sync_type, source_uri FROM change_log
            WHERE notification_url = ?1
            ORDER BY id ASC
            ",
        )?;

        let changes = stmt
            .query_map([notification_url], |row| {
                let serial: Option<i64> = row.get(0)?;
                let file_path: String = row.get(1)?;
                let sync_type: String = row.get(3)?;
                Ok(LoggedChange {
                    serial: serial.map(from_i64).transpose()?,
                    record: MirrorChangeRecord {
                        file_path: PathBuf::from(file_path),
                        file_name: row.get(2)?,
                        sync_type: SyncType::parse(&sync_type).ok_or_else(|| {
                            rusqlite::Error::FromSqlConversionFailure(
                                3,
                                rusqlite::types::Type::Text,
                                format!("unknown sync type {sync_type:?}").into(),
                            )
                        })?,
                        source_uri: row.get(4)?,
                    },
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(changes)
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn to_i64(value: u64) -> SqliteResult<i64> {
    i64::try_from(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn from_i64(value: i64) -> SqliteResult<u64> {
    u64::try_from(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Integer, Box::new(e))
    })
}
