//! Agent runtime orchestration.

use crate::config::AgentConfig;
use crate::persistence::SqliteStore;
use anyhow::{Context, Result};
use rrdp_sync_core::{Fetcher, SyncOrchestrator, SyncOutcome};
use rrdp_sync_transport::HttpFetcher;
use std::sync::Arc;

/// The main agent runtime.
pub struct Agent {
    config: AgentConfig,
    orchestrator: SyncOrchestrator,
    store: SqliteStore,
}

impl Agent {
    /// Create a new agent fetching over HTTP.
    ///
    /// # Errors
    ///
    /// Returns error if the transport, database or mirror root cannot be set up.
    pub fn new(config: AgentConfig) -> Result<Self> {
        let fetcher =
            HttpFetcher::new(config.transport.clone()).context("Failed to create HTTP fetcher")?;
        let store = SqliteStore::open(&config.db_path).context("Failed to open SQLite database")?;

        Self::with_fetcher(config, Arc::new(fetcher), store)
    }

    /// Create an agent using `fetcher` and `store`.
    ///
    /// # Errors
    ///
    /// Returns error if the mirror root cannot be created.
    pub fn with_fetcher(
        config: AgentConfig,
        fetcher: Arc<dyn Fetcher>,
        store: SqliteStore,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.mirror_root).with_context(|| {
            format!(
                "Failed to create mirror root {}",
                config.mirror_root.display()
            )
        })?;

        let orchestrator = SyncOrchestrator::new(fetcher).with_integrity(config.integrity);

        Ok(Self {
            config,
            orchestrator,
            store,
        })
    }

    /// Run sync passes every interval until Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns error if the shutdown signal cannot be installed.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(
            repositories = self.config.repositories.len(),
            root = %self.config.mirror_root.display(),
            interval_secs = self.config.sync_interval.as_secs(),
            "Starting agent runtime"
        );

        if self.config.repositories.is_empty() {
            tracing::warn!("No repositories configured; set RRDP_REPOSITORIES");
        }

        let mut interval = tokio::time::interval(self.config.sync_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!("Agent running, press Ctrl+C to stop");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let failed = self.sync_all().await;
                    if failed > 0 {
                        tracing::warn!(failed, "Sync pass finished with failures");
                    }
                }

                signal = tokio::signal::ctrl_c() => {
                    signal.context("Failed to listen for shutdown signal")?;
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        tracing::info!("Agent stopped");
        Ok(())
    }

    /// Sync every configured repository once, returning how many failed.
    pub async fn sync_all(&mut self) -> usize {
        let repositories = self.config.repositories.clone();
        let mut failed = 0;

        for url in &repositories {
            if let Err(e) = self.sync_repository(url).await {
                let message = format!("{e:#}");
                tracing::error!(url, error = %message, "Repository sync failed");
                failed += 1;
            }
        }

        failed
    }

    /// Run one pass for `url`, then record its changes and new state.
    ///
    /// State is only saved after a successful pass. The records a failed
    /// pass already wrote are still logged, without a serial.
    ///
    /// # Errors
    ///
    /// Returns error if the pass fails or the database cannot be updated.
    pub async fn sync_repository(&mut self, url: &str) -> Result<SyncOutcome> {
        let previous = self
            .store
            .load_state(url)
            .context("Failed to load repository state")?;

        match self
            .orchestrator
            .sync(url, &self.config.mirror_root, previous.as_ref())
            .await
        {
            Ok(outcome) => {
                self.store
                    .append_changes(url, Some(outcome.serial), &outcome.records)
                    .context("Failed to append change log")?;
                self.store
                    .save_state(url, &outcome.state())
                    .context("Failed to save repository state")?;
                Ok(outcome)
            }
            Err(failure) => {
                if !failure.applied().is_empty() {
                    if let Err(e) = self.store.append_changes(url, None, failure.applied()) {
                        tracing::warn!(url, error = %e, "Failed to log partial changes");
                    }
                }
                Err(anyhow::Error::new(failure).context(format!("Sync of {url} failed")))
            }
        }
    }

    #[cfg(test)]
    fn store(&self) -> &SqliteStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rrdp_sync_core::{sha256_hex, RepositoryState, StaticFetcher, SyncMethod, SyncType};
    use rrdp_sync_proto::encode_payload;

    const URL: &str = "https://rrdp.example.net/notification.xml";
    const SNAPSHOT_URL: &str = "https://rrdp.example.net/1/snapshot.xml";
    const DELTA_URL: &str = "https://rrdp.example.net/2/delta.xml";

    fn snapshot_xml() -> String {
        format!(
            r#"<snapshot xmlns="http://www.ripe.net/rpki/rrdp" version="1" session_id="abc" serial="1">
  <publish uri="rsync://rpki.example.net/repo/a.cer">{}</publish>
  <publish uri="rsync://rpki.example.net/repo/b.roa">{}</publish>
</snapshot>"#,
            encode_payload(b"a1"),
            encode_payload(b"b1")
        )
    }

    fn delta_xml() -> String {
        format!(
            r#"<delta xmlns="http://www.ripe.net/rpki/rrdp" version="1" session_id="abc" serial="2">
  <withdraw uri="rsync://rpki.example.net/repo/b.roa" hash="{}"/>
  <publish uri="rsync://rpki.example.net/repo/a.cer">{}</publish>
</delta>"#,
            sha256_hex(b"b1"),
            encode_payload(b"a2")
        )
    }

    fn notification_xml(serial: u64, deltas: &[(u64, &str, &str)]) -> String {
        let mut xml = format!(
            r#"<notification xmlns="http://www.ripe.net/rpki/rrdp" version="1" session_id="abc" serial="{serial}">
  <snapshot uri="{SNAPSHOT_URL}" hash="{}"/>
"#,
            sha256_hex(snapshot_xml().as_bytes())
        );
        for (delta_serial, uri, body) in deltas {
            xml.push_str(&format!(
                "  <delta serial=\"{delta_serial}\" uri=\"{uri}\" hash=\"{}\"/>\n",
                sha256_hex(body.as_bytes())
            ));
        }
        xml.push_str("</notification>");
        xml
    }

    fn agent(root: &std::path::Path, fetcher: Arc<StaticFetcher>) -> Agent {
        let config = AgentConfig {
            repositories: vec![URL.to_string()],
            mirror_root: root.to_path_buf(),
            ..Default::default()
        };
        Agent::with_fetcher(config, fetcher, SqliteStore::in_memory().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn snapshot_then_delta_pass() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.insert(URL, notification_xml(1, &[]));
        fetcher.insert(SNAPSHOT_URL, snapshot_xml());
        let mut agent = agent(dir.path(), fetcher.clone());

        let first = agent.sync_repository(URL).await.unwrap();
        assert_eq!(first.method, SyncMethod::Snapshot);
        assert_eq!(
            agent.store().load_state(URL).unwrap(),
            Some(RepositoryState {
                session_id: "abc".to_string(),
                serial: 1
            })
        );

        let delta = delta_xml();
        fetcher.insert(DELTA_URL, delta.clone());
        fetcher.insert(URL, notification_xml(2, &[(2, DELTA_URL, delta.as_str())]));

        let second = agent.sync_repository(URL).await.unwrap();
        assert_eq!(second.method, SyncMethod::Deltas);
        assert_eq!(agent.store().load_state(URL).unwrap().unwrap().serial, 2);

        let objects = dir.path().join("rpki.example.net/repo");
        assert_eq!(std::fs::read(objects.join("a.cer")).unwrap(), b"a2");
        assert!(!objects.join("b.roa").exists());

        let log = agent.store().changes_for(URL).unwrap();
        let types: Vec<(Option<u64>, SyncType)> =
            log.iter().map(|c| (c.serial, c.record.sync_type)).collect();
        assert_eq!(
            types,
            vec![
                (Some(1), SyncType::Add),
                (Some(1), SyncType::Add),
                (Some(2), SyncType::Del),
                (Some(2), SyncType::Update),
            ]
        );
    }

    #[tokio::test]
    async fn failed_pass_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.insert(URL, notification_xml(1, &[]));
        fetcher.insert(SNAPSHOT_URL, snapshot_xml());
        let mut agent = agent(dir.path(), fetcher.clone());
        agent.sync_repository(URL).await.unwrap();

        fetcher.insert(URL, b"<notification".to_vec());
        assert_eq!(agent.sync_all().await, 1);

        assert_eq!(agent.store().load_state(URL).unwrap().unwrap().serial, 1);
        assert_eq!(agent.store().changes_for(URL).unwrap().len(), 2);
    }
}
