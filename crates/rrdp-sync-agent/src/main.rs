//! # RRDP Sync Agent
//!
//! Keeps local mirrors of RRDP repositories up to date.
//!
//! Every interval the agent runs one sync pass per configured repository:
//! 1. **Plan**: load the last `(session, serial)` from `SQLite` and fetch the notification
//! 2. **Sync**: apply deltas when the chain is complete, otherwise the snapshot
//! 3. **Record**: append the change records and store the new state

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod persistence;
mod runtime;

pub use config::AgentConfig;
pub use runtime::Agent;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting RRDP Sync Agent");

    let config = AgentConfig::from_env()?;

    tracing::info!(
        repositories = ?config.repositories,
        db_path = %config.db_path.display(),
        strict_hash = matches!(config.integrity, rrdp_sync_core::IntegrityMode::Strict),
        "Agent configured"
    );

    let agent = Agent::new(config)?;

    agent.run().await?;

    Ok(())
}
