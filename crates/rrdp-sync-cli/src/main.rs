//! # RRDP Sync CLI
//!
//! Command-line utilities for syncing and inspecting RRDP repositories.

use anyhow::{bail, Context, Result};
use rrdp_sync_core::{sha256_hex, NotificationClient, RepositoryState, SyncOrchestrator};
use rrdp_sync_transport::{HttpFetcher, TransportOptions};
use std::env;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "sync" => {
            if args.len() != 4 && args.len() != 6 {
                eprintln!("Usage: rrdp-sync sync <notification-url> <root> [<session-id> <serial>]");
                std::process::exit(1);
            }
            let previous = previous_state(&args[4..])?;
            sync(&args[2], Path::new(&args[3]), previous.as_ref()).await?;
        }
        "notification" => {
            if args.len() < 3 {
                eprintln!("Usage: rrdp-sync notification <url>");
                std::process::exit(1);
            }
            notification(&args[2]).await?;
        }
        "hash" => {
            if args.len() < 3 {
                eprintln!("Usage: rrdp-sync hash <file>");
                std::process::exit(1);
            }
            let bytes = std::fs::read(&args[2])
                .with_context(|| format!("Failed to read {}", args[2]))?;
            println!("{}", sha256_hex(&bytes));
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn previous_state(args: &[String]) -> Result<Option<RepositoryState>> {
    match args {
        [] => Ok(None),
        [session_id, serial] => Ok(Some(RepositoryState {
            session_id: session_id.clone(),
            serial: serial
                .parse()
                .with_context(|| format!("Invalid serial {serial}"))?,
        })),
        _ => bail!("Expected both a session id and a serial"),
    }
}

fn fetcher() -> Result<Arc<HttpFetcher>> {
    let fetcher = HttpFetcher::new(TransportOptions::default())
        .context("Failed to create HTTP fetcher")?;
    Ok(Arc::new(fetcher))
}

async fn sync(url: &str, root: &Path, previous: Option<&RepositoryState>) -> Result<()> {
    let orchestrator = SyncOrchestrator::new(fetcher()?);
    let outcome = orchestrator.sync(url, root, previous).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn notification(url: &str) -> Result<()> {
    let n = NotificationClient::new(fetcher()?).fetch(url).await?;
    let summary = serde_json::json!({
        "session_id": n.session_id,
        "serial": n.serial,
        "snapshot": n.snapshot.uri,
        "deltas": n.deltas.len(),
        "min_serial": n.min_serial,
        "max_serial": n.max_serial,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn print_help() {
    println!(
        r#"RRDP Sync CLI

USAGE:
    rrdp-sync <COMMAND> [OPTIONS]

COMMANDS:
    sync <url> <root> [<session> <serial>]
                        Sync the repository into <root> and print the outcome as JSON;
                        without a previous session and serial the snapshot is used
    notification <url>  Print session, serial and delta range of a notification
    hash <file>         Print the SHA-256 of a file
    help                Show this help message

EXAMPLES:
    rrdp-sync sync https://rrdp.example.net/notification.xml ./mirror
    rrdp-sync sync https://rrdp.example.net/notification.xml ./mirror 9df4b597-af9e-4dca-bdda-719cce2c4e28 1042
    rrdp-sync hash ./mirror/rpki.example.net/repo/ca.cer
"#
    );
}
