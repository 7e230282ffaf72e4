//! Fetch-by-URL abstraction.
//!
//! The sync core never talks to the network directly. Retries, timeouts,
//! TLS policy and downloader fallback all live behind [`Fetcher`]; a failed
//! fetch is reported the same way whichever strategy produced it.

use crate::error::FetchError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Retrieves the raw bytes of a document.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the document at `url`.
    ///
    /// # Errors
    ///
    /// Returns error when no bytes could be obtained.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Clone)]
struct Entry {
    body: Result<Vec<u8>, String>,
    delay: Duration,
}

#[derive(Debug, Default)]
struct Activity {
    requested: Vec<String>,
    completed: Vec<String>,
    in_flight: usize,
    max_in_flight: usize,
}

/// In-memory [`Fetcher`] serving fixed documents.
///
/// Each URL can be given a latency or a failure. Requests, completions and
/// peak concurrency are recorded so tests can inspect how a client fetched.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    entries: Mutex<HashMap<String, Entry>>,
    activity: Mutex<Activity>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StaticFetcher {
    /// Create an empty fetcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` at `url` immediately.
    pub fn insert(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.insert_with_delay(url, body, Duration::ZERO);
    }

    /// Serve `body` at `url` after `delay`.
    pub fn insert_with_delay(
        &self,
        url: impl Into<String>,
        body: impl Into<Vec<u8>>,
        delay: Duration,
    ) {
        lock(&self.entries).insert(
            url.into(),
            Entry {
                body: Ok(body.into()),
                delay,
            },
        );
    }

    /// Fail requests for `url` with `message` after `delay`.
    pub fn fail(&self, url: impl Into<String>, message: impl Into<String>, delay: Duration) {
        lock(&self.entries).insert(
            url.into(),
            Entry {
                body: Err(message.into()),
                delay,
            },
        );
    }

    /// URLs requested so far, in request order.
    #[must_use]
    pub fn requested(&self) -> Vec<String> {
        lock(&self.activity).requested.clone()
    }

    /// URLs whose fetch has finished, in completion order.
    #[must_use]
    pub fn completed(&self) -> Vec<String> {
        lock(&self.activity).completed.clone()
    }

    /// Highest number of fetches that were in progress at the same time.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        lock(&self.activity).max_in_flight
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let entry = lock(&self.entries).get(url).cloned();
        {
            let mut activity = lock(&self.activity);
            activity.requested.push(url.to_string());
            activity.in_flight += 1;
            activity.max_in_flight = activity.max_in_flight.max(activity.in_flight);
        }

        if let Some(delay) = entry.as_ref().map(|e| e.delay).filter(|d| !d.is_zero()) {
            tokio::time::sleep(delay).await;
        }

        {
            let mut activity = lock(&self.activity);
            activity.in_flight -= 1;
            activity.completed.push(url.to_string());
        }

        match entry {
            Some(Entry { body: Ok(body), .. }) => Ok(body),
            Some(Entry {
                body: Err(message), ..
            }) => Err(FetchError::Request {
                url: url.to_string(),
                message,
            }),
            None => Err(FetchError::NotFound(url.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_and_records() {
        let fetcher = StaticFetcher::new();
        fetcher.insert("https://host/a.xml", b"abc".to_vec());
        fetcher.fail("https://host/b.xml", "connection reset", Duration::ZERO);

        assert_eq!(fetcher.fetch("https://host/a.xml").await.unwrap(), b"abc");
        assert!(matches!(
            fetcher.fetch("https://host/b.xml").await,
            Err(FetchError::Request { .. })
        ));
        assert!(matches!(
            fetcher.fetch("https://host/c.xml").await,
            Err(FetchError::NotFound(_))
        ));
        assert_eq!(fetcher.requested().len(), 3);
        assert_eq!(fetcher.completed().len(), 3);
        assert_eq!(fetcher.max_in_flight(), 1);
    }
}
