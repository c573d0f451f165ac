use super::FetchService;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Serves canned bodies keyed by URL; unknown URLs fail like a 404.
#[derive(Clone)]
pub struct MockFetcher {
    bodies: Arc<Mutex<HashMap<String, Bytes>>>,
    default_body: Option<Bytes>,
    max_jitter_ms: u64,
    fetch_count: Arc<Mutex<usize>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            bodies: Arc::new(Mutex::new(HashMap::new())),
            default_body: None,
            max_jitter_ms: 0,
            fetch_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_body(self, url: &str, body: Vec<u8>) -> Self {
        self.bodies
            .lock()
            .unwrap()
            .insert(url.to_string(), Bytes::from(body));
        self
    }

    /// Body returned for any URL without a dedicated entry.
    pub fn with_default_body(mut self, body: Vec<u8>) -> Self {
        self.default_body = Some(Bytes::from(body));
        self
    }

    /// Sleeps a pseudo-random 0..=`max_ms` before answering, derived from the URL.
    pub fn with_jitter(mut self, max_ms: u64) -> Self {
        self.max_jitter_ms = max_ms;
        self
    }

    pub fn get_fetch_count(&self) -> usize {
        *self.fetch_count.lock().unwrap()
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FetchService for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        *self.fetch_count.lock().unwrap() += 1;

        if self.max_jitter_ms > 0 {
            let seed = url.bytes().fold(17u64, |acc, b| acc.wrapping_mul(31) ^ b as u64);
            tokio::time::sleep(Duration::from_millis(seed % (self.max_jitter_ms + 1))).await;
        }

        let body = self.bodies.lock().unwrap().get(url).cloned();
        body.or_else(|| self.default_body.clone())
            .ok_or_else(|| Error::Fetch(format!("{} returned status 404 Not Found", url)))
    }
}
