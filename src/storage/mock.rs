use super::{ReplicaService, UploadResponse, UploadService};
use crate::models::UploadTarget;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// In-memory stand-in for the whole upload path (primary plus replica).
#[derive(Clone)]
pub struct MockUploader {
    files: Arc<Mutex<Vec<(String, Bytes)>>>,
    should_fail: Arc<Mutex<bool>>,
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockUploader {
    pub fn new() -> Self {
        Self {
            files: Arc::new(Mutex::new(Vec::new())),
            should_fail: Arc::new(Mutex::new(false)),
            delay: Duration::ZERO,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_failure(self, should_fail: bool) -> Self {
        *self.should_fail.lock().unwrap() = should_fail;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn get_upload_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    /// Stored object paths, `<folder>/<filename>`.
    pub fn get_paths(&self) -> Vec<String> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Highest number of uploads that were running at the same time.
    pub fn get_max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for MockUploader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UploadService for MockUploader {
    async fn upload(&self, target: &UploadTarget, body: Bytes) -> Result<UploadResponse> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if *self.should_fail.lock().unwrap() {
            return Err(Error::Upload("Mock upload failure".to_string()));
        }

        let path = format!(
            "{}/{}",
            target.folder.trim_end_matches('/'),
            target.filename
        );
        self.files.lock().unwrap().push((path, body));

        Ok(UploadResponse {
            status: 201,
            body: String::new(),
        })
    }
}

#[derive(Clone)]
pub struct MockReplica {
    puts: Arc<Mutex<Vec<(String, Bytes)>>>,
    should_fail: bool,
    delay: Duration,
}

impl MockReplica {
    pub fn new() -> Self {
        Self {
            puts: Arc::new(Mutex::new(Vec::new())),
            should_fail: false,
            delay: Duration::ZERO,
        }
    }

    pub fn with_failure(mut self, should_fail: bool) -> Self {
        self.should_fail = should_fail;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Attempts so far, successful or not.
    pub fn get_put_count(&self) -> usize {
        self.puts.lock().unwrap().len()
    }

    pub fn get_keys(&self) -> Vec<String> {
        self.puts
            .lock()
            .unwrap()
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn get_bodies(&self) -> Vec<Bytes> {
        self.puts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, b)| b.clone())
            .collect()
    }

    /// Polls until at least `count` attempts were made or `timeout` passes.
    pub async fn wait_for_puts(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.get_put_count() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.get_put_count() >= count
    }
}

impl Default for MockReplica {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplicaService for MockReplica {
    async fn put(&self, key: &str, body: Bytes) -> Result<Option<String>> {
        self.puts.lock().unwrap().push((key.to_string(), body));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.should_fail {
            return Err(Error::Replication(format!("Mock failure for {}", key)));
        }

        Ok(Some(format!("\"mock-etag-{}\"", self.get_put_count())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_uploader_records_paths() {
        let uploader = MockUploader::new();
        let target = UploadTarget::generate("/gifs");

        uploader
            .upload(&target, Bytes::from_static(b"GIF89a"))
            .await
            .unwrap();

        assert_eq!(uploader.get_upload_count(), 1);
        assert_eq!(
            uploader.get_paths(),
            vec![format!("/gifs/{}", target.filename)]
        );
    }

    #[tokio::test]
    async fn test_mock_uploader_failure() {
        let uploader = MockUploader::new().with_failure(true);
        let result = uploader
            .upload(&UploadTarget::generate("/gifs"), Bytes::new())
            .await;

        assert!(matches!(result, Err(Error::Upload(_))));
        assert_eq!(uploader.get_upload_count(), 0);
    }

    #[tokio::test]
    async fn test_mock_replica_counts_failed_attempts() {
        let replica = MockReplica::new().with_failure(true);
        assert!(replica.put("gifs/a.gif", Bytes::new()).await.is_err());
        assert_eq!(replica.get_put_count(), 1);
        assert!(replica.wait_for_puts(1, Duration::from_millis(10)).await);
    }
}
