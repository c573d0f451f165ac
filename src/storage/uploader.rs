use super::s3::DEFAULT_REPLICA_TIMEOUT;
use super::{replica_key, BunnyStorage, ReplicaService, UploadResponse, UploadService};
use crate::metrics::MetricsSink;
use crate::models::UploadTarget;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Primary upload with a detached best-effort copy to the backup store.
pub struct DualUploader {
    primary: BunnyStorage,
    replica: Option<Arc<dyn ReplicaService>>,
    metrics: Arc<dyn MetricsSink>,
    replication_timeout: Duration,
}

impl DualUploader {
    pub fn new(
        primary: BunnyStorage,
        replica: Option<Arc<dyn ReplicaService>>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        if replica.is_none() {
            warn!("No backup store configured, uploads will not be replicated");
        }

        Self {
            primary,
            replica,
            metrics,
            replication_timeout: DEFAULT_REPLICA_TIMEOUT,
        }
    }

    /// Upper bound on each detached backup copy; expiry counts as a replication failure.
    pub fn with_replication_timeout(mut self, timeout: Duration) -> Self {
        self.replication_timeout = timeout;
        self
    }

    pub fn primary(&self) -> &BunnyStorage {
        &self.primary
    }

    /// Launches the backup copy on its own task and returns immediately.
    ///
    /// The task is never joined; its outcome only reaches the log and the
    /// metrics sink. It does not observe batch cancellation.
    fn spawn_replication(&self, target: &UploadTarget, body: Bytes) {
        let Some(replica) = self.replica.clone() else {
            return;
        };
        let metrics = Arc::clone(&self.metrics);
        let key = replica_key(&target.folder, &target.filename);
        let timeout = self.replication_timeout;

        tokio::spawn(async move {
            let result = tokio::time::timeout(timeout, replica.put(&key, body))
                .await
                .unwrap_or_else(|_| Err(Error::Timeout(timeout.as_secs())));

            match result {
                Ok(etag) => info!(key = %key, etag = ?etag, "Uploaded file to backup storage"),
                Err(e) => {
                    error!(key = %key, "Failed to upload to backup storage: {}", e);
                    metrics.replication_failed();
                }
            }
        });
    }
}

fn status_reason(status: u16) -> &'static str {
    match status {
        400..=499 => "client_error",
        500..=599 => "server_error",
        _ => "unexpected_status",
    }
}

#[async_trait]
impl UploadService for DualUploader {
    async fn upload(&self, target: &UploadTarget, body: Bytes) -> Result<UploadResponse> {
        let response = match self.primary.put(target, body.clone()).await {
            Ok(response) => response,
            Err(e) => {
                let reason = match &e {
                    Error::Http(http) if http.is_timeout() => "timeout",
                    _ => "transport",
                };
                self.metrics.upload_failed(reason);
                return Err(Error::Upload(format!(
                    "{}/{}: {}",
                    target.folder, target.filename, e
                )));
            }
        };

        if !(200..300).contains(&response.status) {
            self.metrics.upload_failed(status_reason(response.status));
            return Err(Error::Upload(format!(
                "{}/{} rejected with status {}: {}",
                target.folder, target.filename, response.status, response.body
            )));
        }

        debug!(
            "Uploaded {}/{} to primary storage",
            target.folder, target.filename
        );
        self.spawn_replication(target, body);

        Ok(response)
    }
}
