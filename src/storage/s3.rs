use super::ReplicaService;
use crate::models::BackupConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::{config::Region, Client as S3Client};
use bytes::Bytes;
use std::time::Duration;

/// Upper bound for one replica PUT, retries included.
pub const DEFAULT_REPLICA_TIMEOUT: Duration = Duration::from_secs(8);

/// Backup bucket on any S3-compatible store.
pub struct S3Replica {
    client: S3Client,
    bucket: String,
}

impl S3Replica {
    pub async fn new(config: &BackupConfig) -> Result<Self> {
        Self::new_with_timeout(config, DEFAULT_REPLICA_TIMEOUT).await
    }

    pub async fn new_with_timeout(config: &BackupConfig, timeout: Duration) -> Result<Self> {
        let credentials = aws_sdk_s3::config::Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "png2gif-backup",
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        // S3-compatible stores behind a custom endpoint expect path-style keys
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint.is_some())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(timeout)
                    .build(),
            )
            .build();

        Ok(Self {
            client: S3Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ReplicaService for S3Replica {
    async fn put(&self, key: &str, body: Bytes) -> Result<Option<String>> {
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type("image/gif")
            .send()
            .await
            .map_err(|e| Error::Replication(format!("Failed to upload {}: {}", key, e)))?;

        Ok(output.e_tag().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backup_config(server: &MockServer) -> BackupConfig {
        BackupConfig {
            bucket: "png2gif-files".to_string(),
            endpoint: Some(server.uri()),
            region: "us-east-1".to_string(),
            access_key_id: "test-key".to_string(),
            secret_access_key: "test-secret".to_string(),
        }
    }

    async fn replica(server: &MockServer) -> S3Replica {
        S3Replica::new(&backup_config(server)).await.unwrap()
    }

    #[tokio::test]
    async fn test_put_returns_etag() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/png2gif-files/gifs/a.gif"))
            .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"abc123\""))
            .expect(1)
            .mount(&server)
            .await;

        let etag = replica(&server)
            .await
            .put("gifs/a.gif", Bytes::from_static(b"GIF89a"))
            .await
            .unwrap();

        assert_eq!(etag.as_deref(), Some("\"abc123\""));
    }

    #[tokio::test]
    async fn test_put_rejected_is_replication_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = replica(&server)
            .await
            .put("gifs/a.gif", Bytes::from_static(b"GIF89a"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Replication(_)));
    }

    #[tokio::test]
    async fn test_stalled_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(120)))
            .mount(&server)
            .await;

        let replica = S3Replica::new_with_timeout(&backup_config(&server), Duration::from_millis(500))
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(15),
            replica.put("gifs/a.gif", Bytes::from_static(b"GIF89a")),
        )
        .await
        .expect("replica put must give up on its own");

        assert!(matches!(result, Err(Error::Replication(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
