use super::UploadResponse;
use crate::models::UploadTarget;
use crate::Result;
use bytes::Bytes;
use reqwest::{Client, Method};
use std::time::Duration;

const STORAGE_HOST: &str = "storage.bunnycdn.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

/// Client for the primary storage zone HTTP API.
pub struct BunnyStorage {
    client: Client,
    base_url: String,
    zone: String,
    access_key: String,
    timeout: Duration,
}

impl BunnyStorage {
    /// `region` prefixes the storage host when non-empty (e.g. `ny` → `ny.storage.bunnycdn.com`).
    pub fn new(zone: String, access_key: String, region: &str) -> Self {
        Self::new_with_client(zone, access_key, region, Client::new())
    }

    pub fn new_with_client(zone: String, access_key: String, region: &str, client: Client) -> Self {
        let host = if region.is_empty() {
            STORAGE_HOST.to_string()
        } else {
            format!("{}.{}", region, STORAGE_HOST)
        };

        Self {
            client,
            base_url: format!("https://{}", host),
            zone,
            access_key,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `<base>/<zone>/<folder>/<filename>` with duplicate separators collapsed.
    pub fn object_url(&self, folder: &str, filename: &str) -> String {
        let path = [self.zone.as_str(), folder, filename]
            .iter()
            .flat_map(|segment| segment.split('/'))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}", self.base_url, path)
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<(Bytes, Option<&str>)>,
    ) -> Result<UploadResponse> {
        let mut request = self
            .client
            .request(method, url)
            .timeout(self.timeout)
            .header("AccessKey", &self.access_key)
            .header("Accept", "application/json");

        if let Some((body, checksum)) = body {
            request = request
                .header("Content-Type", "application/octet-stream")
                .body(body);
            if let Some(checksum) = checksum {
                request = request.header("Checksum", checksum);
            }
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        Ok(UploadResponse { status, body })
    }

    /// PUTs the object. Transport failures are errors; HTTP statuses are returned as-is.
    pub async fn put(&self, target: &UploadTarget, body: Bytes) -> Result<UploadResponse> {
        let url = self.object_url(&target.folder, &target.filename);
        tracing::debug!("Uploading {} bytes to {}", body.len(), url);
        self.send(Method::PUT, &url, Some((body, target.checksum.as_deref())))
            .await
    }

    pub async fn delete(&self, folder: &str, filename: &str) -> Result<UploadResponse> {
        let url = self.object_url(folder, filename);
        tracing::debug!("Deleting {}", url);
        self.send(Method::DELETE, &url, None).await
    }
}
