use super::FetchService;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::new_with_client(Client::new())
    }

    pub fn new_with_client(client: Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FetchService for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        tracing::debug!("Downloading attachment {}", url);

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!("{} returned status {}", url, status)));
        }

        let expected = response.content_length();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Fetch(format!("reading body of {} failed: {}", url, e)))?;

        if let Some(expected) = expected {
            if body.len() as u64 != expected {
                return Err(Error::Fetch(format!(
                    "{} truncated: got {} of {} bytes",
                    url,
                    body.len(),
                    expected
                )));
            }
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/attachments/cat.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3, 4]))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new();
        let body = fetcher
            .fetch(&format!("{}/attachments/cat.png", server.uri()))
            .await
            .unwrap();

        assert_eq!(body.as_ref(), &[1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_fetch_non_success_status_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
            .mount(&server)
            .await;

        let err = HttpFetcher::new()
            .fetch(&format!("{}/missing.png", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Fetch(_)));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_fetch_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 8])
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let err = HttpFetcher::new()
            .with_timeout(Duration::from_millis(100))
            .fetch(&format!("{}/slow.mp4", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Fetch(_)));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host() {
        let err = HttpFetcher::new()
            .with_timeout(Duration::from_secs(1))
            .fetch("http://127.0.0.1:1/nothing.png")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Fetch(_)));
    }
}
