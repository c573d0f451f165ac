//! Attachment download
//!
//! Retrieves the raw bytes behind an attachment URL. No decoding happens here;
//! the declared content type decides which transcoder sees the bytes.

pub mod client;
pub mod mock;

pub use client::HttpFetcher;
pub use mock::MockFetcher;

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;

#[async_trait]
pub trait FetchService: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}
