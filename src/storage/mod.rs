//! Durable storage for converted GIFs
//!
//! Uploads go to the primary storage zone first; only a successful primary
//! upload produces a public link. Each success is then copied to a backup
//! bucket in the background, and that copy never affects the caller.

pub mod bunny;
pub mod mock;
pub mod s3;
pub mod uploader;

pub use bunny::BunnyStorage;
pub use mock::{MockReplica, MockUploader};
pub use s3::S3Replica;
pub use uploader::DualUploader;

use crate::models::UploadTarget;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};

/// Status and body returned by the storage API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait UploadService: Send + Sync {
    async fn upload(&self, target: &UploadTarget, body: Bytes) -> Result<UploadResponse>;
}

#[async_trait]
pub trait ReplicaService: Send + Sync {
    /// Stores `body` under `key`, returning the ETag when the store reports one.
    async fn put(&self, key: &str, body: Bytes) -> Result<Option<String>>;
}

/// Backup key for a primary object: the folder loses every `/`.
pub fn replica_key(folder: &str, filename: &str) -> String {
    format!("{}/{}", folder.replace('/', ""), filename)
}

/// Upper-case hex SHA-256, the format the storage `Checksum` header expects.
pub fn sha256_checksum(data: &[u8]) -> String {
    hex::encode_upper(Sha256::digest(data))
}
