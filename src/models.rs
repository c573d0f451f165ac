//! Data models and structures
//!
//! Defines the attachment descriptors consumed by the pipeline, the per-task
//! and per-batch results handed back to the command layer, and the
//! environment-driven configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One attachment handed over by the command layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub url: String,
    pub content_type: String,
    pub size_bytes: u64,
}

impl AttachmentRef {
    pub fn new(url: impl Into<String>, content_type: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            url: url.into(),
            content_type: content_type.into(),
            size_bytes,
        }
    }

    pub fn kind(&self) -> MediaKind {
        MediaKind::from_content_type(&self.content_type)
    }
}

/// Lower-cased MIME type without parameters (`IMAGE/PNG; x=y` → `image/png`).
pub fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Keeps only the attachments whose MIME type starts with one of `prefixes`.
///
/// Matching uses [`mime_essence`], the same normalization that routes a task.
pub fn filter_attachments(attachments: &[AttachmentRef], prefixes: &[&str]) -> Vec<AttachmentRef> {
    attachments
        .iter()
        .filter(|a| {
            let mime = mime_essence(&a.content_type);
            prefixes.iter().any(|p| mime.starts_with(p))
        })
        .cloned()
        .collect()
}

/// Transcoder route, resolved once per task from the declared MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    AnimatedGif,
    Video,
    Unsupported,
}

impl MediaKind {
    pub fn from_content_type(content_type: &str) -> Self {
        let mime = mime_essence(content_type);

        if mime == "image/gif" {
            MediaKind::AnimatedGif
        } else if mime.starts_with("image/") {
            MediaKind::Image
        } else if mime.starts_with("video/") {
            MediaKind::Video
        } else {
            MediaKind::Unsupported
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::AnimatedGif => "gif",
            MediaKind::Video => "video",
            MediaKind::Unsupported => "unsupported",
        }
    }
}

/// Outcome of a single attachment. Failures are only counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionResult {
    Link(String),
    Failed,
}

/// Aggregate handed back to the command layer once every task has finished.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Completion order, not input order.
    pub links: Vec<String>,
    pub failed_count: usize,
}

impl BatchOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: ConversionResult) {
        match result {
            ConversionResult::Link(link) => self.links.push(link),
            ConversionResult::Failed => self.failed_count += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.links.len() + self.failed_count
    }

    /// Message body for the chat reply: one link per line, plus a failure note.
    pub fn render(&self) -> String {
        let mut message = self.links.join("\n");
        if self.failed_count > 0 {
            if !message.is_empty() {
                message.push('\n');
            }
            message.push_str(&format!("{} file(s) failed to process.", self.failed_count));
        }
        message
    }
}

/// Where a converted GIF is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub folder: String,
    pub filename: String,
    pub checksum: Option<String>,
}

impl UploadTarget {
    /// Fresh target in `folder`; the filename never derives from user input.
    pub fn generate(folder: &str) -> Self {
        Self {
            folder: folder.to_string(),
            filename: format!("{}.gif", Uuid::new_v4()),
            checksum: None,
        }
    }

    pub fn with_checksum(mut self, checksum: String) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn public_url(&self, cdn_base_url: &str) -> String {
        format!(
            "{}/{}/{}",
            cdn_base_url.trim_end_matches('/'),
            self.folder.trim_matches('/'),
            self.filename
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
}

impl Environment {
    /// `APP_ENV` wins; otherwise a container marker means production.
    pub fn detect(app_env: Option<&str>, dockerenv: &Path) -> Self {
        match app_env.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "production" || v == "prod" => Environment::Production,
            Some(v) if v == "development" || v == "dev" => Environment::Development,
            _ if dockerenv.exists() => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn folder(&self) -> &'static str {
        match self {
            Environment::Production => "/gifs",
            Environment::Development => "/dev/gifs",
        }
    }
}

/// Credentials and location of the S3-compatible backup bucket.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

// Configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub storage_zone: String,
    pub storage_key: String,
    pub storage_region: String,
    pub cdn_base_url: String,
    pub environment: Environment,
    pub backup: Option<BackupConfig>,
    pub ffmpeg_path: PathBuf,
    pub max_concurrency: usize,
    pub upload_checksums: bool,
    pub dry_run: bool,
}

impl Config {
    pub fn from_env() -> crate::Result<Self> {
        dotenvy::dotenv().ok();

        let dry_run = env_flag("DRY_RUN");
        let required = |name: &str| -> crate::Result<String> {
            match std::env::var(name) {
                Ok(v) => Ok(v),
                Err(_) if dry_run => Ok(String::new()),
                Err(_) => Err(crate::Error::Config(format!("{} not set", name))),
            }
        };

        let backup = match (
            std::env::var("BACKUP_S3_ACCESS_KEY_ID"),
            std::env::var("BACKUP_S3_SECRET_ACCESS_KEY"),
        ) {
            (Ok(access_key_id), Ok(secret_access_key)) => Some(BackupConfig {
                bucket: std::env::var("BACKUP_S3_BUCKET")
                    .unwrap_or_else(|_| "png2gif-files".to_string()),
                endpoint: std::env::var("BACKUP_S3_ENDPOINT").ok(),
                region: std::env::var("BACKUP_S3_REGION")
                    .unwrap_or_else(|_| "us-east-1".to_string()),
                access_key_id,
                secret_access_key,
            }),
            _ => None,
        };

        let max_concurrency = match std::env::var("MAX_CONCURRENT_CONVERSIONS") {
            Ok(v) => v
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    crate::Error::Config(format!("Invalid MAX_CONCURRENT_CONVERSIONS: {}", v))
                })?,
            Err(_) => 4,
        };

        Ok(Self {
            storage_zone: required("BUNNYNET_CDN_STORAGE_NAME")?,
            storage_key: required("BUNNYNET_CDN_STORAGE_KEY")?,
            storage_region: std::env::var("BUNNYNET_CDN_STORAGE_REGION").unwrap_or_default(),
            cdn_base_url: std::env::var("CDN_BASE_URL")
                .unwrap_or_else(|_| "https://p2gcdn.netstat.ovh".to_string()),
            environment: Environment::detect(
                std::env::var("APP_ENV").ok().as_deref(),
                Path::new("/.dockerenv"),
            ),
            backup,
            ffmpeg_path: std::env::var("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("ffmpeg")),
            max_concurrency,
            upload_checksums: env_flag("UPLOAD_CHECKSUMS"),
            dry_run,
        })
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
