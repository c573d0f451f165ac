//! Batch orchestration: one concurrent conversion pipeline per attachment.

use crate::convert::{ConvertService, ImageTranscoder, MediaConverter, VideoConfig, VideoTranscoder};
use crate::fetch::{FetchService, HttpFetcher};
use crate::metrics::MetricsSink;
use crate::models::{
    filter_attachments, AttachmentRef, BatchOutcome, Config, ConversionResult, MediaKind,
    UploadTarget,
};
use crate::storage::{
    sha256_checksum, BunnyStorage, DualUploader, MockUploader, ReplicaService, S3Replica,
    UploadService,
};
use crate::{Error, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Content types accepted by the `transform` command.
pub const TRANSFORM_PREFIXES: &[&str] = &["image/", "video/"];
/// Content types accepted by the `archive` command.
pub const ARCHIVE_PREFIXES: &[&str] = &["image/gif"];

/// Injectable service bundle used to construct [`BatchOrchestrator`] in tests/harnesses.
pub struct BatchServices {
    pub fetcher: Arc<dyn FetchService>,
    pub converter: Arc<dyn ConvertService>,
    pub uploader: Arc<dyn UploadService>,
    pub metrics: Arc<dyn MetricsSink>,
}

#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Storage folder, e.g. `/gifs`.
    pub folder: String,
    pub cdn_base_url: String,
    pub max_concurrency: usize,
    pub upload_checksums: bool,
}

impl BatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            folder: config.environment.folder().to_string(),
            cdn_base_url: config.cdn_base_url.clone(),
            max_concurrency: config.max_concurrency,
            upload_checksums: config.upload_checksums,
        }
    }
}

/// Everything a single task needs, cheap to clone into spawned futures.
#[derive(Clone)]
struct Pipeline {
    fetcher: Arc<dyn FetchService>,
    converter: Arc<dyn ConvertService>,
    uploader: Arc<dyn UploadService>,
    metrics: Arc<dyn MetricsSink>,
    settings: Arc<BatchSettings>,
}

impl Pipeline {
    async fn process(&self, attachment: &AttachmentRef, kind: MediaKind) -> Result<String> {
        if kind == MediaKind::Unsupported {
            return Err(Error::Unsupported(attachment.content_type.clone()));
        }

        let data = self.fetcher.fetch(&attachment.url).await?;
        debug!("Fetched {} bytes from {}", data.len(), attachment.url);

        let gif = self.converter.convert(kind, data).await?;

        let mut target = UploadTarget::generate(&self.settings.folder);
        if self.settings.upload_checksums {
            target = target.with_checksum(sha256_checksum(&gif));
        }

        self.uploader.upload(&target, gif).await?;

        Ok(target.public_url(&self.settings.cdn_base_url))
    }

    /// Runs one attachment to completion and reports its result.
    async fn run_task(
        self,
        attachment: AttachmentRef,
        semaphore: Arc<Semaphore>,
        cancel: CancellationToken,
    ) -> ConversionResult {
        let kind = attachment.kind();

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = async {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Invariant(format!("Semaphore closed: {}", e)))?;
                self.process(&attachment, kind).await
            } => result,
        };

        match result {
            Ok(link) => {
                info!("[{}] Converted {} -> {}", kind.as_str(), attachment.url, link);
                self.metrics.conversion_succeeded(kind);
                ConversionResult::Link(link)
            }
            Err(e) => {
                warn!("[{}] Failed to process {}: {}", kind.as_str(), attachment.url, e);
                self.metrics.conversion_failed(kind, e.reason());
                ConversionResult::Failed
            }
        }
    }
}

/// Coordinates fetch, conversion and upload for a batch of attachments.
pub struct BatchOrchestrator {
    pipeline: Pipeline,
}

impl BatchOrchestrator {
    /// Build an orchestrator from concrete service dependencies.
    ///
    /// This is primarily useful for integration tests and local harnesses that
    /// need to inject mocks.
    pub fn with_services(services: BatchServices, settings: BatchSettings) -> Self {
        Self {
            pipeline: Pipeline {
                fetcher: services.fetcher,
                converter: services.converter,
                uploader: services.uploader,
                metrics: services.metrics,
                settings: Arc::new(settings),
            },
        }
    }

    /// Construct the production service stack from [`Config`].
    pub async fn new(config: &Config, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        let http_client = reqwest::Client::new();

        let uploader: Arc<dyn UploadService> = if config.dry_run {
            info!("DRY_RUN enabled, converted files are kept in memory only");
            Arc::new(MockUploader::new())
        } else {
            let replica: Option<Arc<dyn ReplicaService>> = match &config.backup {
                Some(backup) => {
                    info!("Replicating uploads to bucket {}", backup.bucket);
                    Some(Arc::new(S3Replica::new(backup).await?))
                }
                None => None,
            };
            let primary = BunnyStorage::new_with_client(
                config.storage_zone.clone(),
                config.storage_key.clone(),
                &config.storage_region,
                http_client.clone(),
            );
            Arc::new(DualUploader::new(primary, replica, Arc::clone(&metrics)))
        };

        let converter = MediaConverter::new(
            ImageTranscoder::new(),
            VideoTranscoder::new(VideoConfig {
                ffmpeg_path: config.ffmpeg_path.clone(),
                ..VideoConfig::default()
            }),
        );

        info!(
            "Environment {:?}, uploading to folder {}",
            config.environment,
            config.environment.folder()
        );

        Ok(Self::with_services(
            BatchServices {
                fetcher: Arc::new(HttpFetcher::new_with_client(http_client)),
                converter: Arc::new(converter),
                uploader,
                metrics,
            },
            BatchSettings::from_config(config),
        ))
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.pipeline.settings
    }

    /// Converts every attachment concurrently and waits for all of them.
    ///
    /// Links appear in completion order. Cancelled and panicked tasks count as
    /// failures, so `links + failed_count` always equals the input length.
    pub async fn run(
        &self,
        attachments: Vec<AttachmentRef>,
        cancel: CancellationToken,
    ) -> BatchOutcome {
        let total = attachments.len();
        info!(
            "Processing {} attachment(s) with concurrency {}",
            total, self.pipeline.settings.max_concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.pipeline.settings.max_concurrency.max(1)));
        let outcome = Arc::new(Mutex::new(BatchOutcome::new()));
        let mut tasks = JoinSet::new();

        for attachment in attachments {
            let pipeline = self.pipeline.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let outcome = Arc::clone(&outcome);

            tasks.spawn(async move {
                let result = pipeline.run_task(attachment, semaphore, cancel).await;
                let mut guard = match outcome.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                guard.record(result);
            });
        }

        let mut panicked = 0;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Conversion task aborted: {}", e);
                panicked += 1;
            }
        }

        let mut outcome = match outcome.lock() {
            Ok(outcome) => outcome.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        // Panicked tasks never reached the aggregate.
        for _ in 0..panicked {
            outcome.record(ConversionResult::Failed);
        }
        debug_assert_eq!(outcome.total(), total);

        info!(
            "Batch complete: {} link(s), {} failure(s)",
            outcome.links.len(),
            outcome.failed_count
        );
        outcome
    }

    /// `transform` command: still images, GIFs and videos.
    pub async fn transform(
        &self,
        attachments: &[AttachmentRef],
        cancel: CancellationToken,
    ) -> BatchOutcome {
        self.run(filter_attachments(attachments, TRANSFORM_PREFIXES), cancel)
            .await
    }

    /// `archive` command: re-hosts existing GIFs only.
    pub async fn archive(
        &self,
        attachments: &[AttachmentRef],
        cancel: CancellationToken,
    ) -> BatchOutcome {
        self.run(filter_attachments(attachments, ARCHIVE_PREFIXES), cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::{BatchOrchestrator, BatchServices, BatchSettings};
    use crate::convert::mock::MOCK_GIF;
    use crate::convert::{ConvertService, MockConverter};
    use crate::fetch::MockFetcher;
    use crate::metrics::RecordingMetrics;
    use crate::models::{AttachmentRef, MediaKind};
    use crate::storage::MockUploader;
    use async_trait::async_trait;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const TEST_CDN_BASE_URL: &str = "https://cdn.test";

    fn settings(max_concurrency: usize) -> BatchSettings {
        BatchSettings {
            folder: "/gifs".to_string(),
            cdn_base_url: TEST_CDN_BASE_URL.to_string(),
            max_concurrency,
            upload_checksums: false,
        }
    }

    fn build_test_orchestrator(
        fetcher: MockFetcher,
        converter: MockConverter,
        uploader: MockUploader,
        metrics: RecordingMetrics,
        max_concurrency: usize,
    ) -> BatchOrchestrator {
        BatchOrchestrator::with_services(
            BatchServices {
                fetcher: Arc::new(fetcher),
                converter: Arc::new(converter),
                uploader: Arc::new(uploader),
                metrics: Arc::new(metrics),
            },
            settings(max_concurrency),
        )
    }

    fn attachments(n: usize, content_type: &str) -> Vec<AttachmentRef> {
        (0..n)
            .map(|i| AttachmentRef::new(format!("https://media.test/{}.bin", i), content_type, 64))
            .collect()
    }

    #[tokio::test]
    async fn test_all_attachments_succeed() {
        let uploader = MockUploader::new();
        let metrics = RecordingMetrics::new();
        let orchestrator = build_test_orchestrator(
            MockFetcher::new().with_default_body(vec![1, 2, 3]),
            MockConverter::new(),
            uploader.clone(),
            metrics.clone(),
            4,
        );

        let mut input = attachments(3, "image/png");
        input.push(AttachmentRef::new("https://media.test/a.gif", "image/gif", 10));
        input.push(AttachmentRef::new("https://media.test/v.mp4", "video/mp4", 10));

        let outcome = orchestrator.run(input, CancellationToken::new()).await;

        assert_eq!(outcome.links.len(), 5);
        assert_eq!(outcome.failed_count, 0);
        assert!(outcome
            .links
            .iter()
            .all(|l| l.starts_with("https://cdn.test/gifs/") && l.ends_with(".gif")));
        assert_eq!(uploader.get_upload_count(), 5);
        assert_eq!(metrics.count("success:image"), 3);
        assert_eq!(metrics.count("success:gif"), 1);
        assert_eq!(metrics.count("success:video"), 1);
    }

    #[tokio::test]
    async fn test_mixed_failures_are_counted() {
        let fetcher = MockFetcher::new()
            .with_body("https://media.test/ok.png", vec![1])
            .with_body("https://media.test/bad.png", vec![0xde, 0xad])
            .with_body("https://media.test/clip.mp4", vec![2]);
        let converter = MockConverter::new()
            .with_failure_on_input(&[0xde, 0xad])
            .with_failure_for(MediaKind::Video);
        let metrics = RecordingMetrics::new();
        let orchestrator = build_test_orchestrator(
            fetcher,
            converter,
            MockUploader::new(),
            metrics.clone(),
            2,
        );

        let input = vec![
            AttachmentRef::new("https://media.test/ok.png", "image/png", 1),
            AttachmentRef::new("https://media.test/bad.png", "image/png", 2),
            AttachmentRef::new("https://media.test/clip.mp4", "video/mp4", 1),
            AttachmentRef::new("https://media.test/missing.png", "image/png", 1),
        ];
        let outcome = orchestrator.run(input, CancellationToken::new()).await;

        assert_eq!(outcome.links.len(), 1);
        assert_eq!(outcome.failed_count, 3);
        assert_eq!(outcome.total(), 4);
        assert_eq!(metrics.count("failed:image:fetch"), 1);
        assert_eq!(metrics.count("failed:video:encode"), 1);
        assert!(outcome.render().ends_with("3 file(s) failed to process."));
    }

    #[tokio::test]
    async fn test_unsupported_type_fails_without_fetching() {
        let fetcher = MockFetcher::new().with_default_body(vec![1]);
        let metrics = RecordingMetrics::new();
        let orchestrator = build_test_orchestrator(
            fetcher.clone(),
            MockConverter::new(),
            MockUploader::new(),
            metrics.clone(),
            4,
        );

        let outcome = orchestrator
            .run(attachments(2, "application/pdf"), CancellationToken::new())
            .await;

        assert_eq!(outcome.links.len(), 0);
        assert_eq!(outcome.failed_count, 2);
        assert_eq!(fetcher.get_fetch_count(), 0);
        assert_eq!(metrics.count("failed:unsupported:unsupported"), 2);
    }

    #[tokio::test]
    async fn test_upload_failure_fails_task() {
        let orchestrator = build_test_orchestrator(
            MockFetcher::new().with_default_body(vec![1]),
            MockConverter::new(),
            MockUploader::new().with_failure(true),
            RecordingMetrics::new(),
            4,
        );

        let outcome = orchestrator
            .run(attachments(3, "image/jpeg"), CancellationToken::new())
            .await;

        assert_eq!(outcome.links.len(), 0);
        assert_eq!(outcome.failed_count, 3);
    }

    #[tokio::test]
    async fn test_hundred_attachments_with_jitter() {
        let n = 100;
        let uploader = MockUploader::new();
        let orchestrator = build_test_orchestrator(
            MockFetcher::new().with_default_body(vec![7]).with_jitter(20),
            MockConverter::new(),
            uploader.clone(),
            RecordingMetrics::new(),
            8,
        );

        let outcome = orchestrator
            .run(attachments(n, "image/png"), CancellationToken::new())
            .await;

        assert_eq!(outcome.links.len(), n);
        assert_eq!(outcome.failed_count, 0);
        assert_eq!(uploader.get_upload_count(), n);

        let mut unique = outcome.links.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), n);
    }

    #[tokio::test]
    async fn test_concurrency_bound_is_respected() {
        let uploader = MockUploader::new().with_delay(Duration::from_millis(20));
        let orchestrator = build_test_orchestrator(
            MockFetcher::new().with_default_body(vec![1]),
            MockConverter::new(),
            uploader.clone(),
            RecordingMetrics::new(),
            3,
        );

        let outcome = orchestrator
            .run(attachments(12, "image/png"), CancellationToken::new())
            .await;

        assert_eq!(outcome.links.len(), 12);
        assert!(uploader.get_max_in_flight() <= 3);
        assert!(uploader.get_max_in_flight() >= 1);
    }

    #[tokio::test]
    async fn test_checksum_setting_reaches_uploader() {
        use crate::models::UploadTarget;
        use crate::storage::{sha256_checksum, UploadResponse, UploadService};
        use std::sync::Mutex;

        #[derive(Default)]
        struct ChecksumCapture(Mutex<Vec<Option<String>>>);

        #[async_trait]
        impl UploadService for ChecksumCapture {
            async fn upload(
                &self,
                target: &UploadTarget,
                _body: Bytes,
            ) -> crate::Result<UploadResponse> {
                self.0.lock().unwrap().push(target.checksum.clone());
                Ok(UploadResponse {
                    status: 201,
                    body: String::new(),
                })
            }
        }

        let capture = Arc::new(ChecksumCapture::default());
        let orchestrator = BatchOrchestrator::with_services(
            BatchServices {
                fetcher: Arc::new(MockFetcher::new().with_default_body(vec![1])),
                converter: Arc::new(MockConverter::new()),
                uploader: capture.clone(),
                metrics: Arc::new(RecordingMetrics::new()),
            },
            BatchSettings {
                upload_checksums: true,
                ..settings(2)
            },
        );

        orchestrator
            .run(attachments(2, "image/png"), CancellationToken::new())
            .await;

        let expected = Some(sha256_checksum(MOCK_GIF));
        assert_eq!(*capture.0.lock().unwrap(), vec![expected.clone(), expected]);
    }

    struct StallingConverter;

    #[async_trait]
    impl ConvertService for StallingConverter {
        async fn convert(&self, _kind: MediaKind, _data: Bytes) -> crate::Result<Bytes> {
            tokio::time::sleep(Duration::from_secs(300)).await;
            Ok(Bytes::from_static(MOCK_GIF))
        }
    }

    #[tokio::test]
    async fn test_cancellation_counts_tasks_as_failed() {
        let uploader = MockUploader::new();
        let orchestrator = BatchOrchestrator::with_services(
            BatchServices {
                fetcher: Arc::new(MockFetcher::new().with_default_body(vec![1])),
                converter: Arc::new(StallingConverter),
                uploader: Arc::new(uploader.clone()),
                metrics: Arc::new(RecordingMetrics::new()),
            },
            settings(2),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            orchestrator.run(attachments(5, "video/mp4"), cancel),
        )
        .await
        .expect("cancelled batch should finish promptly");

        assert_eq!(outcome.links.len(), 0);
        assert_eq!(outcome.failed_count, 5);
        assert_eq!(uploader.get_upload_count(), 0);
    }

    struct PanickingConverter;

    #[async_trait]
    impl ConvertService for PanickingConverter {
        async fn convert(&self, kind: MediaKind, _data: Bytes) -> crate::Result<Bytes> {
            if kind == MediaKind::Video {
                panic!("converter bug");
            }
            Ok(Bytes::from_static(MOCK_GIF))
        }
    }

    #[tokio::test]
    async fn test_panicking_task_counts_as_failed() {
        let orchestrator = BatchOrchestrator::with_services(
            BatchServices {
                fetcher: Arc::new(MockFetcher::new().with_default_body(vec![1])),
                converter: Arc::new(PanickingConverter),
                uploader: Arc::new(MockUploader::new()),
                metrics: Arc::new(RecordingMetrics::new()),
            },
            settings(4),
        );

        let mut input = attachments(2, "image/png");
        input.push(AttachmentRef::new("https://media.test/v.mp4", "video/mp4", 1));

        let outcome = orchestrator.run(input, CancellationToken::new()).await;
        assert_eq!(outcome.links.len(), 2);
        assert_eq!(outcome.failed_count, 1);
    }

    #[tokio::test]
    async fn test_transform_and_archive_filter_inputs() {
        let input = vec![
            AttachmentRef::new("https://media.test/a.png", "image/png", 1),
            AttachmentRef::new("https://media.test/b.gif", "image/gif", 1),
            AttachmentRef::new("https://media.test/c.mp4", "video/mp4", 1),
            AttachmentRef::new("https://media.test/d.txt", "text/plain", 1),
        ];

        let orchestrator = build_test_orchestrator(
            MockFetcher::new().with_default_body(vec![1]),
            MockConverter::new(),
            MockUploader::new(),
            RecordingMetrics::new(),
            4,
        );

        let transformed = orchestrator
            .transform(&input, CancellationToken::new())
            .await;
        assert_eq!(transformed.links.len(), 3);
        assert_eq!(transformed.failed_count, 0);

        let archived = orchestrator.archive(&input, CancellationToken::new()).await;
        assert_eq!(archived.links.len(), 1);
        assert_eq!(archived.failed_count, 0);
    }
}
