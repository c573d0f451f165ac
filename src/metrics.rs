//! Operational counters for the conversion pipeline.
//!
//! The pipeline only talks to the [`MetricsSink`] trait; the Prometheus-backed
//! implementation registers its counters on a registry owned by the caller, so
//! nothing here is process-global.

use crate::models::MediaKind;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub trait MetricsSink: Send + Sync {
    fn conversion_succeeded(&self, kind: MediaKind);
    fn conversion_failed(&self, kind: MediaKind, reason: &str);
    fn upload_failed(&self, reason: &str);
    fn replication_failed(&self);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn conversion_succeeded(&self, _kind: MediaKind) {}
    fn conversion_failed(&self, _kind: MediaKind, _reason: &str) {}
    fn upload_failed(&self, _reason: &str) {}
    fn replication_failed(&self) {}
}

pub struct PrometheusMetrics {
    conversions: IntCounterVec,
    upload_failures: IntCounterVec,
    replication_failures: IntCounter,
}

impl PrometheusMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let conversions = IntCounterVec::new(
            Opts::new("png2gif_conversions_total", "Conversions by media kind and result"),
            &["kind", "result"],
        )?;
        let upload_failures = IntCounterVec::new(
            Opts::new(
                "png2gif_upload_failures_total",
                "Primary storage upload failures",
            ),
            &["reason"],
        )?;
        let replication_failures = IntCounter::new(
            "png2gif_replication_failures_total",
            "Backup replication uploads that failed",
        )?;

        registry.register(Box::new(conversions.clone()))?;
        registry.register(Box::new(upload_failures.clone()))?;
        registry.register(Box::new(replication_failures.clone()))?;

        Ok(Self {
            conversions,
            upload_failures,
            replication_failures,
        })
    }
}

impl MetricsSink for PrometheusMetrics {
    fn conversion_succeeded(&self, kind: MediaKind) {
        self.conversions
            .with_label_values(&[kind.as_str(), "success"])
            .inc();
    }

    fn conversion_failed(&self, kind: MediaKind, reason: &str) {
        self.conversions.with_label_values(&[kind.as_str(), reason]).inc();
    }

    fn upload_failed(&self, reason: &str) {
        self.upload_failures.with_label_values(&[reason]).inc();
    }

    fn replication_failed(&self) {
        self.replication_failures.inc();
    }
}

/// In-memory sink for tests and dry runs.
#[derive(Clone, Default)]
pub struct RecordingMetrics {
    counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self, key: String) {
        *self.counts.lock().unwrap().entry(key).or_insert(0) += 1;
    }

    pub fn count(&self, key: &str) -> usize {
        self.counts.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn successes(&self) -> usize {
        self.sum_matching(|k| k.starts_with("success:"))
    }

    pub fn failures(&self) -> usize {
        self.sum_matching(|k| k.starts_with("failed:"))
    }

    fn sum_matching(&self, pred: impl Fn(&str) -> bool) -> usize {
        self.counts
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| pred(k))
            .map(|(_, v)| *v)
            .sum()
    }
}

impl MetricsSink for RecordingMetrics {
    fn conversion_succeeded(&self, kind: MediaKind) {
        self.bump(format!("success:{}", kind.as_str()));
    }

    fn conversion_failed(&self, kind: MediaKind, reason: &str) {
        self.bump(format!("failed:{}:{}", kind.as_str(), reason));
    }

    fn upload_failed(&self, reason: &str) {
        self.bump(format!("upload_failed:{}", reason));
    }

    fn replication_failed(&self) {
        self.bump("replication_failed".to_string());
    }
}
