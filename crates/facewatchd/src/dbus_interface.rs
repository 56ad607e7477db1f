use crate::engine::RecognitionPipeline;
use crate::references::{RebuildSummary, ReferenceIndex};
use crate::scheduler::CaptureScheduler;
use facewatch_core::MatcherSlot;
use std::sync::Arc;
use zbus::{fdo, interface};

/// D-Bus interface for the facewatch daemon.
///
/// Bus name: org.facewatch.Daemon1
/// Object path: /org/facewatch/Daemon1
pub struct FacewatchService {
    scheduler: Arc<CaptureScheduler>,
    pipeline: Arc<RecognitionPipeline>,
    index: Option<Arc<ReferenceIndex>>,
    matchers: Arc<MatcherSlot>,
    threshold: f32,
}

impl FacewatchService {
    pub fn new(
        scheduler: Arc<CaptureScheduler>,
        pipeline: Arc<RecognitionPipeline>,
        index: Option<Arc<ReferenceIndex>>,
        matchers: Arc<MatcherSlot>,
        threshold: f32,
    ) -> Self {
        Self {
            scheduler,
            pipeline,
            index,
            matchers,
            threshold,
        }
    }

    async fn rebuild_index(&self) -> Result<RebuildSummary, String> {
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| "no reference source configured".to_string())?;
        index.rebuild().await.map_err(|e| {
            tracing::warn!(error = %e, "reference rebuild failed");
            e.to_string()
        })
    }

    fn status_snapshot(&self) -> serde_json::Value {
        let matcher = self.matchers.load();
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "running": self.scheduler.is_running(),
            "mode": self.scheduler.mode(),
            "interval_ms": self.scheduler.period().as_millis() as u64,
            "stage": self.pipeline.lock().stage(),
            "recognition_ready": matcher.is_some(),
            "identities": matcher.as_ref().map_or(0, |m| m.references().len()),
            "descriptors": matcher.as_ref().map_or(0, |m| m.references().descriptor_count()),
            "threshold": self.threshold,
        })
    }
}

#[interface(name = "org.facewatch.Daemon1")]
impl FacewatchService {
    /// Arm the capture scheduler. False if it was already running.
    async fn start(&self) -> bool {
        tracing::info!("start requested");
        self.scheduler.start()
    }

    /// Disarm the capture scheduler. False if it was not running.
    async fn stop(&self) -> bool {
        tracing::info!("stop requested");
        self.scheduler.stop()
    }

    /// Rebuild the reference index; returns the new descriptor count.
    async fn rebuild(&self) -> fdo::Result<u32> {
        tracing::info!("rebuild requested");
        self.rebuild_index()
            .await
            .map(|summary| summary.descriptors as u32)
            .map_err(fdo::Error::Failed)
    }

    /// Return daemon status as JSON.
    async fn status(&self) -> fdo::Result<String> {
        Ok(self.status_snapshot().to_string())
    }

    /// Most recent recognition report as JSON, or `null`.
    async fn last_result(&self) -> fdo::Result<String> {
        serde_json::to_string(&self.pipeline.last_report())
            .map_err(|e| fdo::Error::Failed(format!("failed to serialize report: {e}")))
    }
}
