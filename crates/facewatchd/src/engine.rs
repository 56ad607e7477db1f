use crate::upload::{GeoPoint, UploadPolicy, UploadSink, UploadStatus};
use chrono::{DateTime, Utc};
use facewatch_core::{BoundingBox, FaceModel, Identity, MatchResult, MatcherSlot, ProviderError};
use facewatch_hw::{CameraError, FrameSource};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("face model error: {0}")]
    Provider(#[from] ProviderError),
}

/// Where the current attempt is. `Idle` means the lock is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Idle,
    Capturing,
    Extracting,
    Matching,
    Reporting,
}

/// Single-slot mutual exclusion for capture attempts.
///
/// At most one guard exists at a time; the lock is free again as soon as
/// the guard is dropped, whichever way its owner exits.
#[derive(Clone, Default)]
pub struct ProcessingLock {
    stage: Arc<Mutex<Stage>>,
}

impl ProcessingLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock if it is free. Never waits.
    pub fn try_acquire(&self) -> Option<ProcessingGuard> {
        let mut stage = self.stage.lock().unwrap_or_else(PoisonError::into_inner);
        if *stage != Stage::Idle {
            return None;
        }
        *stage = Stage::Capturing;
        Some(ProcessingGuard {
            stage: Arc::clone(&self.stage),
        })
    }

    pub fn is_held(&self) -> bool {
        self.stage() != Stage::Idle
    }

    pub fn stage(&self) -> Stage {
        *self.stage.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof of holding the [`ProcessingLock`].
pub struct ProcessingGuard {
    stage: Arc<Mutex<Stage>>,
}

impl ProcessingGuard {
    pub fn advance(&self, next: Stage) {
        *self.stage.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        *self.stage.lock().unwrap_or_else(PoisonError::into_inner) = Stage::Idle;
    }
}

/// Result of one recognition attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// The full detection found no face.
    NoFace,
    /// No reference index is installed yet.
    Unavailable,
    Recognized {
        result: MatchResult,
        region: BoundingBox,
    },
    Failed { message: String },
}

impl Outcome {
    fn should_upload(&self, policy: UploadPolicy) -> bool {
        match (policy, self) {
            (_, Outcome::Failed { .. }) | (UploadPolicy::Off, _) => false,
            (UploadPolicy::All, _) => true,
            (UploadPolicy::Unknown, Outcome::Unavailable) => true,
            (UploadPolicy::Unknown, Outcome::Recognized { result, .. }) => !result.is_known(),
            (UploadPolicy::Unknown, Outcome::NoFace) => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecognitionReport {
    pub capture_id: Uuid,
    pub captured_at: DateTime<Utc>,
    pub outcome: Outcome,
    pub upload: UploadStatus,
}

struct Uploader {
    sink: Arc<dyn UploadSink>,
    policy: UploadPolicy,
    location: Option<GeoPoint>,
}

/// Capture, describe, classify and report one still.
pub struct RecognitionPipeline {
    source: Arc<dyn FrameSource>,
    model: Arc<dyn FaceModel>,
    matchers: Arc<MatcherSlot>,
    uploader: Option<Uploader>,
    lock: ProcessingLock,
    last_report: Mutex<Option<RecognitionReport>>,
}

impl RecognitionPipeline {
    pub fn new(
        source: Arc<dyn FrameSource>,
        model: Arc<dyn FaceModel>,
        matchers: Arc<MatcherSlot>,
    ) -> Self {
        Self {
            source,
            model,
            matchers,
            uploader: None,
            lock: ProcessingLock::new(),
            last_report: Mutex::new(None),
        }
    }

    pub fn with_upload(
        mut self,
        sink: Arc<dyn UploadSink>,
        policy: UploadPolicy,
        location: Option<GeoPoint>,
    ) -> Self {
        self.uploader = Some(Uploader {
            sink,
            policy,
            location,
        });
        self
    }

    pub fn lock(&self) -> &ProcessingLock {
        &self.lock
    }

    pub fn last_report(&self) -> Option<RecognitionReport> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cheap presence check on a fresh frame. Requires the lock.
    pub async fn face_present(&self, guard: &ProcessingGuard) -> Result<bool, EngineError> {
        guard.advance(Stage::Capturing);
        let frame = self.source.capture().await?;
        guard.advance(Stage::Extracting);
        Ok(self.model.detect_existence(&frame.image).await?)
    }

    /// Run one full attempt. The lock is released when `guard` drops at the
    /// end of this call, or during unwinding if a collaborator panics.
    pub async fn run(&self, guard: ProcessingGuard) -> RecognitionReport {
        let capture_id = Uuid::new_v4();
        let captured_at = Utc::now();

        guard.advance(Stage::Capturing);
        let (outcome, image) = match self.recognize(&guard).await {
            Ok((outcome, image)) => (outcome, Some(image)),
            Err(err) => {
                tracing::warn!(%capture_id, error = %err, "recognition attempt abandoned");
                (Outcome::Failed { message: err.to_string() }, None)
            }
        };

        guard.advance(Stage::Reporting);
        let upload = match (&self.uploader, image) {
            (Some(uploader), Some(image)) if outcome.should_upload(uploader.policy) => {
                upload_capture(uploader, image, capture_id).await
            }
            _ => UploadStatus::Skipped,
        };

        match &outcome {
            Outcome::Recognized { result, .. } => match &result.identity {
                Identity::Known(id) => tracing::info!(
                    %capture_id,
                    identity = %id,
                    distance = result.distance,
                    "face recognized"
                ),
                Identity::Unknown => tracing::info!(
                    %capture_id,
                    distance = result.distance,
                    "unknown face"
                ),
            },
            Outcome::Unavailable => {
                tracing::info!(%capture_id, "face seen but no reference index installed")
            }
            Outcome::NoFace => tracing::debug!(%capture_id, "no face in capture"),
            Outcome::Failed { .. } => {}
        }

        let report = RecognitionReport {
            capture_id,
            captured_at,
            outcome,
            upload,
        };
        *self
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        drop(guard);
        report
    }

    async fn recognize(
        &self,
        guard: &ProcessingGuard,
    ) -> Result<(Outcome, image::RgbImage), EngineError> {
        let frame = self.source.capture().await?;
        tracing::debug!(
            seq = frame.sequence,
            width = frame.width(),
            height = frame.height(),
            "captured still"
        );

        guard.advance(Stage::Extracting);
        let Some(face) = self.model.detect_and_describe(&frame.image).await? else {
            return Ok((Outcome::NoFace, frame.image));
        };

        let Some(matcher) = self.matchers.load() else {
            return Ok((Outcome::Unavailable, frame.image));
        };

        guard.advance(Stage::Matching);
        let result = matcher.find_best(&face.descriptor);
        Ok((
            Outcome::Recognized {
                result,
                region: face.region,
            },
            frame.image,
        ))
    }
}

async fn upload_capture(
    uploader: &Uploader,
    image: image::RgbImage,
    capture_id: Uuid,
) -> UploadStatus {
    let png = match facewatch_hw::frame::spawn_encode_png(image).await {
        Ok(png) => png,
        Err(err) => {
            tracing::warn!(%capture_id, error = %err, "could not encode capture for upload");
            return UploadStatus::Failed {
                message: err.to_string(),
            };
        }
    };

    match uploader.sink.submit(png, uploader.location).await {
        Ok(record) => {
            tracing::info!(%capture_id, "capture uploaded");
            UploadStatus::Stored { record }
        }
        Err(err) => {
            tracing::warn!(%capture_id, error = %err, "capture upload failed");
            UploadStatus::Failed {
                message: err.to_string(),
            }
        }
    }
}
