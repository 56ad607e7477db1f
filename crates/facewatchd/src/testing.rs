//! Hand-written collaborators for engine and scheduler tests.

use crate::upload::{GeoPoint, UploadError, UploadSink};
use async_trait::async_trait;
use facewatch_core::{
    BoundingBox, DetectedFace, FaceDescriptor, FaceModel, FetchError, ImageFetcher,
    ProviderError, ReferencePhoto, ReferenceStore,
};
use facewatch_hw::{CameraError, Frame, FrameSource};
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Serves a tiny grey still, or fails when told to.
#[derive(Default)]
pub struct StubSource {
    pub captures: AtomicUsize,
    pub fail: bool,
}

#[async_trait]
impl FrameSource for StubSource {
    async fn capture(&self) -> Result<Frame, CameraError> {
        let sequence = self.captures.fetch_add(1, Ordering::SeqCst) as u32;
        if self.fail {
            return Err(CameraError::CaptureFailed("stub camera unplugged".into()));
        }
        Ok(Frame {
            image: RgbImage::from_pixel(2, 2, Rgb([120, 120, 120])),
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }
}

/// What the stub model answers to a full detection.
pub enum Describe {
    Face(Vec<f32>),
    NoFace,
    Fail,
    Panic,
}

pub struct StubModel {
    pub present: bool,
    pub presence_fails: bool,
    /// Panic inside the very first presence check only.
    pub presence_panics_once: bool,
    pub describe: Describe,
    /// Simulated provider latency for the full pass.
    pub delay: Option<Duration>,
    pub presence_calls: AtomicUsize,
    pub describe_calls: AtomicUsize,
}

impl StubModel {
    pub fn new(present: bool, describe: Describe) -> Self {
        Self {
            present,
            presence_fails: false,
            presence_panics_once: false,
            describe,
            delay: None,
            presence_calls: AtomicUsize::new(0),
            describe_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_face(values: &[f32]) -> Self {
        Self::new(true, Describe::Face(values.to_vec()))
    }

    pub fn presence_calls(&self) -> usize {
        self.presence_calls.load(Ordering::SeqCst)
    }

    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FaceModel for StubModel {
    async fn detect_existence(&self, _image: &RgbImage) -> Result<bool, ProviderError> {
        let previous = self.presence_calls.fetch_add(1, Ordering::SeqCst);
        if self.presence_panics_once && previous == 0 {
            panic!("stub presence check crashed");
        }
        if self.presence_fails {
            return Err(ProviderError::Unreachable("stub presence outage".into()));
        }
        Ok(self.present)
    }

    async fn detect_and_describe(
        &self,
        _image: &RgbImage,
    ) -> Result<Option<DetectedFace>, ProviderError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.describe {
            Describe::Face(values) => Ok(Some(DetectedFace {
                region: BoundingBox { x: 0.0, y: 0.0, width: 2.0, height: 2.0, confidence: 0.97 },
                descriptor: FaceDescriptor::new(values.clone()),
            })),
            Describe::NoFace => Ok(None),
            Describe::Fail => Err(ProviderError::Rejected {
                status: 503,
                message: "stub model overloaded".into(),
            }),
            Describe::Panic => panic!("stub model crashed"),
        }
    }
}

/// Records submitted captures; optionally rejects them.
#[derive(Default)]
pub struct StubSink {
    pub submissions: Mutex<Vec<(usize, Option<GeoPoint>)>>,
    pub reject: bool,
}

impl StubSink {
    pub fn count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}

#[async_trait]
impl UploadSink for StubSink {
    async fn submit(
        &self,
        png: Vec<u8>,
        location: Option<GeoPoint>,
    ) -> Result<serde_json::Value, UploadError> {
        self.submissions.lock().unwrap().push((png.len(), location));
        if self.reject {
            return Err(UploadError::Rejected {
                status: 500,
                message: "storage full".into(),
            });
        }
        Ok(serde_json::json!({ "id": self.count() }))
    }
}

/// Serves a fixed photo list, or fails while `offline` is set.
#[derive(Default)]
pub struct StubStore {
    pub photos: Mutex<Vec<ReferencePhoto>>,
    pub offline: std::sync::atomic::AtomicBool,
}

impl StubStore {
    pub fn with(photos: &[(&str, &str)]) -> Self {
        let store = Self::default();
        store.set(photos);
        store
    }

    pub fn set(&self, photos: &[(&str, &str)]) {
        *self.photos.lock().unwrap() = photos
            .iter()
            .map(|(id, url)| ReferencePhoto {
                identity_id: id.to_string(),
                image_url: url.to_string(),
            })
            .collect();
    }
}

#[async_trait]
impl ReferenceStore for StubStore {
    async fn list(&self) -> Result<Vec<ReferencePhoto>, FetchError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Transport {
                url: "stub://references".into(),
                message: "connection refused".into(),
            });
        }
        Ok(self.photos.lock().unwrap().clone())
    }
}

/// Returns a blank image for any URL except those containing "missing".
pub struct StubFetcher;

#[async_trait]
impl ImageFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<RgbImage, FetchError> {
        if url.contains("missing") {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            });
        }
        Ok(RgbImage::from_pixel(2, 2, Rgb([200, 180, 160])))
    }
}
