//! Face model provider capability.
//!
//! The engine never runs a face model itself; it asks a provider for a cheap
//! presence check and for a full detection with descriptor.

use crate::types::DetectedFace;
use async_trait::async_trait;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("face model unreachable: {0}")]
    Unreachable(String),
    #[error("face model rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("malformed face model response: {0}")]
    Malformed(String),
    #[error("image encoding failed: {0}")]
    Encode(String),
}

/// Detects faces and produces descriptors for still images.
///
/// Both calls may suspend for an unbounded time; callers must not assume a
/// latency bound.
#[async_trait]
pub trait FaceModel: Send + Sync {
    /// Lightweight check: is there any face in the image?
    async fn detect_existence(&self, image: &RgbImage) -> Result<bool, ProviderError>;

    /// Full-accuracy pass: the most confident face with its descriptor, or
    /// `None` when no face is found.
    async fn detect_and_describe(
        &self,
        image: &RgbImage,
    ) -> Result<Option<DetectedFace>, ProviderError>;
}
