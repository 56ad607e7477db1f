use crate::camera::CameraError;
use crate::frame::Frame;
use async_trait::async_trait;

/// Anything that can hand out the current frame of a live feed as a still.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture(&self) -> Result<Frame, CameraError>;
}
