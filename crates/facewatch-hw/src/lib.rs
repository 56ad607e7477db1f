//! facewatch-hw: Video source abstraction.
//!
//! Provides V4L2-based camera access and conversion of raw capture buffers
//! into RGB still frames.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, CameraSource, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
pub use source::FrameSource;
