pub mod camera;
pub mod landmarks;
pub mod rgba_converter;

use crate::types::Frame;

pub use camera::{CameraSource, available_cameras};
pub use landmarks::{HandLandmarker, LandmarkSource, LandmarkerConfig};

#[derive(Debug, thiserror::Error)]
pub enum FrameSourceError {
    #[error("frame source disconnected")]
    Disconnected,
    #[error("failed to read frame: {0}")]
    Read(String),
    #[error("failed to decode frame: {0}")]
    Decode(String),
}

/// Blocking supplier of camera frames. Any error ends the stream.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, FrameSourceError>;
}
