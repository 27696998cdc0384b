mod frame_recorder;

pub use frame_recorder::{FrameRecorder, FrameRecorderBackend};

use std::sync::mpsc::Sender;
use std::time::Duration;

use image::RgbaImage;

use crate::capture::Rectangle;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
    Finished,
}

#[derive(Debug, Clone)]
pub struct RecordingSettings {
    pub fps: u32,
    pub max_duration: Duration,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            fps: 15,
            max_duration: Duration::from_secs(30),
        }
    }
}

/// Receives the recorded frames exactly once, when the session finishes.
pub type FinishedSender = Sender<Vec<RgbaImage>>;

/// A continuous grab of one screen region.
///
/// Dropping the session releases it without waiting for the frames.
pub trait VideoCaptureSession: Send {
    fn set_region(&mut self, region: Rectangle);

    /// Begins collecting frames in the background. `finished` gets the frame
    /// sequence once collection stops.
    fn start(&mut self, finished: FinishedSender) -> Result<()>;

    /// Asks the session to stop collecting. Safe to call more than once.
    fn stop(&mut self);
}

pub trait VideoBackend: Send {
    fn create_session(&mut self) -> Result<Box<dyn VideoCaptureSession>>;
}
