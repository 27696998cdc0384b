use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use image::RgbaImage;

use super::{FinishedSender, RecordingSettings, RecordingState, VideoBackend, VideoCaptureSession};
use crate::capture::{Desktop, Rectangle};
use crate::error::{CaptureError, Result};

const MAX_FRAMES: usize = 18000;
const MAX_FRAME_DIMENSION: u32 = 4096;
const MAX_FRAME_MEMORY_MB: usize = 1024;
const MIN_FRAME_INTERVAL_MS: u64 = 16;

/// Grabs a region from the desktop at a fixed rate on a worker thread.
pub struct FrameRecorder {
    desktop: Arc<dyn Desktop>,
    settings: RecordingSettings,
    state: Arc<Mutex<RecordingState>>,
    stop_signal: Option<Sender<()>>,
    region: Option<Rectangle>,
}

impl FrameRecorder {
    pub fn new(desktop: Arc<dyn Desktop>, settings: RecordingSettings) -> Self {
        Self {
            desktop,
            settings,
            state: Arc::new(Mutex::new(RecordingState::Idle)),
            stop_signal: None,
            region: None,
        }
    }

    pub fn state(&self) -> RecordingState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl VideoCaptureSession for FrameRecorder {
    fn set_region(&mut self, region: Rectangle) {
        self.region = Some(region);
    }

    fn start(&mut self, finished: FinishedSender) -> Result<()> {
        let region = self
            .region
            .ok_or_else(|| CaptureError::Recording("no region set".into()))?;
        if region.is_empty() {
            return Err(CaptureError::InvalidRegion("recording region has zero area".into()));
        }
        if region.width > MAX_FRAME_DIMENSION || region.height > MAX_FRAME_DIMENSION {
            return Err(CaptureError::InvalidRegion("recording region exceeds frame limit".into()));
        }

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != RecordingState::Idle {
                return Err(CaptureError::Recording("session already started".into()));
            }
            *state = RecordingState::Recording;
        }

        let (tx, rx): (Sender<()>, Receiver<()>) = channel();
        self.stop_signal = Some(tx);

        let state = Arc::clone(&self.state);
        let desktop = Arc::clone(&self.desktop);
        let fps = self.settings.fps.max(1);
        let max_duration = self.settings.max_duration;

        thread::Builder::new()
            .name("frame-recorder".into())
            .spawn(move || {
                let frames = collect_frames(desktop.as_ref(), region, fps, max_duration, &rx);
                *state.lock().unwrap_or_else(|e| e.into_inner()) = RecordingState::Finished;
                tracing::debug!(frames = frames.len(), "recording finished");
                if finished.send(frames).is_err() {
                    tracing::debug!("recording finished after its session was released");
                }
            })?;

        tracing::debug!(?region, fps, "recording started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_signal.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for FrameRecorder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn collect_frames(
    desktop: &dyn Desktop,
    region: Rectangle,
    fps: u32,
    max_duration: Duration,
    stop: &Receiver<()>,
) -> Vec<RgbaImage> {
    let min_frame_duration = Duration::from_millis(MIN_FRAME_INTERVAL_MS);
    let frame_duration = Duration::from_secs_f64(1.0 / fps as f64).max(min_frame_duration);
    let start_time = Instant::now();
    let max_memory = MAX_FRAME_MEMORY_MB * 1024 * 1024;
    let mut total_memory: usize = 0;
    let mut frames = Vec::new();

    loop {
        // A dropped sender means the session was released; stop as well.
        match stop.try_recv() {
            Ok(()) | Err(std::sync::mpsc::TryRecvError::Disconnected) => break,
            Err(std::sync::mpsc::TryRecvError::Empty) => {}
        }
        if start_time.elapsed() >= max_duration {
            break;
        }

        let frame_start = Instant::now();

        match desktop.grab(region) {
            Ok(image) => {
                let frame_size = (image.width() as usize)
                    .saturating_mul(image.height() as usize)
                    .saturating_mul(4);
                if frames.len() >= MAX_FRAMES || total_memory.saturating_add(frame_size) > max_memory {
                    tracing::warn!(frames = frames.len(), "recording limit reached");
                    break;
                }
                total_memory = total_memory.saturating_add(frame_size);
                frames.push(image);
            }
            Err(e) => tracing::warn!("frame grab failed: {}", e),
        }

        let elapsed = frame_start.elapsed();
        if elapsed < frame_duration {
            thread::sleep(frame_duration - elapsed);
        }
    }

    frames
}

pub struct FrameRecorderBackend {
    desktop: Arc<dyn Desktop>,
    settings: RecordingSettings,
}

impl FrameRecorderBackend {
    pub fn new(desktop: Arc<dyn Desktop>, settings: RecordingSettings) -> Self {
        Self { desktop, settings }
    }
}

impl VideoBackend for FrameRecorderBackend {
    fn create_session(&mut self) -> Result<Box<dyn VideoCaptureSession>> {
        Ok(Box::new(FrameRecorder::new(
            Arc::clone(&self.desktop),
            self.settings.clone(),
        )))
    }
}
