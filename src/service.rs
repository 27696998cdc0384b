use std::sync::{Arc, Mutex, MutexGuard};

use crate::coordinator::{CaptureCoordinator, CaptureHandler, CaptureState, PendingCapture};
use crate::error::Result;
use crate::input::{InputListener, MouseControl, Propagation};

/// A running capture helper: the coordinator wired to a live input listener.
///
/// Input is handled on the listener's thread while the host drives
/// [`CaptureService::pump`] from its own loop. Both go through the same lock,
/// so the capture subscriber must not call back into the service. Pixel reads
/// never happen on the listener's thread: a completed selection is queued and
/// grabbed by the next `pump`, with the lock released.
pub struct CaptureService {
    coordinator: Arc<Mutex<CaptureCoordinator>>,
    listener: Box<dyn InputListener>,
}

impl CaptureService {
    /// Builds the coordinator around the listener's mouse handle and starts
    /// listening. Fails if the keyboard hook cannot be installed.
    pub fn start<F>(mut listener: Box<dyn InputListener>, build: F) -> Result<Self>
    where
        F: FnOnce(Box<dyn MouseControl>) -> CaptureCoordinator,
    {
        let coordinator = Arc::new(Mutex::new(build(listener.mouse_control())));

        let shared = Arc::clone(&coordinator);
        listener.start(Box::new(move |event| {
            let mut coordinator = shared.lock().unwrap_or_else(|e| e.into_inner());
            match coordinator.handle_input(event) {
                Ok(propagation) => propagation,
                Err(e) => {
                    tracing::error!("capture failed: {}", e);
                    Propagation::Continue
                }
            }
        }))?;

        tracing::info!("capture service started");
        Ok(Self {
            coordinator,
            listener,
        })
    }

    pub fn coordinator(&self) -> MutexGuard<'_, CaptureCoordinator> {
        self.coordinator.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self, handler: CaptureHandler) {
        self.coordinator().subscribe(handler);
    }

    pub fn state(&self) -> CaptureState {
        self.coordinator().state()
    }

    pub fn overlay_count(&self) -> usize {
        self.coordinator().overlay_count()
    }

    pub fn set_capture_video(&self, capture_video: bool) {
        self.coordinator().set_capture_video(capture_video);
    }

    pub fn start_selection(&self) -> Result<()> {
        self.coordinator().start_selection()
    }

    pub fn cancel_selection(&self) -> bool {
        self.coordinator().cancel_selection()
    }

    pub fn capture_full_screen(&self, suspend_display: bool) -> Result<()> {
        let pending = self.coordinator().begin_full_screen_capture(suspend_display)?;
        self.run_capture(pending)
    }

    pub fn capture_monitor(&self, monitor_id: u32, suspend_display: bool) -> Result<()> {
        let pending = self.coordinator().begin_monitor_capture(monitor_id, suspend_display)?;
        self.run_capture(pending)
    }

    fn run_capture(&self, pending: PendingCapture) -> Result<()> {
        let outcome = pending.run();
        self.coordinator().finish_capture(outcome)
    }

    pub fn capture_monitor_video(&self, monitor_id: u32) -> Result<()> {
        self.coordinator().capture_monitor_video(monitor_id)
    }

    pub fn stop_recording(&self) -> bool {
        self.coordinator().stop_recording()
    }

    /// Grabs a queued selection or delivers a finished recording, whichever
    /// is waiting. Failures are logged and leave the service idle.
    pub fn pump(&self) -> bool {
        let pending = self.coordinator().take_pending_capture();
        if let Some(pending) = pending {
            return match self.run_capture(pending) {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!("capture failed: {}", e);
                    false
                }
            };
        }

        match self.coordinator().poll_recording() {
            Ok(delivered) => delivered,
            Err(e) => {
                tracing::error!("recording failed: {}", e);
                false
            }
        }
    }
}

impl Drop for CaptureService {
    fn drop(&mut self) {
        self.listener.stop();
        self.coordinator().shutdown();
        tracing::info!("capture service stopped");
    }
}
