//! The interactive capture state machine.
//!
//! ```text
//! Idle --start--> Selecting --press inside--> Dragging --release--> Capturing --grab--> Idle
//!                     |                          |        \-------> VideoRecording --finished--> Idle
//!                     +-----------Escape---------+--> Idle
//! ```
//!
//! Every exit from Selecting/Dragging closes the overlays, detaches the mouse
//! stream and restores the cursor, whichever path it takes. Input handling
//! never reads pixels: stills are taken by a [`PendingCapture`] that the host
//! runs outside the coordinator, then hands back through
//! [`CaptureCoordinator::finish_capture`].

use std::mem;
use std::sync::mpsc::{channel, Receiver, TryRecvError};
use std::sync::Arc;

use image::RgbaImage;
use uuid::Uuid;

use crate::capture::{virtual_screen, CaptureResult, Desktop, Point, Rectangle};
use crate::error::{CaptureError, Result};
use crate::hotkeys::{HotkeyAction, HotkeyBindings};
use crate::input::{InputEvent, MouseControl, Propagation};
use crate::overlay::{OverlayFactory, OverlaySet};
use crate::recording::{VideoBackend, VideoCaptureSession};

pub type CaptureHandler = Box<dyn FnMut(CaptureResult) + Send>;
pub type KeyPressHandler = Box<dyn FnMut(char) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Selecting,
    Dragging,
    /// A still is waiting to be grabbed.
    Capturing,
    VideoRecording,
}

impl CaptureState {
    pub fn display_name(&self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::Selecting => "selecting",
            CaptureState::Dragging => "dragging",
            CaptureState::Capturing => "capturing",
            CaptureState::VideoRecording => "recording",
        }
    }
}

enum CaptureSource {
    /// The overlay the selection was released on, still open.
    Selection(OverlaySet),
    FullScreen,
    Monitor(u32),
}

/// A still capture decided by the coordinator but not yet taken.
///
/// Running it reads pixels, so it is done off the input thread and without
/// holding the coordinator. Dropping it closes any overlay it still holds.
pub struct PendingCapture {
    desktop: Arc<dyn Desktop>,
    source: CaptureSource,
    suspend_display: bool,
}

impl PendingCapture {
    pub fn run(mut self) -> Result<CaptureResult> {
        let image = match &mut self.source {
            CaptureSource::Selection(overlays) => {
                let overlay = overlays
                    .first_mut()
                    .ok_or_else(|| CaptureError::Overlay("selection overlay missing".into()))?;
                let image = overlay.capture_image();
                overlays.close_all();
                image?
            }
            CaptureSource::FullScreen => {
                let region = virtual_screen(&self.desktop.monitors()?)?;
                tracing::debug!(?region, "capturing virtual screen");
                self.desktop.grab(region)?
            }
            CaptureSource::Monitor(id) => {
                let bounds = monitor_bounds(self.desktop.as_ref(), *id)?;
                self.desktop.grab(bounds)?
            }
        };
        Ok(CaptureResult::still(image, self.suspend_display))
    }
}

fn monitor_bounds(desktop: &dyn Desktop, monitor_id: u32) -> Result<Rectangle> {
    desktop
        .monitors()?
        .into_iter()
        .find(|m| m.id == monitor_id)
        .map(|m| m.bounds)
        .ok_or(CaptureError::MonitorNotFound(monitor_id))
}

struct ActiveRecording {
    id: Uuid,
    session: Box<dyn VideoCaptureSession>,
    finished: Receiver<Vec<RgbaImage>>,
}

enum Phase {
    Idle,
    /// Overlays are on screen; `anchor` is the drag start while the primary
    /// button is held.
    Selecting {
        overlays: OverlaySet,
        anchor: Option<Point>,
    },
    /// `None` once the pending capture has been handed out.
    Capturing(Option<PendingCapture>),
    Recording(ActiveRecording),
}

pub struct CaptureCoordinator {
    desktop: Arc<dyn Desktop>,
    overlay_factory: Box<dyn OverlayFactory>,
    video: Box<dyn VideoBackend>,
    mouse: Box<dyn MouseControl>,
    bindings: HotkeyBindings,
    capture_video: bool,
    hide_cursor: bool,
    mouse_attached: bool,
    cursor_hidden: bool,
    phase: Phase,
    on_captured: Option<CaptureHandler>,
    on_key_press: Option<KeyPressHandler>,
}

impl CaptureCoordinator {
    pub fn new(
        desktop: Arc<dyn Desktop>,
        overlay_factory: Box<dyn OverlayFactory>,
        video: Box<dyn VideoBackend>,
        mouse: Box<dyn MouseControl>,
    ) -> Self {
        Self {
            desktop,
            overlay_factory,
            video,
            mouse,
            bindings: HotkeyBindings::default(),
            capture_video: false,
            hide_cursor: true,
            mouse_attached: false,
            cursor_hidden: false,
            phase: Phase::Idle,
            on_captured: None,
            on_key_press: None,
        }
    }

    pub fn with_bindings(mut self, bindings: HotkeyBindings) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn with_hide_cursor(mut self, hide_cursor: bool) -> Self {
        self.hide_cursor = hide_cursor;
        self
    }

    /// Registers the receiver of completed captures, replacing any previous one.
    pub fn subscribe(&mut self, handler: CaptureHandler) {
        self.on_captured = Some(handler);
    }

    pub fn unsubscribe(&mut self) {
        self.on_captured = None;
    }

    pub fn on_key_press(&mut self, handler: KeyPressHandler) {
        self.on_key_press = Some(handler);
    }

    pub fn set_capture_video(&mut self, capture_video: bool) {
        self.capture_video = capture_video;
    }

    pub fn state(&self) -> CaptureState {
        match &self.phase {
            Phase::Idle => CaptureState::Idle,
            Phase::Selecting { anchor: None, .. } => CaptureState::Selecting,
            Phase::Selecting { anchor: Some(_), .. } => CaptureState::Dragging,
            Phase::Capturing(_) => CaptureState::Capturing,
            Phase::Recording(_) => CaptureState::VideoRecording,
        }
    }

    pub fn overlay_count(&self) -> usize {
        match &self.phase {
            Phase::Selecting { overlays, .. } => overlays.len(),
            _ => 0,
        }
    }

    pub fn drag_anchor(&self) -> Option<Point> {
        match &self.phase {
            Phase::Selecting { anchor, .. } => *anchor,
            _ => None,
        }
    }

    /// Feeds one input event through the state machine.
    pub fn handle_input(&mut self, event: InputEvent) -> Result<Propagation> {
        match event {
            InputEvent::KeyDown { code, modifiers } => {
                if let Some(action) = self.bindings.resolve(code, modifiers) {
                    self.on_hotkey(action)?;
                }
                Ok(Propagation::Continue)
            }
            InputEvent::KeyPress(c) => {
                if let Some(handler) = self.on_key_press.as_mut() {
                    handler(c);
                }
                Ok(Propagation::Continue)
            }
            InputEvent::MouseMove(point) => {
                self.on_mouse_move(point);
                Ok(Propagation::Continue)
            }
            InputEvent::PrimaryDown(point) => Ok(self.on_primary_down(point)),
            InputEvent::PrimaryUp(point) => {
                self.on_primary_up(point)?;
                Ok(Propagation::Continue)
            }
        }
    }

    fn on_hotkey(&mut self, action: HotkeyAction) -> Result<()> {
        let state = self.state();
        match (action, state) {
            (HotkeyAction::StartSelection, CaptureState::Idle) => self.start_selection(),
            (HotkeyAction::FullScreen, CaptureState::Idle) => {
                self.phase = Phase::Capturing(Some(self.pending(CaptureSource::FullScreen, true)));
                tracing::debug!("full screen capture queued");
                Ok(())
            }
            (HotkeyAction::Cancel, CaptureState::Selecting | CaptureState::Dragging) => {
                self.cancel_selection();
                Ok(())
            }
            (HotkeyAction::Cancel, CaptureState::VideoRecording) => {
                self.stop_recording();
                Ok(())
            }
            (action, state) => {
                tracing::debug!(
                    "ignoring {} while {}",
                    action.display_name(),
                    state.display_name()
                );
                Ok(())
            }
        }
    }

    fn pending(&self, source: CaptureSource, suspend_display: bool) -> PendingCapture {
        PendingCapture {
            desktop: Arc::clone(&self.desktop),
            source,
            suspend_display,
        }
    }

    /// Shows one overlay per monitor and starts tracking the mouse.
    ///
    /// With no monitors connected this does nothing and stays idle.
    pub fn start_selection(&mut self) -> Result<()> {
        self.ensure_idle()?;

        let monitors = self.desktop.monitors()?;
        if monitors.is_empty() {
            tracing::debug!("no monitors, selection not started");
            return Ok(());
        }

        // Dropping a partially built set closes whatever was already shown.
        let mut overlays = OverlaySet::new();
        for monitor in &monitors {
            let mut overlay = self.overlay_factory.create()?;
            overlay.set_bounds(monitor.work_area);
            overlay.show()?;
            overlays.push(overlay);
        }

        self.mouse.attach()?;
        self.mouse_attached = true;
        if self.hide_cursor {
            self.desktop.set_cursor_visible(false);
            self.cursor_hidden = true;
        }

        tracing::debug!(overlays = overlays.len(), "selection started");
        self.phase = Phase::Selecting {
            overlays,
            anchor: None,
        };
        Ok(())
    }

    /// Closes the overlays of an active selection. Returns whether a
    /// selection was active.
    pub fn cancel_selection(&mut self) -> bool {
        let cancelled = self.end_selection();
        if cancelled {
            tracing::debug!("selection cancelled");
        }
        cancelled
    }

    fn end_selection(&mut self) -> bool {
        let was_selecting = matches!(self.phase, Phase::Selecting { .. });
        if was_selecting {
            if let Phase::Selecting { mut overlays, .. } = mem::replace(&mut self.phase, Phase::Idle) {
                overlays.close_all();
            }
        }
        self.release_input();
        was_selecting
    }

    fn release_input(&mut self) {
        if self.mouse_attached {
            self.mouse.detach();
            self.mouse_attached = false;
        }
        if self.cursor_hidden {
            self.desktop.set_cursor_visible(true);
            self.cursor_hidden = false;
        }
    }

    fn on_mouse_move(&mut self, point: Point) {
        let Phase::Selecting { overlays, anchor } = &mut self.phase else {
            return;
        };
        let dragging = anchor.is_some();
        for overlay in overlays.iter_mut() {
            if dragging || overlay.hit_test(point) {
                overlay.draw(point, *anchor, dragging);
            } else {
                overlay.clear_drawing();
            }
        }
    }

    fn on_primary_down(&mut self, point: Point) -> Propagation {
        match &mut self.phase {
            Phase::Selecting { overlays, anchor } if anchor.is_none() && overlays.any_hit(point) => {
                *anchor = Some(point);
                tracing::trace!(?point, "drag started");
                Propagation::Consume
            }
            _ => Propagation::Continue,
        }
    }

    fn on_primary_up(&mut self, point: Point) -> Result<()> {
        if !matches!(self.phase, Phase::Selecting { anchor: Some(_), .. }) {
            return Ok(());
        }
        let Phase::Selecting {
            mut overlays,
            anchor: Some(anchor),
        } = mem::replace(&mut self.phase, Phase::Idle)
        else {
            return Ok(());
        };

        overlays.keep_first_hit(point);
        self.release_input();
        let Some(overlay) = overlays.first_mut() else {
            tracing::debug!(?point, "released outside every overlay");
            return Ok(());
        };
        overlay.draw(point, Some(anchor), true);

        if self.capture_video {
            let region = overlay
                .selection()
                .unwrap_or_else(|| Rectangle::from_corners(anchor, point));
            overlays.close_all();
            self.start_recording(region)
        } else {
            // The released-on overlay stays open until its pixels are read.
            self.phase = Phase::Capturing(Some(self.pending(CaptureSource::Selection(overlays), false)));
            tracing::debug!("selection capture queued");
            Ok(())
        }
    }

    /// Hands out the queued still capture, if any. The coordinator stays in
    /// Capturing until [`CaptureCoordinator::finish_capture`].
    pub fn take_pending_capture(&mut self) -> Option<PendingCapture> {
        match &mut self.phase {
            Phase::Capturing(pending) => pending.take(),
            _ => None,
        }
    }

    /// Accepts the outcome of a capture handed out earlier and emits it.
    pub fn finish_capture(&mut self, outcome: Result<CaptureResult>) -> Result<()> {
        if !matches!(self.phase, Phase::Capturing(_)) {
            tracing::debug!("capture finished after shutdown, discarded");
            return Ok(());
        }
        self.phase = Phase::Idle;
        self.emit(outcome?)
    }

    /// Starts a full virtual-screen capture for the caller to run.
    pub fn begin_full_screen_capture(&mut self, suspend_display: bool) -> Result<PendingCapture> {
        self.begin_capture(CaptureSource::FullScreen, suspend_display)
    }

    /// Starts a single-monitor capture for the caller to run.
    pub fn begin_monitor_capture(
        &mut self,
        monitor_id: u32,
        suspend_display: bool,
    ) -> Result<PendingCapture> {
        self.begin_capture(CaptureSource::Monitor(monitor_id), suspend_display)
    }

    fn begin_capture(
        &mut self,
        source: CaptureSource,
        suspend_display: bool,
    ) -> Result<PendingCapture> {
        self.ensure_idle()?;
        self.phase = Phase::Capturing(None);
        Ok(self.pending(source, suspend_display))
    }

    /// Grabs every monitor as one image spanning the whole virtual screen,
    /// on the calling thread.
    pub fn capture_full_screen(&mut self, suspend_display: bool) -> Result<()> {
        let pending = self.begin_full_screen_capture(suspend_display)?;
        self.finish_capture(pending.run())
    }

    pub fn capture_monitor(&mut self, monitor_id: u32, suspend_display: bool) -> Result<()> {
        let pending = self.begin_monitor_capture(monitor_id, suspend_display)?;
        self.finish_capture(pending.run())
    }

    pub fn capture_monitor_video(&mut self, monitor_id: u32) -> Result<()> {
        self.ensure_idle()?;
        let bounds = monitor_bounds(self.desktop.as_ref(), monitor_id)?;
        self.start_recording(bounds)
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.phase {
            Phase::Idle => Ok(()),
            _ => Err(CaptureError::Busy(self.state().display_name())),
        }
    }

    fn start_recording(&mut self, region: Rectangle) -> Result<()> {
        let mut session = self.video.create_session()?;
        session.set_region(region);
        let (tx, rx) = channel();
        session.start(tx)?;

        let id = Uuid::new_v4();
        tracing::info!(%id, ?region, "video recording started");
        self.phase = Phase::Recording(ActiveRecording {
            id,
            session,
            finished: rx,
        });
        Ok(())
    }

    /// Asks the active recording to stop. Its frames arrive through
    /// [`CaptureCoordinator::poll_recording`].
    pub fn stop_recording(&mut self) -> bool {
        match &mut self.phase {
            Phase::Recording(recording) => {
                tracing::debug!(id = %recording.id, "stopping recording");
                recording.session.stop();
                true
            }
            _ => false,
        }
    }

    /// Consumes the active recording's completion, if it has arrived, and
    /// emits its frames. Returns whether a recording finished.
    pub fn poll_recording(&mut self) -> Result<bool> {
        let Phase::Recording(recording) = &self.phase else {
            return Ok(false);
        };
        let frames = match recording.finished.try_recv() {
            Ok(frames) => Ok(frames),
            Err(TryRecvError::Empty) => return Ok(false),
            Err(TryRecvError::Disconnected) => Err(CaptureError::Recording(
                "session ended without delivering frames".into(),
            )),
        };

        // The session is released before the result goes out.
        if let Phase::Recording(recording) = mem::replace(&mut self.phase, Phase::Idle) {
            tracing::debug!(id = %recording.id, "recording session released");
            drop(recording);
        }

        let frames = frames?;
        if frames.is_empty() {
            return Err(CaptureError::Recording("no frames captured".into()));
        }
        self.emit(CaptureResult::frames(frames))?;
        Ok(true)
    }

    /// Runs a queued still capture on the calling thread, then checks the
    /// recording. Returns whether a result was emitted.
    pub fn poll(&mut self) -> Result<bool> {
        if let Some(pending) = self.take_pending_capture() {
            self.finish_capture(pending.run())?;
            return Ok(true);
        }
        self.poll_recording()
    }

    fn emit(&mut self, result: CaptureResult) -> Result<()> {
        let handler = self.on_captured.as_mut().ok_or(CaptureError::NoSubscriber)?;
        tracing::info!(
            images = result.images.len(),
            video = result.is_video(),
            suspend_display = result.suspend_display,
            "capture completed"
        );
        handler(result);
        Ok(())
    }

    /// Releases overlays, input, a queued capture and any recording. Safe to
    /// call repeatedly; an active recording is dropped without waiting for
    /// its frames.
    pub fn shutdown(&mut self) {
        self.end_selection();
        match mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Recording(recording) => {
                tracing::debug!(id = %recording.id, "recording released at shutdown");
            }
            Phase::Capturing(Some(_)) => tracing::debug!("queued capture dropped at shutdown"),
            _ => {}
        }
    }
}

impl Drop for CaptureCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::MonitorInfo;
    use crate::overlay::{Feedback, OverlaySurface};
    use crate::recording::FinishedSender;
    use global_hotkey::hotkey::{Code, Modifiers};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Calls {
        monitors: Vec<MonitorInfo>,
        feedback: Vec<Feedback>,
        open_overlays: usize,
        closes: usize,
        captured_by: Vec<usize>,
        fail_overlay_at: Option<usize>,
        fail_capture: bool,
        fail_session_start: bool,
        grabs: Vec<Rectangle>,
        cursor_visible: bool,
        mouse_attached: bool,
        sessions: Vec<Rectangle>,
        finished: Option<FinishedSender>,
        stops: usize,
        results: Vec<CaptureResult>,
        key_presses: Vec<char>,
    }

    type Shared = Arc<Mutex<Calls>>;

    struct FakeDesktop(Shared);

    impl Desktop for FakeDesktop {
        fn monitors(&self) -> Result<Vec<MonitorInfo>> {
            Ok(self.0.lock().unwrap().monitors.clone())
        }

        fn grab(&self, region: Rectangle) -> Result<RgbaImage> {
            self.0.lock().unwrap().grabs.push(region);
            Ok(RgbaImage::new(region.width.max(1), region.height.max(1)))
        }

        fn set_cursor_visible(&self, visible: bool) {
            self.0.lock().unwrap().cursor_visible = visible;
        }
    }

    struct FakeOverlay {
        index: usize,
        bounds: Rectangle,
        closed: bool,
        calls: Shared,
    }

    impl FakeOverlay {
        fn set_feedback(&self, feedback: Feedback) {
            self.calls.lock().unwrap().feedback[self.index] = feedback;
        }
    }

    impl OverlaySurface for FakeOverlay {
        fn set_bounds(&mut self, bounds: Rectangle) {
            self.bounds = bounds;
        }

        fn bounds(&self) -> Rectangle {
            self.bounds
        }

        fn show(&mut self) -> Result<()> {
            self.calls.lock().unwrap().open_overlays += 1;
            Ok(())
        }

        fn close(&mut self) {
            if self.closed {
                return;
            }
            self.closed = true;
            let mut calls = self.calls.lock().unwrap();
            calls.open_overlays -= 1;
            calls.closes += 1;
        }

        fn draw(&mut self, current: Point, anchor: Option<Point>, dragging: bool) {
            let feedback = match anchor {
                Some(anchor) if dragging => {
                    Feedback::Selection(Rectangle::from_corners(anchor, current))
                }
                _ => Feedback::Crosshair(current),
            };
            self.set_feedback(feedback);
        }

        fn clear_drawing(&mut self) {
            self.set_feedback(Feedback::Cleared);
        }

        fn selection(&self) -> Option<Rectangle> {
            match self.calls.lock().unwrap().feedback[self.index] {
                Feedback::Selection(rect) => Some(rect),
                _ => None,
            }
        }

        fn capture_image(&mut self) -> Result<RgbaImage> {
            if self.calls.lock().unwrap().fail_capture {
                return Err(CaptureError::Grab("surface lost".into()));
            }
            let rect = self
                .selection()
                .ok_or_else(|| CaptureError::Overlay("nothing selected".into()))?;
            self.calls.lock().unwrap().captured_by.push(self.index);
            Ok(RgbaImage::new(rect.width.max(1), rect.height.max(1)))
        }
    }

    struct FakeOverlayFactory(Shared);

    impl OverlayFactory for FakeOverlayFactory {
        fn create(&mut self) -> Result<Box<dyn OverlaySurface>> {
            let mut calls = self.0.lock().unwrap();
            let index = calls.feedback.len();
            if calls.fail_overlay_at == Some(index) {
                return Err(CaptureError::Overlay("window creation failed".into()));
            }
            calls.feedback.push(Feedback::Cleared);
            Ok(Box::new(FakeOverlay {
                index,
                bounds: Rectangle::default(),
                closed: false,
                calls: Arc::clone(&self.0),
            }))
        }
    }

    struct FakeSession {
        region: Option<Rectangle>,
        calls: Shared,
    }

    impl VideoCaptureSession for FakeSession {
        fn set_region(&mut self, region: Rectangle) {
            self.region = Some(region);
        }

        fn start(&mut self, finished: FinishedSender) -> Result<()> {
            let region = self
                .region
                .ok_or_else(|| CaptureError::Recording("no region".into()))?;
            let mut calls = self.calls.lock().unwrap();
            if calls.fail_session_start {
                return Err(CaptureError::Recording("encoder unavailable".into()));
            }
            calls.sessions.push(region);
            calls.finished = Some(finished);
            Ok(())
        }

        fn stop(&mut self) {
            self.calls.lock().unwrap().stops += 1;
        }
    }

    struct FakeVideo(Shared);

    impl VideoBackend for FakeVideo {
        fn create_session(&mut self) -> Result<Box<dyn VideoCaptureSession>> {
            Ok(Box::new(FakeSession {
                region: None,
                calls: Arc::clone(&self.0),
            }))
        }
    }

    struct FakeMouse(Shared);

    impl MouseControl for FakeMouse {
        fn attach(&mut self) -> Result<()> {
            self.0.lock().unwrap().mouse_attached = true;
            Ok(())
        }

        fn detach(&mut self) {
            self.0.lock().unwrap().mouse_attached = false;
        }
    }

    fn monitor(id: u32, bounds: Rectangle, work_area: Rectangle) -> MonitorInfo {
        MonitorInfo {
            id,
            name: format!("display-{}", id),
            bounds,
            work_area,
            is_primary: id == 0,
        }
    }

    /// Two 1920x1080 monitors side by side; the first has a 40px taskbar.
    fn dual_monitors() -> Vec<MonitorInfo> {
        vec![
            monitor(0, Rectangle::new(0, 0, 1920, 1080), Rectangle::new(0, 0, 1920, 1040)),
            monitor(
                1,
                Rectangle::new(1920, 0, 1920, 1080),
                Rectangle::new(1920, 0, 1920, 1080),
            ),
        ]
    }

    fn coordinator(monitors: Vec<MonitorInfo>) -> (CaptureCoordinator, Shared) {
        let calls: Shared = Arc::new(Mutex::new(Calls {
            monitors,
            cursor_visible: true,
            ..Default::default()
        }));
        let desktop: Arc<dyn Desktop> = Arc::new(FakeDesktop(Arc::clone(&calls)));
        let mut coordinator = CaptureCoordinator::new(
            desktop,
            Box::new(FakeOverlayFactory(Arc::clone(&calls))),
            Box::new(FakeVideo(Arc::clone(&calls))),
            Box::new(FakeMouse(Arc::clone(&calls))),
        );
        let sink = Arc::clone(&calls);
        coordinator.subscribe(Box::new(move |result| sink.lock().unwrap().results.push(result)));
        (coordinator, calls)
    }

    fn key(code: Code, modifiers: Modifiers) -> InputEvent {
        InputEvent::KeyDown { code, modifiers }
    }

    fn press(c: &mut CaptureCoordinator, event: InputEvent) -> Propagation {
        c.handle_input(event).unwrap()
    }

    fn drag(c: &mut CaptureCoordinator, from: Point, to: Point) {
        press(c, InputEvent::MouseMove(from));
        assert_eq!(press(c, InputEvent::PrimaryDown(from)), Propagation::Consume);
        press(c, InputEvent::MouseMove(to));
        press(c, InputEvent::PrimaryUp(to));
    }

    #[test]
    fn test_start_creates_one_overlay_per_monitor() {
        for count in 0..4u32 {
            let monitors = (0..count)
                .map(|i| {
                    let bounds = Rectangle::new(i as i32 * 1920, 0, 1920, 1080);
                    monitor(i, bounds, bounds)
                })
                .collect();
            let (mut c, calls) = coordinator(monitors);
            c.start_selection().unwrap();

            assert_eq!(c.overlay_count(), count as usize);
            assert_eq!(calls.lock().unwrap().open_overlays, count as usize);
            let expected = if count == 0 {
                CaptureState::Idle
            } else {
                CaptureState::Selecting
            };
            assert_eq!(c.state(), expected);
            assert_eq!(calls.lock().unwrap().mouse_attached, count > 0);
        }
    }

    #[test]
    fn test_overlays_sized_to_work_area() {
        let (mut c, calls) = coordinator(dual_monitors());
        c.start_selection().unwrap();
        assert!(!calls.lock().unwrap().cursor_visible);

        // The taskbar strip of the first monitor is not covered.
        assert_eq!(
            press(&mut c, InputEvent::PrimaryDown(Point::new(10, 1060))),
            Propagation::Continue
        );
        assert_eq!(c.state(), CaptureState::Selecting);
        assert_eq!(
            press(&mut c, InputEvent::PrimaryDown(Point::new(10, 10))),
            Propagation::Consume
        );
        assert_eq!(c.state(), CaptureState::Dragging);
        assert_eq!(c.drag_anchor(), Some(Point::new(10, 10)));
    }

    #[test]
    fn test_still_capture_round_trip() {
        let (mut c, calls) = coordinator(dual_monitors());
        press(&mut c, key(Code::PrintScreen, Modifiers::empty()));
        assert_eq!(c.state(), CaptureState::Selecting);

        drag(&mut c, Point::new(100, 100), Point::new(400, 300));

        // Release only queues the capture; pixels are read on poll.
        assert_eq!(c.state(), CaptureState::Capturing);
        {
            let calls = calls.lock().unwrap();
            assert!(calls.captured_by.is_empty());
            assert!(calls.grabs.is_empty());
            assert!(calls.results.is_empty());
            assert_eq!(calls.open_overlays, 1);
            assert!(!calls.mouse_attached);
            assert!(calls.cursor_visible);
        }
        assert!(matches!(c.start_selection(), Err(CaptureError::Busy(_))));

        assert!(c.poll().unwrap());
        let calls = calls.lock().unwrap();
        assert_eq!(calls.captured_by, vec![0]);
        assert_eq!(calls.results.len(), 1);
        assert_eq!(calls.results[0].images.len(), 1);
        assert_eq!(calls.results[0].images[0].dimensions(), (300, 200));
        assert!(!calls.results[0].suspend_display);
        assert_eq!(calls.open_overlays, 0);
        assert!(!calls.mouse_attached);
        assert!(calls.cursor_visible);
        drop(calls);

        assert_eq!(c.state(), CaptureState::Idle);
        assert_eq!(c.overlay_count(), 0);
        assert_eq!(c.drag_anchor(), None);
    }

    #[test]
    fn test_video_capture_waits_for_completion() {
        let (mut c, calls) = coordinator(dual_monitors());
        c.set_capture_video(true);
        c.start_selection().unwrap();
        drag(&mut c, Point::new(2000, 100), Point::new(2200, 250));

        assert_eq!(c.state(), CaptureState::VideoRecording);
        assert_eq!(c.overlay_count(), 0);
        assert_eq!(calls.lock().unwrap().open_overlays, 0);
        assert!(calls.lock().unwrap().results.is_empty());
        assert_eq!(
            calls.lock().unwrap().sessions,
            vec![Rectangle::new(2000, 100, 200, 150)]
        );
        assert!(!c.poll_recording().unwrap());

        let finished = calls.lock().unwrap().finished.take().unwrap();
        finished
            .send(vec![RgbaImage::new(2, 2), RgbaImage::new(2, 2), RgbaImage::new(2, 2)])
            .unwrap();

        assert!(c.poll_recording().unwrap());
        assert_eq!(c.state(), CaptureState::Idle);
        let calls = calls.lock().unwrap();
        assert_eq!(calls.results.len(), 1);
        assert_eq!(calls.results[0].images.len(), 3);
    }

    #[test]
    fn test_capture_mode_read_at_completion() {
        let (mut c, calls) = coordinator(dual_monitors());
        c.start_selection().unwrap();
        press(&mut c, InputEvent::PrimaryDown(Point::new(10, 10)));
        c.set_capture_video(true);
        press(&mut c, InputEvent::PrimaryUp(Point::new(50, 50)));

        assert_eq!(c.state(), CaptureState::VideoRecording);
        assert!(calls.lock().unwrap().results.is_empty());
    }

    #[test]
    fn test_escape_during_drag_cancels() {
        let (mut c, calls) = coordinator(dual_monitors());
        c.start_selection().unwrap();
        press(&mut c, InputEvent::PrimaryDown(Point::new(10, 10)));
        press(&mut c, InputEvent::MouseMove(Point::new(90, 90)));
        assert_eq!(c.state(), CaptureState::Dragging);

        press(&mut c, key(Code::Escape, Modifiers::empty()));

        assert_eq!(c.state(), CaptureState::Idle);
        assert_eq!(c.drag_anchor(), None);
        let calls = calls.lock().unwrap();
        assert_eq!(calls.open_overlays, 0);
        assert!(calls.results.is_empty());
        assert!(!calls.mouse_attached);
        assert!(calls.cursor_visible);
    }

    #[test]
    fn test_full_screen_hotkey_skips_overlays() {
        let (mut c, calls) = coordinator(dual_monitors());
        press(&mut c, key(Code::PrintScreen, Modifiers::CONTROL));
        assert_eq!(c.state(), CaptureState::Capturing);
        assert!(calls.lock().unwrap().grabs.is_empty());

        assert!(c.poll().unwrap());
        assert_eq!(c.state(), CaptureState::Idle);
        let calls = calls.lock().unwrap();
        assert!(calls.feedback.is_empty());
        assert_eq!(calls.grabs, vec![Rectangle::new(0, 0, 3840, 1080)]);
        assert_eq!(calls.results.len(), 1);
        assert!(calls.results[0].suspend_display);
        assert_eq!(calls.results[0].images[0].dimensions(), (3840, 1080));
    }

    #[test]
    fn test_teardown_twice_is_harmless() {
        let (mut c, calls) = coordinator(dual_monitors());
        c.start_selection().unwrap();
        assert!(c.cancel_selection());
        assert!(!c.cancel_selection());
        c.shutdown();
        c.shutdown();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.open_overlays, 0);
        assert_eq!(calls.closes, 2);
    }

    #[test]
    fn test_hover_shows_crosshair_only() {
        let (mut c, calls) = coordinator(dual_monitors());
        c.start_selection().unwrap();
        press(&mut c, InputEvent::MouseMove(Point::new(100, 100)));

        let calls = calls.lock().unwrap();
        assert_eq!(calls.feedback[0], Feedback::Crosshair(Point::new(100, 100)));
        assert_eq!(calls.feedback[1], Feedback::Cleared);
        assert!(!calls
            .feedback
            .iter()
            .any(|f| matches!(f, Feedback::Selection(_))));
    }

    #[test]
    fn test_drag_draws_on_every_overlay() {
        let (mut c, calls) = coordinator(dual_monitors());
        c.start_selection().unwrap();
        press(&mut c, InputEvent::PrimaryDown(Point::new(1800, 100)));
        press(&mut c, InputEvent::MouseMove(Point::new(2100, 400)));

        let expected = Feedback::Selection(Rectangle::new(1800, 100, 300, 300));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.feedback, vec![expected, expected]);
    }

    #[test]
    fn test_release_outside_overlays_emits_nothing() {
        let (mut c, calls) = coordinator(dual_monitors());
        c.start_selection().unwrap();
        press(&mut c, InputEvent::PrimaryDown(Point::new(10, 10)));
        press(&mut c, InputEvent::PrimaryUp(Point::new(10, 1060)));

        assert_eq!(c.state(), CaptureState::Idle);
        let calls = calls.lock().unwrap();
        assert!(calls.results.is_empty());
        assert_eq!(calls.open_overlays, 0);
        assert!(!calls.mouse_attached);
    }

    #[test]
    fn test_release_without_drag_keeps_selecting() {
        let (mut c, calls) = coordinator(dual_monitors());
        c.start_selection().unwrap();
        press(&mut c, InputEvent::PrimaryUp(Point::new(10, 10)));
        assert_eq!(c.state(), CaptureState::Selecting);
        assert!(calls.lock().unwrap().results.is_empty());
    }

    #[test]
    fn test_release_on_shared_edge_is_deterministic() {
        let (mut c, calls) = coordinator(dual_monitors());
        c.start_selection().unwrap();
        drag(&mut c, Point::new(1800, 100), Point::new(1920, 500));
        c.poll().unwrap();
        assert_eq!(calls.lock().unwrap().captured_by, vec![1]);
    }

    #[test]
    fn test_missing_subscriber_is_reported() {
        let (mut c, _calls) = coordinator(dual_monitors());
        c.unsubscribe();
        assert!(matches!(
            c.capture_full_screen(false),
            Err(CaptureError::NoSubscriber)
        ));
    }

    #[test]
    fn test_key_press_passthrough() {
        let (mut c, calls) = coordinator(dual_monitors());
        let sink = Arc::clone(&calls);
        c.on_key_press(Box::new(move |ch| sink.lock().unwrap().key_presses.push(ch)));
        press(&mut c, InputEvent::KeyPress('x'));
        press(&mut c, InputEvent::KeyPress('y'));
        assert_eq!(calls.lock().unwrap().key_presses, vec!['x', 'y']);
        assert_eq!(c.state(), CaptureState::Idle);
    }

    #[test]
    fn test_capture_monitor_passes_suspend_flag() {
        let (mut c, calls) = coordinator(dual_monitors());
        c.capture_monitor(1, true).unwrap();
        c.capture_monitor(0, false).unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(
            calls.grabs,
            vec![Rectangle::new(1920, 0, 1920, 1080), Rectangle::new(0, 0, 1920, 1080)]
        );
        assert!(calls.results[0].suspend_display);
        assert!(!calls.results[1].suspend_display);
        drop(calls);

        assert!(matches!(
            c.capture_monitor(7, false),
            Err(CaptureError::MonitorNotFound(7))
        ));
    }

    #[test]
    fn test_capture_monitor_video_and_stop() {
        let (mut c, calls) = coordinator(dual_monitors());
        c.capture_monitor_video(0).unwrap();
        assert_eq!(c.state(), CaptureState::VideoRecording);
        assert_eq!(
            calls.lock().unwrap().sessions,
            vec![Rectangle::new(0, 0, 1920, 1080)]
        );

        press(&mut c, key(Code::PrintScreen, Modifiers::empty()));
        assert_eq!(c.state(), CaptureState::VideoRecording);
        assert!(calls.lock().unwrap().feedback.is_empty());
        assert!(matches!(c.start_selection(), Err(CaptureError::Busy(_))));

        press(&mut c, key(Code::Escape, Modifiers::empty()));
        assert_eq!(calls.lock().unwrap().stops, 1);
    }

    #[test]
    fn test_overlay_failure_tears_down() {
        let (mut c, calls) = coordinator(dual_monitors());
        calls.lock().unwrap().fail_overlay_at = Some(1);

        assert!(matches!(c.start_selection(), Err(CaptureError::Overlay(_))));
        assert_eq!(c.state(), CaptureState::Idle);
        let calls = calls.lock().unwrap();
        assert_eq!(calls.open_overlays, 0);
        assert!(!calls.mouse_attached);
        assert!(calls.cursor_visible);
    }

    #[test]
    fn test_session_lost_without_frames() {
        let (mut c, calls) = coordinator(dual_monitors());
        c.capture_monitor_video(1).unwrap();
        drop(calls.lock().unwrap().finished.take());

        assert!(matches!(c.poll_recording(), Err(CaptureError::Recording(_))));
        assert_eq!(c.state(), CaptureState::Idle);
        assert!(calls.lock().unwrap().results.is_empty());
    }

    #[test]
    fn test_shutdown_mid_recording_releases_session() {
        let (mut c, calls) = coordinator(dual_monitors());
        c.capture_monitor_video(0).unwrap();
        c.shutdown();
        assert_eq!(c.state(), CaptureState::Idle);
        assert!(!c.poll_recording().unwrap());
        assert!(calls.lock().unwrap().results.is_empty());
    }

    fn assert_torn_down(c: &CaptureCoordinator, calls: &Shared) {
        assert_eq!(c.state(), CaptureState::Idle);
        let calls = calls.lock().unwrap();
        assert_eq!(calls.open_overlays, 0);
        assert!(!calls.mouse_attached);
        assert!(calls.cursor_visible);
        assert!(calls.results.is_empty());
    }

    #[test]
    fn test_still_capture_failure_tears_down() {
        let (mut c, calls) = coordinator(dual_monitors());
        calls.lock().unwrap().fail_capture = true;
        c.start_selection().unwrap();
        drag(&mut c, Point::new(100, 100), Point::new(400, 300));

        assert!(matches!(c.poll(), Err(CaptureError::Grab(_))));
        assert_torn_down(&c, &calls);
    }

    #[test]
    fn test_session_start_failure_tears_down() {
        let (mut c, calls) = coordinator(dual_monitors());
        calls.lock().unwrap().fail_session_start = true;
        c.set_capture_video(true);
        c.start_selection().unwrap();
        press(&mut c, InputEvent::PrimaryDown(Point::new(100, 100)));

        assert!(matches!(
            c.handle_input(InputEvent::PrimaryUp(Point::new(400, 300))),
            Err(CaptureError::Recording(_))
        ));
        assert_torn_down(&c, &calls);
        assert!(calls.lock().unwrap().sessions.is_empty());
    }

    #[test]
    fn test_shutdown_drops_queued_capture() {
        let (mut c, calls) = coordinator(dual_monitors());
        c.start_selection().unwrap();
        drag(&mut c, Point::new(100, 100), Point::new(400, 300));
        assert_eq!(calls.lock().unwrap().open_overlays, 1);

        c.shutdown();
        assert_torn_down(&c, &calls);
        assert!(!c.poll().unwrap());
    }

    #[test]
    fn test_capture_finished_after_shutdown_is_discarded() {
        let (mut c, calls) = coordinator(dual_monitors());
        let pending = c.begin_full_screen_capture(true).unwrap();
        assert_eq!(c.state(), CaptureState::Capturing);
        assert!(c.take_pending_capture().is_none());

        c.shutdown();
        c.finish_capture(pending.run()).unwrap();
        assert_eq!(c.state(), CaptureState::Idle);
        assert!(calls.lock().unwrap().results.is_empty());
    }

    #[test]
    fn test_escape_with_modifier_still_cancels() {
        let (mut c, calls) = coordinator(dual_monitors());
        c.start_selection().unwrap();
        press(&mut c, key(Code::Escape, Modifiers::SHIFT));
        assert_torn_down(&c, &calls);
    }
}
