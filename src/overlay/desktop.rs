use std::sync::Arc;

use image::RgbaImage;

use super::{Feedback, OverlayFactory, OverlaySurface};
use crate::capture::{Desktop, Point, Rectangle};
use crate::error::{CaptureError, Result};

/// Transparent overlay that keeps no pixels of its own.
///
/// It tracks its bounds and the feedback last drawn on it, and reads pixels
/// back by grabbing the outlined selection from the desktop beneath it.
pub struct DesktopOverlay {
    desktop: Arc<dyn Desktop>,
    bounds: Rectangle,
    feedback: Feedback,
    visible: bool,
    closed: bool,
}

impl DesktopOverlay {
    pub fn new(desktop: Arc<dyn Desktop>) -> Self {
        Self {
            desktop,
            bounds: Rectangle::default(),
            feedback: Feedback::Cleared,
            visible: false,
            closed: false,
        }
    }

    pub fn feedback(&self) -> Feedback {
        self.feedback
    }
}

impl OverlaySurface for DesktopOverlay {
    fn set_bounds(&mut self, bounds: Rectangle) {
        self.bounds = bounds;
    }

    fn bounds(&self) -> Rectangle {
        self.bounds
    }

    fn show(&mut self) -> Result<()> {
        if self.closed {
            return Err(CaptureError::Overlay("overlay already closed".into()));
        }
        if self.bounds.is_empty() {
            return Err(CaptureError::Overlay("overlay bounds have zero area".into()));
        }
        self.visible = true;
        tracing::trace!(bounds = ?self.bounds, "overlay shown");
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.visible = false;
        self.feedback = Feedback::Cleared;
        tracing::trace!(bounds = ?self.bounds, "overlay closed");
    }

    fn hit_test(&self, point: Point) -> bool {
        self.visible && self.bounds.contains(point)
    }

    fn draw(&mut self, current: Point, anchor: Option<Point>, dragging: bool) {
        self.feedback = match anchor {
            Some(anchor) if dragging => Feedback::Selection(Rectangle::from_corners(anchor, current)),
            _ => Feedback::Crosshair(current),
        };
    }

    fn clear_drawing(&mut self) {
        self.feedback = Feedback::Cleared;
    }

    fn selection(&self) -> Option<Rectangle> {
        match self.feedback {
            Feedback::Selection(rect) => Some(rect),
            _ => None,
        }
    }

    fn capture_image(&mut self) -> Result<RgbaImage> {
        let region = self
            .selection()
            .ok_or_else(|| CaptureError::Overlay("nothing selected".into()))?;

        if region.is_empty() {
            return Ok(RgbaImage::new(1, 1));
        }

        self.desktop.grab(region)
    }
}

impl Drop for DesktopOverlay {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct DesktopOverlayFactory {
    desktop: Arc<dyn Desktop>,
}

impl DesktopOverlayFactory {
    pub fn new(desktop: Arc<dyn Desktop>) -> Self {
        Self { desktop }
    }
}

impl OverlayFactory for DesktopOverlayFactory {
    fn create(&mut self) -> Result<Box<dyn OverlaySurface>> {
        Ok(Box::new(DesktopOverlay::new(Arc::clone(&self.desktop))))
    }
}
