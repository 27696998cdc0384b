mod desktop;

pub use desktop::{DesktopOverlay, DesktopOverlayFactory};

use image::RgbaImage;

use crate::capture::{Point, Rectangle};
use crate::error::Result;

/// What an overlay currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Feedback {
    #[default]
    Cleared,
    /// Cursor hovering without a drag.
    Crosshair(Point),
    /// Rectangle from the drag anchor to the cursor.
    Selection(Rectangle),
}

/// A transparent, topmost surface pinned to one monitor's work area.
pub trait OverlaySurface: Send {
    fn set_bounds(&mut self, bounds: Rectangle);

    fn bounds(&self) -> Rectangle;

    fn show(&mut self) -> Result<()>;

    /// Closes and releases the surface. Must tolerate repeated calls.
    fn close(&mut self);

    fn hit_test(&self, point: Point) -> bool {
        self.bounds().contains(point)
    }

    /// Renders feedback for the cursor at `current`. With `anchor` and
    /// `dragging`, a selection rectangle from anchor to current; otherwise
    /// a crosshair.
    fn draw(&mut self, current: Point, anchor: Option<Point>, dragging: bool);

    fn clear_drawing(&mut self);

    /// The rectangle outlined by the last draw, if any.
    fn selection(&self) -> Option<Rectangle>;

    /// Reads back the pixels enclosed by the last drawn selection.
    fn capture_image(&mut self) -> Result<RgbaImage>;
}

pub trait OverlayFactory: Send {
    fn create(&mut self) -> Result<Box<dyn OverlaySurface>>;
}

/// Overlays of one selection session, in monitor enumeration order.
///
/// Every overlay is closed on [`OverlaySet::close_all`] or on drop,
/// whichever comes first.
#[derive(Default)]
pub struct OverlaySet {
    overlays: Vec<Box<dyn OverlaySurface>>,
}

impl OverlaySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, overlay: Box<dyn OverlaySurface>) {
        self.overlays.push(overlay);
    }

    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn OverlaySurface>> {
        self.overlays.iter_mut()
    }

    /// First overlay, in enumeration order, containing `point`.
    pub fn first_hit(&mut self, point: Point) -> Option<&mut Box<dyn OverlaySurface>> {
        self.overlays.iter_mut().find(|o| o.hit_test(point))
    }

    /// Closes every overlay except the first one containing `point`.
    /// Returns whether such an overlay was found.
    pub fn keep_first_hit(&mut self, point: Point) -> bool {
        let Some(index) = self.overlays.iter().position(|o| o.hit_test(point)) else {
            self.close_all();
            return false;
        };
        let kept = self.overlays.remove(index);
        self.close_all();
        self.overlays.push(kept);
        true
    }

    pub fn first_mut(&mut self) -> Option<&mut Box<dyn OverlaySurface>> {
        self.overlays.first_mut()
    }

    pub fn any_hit(&self, point: Point) -> bool {
        self.overlays.iter().any(|o| o.hit_test(point))
    }

    pub fn close_all(&mut self) {
        for mut overlay in self.overlays.drain(..) {
            overlay.close();
        }
    }
}

impl Drop for OverlaySet {
    fn drop(&mut self) {
        self.close_all();
    }
}
