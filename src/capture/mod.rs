mod screen;

pub use screen::XcapDesktop;

use image::RgbaImage;

use crate::error::{CaptureError, Result};

/// Source of monitor geometry and screen pixels.
///
/// Implementations are shared between the coordinator and recording workers,
/// so they must be usable from any thread.
pub trait Desktop: Send + Sync {
    /// Lists every connected monitor in enumeration order.
    fn monitors(&self) -> Result<Vec<MonitorInfo>>;

    /// Grabs the pixels inside `region`, given in virtual-screen coordinates.
    fn grab(&self, region: Rectangle) -> Result<RgbaImage>;

    fn set_cursor_visible(&self, visible: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rectangle {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Builds the rectangle spanned by two corners in any order.
    pub fn from_corners(a: Point, b: Point) -> Self {
        let x = a.x.min(b.x);
        let y = a.y.min(b.y);
        let width = (a.x - b.x).unsigned_abs();
        let height = (a.y - b.y).unsigned_abs();
        Self { x, y, width, height }
    }

    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width as i32)
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height as i32)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Half-open containment: the right and bottom edges belong to the
    /// neighbouring rectangle, so a point on a shared monitor edge is inside
    /// exactly one of them.
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x && point.x < self.right() && point.y >= self.y && point.y < self.bottom()
    }

    pub fn intersection(&self, other: &Rectangle) -> Option<Rectangle> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return None;
        }
        Some(Rectangle::new(left, top, (right - left) as u32, (bottom - top) as u32))
    }

    /// Smallest rectangle covering every input, from the top-left-most to the
    /// bottom-right-most point.
    pub fn union_all<I: IntoIterator<Item = Rectangle>>(rects: I) -> Option<Rectangle> {
        let mut iter = rects.into_iter();
        let first = iter.next()?;
        let (mut left, mut top, mut right, mut bottom) =
            (first.x, first.y, first.right(), first.bottom());
        for r in iter {
            left = left.min(r.x);
            top = top.min(r.y);
            right = right.max(r.right());
            bottom = bottom.max(r.bottom());
        }
        Some(Rectangle::new(
            left,
            top,
            right.saturating_sub(left) as u32,
            bottom.saturating_sub(top) as u32,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorInfo {
    pub id: u32,
    pub name: String,
    /// Full monitor bounds.
    pub bounds: Rectangle,
    /// Usable bounds excluding taskbars and docks.
    pub work_area: Rectangle,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    Still,
    Video,
}

/// Images produced by one completed capture session.
///
/// The receiver owns the images.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub images: Vec<RgbaImage>,
    pub kind: CaptureKind,
    /// Set when the capture was taken silently and should not be shown.
    pub suspend_display: bool,
}

impl CaptureResult {
    pub fn still(image: RgbaImage, suspend_display: bool) -> Self {
        Self {
            images: vec![image],
            kind: CaptureKind::Still,
            suspend_display,
        }
    }

    /// Frames of a recording, however many were collected.
    pub fn frames(images: Vec<RgbaImage>) -> Self {
        Self {
            images,
            kind: CaptureKind::Video,
            suspend_display: false,
        }
    }

    pub fn is_video(&self) -> bool {
        self.kind == CaptureKind::Video
    }
}

/// Region spanning every monitor's full bounds.
pub fn virtual_screen(monitors: &[MonitorInfo]) -> Result<Rectangle> {
    let region =
        Rectangle::union_all(monitors.iter().map(|m| m.bounds)).ok_or(CaptureError::NoMonitors)?;
    if region.is_empty() {
        return Err(CaptureError::InvalidRegion("virtual screen has zero area".into()));
    }
    Ok(region)
}
