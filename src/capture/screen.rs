use std::sync::Mutex;
use std::thread::{self, ThreadId};

use image::RgbaImage;
use xcap::Monitor;

use super::{Desktop, MonitorInfo, Rectangle};
use crate::error::{CaptureError, Result};

const MAX_CAPTURE_DIMENSION: u32 = 32768;
const MAX_CAPTURE_PIXELS: u64 = 256 * 1024 * 1024;

/// [`Desktop`] backed by `xcap`.
///
/// On Windows the cursor is hidden with `ShowCursor`, which only counts for
/// the calling thread and only applies while the cursor is over a window of
/// that thread. A headless overlay therefore cannot hide it over other
/// applications; the call is kept balanced so a host with its own overlay
/// windows on the hiding thread gets the expected result.
#[derive(Debug, Default)]
pub struct XcapDesktop {
    cursor: CursorGuard,
}

impl XcapDesktop {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Remembers which thread holds an outstanding cursor hide.
///
/// Only that thread can undo it. A show from any other thread is skipped
/// and the hide stays with its owner until the owner shows the cursor again.
#[derive(Debug, Default)]
struct CursorGuard {
    hidden_by: Mutex<Option<ThreadId>>,
}

impl CursorGuard {
    fn set_visible(&self, visible: bool, apply: impl FnOnce(bool)) {
        let current = thread::current().id();
        let mut hidden_by = self.hidden_by.lock().unwrap_or_else(|e| e.into_inner());
        match (visible, *hidden_by) {
            (false, None) => {
                apply(false);
                *hidden_by = Some(current);
            }
            (true, Some(owner)) if owner == current => {
                apply(true);
                *hidden_by = None;
            }
            (true, Some(owner)) => {
                tracing::warn!(?owner, "cursor hidden on another thread, left for it to restore");
            }
            (false, Some(_)) | (true, None) => {}
        }
    }
}

fn monitor_info(monitor: &Monitor) -> MonitorInfo {
    let bounds = Rectangle::new(monitor.x(), monitor.y(), monitor.width(), monitor.height());
    MonitorInfo {
        id: monitor.id(),
        name: monitor.name().to_string(),
        bounds,
        work_area: work_area(bounds),
        is_primary: monitor.is_primary(),
    }
}

#[cfg(windows)]
fn work_area(bounds: Rectangle) -> Rectangle {
    use windows::Win32::Foundation::POINT;
    use windows::Win32::Graphics::Gdi::{
        GetMonitorInfoW, MonitorFromPoint, MONITORINFO, MONITOR_DEFAULTTONEAREST,
    };

    let center = POINT {
        x: bounds.x.saturating_add((bounds.width / 2) as i32),
        y: bounds.y.saturating_add((bounds.height / 2) as i32),
    };
    unsafe {
        let handle = MonitorFromPoint(center, MONITOR_DEFAULTTONEAREST);
        let mut info = MONITORINFO {
            cbSize: std::mem::size_of::<MONITORINFO>() as u32,
            ..Default::default()
        };
        if !GetMonitorInfoW(handle, &mut info).as_bool() {
            return bounds;
        }
        let rc = info.rcWork;
        let width = rc.right.saturating_sub(rc.left);
        let height = rc.bottom.saturating_sub(rc.top);
        if width <= 0 || height <= 0 {
            return bounds;
        }
        Rectangle::new(rc.left, rc.top, width as u32, height as u32)
    }
}

#[cfg(not(windows))]
fn work_area(bounds: Rectangle) -> Rectangle {
    bounds
}

impl Desktop for XcapDesktop {
    fn monitors(&self) -> Result<Vec<MonitorInfo>> {
        let monitors = Monitor::all()?;
        Ok(monitors.iter().map(monitor_info).collect())
    }

    fn grab(&self, region: Rectangle) -> Result<RgbaImage> {
        if region.is_empty() {
            return Err(CaptureError::InvalidRegion("region has zero area".into()));
        }
        if region.width > MAX_CAPTURE_DIMENSION || region.height > MAX_CAPTURE_DIMENSION {
            return Err(CaptureError::InvalidRegion("region exceeds dimension limit".into()));
        }
        let pixel_count = (region.width as u64).saturating_mul(region.height as u64);
        if pixel_count > MAX_CAPTURE_PIXELS {
            return Err(CaptureError::InvalidRegion("region exceeds pixel limit".into()));
        }

        let monitors = Monitor::all()?;
        if monitors.is_empty() {
            return Err(CaptureError::NoMonitors);
        }

        let mut combined = RgbaImage::new(region.width, region.height);

        for monitor in monitors {
            let bounds =
                Rectangle::new(monitor.x(), monitor.y(), monitor.width(), monitor.height());
            let Some(overlap) = bounds.intersection(&region) else {
                continue;
            };

            let img = monitor.capture_image()?;
            let src_x = (overlap.x - bounds.x) as u32;
            let src_y = (overlap.y - bounds.y) as u32;
            let width = overlap.width.min(img.width().saturating_sub(src_x));
            let height = overlap.height.min(img.height().saturating_sub(src_y));
            if width == 0 || height == 0 {
                continue;
            }

            let part = image::imageops::crop_imm(&img, src_x, src_y, width, height).to_image();
            image::imageops::replace(
                &mut combined,
                &part,
                (overlap.x - region.x) as i64,
                (overlap.y - region.y) as i64,
            );
        }

        Ok(combined)
    }

    #[cfg(windows)]
    fn set_cursor_visible(&self, visible: bool) {
        use windows::Win32::Foundation::BOOL;
        use windows::Win32::UI::WindowsAndMessaging::ShowCursor;

        self.cursor.set_visible(visible, |visible| {
            let count = unsafe { ShowCursor(BOOL::from(visible)) };
            tracing::trace!(visible, count, "cursor display counter changed");
        });
    }

    #[cfg(not(windows))]
    fn set_cursor_visible(&self, visible: bool) {
        self.cursor.set_visible(visible, |visible| {
            tracing::trace!(visible, "cursor visibility is not controllable on this platform");
        });
    }
}
