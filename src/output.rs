use anyhow::{anyhow, Context, Result};
use arboard::Clipboard;
use gif::{Encoder, Frame, Repeat};
use image::RgbaImage;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use regionsnap::capture::{CaptureKind, CaptureResult};
use regionsnap::config::Config;

const MAX_IMAGE_DIMENSION: u32 = 16384;
const MAX_GIF_DIMENSION: u32 = 4096;
const MAX_NOTIFICATION_LEN: usize = 256;

/// Writes completed captures to disk and announces them.
pub struct ResultSink {
    config: Config,
    clipboard: Option<Clipboard>,
}

impl ResultSink {
    pub fn new(config: Config) -> Self {
        let clipboard = if config.notifications.copy_to_clipboard {
            match Clipboard::new() {
                Ok(clipboard) => Some(clipboard),
                Err(e) => {
                    tracing::warn!("clipboard unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };
        Self { config, clipboard }
    }

    /// Saves the result and returns where it went. A silent capture skips
    /// the clipboard and the notification.
    pub fn handle(&mut self, result: CaptureResult) -> Result<PathBuf> {
        let path = match result.kind {
            CaptureKind::Video => {
                let path = self.config.output_path("gif");
                save_gif(&result.images, self.config.recording.fps, &path)?;
                path
            }
            CaptureKind::Still => self.save_still(&result)?,
        };

        tracing::info!(path = %path.display(), "capture saved");

        if !result.suspend_display && self.config.notifications.enabled {
            let title = match result.kind {
                CaptureKind::Video => "Recording saved",
                CaptureKind::Still => "Screenshot saved",
            };
            if let Err(e) = show_notification(title, &path.to_string_lossy()) {
                tracing::warn!("notification failed: {}", e);
            }
        }

        Ok(path)
    }

    fn save_still(&mut self, result: &CaptureResult) -> Result<PathBuf> {
        let image = result
            .images
            .first()
            .ok_or_else(|| anyhow!("capture result has no image"))?;
        let path = self.config.output_path("png");
        save_png(image, &path)?;
        if !result.suspend_display {
            self.copy_image(image);
        }
        Ok(path)
    }

    fn copy_image(&mut self, image: &RgbaImage) {
        let Some(clipboard) = self.clipboard.as_mut() else {
            return;
        };
        if let Err(e) = copy_image(clipboard, image) {
            tracing::warn!("clipboard copy failed: {}", e);
        }
    }
}

fn check_dimensions(image: &RgbaImage, limit: u32) -> Result<()> {
    if image.width() == 0 || image.height() == 0 {
        return Err(anyhow!("Image has zero dimension"));
    }
    if image.width() > limit || image.height() > limit {
        return Err(anyhow!("Image too large"));
    }
    Ok(())
}

fn copy_image(clipboard: &mut Clipboard, image: &RgbaImage) -> Result<()> {
    check_dimensions(image, MAX_IMAGE_DIMENSION)?;
    let img_data = arboard::ImageData {
        width: image.width() as usize,
        height: image.height() as usize,
        bytes: std::borrow::Cow::Borrowed(image.as_raw()),
    };
    clipboard.set_image(img_data)?;
    Ok(())
}

fn prepare_path(path: &Path) -> Result<()> {
    let filename = path
        .file_name()
        .ok_or_else(|| anyhow!("Invalid filename"))?
        .to_string_lossy();
    if filename.contains("..") {
        return Err(anyhow!("Invalid filename characters"));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub fn save_png(image: &RgbaImage, path: &Path) -> Result<()> {
    check_dimensions(image, MAX_IMAGE_DIMENSION)?;
    prepare_path(path)?;
    image
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Encodes the frames as a looping GIF. Frames whose size differs from the
/// first are scaled to match it.
pub fn save_gif(frames: &[RgbaImage], fps: u32, path: &Path) -> Result<()> {
    let first = frames.first().ok_or_else(|| anyhow!("No frames captured"))?;
    check_dimensions(first, MAX_GIF_DIMENSION)?;
    prepare_path(path)?;

    let (orig_width, orig_height) = first.dimensions();
    let width = orig_width as u16;
    let height = orig_height as u16;

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    let mut encoder = Encoder::new(file, width, height, &[])?;
    encoder.set_repeat(Repeat::Infinite)?;

    let delay = (100.0 / fps.clamp(1, 60) as f64).clamp(2.0, 100.0) as u16;

    for image in frames {
        let resized;
        let image = if image.dimensions() != (orig_width, orig_height) {
            resized = image::imageops::resize(
                image,
                orig_width,
                orig_height,
                image::imageops::FilterType::Nearest,
            );
            &resized
        } else {
            image
        };

        let rgb_data: Vec<u8> = image
            .as_raw()
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect();

        let mut frame = Frame::from_rgb(width, height, &rgb_data);
        frame.delay = delay;
        encoder.write_frame(&frame)?;
    }

    Ok(())
}

fn sanitize_notification_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .take(MAX_NOTIFICATION_LEN)
        .collect()
}

fn show_notification(title: &str, body: &str) -> Result<()> {
    let safe_title = sanitize_notification_text(title);
    let safe_body = sanitize_notification_text(body);

    #[cfg(not(target_os = "macos"))]
    {
        notify_rust::Notification::new()
            .summary(&safe_title)
            .body(&safe_body)
            .timeout(notify_rust::Timeout::Milliseconds(3000))
            .show()?;
    }

    #[cfg(target_os = "macos")]
    {
        notify_rust::Notification::new()
            .summary(&safe_title)
            .body(&safe_body)
            .show()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("regionsnap-test-{}", uuid::Uuid::new_v4()))
    }

    fn sink_in(dir: &Path) -> ResultSink {
        let mut config = Config::default();
        config.output.directory = dir.to_path_buf();
        config.notifications.enabled = false;
        config.notifications.copy_to_clipboard = false;
        ResultSink::new(config)
    }

    #[test]
    fn test_still_saved_as_png() {
        let dir = scratch_dir();
        let mut sink = sink_in(&dir);
        let image = RgbaImage::from_pixel(12, 8, image::Rgba([200, 10, 10, 255]));

        let path = sink.handle(CaptureResult::still(image, true)).unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));
        let reloaded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(reloaded.dimensions(), (12, 8));
        assert_eq!(reloaded.get_pixel(3, 3), &image::Rgba([200, 10, 10, 255]));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_frames_saved_as_gif() {
        let dir = scratch_dir();
        let mut sink = sink_in(&dir);
        let frames = vec![
            RgbaImage::new(16, 16),
            RgbaImage::from_pixel(16, 16, image::Rgba([255, 255, 255, 255])),
            RgbaImage::new(8, 8),
        ];

        let path = sink.handle(CaptureResult::frames(frames)).unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("gif"));
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"GIF89a"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_single_frame_recording_saved_as_gif() {
        let dir = scratch_dir();
        let mut sink = sink_in(&dir);

        let path = sink
            .handle(CaptureResult::frames(vec![RgbaImage::new(4, 4)]))
            .unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("gif"));
        assert!(std::fs::read(&path).unwrap().starts_with(b"GIF89a"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_save_gif_rejects_empty() {
        let path = scratch_dir().join("empty.gif");
        assert!(save_gif(&[], 15, &path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_save_png_rejects_zero_dimension() {
        let path = scratch_dir().join("zero.png");
        assert!(save_png(&RgbaImage::new(0, 4), &path).is_err());
    }

    #[test]
    fn test_sanitize_notification_text() {
        assert_eq!(sanitize_notification_text("a\u{7}b\nc"), "ab\nc");
        assert_eq!(sanitize_notification_text(&"x".repeat(400)).len(), MAX_NOTIFICATION_LEN);
    }
}
