//! Interactive screen-region capture: per-monitor overlays, drag selection,
//! still and video results, driven by global keyboard and mouse hooks.

pub mod capture;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod hotkeys;
pub mod input;
pub mod overlay;
pub mod recording;
pub mod service;

pub use coordinator::{CaptureCoordinator, CaptureState};
pub use error::{CaptureError, Result};
pub use service::CaptureService;
