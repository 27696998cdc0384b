use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaptureError>;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to install global input hook: {0}")]
    HookInstall(String),

    #[error("capture completed but no capture subscriber is registered")]
    NoSubscriber,

    #[error("capture already in progress ({0})")]
    Busy(&'static str),

    #[error("no monitors found")]
    NoMonitors,

    #[error("monitor {0} not found")]
    MonitorNotFound(u32),

    #[error("screen grab failed: {0}")]
    Grab(String),

    #[error("overlay failure: {0}")]
    Overlay(String),

    #[error("recording failure: {0}")]
    Recording(String),

    #[error("invalid capture region: {0}")]
    InvalidRegion(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<xcap::XCapError> for CaptureError {
    fn from(err: xcap::XCapError) -> Self {
        CaptureError::Grab(err.to_string())
    }
}

impl From<image::ImageError> for CaptureError {
    fn from(err: image::ImageError) -> Self {
        CaptureError::Grab(err.to_string())
    }
}
