//! Process-wide keyboard and mouse interception.
//!
//! Keyboard events flow for the whole lifetime of a listener. The mouse
//! stream is attached only while a selection is on screen, through the
//! [`MouseControl`] handle the listener hands out.

#[cfg(windows)]
mod windows;

#[cfg(windows)]
pub use self::windows::HookListener;

use global_hotkey::hotkey::{Code, Modifiers};

use crate::capture::Point;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    KeyDown { code: Code, modifiers: Modifiers },
    /// A translated character, delivered after the matching key-down.
    KeyPress(char),
    MouseMove(Point),
    PrimaryDown(Point),
    PrimaryUp(Point),
}

/// What the hook should do with an event after it has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Propagation {
    #[default]
    Continue,
    /// Swallow the event so the application under the cursor never sees it.
    Consume,
}

pub type InputHandler = Box<dyn FnMut(InputEvent) -> Propagation + Send>;

pub trait InputListener: Send {
    /// Installs the keyboard hook and starts delivering events to `handler`.
    ///
    /// Failing to install the hook is fatal; callers surface it instead of
    /// retrying.
    fn start(&mut self, handler: InputHandler) -> Result<()>;

    /// Handle used to attach and detach the mouse stream.
    fn mouse_control(&self) -> Box<dyn MouseControl>;

    /// Removes every hook. Safe to call more than once.
    fn stop(&mut self);
}

pub trait MouseControl: Send {
    fn attach(&mut self) -> Result<()>;

    /// Safe to call when already detached.
    fn detach(&mut self);
}

/// Creates the listener for the current platform.
#[cfg(windows)]
pub fn platform_listener() -> Result<Box<dyn InputListener>> {
    Ok(Box::new(HookListener::new()))
}

#[cfg(not(windows))]
pub fn platform_listener() -> Result<Box<dyn InputListener>> {
    Err(crate::error::CaptureError::HookInstall(
        "global input hooks are not supported on this platform".into(),
    ))
}
