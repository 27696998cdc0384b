use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use global_hotkey::hotkey::{Code, Modifiers};
use windows::{
    core::PCWSTR,
    Win32::{
        Foundation::{HINSTANCE, LPARAM, LRESULT, WPARAM},
        System::{LibraryLoader::GetModuleHandleW, Threading::GetCurrentThreadId},
        UI::{
            Input::KeyboardAndMouse::{
                GetAsyncKeyState, GetKeyboardState, ToUnicode, VIRTUAL_KEY, VK_BACK, VK_CONTROL,
                VK_DELETE, VK_DOWN, VK_END, VK_ESCAPE, VK_F1, VK_F12, VK_HOME, VK_INSERT, VK_LEFT,
                VK_LWIN, VK_MENU, VK_NEXT, VK_PRIOR, VK_RETURN, VK_RIGHT, VK_RWIN, VK_SHIFT,
                VK_SNAPSHOT, VK_SPACE, VK_TAB, VK_UP,
            },
            WindowsAndMessaging::{
                CallNextHookEx, DispatchMessageW, GetMessageW, PeekMessageW, PostThreadMessageW,
                SetWindowsHookExW, TranslateMessage, UnhookWindowsHookEx, HHOOK, KBDLLHOOKSTRUCT,
                MSG, MSLLHOOKSTRUCT, PM_NOREMOVE, WH_KEYBOARD_LL, WH_MOUSE_LL, WM_APP,
                WM_KEYDOWN, WM_LBUTTONDOWN, WM_LBUTTONUP, WM_MOUSEMOVE, WM_QUIT, WM_SYSKEYDOWN,
            },
        },
    },
};

use super::{InputEvent, InputHandler, InputListener, MouseControl, Propagation};
use crate::capture::Point;
use crate::error::{CaptureError, Result};

const WM_ATTACH_MOUSE: u32 = WM_APP + 1;
const WM_DETACH_MOUSE: u32 = WM_APP + 2;

thread_local! {
    static HANDLER: RefCell<Option<InputHandler>> = RefCell::new(None);
    static KEYBOARD_HOOK: Cell<Option<isize>> = const { Cell::new(None) };
    static MOUSE_HOOK: Cell<Option<isize>> = const { Cell::new(None) };
}

/// Low-level keyboard and mouse hooks running on a dedicated message-loop
/// thread. Hook procedures run on that thread, so the handler and hook
/// handles live in thread-local storage there.
pub struct HookListener {
    thread: Option<JoinHandle<()>>,
    thread_id: Arc<AtomicU32>,
}

impl HookListener {
    pub fn new() -> Self {
        Self {
            thread: None,
            thread_id: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl Default for HookListener {
    fn default() -> Self {
        Self::new()
    }
}

impl InputListener for HookListener {
    fn start(&mut self, handler: InputHandler) -> Result<()> {
        if self.thread.is_some() {
            return Err(CaptureError::HookInstall("listener already started".into()));
        }

        let (ready_tx, ready_rx) = channel::<std::result::Result<u32, String>>();
        let thread = thread::Builder::new()
            .name("input-hook".into())
            .spawn(move || run_hook_thread(handler, ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(id)) => {
                self.thread_id.store(id, Ordering::SeqCst);
                self.thread = Some(thread);
                tracing::debug!(thread_id = id, "keyboard hook installed");
                Ok(())
            }
            Ok(Err(reason)) => {
                let _ = thread.join();
                Err(CaptureError::HookInstall(reason))
            }
            Err(_) => {
                let _ = thread.join();
                Err(CaptureError::HookInstall("hook thread exited during startup".into()))
            }
        }
    }

    fn mouse_control(&self) -> Box<dyn MouseControl> {
        Box::new(HookMouseControl {
            thread_id: Arc::clone(&self.thread_id),
        })
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let id = self.thread_id.swap(0, Ordering::SeqCst);
        unsafe {
            if let Err(e) = PostThreadMessageW(id, WM_QUIT, WPARAM(0), LPARAM(0)) {
                tracing::warn!("failed to signal hook thread: {}", e);
                return;
            }
        }
        if thread.join().is_err() {
            tracing::warn!("hook thread panicked");
        }
        tracing::debug!("input hooks removed");
    }
}

impl Drop for HookListener {
    fn drop(&mut self) {
        self.stop();
    }
}

struct HookMouseControl {
    thread_id: Arc<AtomicU32>,
}

impl HookMouseControl {
    fn post(&self, msg: u32) -> Result<()> {
        let id = self.thread_id.load(Ordering::SeqCst);
        if id == 0 {
            return Err(CaptureError::HookInstall("input listener is not running".into()));
        }
        unsafe { PostThreadMessageW(id, msg, WPARAM(0), LPARAM(0)) }
            .map_err(|e| CaptureError::HookInstall(e.to_string()))
    }

    fn on_hook_thread(&self) -> bool {
        let id = self.thread_id.load(Ordering::SeqCst);
        id != 0 && unsafe { GetCurrentThreadId() } == id
    }
}

impl MouseControl for HookMouseControl {
    fn attach(&mut self) -> Result<()> {
        if self.on_hook_thread() {
            install_mouse_hook()
        } else {
            self.post(WM_ATTACH_MOUSE)
        }
    }

    fn detach(&mut self) {
        if self.on_hook_thread() {
            remove_mouse_hook();
        } else if let Err(e) = self.post(WM_DETACH_MOUSE) {
            tracing::debug!("mouse detach skipped: {}", e);
        }
    }
}

fn module_handle() -> std::result::Result<HINSTANCE, String> {
    let module = unsafe { GetModuleHandleW(PCWSTR::null()) }.map_err(|e| e.to_string())?;
    Ok(HINSTANCE(module.0))
}

fn run_hook_thread(
    handler: InputHandler,
    ready: std::sync::mpsc::Sender<std::result::Result<u32, String>>,
) {
    HANDLER.with(|h| *h.borrow_mut() = Some(handler));

    let installed = module_handle().and_then(|module| unsafe {
        SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_proc), module, 0)
            .map_err(|e| e.to_string())
    });
    let hook = match installed {
        Ok(hook) => hook,
        Err(reason) => {
            let _ = ready.send(Err(reason));
            return;
        }
    };
    KEYBOARD_HOOK.with(|k| k.set(Some(hook.0 as isize)));

    let mut msg = MSG::default();
    unsafe {
        // Forces creation of the thread message queue before anyone posts to it.
        let _ = PeekMessageW(&mut msg, None, 0, 0, PM_NOREMOVE);
        let _ = ready.send(Ok(GetCurrentThreadId()));

        while GetMessageW(&mut msg, None, 0, 0).as_bool() {
            match msg.message {
                WM_ATTACH_MOUSE => {
                    if let Err(e) = install_mouse_hook() {
                        tracing::error!("{}", e);
                    }
                }
                WM_DETACH_MOUSE => remove_mouse_hook(),
                _ => {
                    let _ = TranslateMessage(&msg);
                    DispatchMessageW(&msg);
                }
            }
        }
    }

    remove_mouse_hook();
    if let Some(raw) = KEYBOARD_HOOK.with(|k| k.take()) {
        unsafe {
            let _ = UnhookWindowsHookEx(HHOOK(raw as *mut _));
        }
    }
    HANDLER.with(|h| h.borrow_mut().take());
}

fn install_mouse_hook() -> Result<()> {
    if MOUSE_HOOK.with(|m| m.get()).is_some() {
        return Ok(());
    }
    let module = module_handle().map_err(CaptureError::HookInstall)?;
    let hook = unsafe { SetWindowsHookExW(WH_MOUSE_LL, Some(mouse_proc), module, 0) }
        .map_err(|e| CaptureError::HookInstall(format!("mouse hook: {}", e)))?;
    MOUSE_HOOK.with(|m| m.set(Some(hook.0 as isize)));
    tracing::debug!("mouse hook attached");
    Ok(())
}

fn remove_mouse_hook() {
    if let Some(raw) = MOUSE_HOOK.with(|m| m.take()) {
        unsafe {
            let _ = UnhookWindowsHookEx(HHOOK(raw as *mut _));
        }
        tracing::debug!("mouse hook detached");
    }
}

/// Runs the installed handler. Events raised while the handler is already
/// running on this thread are passed through untouched.
fn dispatch(event: InputEvent) -> Propagation {
    HANDLER.with(|h| match h.try_borrow_mut() {
        Ok(mut slot) => match slot.as_mut() {
            Some(handler) => handler(event),
            None => Propagation::Continue,
        },
        Err(_) => Propagation::Continue,
    })
}

fn key_held(vk: VIRTUAL_KEY) -> bool {
    unsafe { GetAsyncKeyState(vk.0 as i32) < 0 }
}

fn current_modifiers() -> Modifiers {
    let mut modifiers = Modifiers::empty();
    if key_held(VK_CONTROL) {
        modifiers |= Modifiers::CONTROL;
    }
    if key_held(VK_SHIFT) {
        modifiers |= Modifiers::SHIFT;
    }
    if key_held(VK_MENU) {
        modifiers |= Modifiers::ALT;
    }
    if key_held(VK_LWIN) || key_held(VK_RWIN) {
        modifiers |= Modifiers::SUPER;
    }
    modifiers
}

fn translate_char(vk: u32, scan_code: u32) -> Option<char> {
    unsafe {
        let mut key_state = [0u8; 256];
        if GetKeyboardState(&mut key_state).is_err() {
            return None;
        }
        let mut buffer = [0u16; 4];
        let written = ToUnicode(vk, scan_code, Some(&key_state), &mut buffer, 0);
        if written <= 0 {
            return None;
        }
        char::decode_utf16(buffer[..written as usize].iter().copied())
            .next()?
            .ok()
            .filter(|c| !c.is_control())
    }
}

unsafe extern "system" fn keyboard_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code >= 0 && matches!(wparam.0 as u32, WM_KEYDOWN | WM_SYSKEYDOWN) {
        let data = *(lparam.0 as *const KBDLLHOOKSTRUCT);
        let modifiers = current_modifiers();
        let mut propagation = Propagation::Continue;

        if let Some(key) = vk_to_code(data.vkCode) {
            propagation = dispatch(InputEvent::KeyDown { code: key, modifiers });
        }
        if !modifiers.intersects(Modifiers::CONTROL | Modifiers::ALT | Modifiers::SUPER) {
            if let Some(c) = translate_char(data.vkCode, data.scanCode) {
                dispatch(InputEvent::KeyPress(c));
            }
        }

        if propagation == Propagation::Consume {
            return LRESULT(1);
        }
    }
    CallNextHookEx(HHOOK::default(), code, wparam, lparam)
}

unsafe extern "system" fn mouse_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code >= 0 {
        let data = *(lparam.0 as *const MSLLHOOKSTRUCT);
        let point = Point::new(data.pt.x, data.pt.y);
        let event = match wparam.0 as u32 {
            WM_MOUSEMOVE => Some(InputEvent::MouseMove(point)),
            WM_LBUTTONDOWN => Some(InputEvent::PrimaryDown(point)),
            WM_LBUTTONUP => Some(InputEvent::PrimaryUp(point)),
            _ => None,
        };
        if let Some(event) = event {
            if dispatch(event) == Propagation::Consume {
                return LRESULT(1);
            }
        }
    }
    CallNextHookEx(HHOOK::default(), code, wparam, lparam)
}

fn vk_to_code(vk: u32) -> Option<Code> {
    const LETTERS: [Code; 26] = [
        Code::KeyA, Code::KeyB, Code::KeyC, Code::KeyD, Code::KeyE, Code::KeyF, Code::KeyG,
        Code::KeyH, Code::KeyI, Code::KeyJ, Code::KeyK, Code::KeyL, Code::KeyM, Code::KeyN,
        Code::KeyO, Code::KeyP, Code::KeyQ, Code::KeyR, Code::KeyS, Code::KeyT, Code::KeyU,
        Code::KeyV, Code::KeyW, Code::KeyX, Code::KeyY, Code::KeyZ,
    ];
    const DIGITS: [Code; 10] = [
        Code::Digit0, Code::Digit1, Code::Digit2, Code::Digit3, Code::Digit4,
        Code::Digit5, Code::Digit6, Code::Digit7, Code::Digit8, Code::Digit9,
    ];
    const FUNCTION_KEYS: [Code; 12] = [
        Code::F1, Code::F2, Code::F3, Code::F4, Code::F5, Code::F6,
        Code::F7, Code::F8, Code::F9, Code::F10, Code::F11, Code::F12,
    ];

    match vk {
        0x41..=0x5A => Some(LETTERS[(vk - 0x41) as usize]),
        0x30..=0x39 => Some(DIGITS[(vk - 0x30) as usize]),
        v if v >= VK_F1.0 as u32 && v <= VK_F12.0 as u32 => {
            Some(FUNCTION_KEYS[(v - VK_F1.0 as u32) as usize])
        }
        v => {
            let named = [
                (VK_SNAPSHOT, Code::PrintScreen),
                (VK_ESCAPE, Code::Escape),
                (VK_SPACE, Code::Space),
                (VK_RETURN, Code::Enter),
                (VK_TAB, Code::Tab),
                (VK_BACK, Code::Backspace),
                (VK_DELETE, Code::Delete),
                (VK_INSERT, Code::Insert),
                (VK_HOME, Code::Home),
                (VK_END, Code::End),
                (VK_PRIOR, Code::PageUp),
                (VK_NEXT, Code::PageDown),
                (VK_UP, Code::ArrowUp),
                (VK_DOWN, Code::ArrowDown),
                (VK_LEFT, Code::ArrowLeft),
                (VK_RIGHT, Code::ArrowRight),
            ];
            named
                .iter()
                .find(|(key, _)| key.0 as u32 == v)
                .map(|(_, code)| *code)
        }
    }
}
