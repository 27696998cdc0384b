use std::str::FromStr;

use global_hotkey::hotkey::{Code, HotKey, Modifiers};

use crate::config::HotkeyConfig;
use crate::error::{CaptureError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HotkeyAction {
    StartSelection,
    FullScreen,
    Cancel,
}

impl HotkeyAction {
    pub fn all() -> &'static [HotkeyAction] {
        &[
            HotkeyAction::StartSelection,
            HotkeyAction::FullScreen,
            HotkeyAction::Cancel,
        ]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            HotkeyAction::StartSelection => "Select region",
            HotkeyAction::FullScreen => "Capture all screens",
            HotkeyAction::Cancel => "Cancel selection",
        }
    }
}

/// Key combinations the coordinator reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotkeyBindings {
    pub start_selection: HotKey,
    pub full_screen: HotKey,
    pub cancel: HotKey,
}

impl HotkeyBindings {
    pub fn from_config(config: &HotkeyConfig) -> Result<Self> {
        Ok(Self {
            start_selection: parse_hotkey(&config.start_selection)?,
            full_screen: parse_hotkey(&config.full_screen)?,
            cancel: parse_hotkey(&config.cancel)?,
        })
    }

    pub fn binding(&self, action: HotkeyAction) -> &HotKey {
        match action {
            HotkeyAction::StartSelection => &self.start_selection,
            HotkeyAction::FullScreen => &self.full_screen,
            HotkeyAction::Cancel => &self.cancel,
        }
    }

    /// Matches a key-down against the bindings. A binding applies when its
    /// key is pressed with at least its modifiers held; extra modifiers are
    /// allowed. Among applicable bindings the one requiring the most
    /// modifiers wins, so Ctrl+Shift+PrintScreen is still a full-screen
    /// capture while Alt+PrintScreen starts a selection.
    pub fn resolve(&self, code: Code, modifiers: Modifiers) -> Option<HotkeyAction> {
        HotkeyAction::all()
            .iter()
            .copied()
            .filter(|action| {
                let hotkey = self.binding(*action);
                hotkey.key == code && modifiers.contains(hotkey.mods)
            })
            .min_by_key(|action| std::cmp::Reverse(self.binding(*action).mods.bits().count_ones()))
    }
}

impl Default for HotkeyBindings {
    fn default() -> Self {
        Self {
            start_selection: HotKey::new(None, Code::PrintScreen),
            full_screen: HotKey::new(Some(Modifiers::CONTROL), Code::PrintScreen),
            cancel: HotKey::new(None, Code::Escape),
        }
    }
}

pub fn parse_hotkey(s: &str) -> Result<HotKey> {
    let parts: Vec<&str> = s.split('+').map(|p| p.trim()).filter(|p| !p.is_empty()).collect();

    if parts.is_empty() {
        return Err(CaptureError::Config("empty hotkey".into()));
    }

    let mut modifiers = Modifiers::empty();
    let mut key_code: Option<Code> = None;

    for part in parts {
        match part.to_lowercase().as_str() {
            "ctrl" | "control" => modifiers |= Modifiers::CONTROL,
            "alt" => modifiers |= Modifiers::ALT,
            "shift" => modifiers |= Modifiers::SHIFT,
            "super" | "win" | "meta" | "cmd" => modifiers |= Modifiers::SUPER,
            _ => {
                if key_code.is_some() {
                    return Err(CaptureError::Config(format!("more than one key in '{}'", s)));
                }
                key_code = Some(parse_key_code(part)?);
            }
        }
    }

    let code = key_code.ok_or_else(|| CaptureError::Config(format!("no key in '{}'", s)))?;
    Ok(HotKey::new(Some(modifiers), code))
}

fn parse_key_code(s: &str) -> Result<Code> {
    let upper = s.to_uppercase();
    let canonical = match upper.as_str() {
        "ESC" | "ESCAPE" => "Escape".to_string(),
        "PRTSC" | "PRINT" | "PRINTSCREEN" => "PrintScreen".to_string(),
        "ENTER" | "RETURN" => "Enter".to_string(),
        "SPACE" => "Space".to_string(),
        "TAB" => "Tab".to_string(),
        "DEL" | "DELETE" => "Delete".to_string(),
        "INS" | "INSERT" => "Insert".to_string(),
        "PGUP" | "PAGEUP" => "PageUp".to_string(),
        "PGDN" | "PAGEDOWN" => "PageDown".to_string(),
        "UP" | "DOWN" | "LEFT" | "RIGHT" => {
            let mut name = String::from("Arrow");
            name.push_str(&upper[..1]);
            name.push_str(&upper[1..].to_lowercase());
            name
        }
        single if single.len() == 1 => {
            let c = single.chars().next().unwrap_or_default();
            if c.is_ascii_alphabetic() {
                format!("Key{}", c)
            } else if c.is_ascii_digit() {
                format!("Digit{}", c)
            } else {
                return Err(CaptureError::Config(format!("unknown key: {}", s)));
            }
        }
        _ => s.to_string(),
    };

    Code::from_str(&canonical)
        .ok()
        .filter(|code| *code != Code::Unidentified)
        .or_else(|| {
            // Function keys and other names spelled in any case, e.g. "f5".
            let mut chars = s.chars();
            let first = chars.next()?;
            let rest: String = chars.as_str().to_string();
            Code::from_str(&format!("{}{}", first.to_ascii_uppercase(), rest)).ok()
        })
        .filter(|code| *code != Code::Unidentified)
        .ok_or_else(|| CaptureError::Config(format!("unknown key: {}", s)))
}

pub fn format_hotkey(hotkey: &HotKey) -> String {
    let mut parts: Vec<String> = Vec::new();

    if hotkey.mods.contains(Modifiers::CONTROL) {
        parts.push("Ctrl".into());
    }
    if hotkey.mods.contains(Modifiers::ALT) {
        parts.push("Alt".into());
    }
    if hotkey.mods.contains(Modifiers::SHIFT) {
        parts.push("Shift".into());
    }
    if hotkey.mods.contains(Modifiers::SUPER) {
        #[cfg(target_os = "macos")]
        parts.push("Cmd".into());
        #[cfg(not(target_os = "macos"))]
        parts.push("Win".into());
    }

    parts.push(format_code(hotkey.key));
    parts.join("+")
}

pub fn format_code(code: Code) -> String {
    let name = code.to_string();
    if let Some(letter) = name.strip_prefix("Key") {
        return letter.to_string();
    }
    if let Some(digit) = name.strip_prefix("Digit") {
        return digit.to_string();
    }
    if let Some(arrow) = name.strip_prefix("Arrow") {
        return arrow.to_string();
    }
    match code {
        Code::Escape => "Esc".to_string(),
        _ => name,
    }
}
