use chrono::format::{Item, StrftimeItems};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CaptureError, Result};
use crate::hotkeys::parse_hotkey;
use crate::recording::RecordingSettings;

const MIN_FPS: u32 = 1;
const MAX_FPS: u32 = 60;
const MIN_DURATION_SECS: u32 = 1;
const MAX_DURATION_SECS: u32 = 300;
const MAX_FILENAME_TEMPLATE_LEN: usize = 128;
const MAX_HOTKEY_LEN: usize = 64;
const DEFAULT_FILENAME_TEMPLATE: &str = "capture_%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub output: OutputConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub hotkeys: HotkeyConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub filename_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CaptureConfig {
    /// Initial capture mode: completed selections start a recording.
    pub capture_video: bool,
    pub hide_cursor: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capture_video: false,
            hide_cursor: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RecordingConfig {
    pub fps: u32,
    pub max_duration_secs: u32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            fps: 15,
            max_duration_secs: 30,
        }
    }
}

impl RecordingConfig {
    pub fn settings(&self) -> RecordingSettings {
        RecordingSettings {
            fps: self.fps,
            max_duration: Duration::from_secs(self.max_duration_secs as u64),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HotkeyConfig {
    pub start_selection: String,
    pub full_screen: String,
    pub cancel: String,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            start_selection: "PrintScreen".to_string(),
            full_screen: "Ctrl+PrintScreen".to_string(),
            cancel: "Escape".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub copy_to_clipboard: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            copy_to_clipboard: true,
        }
    }
}

fn invalid_template(template: &str) -> bool {
    template.is_empty()
        || template.len() > MAX_FILENAME_TEMPLATE_LEN
        || template.contains('/')
        || template.contains('\\')
        || template.contains("..")
        || StrftimeItems::new(template).any(|item| matches!(item, Item::Error))
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.recording.fps < MIN_FPS || self.recording.fps > MAX_FPS {
            return Err(CaptureError::Config(format!(
                "fps must be between {} and {}",
                MIN_FPS, MAX_FPS
            )));
        }
        if self.recording.max_duration_secs < MIN_DURATION_SECS
            || self.recording.max_duration_secs > MAX_DURATION_SECS
        {
            return Err(CaptureError::Config(format!(
                "max_duration_secs must be between {} and {}",
                MIN_DURATION_SECS, MAX_DURATION_SECS
            )));
        }
        if invalid_template(&self.output.filename_template) {
            return Err(CaptureError::Config("filename_template is invalid".into()));
        }
        for hotkey in [
            &self.hotkeys.start_selection,
            &self.hotkeys.full_screen,
            &self.hotkeys.cancel,
        ] {
            if hotkey.len() > MAX_HOTKEY_LEN {
                return Err(CaptureError::Config("hotkey string too long".into()));
            }
            parse_hotkey(hotkey)?;
        }
        Ok(())
    }

    fn sanitize(&mut self) {
        self.recording.fps = self.recording.fps.clamp(MIN_FPS, MAX_FPS);
        self.recording.max_duration_secs = self
            .recording
            .max_duration_secs
            .clamp(MIN_DURATION_SECS, MAX_DURATION_SECS);
        if invalid_template(&self.output.filename_template) {
            self.output.filename_template = DEFAULT_FILENAME_TEMPLATE.to_string();
        }
    }

    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("com", "regionsnap", "regionsnap").map(|p| p.config_dir().to_path_buf())
    }

    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Config::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(content).map_err(|e| CaptureError::Config(e.to_string()))?;
        config.sanitize();
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CaptureError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Writes the defaults out on first run so there is a file to edit.
    pub fn save_if_missing(&self) -> Result<bool> {
        match Self::config_path() {
            Some(path) if !path.exists() => self.save_to(&path).map(|()| true),
            _ => Ok(false),
        }
    }

    pub fn ensure_output_dir(&self) -> Result<()> {
        let dir = &self.output.directory;
        if dir.as_os_str().is_empty() {
            return Err(CaptureError::Config("output directory path is empty".into()));
        }
        if dir.to_string_lossy().contains("..") {
            return Err(CaptureError::Config("output directory contains path traversal".into()));
        }
        fs::create_dir_all(dir)?;
        Ok(())
    }

    pub fn generate_filename(&self, extension: &str) -> String {
        let now = chrono::Local::now();
        let mut formatted = String::new();
        if write!(formatted, "{}", now.format(&self.output.filename_template)).is_err() {
            formatted = now.format(DEFAULT_FILENAME_TEMPLATE).to_string();
        }
        let sanitized: String = formatted
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .take(200)
            .collect();
        let safe_name = if sanitized.is_empty() {
            format!("capture_{}", now.timestamp())
        } else {
            sanitized
        };
        format!("{}.{}", safe_name, extension)
    }

    /// A path in the output directory that does not exist yet.
    pub fn output_path(&self, extension: &str) -> PathBuf {
        let candidate = self.output.directory.join(self.generate_filename(extension));
        unique_path(candidate)
    }
}

fn unique_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "capture".to_string());
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();

    (1..1000)
        .map(|n| parent.join(format!("{}_{}.{}", stem, n, extension)))
        .find(|p| !p.exists())
        .unwrap_or(path)
}

impl Default for Config {
    fn default() -> Self {
        let pictures_dir = directories::UserDirs::new()
            .and_then(|d| d.picture_dir().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| {
                directories::BaseDirs::new()
                    .map(|b| b.home_dir().to_path_buf())
                    .unwrap_or_else(|| PathBuf::from("."))
            });

        Self {
            output: OutputConfig {
                directory: pictures_dir.join("regionsnap"),
                filename_template: DEFAULT_FILENAME_TEMPLATE.to_string(),
            },
            capture: CaptureConfig::default(),
            recording: RecordingConfig::default(),
            hotkeys: HotkeyConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}
