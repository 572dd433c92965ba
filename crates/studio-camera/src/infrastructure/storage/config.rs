//! TOML-based configuration persistence for the studio camera.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\StudioCamera\config.toml`
//! - Linux:    `~/.config/studio-camera/config.toml`
//! - macOS:    `~/Library/Application Support/StudioCamera/config.toml`
//!
//! # Example file (for beginners)
//!
//! Every key is optional; anything missing takes its default value.
//!
//! ```toml
//! [sdk]
//! library_path = 'C:\PhotoBox\crsdk_pybridge.dll'
//! usb_serial = "D12345678901"
//!
//! [session]
//! save_dir = 'C:\PhotoBox\captures'
//! file_name = "IMG_"
//!
//! [liveview]
//! fps = 20
//!
//! [overlay]
//! ratio = [3, 4]
//!
//! [[overlay.holes]]
//! id = "face"
//! shape = "ellipse"
//! cx = 540.0
//! cy = 600.0
//! rx = 260.0
//! ry = 340.0
//! ```
//!
//! # Environment overrides
//!
//! | Variable           | Overrides                 |
//! |--------------------|---------------------------|
//! | `CRSDK_DLL`        | `[sdk].library_path`      |
//! | `CRSDK_USB_SERIAL` | `[sdk].usb_serial`        |
//! | `CRSDK_FORCE_ENUM` | `[sdk].force_enumerate`   |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use studio_core::{GuidePath, HoleShape, OverlayError, OverlayStyle, Rgba};
use thiserror::Error;

use crate::application::device_session::SessionSettings;
use crate::application::liveview_poller::PollerSettings;
use crate::infrastructure::sdk::SAVE_MODE_HOST;

/// Environment variable naming the native camera library.
pub const ENV_LIBRARY: &str = "CRSDK_DLL";
pub const ENV_USB_SERIAL: &str = "CRSDK_USB_SERIAL";
pub const ENV_FORCE_ENUM: &str = "CRSDK_FORCE_ENUM";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub sdk: SdkConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub liveview: LiveViewConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Native library location and connection path.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SdkConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_path: Option<PathBuf>,
    /// Forwarded to the library's debug switch when it has one.
    #[serde(default)]
    pub debug: bool,
    /// 12-character serial for the direct USB connect path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usb_serial: Option<String>,
    #[serde(default)]
    pub force_enumerate: bool,
}

/// Where captures are saved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default = "default_save_mode")]
    pub save_mode: i32,
}

/// Live-view polling parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveViewConfig {
    /// Target frames per second, clamped to 1..=60 when applied.
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: u64,
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u64,
    #[serde(default = "default_not_ready_retries")]
    pub not_ready_retries: u32,
    #[serde(default = "default_not_ready_backoff_ms")]
    pub not_ready_backoff_ms: u64,
    /// Frames buffered between the poller and the preview loop.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_min_frame_bytes")]
    pub min_frame_bytes: usize,
    #[serde(default = "default_true")]
    pub trim_to_jpeg: bool,
    /// How long stopping live view waits for the poller thread.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

/// Preview surface, mask style, and hole layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverlayConfig {
    #[serde(default = "default_surface_width")]
    pub width: u32,
    #[serde(default = "default_surface_height")]
    pub height: u32,
    #[serde(default = "default_mask_color")]
    pub mask_color: Rgba,
    #[serde(default = "default_guide_color")]
    pub guide_color: Rgba,
    #[serde(default = "default_guide_width")]
    pub guide_width: f32,
    #[serde(default = "default_true")]
    pub show_guide: bool,
    /// Guide rectangle aspect ratio as `[w, h]`.
    #[serde(default = "default_ratio")]
    pub ratio: (u32, u32),
    #[serde(default)]
    pub corner_radius: f32,
    #[serde(default = "default_true")]
    pub dashed_guide: bool,
    #[serde(default)]
    pub debug_cross: bool,
    #[serde(default)]
    pub holes: Vec<HoleEntry>,
}

/// A named hole in the overlay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HoleEntry {
    pub id: String,
    #[serde(flatten)]
    pub shape: HoleShape,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_save_mode() -> i32 {
    SAVE_MODE_HOST
}
fn default_fps() -> u32 {
    15
}
fn default_warmup_ms() -> u64 {
    150
}
fn default_keepalive_ms() -> u64 {
    2000
}
fn default_not_ready_retries() -> u32 {
    5
}
fn default_not_ready_backoff_ms() -> u64 {
    80
}
fn default_channel_capacity() -> usize {
    2
}
fn default_min_frame_bytes() -> usize {
    2048
}
fn default_stop_timeout_ms() -> u64 {
    2000
}
fn default_surface_width() -> u32 {
    1080
}
fn default_surface_height() -> u32 {
    1440
}
fn default_mask_color() -> Rgba {
    Rgba::opaque(238, 238, 238)
}
fn default_guide_color() -> Rgba {
    Rgba::new(255, 255, 255, 200)
}
fn default_guide_width() -> f32 {
    2.0
}
fn default_ratio() -> (u32, u32) {
    (3, 4)
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            save_dir: None,
            file_name: None,
            save_mode: default_save_mode(),
        }
    }
}

impl Default for LiveViewConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            warmup_ms: default_warmup_ms(),
            keepalive_ms: default_keepalive_ms(),
            not_ready_retries: default_not_ready_retries(),
            not_ready_backoff_ms: default_not_ready_backoff_ms(),
            channel_capacity: default_channel_capacity(),
            min_frame_bytes: default_min_frame_bytes(),
            trim_to_jpeg: default_true(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            width: default_surface_width(),
            height: default_surface_height(),
            mask_color: default_mask_color(),
            guide_color: default_guide_color(),
            guide_width: default_guide_width(),
            show_guide: default_true(),
            ratio: default_ratio(),
            corner_radius: 0.0,
            dashed_guide: default_true(),
            debug_cross: false,
            holes: Vec::new(),
        }
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl AppConfig {
    /// Applies the `CRSDK_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup` (variable name → value).
    ///
    /// Empty values are ignored.  `CRSDK_FORCE_ENUM` accepts `1`, `true`,
    /// `yes` or `on` (any case); anything else turns it off.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(path) = get(ENV_LIBRARY) {
            self.sdk.library_path = Some(PathBuf::from(path));
        }
        if let Some(serial) = get(ENV_USB_SERIAL) {
            self.sdk.usb_serial = Some(serial);
        }
        if let Some(flag) = get(ENV_FORCE_ENUM) {
            self.sdk.force_enumerate = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
    }

    /// Location of the native library: `explicit` wins, then the config.
    pub fn resolve_library_path(&self, explicit: Option<&Path>) -> Option<PathBuf> {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| self.sdk.library_path.clone())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            usb_serial: self.sdk.usb_serial.clone(),
            force_enumerate: self.sdk.force_enumerate,
            save_dir: self.session.save_dir.clone(),
            file_name: self.session.file_name.clone(),
            save_mode: self.session.save_mode,
            debug: self.sdk.debug,
            warmup: Duration::from_millis(self.liveview.warmup_ms),
            stop_timeout: Duration::from_millis(self.liveview.stop_timeout_ms),
        }
    }
}

impl LiveViewConfig {
    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            fps: self.fps.clamp(1, 60),
            keepalive: Duration::from_millis(self.keepalive_ms),
            not_ready_retries: self.not_ready_retries,
            not_ready_backoff: Duration::from_millis(self.not_ready_backoff_ms),
            min_frame_bytes: self.min_frame_bytes,
            trim_to_jpeg: self.trim_to_jpeg,
        }
    }
}

impl OverlayConfig {
    pub fn style(&self) -> OverlayStyle {
        OverlayStyle {
            mask_color: self.mask_color,
            guide_color: self.guide_color,
            guide_width: self.guide_width,
            show_guide: self.show_guide,
            guide_ratio: Some(self.ratio),
            corner_radius: self.corner_radius,
            dashed_guide: self.dashed_guide,
            debug_cross: self.debug_cross,
            ..OverlayStyle::default()
        }
    }

    /// Builds the configured holes.  Stops at the first invalid shape.
    pub fn hole_paths(&self) -> Result<Vec<(String, GuidePath)>, OverlayError> {
        self.holes
            .iter()
            .map(|h| Ok((h.id.clone(), h.shape.to_path()?)))
            .collect()
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform location.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to the platform location.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config directory, including the app subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("StudioCamera"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("studio-camera"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("StudioCamera")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
