use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SETTINGS_PATH: &str = "config/settings.toml";

/// Upper bound for constellation point radius and line thickness, in pixels.
pub const MAX_STROKE_PX: i32 = 64;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Runtime settings. Every section falls back to its defaults field by field,
/// so a settings file only has to name what it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub camera_index: u32,
    pub width: u32,
    pub height: u32,
    pub mirror: bool,
    pub max_num_hands: usize,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
    pub show_camera_background: bool,
    pub black_background: bool,
    pub draw_fps: bool,
    pub capture_frames_on_change: bool,
    pub frames_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub models_dir: PathBuf,
    pub window_title: String,
    pub dashboard: DashboardSettings,
    pub constellation: ConstellationSettings,
    pub osc: OscSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstellationSettings {
    pub enabled: bool,
    pub neighbors: usize,
    pub point_radius: i32,
    pub line_thickness: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OscSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub send_landmarks: bool,
    pub fps_interval_sec: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            camera_index: 0,
            width: 1280,
            height: 720,
            mirror: true,
            max_num_hands: 1,
            min_detection_confidence: 0.6,
            min_tracking_confidence: 0.6,
            show_camera_background: false,
            black_background: true,
            draw_fps: true,
            capture_frames_on_change: true,
            frames_dir: PathBuf::from("frames"),
            logs_dir: PathBuf::from("logs"),
            models_dir: PathBuf::from("models"),
            window_title: "Thesidia-HandControl-Alpha".to_string(),
            dashboard: DashboardSettings::default(),
            constellation: ConstellationSettings::default(),
            osc: OscSettings::default(),
        }
    }
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8765,
        }
    }
}

impl Default for ConstellationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            neighbors: 3,
            point_radius: 3,
            line_thickness: 1,
        }
    }
}

impl Default for OscSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 9000,
            send_landmarks: false,
            fps_interval_sec: 0.5,
        }
    }
}

impl OscSettings {
    /// Falls back to the default interval when the value is not a
    /// representable duration; `Settings::validate` rejects those.
    pub fn fps_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.fps_interval_sec)
            .unwrap_or_else(|_| Duration::from_millis(500))
    }
}

impl Settings {
    /// Reads settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        let settings = Self::from_toml_str(&content)
            .with_context(|| format!("invalid settings in {}", path.display()))?;
        Ok(settings)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut settings: Settings = toml::from_str(content)?;
        settings.constellation.neighbors = settings.constellation.neighbors.max(1);
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid {
                field: "width/height",
                reason: format!("resolution {}x{} has a zero side", self.width, self.height),
            });
        }
        if self.max_num_hands == 0 {
            return Err(ConfigError::Invalid {
                field: "max_num_hands",
                reason: "must be at least 1".to_string(),
            });
        }
        for (field, value) in [
            ("min_detection_confidence", self.min_detection_confidence),
            ("min_tracking_confidence", self.min_tracking_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} is outside [0, 1]"),
                });
            }
        }
        for (field, value) in [
            ("constellation.point_radius", self.constellation.point_radius),
            ("constellation.line_thickness", self.constellation.line_thickness),
        ] {
            if !(0..=MAX_STROKE_PX).contains(&value) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} is outside [0, {MAX_STROKE_PX}]"),
                });
            }
        }
        let interval = self.osc.fps_interval_sec;
        if !(interval > 0.0 && Duration::try_from_secs_f64(interval).is_ok()) {
            return Err(ConfigError::Invalid {
                field: "osc.fps_interval_sec",
                reason: format!("{} is not a positive duration", self.osc.fps_interval_sec),
            });
        }
        Ok(())
    }

    /// Camera pixels are shown only when asked for and black is not forced.
    pub fn camera_background(&self) -> bool {
        self.show_camera_background && !self.black_background
    }
}
