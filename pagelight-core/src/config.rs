use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::Viewport;
use crate::projector::{crosshair_drift, DEFAULT_CROSSHAIR_SIZE, ROUND_TRIP_TOLERANCE};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode config: {0}")]
    Decode(#[from] toml::de::Error),
    #[error("invalid zoom range: min_scale {min} must be positive and not above max_scale {max}")]
    InvalidScaleRange { min: f64, max: f64 },
    #[error("round_trip_tolerance must be a positive number, got {0}")]
    InvalidTolerance(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OverlayConfig {
    pub measure: MeasureSettings,
    pub projector: ProjectorSettings,
    pub highlight: HighlightStyle,
}

impl OverlayConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.projector.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }
}

/// Tuning for the geometry measurer. The fallback ratios only apply when a
/// text node carries no per-glyph boxes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasureSettings {
    pub fallback_advance_ratio: f64,
    pub fallback_line_height_ratio: f64,
    pub line_break_tolerance: f64,
}

impl Default for MeasureSettings {
    fn default() -> Self {
        Self {
            fallback_advance_ratio: 0.5,
            fallback_line_height_ratio: 1.2,
            line_break_tolerance: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorSettings {
    pub crosshair_size: f64,
    pub round_trip_tolerance: f64,
    pub min_scale: f64,
    pub max_scale: f64,
}

impl ProjectorSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (min, max) = (self.min_scale, self.max_scale);
        if !(min.is_finite() && max.is_finite() && min > 0.0 && min <= max) {
            return Err(ConfigError::InvalidScaleRange { min, max });
        }
        let tolerance = self.round_trip_tolerance;
        if !(tolerance.is_finite() && tolerance > 0.0) {
            return Err(ConfigError::InvalidTolerance(tolerance));
        }
        Ok(())
    }

    /// Never panics, even on a range that failed validation.
    pub fn clamp_scale(&self, scale: f64) -> f64 {
        scale.max(self.min_scale).min(self.max_scale)
    }

    /// Whether the corner crosshairs survive a screen round trip at `vp`
    /// within `round_trip_tolerance`.
    pub fn crosshairs_hold(&self, vp: &Viewport) -> bool {
        crosshair_drift(vp, self.crosshair_size) <= self.round_trip_tolerance
    }
}

impl Default for ProjectorSettings {
    fn default() -> Self {
        Self {
            crosshair_size: DEFAULT_CROSSHAIR_SIZE,
            round_trip_tolerance: ROUND_TRIP_TOLERANCE,
            min_scale: 0.25,
            max_scale: 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightStyle {
    pub color: [u8; 3],
    pub alpha: f32,
    pub active_color: [u8; 3],
    pub active_alpha: f32,
}

impl Default for HighlightStyle {
    fn default() -> Self {
        Self {
            color: [255, 200, 0],
            alpha: 0.2,
            active_color: [255, 235, 0],
            active_alpha: 0.35,
        }
    }
}
