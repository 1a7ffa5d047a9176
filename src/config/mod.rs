//! Application Configuration
//!
//! Rectification and video settings, stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PlateError;

/// Largest accepted rotation correction in degrees
pub const MAX_ROTATION_DEGREES: f64 = 15.0;

/// Largest accepted morphology kernel (radius must fit in a `u8`)
pub const MAX_KERNEL_SIZE: u32 = 511;

/// Largest image any stage may allocate, in pixels (64 Mpx)
pub const MAX_OUTPUT_PIXELS: u64 = 1 << 26;

/// Reject output canvases that are empty or exceed [`MAX_OUTPUT_PIXELS`]
pub fn check_output_size(width: u64, height: u64) -> Result<(), PlateError> {
    match width.checked_mul(height) {
        Some(pixels) if pixels > 0 && pixels <= MAX_OUTPUT_PIXELS => Ok(()),
        _ => Err(PlateError::InvalidConfig(format!(
            "output size {}x{} outside 1..={} pixels",
            width, height, MAX_OUTPUT_PIXELS
        ))),
    }
}

/// Application settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Per-image rectification and preprocessing
    pub rectification: RectificationConfig,
    /// Video consensus settings
    pub video: VideoSettings,
}

/// Binarization threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    /// Otsu threshold computed from the luminance histogram
    #[default]
    Auto,
    /// Fixed level; pixels above it become white
    Fixed(u8),
}

/// Morphological cleanup applied after binarization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MorphOp {
    #[default]
    None,
    /// Shrinks white regions
    Erosion,
    /// Grows white regions
    Dilation,
}

/// Rectification and preprocessing parameters for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RectificationConfig {
    /// Width / height of the output; measured from the corners when unset
    pub forced_aspect_ratio: Option<f64>,
    /// Upscale factor applied to both output dimensions (>= 1)
    pub output_scale: f64,
    /// Rotation applied after perspective correction, counter-clockwise
    pub rotation_degrees: f64,
    /// Binarization threshold
    pub threshold: Threshold,
    /// Morphological operation
    pub morph_op: MorphOp,
    /// Square kernel edge length, odd
    pub kernel_size: u32,
    /// White border added around the prepared image
    pub padding_px: u32,
    /// Output height before scaling when an aspect ratio is forced
    pub reference_height: f64,
}

impl Default for RectificationConfig {
    fn default() -> Self {
        Self {
            forced_aspect_ratio: None,
            output_scale: 1.0,
            rotation_degrees: 0.0,
            threshold: Threshold::Auto,
            morph_op: MorphOp::None,
            kernel_size: 1,
            padding_px: 20,
            reference_height: 300.0,
        }
    }
}

impl RectificationConfig {
    /// Check every field range
    pub fn validate(&self) -> Result<(), PlateError> {
        if let Some(ratio) = self.forced_aspect_ratio {
            if !ratio.is_finite() || ratio <= 0.0 {
                return Err(PlateError::InvalidConfig(format!(
                    "forced_aspect_ratio must be positive, got {}",
                    ratio
                )));
            }
        }
        if !self.output_scale.is_finite() || self.output_scale < 1.0 {
            return Err(PlateError::InvalidConfig(format!(
                "output_scale must be >= 1, got {}",
                self.output_scale
            )));
        }
        if !self.rotation_degrees.is_finite()
            || self.rotation_degrees.abs() > MAX_ROTATION_DEGREES
        {
            return Err(PlateError::InvalidConfig(format!(
                "rotation_degrees must lie in [-{max}, {max}], got {}",
                self.rotation_degrees,
                max = MAX_ROTATION_DEGREES
            )));
        }
        self.validate_kernel()?;
        if !self.reference_height.is_finite() || self.reference_height <= 0.0 {
            return Err(PlateError::InvalidConfig(format!(
                "reference_height must be positive, got {}",
                self.reference_height
            )));
        }
        Ok(())
    }

    /// Kernel checks only; preprocessing does not depend on the geometry fields
    pub fn validate_kernel(&self) -> Result<(), PlateError> {
        if self.kernel_size == 0 || self.kernel_size % 2 == 0 {
            return Err(PlateError::InvalidConfig(format!(
                "kernel_size must be a positive odd number, got {}",
                self.kernel_size
            )));
        }
        if self.kernel_size > MAX_KERNEL_SIZE {
            return Err(PlateError::InvalidConfig(format!(
                "kernel_size must be at most {}, got {}",
                MAX_KERNEL_SIZE, self.kernel_size
            )));
        }
        Ok(())
    }
}

/// Video consensus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    /// Frames to sample from the requested window
    pub frame_count: usize,
    /// Worker threads preparing frames
    pub workers: usize,
    /// Recognizer instances shared by the workers
    pub recognizers: usize,
    /// Request deadline in milliseconds; 0 disables it
    pub timeout_ms: u64,
    /// Normalized readings shorter than this do not vote
    pub min_text_len: usize,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            frame_count: 10,
            workers: 4,
            recognizers: 1,
            timeout_ms: 30_000,
            min_text_len: 3,
        }
    }
}

impl VideoSettings {
    /// Deadline as a duration, `None` when disabled
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn validate(&self) -> Result<(), PlateError> {
        if self.frame_count == 0 {
            return Err(PlateError::InvalidConfig(
                "frame_count must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(PlateError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.recognizers == 0 {
            return Err(PlateError::InvalidConfig(
                "recognizers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default location of `config.toml`
pub fn default_config_path() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "platelens", "PlateLens")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    Ok(proj_dirs.config_dir().join("config.toml"))
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {:?}", path))?;
    Ok(config)
}

/// Load configuration, falling back to defaults when the file is absent
pub fn load_or_default(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(AppConfig::default())
    }
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert!(config.rectification.forced_aspect_ratio.is_none());
        assert_eq!(config.rectification.output_scale, 1.0);
        assert_eq!(config.rectification.threshold, Threshold::Auto);
        assert_eq!(config.rectification.morph_op, MorphOp::None);
        assert_eq!(config.rectification.kernel_size, 1);
        assert_eq!(config.rectification.padding_px, 20);
        assert!(config.rectification.validate().is_ok());

        assert_eq!(config.video.frame_count, 10);
        assert_eq!(config.video.min_text_len, 3);
        assert!(config.video.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let bad = [
            RectificationConfig { forced_aspect_ratio: Some(0.0), ..Default::default() },
            RectificationConfig { forced_aspect_ratio: Some(-2.0), ..Default::default() },
            RectificationConfig { output_scale: 0.5, ..Default::default() },
            RectificationConfig { rotation_degrees: 20.0, ..Default::default() },
            RectificationConfig { kernel_size: 4, ..Default::default() },
            RectificationConfig { kernel_size: 0, ..Default::default() },
            RectificationConfig { reference_height: 0.0, ..Default::default() },
        ];

        for config in bad {
            assert!(
                matches!(config.validate(), Err(PlateError::InvalidConfig(_))),
                "accepted {:?}",
                config
            );
        }
    }

    #[test]
    fn test_check_output_size() {
        assert!(check_output_size(300, 75).is_ok());
        assert!(check_output_size(8192, 8192).is_ok());
        assert!(matches!(check_output_size(8193, 8192), Err(PlateError::InvalidConfig(_))));
        assert!(matches!(check_output_size(0, 10), Err(PlateError::InvalidConfig(_))));
        assert!(check_output_size(u64::MAX, u64::MAX).is_err());
    }

    #[test]
    fn test_timeout_disabled_at_zero() {
        let settings = VideoSettings { timeout_ms: 0, ..Default::default() };
        assert!(settings.timeout().is_none());
        assert_eq!(
            VideoSettings::default().timeout(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = AppConfig::default();
        config.rectification.forced_aspect_ratio = Some(4.0);
        config.rectification.threshold = Threshold::Fixed(140);
        config.rectification.morph_op = MorphOp::Dilation;
        config.rectification.kernel_size = 3;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config, parsed);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: AppConfig = toml::from_str(
            "[rectification]\noutput_scale = 2.0\nmorph_op = \"erosion\"\n",
        )
        .unwrap();

        assert_eq!(parsed.rectification.output_scale, 2.0);
        assert_eq!(parsed.rectification.morph_op, MorphOp::Erosion);
        assert_eq!(parsed.rectification.padding_px, 20);
        assert_eq!(parsed.video, VideoSettings::default());
    }

    #[test]
    fn test_save_and_load_config() {
        let config = AppConfig::default();
        let temp_file = NamedTempFile::new().unwrap();

        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());

        let fallback = load_or_default(Path::new("/nonexistent/path/config.toml")).unwrap();
        assert_eq!(fallback, AppConfig::default());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
