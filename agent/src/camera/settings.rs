//! Camera image settings

use serde::{Deserialize, Serialize};

use crate::camera::resolution::Resolution;

const NEUTRAL_BRIGHTNESS: f64 = 0.5;
const NEUTRAL_CONTRAST: f64 = 1.0;
const NEUTRAL_EXPOSURE: f64 = 0.5;
const MANUAL_EPSILON: f64 = 0.01;

/// User-facing camera settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    #[serde(default = "default_brightness")]
    pub brightness: f64,

    #[serde(default = "default_contrast")]
    pub contrast: f64,

    #[serde(default = "default_exposure")]
    pub exposure: f64,

    #[serde(default)]
    pub resolution: Resolution,
}

fn default_brightness() -> f64 {
    NEUTRAL_BRIGHTNESS
}

fn default_contrast() -> f64 {
    NEUTRAL_CONTRAST
}

fn default_exposure() -> f64 {
    NEUTRAL_EXPOSURE
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            brightness: NEUTRAL_BRIGHTNESS,
            contrast: NEUTRAL_CONTRAST,
            exposure: NEUTRAL_EXPOSURE,
            resolution: Resolution::default(),
        }
    }
}

/// Exposure mode applied to a local device
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExposureMode {
    Auto,
    Manual {
        brightness: f64,
        contrast: f64,
        exposure: f64,
    },
}

impl CameraSettings {
    /// Whether any of brightness, contrast or exposure departs from neutral
    pub fn is_manual(&self) -> bool {
        (self.brightness - NEUTRAL_BRIGHTNESS).abs() > MANUAL_EPSILON
            || (self.contrast - NEUTRAL_CONTRAST).abs() > MANUAL_EPSILON
            || (self.exposure - NEUTRAL_EXPOSURE).abs() > MANUAL_EPSILON
    }

    pub fn exposure_mode(&self) -> ExposureMode {
        if self.is_manual() {
            ExposureMode::Manual {
                brightness: self.brightness,
                contrast: self.contrast,
                exposure: self.exposure,
            }
        } else {
            ExposureMode::Auto
        }
    }

    /// Whether software brightness/contrast adjustment would change pixels
    pub fn needs_adjustment(&self) -> bool {
        (self.brightness - NEUTRAL_BRIGHTNESS).abs() > f64::EPSILON
            || (self.contrast - NEUTRAL_CONTRAST).abs() > f64::EPSILON
    }
}
