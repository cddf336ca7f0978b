//! Профили качества генерации видео

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Профиль качества Hallo2
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum QualityPreset {
    #[default]
    Balanced,
    High,
    Ultra,
}

/// Параметры, которые задаёт профиль
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresetValues {
    pub resolution: u32,
    pub steps: u32,
    pub lip_weight: f32,
    pub cfg_scale: f32,
}

impl QualityPreset {
    pub fn values(&self) -> PresetValues {
        match self {
            Self::Balanced => PresetValues {
                resolution: 512,
                steps: 40,
                lip_weight: 1.0,
                cfg_scale: 3.5,
            },
            Self::High => PresetValues {
                resolution: 768,
                steps: 50,
                lip_weight: 1.1,
                cfg_scale: 3.8,
            },
            Self::Ultra => PresetValues {
                resolution: 768,
                steps: 60,
                lip_weight: 1.0,
                cfg_scale: 4.5,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Balanced => "balanced",
            Self::High => "high",
            Self::Ultra => "ultra",
        }
    }
}

impl FromStr for QualityPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "balanced" => Ok(Self::Balanced),
            "high" => Ok(Self::High),
            "ultra" => Ok(Self::Ultra),
            other => Err(format!(
                "Unknown quality preset '{}' (expected balanced, high or ultra)",
                other
            )),
        }
    }
}

impl fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
