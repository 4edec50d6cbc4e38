//! Bloom effect parameters and their per-frame validation.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// How the blurred bloom mask is combined with the source frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// `1 - (1 - base) * (1 - bloom)`; never exceeds white for in-range inputs.
    #[default]
    Screen,
    /// `base + bloom`; the output device clamps to its range.
    Add,
}

impl BlendMode {
    /// Map a raw host enum value to a blend mode.
    ///
    /// Anything other than `1` resolves to [`BlendMode::Screen`].
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => BlendMode::Screen,
            1 => BlendMode::Add,
            other => {
                log::warn!("Unknown blend mode value {other}, falling back to screen");
                BlendMode::Screen
            }
        }
    }

    /// Parse a blend mode name, case-insensitively.
    ///
    /// Unknown names resolve to [`BlendMode::Screen`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "screen" => BlendMode::Screen,
            "add" | "additive" => BlendMode::Add,
            other => {
                log::warn!("Unknown blend mode '{other}', falling back to screen");
                BlendMode::Screen
            }
        }
    }

    /// Lower-case name used in config files and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            BlendMode::Screen => "screen",
            BlendMode::Add => "add",
        }
    }
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// Stored as a string so that an unrecognised name in a config file degrades to
// screen instead of failing the whole load.
impl Serialize for BlendMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for BlendMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(BlendMode::from_name(&name))
    }
}

/// Host-settable bloom parameters.
///
/// Integer fields are signed because hosts may write out-of-range values; call
/// [`BloomConfig::validated`] before use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BloomConfig {
    /// Compositing formula for the final pass.
    pub blend_mode: BlendMode,
    /// Separable blur rounds. Floor 1 after validation; the blur stage itself
    /// additionally caps at 10.
    pub blur_iterations: i32,
    /// Number of half-resolution steps before masking. Floor 0.
    pub downsample_levels: i32,
    /// Multiplier applied to the blurred mask when compositing. Floor 0.
    pub bloom_intensity: f32,
    /// Luminance above which pixels contribute to the mask.
    pub threshold: f32,
    /// Width of the soft transition below `threshold`, in luminance units.
    pub soft_knee: f32,
    /// Output the blurred mask instead of the composited frame.
    pub debug: bool,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            blend_mode: BlendMode::Screen,
            blur_iterations: 3,
            downsample_levels: 2,
            bloom_intensity: 1.0,
            threshold: 0.8,
            soft_knee: 0.1,
            debug: false,
        }
    }
}

impl BloomConfig {
    /// Return a sanitized copy with every field inside its legal range.
    ///
    /// `f32::max` discards NaN, so a NaN intensity becomes `0.0`.
    pub fn validated(&self) -> BloomConfig {
        BloomConfig {
            blend_mode: self.blend_mode,
            blur_iterations: self.blur_iterations.max(1),
            downsample_levels: self.downsample_levels.max(0),
            bloom_intensity: self.bloom_intensity.max(0.0),
            threshold: self.threshold.max(0.0),
            soft_knee: self.soft_knee.max(0.0),
            debug: self.debug,
        }
    }

    /// Downsample levels as an unsigned count. Negative values read as zero.
    pub fn levels(&self) -> u32 {
        self.downsample_levels.max(0) as u32
    }
}

/// Free-function form of [`BloomConfig::validated`].
pub fn validate(config: &BloomConfig) -> BloomConfig {
    config.validated()
}
