//! Command-line argument parsing for the offline host.

use std::path::PathBuf;

use clap::Parser;

use crate::{Backend, BlendMode, Config, ImageFormat};

/// Apply a mask bloom to an image file.
///
/// CLI values override settings loaded from `maskbloom.ron`.
#[derive(Parser, Debug)]
#[command(name = "maskbloom", about = "Mask bloom post-processing")]
pub struct CliArgs {
    /// Source image.
    pub input: PathBuf,

    /// Destination image. The format is picked from the extension.
    pub output: PathBuf,

    /// Blend mode (screen, add). Unknown names fall back to screen.
    #[arg(long)]
    pub blend: Option<String>,

    /// Separable blur rounds.
    #[arg(long, allow_negative_numbers = true)]
    pub iterations: Option<i32>,

    /// Half-resolution steps before masking.
    #[arg(long, allow_negative_numbers = true)]
    pub downsample: Option<i32>,

    /// Bloom intensity multiplier.
    #[arg(long, allow_negative_numbers = true)]
    pub intensity: Option<f32>,

    /// Mask luminance threshold.
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Mask soft knee width.
    #[arg(long)]
    pub soft_knee: Option<f32>,

    /// Write the blurred mask instead of the composited image.
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub debug: Option<bool>,

    /// Backend that runs the passes.
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Working pixel format.
    #[arg(long, value_enum)]
    pub format: Option<ImageFormat>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref name) = args.blend {
            self.bloom.blend_mode = BlendMode::from_name(name);
        }
        if let Some(iterations) = args.iterations {
            self.bloom.blur_iterations = iterations;
        }
        if let Some(levels) = args.downsample {
            self.bloom.downsample_levels = levels;
        }
        if let Some(intensity) = args.intensity {
            self.bloom.bloom_intensity = intensity;
        }
        if let Some(threshold) = args.threshold {
            self.bloom.threshold = threshold;
        }
        if let Some(knee) = args.soft_knee {
            self.bloom.soft_knee = knee;
        }
        if let Some(debug) = args.debug {
            self.bloom.debug = debug;
        }
        if let Some(backend) = args.backend {
            self.render.backend = backend;
        }
        if let Some(format) = args.format {
            self.render.format = format;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
