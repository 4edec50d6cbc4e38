//! Configuration for the mask bloom effect.
//!
//! Holds the host-settable bloom parameters, the per-frame sanitizing step that
//! clamps them, RON persistence for the offline host, and CLI overrides.

mod bloom;
mod cli;
mod config;
mod error;

pub use bloom::{BlendMode, BloomConfig, validate};
pub use cli::CliArgs;
pub use config::{Backend, Config, DebugConfig, ImageFormat, RenderConfig};
pub use error::ConfigError;
