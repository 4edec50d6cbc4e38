//! Render error types.

use crate::gpu::GpuContextError;
use crate::image_desc::PixelFormat;
use crate::stages::BloomPass;

/// Errors surfaced by the bloom pipeline and its backends.
///
/// None of these are retried inside the pipeline; the host decides whether a
/// failed frame is fatal.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The shader program does not expose one of the six pass entry points.
    #[error("shader program is missing entry point '{entry_point}'")]
    InvalidProgram { entry_point: &'static str },

    /// A composite pass was applied without a blur texture bound.
    #[error("{0:?} pass requires a blur texture")]
    MissingBlurTexture(BloomPass),

    /// The backend cannot create or sample images of this format.
    #[error("pixel format {0:?} is not supported by this backend")]
    UnsupportedFormat(PixelFormat),

    /// Image storage could not be allocated.
    #[error("out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: u64 },

    /// An image with a zero dimension was requested.
    #[error("image dimensions must be non-zero, got {width}x{height}")]
    ZeroSizedImage { width: u32, height: u32 },

    /// Supplied pixel data does not match the image dimensions.
    #[error("pixel data length ({actual}) does not match expected ({expected})")]
    PixelDataMismatch { expected: usize, actual: usize },

    /// Copying an image back from the GPU failed.
    #[error("readback failed: {0}")]
    Readback(String),

    /// GPU initialization failed.
    #[error(transparent)]
    GpuContext(#[from] GpuContextError),
}
