//! Mask bloom post-processing: downsample and mask, separable ping-pong blur,
//! and screen/additive compositing over a fixed set of six shader passes.
//!
//! The passes run behind the [`ShaderStages`] trait. [`CpuDevice`] is a software
//! reference backend; [`WgpuDevice`] runs the same passes as WGSL render pipelines.

pub mod blur;
pub mod composite;
pub mod cpu;
pub mod downsample;
pub mod error;
pub mod gpu;
pub mod image_desc;
pub mod pipeline;
pub mod pool;
pub mod stages;
pub mod wgpu_stages;

pub use blur::{MAX_BLUR_ITERATIONS, PingPong, blur};
pub use composite::composite;
pub use cpu::{CpuDevice, CpuImage};
pub use downsample::downsample;
pub use error::RenderError;
pub use gpu::{GpuContext, GpuContextError, init_gpu_context_blocking};
pub use image_desc::{FilterMode, ImageDesc, ImageHandle, PixelFormat};
pub use pipeline::{BloomPipeline, FrameStats};
pub use pool::{ImagePool, PoolStats, PooledImage};
pub use stages::{BloomPass, ShaderStages, StageUniforms};
pub use wgpu_stages::{BLOOM_SHADER_SOURCE, GpuImage, WgpuDevice};

pub use maskbloom_config::{BlendMode, BloomConfig};
