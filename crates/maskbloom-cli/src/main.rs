//! Offline host for the mask bloom effect.
//!
//! Configuration is loaded from `maskbloom.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p maskbloom-cli -- in.png out.png --blend add --intensity 2`.

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use image::{DynamicImage, RgbaImage};
use maskbloom_config::{Backend, CliArgs, Config};
use maskbloom_render::{
    BloomPipeline, CpuDevice, CpuImage, FrameStats, GpuContextError, ImageDesc, ImageHandle,
    PixelFormat, RenderError, ShaderStages, WgpuDevice, init_gpu_context_blocking,
};
use tracing::{info, warn};

/// Failures that end a run with a non-zero exit code.
#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("image i/o failed: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Gpu(#[from] GpuContextError),

    #[error("output buffer does not match {width}x{height}")]
    OutputSize { width: u32, height: u32 },
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Resolve config directory
    let config_dir = args.config.clone().or_else(Config::default_dir);

    // Load or create config, then apply CLI overrides
    let mut config = match config_dir.as_deref() {
        Some(dir) => Config::load_or_create(dir).unwrap_or_else(|e| {
            eprintln!("Failed to load config: {e}, using defaults");
            Config::default()
        }),
        None => Config::default(),
    };
    config.apply_cli_overrides(&args);

    maskbloom_log::init_logging(Some(&config));

    match run(&args.input, &args.output, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("maskbloom: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Decode `input`, run one frame of the effect, and encode the result to `output`.
fn run(input: &Path, output: &Path, config: &Config) -> Result<(), AppError> {
    let source = image::open(input)?;
    info!(
        "Loaded {} ({}x{})",
        input.display(),
        source.width(),
        source.height()
    );

    let (result, stats) = match config.render.backend {
        Backend::Cpu => run_cpu(&source, config)?,
        Backend::Gpu => run_gpu(&source, config)?,
    };
    info!(
        frame = stats.frame,
        mask_width = stats.mask_size.0,
        mask_height = stats.mask_size.1,
        blur_iterations = stats.blur_iterations,
        blend = %stats.blend_mode,
        debug = stats.debug,
        "Bloom applied"
    );

    save(&result, output)?;
    info!("Wrote {}", output.display());
    Ok(())
}

fn run_cpu(source: &DynamicImage, config: &Config) -> Result<(DynamicImage, FrameStats), AppError> {
    let format = PixelFormat::from(config.render.format);
    let mut src = CpuImage::from_dynamic(source, format)?;
    let mut dst = CpuImage::new(src.desc())?;

    let mut pipeline = BloomPipeline::new(CpuDevice::new());
    let stats = pipeline.process(&mut src, &mut dst, &config.bloom)?;

    let image = rgba8_image(dst.width(), dst.height(), dst.to_rgba8())?;
    Ok((image, stats))
}

fn run_gpu(source: &DynamicImage, config: &Config) -> Result<(DynamicImage, FrameStats), AppError> {
    let context = init_gpu_context_blocking()?;
    let mut device = WgpuDevice::new(&context);

    let rgba = source.to_rgba8();
    let (width, height) = rgba.dimensions();
    let upload = device.upload_rgba8(width, height, rgba.as_raw())?;

    let format = gpu_format(PixelFormat::from(config.render.format));
    let mut src = if format == PixelFormat::Rgba8Unorm {
        upload
    } else {
        let mut converted = device.create_image(ImageDesc::new(width, height, format))?;
        device.blit(&upload, &mut converted)?;
        converted
    };
    let mut dst = device.create_image(src.desc())?;

    let mut pipeline = BloomPipeline::new(device);
    let stats = pipeline.process(&mut src, &mut dst, &config.bloom)?;
    let bytes = pipeline.device_mut().read_rgba8(&dst)?;

    let image = rgba8_image(width, height, bytes)?;
    Ok((image, stats))
}

/// Working format on the GPU backend, which cannot filter 32-bit float textures.
fn gpu_format(requested: PixelFormat) -> PixelFormat {
    if requested == PixelFormat::Rgba32Float {
        warn!("rgba32f is not supported on the GPU backend, using rgba16f");
        PixelFormat::Rgba16Float
    } else {
        requested
    }
}

fn rgba8_image(width: u32, height: u32, bytes: Vec<u8>) -> Result<DynamicImage, AppError> {
    RgbaImage::from_raw(width, height, bytes)
        .map(DynamicImage::ImageRgba8)
        .ok_or(AppError::OutputSize { width, height })
}

/// Encode by extension. JPEG has no alpha channel, so it is dropped first.
fn save(image: &DynamicImage, path: &Path) -> Result<(), AppError> {
    let is_jpeg = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));
    if is_jpeg {
        DynamicImage::ImageRgb8(image.to_rgb8()).save(path)?;
    } else {
        image.save(path)?;
    }
    Ok(())
}
