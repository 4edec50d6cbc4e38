//! Per-frame mask bloom orchestration.
//!
//! [`BloomPipeline`] owns a backend and the temporary image pool. Each
//! [`process`](BloomPipeline::process) call validates the configuration,
//! builds and blurs the mask, then either composites it over the source or,
//! in debug mode, copies it straight into the destination.

use maskbloom_config::{BlendMode, BloomConfig, validate};

use crate::blur::blur;
use crate::composite::composite;
use crate::downsample::downsample;
use crate::error::RenderError;
use crate::image_desc::ImageHandle;
use crate::pool::ImagePool;
use crate::stages::{ShaderStages, StageUniforms};

/// What one [`BloomPipeline::process`] call did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    /// 1-based frame counter.
    pub frame: u64,
    /// Width and height of the blurred mask.
    pub mask_size: (u32, u32),
    /// Blur rounds actually run.
    pub blur_iterations: u32,
    pub blend_mode: BlendMode,
    /// Whether the mask was written instead of the composite.
    pub debug: bool,
}

/// The mask bloom effect bound to one backend.
pub struct BloomPipeline<D: ShaderStages> {
    device: D,
    pool: ImagePool<D::Image>,
    frame: u64,
}

impl<D: ShaderStages> BloomPipeline<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            pool: ImagePool::new(),
            frame: 0,
        }
    }

    /// Apply the effect from `src` into `dst`.
    ///
    /// `dst` is fully overwritten. Every temporary acquired during the call
    /// is accounted for before returning, on success and on error.
    pub fn process(
        &mut self,
        src: &mut D::Image,
        dst: &mut D::Image,
        config: &BloomConfig,
    ) -> Result<FrameStats, RenderError> {
        let config = validate(config);
        self.frame += 1;

        let result = self.render(src, dst, &config);
        self.pool.end_frame();

        match &result {
            Ok(stats) => log::debug!(
                "Frame {}: mask {}x{}, {} blur round(s), {}{}",
                stats.frame,
                stats.mask_size.0,
                stats.mask_size.1,
                stats.blur_iterations,
                stats.blend_mode,
                if stats.debug { " (debug)" } else { "" }
            ),
            Err(e) => log::error!("Frame {} failed: {e}", self.frame),
        }
        result
    }

    fn render(
        &mut self,
        src: &mut D::Image,
        dst: &mut D::Image,
        config: &BloomConfig,
    ) -> Result<FrameStats, RenderError> {
        let uniforms = StageUniforms::from_config(config);

        let mut mask = downsample(
            &mut self.device,
            &mut self.pool,
            src,
            config.levels(),
            &uniforms,
        )?;
        let rounds = match blur(
            &mut self.device,
            &mut self.pool,
            &mut *mask,
            config.blur_iterations,
            &uniforms,
        ) {
            Ok(rounds) => rounds,
            Err(e) => {
                self.pool.release(mask);
                return Err(e);
            }
        };
        let mask_size = (mask.width(), mask.height());

        let written = if config.debug {
            self.device.blit(&mask, dst)
        } else {
            composite(
                &mut self.device,
                src,
                &mut *mask,
                dst,
                config.blend_mode,
                &uniforms,
            )
        };
        self.pool.release(mask);
        written?;
        self.device.flush()?;

        Ok(FrameStats {
            frame: self.frame,
            mask_size,
            blur_iterations: rounds,
            blend_mode: config.blend_mode,
            debug: config.debug,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn pool(&self) -> &ImagePool<D::Image> {
        &self.pool
    }

    /// Frames processed so far, including failed ones.
    pub fn frame_count(&self) -> u64 {
        self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{CpuDevice, CpuImage};
    use crate::image_desc::{ImageDesc, PixelFormat};
    use crate::stages::BloomPass;

    fn image(w: u32, h: u32, value: f32) -> CpuImage {
        CpuImage::filled(
            ImageDesc::new(w, h, PixelFormat::Rgba32Float),
            [value, value, value, 1.0],
        )
        .unwrap()
    }

    #[test]
    fn test_default_config_frame() {
        let mut pipeline = BloomPipeline::new(CpuDevice::new());
        let mut src = image(64, 32, 0.9);
        let mut dst = image(64, 32, 0.0);

        let stats = pipeline
            .process(&mut src, &mut dst, &BloomConfig::default())
            .unwrap();
        assert_eq!(stats.frame, 1);
        assert_eq!(stats.mask_size, (16, 8));
        assert_eq!(stats.blur_iterations, 3);
        assert_eq!(stats.blend_mode, BlendMode::Screen);
        assert_eq!(pipeline.pool().outstanding(), 0);
        assert_eq!(pipeline.device().pass_count(BloomPass::CompositeScreen), 1);
    }

    #[test]
    fn test_config_is_clamped_every_frame() {
        let mut pipeline = BloomPipeline::new(CpuDevice::new());
        let mut src = image(8, 8, 0.5);
        let mut dst = image(8, 8, 0.0);
        let config = BloomConfig {
            blur_iterations: 0,
            downsample_levels: -4,
            bloom_intensity: -1.0,
            ..BloomConfig::default()
        };

        let stats = pipeline.process(&mut src, &mut dst, &config).unwrap();
        assert_eq!(stats.blur_iterations, 1);
        assert_eq!(stats.mask_size, (8, 8));
        assert_eq!(dst.pixels(), src.pixels());
    }

    #[test]
    fn test_debug_skips_composite() {
        let mut pipeline = BloomPipeline::new(CpuDevice::new());
        let mut src = image(16, 16, 3.0);
        let mut dst = image(16, 16, 0.0);
        let config = BloomConfig {
            debug: true,
            ..BloomConfig::default()
        };

        let stats = pipeline.process(&mut src, &mut dst, &config).unwrap();
        assert!(stats.debug);
        let device = pipeline.device();
        assert_eq!(device.pass_count(BloomPass::CompositeScreen), 0);
        assert_eq!(device.pass_count(BloomPass::CompositeAdd), 0);
        assert_eq!(pipeline.pool().outstanding(), 0);
    }

    #[test]
    fn test_frame_counter_advances() {
        let mut pipeline = BloomPipeline::new(CpuDevice::new());
        let mut src = image(4, 4, 0.1);
        let mut dst = image(4, 4, 0.0);
        for expected in 1..=3 {
            let stats = pipeline
                .process(&mut src, &mut dst, &BloomConfig::default())
                .unwrap();
            assert_eq!(stats.frame, expected);
        }
        assert_eq!(pipeline.frame_count(), 3);
    }

    #[test]
    fn test_temporaries_are_recycled_across_frames() {
        let mut pipeline = BloomPipeline::new(CpuDevice::new());
        let mut src = image(32, 32, 1.0);
        let mut dst = image(32, 32, 0.0);

        pipeline
            .process(&mut src, &mut dst, &BloomConfig::default())
            .unwrap();
        let allocated = pipeline.pool().stats().allocated;
        pipeline
            .process(&mut src, &mut dst, &BloomConfig::default())
            .unwrap();
        assert_eq!(pipeline.pool().stats().allocated, allocated);
        assert!(pipeline.pool().stats().reused > 0);
    }
}
