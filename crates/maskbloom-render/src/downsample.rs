//! Reduce a source image to a quarter-resolution (or smaller) bloom mask.

use crate::error::RenderError;
use crate::image_desc::{FilterMode, ImageHandle};
use crate::pool::{ImagePool, PooledImage};
use crate::stages::{BloomPass, ShaderStages, StageUniforms};

/// Copy `src`, halve it `levels` times, and extract the mask.
///
/// Returns a pooled image of `floor(size / 2^levels)` per dimension (never
/// below 1 px) holding the mask, set to bilinear filtering. Every intermediate is released before
/// returning; on error, intermediates still out are written off at frame end.
pub fn downsample<D: ShaderStages>(
    device: &mut D,
    pool: &mut ImagePool<D::Image>,
    src: &mut D::Image,
    levels: u32,
    uniforms: &StageUniforms<'_, D::Image>,
) -> Result<PooledImage<D::Image>, RenderError> {
    src.set_filter(FilterMode::Bilinear);
    let mut current = pool.acquire(device, src.desc())?;
    device.apply(BloomPass::DownsampleCopy, src, &mut current, uniforms)?;

    for level in 0..levels {
        let mut next = pool.acquire(device, current.desc().half())?;
        current.set_filter(FilterMode::Bilinear);
        device.apply(BloomPass::DownsampleCopy, &current, &mut next, uniforms)?;
        log::trace!("Downsample level {}: {}x{}", level + 1, next.width(), next.height());
        pool.release(std::mem::replace(&mut current, next));
    }

    let mut mask = pool.acquire(device, current.desc())?;
    mask.set_filter(FilterMode::Bilinear);
    current.set_filter(FilterMode::Bilinear);
    device.apply(BloomPass::MaskExtract, &current, &mut mask, uniforms)?;
    pool.release(current);

    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{CpuDevice, CpuImage};
    use crate::image_desc::{ImageDesc, PixelFormat};

    fn source(w: u32, h: u32) -> CpuImage {
        CpuImage::filled(
            ImageDesc::new(w, h, PixelFormat::Rgba32Float),
            [2.0, 2.0, 2.0, 1.0],
        )
        .unwrap()
    }

    #[test]
    fn test_mask_size_halves_per_level() {
        let mut device = CpuDevice::new();
        let mut pool = ImagePool::new();
        let mut src = source(100, 60);

        for (levels, expected) in [(0, (100, 60)), (1, (50, 30)), (2, (25, 15)), (3, (12, 7))] {
            let mask =
                downsample(&mut device, &mut pool, &mut src, levels, &StageUniforms::default())
                    .unwrap();
            assert_eq!((mask.width(), mask.height()), expected);
            pool.release(mask);
        }
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_degenerate_source_floors_at_one_pixel() {
        let mut device = CpuDevice::new();
        let mut pool = ImagePool::new();
        let mut src = source(3, 1);

        let mask =
            downsample(&mut device, &mut pool, &mut src, 4, &StageUniforms::default()).unwrap();
        assert_eq!((mask.width(), mask.height()), (1, 1));
        pool.release(mask);
    }

    #[test]
    fn test_pass_sequence() {
        let mut device = CpuDevice::new();
        let mut pool = ImagePool::new();
        let mut src = source(16, 16);

        let mask =
            downsample(&mut device, &mut pool, &mut src, 2, &StageUniforms::default()).unwrap();
        assert_eq!(device.pass_count(BloomPass::DownsampleCopy), 3);
        assert_eq!(device.pass_count(BloomPass::MaskExtract), 1);
        assert_eq!(src.filter(), FilterMode::Bilinear);
        assert_eq!(mask.filter(), FilterMode::Bilinear);
        assert_eq!(pool.outstanding(), 1);
        pool.release(mask);
    }

    #[test]
    fn test_flat_bright_source_gives_flat_mask() {
        let mut device = CpuDevice::new();
        let mut pool = ImagePool::new();
        let mut src = source(8, 8);

        let mask =
            downsample(&mut device, &mut pool, &mut src, 1, &StageUniforms::default()).unwrap();
        let first = mask.pixel(0, 0);
        assert!(first[0] > 0.0);
        assert!(mask.pixels().iter().all(|p| *p == first));
        pool.release(mask);
    }
}
