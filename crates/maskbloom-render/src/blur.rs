//! Separable Gaussian blur over a pair of ping-pong buffers.

use crate::error::RenderError;
use crate::image_desc::{FilterMode, ImageHandle};
use crate::pool::{ImagePool, PooledImage};
use crate::stages::{BloomPass, ShaderStages, StageUniforms};

/// Upper bound on blur rounds.
pub const MAX_BLUR_ITERATIONS: i32 = 10;

/// Two same-sized temporaries where each pass reads the front buffer and
/// writes the back one.
pub struct PingPong<I> {
    buffers: [PooledImage<I>; 2],
    front: usize,
}

impl<I: ImageHandle> PingPong<I> {
    /// Acquire both buffers with the size and format of `like`.
    pub fn acquire<D>(device: &mut D, pool: &mut ImagePool<I>, like: &I) -> Result<Self, RenderError>
    where
        D: ShaderStages<Image = I>,
    {
        let a = pool.acquire(device, like.desc())?;
        let b = match pool.acquire(device, like.desc()) {
            Ok(b) => b,
            Err(e) => {
                pool.release(a);
                return Err(e);
            }
        };
        Ok(Self {
            buffers: [a, b],
            front: 0,
        })
    }

    pub fn front(&self) -> &I {
        &self.buffers[self.front]
    }

    pub fn front_mut(&mut self) -> &mut I {
        &mut self.buffers[self.front]
    }

    /// Borrow the front buffer for reading and the back one for writing.
    pub fn split(&mut self) -> (&mut I, &mut I) {
        let (first, second) = self.buffers.split_at_mut(1);
        let (a, b) = (&mut *first[0], &mut *second[0]);
        if self.front == 0 { (a, b) } else { (b, a) }
    }

    pub fn swap(&mut self) {
        self.front ^= 1;
    }

    /// Return both buffers to the pool.
    pub fn release(self, pool: &mut ImagePool<I>) {
        let [a, b] = self.buffers;
        pool.release(a);
        pool.release(b);
    }
}

/// Run one separable pass from the front buffer into the back one.
fn ping_pong_pass<D: ShaderStages>(
    device: &mut D,
    buffers: &mut PingPong<D::Image>,
    pass: BloomPass,
    uniforms: &StageUniforms<'_, D::Image>,
) -> Result<(), RenderError> {
    let (front, back) = buffers.split();
    device.discard(back);
    front.set_filter(FilterMode::Bilinear);
    device.apply(pass, front, back, uniforms)?;
    buffers.swap();
    Ok(())
}

/// Blur `image` in place with `iterations` horizontal+vertical rounds.
///
/// `iterations` is clamped to `[0, MAX_BLUR_ITERATIONS]`. Exactly two
/// temporaries of the image's size are acquired and both are released
/// before returning. Returns the number of rounds run.
pub fn blur<D: ShaderStages>(
    device: &mut D,
    pool: &mut ImagePool<D::Image>,
    image: &mut D::Image,
    iterations: i32,
    uniforms: &StageUniforms<'_, D::Image>,
) -> Result<u32, RenderError> {
    let rounds = iterations.clamp(0, MAX_BLUR_ITERATIONS) as u32;
    let mut buffers = PingPong::acquire(device, pool, image)?;

    device.blit(image, buffers.front_mut())?;
    for _ in 0..rounds {
        ping_pong_pass(device, &mut buffers, BloomPass::BlurHorizontal, uniforms)?;
        ping_pong_pass(device, &mut buffers, BloomPass::BlurVertical, uniforms)?;
    }
    device.blit(buffers.front(), image)?;

    buffers.release(pool);
    Ok(rounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{CpuDevice, CpuImage, GAUSSIAN_WEIGHTS};
    use crate::image_desc::{ImageDesc, PixelFormat};

    fn spot(size: u32) -> CpuImage {
        let desc = ImageDesc::new(size, size, PixelFormat::Rgba32Float);
        let mut image = CpuImage::new(desc).unwrap();
        image.set_pixel(size / 2, size / 2, [1.0, 1.0, 1.0, 1.0]);
        image
    }

    #[test]
    fn test_zero_iterations_is_identity() {
        let mut device = CpuDevice::new();
        let mut pool = ImagePool::new();
        let mut image = spot(9);
        let original = image.clone();

        let rounds = blur(&mut device, &mut pool, &mut image, 0, &StageUniforms::default()).unwrap();
        assert_eq!(rounds, 0);
        assert_eq!(image.pixels(), original.pixels());
        assert_eq!(device.blit_count(), 2);
    }

    #[test]
    fn test_iterations_are_clamped() {
        let mut device = CpuDevice::new();
        let mut pool = ImagePool::new();
        let mut image = spot(9);

        let rounds = blur(&mut device, &mut pool, &mut image, 50, &StageUniforms::default()).unwrap();
        assert_eq!(rounds, 10);
        assert_eq!(device.pass_count(BloomPass::BlurHorizontal), 10);
        assert_eq!(device.pass_count(BloomPass::BlurVertical), 10);

        let rounds = blur(&mut device, &mut pool, &mut image, -3, &StageUniforms::default()).unwrap();
        assert_eq!(rounds, 0);
    }

    #[test]
    fn test_uses_exactly_two_temporaries() {
        let mut device = CpuDevice::new();
        let mut pool = ImagePool::new();
        let mut image = spot(9);

        blur(&mut device, &mut pool, &mut image, 3, &StageUniforms::default()).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.acquired, 2);
        assert_eq!(stats.released, 2);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_blur_spreads_energy() {
        let mut device = CpuDevice::new();
        let mut pool = ImagePool::new();
        let mut image = spot(17);

        blur(&mut device, &mut pool, &mut image, 1, &StageUniforms::default()).unwrap();
        let centre = image.pixel(8, 8)[0];
        let expected = GAUSSIAN_WEIGHTS[0] * GAUSSIAN_WEIGHTS[0];
        assert!((centre - expected).abs() < 1e-5, "centre {centre}");
        assert!(image.pixel(9, 9)[0] > 0.0);
        assert_eq!(image.pixel(0, 0)[0], 0.0);

        let total: f32 = image.pixels().iter().map(|p| p[0]).sum();
        assert!((total - 1.0).abs() < 1e-3, "total {total}");
    }

    #[test]
    fn test_split_follows_front() {
        let mut device = CpuDevice::new();
        let mut pool = ImagePool::new();
        let like = spot(2);
        let mut buffers = PingPong::acquire(&mut device, &mut pool, &like).unwrap();

        buffers.front_mut().set_pixel(0, 0, [1.0; 4]);
        buffers.swap();
        let (_, back) = buffers.split();
        assert_eq!(back.pixel(0, 0), [1.0; 4]);
        buffers.release(&mut pool);
        assert_eq!(pool.outstanding(), 0);
    }
}
