//! Software implementation of the bloom passes.
//!
//! [`CpuDevice`] mirrors the WGSL program pass for pass: fragments are shaded
//! at texel centres, sampling is clamp-to-edge, and every write is clamped to
//! the destination format. It backs the offline host when no adapter is
//! available and is the reference the pipeline tests run against.

use image::{DynamicImage, Rgba32FImage};

use crate::error::RenderError;
use crate::image_desc::{FilterMode, ImageDesc, ImageHandle, PixelFormat};
use crate::stages::{BloomPass, ShaderStages, StageUniforms};

/// Rec. 709 luma weights.
const LUMA: [f32; 3] = [0.2126, 0.7152, 0.0722];

/// 9-tap Gaussian weights for sigma ≈ 1.5, centre first.
pub const GAUSSIAN_WEIGHTS: [f32; 5] = [
    0.227_027_03,
    0.194_594_6,
    0.121_621_62,
    0.054_054_055,
    0.016_216_216,
];

/// An RGBA image held in linear `f32` channels.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuImage {
    desc: ImageDesc,
    filter: FilterMode,
    pixels: Vec<[f32; 4]>,
}

impl CpuImage {
    /// Allocate a black, transparent image.
    pub fn new(desc: ImageDesc) -> Result<Self, RenderError> {
        Self::filled(desc, [0.0; 4])
    }

    /// Allocate an image with every pixel set to `color`.
    pub fn filled(desc: ImageDesc, color: [f32; 4]) -> Result<Self, RenderError> {
        if desc.is_empty() {
            return Err(RenderError::ZeroSizedImage {
                width: desc.width,
                height: desc.height,
            });
        }
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(desc.pixel_count())
            .map_err(|_| RenderError::OutOfMemory {
                bytes: desc.byte_size(),
            })?;
        pixels.resize(desc.pixel_count(), store(desc.format, color));
        Ok(Self {
            desc,
            filter: FilterMode::default(),
            pixels,
        })
    }

    /// Build an image from row-major pixels.
    pub fn from_pixels(desc: ImageDesc, pixels: Vec<[f32; 4]>) -> Result<Self, RenderError> {
        if desc.is_empty() {
            return Err(RenderError::ZeroSizedImage {
                width: desc.width,
                height: desc.height,
            });
        }
        if pixels.len() != desc.pixel_count() {
            return Err(RenderError::PixelDataMismatch {
                expected: desc.pixel_count(),
                actual: pixels.len(),
            });
        }
        let pixels = pixels.into_iter().map(|p| store(desc.format, p)).collect();
        Ok(Self {
            desc,
            filter: FilterMode::default(),
            pixels,
        })
    }

    /// Build an image from tightly packed 8-bit RGBA bytes.
    pub fn from_rgba8(desc: ImageDesc, bytes: &[u8]) -> Result<Self, RenderError> {
        let expected = desc.pixel_count() * 4;
        if bytes.len() != expected {
            return Err(RenderError::PixelDataMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        let pixels = bytes
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]].map(|v| f32::from(v) / 255.0))
            .collect();
        Self::from_pixels(desc, pixels)
    }

    /// Decode a [`DynamicImage`] into the given working format.
    pub fn from_dynamic(source: &DynamicImage, format: PixelFormat) -> Result<Self, RenderError> {
        let rgba = source.to_rgba32f();
        let desc = ImageDesc::new(rgba.width(), rgba.height(), format);
        let pixels = rgba.pixels().map(|p| p.0).collect();
        Self::from_pixels(desc, pixels)
    }

    /// Convert to an `image` buffer with 32-bit float channels.
    pub fn to_dynamic(&self) -> DynamicImage {
        let data: Vec<f32> = self.pixels.iter().flatten().copied().collect();
        match Rgba32FImage::from_raw(self.desc.width, self.desc.height, data) {
            Some(buffer) => DynamicImage::ImageRgba32F(buffer),
            // from_raw only fails on a length mismatch, which the constructors rule out.
            None => DynamicImage::new_rgba32f(self.desc.width, self.desc.height),
        }
    }

    /// Quantize to tightly packed 8-bit RGBA bytes.
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flatten()
            .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect()
    }

    pub fn pixels(&self) -> &[[f32; 4]] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> [f32; 4] {
        self.pixels[self.index(x, y)]
    }

    /// Write one pixel, clamped to the image format.
    pub fn set_pixel(&mut self, x: u32, y: u32, color: [f32; 4]) {
        let i = self.index(x, y);
        self.pixels[i] = store(self.desc.format, color);
    }

    /// Sample at normalized coordinates using this image's filter mode.
    pub fn sample(&self, u: f32, v: f32) -> [f32; 4] {
        let (w, h) = (self.desc.width as f32, self.desc.height as f32);
        match self.filter {
            FilterMode::Nearest => {
                self.texel((u * w).floor() as i64, (v * h).floor() as i64)
            }
            FilterMode::Bilinear => {
                let fx = u * w - 0.5;
                let fy = v * h - 0.5;
                let (x0, y0) = (fx.floor(), fy.floor());
                let (tx, ty) = (fx - x0, fy - y0);
                let (x0, y0) = (x0 as i64, y0 as i64);

                let top = lerp(self.texel(x0, y0), self.texel(x0 + 1, y0), tx);
                let bottom = lerp(self.texel(x0, y0 + 1), self.texel(x0 + 1, y0 + 1), tx);
                lerp(top, bottom, ty)
            }
        }
    }

    fn texel(&self, x: i64, y: i64) -> [f32; 4] {
        let x = x.clamp(0, i64::from(self.desc.width) - 1) as u32;
        let y = y.clamp(0, i64::from(self.desc.height) - 1) as u32;
        self.pixel(x, y)
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.desc.width as usize + x as usize
    }

    /// Shade every pixel at its texel centre.
    fn shade(&mut self, mut fragment: impl FnMut(f32, f32) -> [f32; 4]) {
        let (w, h) = (self.desc.width, self.desc.height);
        let format = self.desc.format;
        for y in 0..h {
            let v = (y as f32 + 0.5) / h as f32;
            for x in 0..w {
                let u = (x as f32 + 0.5) / w as f32;
                self.pixels[y as usize * w as usize + x as usize] = store(format, fragment(u, v));
            }
        }
    }
}

impl ImageHandle for CpuImage {
    fn desc(&self) -> ImageDesc {
        self.desc
    }

    fn filter(&self) -> FilterMode {
        self.filter
    }

    fn set_filter(&mut self, filter: FilterMode) {
        self.filter = filter;
    }
}

/// Software shader stage set.
#[derive(Debug, Default)]
pub struct CpuDevice {
    pass_counts: [u64; 6],
    blits: u64,
    images_created: u64,
}

impl CpuDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Times `pass` has been applied.
    pub fn pass_count(&self, pass: BloomPass) -> u64 {
        self.pass_counts[pass.index()]
    }

    /// Plain copies performed.
    pub fn blit_count(&self) -> u64 {
        self.blits
    }

    /// Images allocated through [`ShaderStages::create_image`].
    pub fn images_created(&self) -> u64 {
        self.images_created
    }
}

impl ShaderStages for CpuDevice {
    type Image = CpuImage;

    fn create_image(&mut self, desc: ImageDesc) -> Result<CpuImage, RenderError> {
        let image = CpuImage::new(desc)?;
        self.images_created += 1;
        Ok(image)
    }

    fn blit(&mut self, src: &CpuImage, dst: &mut CpuImage) -> Result<(), RenderError> {
        self.blits += 1;
        if src.desc.width == dst.desc.width && src.desc.height == dst.desc.height {
            let format = dst.desc.format;
            for (out, p) in dst.pixels.iter_mut().zip(&src.pixels) {
                *out = store(format, *p);
            }
        } else {
            dst.shade(|u, v| src.sample(u, v));
        }
        Ok(())
    }

    fn apply(
        &mut self,
        pass: BloomPass,
        src: &CpuImage,
        dst: &mut CpuImage,
        uniforms: &StageUniforms<'_, CpuImage>,
    ) -> Result<(), RenderError> {
        let blur_texture = match (pass.needs_blur_texture(), uniforms.blur_texture) {
            (true, None) => return Err(RenderError::MissingBlurTexture(pass)),
            (_, texture) => texture,
        };
        self.pass_counts[pass.index()] += 1;

        let texel_u = 1.0 / src.desc.width as f32;
        let texel_v = 1.0 / src.desc.height as f32;

        match (pass, blur_texture) {
            (BloomPass::DownsampleCopy, _) => dst.shade(|u, v| src.sample(u, v)),
            (BloomPass::MaskExtract, _) => dst.shade(|u, v| {
                soft_threshold(src.sample(u, v), uniforms.threshold, uniforms.soft_knee)
            }),
            (BloomPass::BlurHorizontal, _) => {
                dst.shade(|u, v| blur_taps(|k| src.sample(u + k * texel_u, v)))
            }
            (BloomPass::BlurVertical, _) => {
                dst.shade(|u, v| blur_taps(|k| src.sample(u, v + k * texel_v)))
            }
            (BloomPass::CompositeScreen, Some(bloom)) => dst.shade(|u, v| {
                combine(src.sample(u, v), bloom.sample(u, v), uniforms.intensity, screen)
            }),
            (BloomPass::CompositeAdd, Some(bloom)) => dst.shade(|u, v| {
                combine(src.sample(u, v), bloom.sample(u, v), uniforms.intensity, add)
            }),
            (_, None) => return Err(RenderError::MissingBlurTexture(pass)),
        }
        log::trace!(
            "cpu pass {:?}: {}x{} -> {}x{}",
            pass,
            src.desc.width,
            src.desc.height,
            dst.desc.width,
            dst.desc.height
        );
        Ok(())
    }
}

/// Clamp (and for 8-bit formats, quantize) a colour to what `format` can hold.
fn store(format: PixelFormat, color: [f32; 4]) -> [f32; 4] {
    match format {
        PixelFormat::Rgba8Unorm => color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() / 255.0),
        PixelFormat::Rgba16Float => {
            let max = format.max_value();
            color.map(|c| c.clamp(-max, max))
        }
        PixelFormat::Rgba32Float => color,
    }
}

fn lerp(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
        a[3] + (b[3] - a[3]) * t,
    ]
}

/// Keep the part of `color` above `threshold`, with a quadratic knee below it.
pub fn soft_threshold(color: [f32; 4], threshold: f32, knee: f32) -> [f32; 4] {
    let luminance = color[0] * LUMA[0] + color[1] * LUMA[1] + color[2] * LUMA[2];
    let soft = (luminance - threshold + knee).clamp(0.0, 2.0 * knee);
    let contribution = soft * soft / (4.0 * knee + 0.0001);
    let factor = ((luminance - threshold).max(contribution) / luminance.max(0.0001)).max(0.0);
    [color[0] * factor, color[1] * factor, color[2] * factor, 1.0]
}

/// Weighted sum of 9 taps; `tap(k)` samples at offset `k` texels.
fn blur_taps(mut tap: impl FnMut(f32) -> [f32; 4]) -> [f32; 4] {
    let mut sum = tap(0.0).map(|c| c * GAUSSIAN_WEIGHTS[0]);
    for (i, &weight) in GAUSSIAN_WEIGHTS.iter().enumerate().skip(1) {
        let k = i as f32;
        let (a, b) = (tap(k), tap(-k));
        for c in 0..4 {
            sum[c] += (a[c] + b[c]) * weight;
        }
    }
    sum
}

fn screen(base: f32, bloom: f32) -> f32 {
    base + bloom - base * bloom
}

fn add(base: f32, bloom: f32) -> f32 {
    base + bloom
}

/// Blend RGB; alpha comes from the base image.
fn combine(base: [f32; 4], bloom: [f32; 4], intensity: f32, blend: fn(f32, f32) -> f32) -> [f32; 4] {
    [
        blend(base[0], bloom[0] * intensity),
        blend(base[1], bloom[1] * intensity),
        blend(base[2], bloom[2] * intensity),
        base[3],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(w: u32, h: u32) -> ImageDesc {
        ImageDesc::new(w, h, PixelFormat::Rgba32Float)
    }

    fn gradient(w: u32, h: u32) -> CpuImage {
        let pixels = (0..w * h)
            .map(|i| {
                let v = i as f32 / (w * h) as f32;
                [v, 1.0 - v, 0.5, 1.0]
            })
            .collect();
        CpuImage::from_pixels(desc(w, h), pixels).unwrap()
    }

    #[test]
    fn test_gaussian_weights_sum_to_approximately_one() {
        let sum = GAUSSIAN_WEIGHTS[0] + 2.0 * GAUSSIAN_WEIGHTS[1..].iter().sum::<f32>();
        assert!((sum - 1.0).abs() < 0.001, "weights sum to {sum}");
    }

    #[test]
    fn test_rgba8_writes_clamp_and_quantize() {
        let image = CpuImage::filled(
            ImageDesc::new(1, 1, PixelFormat::Rgba8Unorm),
            [1.7, -0.2, 0.5, 1.0],
        )
        .unwrap();
        let p = image.pixel(0, 0);
        assert_eq!(p[0], 1.0);
        assert_eq!(p[1], 0.0);
        assert_eq!(p[2], 128.0 / 255.0);
    }

    #[test]
    fn test_float_formats_keep_hdr_values() {
        let image = CpuImage::filled(desc(1, 1), [4.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(image.pixel(0, 0)[0], 4.0);
    }

    #[test]
    fn test_pixel_data_mismatch() {
        let result = CpuImage::from_pixels(desc(2, 2), vec![[0.0; 4]; 3]);
        assert!(matches!(
            result,
            Err(RenderError::PixelDataMismatch {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_bilinear_halving_averages_pairs() {
        let mut src = CpuImage::from_pixels(
            desc(4, 1),
            vec![
                [0.0, 0.0, 0.0, 1.0],
                [1.0, 1.0, 1.0, 1.0],
                [0.2, 0.2, 0.2, 1.0],
                [0.4, 0.4, 0.4, 1.0],
            ],
        )
        .unwrap();
        src.set_filter(FilterMode::Bilinear);
        let mut dst = CpuImage::new(desc(2, 1)).unwrap();

        let mut device = CpuDevice::new();
        device
            .apply(BloomPass::DownsampleCopy, &src, &mut dst, &StageUniforms::default())
            .unwrap();

        assert!((dst.pixel(0, 0)[0] - 0.5).abs() < 1e-6);
        assert!((dst.pixel(1, 0)[0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_nearest_sampling_picks_texel() {
        let src = gradient(4, 4);
        assert_eq!(src.filter(), FilterMode::Nearest);
        assert_eq!(src.sample(0.6, 0.1), src.pixel(2, 0));
    }

    #[test]
    fn test_blit_same_size_is_exact() {
        let src = gradient(5, 3);
        let mut dst = CpuImage::new(desc(5, 3)).unwrap();
        let mut device = CpuDevice::new();
        device.blit(&src, &mut dst).unwrap();
        assert_eq!(dst.pixels(), src.pixels());
        assert_eq!(device.blit_count(), 1);
    }

    #[test]
    fn test_mask_drops_dim_pixels() {
        let dim = soft_threshold([0.5, 0.5, 0.5, 1.0], 0.8, 0.1);
        assert_eq!(&dim[..3], &[0.0, 0.0, 0.0]);

        let bright = soft_threshold([4.0, 4.0, 4.0, 1.0], 0.8, 0.1);
        assert!(bright[0] > 3.0 && bright[0] < 4.0);
    }

    #[test]
    fn test_mask_knee_softens_cutoff() {
        let hard = soft_threshold([0.75, 0.75, 0.75, 1.0], 0.8, 0.0);
        let soft = soft_threshold([0.75, 0.75, 0.75, 1.0], 0.8, 0.1);
        assert_eq!(hard[0], 0.0);
        assert!(soft[0] > 0.0);
    }

    #[test]
    fn test_blur_preserves_flat_image() {
        let src = CpuImage::filled(desc(6, 6), [0.25, 0.5, 0.75, 1.0]).unwrap();
        let mut dst = CpuImage::new(desc(6, 6)).unwrap();
        let mut device = CpuDevice::new();
        for pass in [BloomPass::BlurHorizontal, BloomPass::BlurVertical] {
            device
                .apply(pass, &src, &mut dst, &StageUniforms::default())
                .unwrap();
            for p in dst.pixels() {
                assert!((p[1] - 0.5).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_horizontal_blur_spreads_along_x_only() {
        let mut pixels = vec![[0.0, 0.0, 0.0, 1.0]; 9 * 9];
        pixels[4 * 9 + 4] = [1.0, 1.0, 1.0, 1.0];
        let src = CpuImage::from_pixels(desc(9, 9), pixels).unwrap();
        let mut dst = CpuImage::new(desc(9, 9)).unwrap();

        let mut device = CpuDevice::new();
        device
            .apply(BloomPass::BlurHorizontal, &src, &mut dst, &StageUniforms::default())
            .unwrap();

        assert!((dst.pixel(4, 4)[0] - GAUSSIAN_WEIGHTS[0]).abs() < 1e-6);
        assert!((dst.pixel(6, 4)[0] - GAUSSIAN_WEIGHTS[2]).abs() < 1e-6);
        assert_eq!(dst.pixel(4, 5)[0], 0.0);
    }

    #[test]
    fn test_composite_requires_blur_texture() {
        let src = gradient(2, 2);
        let mut dst = CpuImage::new(desc(2, 2)).unwrap();
        let mut device = CpuDevice::new();
        let result = device.apply(
            BloomPass::CompositeAdd,
            &src,
            &mut dst,
            &StageUniforms::default(),
        );
        assert!(matches!(
            result,
            Err(RenderError::MissingBlurTexture(BloomPass::CompositeAdd))
        ));
        assert_eq!(device.pass_count(BloomPass::CompositeAdd), 0);
    }

    #[test]
    fn test_add_and_screen_formulas() {
        let base = CpuImage::filled(desc(1, 1), [0.5, 0.5, 0.5, 0.25]).unwrap();
        let bloom = CpuImage::filled(desc(1, 1), [0.25, 0.0, 0.5, 1.0]).unwrap();
        let uniforms = StageUniforms {
            intensity: 2.0,
            ..StageUniforms::default()
        }
        .with_blur_texture(&bloom);
        let mut device = CpuDevice::new();

        let mut added = CpuImage::new(desc(1, 1)).unwrap();
        device
            .apply(BloomPass::CompositeAdd, &base, &mut added, &uniforms)
            .unwrap();
        assert_eq!(added.pixel(0, 0), [1.0, 0.5, 1.5, 0.25]);

        let mut screened = CpuImage::new(desc(1, 1)).unwrap();
        device
            .apply(BloomPass::CompositeScreen, &base, &mut screened, &uniforms)
            .unwrap();
        assert_eq!(screened.pixel(0, 0), [0.75, 0.5, 1.0, 0.25]);
    }

    #[test]
    fn test_rgba8_round_trip() {
        let bytes = [0u8, 64, 128, 255, 10, 20, 30, 40];
        let image = CpuImage::from_rgba8(ImageDesc::new(2, 1, PixelFormat::Rgba8Unorm), &bytes)
            .unwrap();
        assert_eq!(image.to_rgba8(), bytes);
    }

    #[test]
    fn test_dynamic_image_dimensions() {
        let image = gradient(3, 2);
        let dynamic = image.to_dynamic();
        assert_eq!((dynamic.width(), dynamic.height()), (3, 2));
        let back = CpuImage::from_dynamic(&dynamic, PixelFormat::Rgba32Float).unwrap();
        assert_eq!(back.pixels(), image.pixels());
    }
}
