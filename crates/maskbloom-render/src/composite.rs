use maskbloom_config::BlendMode;

use crate::error::RenderError;
use crate::image_desc::{FilterMode, ImageHandle};
use crate::stages::{BloomPass, ShaderStages, StageUniforms};

/// Blend `blurred` over `src` into `dst` with the composite pass for `mode`.
///
/// `blurred` is sampled bilinearly at the base image's coordinates, so it may
/// be smaller than `src`.
pub fn composite<D: ShaderStages>(
    device: &mut D,
    src: &D::Image,
    blurred: &mut D::Image,
    dst: &mut D::Image,
    mode: BlendMode,
    uniforms: &StageUniforms<'_, D::Image>,
) -> Result<(), RenderError> {
    blurred.set_filter(FilterMode::Bilinear);
    let blurred = &*blurred;
    let uniforms = uniforms.with_blur_texture(blurred);
    device.apply(BloomPass::composite(mode), src, dst, &uniforms)
}
