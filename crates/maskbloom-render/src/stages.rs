//! The fixed set of six filter passes and the backend contract that runs them.

use maskbloom_config::{BlendMode, BloomConfig};

use crate::error::RenderError;
use crate::image_desc::{ImageDesc, ImageHandle};

/// The six passes of the bloom program, in their fixed index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BloomPass {
    /// 0: bilinear resample into an output of any size.
    DownsampleCopy,
    /// 1: keep only the bright part of each pixel.
    MaskExtract,
    /// 2: 1D blur along x.
    BlurHorizontal,
    /// 3: 1D blur along y.
    BlurVertical,
    /// 4: screen blend of the blur texture over the input.
    CompositeScreen,
    /// 5: additive blend of the blur texture over the input.
    CompositeAdd,
}

impl BloomPass {
    pub const ALL: [BloomPass; 6] = [
        BloomPass::DownsampleCopy,
        BloomPass::MaskExtract,
        BloomPass::BlurHorizontal,
        BloomPass::BlurVertical,
        BloomPass::CompositeScreen,
        BloomPass::CompositeAdd,
    ];

    pub fn index(self) -> usize {
        match self {
            BloomPass::DownsampleCopy => 0,
            BloomPass::MaskExtract => 1,
            BloomPass::BlurHorizontal => 2,
            BloomPass::BlurVertical => 3,
            BloomPass::CompositeScreen => 4,
            BloomPass::CompositeAdd => 5,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// WGSL fragment entry point implementing this pass.
    pub fn entry_point(self) -> &'static str {
        match self {
            BloomPass::DownsampleCopy => "fs_copy",
            BloomPass::MaskExtract => "fs_mask",
            BloomPass::BlurHorizontal => "fs_blur_h",
            BloomPass::BlurVertical => "fs_blur_v",
            BloomPass::CompositeScreen => "fs_screen",
            BloomPass::CompositeAdd => "fs_add",
        }
    }

    /// Composite pass for a blend mode.
    pub fn composite(mode: BlendMode) -> Self {
        match mode {
            BlendMode::Add => BloomPass::CompositeAdd,
            BlendMode::Screen => BloomPass::CompositeScreen,
        }
    }

    /// Whether the pass reads the `blur_texture` uniform.
    pub fn needs_blur_texture(self) -> bool {
        matches!(self, BloomPass::CompositeScreen | BloomPass::CompositeAdd)
    }
}

/// Uniform values for one pass.
///
/// Passed per draw; the program keeps no uniform state between calls.
#[derive(Debug)]
pub struct StageUniforms<'a, I> {
    /// Bloom strength for the composite passes.
    pub intensity: f32,
    /// Mask luminance threshold.
    pub threshold: f32,
    /// Mask soft knee width.
    pub soft_knee: f32,
    /// Blurred mask sampled by the composite passes.
    pub blur_texture: Option<&'a I>,
}

impl<I> Clone for StageUniforms<'_, I> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<I> Copy for StageUniforms<'_, I> {}

impl<'a, I> StageUniforms<'a, I> {
    /// Uniforms derived from a (validated) config, with no blur texture bound.
    pub fn from_config(config: &BloomConfig) -> Self {
        Self {
            intensity: config.bloom_intensity,
            threshold: config.threshold,
            soft_knee: config.soft_knee,
            blur_texture: None,
        }
    }

    /// Bind the blur texture for a composite pass.
    pub fn with_blur_texture(self, texture: &'a I) -> Self {
        Self {
            blur_texture: Some(texture),
            ..self
        }
    }
}

impl<I> Default for StageUniforms<'_, I> {
    fn default() -> Self {
        Self::from_config(&BloomConfig::default())
    }
}

/// A backend able to allocate images and run the six bloom passes.
///
/// Commands take effect in submission order. Input and output are distinct
/// borrows, so a pass can never read and write the same image.
pub trait ShaderStages {
    type Image: ImageHandle;

    /// Allocate an image with undefined contents.
    fn create_image(&mut self, desc: ImageDesc) -> Result<Self::Image, RenderError>;

    /// Plain copy with no shader. Resamples with the source filter when the
    /// sizes differ.
    fn blit(&mut self, src: &Self::Image, dst: &mut Self::Image) -> Result<(), RenderError>;

    /// Run one pass from `src` into `dst`, overwriting all of `dst`.
    fn apply(
        &mut self,
        pass: BloomPass,
        src: &Self::Image,
        dst: &mut Self::Image,
        uniforms: &StageUniforms<'_, Self::Image>,
    ) -> Result<(), RenderError>;

    /// Hint that the previous contents of `image` will not be read again.
    fn discard(&mut self, _image: &mut Self::Image) {}

    /// Submit any recorded work.
    fn flush(&mut self) -> Result<(), RenderError> {
        Ok(())
    }
}
