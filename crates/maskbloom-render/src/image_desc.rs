//! Image descriptors shared by every backend.

/// Pixel storage format of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit normalized RGBA. Writes clamp to `[0, 1]`.
    Rgba8Unorm,
    /// 16-bit float RGBA.
    Rgba16Float,
    /// 32-bit float RGBA.
    Rgba32Float,
}

impl PixelFormat {
    /// Bytes occupied by one pixel.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgba8Unorm => 4,
            PixelFormat::Rgba16Float => 8,
            PixelFormat::Rgba32Float => 16,
        }
    }

    /// Largest finite channel value the format can hold.
    pub fn max_value(self) -> f32 {
        match self {
            PixelFormat::Rgba8Unorm => 1.0,
            PixelFormat::Rgba16Float => 65504.0,
            PixelFormat::Rgba32Float => f32::MAX,
        }
    }
}

impl From<maskbloom_config::ImageFormat> for PixelFormat {
    fn from(format: maskbloom_config::ImageFormat) -> Self {
        match format {
            maskbloom_config::ImageFormat::Rgba8 => PixelFormat::Rgba8Unorm,
            maskbloom_config::ImageFormat::Rgba16f => PixelFormat::Rgba16Float,
            maskbloom_config::ImageFormat::Rgba32f => PixelFormat::Rgba32Float,
        }
    }
}

/// How an image is filtered when another pass samples it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FilterMode {
    #[default]
    Nearest,
    Bilinear,
}

/// Size and format of an image. Temporaries are pooled by this key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl ImageDesc {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// The next level down: each dimension shifted right by one, floored at 1 px.
    pub fn half(self) -> Self {
        Self {
            width: (self.width >> 1).max(1),
            height: (self.height >> 1).max(1),
            format: self.format,
        }
    }

    /// Number of pixels.
    pub fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Storage size in bytes.
    pub fn byte_size(self) -> u64 {
        self.pixel_count() as u64 * u64::from(self.format.bytes_per_pixel())
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Common surface of backend image types.
pub trait ImageHandle {
    /// Size and format.
    fn desc(&self) -> ImageDesc;

    /// Filter used when this image is sampled.
    fn filter(&self) -> FilterMode;

    /// Change the filter used when this image is sampled.
    fn set_filter(&mut self, filter: FilterMode);

    fn width(&self) -> u32 {
        self.desc().width
    }

    fn height(&self) -> u32 {
        self.desc().height
    }
}
