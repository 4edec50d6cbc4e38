//! wgpu implementation of the bloom passes.
//!
//! Every pass is a fullscreen triangle drawn into the destination texture with
//! one of the fragment entry points of [`BLOOM_SHADER_SOURCE`]. Commands are
//! recorded into a single encoder and submitted on [`ShaderStages::flush`].

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::error::RenderError;
use crate::gpu::GpuContext;
use crate::image_desc::{FilterMode, ImageDesc, ImageHandle, PixelFormat};
use crate::stages::{BloomPass, ShaderStages, StageUniforms};

const VERTEX_ENTRY: &str = "vs_fullscreen";

/// GPU uniform for the bloom passes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct BloomParams {
    pub intensity: f32,
    pub threshold: f32,
    pub soft_knee: f32,
    pub _padding: f32,
}

/// WGSL source for all six passes (copy, mask, blur h/v, screen, add).
pub const BLOOM_SHADER_SOURCE: &str = r#"
struct BloomParams {
    intensity: f32,
    threshold: f32,
    soft_knee: f32,
    _padding: f32,
};

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@group(0) @binding(0) var<uniform> params: BloomParams;
@group(0) @binding(1) var src_tex: texture_2d<f32>;
@group(0) @binding(2) var src_sampler: sampler;
@group(0) @binding(3) var blur_tex: texture_2d<f32>;
@group(0) @binding(4) var blur_sampler: sampler;

@vertex
fn vs_fullscreen(@builtin(vertex_index) idx: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((idx << 1u) & 2u), f32(idx & 2u));
    var out: VertexOutput;
    out.position = vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return out;
}

fn soft_threshold(color: vec3<f32>, threshold: f32, knee: f32) -> vec3<f32> {
    let luminance = dot(color, vec3<f32>(0.2126, 0.7152, 0.0722));
    let soft = luminance - threshold + knee;
    let soft_clamped = clamp(soft, 0.0, 2.0 * knee);
    let contribution = soft_clamped * soft_clamped / (4.0 * knee + 0.0001);
    let factor = max(luminance - threshold, contribution) / max(luminance, 0.0001);
    return color * max(factor, 0.0);
}

fn blur9(uv: vec2<f32>, step: vec2<f32>) -> vec4<f32> {
    var sum = textureSample(src_tex, src_sampler, uv) * 0.22702703;
    sum += (textureSample(src_tex, src_sampler, uv + step) +
            textureSample(src_tex, src_sampler, uv - step)) * 0.1945946;
    sum += (textureSample(src_tex, src_sampler, uv + step * 2.0) +
            textureSample(src_tex, src_sampler, uv - step * 2.0)) * 0.12162162;
    sum += (textureSample(src_tex, src_sampler, uv + step * 3.0) +
            textureSample(src_tex, src_sampler, uv - step * 3.0)) * 0.054054055;
    sum += (textureSample(src_tex, src_sampler, uv + step * 4.0) +
            textureSample(src_tex, src_sampler, uv - step * 4.0)) * 0.016216216;
    return sum;
}

@fragment
fn fs_copy(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(src_tex, src_sampler, in.uv);
}

@fragment
fn fs_mask(in: VertexOutput) -> @location(0) vec4<f32> {
    let color = textureSample(src_tex, src_sampler, in.uv).rgb;
    return vec4<f32>(soft_threshold(color, params.threshold, params.soft_knee), 1.0);
}

@fragment
fn fs_blur_h(in: VertexOutput) -> @location(0) vec4<f32> {
    let texel = 1.0 / vec2<f32>(textureDimensions(src_tex));
    return blur9(in.uv, vec2<f32>(texel.x, 0.0));
}

@fragment
fn fs_blur_v(in: VertexOutput) -> @location(0) vec4<f32> {
    let texel = 1.0 / vec2<f32>(textureDimensions(src_tex));
    return blur9(in.uv, vec2<f32>(0.0, texel.y));
}

@fragment
fn fs_screen(in: VertexOutput) -> @location(0) vec4<f32> {
    let base = textureSample(src_tex, src_sampler, in.uv);
    let bloom = textureSample(blur_tex, blur_sampler, in.uv).rgb * params.intensity;
    return vec4<f32>(base.rgb + bloom - base.rgb * bloom, base.a);
}

@fragment
fn fs_add(in: VertexOutput) -> @location(0) vec4<f32> {
    let base = textureSample(src_tex, src_sampler, in.uv);
    let bloom = textureSample(blur_tex, blur_sampler, in.uv).rgb * params.intensity;
    return vec4<f32>(base.rgb + bloom, base.a);
}
"#;

/// A texture usable as pass input, output and copy source/destination.
#[derive(Debug)]
pub struct GpuImage {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: ImageDesc,
    filter: FilterMode,
}

impl GpuImage {
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

impl ImageHandle for GpuImage {
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

/// Shader stage set backed by a wgpu device.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    shader: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<(BloomPass, wgpu::TextureFormat), wgpu::RenderPipeline>,
    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuDevice {
    /// Create a device running the built-in bloom program.
    pub fn new(context: &GpuContext) -> Self {
        Self::build(context, BLOOM_SHADER_SOURCE)
    }

    /// Create a device from custom WGSL. The source must define
    /// `vs_fullscreen` and the six fragment entry points, with the same
    /// bindings as [`BLOOM_SHADER_SOURCE`].
    pub fn with_shader_source(context: &GpuContext, source: &str) -> Result<Self, RenderError> {
        check_entry_points(source)?;
        Ok(Self::build(context, source))
    }

    fn build(context: &GpuContext, source: &str) -> Self {
        let device = context.device.clone();
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("maskbloom-shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let sampler_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("maskbloom-bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: std::num::NonZeroU64::new(
                            std::mem::size_of::<BloomParams>() as u64,
                        ),
                    },
                    count: None,
                },
                texture_entry(1),
                sampler_entry(2),
                texture_entry(3),
                sampler_entry(4),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("maskbloom-layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let sampler = |label, filter| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                ..Default::default()
            })
        };
        let linear_sampler = sampler("maskbloom-linear", wgpu::FilterMode::Linear);
        let nearest_sampler = sampler("maskbloom-nearest", wgpu::FilterMode::Nearest);

        Self {
            queue: context.queue.clone(),
            device,
            shader,
            bind_group_layout,
            pipeline_layout,
            pipelines: HashMap::new(),
            linear_sampler,
            nearest_sampler,
            encoder: None,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Upload tightly packed 8-bit RGBA pixels into a new `Rgba8Unorm` image.
    pub fn upload_rgba8(&mut self, width: u32, height: u32, bytes: &[u8]) -> Result<GpuImage, RenderError> {
        let desc = ImageDesc::new(width, height, PixelFormat::Rgba8Unorm);
        let expected = desc.pixel_count() * 4;
        if bytes.len() != expected {
            return Err(RenderError::PixelDataMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        let image = self.create_image(desc)?;
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &image.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            extent(desc),
        );
        Ok(image)
    }

    /// Read an image back as tightly packed 8-bit RGBA. Float images are
    /// converted through an intermediate `Rgba8Unorm` copy.
    pub fn read_rgba8(&mut self, image: &GpuImage) -> Result<Vec<u8>, RenderError> {
        if image.desc.format != PixelFormat::Rgba8Unorm {
            let mut staging = self.create_image(ImageDesc::new(
                image.desc.width,
                image.desc.height,
                PixelFormat::Rgba8Unorm,
            ))?;
            self.blit(image, &mut staging)?;
            return self.read_rgba8(&staging);
        }

        let (width, height) = (image.desc.width, image.desc.height);
        let unpadded = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("maskbloom-readback"),
            size: u64::from(padded) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        self.encoder().copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &image.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            extent(image.desc),
        );
        self.flush()?;

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| RenderError::Readback(e.to_string()))?;
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(RenderError::Readback(e.to_string())),
            Err(e) => return Err(RenderError::Readback(e.to_string())),
        }

        let mut pixels = Vec::with_capacity((unpadded * height) as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks(padded as usize) {
                pixels.extend_from_slice(&row[..unpadded as usize]);
            }
        }
        buffer.unmap();
        Ok(pixels)
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        self.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("maskbloom-encoder"),
                })
        })
    }

    fn pipeline(&mut self, pass: BloomPass, format: wgpu::TextureFormat) -> wgpu::RenderPipeline {
        self.pipelines
            .entry((pass, format))
            .or_insert_with(|| {
                log::debug!("Creating pipeline {} for {:?}", pass.entry_point(), format);
                create_fullscreen_pipeline(
                    &self.device,
                    &self.shader,
                    &self.pipeline_layout,
                    pass.entry_point(),
                    format,
                )
            })
            .clone()
    }

    fn sampler(&self, filter: FilterMode) -> &wgpu::Sampler {
        match filter {
            FilterMode::Nearest => &self.nearest_sampler,
            FilterMode::Bilinear => &self.linear_sampler,
        }
    }
}

impl ShaderStages for WgpuDevice {
    type Image = GpuImage;

    fn create_image(&mut self, desc: ImageDesc) -> Result<GpuImage, RenderError> {
        if desc.is_empty() {
            return Err(RenderError::ZeroSizedImage {
                width: desc.width,
                height: desc.height,
            });
        }
        let format = texture_format(desc.format)?;
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width > max || desc.height > max {
            return Err(RenderError::OutOfMemory {
                bytes: desc.byte_size(),
            });
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("maskbloom-image"),
            size: extent(desc),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(GpuImage {
            texture,
            view,
            desc,
            filter: FilterMode::default(),
        })
    }

    fn blit(&mut self, src: &GpuImage, dst: &mut GpuImage) -> Result<(), RenderError> {
        if src.desc != dst.desc {
            return self.apply(BloomPass::DownsampleCopy, src, dst, &StageUniforms::default());
        }
        self.encoder().copy_texture_to_texture(
            src.texture.as_image_copy(),
            dst.texture.as_image_copy(),
            extent(src.desc),
        );
        Ok(())
    }

    fn apply(
        &mut self,
        pass: BloomPass,
        src: &GpuImage,
        dst: &mut GpuImage,
        uniforms: &StageUniforms<'_, GpuImage>,
    ) -> Result<(), RenderError> {
        let blur = match (pass.needs_blur_texture(), uniforms.blur_texture) {
            (true, None) => return Err(RenderError::MissingBlurTexture(pass)),
            (_, Some(texture)) => texture,
            // Unused by the shader, but the layout still needs a binding.
            (false, None) => src,
        };

        let pipeline = self.pipeline(pass, texture_format(dst.desc.format)?);
        let params = BloomParams {
            intensity: uniforms.intensity,
            threshold: uniforms.threshold,
            soft_knee: uniforms.soft_knee,
            _padding: 0.0,
        };
        let params_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("maskbloom-params"),
            contents: bytemuck::cast_slice(&[params]),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("maskbloom-bg"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&src.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(self.sampler(src.filter)),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&blur.view),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::Sampler(self.sampler(blur.filter)),
                },
            ],
        });

        let mut render_pass = self.encoder().begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(pass.entry_point()),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &dst.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        render_pass.set_pipeline(&pipeline);
        render_pass.set_bind_group(0, &bind_group, &[]);
        render_pass.draw(0..3, 0..1);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RenderError> {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit([encoder.finish()]);
        }
        Ok(())
    }
}

/// Check that `source` defines every entry point the passes use.
pub fn check_entry_points(source: &str) -> Result<(), RenderError> {
    let entry_points = std::iter::once(VERTEX_ENTRY).chain(BloomPass::ALL.iter().map(|p| p.entry_point()));
    for entry_point in entry_points {
        if !source.contains(&format!("fn {entry_point}(")) {
            return Err(RenderError::InvalidProgram { entry_point });
        }
    }
    Ok(())
}

/// wgpu texture format for a pixel format. 32-bit float textures are not
/// filterable without extra device features, so they are rejected.
fn texture_format(format: PixelFormat) -> Result<wgpu::TextureFormat, RenderError> {
    match format {
        PixelFormat::Rgba8Unorm => Ok(wgpu::TextureFormat::Rgba8Unorm),
        PixelFormat::Rgba16Float => Ok(wgpu::TextureFormat::Rgba16Float),
        PixelFormat::Rgba32Float => Err(RenderError::UnsupportedFormat(format)),
    }
}

fn extent(desc: ImageDesc) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: desc.width,
        height: desc.height,
        depth_or_array_layers: 1,
    }
}

/// Create a fullscreen render pipeline with the given fragment entry point.
fn create_fullscreen_pipeline(
    device: &wgpu::Device,
    shader: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    fragment_entry: &str,
    target_format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(fragment_entry),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some(VERTEX_ENTRY),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some(fragment_entry),
            targets: &[Some(wgpu::ColorTargetState {
                format: target_format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview_mask: None,
        cache: None,
    })
}
