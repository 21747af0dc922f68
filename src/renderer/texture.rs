// renderer/texture.rs (with mipmaps)

use std::path::{Path, PathBuf};

use crate::renderer::error::RenderError;

struct RgbaSource<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    view_format: Option<wgpu::TextureFormat>,
    label: Option<&'a str>,
}

/// Whether the texture owns its GPU image or aliases one owned elsewhere
/// (a render target attachment).
#[derive(Debug, Clone)]
enum Storage {
    Owned(wgpu::Texture),
    Alias,
}

#[derive(Debug, Clone)]
pub struct GpuTexture {
    storage: Storage,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    width: u32,
    height: u32,
    source: Option<PathBuf>,
}

impl GpuTexture {
    fn calculate_mip_levels(width: u32, height: u32) -> u32 {
        let max_dimension = width.max(height).max(1);
        u32::BITS - max_dimension.leading_zeros()
    }

    /// Loads an image file as RGBA8 with a full mip chain, repeat addressing
    /// and trilinear filtering.
    pub fn from_path(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        path: impl AsRef<Path>,
        is_srgb: bool,
    ) -> Result<Self, RenderError> {
        let path = path.as_ref();
        log::info!("Loading texture: {:?}", path);

        let img = image::open(path).map_err(|e| {
            let err = RenderError::Image(format!("{:?}: {}", path, e));
            log::error!("{}", err);
            err
        })?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();

        let label = path.to_string_lossy();
        let mut texture = Self::upload(
            device,
            queue,
            RgbaSource {
                data: &rgba,
                width,
                height,
                view_format: Self::view_format(is_srgb),
                label: Some(&label),
            },
        );
        texture.source = Some(path.to_path_buf());
        Ok(texture)
    }

    /// Creates a texture from tightly packed RGBA8 pixels.
    pub fn from_rgba8(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        pixels: &[u8],
        width: u32,
        height: u32,
        label: Option<&str>,
    ) -> Result<Self, RenderError> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(RenderError::Image(format!(
                "{}x{} RGBA8 image needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }
        Ok(Self::upload(
            device,
            queue,
            RgbaSource {
                data: pixels,
                width,
                height,
                view_format: None,
                label,
            },
        ))
    }

    /// 1x1 opaque white, bound in place of missing material maps.
    pub fn white(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        Self::upload(
            device,
            queue,
            RgbaSource {
                data: &[255, 255, 255, 255],
                width: 1,
                height: 1,
                view_format: None,
                label: Some("White"),
            },
        )
    }

    /// Non-owning alias of an image created elsewhere. Dropping the alias
    /// never releases the underlying texture.
    pub fn alias(view: wgpu::TextureView, sampler: wgpu::Sampler, width: u32, height: u32) -> Self {
        Self {
            storage: Storage::Alias,
            view,
            sampler,
            width,
            height,
            source: None,
        }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }

    pub fn texture(&self) -> Option<&wgpu::Texture> {
        match &self.storage {
            Storage::Owned(texture) => Some(texture),
            Storage::Alias => None,
        }
    }

    pub fn is_alias(&self) -> bool {
        matches!(self.storage, Storage::Alias)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    fn upload(device: &wgpu::Device, queue: &wgpu::Queue, source: RgbaSource<'_>) -> Self {
        let format = wgpu::TextureFormat::Rgba8Unorm;
        let mip_level_count = Self::calculate_mip_levels(source.width, source.height);
        let size = wgpu::Extent3d {
            width: source.width,
            height: source.height,
            depth_or_array_layers: 1,
        };

        let view_formats: Vec<wgpu::TextureFormat> = source.view_format.into_iter().collect();
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: source.label,
            size,
            mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &view_formats,
        });

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            source.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * source.width),
                rows_per_image: Some(source.height),
            },
            size,
        );

        Self::generate_mipmaps(device, queue, &texture, mip_level_count, format);

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            format: source.view_format.or(Some(format)),
            ..Default::default()
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            storage: Storage::Owned(texture),
            view,
            sampler,
            width: source.width,
            height: source.height,
            source: None,
        }
    }

    /// Downsamples each mip from the previous one with a fullscreen blit.
    fn generate_mipmaps(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        texture: &wgpu::Texture,
        mip_level_count: u32,
        format: wgpu::TextureFormat,
    ) {
        if mip_level_count <= 1 {
            return;
        }

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Blit Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/blit.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blit Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Blit Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = crate::renderer::PipelineBuilder::new(device, &pipeline_layout, &shader)
            .with_label("Blit Pipeline")
            .with_cull_mode(None)
            .with_color_target(format, None)
            .build();

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Mip Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Mipmap Generator"),
        });

        for target_mip in 1..mip_level_count {
            let mip_view = |mip: u32, usage: wgpu::TextureUsages| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("Mip View"),
                    format: Some(format),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    aspect: wgpu::TextureAspect::All,
                    base_mip_level: mip,
                    mip_level_count: Some(1),
                    base_array_layer: 0,
                    array_layer_count: Some(1),
                    usage: Some(usage),
                })
            };
            let src_view = mip_view(target_mip - 1, wgpu::TextureUsages::TEXTURE_BINDING);
            let dst_view = mip_view(target_mip, wgpu::TextureUsages::RENDER_ATTACHMENT);

            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Mip Bind Group"),
                layout: &bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&src_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&sampler),
                    },
                ],
            });

            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Mipmap Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &dst_view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            rpass.set_pipeline(&pipeline);
            rpass.set_bind_group(0, &bind_group, &[]);
            rpass.draw(0..3, 0..1);
        }

        queue.submit(Some(encoder.finish()));
    }

    fn view_format(is_srgb: bool) -> Option<wgpu::TextureFormat> {
        is_srgb.then_some(wgpu::TextureFormat::Rgba8UnormSrgb)
    }
}
