//! Offscreen render targets with up to eight color attachments and an
//! optional depth attachment.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::renderer::error::RenderError;
use crate::renderer::texture::GpuTexture;

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

pub const MAX_COLOR_ATTACHMENTS: usize = 8;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;

/// Format tag of a color attachment.
///
/// The tag is kept verbatim for the lifetime of the attachment. wgpu has no
/// three-channel render formats, so RGB tags allocate their RGBA counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentFormat {
    Rgb8,
    Rgba8,
    Rgb16Float,
    Rgba16Float,
    Rgb32Float,
    Rgba32Float,
}

impl AttachmentFormat {
    pub fn texture_format(self) -> wgpu::TextureFormat {
        match self {
            AttachmentFormat::Rgb8 | AttachmentFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
            AttachmentFormat::Rgb16Float | AttachmentFormat::Rgba16Float => {
                wgpu::TextureFormat::Rgba16Float
            }
            AttachmentFormat::Rgb32Float | AttachmentFormat::Rgba32Float => {
                wgpu::TextureFormat::Rgba32Float
            }
        }
    }

    pub fn channels(self) -> u32 {
        match self {
            AttachmentFormat::Rgb8 | AttachmentFormat::Rgb16Float | AttachmentFormat::Rgb32Float => 3,
            _ => 4,
        }
    }

    pub fn is_float(self) -> bool {
        !matches!(self, AttachmentFormat::Rgb8 | AttachmentFormat::Rgba8)
    }

    /// 32-bit float attachments are not filterable without an extra feature.
    pub fn sample_type(self) -> wgpu::TextureSampleType {
        let filterable = !matches!(
            self,
            AttachmentFormat::Rgb32Float | AttachmentFormat::Rgba32Float
        );
        wgpu::TextureSampleType::Float { filterable }
    }
}

/// Attachment bookkeeping shared by every render target, independent of the
/// GPU objects behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentLayout {
    width: u32,
    height: u32,
    colors: Vec<AttachmentFormat>,
    draw_buffers: Vec<u32>,
    depth: bool,
}

impl AttachmentLayout {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            colors: Vec::with_capacity(MAX_COLOR_ATTACHMENTS),
            draw_buffers: Vec::with_capacity(MAX_COLOR_ATTACHMENTS),
            depth: false,
        }
    }

    /// Registers a color attachment and re-declares the draw-buffer list.
    pub fn push_color(&mut self, format: AttachmentFormat) -> Result<usize, RenderError> {
        if self.colors.len() >= MAX_COLOR_ATTACHMENTS {
            return Err(RenderError::AttachmentLimit {
                limit: MAX_COLOR_ATTACHMENTS,
            });
        }
        self.colors.push(format);
        self.draw_buffers = (0..self.colors.len() as u32).collect();
        Ok(self.colors.len() - 1)
    }

    /// Marks depth as present. Returns whether a depth attachment existed.
    pub fn set_depth(&mut self) -> bool {
        std::mem::replace(&mut self.depth, true)
    }

    /// Zero dimensions are ignored. Returns whether the size changed.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 || (width == self.width && height == self.height) {
            return false;
        }
        self.width = width;
        self.height = height;
        true
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn colors(&self) -> &[AttachmentFormat] {
        &self.colors
    }

    pub fn draw_buffers(&self) -> &[u32] {
        &self.draw_buffers
    }

    pub fn has_depth(&self) -> bool {
        self.depth
    }

    pub fn color_count(&self) -> usize {
        self.colors.len()
    }

    pub fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }
}

struct ColorAttachment {
    format: AttachmentFormat,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct DepthAttachment {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

pub struct RenderTarget {
    id: u64,
    label: String,
    layout: AttachmentLayout,
    colors: Vec<ColorAttachment>,
    depth: Option<DepthAttachment>,
    sampler: wgpu::Sampler,
    generation: u64,
}

impl RenderTarget {
    pub fn new(device: &wgpu::Device, label: &str, width: u32, height: u32) -> Self {
        // Attachments are read back pixel for pixel: no wrapping, no mips.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&format!("{label} Sampler")),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            id: NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed),
            label: label.to_owned(),
            layout: AttachmentLayout::new(width, height),
            colors: Vec::with_capacity(MAX_COLOR_ATTACHMENTS),
            depth: None,
            sampler,
            generation: 0,
        }
    }

    /// Standard deferred G-buffer: diffuse, position, normal, specular
    /// (RGBA16F), material parameters and emission (RGB8), plus depth.
    pub fn gbuffer(
        device: &wgpu::Device,
        width: u32,
        height: u32,
    ) -> Result<Self, RenderError> {
        let mut target = Self::new(device, "GBuffer", width, height);
        for format in GBUFFER_FORMATS {
            target.add_color_attachment(device, format)?;
        }
        target.add_depth_attachment(device);
        Ok(target)
    }

    pub fn add_color_attachment(
        &mut self,
        device: &wgpu::Device,
        format: AttachmentFormat,
    ) -> Result<usize, RenderError> {
        let slot = match self.layout.push_color(format) {
            Ok(slot) => slot,
            Err(err) => {
                log::warn!("{}: {}", self.label, err);
                return Err(err);
            }
        };

        let (texture, view) = self.create_color(device, slot, format);
        self.colors.push(ColorAttachment {
            format,
            texture,
            view,
        });
        self.generation += 1;
        Ok(slot)
    }

    pub fn add_depth_attachment(&mut self, device: &wgpu::Device) {
        if self.layout.set_depth() {
            log::debug!("{}: replacing depth attachment", self.label);
        }
        // Dropping the previous attachment releases its texture.
        self.depth = None;
        self.depth = Some(self.create_depth(device));
        self.generation += 1;
    }

    /// Re-allocates every attachment at the new size with its original format.
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if !self.layout.resize(width, height) {
            return;
        }

        for slot in 0..self.colors.len() {
            let format = self.colors[slot].format;
            let (texture, view) = self.create_color(device, slot, format);
            self.colors[slot].texture = texture;
            self.colors[slot].view = view;
        }

        if self.depth.is_some() {
            self.depth = Some(self.create_depth(device));
        }

        self.generation += 1;
    }

    /// Begins a pass writing every color attachment (in draw-buffer order)
    /// and the depth attachment.
    ///
    /// `clear` clears color to the given value and depth to 1.0; `None`
    /// keeps the existing contents.
    pub fn begin_pass<'e>(
        &self,
        encoder: &'e mut wgpu::CommandEncoder,
        clear: Option<wgpu::Color>,
    ) -> wgpu::RenderPass<'e> {
        let load = match clear {
            Some(color) => wgpu::LoadOp::Clear(color),
            None => wgpu::LoadOp::Load,
        };
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = self
            .layout
            .draw_buffers()
            .iter()
            .map(|&slot| {
                Some(wgpu::RenderPassColorAttachment {
                    view: &self.colors[slot as usize].view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();

        let depth_stencil_attachment =
            self.depth
                .as_ref()
                .map(|depth| wgpu::RenderPassDepthStencilAttachment {
                    view: &depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: if clear.is_some() {
                            wgpu::LoadOp::Clear(1.0)
                        } else {
                            wgpu::LoadOp::Load
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                });

        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&self.label),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        })
    }

    /// Color target states for pipelines rendering into this target.
    pub fn color_targets(&self, blend: Option<wgpu::BlendState>) -> Vec<Option<wgpu::ColorTargetState>> {
        self.colors
            .iter()
            .map(|attachment| {
                Some(wgpu::ColorTargetState {
                    format: attachment.format.texture_format(),
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect()
    }

    /// Unique per target; with [`generation`](Self::generation) it keys
    /// bind groups built from the attachments.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn layout(&self) -> &AttachmentLayout {
        &self.layout
    }

    pub fn width(&self) -> u32 {
        self.layout.width()
    }

    pub fn height(&self) -> u32 {
        self.layout.height()
    }

    pub fn attachment_count(&self) -> usize {
        self.colors.len()
    }

    pub fn draw_buffers(&self) -> &[u32] {
        self.layout.draw_buffers()
    }

    pub fn color_formats(&self) -> &[AttachmentFormat] {
        self.layout.colors()
    }

    pub fn color_format(&self, index: usize) -> Option<AttachmentFormat> {
        self.colors.get(index).map(|c| c.format)
    }

    pub fn color_sample_type(&self, index: usize) -> Option<wgpu::TextureSampleType> {
        self.color_format(index).map(AttachmentFormat::sample_type)
    }

    pub fn color_view(&self, index: usize) -> Option<&wgpu::TextureView> {
        self.colors.get(index).map(|c| &c.view)
    }

    pub fn color_texture(&self, index: usize) -> Option<&wgpu::Texture> {
        self.colors.get(index).map(|c| &c.texture)
    }

    /// Non-owning texture alias of one attachment, for sampling in later passes.
    pub fn texture(&self, index: usize) -> Option<GpuTexture> {
        self.colors.get(index).map(|c| {
            GpuTexture::alias(
                c.view.clone(),
                self.sampler.clone(),
                self.layout.width(),
                self.layout.height(),
            )
        })
    }

    pub fn textures(&self) -> Vec<GpuTexture> {
        (0..self.colors.len()).filter_map(|i| self.texture(i)).collect()
    }

    pub fn depth_view(&self) -> Option<&wgpu::TextureView> {
        self.depth.as_ref().map(|d| &d.view)
    }

    pub fn has_depth(&self) -> bool {
        self.depth.is_some()
    }

    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }

    /// Bumped whenever attachment textures are created or re-created.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn create_color(
        &self,
        device: &wgpu::Device,
        slot: usize,
        format: AttachmentFormat,
    ) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("{} Color{}", self.label, slot)),
            size: self.layout.extent(),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: format.texture_format(),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    fn create_depth(&self, device: &wgpu::Device) -> DepthAttachment {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("{} Depth", self.label)),
            size: self.layout.extent(),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        DepthAttachment {
            _texture: texture,
            view,
        }
    }
}

/// Attachment order of [`RenderTarget::gbuffer`].
pub const GBUFFER_FORMATS: [AttachmentFormat; 6] = [
    AttachmentFormat::Rgba16Float,
    AttachmentFormat::Rgba16Float,
    AttachmentFormat::Rgba16Float,
    AttachmentFormat::Rgba16Float,
    AttachmentFormat::Rgb8,
    AttachmentFormat::Rgb8,
];
