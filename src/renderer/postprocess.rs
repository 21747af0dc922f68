//! Bloom post-process chain: bright-pass extraction, ping-pong Gaussian
//! blur, exposure composite, and the G-buffer depth copy.

use wgpu::util::DeviceExt;

use crate::renderer::error::RenderError;
use crate::renderer::program::{DepthMode, ProgramDescriptor, ShaderProgram};
use crate::renderer::render_target::{AttachmentFormat, RenderTarget, DEPTH_FORMAT};
use crate::renderer::uniforms::PostParams;
use crate::settings::BloomSettings;

/// Format of the HDR lighting accumulation target.
pub const LIT_FORMAT: AttachmentFormat = AttachmentFormat::Rgb16Float;
const BLOOM_FORMAT: AttachmentFormat = AttachmentFormat::Rgb8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlurSource {
    Bright,
    Blur(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlurStep {
    pub horizontal: bool,
    pub source: BlurSource,
    /// Index of the blur target written by this step.
    pub dest: usize,
}

/// Order of blur passes for a given pass count: every horizontal pass, then
/// every vertical pass. The first step reads the bright target and every
/// later step reads what the previous one wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlurSchedule {
    steps: Vec<BlurStep>,
    output: BlurSource,
}

impl BlurSchedule {
    pub fn new(passes: u32) -> Self {
        let passes = passes as usize;
        let steps: Vec<BlurStep> = (0..passes * 2)
            .map(|i| BlurStep {
                horizontal: i < passes,
                source: if i == 0 {
                    BlurSource::Bright
                } else {
                    BlurSource::Blur((i - 1) % 2)
                },
                dest: i % 2,
            })
            .collect();
        let output = steps
            .last()
            .map_or(BlurSource::Bright, |step| BlurSource::Blur(step.dest));
        Self { steps, output }
    }

    pub fn steps(&self) -> &[BlurStep] {
        &self.steps
    }

    /// Target holding the final blurred image.
    pub fn output(&self) -> BlurSource {
        self.output
    }

    pub fn horizontal_count(&self) -> usize {
        self.steps.iter().filter(|s| s.horizontal).count()
    }

    pub fn vertical_count(&self) -> usize {
        self.steps.len() - self.horizontal_count()
    }
}

struct BloomBindGroups {
    bright: wgpu::BindGroup,
    blur: Vec<wgpu::BindGroup>,
    composite: wgpu::BindGroup,
}

struct DepthCopy {
    layout: wgpu::BindGroupLayout,
    program: ShaderProgram,
    /// Bind group for the G-buffer it was built from, keyed by target id and
    /// generation.
    bind_group: Option<((u64, u64), wgpu::BindGroup)>,
}

pub struct BloomChain {
    settings: BloomSettings,
    schedule: BlurSchedule,
    lit: RenderTarget,
    bright: RenderTarget,
    blur: [RenderTarget; 2],
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    bright_program: ShaderProgram,
    blur_program: ShaderProgram,
    composite_program: ShaderProgram,
    bright_params: wgpu::Buffer,
    blur_params: [wgpu::Buffer; 2],
    composite_params: wgpu::Buffer,
    depth_copy: DepthCopy,
    bind_groups: Option<BloomBindGroups>,
    bind_groups_dirty: bool,
}

impl BloomChain {
    pub fn new(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        output_format: wgpu::TextureFormat,
        settings: &BloomSettings,
    ) -> Result<Self, RenderError> {
        let (width, height) = (width.max(1), height.max(1));
        let lit = single_target(device, "Lit Target", width, height, LIT_FORMAT)?;
        let bright = single_target(device, "Bright Target", width, height, BLOOM_FORMAT)?;
        let blur = [
            single_target(device, "Blur Target 0", width, height, BLOOM_FORMAT)?,
            single_target(device, "Blur Target 1", width, height, BLOOM_FORMAT)?,
        ];

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Bloom Linear Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Layout"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let source = include_str!("../shader/postprocess.wgsl");
        let layouts = [&layout];
        let fullscreen = |label: &'static str, entry: &'static str, format: wgpu::TextureFormat| {
            ShaderProgram::new(
                device,
                ProgramDescriptor {
                    vertex_entry: "vs_fullscreen",
                    fragment_entry: entry,
                    color_targets: vec![Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    cull_mode: None,
                    bind_group_layouts: &layouts,
                    ..ProgramDescriptor::new(label, source)
                },
            )
        };
        let bloom_format = BLOOM_FORMAT.texture_format();
        let bright_program = fullscreen("Bright Pass", "fs_bright", bloom_format)?;
        let blur_program = fullscreen("Gaussian Blur", "fs_blur", bloom_format)?;
        let composite_program = fullscreen("Bloom Composite", "fs_composite", output_format)?;

        let params_buffer = |label: &str, params: PostParams| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            })
        };
        let bright_params = params_buffer("Bright Params", bright_uniform(settings));
        let blur_params = [
            params_buffer("Blur Params H", PostParams::blur(true, settings.power)),
            params_buffer("Blur Params V", PostParams::blur(false, settings.power)),
        ];
        let composite_params = params_buffer("Composite Params", composite_uniform(settings));

        let depth_copy = DepthCopy::new(device)?;

        log::info!(
            "Bloom chain {}x{}: {} blur passes, exposure {}",
            width,
            height,
            settings.passes,
            settings.exposure
        );

        Ok(Self {
            settings: settings.clone(),
            schedule: BlurSchedule::new(settings.passes),
            lit,
            bright,
            blur,
            layout,
            sampler,
            bright_program,
            blur_program,
            composite_program,
            bright_params,
            blur_params,
            composite_params,
            depth_copy,
            bind_groups: None,
            bind_groups_dirty: true,
        })
    }

    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if width == 0 || height == 0 || (width, height) == self.size() {
            return;
        }
        self.lit.resize(device, width, height);
        self.bright.resize(device, width, height);
        for target in &mut self.blur {
            target.resize(device, width, height);
        }
        self.mark_bind_groups_dirty();
    }

    pub fn set_settings(&mut self, queue: &wgpu::Queue, settings: &BloomSettings) {
        queue.write_buffer(&self.bright_params, 0, bytemuck::bytes_of(&bright_uniform(settings)));
        queue.write_buffer(
            &self.blur_params[0],
            0,
            bytemuck::bytes_of(&PostParams::blur(true, settings.power)),
        );
        queue.write_buffer(
            &self.blur_params[1],
            0,
            bytemuck::bytes_of(&PostParams::blur(false, settings.power)),
        );
        queue.write_buffer(
            &self.composite_params,
            0,
            bytemuck::bytes_of(&composite_uniform(settings)),
        );
        if settings.passes != self.settings.passes {
            self.schedule = BlurSchedule::new(settings.passes);
            self.mark_bind_groups_dirty();
        }
        self.settings = settings.clone();
    }

    pub fn settings(&self) -> &BloomSettings {
        &self.settings
    }

    pub fn schedule(&self) -> &BlurSchedule {
        &self.schedule
    }

    pub fn size(&self) -> (u32, u32) {
        (self.lit.width(), self.lit.height())
    }

    /// HDR target the lighting passes accumulate into.
    pub fn lit_target(&self) -> &RenderTarget {
        &self.lit
    }

    pub fn lit_view(&self) -> Result<&wgpu::TextureView, RenderError> {
        first_view(&self.lit)
    }

    pub fn bright_target(&self) -> &RenderTarget {
        &self.bright
    }

    pub fn blur_target(&self, index: usize) -> Option<&RenderTarget> {
        self.blur.get(index)
    }

    /// Writes the pixels of the lit target above the threshold into the
    /// bright target.
    pub fn run_bright(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        device: &wgpu::Device,
    ) -> Result<(), RenderError> {
        self.ensure_bind_groups(device)?;
        let Some(groups) = self.bind_groups.as_ref() else {
            return Ok(());
        };
        let view = first_view(&self.bright)?;
        let mut pass = fullscreen_pass(encoder, "Bright Pass", view);
        pass.set_pipeline(self.bright_program.pipeline());
        pass.set_bind_group(0, &groups.bright, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }

    pub fn run_blur(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        device: &wgpu::Device,
    ) -> Result<(), RenderError> {
        self.ensure_bind_groups(device)?;
        let Some(groups) = self.bind_groups.as_ref() else {
            return Ok(());
        };
        for (step, bind_group) in self.schedule.steps().iter().zip(&groups.blur) {
            let view = first_view(&self.blur[step.dest])?;
            let label = if step.horizontal {
                "Blur Pass H"
            } else {
                "Blur Pass V"
            };
            let mut pass = fullscreen_pass(encoder, label, view);
            pass.set_pipeline(self.blur_program.pipeline());
            pass.set_bind_group(0, bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        Ok(())
    }

    /// Exposure-maps the lit colour, adds the blurred highlights and writes
    /// the result into `target`.
    pub fn run_composite(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        device: &wgpu::Device,
        target: &wgpu::TextureView,
    ) -> Result<(), RenderError> {
        self.ensure_bind_groups(device)?;
        let Some(groups) = self.bind_groups.as_ref() else {
            return Ok(());
        };
        let mut pass = fullscreen_pass(encoder, "Bloom Composite", target);
        pass.set_pipeline(self.composite_program.pipeline());
        pass.set_bind_group(0, &groups.composite, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }

    /// Copies the depth attachment of `gbuffer` into `depth`.
    pub fn copy_depth(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        device: &wgpu::Device,
        gbuffer: &RenderTarget,
        depth: &wgpu::TextureView,
    ) -> Result<(), RenderError> {
        let source = gbuffer
            .depth_view()
            .ok_or_else(|| RenderError::MissingDepth(gbuffer.label().to_owned()))?;
        let key = (gbuffer.id(), gbuffer.generation());
        let copy = &mut self.depth_copy;
        if copy.bind_group.as_ref().map(|(k, _)| *k) != Some(key) {
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Depth Copy Bind Group"),
                layout: &copy.layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(source),
                }],
            });
            copy.bind_group = Some((key, bind_group));
        }
        let Some((_, bind_group)) = copy.bind_group.as_ref() else {
            return Ok(());
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Depth Copy"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(copy.program.pipeline());
        pass.set_bind_group(0, bind_group, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }

    fn mark_bind_groups_dirty(&mut self) {
        self.bind_groups = None;
        self.bind_groups_dirty = true;
    }

    fn ensure_bind_groups(&mut self, device: &wgpu::Device) -> Result<(), RenderError> {
        if !self.bind_groups_dirty && self.bind_groups.is_some() {
            return Ok(());
        }

        let lit = first_view(&self.lit)?;
        let bright = first_view(&self.bright)?;
        let blur = [first_view(&self.blur[0])?, first_view(&self.blur[1])?];
        let view_of = |source: BlurSource| match source {
            BlurSource::Bright => bright,
            BlurSource::Blur(index) => blur[index],
        };

        let bright_group = self.bind_group(device, "Bright Bind Group", lit, lit, &self.bright_params);
        let blur_groups = self
            .schedule
            .steps()
            .iter()
            .map(|step| {
                let source = view_of(step.source);
                let params = &self.blur_params[usize::from(!step.horizontal)];
                self.bind_group(device, "Blur Bind Group", source, source, params)
            })
            .collect();
        let composite = self.bind_group(
            device,
            "Composite Bind Group",
            lit,
            view_of(self.schedule.output()),
            &self.composite_params,
        );

        self.bind_groups = Some(BloomBindGroups {
            bright: bright_group,
            blur: blur_groups,
            composite,
        });
        self.bind_groups_dirty = false;
        Ok(())
    }

    fn bind_group(
        &self,
        device: &wgpu::Device,
        label: &str,
        first: &wgpu::TextureView,
        second: &wgpu::TextureView,
        params: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(first),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(second),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params.as_entire_binding(),
                },
            ],
        })
    }
}

impl DepthCopy {
    fn new(device: &wgpu::Device) -> Result<Self, RenderError> {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Depth Copy Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            }],
        });
        let program = ShaderProgram::new(
            device,
            ProgramDescriptor {
                vertex_entry: "vs_fullscreen",
                fragment_entry: "fs_copy_depth",
                depth: Some(DepthMode {
                    format: DEPTH_FORMAT,
                    write: true,
                    compare: wgpu::CompareFunction::Always,
                }),
                cull_mode: None,
                bind_group_layouts: &[&layout],
                ..ProgramDescriptor::new("Depth Copy", include_str!("../shader/depth_copy.wgsl"))
            },
        )?;
        Ok(Self {
            layout,
            program,
            bind_group: None,
        })
    }
}

fn bright_uniform(settings: &BloomSettings) -> PostParams {
    PostParams {
        threshold: settings.threshold,
        ..PostParams::blur(true, settings.power)
    }
}

fn composite_uniform(settings: &BloomSettings) -> PostParams {
    PostParams {
        exposure: settings.exposure,
        ..PostParams::blur(true, settings.power)
    }
}

fn single_target(
    device: &wgpu::Device,
    label: &str,
    width: u32,
    height: u32,
    format: AttachmentFormat,
) -> Result<RenderTarget, RenderError> {
    let mut target = RenderTarget::new(device, label, width, height);
    target.add_color_attachment(device, format)?;
    Ok(target)
}

fn first_view(target: &RenderTarget) -> Result<&wgpu::TextureView, RenderError> {
    target.color_view(0).ok_or(RenderError::GBufferMismatch {
        required: 1,
        found: 0,
    })
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn fullscreen_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    label: &str,
    view: &wgpu::TextureView,
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            depth_slice: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}
