//! Deferred-shading frame orchestration.
//!
//! A frame runs `begin_frame`, one or more geometry passes into a G-buffer,
//! the point light pass, an optional directional light pass, the bloom
//! chain, the depth copy and any forward passes, then `end_frame`.

use std::mem;

use glam::{Mat4, Vec3};
use wgpu::util::DeviceExt;

use crate::renderer::cubemap::CubeMap;
use crate::renderer::error::{GpuErrorSink, RenderError};
use crate::renderer::frame::{Frame, FramePhase, FrameSequencer, FrameTarget, GeometryPass};
use crate::renderer::lights::{
    LightHandle, PointLight, PointLightArena, PointLightRecord,
};
use crate::renderer::material::MaterialLayout;
use crate::renderer::mesh::GpuMesh;
use crate::renderer::pipeline_builder::ADDITIVE_BLEND;
use crate::renderer::postprocess::{BloomChain, LIT_FORMAT};
use crate::renderer::primitives;
use crate::renderer::program::{DepthMode, ProgramDescriptor, ShaderProgram, UniformKind, UniformValue};
use crate::renderer::render_target::{RenderTarget, DEPTH_FORMAT, GBUFFER_FORMATS};
use crate::renderer::uniforms::CameraUniform;
use crate::renderer::vertex::MeshVertex;
use crate::settings::{BloomSettings, RendererSettings};

/// Number of G-buffer attachments the lighting passes read.
pub const GBUFFER_ATTACHMENTS: usize = GBUFFER_FORMATS.len();

/// Default G-buffer program for material-bound instanced meshes.
pub const GBUFFER_SHADER: &str = include_str!("../shader/gbuffer.wgsl");
/// Lighting programs; entry points for the ambient, point and directional
/// passes.
pub const LIGHTING_SHADER: &str = include_str!("../shader/lighting.wgsl");

const DIRECTIONAL_UNIFORMS: [(&str, UniformKind); 2] = [
    ("lightDir", UniformKind::Vec3),
    ("lightColor", UniformKind::Vec3),
];

const LIGHT_RECORD_SIZE: u64 = mem::size_of::<PointLightRecord>() as u64;

struct GBufferBinding {
    key: (u64, u64),
    bind_group: wgpu::BindGroup,
}

struct Skybox {
    layout: wgpu::BindGroupLayout,
    program: ShaderProgram,
}

pub struct Renderer {
    settings: RendererSettings,
    sequencer: FrameSequencer,
    frame: Option<Frame>,
    surface_format: wgpu::TextureFormat,
    width: u32,
    height: u32,

    view: Mat4,
    eye: Vec3,
    projection: Mat4,
    camera_buffer: wgpu::Buffer,
    camera_layout: wgpu::BindGroupLayout,
    camera_bind_group: wgpu::BindGroup,

    material_layout: MaterialLayout,
    gbuffer_layout: wgpu::BindGroupLayout,
    gbuffer_binding: Option<GBufferBinding>,

    lights: PointLightArena,
    light_buffer: wgpu::Buffer,
    light_volume: GpuMesh,
    ambient_program: ShaderProgram,
    point_light_program: ShaderProgram,
    directional_program: ShaderProgram,

    bloom: BloomChain,
    skybox: Skybox,
    errors: GpuErrorSink,
}

impl Renderer {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        surface_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        settings: RendererSettings,
    ) -> Result<Self, RenderError> {
        let errors = GpuErrorSink::install(device);
        let (width, height) = (width.max(1), height.max(1));
        let eye = Vec3::new(0.0, 1.0, 3.0);
        let view = Mat4::look_to_rh(eye, Vec3::NEG_Z, Vec3::Y);
        let projection = perspective(&settings, width, height);

        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Buffer"),
            contents: bytemuck::bytes_of(&CameraUniform::new(view, projection, eye)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let camera_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Camera Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Camera Bind Group"),
            layout: &camera_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });

        let gbuffer_entries: Vec<wgpu::BindGroupLayoutEntry> = (0..GBUFFER_ATTACHMENTS as u32)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            })
            .collect();
        let gbuffer_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GBuffer Read Layout"),
            entries: &gbuffer_entries,
        });

        let material_layout = MaterialLayout::new(device, queue);

        let lights = PointLightArena::new(settings.max_point_lights);
        let light_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Point Light Instances"),
            size: settings.max_point_lights as u64 * LIGHT_RECORD_SIZE,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let light_volume = GpuMesh::from_data(device, "Light Volume", primitives::light_volume());

        let lighting_layouts = [&camera_layout, &gbuffer_layout];
        let ambient_program = ShaderProgram::new(
            device,
            ProgramDescriptor {
                vertex_entry: "vs_fullscreen",
                fragment_entry: "fs_ambient",
                color_targets: lit_targets(None),
                cull_mode: None,
                bind_group_layouts: &lighting_layouts,
                ..ProgramDescriptor::new("Ambient Light", LIGHTING_SHADER)
            },
        )?;
        let point_light_program = ShaderProgram::new(
            device,
            Self::point_light_descriptor("Point Lights", LIGHTING_SHADER, &lighting_layouts),
        )?;
        let directional_program = ShaderProgram::new(
            device,
            Self::directional_light_descriptor("Directional Light", LIGHTING_SHADER, &lighting_layouts),
        )?;

        let bloom = BloomChain::new(device, width, height, surface_format, &settings.bloom)?;
        let skybox = Skybox::new(device, &camera_layout, surface_format)?;

        log::info!(
            "Renderer ready: {}x{}, {:?}, up to {} point lights",
            width,
            height,
            surface_format,
            settings.max_point_lights
        );

        Ok(Self {
            settings,
            sequencer: FrameSequencer::new(),
            frame: None,
            surface_format,
            width,
            height,
            view,
            eye,
            projection,
            camera_buffer,
            camera_layout,
            camera_bind_group,
            material_layout,
            gbuffer_layout,
            gbuffer_binding: None,
            lights,
            light_buffer,
            light_volume,
            ambient_program,
            point_light_program,
            directional_program,
            bloom,
            skybox,
            errors,
        })
    }

    /// Descriptor of a point light program: light volume mesh plus
    /// [`PointLightRecord`] instances, additive, front faces culled, no depth.
    pub fn point_light_descriptor<'a>(
        label: &'a str,
        source: &'a str,
        layouts: &'a [&'a wgpu::BindGroupLayout],
    ) -> ProgramDescriptor<'a> {
        ProgramDescriptor {
            vertex_entry: "vs_point",
            fragment_entry: "fs_point",
            vertex_buffers: vec![MeshVertex::layout(), PointLightRecord::layout()],
            color_targets: lit_targets(Some(ADDITIVE_BLEND)),
            cull_mode: Some(wgpu::Face::Front),
            bind_group_layouts: layouts,
            ..ProgramDescriptor::new(label, source)
        }
    }

    /// Descriptor of a full-screen directional light program with the
    /// `lightDir` and `lightColor` uniforms.
    pub fn directional_light_descriptor<'a>(
        label: &'a str,
        source: &'a str,
        layouts: &'a [&'a wgpu::BindGroupLayout],
    ) -> ProgramDescriptor<'a> {
        ProgramDescriptor {
            vertex_entry: "vs_fullscreen",
            fragment_entry: "fs_directional",
            color_targets: lit_targets(Some(ADDITIVE_BLEND)),
            cull_mode: None,
            bind_group_layouts: layouts,
            uniforms: &DIRECTIONAL_UNIFORMS,
            ..ProgramDescriptor::new(label, source)
        }
    }

    /// G-buffer program for `gbuffer` with the camera and material groups.
    pub fn geometry_program(
        &self,
        device: &wgpu::Device,
        label: &str,
        source: &str,
        gbuffer: &RenderTarget,
    ) -> Result<ShaderProgram, RenderError> {
        ShaderProgram::geometry(
            device,
            label,
            source,
            gbuffer.color_targets(None),
            &[&self.camera_layout, self.material_layout.layout()],
        )
    }

    /// Program for [`Renderer::forward_pass`]: draws into the surface with
    /// the copied G-buffer depth.
    pub fn forward_program(
        &self,
        device: &wgpu::Device,
        label: &str,
        source: &str,
        blend: Option<wgpu::BlendState>,
    ) -> Result<ShaderProgram, RenderError> {
        ShaderProgram::geometry(
            device,
            label,
            source,
            vec![Some(wgpu::ColorTargetState {
                format: self.surface_format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            &[&self.camera_layout, self.material_layout.layout()],
        )
    }

    pub fn begin_frame(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        target: FrameTarget,
    ) -> Result<(), RenderError> {
        self.sequencer.advance(FramePhase::Begun)?;

        if (target.width, target.height) != (self.width, self.height) {
            self.resize(device, target.width, target.height);
        }
        self.projection = perspective(&self.settings, self.width, self.height);
        self.upload_camera(queue);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Frame Encoder"),
        });
        {
            let _clear = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Clear Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.color,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.settings.clear_color()),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &target.depth,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.frame = Some(Frame { encoder, target });
        Ok(())
    }

    /// Opens a pass writing `gbuffer`. The first geometry pass of a frame
    /// clears it.
    pub fn geometry_pass<'a>(
        &'a mut self,
        device: &'a wgpu::Device,
        queue: &'a wgpu::Queue,
        gbuffer: &RenderTarget,
    ) -> Result<GeometryPass<'a>, RenderError> {
        let first = self.sequencer.phase() == FramePhase::Begun;
        self.sequencer.advance(FramePhase::Geometry)?;
        let frame = self.frame.as_mut().ok_or(RenderError::NoFrame)?;
        let clear = first.then_some(wgpu::Color::TRANSPARENT);
        let pass = gbuffer.begin_pass(&mut frame.encoder, clear);
        Ok(GeometryPass::new(
            pass,
            device,
            queue,
            &self.camera_bind_group,
            &self.material_layout,
            self.sequencer.frame_index(),
        ))
    }

    /// Clears the lit target, adds ambient and emissive light, then draws one
    /// light volume per point light.
    pub fn run_point_light_pass(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        gbuffer: &RenderTarget,
    ) -> Result<(), RenderError> {
        check_gbuffer(gbuffer)?;
        self.sequencer.advance(FramePhase::PointLights)?;
        self.ensure_gbuffer_binding(device, gbuffer)?;

        let records = self.lights.records();
        if !records.is_empty() {
            queue.write_buffer(&self.light_buffer, 0, bytemuck::cast_slice(&records));
        }

        let frame = self.frame.as_mut().ok_or(RenderError::NoFrame)?;
        let Some(binding) = self.gbuffer_binding.as_ref() else {
            return Ok(());
        };
        let lit = self.bloom.lit_view()?;
        let mut pass = lighting_pass(&mut frame.encoder, "Point Light Pass", lit, true);
        pass.set_bind_group(0, &self.camera_bind_group, &[]);
        pass.set_bind_group(1, &binding.bind_group, &[]);

        self.ambient_program.bind(&mut pass, queue);
        pass.draw(0..3, 0..1);

        if !records.is_empty() {
            self.point_light_program.bind(&mut pass, queue);
            self.light_volume.bind(&mut pass);
            let end = records.len() as u64 * LIGHT_RECORD_SIZE;
            pass.set_vertex_buffer(1, self.light_buffer.slice(..end));
            pass.draw_indexed(
                0..self.light_volume.index_count(),
                0,
                0..records.len() as u32,
            );
        }
        Ok(())
    }

    /// Full-screen light from `direction` added to the lit target.
    pub fn run_directional_light_pass(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        gbuffer: &RenderTarget,
        direction: Vec3,
        color: Vec3,
    ) -> Result<(), RenderError> {
        check_gbuffer(gbuffer)?;
        self.sequencer.advance(FramePhase::DirectionalLight)?;
        self.ensure_gbuffer_binding(device, gbuffer)?;

        self.directional_program
            .set_uniform("lightDir", UniformValue::Vec3(direction.normalize_or_zero()));
        self.directional_program
            .set_uniform("lightColor", UniformValue::Vec3(color));

        let frame = self.frame.as_mut().ok_or(RenderError::NoFrame)?;
        let Some(binding) = self.gbuffer_binding.as_ref() else {
            return Ok(());
        };
        let lit = self.bloom.lit_view()?;
        let mut pass = lighting_pass(&mut frame.encoder, "Directional Light Pass", lit, false);
        pass.set_bind_group(0, &self.camera_bind_group, &[]);
        pass.set_bind_group(1, &binding.bind_group, &[]);
        self.directional_program.bind(&mut pass, queue);
        pass.draw(0..3, 0..1);
        Ok(())
    }

    pub fn run_bloom_extraction(&mut self, device: &wgpu::Device) -> Result<(), RenderError> {
        self.sequencer.advance(FramePhase::BrightPass)?;
        let frame = self.frame.as_mut().ok_or(RenderError::NoFrame)?;
        self.bloom.run_bright(&mut frame.encoder, device)
    }

    pub fn run_blur(&mut self, device: &wgpu::Device) -> Result<(), RenderError> {
        self.sequencer.advance(FramePhase::Blur)?;
        let frame = self.frame.as_mut().ok_or(RenderError::NoFrame)?;
        self.bloom.run_blur(&mut frame.encoder, device)
    }

    pub fn run_composite(&mut self, device: &wgpu::Device) -> Result<(), RenderError> {
        self.sequencer.advance(FramePhase::Composite)?;
        let frame = self.frame.as_mut().ok_or(RenderError::NoFrame)?;
        self.bloom
            .run_composite(&mut frame.encoder, device, &frame.target.color)
    }

    /// Writes the G-buffer depth into the frame target depth.
    pub fn copy_depth(&mut self, device: &wgpu::Device, gbuffer: &RenderTarget) -> Result<(), RenderError> {
        if !gbuffer.has_depth() {
            return Err(RenderError::MissingDepth(gbuffer.label().to_owned()));
        }
        self.sequencer.advance(FramePhase::DepthCopy)?;
        let frame = self.frame.as_mut().ok_or(RenderError::NoFrame)?;
        self.bloom
            .copy_depth(&mut frame.encoder, device, gbuffer, &frame.target.depth)
    }

    /// Geometry pass over the frame target, keeping its colour and depth.
    pub fn forward_pass<'a>(
        &'a mut self,
        device: &'a wgpu::Device,
        queue: &'a wgpu::Queue,
    ) -> Result<GeometryPass<'a>, RenderError> {
        self.sequencer.advance(FramePhase::Forward)?;
        let frame = self.frame.as_mut().ok_or(RenderError::NoFrame)?;
        let pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Forward Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &frame.target.color,
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &frame.target.depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        Ok(GeometryPass::new(
            pass,
            device,
            queue,
            &self.camera_bind_group,
            &self.material_layout,
            self.sequencer.frame_index(),
        ))
    }

    /// Draws `cubemap` wherever the depth buffer is still at the far plane.
    pub fn draw_skybox(&mut self, device: &wgpu::Device, cubemap: &CubeMap) -> Result<(), RenderError> {
        self.sequencer.advance(FramePhase::Forward)?;
        let frame = self.frame.as_mut().ok_or(RenderError::NoFrame)?;
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Skybox Bind Group"),
            layout: &self.skybox.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(cubemap.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(cubemap.sampler()),
                },
            ],
        });

        let mut pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Skybox Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &frame.target.color,
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &frame.target.depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(self.skybox.program.pipeline());
        pass.set_bind_group(0, &self.camera_bind_group, &[]);
        pass.set_bind_group(1, &bind_group, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }

    /// Submits the frame's commands. The caller presents the surface image.
    pub fn end_frame(&mut self, queue: &wgpu::Queue) -> Result<(), RenderError> {
        self.sequencer.advance(FramePhase::Ended)?;
        let frame = self.frame.take().ok_or(RenderError::NoFrame)?;
        queue.submit(std::iter::once(frame.encoder.finish()));
        Ok(())
    }

    /// Drops the recorded commands of the frame in progress and reports
    /// the errors raised so far.
    pub fn abort_frame(&mut self) -> usize {
        self.sequencer.abort();
        self.frame = None;
        self.report_errors()
    }

    /// Logs and clears every GPU error raised on the device since the last
    /// call. Safe at any point of a frame; later passes keep reporting into
    /// the same sink. Returns the number of errors.
    pub fn report_errors(&mut self) -> usize {
        let errors = self.errors.drain();
        for error in &errors {
            log::error!("Frame {}: {}", self.sequencer.frame_index(), error);
        }
        errors.len()
    }

    /// Sink receiving device errors raised outside an error scope.
    pub fn error_sink(&self) -> &GpuErrorSink {
        &self.errors
    }

    pub fn add_point_light(
        &mut self,
        color: Vec3,
        position: Vec3,
        radius: f32,
    ) -> Result<LightHandle, RenderError> {
        self.lights
            .add(PointLight::new(color, position, radius))
            .inspect_err(|e| log::warn!("{}", e))
    }

    pub fn transform_point_light(
        &mut self,
        handle: LightHandle,
        position: Vec3,
        radius: Option<f32>,
    ) -> Result<(), RenderError> {
        self.lights.transform(handle, position, radius)
    }

    pub fn set_point_light_color(&mut self, handle: LightHandle, color: Vec3) -> Result<(), RenderError> {
        self.lights.set_color(handle, color)
    }

    pub fn remove_point_light(&mut self, handle: LightHandle) -> Result<PointLight, RenderError> {
        self.lights.remove(handle)
    }

    pub fn point_lights(&self) -> &PointLightArena {
        &self.lights
    }

    pub fn set_view_matrix(&mut self, view: Mat4, position: Vec3) {
        self.view = view;
        self.eye = position;
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn eye(&self) -> Vec3 {
        self.eye
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Resizes the viewport and the post-process targets. Zero sizes are
    /// ignored.
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.width = width;
        self.height = height;
        self.projection = perspective(&self.settings, width, height);
        self.bloom.resize(device, width, height);
    }

    pub fn set_bloom_settings(&mut self, queue: &wgpu::Queue, bloom: BloomSettings) {
        self.bloom.set_settings(queue, &bloom);
        self.settings.bloom = bloom;
    }

    pub fn set_point_light_program(&mut self, program: ShaderProgram) {
        log::info!("Point light program replaced by '{}'", program.label());
        self.point_light_program = program;
    }

    /// The replacement must declare the `lightDir` and `lightColor` uniforms.
    pub fn set_directional_light_program(&mut self, program: ShaderProgram) {
        if program.uniform_location("lightDir").is_none()
            || program.uniform_location("lightColor").is_none()
        {
            log::warn!(
                "Directional light program '{}' lacks lightDir/lightColor",
                program.label()
            );
        }
        self.directional_program = program;
    }

    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    pub fn phase(&self) -> FramePhase {
        self.sequencer.phase()
    }

    pub fn camera_layout(&self) -> &wgpu::BindGroupLayout {
        &self.camera_layout
    }

    pub fn gbuffer_layout(&self) -> &wgpu::BindGroupLayout {
        &self.gbuffer_layout
    }

    pub fn material_layout(&self) -> &MaterialLayout {
        &self.material_layout
    }

    pub fn bloom(&self) -> &BloomChain {
        &self.bloom
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.surface_format
    }

    fn upload_camera(&self, queue: &wgpu::Queue) {
        let uniform = CameraUniform::new(self.view, self.projection, self.eye);
        queue.write_buffer(&self.camera_buffer, 0, bytemuck::bytes_of(&uniform));
    }

    fn ensure_gbuffer_binding(
        &mut self,
        device: &wgpu::Device,
        gbuffer: &RenderTarget,
    ) -> Result<(), RenderError> {
        let key = (gbuffer.id(), gbuffer.generation());
        if self.gbuffer_binding.as_ref().is_some_and(|b| b.key == key) {
            return Ok(());
        }

        let mut entries = Vec::with_capacity(GBUFFER_ATTACHMENTS);
        for binding in 0..GBUFFER_ATTACHMENTS {
            let view = gbuffer.color_view(binding).ok_or(RenderError::GBufferMismatch {
                required: GBUFFER_ATTACHMENTS,
                found: gbuffer.attachment_count(),
            })?;
            entries.push(wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("GBuffer Read Bind Group"),
            layout: &self.gbuffer_layout,
            entries: &entries,
        });
        log::debug!("Rebuilt G-buffer bindings for '{}'", gbuffer.label());
        self.gbuffer_binding = Some(GBufferBinding { key, bind_group });
        Ok(())
    }
}

impl Skybox {
    fn new(
        device: &wgpu::Device,
        camera_layout: &wgpu::BindGroupLayout,
        format: wgpu::TextureFormat,
    ) -> Result<Self, RenderError> {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Skybox Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::Cube,
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
        let program = ShaderProgram::new(
            device,
            ProgramDescriptor {
                color_targets: vec![Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                depth: Some(DepthMode {
                    format: DEPTH_FORMAT,
                    write: false,
                    compare: wgpu::CompareFunction::LessEqual,
                }),
                cull_mode: None,
                bind_group_layouts: &[camera_layout, &layout],
                ..ProgramDescriptor::new("Skybox", include_str!("../shader/skybox.wgsl"))
            },
        )?;
        Ok(Self { layout, program })
    }
}

/// Right-handed perspective with a 0..1 depth range.
pub fn perspective(settings: &RendererSettings, width: u32, height: u32) -> Mat4 {
    let aspect = width.max(1) as f32 / height.max(1) as f32;
    Mat4::perspective_rh(
        settings.field_of_view.to_radians(),
        aspect,
        settings.near_plane,
        settings.far_plane,
    )
}

fn check_gbuffer(gbuffer: &RenderTarget) -> Result<(), RenderError> {
    if gbuffer.attachment_count() < GBUFFER_ATTACHMENTS {
        return Err(RenderError::GBufferMismatch {
            required: GBUFFER_ATTACHMENTS,
            found: gbuffer.attachment_count(),
        });
    }
    Ok(())
}

fn lit_targets(blend: Option<wgpu::BlendState>) -> Vec<Option<wgpu::ColorTargetState>> {
    vec![Some(wgpu::ColorTargetState {
        format: LIT_FORMAT.texture_format(),
        blend,
        write_mask: wgpu::ColorWrites::ALL,
    })]
}

fn lighting_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    label: &str,
    lit: &wgpu::TextureView,
    clear: bool,
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: lit,
            resolve_target: None,
            depth_slice: None,
            ops: wgpu::Operations {
                load: if clear {
                    wgpu::LoadOp::Clear(wgpu::Color::BLACK)
                } else {
                    wgpu::LoadOp::Load
                },
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}
