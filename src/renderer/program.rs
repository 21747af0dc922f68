//! Compiled WGSL programs and their named uniform blocks.

use std::sync::atomic::{AtomicBool, Ordering};

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::renderer::error::{pop_error_scopes, push_error_scopes, RenderError};
use crate::renderer::instance::InstanceRecord;
use crate::renderer::render_target::DEPTH_FORMAT;
use crate::renderer::vertex::MeshVertex;
use crate::renderer::PipelineBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

impl UniformKind {
    /// Size in bytes inside a WGSL uniform buffer.
    pub fn size(self) -> usize {
        match self {
            UniformKind::Float | UniformKind::Int => 4,
            UniformKind::Vec2 => 8,
            UniformKind::Vec3 => 12,
            UniformKind::Vec4 => 16,
            UniformKind::Mat4 => 64,
        }
    }

    /// WGSL alignment; vec3 aligns like vec4.
    pub fn align(self) -> usize {
        match self {
            UniformKind::Float | UniformKind::Int => 4,
            UniformKind::Vec2 => 8,
            UniformKind::Vec3 | UniformKind::Vec4 | UniformKind::Mat4 => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Float(_) => UniformKind::Float,
            UniformValue::Int(_) => UniformKind::Int,
            UniformValue::Vec2(_) => UniformKind::Vec2,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Vec4(_) => UniformKind::Vec4,
            UniformValue::Mat4(_) => UniformKind::Mat4,
        }
    }

    fn write(&self, dst: &mut [u8]) {
        match self {
            UniformValue::Float(v) => dst.copy_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Int(v) => dst.copy_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Vec2(v) => dst.copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Vec3(v) => dst.copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Vec4(v) => dst.copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Mat4(m) => dst.copy_from_slice(bytemuck::cast_slice(&m.to_cols_array())),
        }
    }
}

#[derive(Debug, Clone)]
struct UniformField {
    name: String,
    kind: UniformKind,
    offset: usize,
}

/// CPU image of a WGSL uniform struct whose members are addressed by name.
#[derive(Debug, Clone, Default)]
pub struct UniformBlock {
    fields: Vec<UniformField>,
    data: Vec<u8>,
}

impl UniformBlock {
    pub fn new(members: &[(&str, UniformKind)]) -> Self {
        let mut fields = Vec::with_capacity(members.len());
        let mut offset = 0;
        for &(name, kind) in members {
            offset = align_up(offset, kind.align());
            fields.push(UniformField {
                name: name.to_owned(),
                kind,
                offset,
            });
            offset += kind.size();
        }
        let size = if fields.is_empty() {
            0
        } else {
            align_up(offset, 16)
        };
        Self {
            fields,
            data: vec![0; size],
        }
    }

    /// Member index for `name`, `None` when the block has no such member.
    pub fn location(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn offset_of(&self, name: &str) -> Option<usize> {
        self.location(name).map(|i| self.fields[i].offset)
    }

    /// Writes a member. Unknown names and kind mismatches are logged and
    /// leave the block unchanged.
    pub fn set(&mut self, name: &str, value: UniformValue) -> bool {
        let Some(index) = self.location(name) else {
            log::warn!("Unknown uniform '{}'", name);
            return false;
        };
        let field = &self.fields[index];
        if field.kind != value.kind() {
            log::warn!(
                "Uniform '{}' is {:?}, got {:?}",
                name,
                field.kind,
                value.kind()
            );
            return false;
        }
        let range = field.offset..field.offset + field.kind.size();
        value.write(&mut self.data[range]);
        true
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

#[derive(Debug, Clone, Copy)]
pub struct DepthMode {
    pub format: wgpu::TextureFormat,
    pub write: bool,
    pub compare: wgpu::CompareFunction,
}

impl DepthMode {
    /// Standard opaque geometry: write depth, keep nearer fragments.
    pub fn opaque() -> Self {
        Self {
            format: DEPTH_FORMAT,
            write: true,
            compare: wgpu::CompareFunction::Less,
        }
    }
}

pub struct ProgramDescriptor<'a> {
    pub label: &'a str,
    pub source: &'a str,
    pub vertex_entry: &'a str,
    pub fragment_entry: &'a str,
    pub vertex_buffers: Vec<wgpu::VertexBufferLayout<'a>>,
    pub color_targets: Vec<Option<wgpu::ColorTargetState>>,
    pub depth: Option<DepthMode>,
    pub cull_mode: Option<wgpu::Face>,
    pub bind_group_layouts: &'a [&'a wgpu::BindGroupLayout],
    /// Named uniforms, bound as one block in the group after
    /// `bind_group_layouts`.
    pub uniforms: &'a [(&'a str, UniformKind)],
}

impl<'a> ProgramDescriptor<'a> {
    pub fn new(label: &'a str, source: &'a str) -> Self {
        Self {
            label,
            source,
            vertex_entry: "vs_main",
            fragment_entry: "fs_main",
            vertex_buffers: Vec::new(),
            color_targets: Vec::new(),
            depth: None,
            cull_mode: Some(wgpu::Face::Back),
            bind_group_layouts: &[],
            uniforms: &[],
        }
    }
}

struct UniformBinding {
    group: u32,
    block: UniformBlock,
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    dirty: AtomicBool,
}

pub struct ShaderProgram {
    label: String,
    pipeline: wgpu::RenderPipeline,
    uniforms: Option<UniformBinding>,
}

impl ShaderProgram {
    /// Compiles the module and builds the pipeline. Validation, internal
    /// (shader translation) and out-of-memory errors are captured and
    /// returned instead of reaching the device error handler.
    pub fn new(device: &wgpu::Device, desc: ProgramDescriptor<'_>) -> Result<Self, RenderError> {
        push_error_scopes(device);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(desc.source.into()),
        });

        let block = UniformBlock::new(desc.uniforms);
        let uniform_layout = (!block.is_empty()).then(|| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{} Uniform Layout", desc.label)),
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
            })
        });

        let mut layouts: Vec<&wgpu::BindGroupLayout> = desc.bind_group_layouts.to_vec();
        if let Some(layout) = &uniform_layout {
            layouts.push(layout);
        }
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(desc.label),
            bind_group_layouts: &layouts,
            push_constant_ranges: &[],
        });

        let mut builder = PipelineBuilder::new(device, &pipeline_layout, &shader)
            .with_label(desc.label)
            .with_vertex_entry(desc.vertex_entry)
            .with_fragment_entry(desc.fragment_entry)
            .with_color_targets(desc.color_targets)
            .with_cull_mode(desc.cull_mode);
        for buffer in desc.vertex_buffers {
            builder = builder.with_vertex_buffer(buffer);
        }
        if let Some(depth) = desc.depth {
            builder = builder.with_depth_stencil(depth.format, depth.write, depth.compare);
        }
        let pipeline = builder.build();

        let uniforms = uniform_layout.map(|layout| {
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("{} Uniforms", desc.label)),
                size: block.size() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("{} Uniform Bind Group", desc.label)),
                layout: &layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                }],
            });
            UniformBinding {
                group: desc.bind_group_layouts.len() as u32,
                block,
                buffer,
                bind_group,
                dirty: AtomicBool::new(true),
            }
        });

        let errors = pop_error_scopes(device);
        if !errors.is_empty() {
            let message = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            let err = RenderError::Shader {
                label: desc.label.to_owned(),
                message,
            };
            log::error!("{}", err);
            return Err(err);
        }

        log::debug!("Built shader program '{}'", desc.label);
        Ok(Self {
            label: desc.label.to_owned(),
            pipeline,
            uniforms,
        })
    }

    /// Program writing mesh instances into the given color targets, with
    /// camera and material groups first.
    pub fn geometry(
        device: &wgpu::Device,
        label: &str,
        source: &str,
        color_targets: Vec<Option<wgpu::ColorTargetState>>,
        bind_group_layouts: &[&wgpu::BindGroupLayout],
    ) -> Result<Self, RenderError> {
        Self::new(
            device,
            ProgramDescriptor {
                vertex_buffers: vec![MeshVertex::layout(), InstanceRecord::layout()],
                color_targets,
                depth: Some(DepthMode::opaque()),
                bind_group_layouts,
                ..ProgramDescriptor::new(label, source)
            },
        )
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pipeline(&self) -> &wgpu::RenderPipeline {
        &self.pipeline
    }

    pub fn uniform_location(&self, name: &str) -> Option<usize> {
        self.uniforms.as_ref().and_then(|u| u.block.location(name))
    }

    pub fn uniforms(&self) -> Option<&UniformBlock> {
        self.uniforms.as_ref().map(|u| &u.block)
    }

    /// Returns false, with a warning, when the program has no such uniform.
    pub fn set_uniform(&mut self, name: &str, value: UniformValue) -> bool {
        let Some(uniforms) = self.uniforms.as_mut() else {
            log::warn!("Program '{}' has no uniform '{}'", self.label, name);
            return false;
        };
        let changed = uniforms.block.set(name, value);
        if changed {
            uniforms.dirty.store(true, Ordering::Relaxed);
        }
        changed
    }

    /// Sets the pipeline and the uniform group, uploading pending values.
    pub fn bind(&self, pass: &mut wgpu::RenderPass<'_>, queue: &wgpu::Queue) {
        pass.set_pipeline(&self.pipeline);
        if let Some(uniforms) = &self.uniforms {
            if uniforms.dirty.swap(false, Ordering::Relaxed) {
                queue.write_buffer(&uniforms.buffer, 0, uniforms.block.bytes());
            }
            pass.set_bind_group(uniforms.group, &uniforms.bind_group, &[]);
        }
    }
}
