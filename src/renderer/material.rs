//! Surface materials: a shared program, shared texture maps and a small
//! uniform block, plus the library that owns them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Vec4;

use crate::renderer::arena::{Handle, SlotArena};
use crate::renderer::batch::InstanceBatch;
use crate::renderer::error::RenderError;
use crate::renderer::frame::GeometryPass;
use crate::renderer::program::ShaderProgram;
use crate::renderer::static_mesh::StaticMeshAggregator;
use crate::renderer::texture::GpuTexture;

pub const MAX_MATERIAL_MAPS: usize = 16;

const UNIFORM_BINDING: u32 = 0;
const FIRST_MAP_BINDING: u32 = 1;
const SAMPLER_BINDING: u32 = FIRST_MAP_BINDING + MAX_MATERIAL_MAPS as u32;

pub type MaterialHandle = Handle<Material>;

/// Identity of a renderer that draws with a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependentId(u64);

impl DependentId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        DependentId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct MaterialUniform {
    pub ambient: [f32; 4],
    pub diffuse: [f32; 4],
    pub specular: [f32; 4],
    pub emissive: [f32; 4],
    pub shininess: f32,
    pub alpha: f32,
    pub map_count: u32,
    pub _pad: u32,
}

/// Bind group layout shared by every material: the uniform block, sixteen
/// map slots and one filtering sampler.
pub struct MaterialLayout {
    layout: wgpu::BindGroupLayout,
    fallback: GpuTexture,
}

impl MaterialLayout {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let mut entries = Vec::with_capacity(MAX_MATERIAL_MAPS + 2);
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: UNIFORM_BINDING,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<MaterialUniform>() as u64),
            },
            count: None,
        });
        entries.extend((0..MAX_MATERIAL_MAPS as u32).map(|i| wgpu::BindGroupLayoutEntry {
            binding: FIRST_MAP_BINDING + i,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        }));
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: SAMPLER_BINDING,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("MaterialLayout"),
            entries: &entries,
        });

        Self {
            layout,
            fallback: GpuTexture::white(device, queue),
        }
    }

    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    pub fn fallback(&self) -> &GpuTexture {
        &self.fallback
    }
}

struct MaterialGpu {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

pub struct Material {
    label: String,
    program: Arc<ShaderProgram>,
    maps: Vec<Arc<GpuTexture>>,
    ambient: Vec4,
    diffuse: Vec4,
    specular: Vec4,
    emissive: Vec4,
    shininess: f32,
    alpha: f32,
    dependents: Vec<DependentId>,
    gpu: Option<MaterialGpu>,
    maps_dirty: bool,
}

impl Material {
    pub fn new(label: &str, program: Arc<ShaderProgram>) -> Self {
        Self {
            label: label.to_owned(),
            program,
            maps: Vec::new(),
            ambient: Vec4::new(0.1, 0.1, 0.1, 1.0),
            diffuse: Vec4::ONE,
            specular: Vec4::ONE,
            emissive: Vec4::new(0.0, 0.0, 0.0, 1.0),
            shininess: 32.0,
            alpha: 1.0,
            dependents: Vec::new(),
            gpu: None,
            maps_dirty: true,
        }
    }

    /// Appends a map and returns its slot. Fails once sixteen maps are held.
    pub fn add_map(&mut self, texture: Arc<GpuTexture>) -> Result<usize, RenderError> {
        if self.maps.len() >= MAX_MATERIAL_MAPS {
            let err = RenderError::MapLimit {
                limit: MAX_MATERIAL_MAPS,
            };
            log::warn!("{}: {}", self.label, err);
            return Err(err);
        }
        self.maps.push(texture);
        self.maps_dirty = true;
        Ok(self.maps.len() - 1)
    }

    /// Removes the map in `index`; later maps move down one slot.
    pub fn remove_map(&mut self, index: usize) -> Option<Arc<GpuTexture>> {
        if index >= self.maps.len() {
            return None;
        }
        self.maps_dirty = true;
        Some(self.maps.remove(index))
    }

    /// Removes every slot referring to `texture`. Returns how many were removed.
    pub fn remove_map_texture(&mut self, texture: &Arc<GpuTexture>) -> usize {
        let before = self.maps.len();
        self.maps.retain(|m| !Arc::ptr_eq(m, texture));
        let removed = before - self.maps.len();
        if removed > 0 {
            self.maps_dirty = true;
        }
        removed
    }

    pub fn maps(&self) -> &[Arc<GpuTexture>] {
        &self.maps
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn program(&self) -> &Arc<ShaderProgram> {
        &self.program
    }

    /// Mutable program access while this material is its only owner.
    pub fn program_mut(&mut self) -> Option<&mut ShaderProgram> {
        Arc::get_mut(&mut self.program)
    }

    pub fn set_program(&mut self, program: Arc<ShaderProgram>) {
        self.program = program;
    }

    pub fn set_ambient(&mut self, color: Vec4) {
        self.ambient = color;
    }

    pub fn set_diffuse(&mut self, color: Vec4) {
        self.diffuse = color;
    }

    pub fn set_specular(&mut self, color: Vec4) {
        self.specular = color;
    }

    pub fn set_emissive(&mut self, color: Vec4) {
        self.emissive = color;
    }

    pub fn set_shininess(&mut self, shininess: f32) {
        self.shininess = shininess;
    }

    pub fn set_alpha(&mut self, alpha: f32) {
        self.alpha = alpha;
    }

    pub fn ambient(&self) -> Vec4 {
        self.ambient
    }

    pub fn diffuse(&self) -> Vec4 {
        self.diffuse
    }

    pub fn specular(&self) -> Vec4 {
        self.specular
    }

    pub fn emissive(&self) -> Vec4 {
        self.emissive
    }

    pub fn shininess(&self) -> f32 {
        self.shininess
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn dependents(&self) -> &[DependentId] {
        &self.dependents
    }

    pub fn uniform(&self) -> MaterialUniform {
        MaterialUniform {
            ambient: self.ambient.to_array(),
            diffuse: self.diffuse.to_array(),
            specular: self.specular.to_array(),
            emissive: self.emissive.to_array(),
            shininess: self.shininess,
            alpha: self.alpha,
            map_count: self.maps.len() as u32,
            _pad: 0,
        }
    }

    /// Binds the program and the material group (group 1) and uploads the
    /// material block. Empty map slots sample the white fallback.
    pub fn bind(&mut self, pass: &mut GeometryPass<'_>) {
        let device = pass.device();
        let layout = pass.material_layout();

        if self.gpu.is_none() || self.maps_dirty {
            let buffer = match self.gpu.take() {
                Some(gpu) => gpu.buffer,
                None => device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("{} Uniforms", self.label)),
                    size: std::mem::size_of::<MaterialUniform>() as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                }),
            };
            let bind_group = self.create_bind_group(device, layout, &buffer);
            self.gpu = Some(MaterialGpu { buffer, bind_group });
            self.maps_dirty = false;
        }

        let Some(gpu) = &self.gpu else {
            return;
        };
        let queue = pass.queue();
        queue.write_buffer(&gpu.buffer, 0, bytemuck::bytes_of(&self.uniform()));
        self.program.bind(pass.render_pass(), queue);
        pass.render_pass().set_bind_group(1, &gpu.bind_group, &[]);
    }

    fn create_bind_group(
        &self,
        device: &wgpu::Device,
        layout: &MaterialLayout,
        buffer: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        let fallback = layout.fallback();
        let mut entries = Vec::with_capacity(MAX_MATERIAL_MAPS + 2);
        entries.push(wgpu::BindGroupEntry {
            binding: UNIFORM_BINDING,
            resource: buffer.as_entire_binding(),
        });
        for slot in 0..MAX_MATERIAL_MAPS {
            let view = self.maps.get(slot).map_or(fallback.view(), |m| m.view());
            entries.push(wgpu::BindGroupEntry {
                binding: FIRST_MAP_BINDING + slot as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        let sampler = self.maps.first().map_or(fallback.sampler(), |m| m.sampler());
        entries.push(wgpu::BindGroupEntry {
            binding: SAMPLER_BINDING,
            resource: wgpu::BindingResource::Sampler(sampler),
        });

        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} Bind Group", self.label)),
            layout: layout.layout(),
            entries: &entries,
        })
    }
}

/// Owner of every material. Renderers refer to materials by handle; a
/// removed material's handle stops resolving.
#[derive(Default)]
pub struct MaterialLibrary {
    materials: SlotArena<Material>,
}

impl MaterialLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, material: Material) -> MaterialHandle {
        self.materials.insert(material)
    }

    pub fn get(&self, handle: MaterialHandle) -> Option<&Material> {
        self.materials.get(handle)
    }

    pub fn get_mut(&mut self, handle: MaterialHandle) -> Option<&mut Material> {
        self.materials.get_mut(handle)
    }

    pub fn contains(&self, handle: MaterialHandle) -> bool {
        self.materials.contains(handle)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn remove(&mut self, handle: MaterialHandle) -> Option<Material> {
        let material = self.materials.remove(handle)?;
        if !material.dependents.is_empty() {
            log::info!(
                "Removed material '{}' with {} dependents",
                material.label,
                material.dependents.len()
            );
        }
        Some(material)
    }

    /// Registers `id` as drawing with `handle`. Registering twice is a no-op.
    pub fn attach(&mut self, handle: MaterialHandle, id: DependentId) -> Result<(), RenderError> {
        let material = self
            .materials
            .get_mut(handle)
            .ok_or(RenderError::StaleHandle("material"))?;
        if !material.dependents.contains(&id) {
            material.dependents.push(id);
        }
        Ok(())
    }

    pub fn detach(&mut self, handle: MaterialHandle, id: DependentId) {
        if let Some(material) = self.materials.get_mut(handle) {
            material.dependents.retain(|d| *d != id);
        }
    }

    /// Binds the material once, then draws every batch that uses it.
    /// Returns the number of batches drawn.
    pub fn draw_meshes<'b, I>(
        &mut self,
        handle: MaterialHandle,
        pass: &mut GeometryPass<'_>,
        batches: I,
    ) -> Result<usize, RenderError>
    where
        I: IntoIterator<Item = &'b mut InstanceBatch>,
    {
        let material = self
            .materials
            .get_mut(handle)
            .ok_or(RenderError::StaleHandle("material"))?;
        material.bind(pass);

        let mut drawn = 0;
        for batch in batches {
            if batch.material() == Some(handle) {
                batch.draw(pass)?;
                drawn += 1;
            }
        }
        Ok(drawn)
    }

    /// Static counterpart of [`MaterialLibrary::draw_meshes`].
    pub fn draw_static_meshes<'b, I>(
        &mut self,
        handle: MaterialHandle,
        pass: &mut GeometryPass<'_>,
        aggregators: I,
    ) -> Result<usize, RenderError>
    where
        I: IntoIterator<Item = &'b StaticMeshAggregator>,
    {
        let material = self
            .materials
            .get_mut(handle)
            .ok_or(RenderError::StaleHandle("material"))?;
        material.bind(pass);

        let mut drawn = 0;
        for aggregator in aggregators {
            if aggregator.material() == Some(handle) {
                aggregator.draw(pass)?;
                drawn += 1;
            }
        }
        Ok(drawn)
    }
}
