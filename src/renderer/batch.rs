// renderer/batch.rs
//! Instanced draws of one mesh with per-instance model matrices and colors.

use std::mem;
use std::ops::Range;
use std::sync::Arc;

use glam::{Mat4, Vec4};

use crate::renderer::error::RenderError;
use crate::renderer::frame::GeometryPass;
use crate::renderer::instance::{
    CapacityPolicy, InstanceRecord, InstanceSink, InstanceStore, NormalMatrixMode,
};
use crate::renderer::material::{DependentId, MaterialHandle, MaterialLibrary};
use crate::renderer::mesh::GpuMesh;
use crate::renderer::primitives;

const RECORD_SIZE: u64 = mem::size_of::<InstanceRecord>() as u64;

/// GPU side of a batch. Ranges handed out within one frame never overlap,
/// so every flush of the frame keeps its own data.
struct InstanceBuffer {
    buffer: wgpu::Buffer,
    capacity: usize,
    cursor: usize,
    frame: u64,
}

impl InstanceBuffer {
    fn new(device: &wgpu::Device, label: &str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Self::create(device, label, capacity),
            capacity,
            cursor: 0,
            frame: u64::MAX,
        }
    }

    fn create(device: &wgpu::Device, label: &str, capacity: usize) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: capacity as u64 * RECORD_SIZE,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Re-creates the buffer to hold at least `capacity` records. Draws
    /// already recorded keep the previous buffer alive.
    fn ensure_capacity(&mut self, device: &wgpu::Device, label: &str, capacity: usize) -> bool {
        if capacity <= self.capacity {
            return false;
        }
        log::info!(
            "Growing instance buffer: {} -> {}",
            self.capacity,
            capacity
        );
        self.buffer = Self::create(device, label, capacity);
        self.capacity = capacity;
        self.cursor = 0;
        true
    }

    /// Reserves `count` records for `frame`, growing the buffer when needed.
    /// Draws already recorded keep the previous buffer alive.
    fn reserve(&mut self, device: &wgpu::Device, label: &str, frame: u64, count: usize) -> Range<usize> {
        if frame != self.frame {
            self.frame = frame;
            self.cursor = 0;
        }

        let required = self.cursor + count;
        if required > self.capacity {
            let new_capacity = required.max(self.capacity * 2);
            self.ensure_capacity(device, label, new_capacity);
        }

        let start = self.cursor;
        self.cursor += count;
        start..self.cursor
    }
}

struct PassSink<'p, 'a> {
    pass: &'p mut GeometryPass<'a>,
    gpu: &'p mut InstanceBuffer,
    mesh: &'p GpuMesh,
    label: &'p str,
}

impl InstanceSink for PassSink<'_, '_> {
    fn submit(&mut self, records: &[InstanceRecord]) -> Result<(), RenderError> {
        let index_count = self.mesh.index_count();
        if records.is_empty() || index_count == 0 {
            return Ok(());
        }

        let range = self.gpu.reserve(
            self.pass.device(),
            self.label,
            self.pass.frame_index(),
            records.len(),
        );
        let start = range.start as u64 * RECORD_SIZE;
        let end = range.end as u64 * RECORD_SIZE;
        self.pass
            .queue()
            .write_buffer(&self.gpu.buffer, start, bytemuck::cast_slice(records));

        let rp = self.pass.render_pass();
        self.mesh.bind(rp);
        rp.set_vertex_buffer(1, self.gpu.buffer.slice(start..end));
        self.pass
            .draw_indexed(0..index_count, 0, 0..records.len() as u32);
        Ok(())
    }
}

/// Instances of one mesh drawn with one material.
///
/// `Growable` batches keep their instances across frames and draw them all
/// with [`InstanceBatch::draw`]. `Bounded` batches are filled with
/// [`InstanceBatch::push`] each frame and flush automatically when full.
pub struct InstanceBatch {
    id: DependentId,
    label: String,
    store: InstanceStore,
    mesh: Arc<GpuMesh>,
    material: Option<MaterialHandle>,
    gpu: InstanceBuffer,
}

impl InstanceBatch {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        mesh: Arc<GpuMesh>,
        policy: CapacityPolicy,
        capacity: usize,
    ) -> Self {
        let store = InstanceStore::new(policy, capacity);
        let gpu = InstanceBuffer::new(device, &format!("{label} Instances"), store.capacity());
        Self {
            id: DependentId::next(),
            label: label.to_owned(),
            store,
            mesh,
            material: None,
            gpu,
        }
    }

    pub fn growable(device: &wgpu::Device, label: &str, mesh: Arc<GpuMesh>, capacity: usize) -> Self {
        Self::new(device, label, mesh, CapacityPolicy::Growable { limit: None }, capacity)
    }

    pub fn bounded(device: &wgpu::Device, label: &str, mesh: Arc<GpuMesh>, max: usize) -> Self {
        Self::new(device, label, mesh, CapacityPolicy::Bounded { max }, max)
    }

    /// One object drawn with one instance record. Move it with
    /// [`InstanceBatch::update_instance`]; further adds are rejected.
    pub fn single(
        device: &wgpu::Device,
        label: &str,
        mesh: Arc<GpuMesh>,
        model: Mat4,
        color: Vec4,
    ) -> Result<Self, RenderError> {
        let mut batch = Self::new(device, label, mesh, CapacityPolicy::Growable { limit: Some(1) }, 1);
        batch.add_instance_with(model, color)?;
        Ok(batch)
    }

    /// Batch over the built-in unit cube.
    pub fn cube(device: &wgpu::Device, policy: CapacityPolicy, capacity: usize) -> Self {
        let mesh = Arc::new(GpuMesh::from_data(device, "Cube", primitives::cube()));
        Self::new(device, "Cube Batch", mesh, policy, capacity)
    }

    pub fn with_normal_mode(mut self, mode: NormalMatrixMode) -> Self {
        self.store = self.store.with_normal_mode(mode);
        self
    }

    pub fn id(&self) -> DependentId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn mesh(&self) -> &Arc<GpuMesh> {
        &self.mesh
    }

    pub fn store(&self) -> &InstanceStore {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    pub fn add_instance(&mut self) -> Result<usize, RenderError> {
        self.store.add_instance()
    }

    pub fn add_instance_with(&mut self, model: Mat4, color: Vec4) -> Result<usize, RenderError> {
        self.store.add_instance_with(model, color)
    }

    pub fn update_instance(&mut self, index: usize, model: Mat4) -> Result<(), RenderError> {
        self.store.update_instance(index, model)
    }

    pub fn update_instance_with_color(
        &mut self,
        index: usize,
        model: Mat4,
        color: Vec4,
    ) -> Result<(), RenderError> {
        self.store.update_instance_with_color(index, model, color)
    }

    pub fn remove_instance(&mut self, index: usize) -> Result<InstanceRecord, RenderError> {
        self.store.remove_instance(index)
    }

    pub fn clear(&mut self) {
        self.store.clear();
    }

    /// Draws every live instance in one instanced call; instances stay.
    pub fn draw(&mut self, pass: &mut GeometryPass<'_>) -> Result<usize, RenderError> {
        self.sync_capacity(pass.device());
        let mut sink = PassSink {
            pass,
            gpu: &mut self.gpu,
            mesh: &self.mesh,
            label: &self.label,
        };
        self.store.draw(&mut sink)
    }

    /// Draws every live instance and resets the count.
    pub fn flush(&mut self, pass: &mut GeometryPass<'_>) -> Result<usize, RenderError> {
        self.sync_capacity(pass.device());
        let mut sink = PassSink {
            pass,
            gpu: &mut self.gpu,
            mesh: &self.mesh,
            label: &self.label,
        };
        self.store.flush(&mut sink)
    }

    /// Adds an instance, flushing first when a bounded batch is full.
    pub fn push(
        &mut self,
        pass: &mut GeometryPass<'_>,
        model: Mat4,
        color: Vec4,
    ) -> Result<usize, RenderError> {
        self.sync_capacity(pass.device());
        let mut sink = PassSink {
            pass,
            gpu: &mut self.gpu,
            mesh: &self.mesh,
            label: &self.label,
        };
        self.store.push(model, color, &mut sink)
    }

    /// Matches the GPU buffer to the store after the store grew.
    fn sync_capacity(&mut self, device: &wgpu::Device) {
        if self.store.take_growth() {
            self.gpu
                .ensure_capacity(device, &self.label, self.store.capacity());
        }
    }

    /// Records the GPU buffer currently holds.
    pub fn gpu_capacity(&self) -> usize {
        self.gpu.capacity
    }

    pub fn material(&self) -> Option<MaterialHandle> {
        self.material
    }

    /// Moves this batch's registration to `material`.
    pub fn set_material(
        &mut self,
        library: &mut MaterialLibrary,
        material: Option<MaterialHandle>,
    ) -> Result<(), RenderError> {
        if let Some(handle) = material {
            library.attach(handle, self.id)?;
        }
        if let Some(old) = self.material {
            if Some(old) != material {
                library.detach(old, self.id);
            }
        }
        self.material = material;
        Ok(())
    }

    /// Drops the material handle when the material has been removed.
    pub fn sync_material(&mut self, library: &MaterialLibrary) -> bool {
        match self.material {
            Some(handle) if !library.contains(handle) => {
                log::debug!("{}: material removed", self.label);
                self.material = None;
                true
            }
            _ => false,
        }
    }
}
