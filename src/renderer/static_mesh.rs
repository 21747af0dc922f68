//! Pre-transformed static geometry merged into one vertex/index buffer pair
//! and drawn with a single call.

use glam::{Mat3, Mat4, Vec4};
use rayon::prelude::*;
use wgpu::util::DeviceExt;

use crate::renderer::error::RenderError;
use crate::renderer::frame::GeometryPass;
use crate::renderer::instance::InstanceRecord;
use crate::renderer::material::{DependentId, MaterialHandle, MaterialLibrary};
use crate::renderer::mesh::{GpuMesh, MeshData};
use crate::renderer::vertex::MeshVertex;

const INITIAL_STAGING: usize = 1024;

/// CPU staging for aggregated geometry. Capacity doubles on demand and
/// never shrinks.
#[derive(Debug, Clone)]
pub struct StaticStaging {
    vertices: Vec<MeshVertex>,
    indices: Vec<u32>,
    vertex_capacity: usize,
    index_capacity: usize,
}

impl Default for StaticStaging {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticStaging {
    pub fn new() -> Self {
        Self {
            vertices: Vec::with_capacity(INITIAL_STAGING),
            indices: Vec::with_capacity(INITIAL_STAGING),
            vertex_capacity: INITIAL_STAGING,
            index_capacity: INITIAL_STAGING,
        }
    }

    /// Appends `mesh` transformed by `model`: positions by the full matrix,
    /// normal and tangent xyz by its upper-left 3x3. Tangent w is kept.
    pub fn push(&mut self, mesh: &MeshData, model: Mat4) {
        let base = self.vertices.len() as u32;
        self.vertex_capacity = grown(self.vertex_capacity, self.vertices.len() + mesh.vertex_count());
        self.index_capacity = grown(self.index_capacity, self.indices.len() + mesh.index_count());
        self.vertices.reserve(self.vertex_capacity - self.vertices.len());
        self.indices.reserve(self.index_capacity - self.indices.len());

        let linear = Mat3::from_mat4(model);
        let transformed: Vec<MeshVertex> = mesh
            .vertices()
            .par_iter()
            .map(|vertex| transform_vertex(vertex, model, linear))
            .collect();
        self.vertices.extend(transformed);
        self.indices.extend(mesh.indices().iter().map(|i| i + base));
    }

    pub fn vertices(&self) -> &[MeshVertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn vertex_capacity(&self) -> usize {
        self.vertex_capacity
    }

    pub fn index_capacity(&self) -> usize {
        self.index_capacity
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

fn grown(capacity: usize, required: usize) -> usize {
    if required <= capacity {
        return capacity;
    }
    let new_capacity = required.max(capacity * 2);
    log::debug!("Growing static staging: {} -> {}", capacity, new_capacity);
    new_capacity
}

fn transform_vertex(vertex: &MeshVertex, model: Mat4, linear: Mat3) -> MeshVertex {
    let position = model * Vec4::from_array(vertex.position);
    let normal = linear * vertex.normal3();
    let tangent = vertex.tangent4();
    let tangent_xyz = linear * tangent.truncate();
    MeshVertex {
        position: position.to_array(),
        normal: normal.extend(vertex.normal[3]).to_array(),
        tangent: tangent_xyz.extend(tangent.w).to_array(),
        uv: vertex.uv,
    }
}

struct StaticBuffers {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    instance_buffer: wgpu::Buffer,
    index_count: u32,
}

/// Static geometry collected with [`push_mesh`](Self::push_mesh) and uploaded
/// once by [`finalize`](Self::finalize).
pub struct StaticMeshAggregator {
    id: DependentId,
    label: String,
    staging: StaticStaging,
    buffers: Option<StaticBuffers>,
    stale: bool,
    material: Option<MaterialHandle>,
}

impl StaticMeshAggregator {
    pub fn new(label: &str) -> Self {
        Self {
            id: DependentId::next(),
            label: label.to_owned(),
            staging: StaticStaging::new(),
            buffers: None,
            stale: false,
            material: None,
        }
    }

    /// Appends a copy of the mesh's CPU data transformed by `model`.
    pub fn push_mesh(&mut self, mesh: &GpuMesh, model: Mat4) {
        self.push_data(mesh.data(), model);
    }

    pub fn push_data(&mut self, data: &MeshData, model: Mat4) {
        self.staging.push(data, model);
        self.stale = true;
    }

    /// Uploads the staged geometry and the identity instance.
    pub fn finalize(&mut self, device: &wgpu::Device) {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Vertices", self.label)),
            contents: bytes_or_zero(bytemuck::cast_slice(self.staging.vertices())),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Indices", self.label)),
            contents: bytes_or_zero(bytemuck::cast_slice(self.staging.indices())),
            usage: wgpu::BufferUsages::INDEX,
        });
        let identity = InstanceRecord::new(Mat4::IDENTITY, Vec4::ONE);
        let instance_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Instance", self.label)),
            contents: bytemuck::bytes_of(&identity),
            usage: wgpu::BufferUsages::VERTEX,
        });

        log::info!(
            "{}: uploaded {} vertices, {} indices",
            self.label,
            self.staging.vertices().len(),
            self.staging.indices().len()
        );
        self.buffers = Some(StaticBuffers {
            vertex_buffer,
            index_buffer,
            instance_buffer,
            index_count: self.staging.indices().len() as u32,
        });
        self.stale = false;
    }

    /// One indexed draw over everything finalized.
    pub fn draw(&self, pass: &mut GeometryPass<'_>) -> Result<(), RenderError> {
        let buffers = match &self.buffers {
            Some(buffers) if !self.stale => buffers,
            _ => return Err(RenderError::StaticBuffersStale),
        };
        if buffers.index_count == 0 {
            return Ok(());
        }
        let rp = pass.render_pass();
        rp.set_vertex_buffer(0, buffers.vertex_buffer.slice(..));
        rp.set_vertex_buffer(1, buffers.instance_buffer.slice(..));
        rp.set_index_buffer(buffers.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..buffers.index_count, 0, 0..1);
        Ok(())
    }

    pub fn staging(&self) -> &StaticStaging {
        &self.staging
    }

    pub fn is_finalized(&self) -> bool {
        self.buffers.is_some() && !self.stale
    }

    pub fn id(&self) -> DependentId {
        self.id
    }

    pub fn material(&self) -> Option<MaterialHandle> {
        self.material
    }

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

    pub fn sync_material(&mut self, library: &MaterialLibrary) -> bool {
        match self.material {
            Some(handle) if !library.contains(handle) => {
                self.material = None;
                true
            }
            _ => false,
        }
    }
}

fn bytes_or_zero(bytes: &[u8]) -> &[u8] {
    const ZERO: [u8; 4] = [0; 4];
    if bytes.is_empty() {
        &ZERO
    } else {
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::vertex::v;
    use glam::Vec3;

    fn two_triangles() -> MeshData {
        MeshData::single(
            vec![
                v([0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0]),
                v([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0]),
                v([1.0, 0.0, 1.0], [0.0, 1.0, 0.0], [1.0, 1.0]),
                v([0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [0.0, 1.0]),
            ],
            vec![0, 2, 1, 0, 3, 2],
        )
    }

    #[test]
    fn second_push_offsets_indices_and_positions() {
        let mesh = two_triangles();
        let mut staging = StaticStaging::new();
        staging.push(&mesh, Mat4::IDENTITY);
        staging.push(&mesh, Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0)));

        assert_eq!(staging.vertices().len(), 8);
        assert_eq!(staging.indices().len(), 12);
        assert_eq!(&staging.indices()[6..], &[4, 6, 5, 4, 7, 6]);
        for i in 0..4 {
            let a = staging.vertices()[i].position3();
            let b = staging.vertices()[i + 4].position3();
            assert_eq!(b - a, Vec3::new(5.0, 0.0, 0.0));
        }
    }

    #[test]
    fn normals_use_upper_left_and_keep_handedness() {
        let mesh = two_triangles();
        let mut staging = StaticStaging::new();
        let model = Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2);
        staging.push(&mesh, model);

        for (src, dst) in mesh.vertices().iter().zip(staging.vertices()) {
            let expected = Mat3::from_mat4(model) * src.normal3();
            assert!((dst.normal3() - expected).length() < 1e-6);
            assert_eq!(dst.tangent[3], src.tangent[3]);
            assert_eq!(dst.position[3], 1.0);
        }
    }

    #[test]
    fn staging_capacity_doubles_and_never_shrinks() {
        let mesh = two_triangles();
        let mut staging = StaticStaging::new();
        for _ in 0..300 {
            staging.push(&mesh, Mat4::IDENTITY);
        }
        assert_eq!(staging.vertices().len(), 1200);
        assert_eq!(staging.vertex_capacity(), 2048);
        assert_eq!(staging.index_capacity(), 2048);
    }

    #[test]
    fn unfinalized_aggregator_reports_stale() {
        let mut aggregator = StaticMeshAggregator::new("Floor");
        assert!(!aggregator.is_finalized());
        aggregator.push_data(&two_triangles(), Mat4::IDENTITY);
        assert!(!aggregator.is_finalized());
        assert_eq!(aggregator.staging().indices().len(), 6);
    }
}
