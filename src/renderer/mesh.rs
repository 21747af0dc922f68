//! CPU mesh data, OBJ import and GPU-resident meshes.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bitflags::bitflags;
use glam::{Vec2, Vec3};
use wgpu::util::DeviceExt;

use crate::renderer::error::RenderError;
use crate::renderer::frame::GeometryPass;
use crate::renderer::tangents::{compute_normals, compute_tangents};
use crate::renderer::texture::GpuTexture;
use crate::renderer::vertex::MeshVertex;

bitflags! {
    /// Material texture maps to load alongside a mesh.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureMapType: u32 {
        const DIFFUSE = 1 << 0;
        const NORMAL = 1 << 1;
        const SPECULAR = 1 << 2;
        const SPECULAR_HIGHLIGHT = 1 << 3;
        const DISPLACEMENT = 1 << 4;
        const ALPHA = 1 << 5;
        const AMBIENT = 1 << 6;
        const ALL = Self::DIFFUSE.bits()
            | Self::NORMAL.bits()
            | Self::SPECULAR.bits()
            | Self::SPECULAR_HIGHLIGHT.bits()
            | Self::DISPLACEMENT.bits()
            | Self::ALPHA.bits()
            | Self::AMBIENT.bits();
    }
}

impl TextureMapType {
    /// Color maps are sampled through an sRGB view.
    fn is_color(self) -> bool {
        self.intersects(TextureMapType::DIFFUSE | TextureMapType::AMBIENT)
    }
}

/// One independently drawable part of a mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkData {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
    /// Index into the source file's material list.
    pub material_index: Option<usize>,
}

/// Where a chunk sits inside the combined buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub first_index: u32,
    pub index_count: u32,
    pub base_vertex: u32,
    pub vertex_count: u32,
    pub material_index: Option<usize>,
}

impl ChunkRange {
    pub fn indices(&self) -> Range<u32> {
        self.first_index..self.first_index + self.index_count
    }
}

/// CPU copy of a mesh: the chunks and their concatenation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    chunks: Vec<ChunkData>,
    ranges: Vec<ChunkRange>,
    vertices: Vec<MeshVertex>,
    indices: Vec<u32>,
}

impl MeshData {
    /// Derives tangents per chunk, then concatenates the chunks. Each chunk's
    /// indices are rebased by the number of vertices preceding it, so the
    /// combined index buffer addresses the combined vertex buffer directly.
    pub fn from_chunks(mut chunks: Vec<ChunkData>) -> Self {
        for chunk in &mut chunks {
            compute_tangents(&mut chunk.vertices, &chunk.indices);
        }

        let vertex_total = chunks.iter().map(|c| c.vertices.len()).sum();
        let index_total = chunks.iter().map(|c| c.indices.len()).sum();
        let mut vertices = Vec::with_capacity(vertex_total);
        let mut indices = Vec::with_capacity(index_total);
        let mut ranges = Vec::with_capacity(chunks.len());

        for chunk in &chunks {
            let base_vertex = vertices.len() as u32;
            ranges.push(ChunkRange {
                first_index: indices.len() as u32,
                index_count: chunk.indices.len() as u32,
                base_vertex,
                vertex_count: chunk.vertices.len() as u32,
                material_index: chunk.material_index,
            });
            vertices.extend_from_slice(&chunk.vertices);
            indices.extend(chunk.indices.iter().map(|i| i + base_vertex));
        }

        compute_tangents(&mut vertices, &indices);

        Self {
            chunks,
            ranges,
            vertices,
            indices,
        }
    }

    pub fn single(vertices: Vec<MeshVertex>, indices: Vec<u32>) -> Self {
        Self::from_chunks(vec![ChunkData {
            vertices,
            indices,
            material_index: None,
        }])
    }

    pub fn chunks(&self) -> &[ChunkData] {
        &self.chunks
    }

    pub fn ranges(&self) -> &[ChunkRange] {
        &self.ranges
    }

    pub fn vertices(&self) -> &[MeshVertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Texture file references of one OBJ material.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjMaterial {
    pub name: String,
    pub maps: Vec<(TextureMapType, PathBuf)>,
    pub diffuse: Option<[f32; 3]>,
    pub specular: Option<[f32; 3]>,
    pub shininess: Option<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct ObjDocument {
    pub data: MeshData,
    pub materials: Vec<ObjMaterial>,
}

/// Parses an OBJ file (triangulated, single index stream) into chunks,
/// one per object/group.
///
/// Texture v is flipped to `1 - v`. Missing normals are generated from the
/// faces. Material texture paths for the requested `maps` are resolved
/// relative to the OBJ's directory.
pub fn load_obj(path: &Path, maps: TextureMapType) -> Result<ObjDocument, RenderError> {
    let options = tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    };
    let (models, materials) = tobj::load_obj(path, &options)
        .map_err(|e| RenderError::Obj(format!("{:?}: {}", path, e)))?;

    let materials = materials.unwrap_or_else(|e| {
        log::warn!("No materials for {:?}: {}", path, e);
        Vec::new()
    });

    let chunks = models.iter().map(|model| chunk_from_obj(&model.mesh)).collect();
    let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
    let materials = materials
        .iter()
        .map(|m| material_from_obj(m, base_dir, maps))
        .collect();

    let data = MeshData::from_chunks(chunks);
    log::info!(
        "Parsed {:?}: {} chunks, {} vertices, {} indices",
        path,
        data.chunks().len(),
        data.vertex_count(),
        data.index_count()
    );
    Ok(ObjDocument { data, materials })
}

fn chunk_from_obj(mesh: &tobj::Mesh) -> ChunkData {
    let count = mesh.positions.len() / 3;
    let has_normals = mesh.normals.len() == count * 3 && count > 0;
    let has_uvs = mesh.texcoords.len() == count * 2 && count > 0;

    let mut vertices: Vec<MeshVertex> = (0..count)
        .map(|i| {
            let position = Vec3::from_slice(&mesh.positions[i * 3..i * 3 + 3]);
            let normal = if has_normals {
                Vec3::from_slice(&mesh.normals[i * 3..i * 3 + 3])
            } else {
                Vec3::ZERO
            };
            let uv = if has_uvs {
                Vec2::new(mesh.texcoords[i * 2], 1.0 - mesh.texcoords[i * 2 + 1])
            } else {
                Vec2::ZERO
            };
            MeshVertex::new(position, normal, uv)
        })
        .collect();

    if !has_normals {
        compute_normals(&mut vertices, &mesh.indices);
    }

    ChunkData {
        vertices,
        indices: mesh.indices.clone(),
        material_index: mesh.material_id,
    }
}

fn material_from_obj(material: &tobj::Material, base_dir: &Path, maps: TextureMapType) -> ObjMaterial {
    let candidates = [
        (TextureMapType::DIFFUSE, material.diffuse_texture.as_deref()),
        (TextureMapType::NORMAL, material.normal_texture.as_deref()),
        (TextureMapType::SPECULAR, material.specular_texture.as_deref()),
        (
            TextureMapType::SPECULAR_HIGHLIGHT,
            material.shininess_texture.as_deref(),
        ),
        (
            TextureMapType::DISPLACEMENT,
            material.unknown_param.get("disp").map(String::as_str),
        ),
        (TextureMapType::ALPHA, material.dissolve_texture.as_deref()),
        (TextureMapType::AMBIENT, material.ambient_texture.as_deref()),
    ];

    let maps = candidates
        .into_iter()
        .filter(|(kind, _)| maps.contains(*kind))
        .filter_map(|(kind, name)| {
            name.filter(|n| !n.is_empty())
                .map(|n| (kind, base_dir.join(n)))
        })
        .collect();

    ObjMaterial {
        name: material.name.clone(),
        maps,
        diffuse: material.diffuse,
        specular: material.specular,
        shininess: material.shininess,
    }
}

/// A texture map loaded for one source material.
#[derive(Debug, Clone)]
pub struct LoadedMap {
    pub material_index: usize,
    pub kind: TextureMapType,
    pub texture: Arc<GpuTexture>,
}

#[derive(Debug)]
struct GpuChunk {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    range: ChunkRange,
}

/// Mesh uploaded to the GPU: combined buffers for whole-mesh draws, one
/// buffer pair per chunk, and the CPU copy used for read-back.
#[derive(Debug)]
pub struct GpuMesh {
    label: String,
    path: Option<PathBuf>,
    data: MeshData,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    chunks: Vec<GpuChunk>,
    texture_maps: Vec<LoadedMap>,
}

impl GpuMesh {
    pub fn load(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        path: impl AsRef<Path>,
        maps: TextureMapType,
    ) -> Result<Self, RenderError> {
        let path = path.as_ref();
        let document = load_obj(path, maps).inspect_err(|err| log::error!("{}", err))?;

        let label = path.to_string_lossy();
        let mut mesh = Self::from_data(device, &label, document.data);
        mesh.path = Some(path.to_path_buf());
        mesh.texture_maps = load_maps(device, queue, &document.materials);
        Ok(mesh)
    }

    /// Replaces this mesh with the contents of `path`. On failure the current
    /// buffers stay in place.
    pub fn reload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        path: impl AsRef<Path>,
        maps: TextureMapType,
    ) -> Result<(), RenderError> {
        let fresh = Self::load(device, queue, path, maps)?;
        *self = fresh;
        Ok(())
    }

    pub fn from_data(device: &wgpu::Device, label: &str, data: MeshData) -> Self {
        let vertex_buffer = create_buffer(
            device,
            &format!("{label} Vertices"),
            bytemuck::cast_slice(data.vertices()),
            wgpu::BufferUsages::VERTEX,
        );
        let index_buffer = create_buffer(
            device,
            &format!("{label} Indices"),
            bytemuck::cast_slice(data.indices()),
            wgpu::BufferUsages::INDEX,
        );

        let chunks = data
            .chunks()
            .iter()
            .zip(data.ranges())
            .enumerate()
            .map(|(i, (chunk, range))| GpuChunk {
                vertex_buffer: create_buffer(
                    device,
                    &format!("{label} Chunk{i} Vertices"),
                    bytemuck::cast_slice(&chunk.vertices),
                    wgpu::BufferUsages::VERTEX,
                ),
                index_buffer: create_buffer(
                    device,
                    &format!("{label} Chunk{i} Indices"),
                    bytemuck::cast_slice(&chunk.indices),
                    wgpu::BufferUsages::INDEX,
                ),
                range: *range,
            })
            .collect();

        Self {
            label: label.to_owned(),
            path: None,
            data,
            vertex_buffer,
            index_buffer,
            chunks,
            texture_maps: Vec::new(),
        }
    }

    /// Binds the combined vertex buffer to slot 0 and the combined indices.
    pub fn bind(&self, pass: &mut wgpu::RenderPass<'_>) {
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
    }

    /// Draws one chunk from its own buffers. The instance buffer in slot 1
    /// must already be bound. Returns false for an unknown chunk.
    pub fn draw_chunk(&self, pass: &mut GeometryPass<'_>, chunk: usize, instances: Range<u32>) -> bool {
        let Some(gpu) = self.chunks.get(chunk) else {
            log::warn!("{}: no chunk {} (have {})", self.label, chunk, self.chunks.len());
            return false;
        };
        if gpu.range.index_count == 0 {
            return true;
        }
        let rp = pass.render_pass();
        rp.set_vertex_buffer(0, gpu.vertex_buffer.slice(..));
        rp.set_index_buffer(gpu.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..gpu.range.index_count, 0, instances);
        true
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// CPU copy of the uploaded data.
    pub fn data(&self) -> &MeshData {
        &self.data
    }

    pub fn vertex_count(&self) -> u32 {
        self.data.vertex_count() as u32
    }

    pub fn index_count(&self) -> u32 {
        self.data.index_count() as u32
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunks(&self) -> &[ChunkRange] {
        self.data.ranges()
    }

    pub fn texture_maps(&self) -> &[LoadedMap] {
        &self.texture_maps
    }

    /// Maps loaded for one source material.
    pub fn maps_for_material(&self, material_index: usize) -> impl Iterator<Item = &LoadedMap> {
        self.texture_maps
            .iter()
            .filter(move |m| m.material_index == material_index)
    }
}

fn load_maps(device: &wgpu::Device, queue: &wgpu::Queue, materials: &[ObjMaterial]) -> Vec<LoadedMap> {
    let mut loaded = Vec::new();
    for (material_index, material) in materials.iter().enumerate() {
        for (kind, path) in &material.maps {
            match GpuTexture::from_path(device, queue, path, kind.is_color()) {
                Ok(texture) => loaded.push(LoadedMap {
                    material_index,
                    kind: *kind,
                    texture: Arc::new(texture),
                }),
                Err(err) => log::warn!("Skipping {:?} map of '{}': {}", kind, material.name, err),
            }
        }
    }
    loaded
}

/// Zero-length contents still get a small buffer so bindings stay valid.
fn create_buffer(
    device: &wgpu::Device,
    label: &str,
    contents: &[u8],
    usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    if contents.is_empty() {
        return device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: std::mem::size_of::<MeshVertex>() as u64,
            usage,
            mapped_at_creation: false,
        });
    }
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::vertex::v;

    fn triangle(offset: f32) -> ChunkData {
        ChunkData {
            vertices: vec![
                v([offset, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
                v([offset + 1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0]),
                v([offset, 1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
            ],
            indices: vec![0, 1, 2],
            material_index: Some(offset as usize),
        }
    }

    #[test]
    fn combined_indices_are_rebased_per_chunk() {
        let data = MeshData::from_chunks(vec![triangle(0.0), triangle(1.0), triangle(2.0)]);
        assert_eq!(data.vertex_count(), 9);
        assert_eq!(data.indices(), &[0, 1, 2, 3, 4, 5, 6, 7, 8]);

        let ranges = data.ranges();
        assert_eq!(ranges[1].base_vertex, 3);
        assert_eq!(ranges[2].indices(), 6..9);
        assert_eq!(ranges[2].material_index, Some(2));
        assert_eq!(data.chunks()[2].indices, vec![0, 1, 2]);
    }

    #[test]
    fn chunk_and_combined_tangents_agree() {
        let data = MeshData::from_chunks(vec![triangle(0.0), triangle(4.0)]);
        for (chunk, range) in data.chunks().iter().zip(data.ranges()) {
            for (i, vertex) in chunk.vertices.iter().enumerate() {
                let combined = &data.vertices()[range.base_vertex as usize + i];
                assert_eq!(vertex.tangent, combined.tangent);
            }
        }
    }

    #[test]
    fn map_flags_cover_every_kind() {
        assert_eq!(TextureMapType::ALL.iter().count(), 7);
        assert!(TextureMapType::DIFFUSE.is_color());
        assert!(!TextureMapType::NORMAL.is_color());
    }
}
