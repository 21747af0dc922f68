use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};
use std::mem;

/// Interleaved mesh vertex: position, normal, tangent (w = handedness), uv.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, Default, PartialEq)]
pub struct MeshVertex {
    pub position: [f32; 4],
    pub normal: [f32; 4],
    pub tangent: [f32; 4],
    pub uv: [f32; 2],
}

impl MeshVertex {
    pub const ATTRS: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        0 => Float32x4,
        1 => Float32x4,
        2 => Float32x4,
        3 => Float32x2
    ];

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }

    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position: position.extend(1.0).to_array(),
            normal: normal.extend(0.0).to_array(),
            tangent: [0.0; 4],
            uv: uv.to_array(),
        }
    }

    pub fn position3(&self) -> Vec3 {
        Vec4::from_array(self.position).truncate()
    }

    pub fn normal3(&self) -> Vec3 {
        Vec4::from_array(self.normal).truncate()
    }

    pub fn tangent4(&self) -> Vec4 {
        Vec4::from_array(self.tangent)
    }

    pub fn uv2(&self) -> Vec2 {
        Vec2::from_array(self.uv)
    }
}

#[inline]
pub fn v(pos: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> MeshVertex {
    MeshVertex::new(Vec3::from(pos), Vec3::from(normal), Vec2::from(uv))
}
