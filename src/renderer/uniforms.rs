// renderer/uniforms.rs
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// View/projection block bound at group 0 of every scene pass.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct CameraUniform {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub view_pos: [f32; 3],
    pub _padding: f32,
}

impl CameraUniform {
    pub fn new(view: Mat4, proj: Mat4, view_pos: Vec3) -> Self {
        Self {
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            view_pos: view_pos.to_array(),
            _padding: 0.0,
        }
    }
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY, Vec3::ZERO)
    }
}

/// Per-pass parameters of the post-process chain.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct PostParams {
    /// Blur axis: (1, 0) horizontal, (0, 1) vertical.
    pub direction: [f32; 2],
    pub power: f32,
    pub exposure: f32,
    pub threshold: f32,
    pub _padding: [f32; 3],
}

impl PostParams {
    pub fn blur(horizontal: bool, power: f32) -> Self {
        Self {
            direction: if horizontal { [1.0, 0.0] } else { [0.0, 1.0] },
            power,
            ..Self::zeroed()
        }
    }
}
