//! Point lights drawn as instanced light volumes.

use std::mem;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::renderer::arena::{Handle, SlotArena};
use crate::renderer::error::RenderError;

pub const MAX_POINT_LIGHTS: usize = 512;

/// Instance record of one light volume: rgb color with the radius in w,
/// and the volume's model matrix.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct PointLightRecord {
    pub color: [f32; 4],
    pub model: [[f32; 4]; 4],
}

impl PointLightRecord {
    pub const ATTRS: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
        4 => Float32x4,
        5 => Float32x4,
        6 => Float32x4,
        7 => Float32x4,
        8 => Float32x4
    ];

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<PointLightRecord>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::ATTRS,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLight {
    pub color: Vec3,
    pub position: Vec3,
    pub radius: f32,
}

impl PointLight {
    pub fn new(color: Vec3, position: Vec3, radius: f32) -> Self {
        Self {
            color,
            position,
            radius,
        }
    }

    pub fn model(&self) -> Mat4 {
        Mat4::from_translation(self.position) * Mat4::from_scale(Vec3::splat(self.radius))
    }

    pub fn record(&self) -> PointLightRecord {
        PointLightRecord {
            color: self.color.extend(self.radius).to_array(),
            model: self.model().to_cols_array_2d(),
        }
    }
}

pub type LightHandle = Handle<PointLight>;

/// Fixed-capacity light set. Handles stay valid until their own light is
/// removed; the packed upload order is dense and follows slot order.
pub struct PointLightArena {
    lights: SlotArena<PointLight>,
    capacity: usize,
}

impl PointLightArena {
    pub fn new(capacity: usize) -> Self {
        Self {
            lights: SlotArena::with_capacity(capacity),
            capacity,
        }
    }

    pub fn add(&mut self, light: PointLight) -> Result<LightHandle, RenderError> {
        if self.lights.len() >= self.capacity {
            return Err(RenderError::CapacityExceeded {
                what: "point lights",
                limit: self.capacity,
            });
        }
        Ok(self.lights.insert(light))
    }

    /// Moves a light; `radius` replaces the current radius when given.
    pub fn transform(
        &mut self,
        handle: LightHandle,
        position: Vec3,
        radius: Option<f32>,
    ) -> Result<(), RenderError> {
        let light = self
            .lights
            .get_mut(handle)
            .ok_or(RenderError::StaleHandle("point light"))?;
        light.position = position;
        if let Some(radius) = radius {
            light.radius = radius;
        }
        Ok(())
    }

    pub fn set_color(&mut self, handle: LightHandle, color: Vec3) -> Result<(), RenderError> {
        let light = self
            .lights
            .get_mut(handle)
            .ok_or(RenderError::StaleHandle("point light"))?;
        light.color = color;
        Ok(())
    }

    pub fn remove(&mut self, handle: LightHandle) -> Result<PointLight, RenderError> {
        self.lights
            .remove(handle)
            .ok_or(RenderError::StaleHandle("point light"))
    }

    pub fn get(&self, handle: LightHandle) -> Option<&PointLight> {
        self.lights.get(handle)
    }

    /// Position of the light in the packed record list.
    pub fn packed_index(&self, handle: LightHandle) -> Option<usize> {
        self.lights.dense_index(handle)
    }

    pub fn records(&self) -> Vec<PointLightRecord> {
        self.lights.values().map(PointLight::record).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LightHandle, &PointLight)> {
        self.lights.iter()
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
