//! Per-frame pass ordering and the pass handle handed to draw code.

use crate::renderer::error::RenderError;
use crate::renderer::material::MaterialLayout;

/// Stage a frame has reached. Passes run in declaration order; geometry and
/// forward passes may repeat, the directional light pass is optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Begun,
    Geometry,
    PointLights,
    DirectionalLight,
    BrightPass,
    Blur,
    Composite,
    DepthCopy,
    Forward,
    Ended,
}

impl FramePhase {
    fn allows(self, next: FramePhase) -> bool {
        use FramePhase::*;
        matches!(
            (self, next),
            (Idle | Ended, Begun)
                | (Begun | Geometry, Geometry)
                | (Begun | Geometry, PointLights)
                | (PointLights, DirectionalLight)
                | (PointLights | DirectionalLight, BrightPass)
                | (BrightPass, Blur)
                | (Blur, Composite)
                | (Composite, DepthCopy)
                | (DepthCopy | Forward, Forward)
                | (DepthCopy | Forward, Ended)
        )
    }

    pub fn in_frame(self) -> bool {
        !matches!(self, FramePhase::Idle | FramePhase::Ended)
    }
}

/// Tracks the current phase and rejects out-of-order passes.
#[derive(Debug, Clone)]
pub struct FrameSequencer {
    phase: FramePhase,
    frame_index: u64,
}

impl Default for FrameSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSequencer {
    pub fn new() -> Self {
        Self {
            phase: FramePhase::Idle,
            frame_index: 0,
        }
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Number of frames begun so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn advance(&mut self, next: FramePhase) -> Result<(), RenderError> {
        if !self.phase.allows(next) {
            return Err(RenderError::FrameOrder {
                from: self.phase,
                to: next,
            });
        }
        if next == FramePhase::Begun {
            self.frame_index += 1;
        }
        self.phase = next;
        Ok(())
    }

    /// Abandons the frame in progress, e.g. after a surface error.
    pub fn abort(&mut self) {
        if self.phase.in_frame() {
            log::warn!("Abandoning frame {} in phase {:?}", self.frame_index, self.phase);
        }
        self.phase = FramePhase::Ended;
    }
}

/// Color and depth views of the surface being rendered to this frame.
#[derive(Clone, Debug)]
pub struct FrameTarget {
    pub color: wgpu::TextureView,
    pub depth: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

pub(crate) struct Frame {
    pub(crate) encoder: wgpu::CommandEncoder,
    pub(crate) target: FrameTarget,
}

/// Open render pass over a geometry target, with the camera block bound at
/// group 0. Materials bind at group 1, program uniforms after that.
pub struct GeometryPass<'a> {
    pub(crate) pass: wgpu::RenderPass<'a>,
    pub(crate) device: &'a wgpu::Device,
    pub(crate) queue: &'a wgpu::Queue,
    pub(crate) material_layout: &'a MaterialLayout,
    pub(crate) frame_index: u64,
    pub(crate) draw_calls: u32,
}

impl<'a> GeometryPass<'a> {
    pub(crate) fn new(
        mut pass: wgpu::RenderPass<'a>,
        device: &'a wgpu::Device,
        queue: &'a wgpu::Queue,
        camera_bind_group: &wgpu::BindGroup,
        material_layout: &'a MaterialLayout,
        frame_index: u64,
    ) -> Self {
        pass.set_bind_group(0, camera_bind_group, &[]);
        Self {
            pass,
            device,
            queue,
            material_layout,
            frame_index,
            draw_calls: 0,
        }
    }

    pub fn render_pass(&mut self) -> &mut wgpu::RenderPass<'a> {
        &mut self.pass
    }

    pub fn device(&self) -> &'a wgpu::Device {
        self.device
    }

    pub fn queue(&self) -> &'a wgpu::Queue {
        self.queue
    }

    pub fn material_layout(&self) -> &'a MaterialLayout {
        self.material_layout
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn draw_calls(&self) -> u32 {
        self.draw_calls
    }

    pub(crate) fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        base_vertex: i32,
        instances: std::ops::Range<u32>,
    ) {
        self.pass.draw_indexed(indices, base_vertex, instances);
        self.draw_calls += 1;
    }
}
