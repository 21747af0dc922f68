// app.rs
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use glam::{Mat4, Quat, Vec3, Vec4};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::*,
    event_loop::ActiveEventLoop,
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::renderer::context::RenderContext;
use crate::renderer::error::RenderError;
use crate::renderer::frame::FrameTarget;
use crate::renderer::instance::CapacityPolicy;
use crate::renderer::lights::LightHandle;
use crate::renderer::material::{Material, MaterialHandle, MaterialLibrary};
use crate::renderer::mesh::{GpuMesh, TextureMapType};
use crate::renderer::primitives;
use crate::renderer::renderer::GBUFFER_SHADER;
use crate::renderer::{InstanceBatch, RenderTarget, Renderer, StaticMeshAggregator};
use crate::settings::RendererSettings;

const GRID: i32 = 5;
const ORBIT_RADIUS: f32 = 9.0;

/// Everything drawn by the demo, created once the window exists.
struct DemoScene {
    renderer: Renderer,
    gbuffer: RenderTarget,
    materials: MaterialLibrary,
    material: MaterialHandle,
    cubes: InstanceBatch,
    floor: StaticMeshAggregator,
    lights: Vec<LightHandle>,
}

impl DemoScene {
    fn new(
        context: &RenderContext,
        settings: &RendererSettings,
        mesh_path: Option<&PathBuf>,
    ) -> Result<Self, RenderError> {
        let device = &context.device;
        let queue = &context.queue;
        let (width, height) = (context.config.width, context.config.height);

        let mut renderer = Renderer::new(device, queue, context.format(), width, height, settings.clone())?;
        let gbuffer = RenderTarget::gbuffer(device, width, height)?;

        let program = Arc::new(renderer.geometry_program(device, "GBuffer Program", GBUFFER_SHADER, &gbuffer)?);
        let mut materials = MaterialLibrary::new();
        let mut material = Material::new("Default", program);
        material.set_ambient(Vec4::splat(0.1));
        material.set_diffuse(Vec4::ONE);
        material.set_specular(Vec4::new(0.5, 0.5, 0.5, 1.0));
        material.set_shininess(32.0);
        let material = materials.insert(material);

        let mut cubes = InstanceBatch::cube(
            device,
            CapacityPolicy::Growable { limit: None },
            settings.instance_capacity,
        );
        for x in -GRID / 2..=GRID / 2 {
            for z in -GRID / 2..=GRID / 2 {
                let position = Vec3::new(x as f32 * 2.0, 0.5, z as f32 * 2.0);
                let color = Vec4::new(
                    0.5 + 0.1 * x as f32,
                    0.6,
                    0.5 + 0.1 * z as f32,
                    1.0,
                );
                cubes.add_instance_with(Mat4::from_translation(position), color)?;
            }
        }
        cubes.set_material(&mut materials, Some(material))?;

        let mut floor = StaticMeshAggregator::new("Floor");
        floor.push_data(&primitives::plane(24.0), Mat4::IDENTITY);
        if let Some(path) = mesh_path {
            match GpuMesh::load(device, queue, path, TextureMapType::ALL) {
                Ok(mesh) => {
                    floor.push_mesh(&mesh, Mat4::from_translation(Vec3::new(0.0, 0.0, -6.0)));
                }
                Err(err) => log::error!("Skipping {:?}: {}", path, err),
            }
        }
        floor.finalize(device);
        floor.set_material(&mut materials, Some(material))?;

        let lights = vec![
            renderer.add_point_light(Vec3::new(4.0, 2.4, 1.2), Vec3::new(3.0, 1.5, 0.0), 8.0)?,
            renderer.add_point_light(Vec3::new(0.8, 1.6, 4.0), Vec3::new(-3.0, 1.5, 0.0), 8.0)?,
        ];

        Ok(Self {
            renderer,
            gbuffer,
            materials,
            material,
            cubes,
            floor,
            lights,
        })
    }

    fn update(&mut self, t: f32) -> Result<(), RenderError> {
        let eye = Vec3::new(t.sin() * ORBIT_RADIUS, 4.0, t.cos() * ORBIT_RADIUS);
        self.renderer
            .set_view_matrix(Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y), eye);

        for (i, light) in self.lights.iter().enumerate() {
            let phase = t * 1.3 + i as f32 * std::f32::consts::PI;
            let position = Vec3::new(phase.cos() * 4.0, 1.5, phase.sin() * 4.0);
            self.renderer.transform_point_light(*light, position, None)?;
        }

        let spin = Quat::from_rotation_y(t);
        let center = Mat4::from_rotation_translation(spin, Vec3::new(0.0, 0.5, 0.0));
        self.cubes.update_instance(self.cubes.len() / 2, center)
    }

    fn render(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        target: FrameTarget,
    ) -> Result<(), RenderError> {
        let renderer = &mut self.renderer;
        renderer.begin_frame(device, queue, target)?;
        {
            let mut pass = renderer.geometry_pass(device, queue, &self.gbuffer)?;
            self.materials
                .draw_meshes(self.material, &mut pass, [&mut self.cubes])?;
            self.materials
                .draw_static_meshes(self.material, &mut pass, [&self.floor])?;
        }
        renderer.run_point_light_pass(device, queue, &self.gbuffer)?;
        renderer.run_directional_light_pass(
            device,
            queue,
            &self.gbuffer,
            Vec3::new(-0.3, -1.0, -0.5),
            Vec3::splat(0.25),
        )?;
        renderer.run_bloom_extraction(device)?;
        renderer.run_blur(device)?;
        renderer.run_composite(device)?;
        renderer.copy_depth(device, &self.gbuffer)?;
        renderer.end_frame(queue)
    }

    fn resize(&mut self, device: &wgpu::Device, size: PhysicalSize<u32>) {
        self.renderer.resize(device, size.width, size.height);
        self.gbuffer.resize(device, size.width, size.height);
    }
}

pub struct App {
    settings: RendererSettings,
    mesh_path: Option<PathBuf>,
    window: Option<Arc<Window>>,
    context: Option<RenderContext>,
    scene: Option<DemoScene>,
    start: Instant,
}

impl App {
    pub fn new(mesh_path: Option<PathBuf>) -> Self {
        Self {
            settings: RendererSettings::load(),
            mesh_path,
            window: None,
            context: None,
            scene: None,
            start: Instant::now(),
        }
    }

    fn create(&mut self, event_loop: &ActiveEventLoop) -> Result<(), String> {
        let size = PhysicalSize::new(
            self.settings.resolution.width,
            self.settings.resolution.height,
        );
        let window = event_loop
            .create_window(
                Window::default_attributes()
                    .with_title("wgpu deferred renderer")
                    .with_inner_size(size),
            )
            .map_err(|e| e.to_string())?;
        let window = Arc::new(window);

        let context = pollster::block_on(RenderContext::new(window.clone(), &self.settings))
            .map_err(|e| e.to_string())?;
        let scene = DemoScene::new(&context, &self.settings, self.mesh_path.as_ref())
            .map_err(|e| e.to_string())?;

        window.request_redraw();
        self.window = Some(window);
        self.context = Some(context);
        self.scene = Some(scene);
        Ok(())
    }

    fn redraw(&mut self) {
        let (Some(context), Some(scene)) = (self.context.as_mut(), self.scene.as_mut()) else {
            return;
        };

        if let Err(err) = scene.update(self.start.elapsed().as_secs_f32()) {
            log::warn!("Scene update failed: {}", err);
        }

        let (output, target) = match context.acquire_frame() {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("Skipping frame: {}", err);
                return;
            }
        };

        if let Err(err) = scene.render(&context.device, &context.queue, target) {
            log::error!("Frame failed: {}", err);
            scene.renderer.abort_frame();
            return;
        }
        output.present();
        scene.renderer.report_errors();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(err) = self.create(event_loop) {
            log::error!("Failed to start renderer: {}", err);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        if self.window.as_ref().map(|w| w.id()) != Some(id) {
            return;
        }

        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let (Some(context), Some(scene)) = (self.context.as_mut(), self.scene.as_mut()) {
                    context.resize(size);
                    scene.resize(&context.device, size);
                }
            }
            WindowEvent::RedrawRequested => {
                self.redraw();
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                event_loop.exit();
            }
            _ => {}
        }
    }
}
