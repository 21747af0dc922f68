//! Full frames on a real adapter. Run with `cargo test -- --ignored` on a
//! machine with a GPU.
use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};
use wgpu::util::DeviceExt;
use wgpu_deferred::renderer::instance::CapacityPolicy;
use wgpu_deferred::renderer::mesh::ChunkData;
use wgpu_deferred::renderer::primitives;
use wgpu_deferred::renderer::render_target::{AttachmentFormat, DEPTH_FORMAT};
use wgpu_deferred::renderer::renderer::GBUFFER_SHADER;
use wgpu_deferred::renderer::vertex::v;
use wgpu_deferred::renderer::{
    request_headless_device, CubeMap, FramePhase, FrameTarget, GpuMesh, InstanceBatch,
    InstanceRecord, Material, MaterialLibrary, MeshData, ProgramDescriptor, RenderError,
    RenderTarget, Renderer, ShaderProgram, StaticMeshAggregator, TextureMapType,
};
use wgpu_deferred::settings::RendererSettings;

const SURFACE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const UNLIT_SHADER: &str = r#"
struct Camera {
    view: mat4x4<f32>,
    proj: mat4x4<f32>,
    view_pos: vec3<f32>,
};

@group(0) @binding(0) var<uniform> camera: Camera;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec4<f32>,
};

@vertex
fn vs_main(
    @location(0) position: vec4<f32>,
    @location(4) color: vec4<f32>,
    @location(5) model_0: vec4<f32>,
    @location(6) model_1: vec4<f32>,
    @location(7) model_2: vec4<f32>,
    @location(8) model_3: vec4<f32>,
) -> VertexOutput {
    let model = mat4x4<f32>(model_0, model_1, model_2, model_3);
    var out: VertexOutput;
    out.clip_position = camera.proj * camera.view * model * vec4<f32>(position.xyz, 1.0);
    out.color = color;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return in.color;
}
"#;

fn temp_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("wgpu_deferred_gpu_{}_{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn offscreen_target(device: &wgpu::Device, width: u32, height: u32) -> FrameTarget {
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let color = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Offscreen Color"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: SURFACE_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let depth = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Offscreen Depth"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    FrameTarget {
        color: color.create_view(&wgpu::TextureViewDescriptor::default()),
        depth: depth.create_view(&wgpu::TextureViewDescriptor::default()),
        width,
        height,
    }
}

/// Lighting, bloom and depth copy with an untouched G-buffer, leaving the
/// frame ready for forward passes.
fn run_deferred_passes(
    renderer: &mut Renderer,
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    gbuffer: &RenderTarget,
) {
    renderer.run_point_light_pass(device, queue, gbuffer).unwrap();
    renderer.run_bloom_extraction(device).unwrap();
    renderer.run_blur(device).unwrap();
    renderer.run_composite(device).unwrap();
    renderer.copy_depth(device, gbuffer).unwrap();
}

fn small_renderer(device: &wgpu::Device, queue: &wgpu::Queue) -> Renderer {
    Renderer::new(
        device,
        queue,
        SURFACE_FORMAT,
        320,
        240,
        RendererSettings::default(),
    )
    .unwrap()
}

#[test]
#[ignore = "needs a GPU adapter"]
fn full_frame_records_without_validation_errors() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (device, queue) = pollster::block_on(request_headless_device()).unwrap();

    let settings = RendererSettings::default();
    let mut renderer =
        Renderer::new(&device, &queue, SURFACE_FORMAT, 640, 480, settings.clone()).unwrap();
    let mut gbuffer = RenderTarget::gbuffer(&device, 640, 480).unwrap();

    let program = Arc::new(
        renderer
            .geometry_program(&device, "GBuffer Program", GBUFFER_SHADER, &gbuffer)
            .unwrap(),
    );
    let mut materials = MaterialLibrary::new();
    let material = materials.insert(Material::new("Test", program));

    let mut cubes = InstanceBatch::cube(&device, CapacityPolicy::Growable { limit: None }, 4);
    for i in 0..3 {
        cubes
            .add_instance_with(
                Mat4::from_translation(Vec3::new(i as f32 * 2.0 - 2.0, 0.0, -5.0)),
                Vec4::ONE,
            )
            .unwrap();
    }
    cubes.set_material(&mut materials, Some(material)).unwrap();

    let mut floor = StaticMeshAggregator::new("Floor");
    floor.push_data(&primitives::plane(10.0), Mat4::from_translation(Vec3::NEG_Y));
    floor.finalize(&device);
    floor.set_material(&mut materials, Some(material)).unwrap();

    let lights: Vec<_> = (0..3)
        .map(|i| {
            renderer
                .add_point_light(Vec3::ONE, Vec3::new(i as f32, 1.0, -4.0), 5.0)
                .unwrap()
        })
        .collect();
    renderer.remove_point_light(lights[0]).unwrap();

    for (width, height) in [(640, 480), (800, 600)] {
        gbuffer.resize(&device, width, height);
        let target = offscreen_target(&device, width, height);

        renderer.begin_frame(&device, &queue, target).unwrap();
        {
            let mut pass = renderer.geometry_pass(&device, &queue, &gbuffer).unwrap();
            materials
                .draw_meshes(material, &mut pass, [&mut cubes])
                .unwrap();
            materials
                .draw_static_meshes(material, &mut pass, [&floor])
                .unwrap();
        }
        renderer
            .run_point_light_pass(&device, &queue, &gbuffer)
            .unwrap();
        renderer
            .run_directional_light_pass(&device, &queue, &gbuffer, Vec3::NEG_Y, Vec3::splat(0.5))
            .unwrap();
        renderer.run_bloom_extraction(&device).unwrap();
        renderer.run_blur(&device).unwrap();
        renderer.run_composite(&device).unwrap();
        renderer.copy_depth(&device, &gbuffer).unwrap();
        renderer.end_frame(&queue).unwrap();

        assert_eq!(renderer.phase(), FramePhase::Ended);
        assert_eq!(renderer.size(), (width, height));
        assert_eq!(renderer.report_errors(), 0);
    }
    assert_eq!(renderer.point_lights().len(), 2);
}

#[test]
#[ignore = "needs a GPU adapter"]
fn out_of_order_pass_is_rejected_before_recording() {
    let (device, queue) = pollster::block_on(request_headless_device()).unwrap();
    let mut renderer = Renderer::new(
        &device,
        &queue,
        SURFACE_FORMAT,
        320,
        240,
        RendererSettings::default(),
    )
    .unwrap();

    assert!(renderer.run_bloom_extraction(&device).is_err());
    renderer
        .begin_frame(&device, &queue, offscreen_target(&device, 320, 240))
        .unwrap();
    assert!(renderer.run_composite(&device).is_err());
    renderer.abort_frame();
    assert!(!renderer.phase().in_frame());
}

#[test]
#[ignore = "needs a GPU adapter"]
fn forward_geometry_and_skybox_follow_the_depth_copy() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (device, queue) = pollster::block_on(request_headless_device()).unwrap();

    let dir = temp_dir("sky");
    let faces = [
        [255, 0, 0, 255],
        [0, 255, 255, 255],
        [0, 255, 0, 255],
        [255, 0, 255, 255],
        [0, 0, 255, 255],
        [255, 255, 0, 255],
    ]
    .map(|rgba| {
        let path = dir.join(format!("{}_{}_{}.png", rgba[0], rgba[1], rgba[2]));
        image::RgbaImage::from_pixel(4, 4, image::Rgba(rgba))
            .save(&path)
            .unwrap();
        path
    });
    let sky = CubeMap::from_faces(&device, &queue, faces).unwrap();
    assert_eq!(sky.size(), 4);

    let mut renderer = Renderer::new(
        &device,
        &queue,
        SURFACE_FORMAT,
        320,
        240,
        RendererSettings::default(),
    )
    .unwrap();
    let gbuffer = RenderTarget::gbuffer(&device, 320, 240).unwrap();

    let unlit = Arc::new(
        renderer
            .forward_program(&device, "Unlit Program", UNLIT_SHADER, None)
            .unwrap(),
    );
    let mut materials = MaterialLibrary::new();
    let material = materials.insert(Material::new("Unlit", unlit));
    let mut markers = InstanceBatch::cube(&device, CapacityPolicy::Bounded { max: 2 }, 2);
    markers.set_material(&mut materials, Some(material)).unwrap();

    renderer
        .begin_frame(&device, &queue, offscreen_target(&device, 320, 240))
        .unwrap();
    drop(renderer.geometry_pass(&device, &queue, &gbuffer).unwrap());
    renderer
        .run_point_light_pass(&device, &queue, &gbuffer)
        .unwrap();
    renderer.run_bloom_extraction(&device).unwrap();
    renderer.run_blur(&device).unwrap();
    renderer.run_composite(&device).unwrap();
    renderer.copy_depth(&device, &gbuffer).unwrap();
    {
        let mut pass = renderer.forward_pass(&device, &queue).unwrap();
        materials
            .get_mut(material)
            .unwrap()
            .bind(&mut pass);
        for x in 0..3 {
            let model = Mat4::from_translation(Vec3::new(x as f32, 0.0, -4.0));
            markers.push(&mut pass, model, Vec4::new(1.0, 0.8, 0.2, 1.0)).unwrap();
        }
        markers.flush(&mut pass).unwrap();
    }
    renderer.draw_skybox(&device, &sky).unwrap();
    renderer.end_frame(&queue).unwrap();

    assert_eq!(renderer.report_errors(), 0);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
#[ignore = "needs a GPU adapter"]
fn failed_reload_keeps_the_uploaded_mesh() {
    let (device, queue) = pollster::block_on(request_headless_device()).unwrap();

    let dir = temp_dir("reload");
    let path = dir.join("tri.obj");
    std::fs::write(&path, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();

    let mut mesh = GpuMesh::load(&device, &queue, &path, TextureMapType::empty()).unwrap();
    assert_eq!((mesh.vertex_count(), mesh.index_count()), (3, 3));

    assert!(mesh
        .reload(&device, &queue, dir.join("missing.obj"), TextureMapType::empty())
        .is_err());
    assert_eq!(mesh.path(), Some(path.as_path()));
    assert_eq!(mesh.index_count(), 3);

    std::fs::write(&path, "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n").unwrap();
    mesh.reload(&device, &queue, &path, TextureMapType::empty())
        .unwrap();
    assert_eq!((mesh.vertex_count(), mesh.index_count()), (4, 6));
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
#[ignore = "needs a GPU adapter"]
fn resized_target_reallocates_every_attachment() {
    let (device, _queue) = pollster::block_on(request_headless_device()).unwrap();

    let mut target = RenderTarget::new(&device, "Scenario", 800, 600);
    target.add_color_attachment(&device, AttachmentFormat::Rgb8).unwrap();
    target
        .add_color_attachment(&device, AttachmentFormat::Rgba16Float)
        .unwrap();
    target.add_depth_attachment(&device);
    let generation = target.generation();

    target.resize(&device, 1024, 768);

    assert_eq!(target.attachment_count(), 2);
    assert_eq!(target.draw_buffers(), &[0, 1]);
    for i in 0..2 {
        let texture = target.color_texture(i).unwrap();
        assert_eq!((texture.width(), texture.height()), (1024, 768));
    }
    assert_eq!(
        target.color_texture(0).unwrap().format(),
        wgpu::TextureFormat::Rgba8Unorm
    );
    assert_eq!(
        target.color_texture(1).unwrap().format(),
        wgpu::TextureFormat::Rgba16Float
    );
    assert_eq!(
        target.color_formats(),
        &[AttachmentFormat::Rgb8, AttachmentFormat::Rgba16Float]
    );
    assert!(target.has_depth());
    assert!(target.depth_view().is_some());
    assert!(target.generation() > generation);
    assert_eq!(target.texture(1).unwrap().width(), 1024);
}

#[test]
#[ignore = "needs a GPU adapter"]
fn broken_shader_source_is_returned_as_an_error() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (device, _queue) = pollster::block_on(request_headless_device()).unwrap();

    let result = ShaderProgram::new(
        &device,
        ProgramDescriptor::new("Broken", "@vertex fn vs_main( -> {"),
    );
    assert!(matches!(
        result,
        Err(RenderError::Shader { ref label, .. }) if label == "Broken"
    ));

    let missing_entry = ShaderProgram::new(
        &device,
        ProgramDescriptor::new(
            "Missing Entry",
            "@vertex fn other() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }",
        ),
    );
    assert!(matches!(missing_entry, Err(RenderError::Shader { .. })));
}

#[test]
#[ignore = "needs a GPU adapter"]
fn errors_are_reported_mid_frame_and_later_ones_still_collected() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (device, queue) = pollster::block_on(request_headless_device()).unwrap();
    let mut renderer = small_renderer(&device, &queue);
    let gbuffer = RenderTarget::gbuffer(&device, 320, 240).unwrap();

    // Mapped-at-creation sizes must be a multiple of four.
    let misaligned = |label: &str| {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: 3,
            usage: wgpu::BufferUsages::VERTEX,
            mapped_at_creation: true,
        })
    };

    renderer
        .begin_frame(&device, &queue, offscreen_target(&device, 320, 240))
        .unwrap();
    drop(renderer.geometry_pass(&device, &queue, &gbuffer).unwrap());
    let _first = misaligned("Misaligned A");
    assert_eq!(renderer.report_errors(), 1);
    assert_eq!(renderer.report_errors(), 0);

    renderer
        .run_point_light_pass(&device, &queue, &gbuffer)
        .unwrap();
    let _second = misaligned("Misaligned B");
    let _third = misaligned("Misaligned C");
    renderer.run_bloom_extraction(&device).unwrap();
    renderer.run_blur(&device).unwrap();
    renderer.run_composite(&device).unwrap();
    renderer.copy_depth(&device, &gbuffer).unwrap();
    renderer.end_frame(&queue).unwrap();

    assert_eq!(renderer.report_errors(), 2);
    assert_eq!(renderer.phase(), FramePhase::Ended);
}

#[test]
#[ignore = "needs a GPU adapter"]
fn chunks_draw_in_isolation() {
    let (device, queue) = pollster::block_on(request_headless_device()).unwrap();
    let mut renderer = small_renderer(&device, &queue);
    let gbuffer = RenderTarget::gbuffer(&device, 320, 240).unwrap();

    let triangle = |x: f32| ChunkData {
        vertices: vec![
            v([x, 0.0, -3.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
            v([x + 1.0, 0.0, -3.0], [0.0, 0.0, 1.0], [1.0, 0.0]),
            v([x, 1.0, -3.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
        ],
        indices: vec![0, 1, 2],
        material_index: None,
    };
    let mesh = GpuMesh::from_data(
        &device,
        "Two Chunks",
        MeshData::from_chunks(vec![triangle(-1.5), triangle(0.5)]),
    );
    assert_eq!(mesh.chunk_count(), 2);

    let unlit = Arc::new(
        renderer
            .forward_program(&device, "Unlit Program", UNLIT_SHADER, None)
            .unwrap(),
    );
    let mut material = Material::new("Unlit", unlit);
    let instance = InstanceRecord::new(Mat4::IDENTITY, Vec4::ONE);
    let instances = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Single Instance"),
        contents: bytemuck::bytes_of(&instance),
        usage: wgpu::BufferUsages::VERTEX,
    });

    renderer
        .begin_frame(&device, &queue, offscreen_target(&device, 320, 240))
        .unwrap();
    run_deferred_passes(&mut renderer, &device, &queue, &gbuffer);
    {
        let mut pass = renderer.forward_pass(&device, &queue).unwrap();
        material.bind(&mut pass);
        pass.render_pass().set_vertex_buffer(1, instances.slice(..));
        assert!(mesh.draw_chunk(&mut pass, 1, 0..1));
        assert!(mesh.draw_chunk(&mut pass, 0, 0..1));
        assert!(!mesh.draw_chunk(&mut pass, 2, 0..1));
        assert_eq!(pass.draw_calls(), 2);
    }
    renderer.end_frame(&queue).unwrap();
    assert_eq!(renderer.report_errors(), 0);
}

#[test]
#[ignore = "needs a GPU adapter"]
fn instance_buffer_follows_store_growth() {
    let (device, queue) = pollster::block_on(request_headless_device()).unwrap();
    let mut renderer = small_renderer(&device, &queue);
    let gbuffer = RenderTarget::gbuffer(&device, 320, 240).unwrap();

    let unlit = Arc::new(
        renderer
            .forward_program(&device, "Unlit Program", UNLIT_SHADER, None)
            .unwrap(),
    );
    let mut material = Material::new("Unlit", unlit);
    let mut cubes = InstanceBatch::cube(&device, CapacityPolicy::Growable { limit: None }, 2);
    assert_eq!(cubes.gpu_capacity(), 2);
    for i in 0..5 {
        cubes
            .add_instance_with(Mat4::from_translation(Vec3::new(i as f32, 0.0, -6.0)), Vec4::ONE)
            .unwrap();
    }
    assert_eq!(cubes.capacity(), 8);
    assert_eq!(cubes.gpu_capacity(), 2);

    renderer
        .begin_frame(&device, &queue, offscreen_target(&device, 320, 240))
        .unwrap();
    run_deferred_passes(&mut renderer, &device, &queue, &gbuffer);
    {
        let mut pass = renderer.forward_pass(&device, &queue).unwrap();
        material.bind(&mut pass);
        assert_eq!(cubes.draw(&mut pass).unwrap(), 5);
    }
    renderer.end_frame(&queue).unwrap();

    assert_eq!(cubes.gpu_capacity(), 8);
    assert_eq!(renderer.report_errors(), 0);
}

#[test]
#[ignore = "needs a GPU adapter"]
fn single_object_batch_holds_exactly_one_instance() {
    let (device, _queue) = pollster::block_on(request_headless_device()).unwrap();
    let mesh = Arc::new(GpuMesh::from_data(&device, "Cube", primitives::cube()));

    let mut object = InstanceBatch::single(
        &device,
        "Single",
        mesh,
        Mat4::from_translation(Vec3::X),
        Vec4::ONE,
    )
    .unwrap();
    assert_eq!(object.len(), 1);
    assert!(matches!(
        object.add_instance(),
        Err(RenderError::CapacityExceeded { limit: 1, .. })
    ));

    let moved = Mat4::from_translation(Vec3::new(0.0, 2.0, 0.0));
    object.update_instance(0, moved).unwrap();
    assert_eq!(object.store().records()[0].model_matrix(), moved);
    assert_eq!(object.gpu_capacity(), 1);
}
