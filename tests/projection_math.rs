//! Camera and post-process math checked on the CPU.
//!
//! Right-handed view space looking down -Z, depth range [0, 1].
use glam::{Mat4, Vec3, Vec4};
use wgpu_deferred::renderer::postprocess::{BlurSource, BlurSchedule};
use wgpu_deferred::renderer::renderer::perspective;
use wgpu_deferred::renderer::CameraUniform;
use wgpu_deferred::settings::RendererSettings;

const EPSILON: f32 = 1e-4;

#[test]
fn resize_changes_only_the_aspect_ratio() {
    let settings = RendererSettings::default();
    let wide = perspective(&settings, 800, 600);
    let square = perspective(&settings, 600, 600);

    assert!((wide.y_axis.y - square.y_axis.y).abs() < EPSILON);
    assert!((square.x_axis.x / wide.x_axis.x - 800.0 / 600.0).abs() < EPSILON);
}

#[test]
fn points_inside_the_frustum_land_in_ndc() {
    let settings = RendererSettings::default();
    let proj = perspective(&settings, 1280, 720);
    let view = Mat4::look_at_rh(Vec3::new(0.0, 1.0, 3.0), Vec3::ZERO, Vec3::Y);

    let clip = proj * view * Vec4::new(0.0, 0.0, 0.0, 1.0);
    let ndc = clip.truncate() / clip.w;
    assert!(ndc.x.abs() < EPSILON && ndc.y.abs() < EPSILON);
    assert!(ndc.z > 0.0 && ndc.z < 1.0);
}

#[test]
fn sky_direction_reconstructs_view_ray() {
    // Mirrors the skybox shader: view ray from NDC xy and the projection scale.
    let proj = perspective(&RendererSettings::default(), 800, 600);
    let view_point = Vec3::new(1.5, -0.75, -10.0);
    let ndc = proj.project_point3(view_point);

    let ray = Vec3::new(ndc.x / proj.x_axis.x, ndc.y / proj.y_axis.y, -1.0);
    let expected = view_point / -view_point.z;
    assert!((ray - expected).length() < EPSILON);
}

#[test]
fn camera_uniform_round_trips_matrices() {
    let view = Mat4::look_at_rh(Vec3::new(2.0, 3.0, 4.0), Vec3::ZERO, Vec3::Y);
    let proj = perspective(&RendererSettings::default(), 1024, 768);
    let uniform = CameraUniform::new(view, proj, Vec3::new(2.0, 3.0, 4.0));

    assert_eq!(Mat4::from_cols_array_2d(&uniform.view), view);
    assert_eq!(Mat4::from_cols_array_2d(&uniform.proj), proj);
    assert_eq!(std::mem::size_of::<CameraUniform>(), 144);
}

#[test]
fn default_blur_reads_bright_once_and_ends_on_a_blur_target() {
    let schedule = BlurSchedule::new(RendererSettings::default().bloom.passes);
    let bright_reads = schedule
        .steps()
        .iter()
        .filter(|step| step.source == BlurSource::Bright)
        .count();

    assert_eq!(bright_reads, 1);
    assert_eq!(schedule.horizontal_count(), schedule.vertical_count());
    assert!(matches!(schedule.output(), BlurSource::Blur(_)));
}
