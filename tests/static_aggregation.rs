use glam::{Mat4, Quat, Vec3};
use wgpu_deferred::renderer::static_mesh::StaticStaging;
use wgpu_deferred::renderer::tangents::compute_tangents;
use wgpu_deferred::renderer::vertex::v;
use wgpu_deferred::renderer::{MeshData, MeshVertex};

const EPSILON: f32 = 1e-5;

fn quad() -> MeshData {
    let mut vertices = vec![
        v([0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0]),
        v([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0]),
        v([1.0, 0.0, 1.0], [0.0, 1.0, 0.0], [1.0, 1.0]),
        v([0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [0.0, 1.0]),
    ];
    let indices = vec![0, 2, 1, 0, 3, 2];
    compute_tangents(&mut vertices, &indices);
    MeshData::single(vertices, indices)
}

fn strip(vertex_count: usize) -> MeshData {
    let vertices: Vec<MeshVertex> = (0..vertex_count)
        .map(|i| v([i as f32, (i % 2) as f32, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]))
        .collect();
    let indices: Vec<u32> = (0..vertex_count as u32 - 2)
        .flat_map(|i| [i, i + 1, i + 2])
        .collect();
    MeshData::single(vertices, indices)
}

#[test]
fn second_push_rebases_indices() {
    let mut staging = StaticStaging::new();
    staging.push(&quad(), Mat4::IDENTITY);
    staging.push(&quad(), Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0)));

    assert_eq!(staging.vertices().len(), 8);
    assert_eq!(staging.indices().len(), 12);
    assert_eq!(&staging.indices()[6..], &[4, 6, 5, 4, 7, 6]);
}

#[test]
fn positions_use_full_matrix_and_normals_the_linear_part() {
    let model = Mat4::from_rotation_translation(
        Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
        Vec3::new(0.0, 2.0, 0.0),
    );
    let mut staging = StaticStaging::new();
    staging.push(&quad(), model);

    let corner = staging.vertices()[1];
    let expected = model.transform_point3(Vec3::X);
    assert!(corner.position3().distance(expected) < EPSILON);
    assert!((corner.position[3] - 1.0).abs() < EPSILON);

    // +Y rotated a quarter turn about Z points along -X; translation ignored.
    assert!(corner.normal3().distance(Vec3::NEG_X) < EPSILON);
}

#[test]
fn tangent_handedness_survives_transformation() {
    let source = quad();
    let mut staging = StaticStaging::new();
    staging.push(&source, Mat4::from_scale(Vec3::new(2.0, 2.0, 2.0)));

    for (before, after) in source.vertices().iter().zip(staging.vertices()) {
        assert_eq!(before.tangent[3], after.tangent[3]);
        let scaled = before.tangent4().truncate() * 2.0;
        assert!(after.tangent4().truncate().distance(scaled) < EPSILON);
    }
}

#[test]
fn staging_doubles_when_a_push_overflows() {
    let mut staging = StaticStaging::new();
    let initial = staging.vertex_capacity();

    staging.push(&strip(initial / 2 + 8), Mat4::IDENTITY);
    assert_eq!(staging.vertex_capacity(), initial);

    staging.push(&strip(initial / 2 + 8), Mat4::IDENTITY);
    assert_eq!(staging.vertex_capacity(), initial * 2);
    assert_eq!(staging.vertices().len(), initial + 16);
}

#[test]
fn empty_staging_reports_empty() {
    let staging = StaticStaging::new();
    assert!(staging.is_empty());
    assert!(staging.vertices().is_empty());
}
