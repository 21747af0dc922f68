use glam::{Mat3, Mat4, Quat, Vec3, Vec4};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use wgpu_deferred::renderer::instance::InstanceSink;
use wgpu_deferred::renderer::{
    CapacityPolicy, InstanceRecord, InstanceStore, NormalMatrixMode, RenderError,
};

#[derive(Default)]
struct Submissions {
    batches: Vec<Vec<InstanceRecord>>,
}

impl InstanceSink for Submissions {
    fn submit(&mut self, records: &[InstanceRecord]) -> Result<(), RenderError> {
        self.batches.push(records.to_vec());
        Ok(())
    }
}

fn random_transform(rng: &mut SmallRng) -> Mat4 {
    let axis = Vec3::new(
        rng.gen_range(-1.0..1.0),
        rng.gen_range(-1.0..1.0),
        rng.gen_range(-1.0..1.0),
    )
    .try_normalize()
    .unwrap_or(Vec3::Y);
    let rotation = Quat::from_axis_angle(axis, rng.gen_range(0.0..std::f32::consts::TAU));
    let translation = Vec3::new(
        rng.gen_range(-50.0..50.0),
        rng.gen_range(-50.0..50.0),
        rng.gen_range(-50.0..50.0),
    );
    Mat4::from_scale_rotation_translation(Vec3::splat(rng.gen_range(0.5..3.0)), rotation, translation)
}

#[test]
fn bounded_batch_overflow_flushes_exactly_once() {
    let mut store = InstanceStore::bounded(4);
    let mut sink = Submissions::default();

    for i in 0..5 {
        let model = Mat4::from_translation(Vec3::new(i as f32, 0.0, 0.0));
        store.push(model, Vec4::ONE, &mut sink).unwrap();
    }

    assert_eq!(sink.batches.len(), 1);
    assert_eq!(sink.batches[0].len(), 4);
    assert_eq!(store.len(), 1);
    let survivor = store.get(0).unwrap().model_matrix();
    assert_eq!(survivor.w_axis.x, 4.0);
}

#[test]
fn bounded_batch_flushes_every_time_it_fills() {
    let mut store = InstanceStore::bounded(3);
    let mut sink = Submissions::default();

    for _ in 0..10 {
        store.push(Mat4::IDENTITY, Vec4::ONE, &mut sink).unwrap();
    }
    store.flush(&mut sink).unwrap();

    let sizes: Vec<usize> = sink.batches.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![3, 3, 3, 1]);
    assert!(store.is_empty());
}

#[test]
fn update_writes_upper_left_normal_matrix() {
    let mut rng = SmallRng::seed_from_u64(7);
    let mut store = InstanceStore::growable(8);
    for _ in 0..16 {
        store.add_instance().unwrap();
    }

    for index in 0..store.len() {
        let model = random_transform(&mut rng);
        store.update_instance(index, model).unwrap();
        let record = store.get(index).unwrap();
        assert_eq!(record.model_matrix(), model);
        assert_eq!(record.normal_matrix(), Mat3::from_mat4(model));
    }
}

#[test]
fn inverse_transpose_keeps_normals_perpendicular_under_squash() {
    let model = Mat4::from_scale(Vec3::new(4.0, 1.0, 1.0));
    let mut store = InstanceStore::growable(1).with_normal_mode(NormalMatrixMode::InverseTranspose);
    store.add_instance_with(model, Vec4::ONE).unwrap();

    // Tangent and normal of a 45 degree slope in the xy plane.
    let tangent = Vec3::new(1.0, 1.0, 0.0);
    let normal = Vec3::new(-1.0, 1.0, 0.0);
    let world_tangent = Mat3::from_mat4(model) * tangent;
    let world_normal = store.get(0).unwrap().normal_matrix() * normal;
    assert!(world_tangent.dot(world_normal).abs() < 1e-5);
}

#[test]
fn growable_store_grows_past_initial_capacity() {
    let mut store = InstanceStore::new(CapacityPolicy::Growable { limit: None }, 4);
    for _ in 0..9 {
        store.add_instance_with(Mat4::IDENTITY, Vec4::ONE).unwrap();
    }
    assert_eq!(store.len(), 9);
    assert_eq!(store.capacity(), 16);
    assert!(store.take_growth());
    assert!(!store.take_growth());
}

#[test]
fn growable_limit_is_reported_not_flushed() {
    let mut store = InstanceStore::new(CapacityPolicy::Growable { limit: Some(2) }, 2);
    let mut sink = Submissions::default();
    store.push(Mat4::IDENTITY, Vec4::ONE, &mut sink).unwrap();
    store.push(Mat4::IDENTITY, Vec4::ONE, &mut sink).unwrap();

    let err = store.push(Mat4::IDENTITY, Vec4::ONE, &mut sink).unwrap_err();
    assert!(matches!(err, RenderError::CapacityExceeded { limit: 2, .. }));
    assert!(sink.batches.is_empty());
}

#[test]
fn draw_submits_live_range_without_resetting() {
    let mut store = InstanceStore::growable(4);
    let mut sink = Submissions::default();
    store
        .add_instance_with(Mat4::IDENTITY, Vec4::new(1.0, 0.0, 0.0, 1.0))
        .unwrap();
    store
        .add_instance_with(Mat4::IDENTITY, Vec4::new(0.0, 1.0, 0.0, 1.0))
        .unwrap();

    assert_eq!(store.draw(&mut sink).unwrap(), 2);
    assert_eq!(store.draw(&mut sink).unwrap(), 2);
    assert_eq!(sink.batches.len(), 2);
    assert_eq!(store.len(), 2);
}
