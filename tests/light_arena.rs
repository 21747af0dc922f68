use glam::{Mat4, Vec3, Vec4};
use wgpu_deferred::renderer::{PointLight, PointLightArena, RenderError};

fn three_lights() -> (PointLightArena, Vec<wgpu_deferred::renderer::LightHandle>) {
    let mut arena = PointLightArena::new(8);
    let handles = (0..3)
        .map(|i| {
            arena
                .add(PointLight::new(
                    Vec3::splat(1.0 + i as f32),
                    Vec3::new(i as f32, 0.0, 0.0),
                    2.0,
                ))
                .unwrap()
        })
        .collect();
    (arena, handles)
}

#[test]
fn removing_the_first_light_keeps_other_handles() {
    let (mut arena, handles) = three_lights();
    arena.remove(handles[0]).unwrap();

    assert_eq!(arena.len(), 2);
    assert!(arena.get(handles[0]).is_none());
    assert_eq!(arena.get(handles[1]).unwrap().position, Vec3::new(1.0, 0.0, 0.0));
    assert_eq!(arena.get(handles[2]).unwrap().position, Vec3::new(2.0, 0.0, 0.0));

    arena
        .transform(handles[2], Vec3::new(0.0, 5.0, 0.0), None)
        .unwrap();
    assert_eq!(arena.get(handles[2]).unwrap().position, Vec3::new(0.0, 5.0, 0.0));
}

#[test]
fn packed_records_stay_dense_after_removal() {
    let (mut arena, handles) = three_lights();
    arena.remove(handles[0]).unwrap();

    let records = arena.records();
    assert_eq!(records.len(), 2);
    assert_eq!(arena.packed_index(handles[1]), Some(0));
    assert_eq!(arena.packed_index(handles[2]), Some(1));
    assert_eq!(records[0].color, [2.0, 2.0, 2.0, 2.0]);
    assert_eq!(records[1].color, [3.0, 3.0, 3.0, 2.0]);
}

#[test]
fn stale_handle_is_rejected_after_slot_reuse() {
    let (mut arena, handles) = three_lights();
    arena.remove(handles[1]).unwrap();
    let reused = arena
        .add(PointLight::new(Vec3::ONE, Vec3::ZERO, 1.0))
        .unwrap();

    assert_eq!(reused.index(), handles[1].index());
    assert_ne!(reused, handles[1]);
    let err = arena.set_color(handles[1], Vec3::ZERO).unwrap_err();
    assert!(matches!(err, RenderError::StaleHandle(_)));
    assert!(arena.remove(handles[1]).is_err());
}

#[test]
fn arena_refuses_lights_past_capacity() {
    let mut arena = PointLightArena::new(2);
    arena.add(PointLight::new(Vec3::ONE, Vec3::ZERO, 1.0)).unwrap();
    arena.add(PointLight::new(Vec3::ONE, Vec3::ZERO, 1.0)).unwrap();

    let err = arena
        .add(PointLight::new(Vec3::ONE, Vec3::ZERO, 1.0))
        .unwrap_err();
    assert!(matches!(err, RenderError::CapacityExceeded { limit: 2, .. }));
    assert_eq!(arena.len(), 2);
}

#[test]
fn record_scales_unit_volume_to_radius() {
    let light = PointLight::new(Vec3::new(1.0, 0.5, 0.25), Vec3::new(3.0, 4.0, 5.0), 6.0);
    let record = light.record();
    let model = Mat4::from_cols_array_2d(&record.model);

    assert_eq!(Vec4::from_array(record.color), Vec4::new(1.0, 0.5, 0.25, 6.0));
    let rim = model.transform_point3(Vec3::X);
    assert!((rim - Vec3::new(9.0, 4.0, 5.0)).length() < 1e-5);
}
