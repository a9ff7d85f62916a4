use drive_physics::ground::{
    probe_solid, probe_solid_bounded, probe_solid_with_material, BoxScene, SceneBox,
};
use drive_physics::{IgnoreSet, Material};
use nalgebra::{Point3, Vector3};
use proptest::prelude::*;

/// Solid slab with its top at `ground`, plus non-solid layers above it.
fn scene(ground: f32, layers: &[(f32, f32)]) -> BoxScene {
    let mut scene = BoxScene::new();
    scene.add(SceneBox::solid(Point3::new(-20.0, ground - 1.0, -20.0), Point3::new(20.0, ground, 20.0), Material::Dirt));
    for &(bottom, thickness) in layers {
        scene.add(SceneBox::non_solid(
            Point3::new(-2.0, ground + bottom, -2.0),
            Point3::new(2.0, ground + bottom + thickness, 2.0),
            Material::Foliage,
        ));
    }
    scene
}

proptest! {
    #[test]
    fn bounded_and_looping_probes_agree(
        ground in -3.0f32..3.0,
        layers in prop::collection::vec((0.5f32..4.0, 0.1f32..0.4), 0..=2),
        x in -4.0f32..4.0,
        length in 1.0f32..20.0,
    ) {
        let scene = scene(ground, &layers);
        let origin = Point3::new(x, ground + 10.0, 0.0);
        let down = Vector3::new(0.0, -length, 0.0);

        let a = probe_solid(&scene, origin, down, &IgnoreSet::new());
        let b = probe_solid_bounded(&scene, origin, down, &IgnoreSet::new());

        prop_assert_eq!(a.hit, b.hit);
        prop_assert_eq!(a.material, b.material);
        prop_assert!((a.position - b.position).norm() < 1e-4);
        prop_assert!((a.normal - b.normal).norm() < 1e-6);
        if a.is_hit() {
            prop_assert!(a.solid);
            prop_assert!((a.position.y - ground).abs() < 1e-4);
        } else {
            prop_assert!((a.position - (origin + down)).norm() < 1e-4);
            prop_assert_eq!(a.normal, -Vector3::y());
        }
    }
}

#[test]
fn third_non_solid_layer_is_where_the_budgets_part() {
    let layers = [(1.0, 0.3), (3.0, 0.3), (5.0, 0.3)];
    let origin = Point3::new(0.0, 10.0, 0.0);
    let down = Vector3::new(0.0, -20.0, 0.0);

    let looping_scene = scene(0.0, &layers);
    let looping = probe_solid(&looping_scene, origin, down, &IgnoreSet::new());
    assert!(looping.is_hit());
    assert_eq!(looping.material, Some(Material::Dirt));
    assert!(looping.position.y.abs() < 1e-4);
    assert_eq!(looping_scene.cast_count(), 4);

    let bounded_scene = scene(0.0, &layers);
    let bounded = probe_solid_bounded(&bounded_scene, origin, down, &IgnoreSet::new());
    assert!(!bounded.is_hit());
    assert!((bounded.position - (origin + down)).norm() < 1e-4);
    assert_eq!(bounded.normal, -Vector3::y());
    assert_eq!(bounded_scene.cast_count(), 3);
}

#[test]
fn material_probe_walks_through_foliage_and_wrong_material() {
    let mut scene = scene(0.0, &[(2.0, 0.3)]);
    scene.add(SceneBox::solid(Point3::new(-20.0, -5.0, -20.0), Point3::new(20.0, -4.0, 20.0), Material::Road));

    let origin = Point3::new(0.0, 8.0, 0.0);
    let road = probe_solid_with_material(&scene, origin, Vector3::new(0.0, -20.0, 0.0), &IgnoreSet::new(), Material::Road);
    assert!(road.is_hit());
    assert_eq!(road.material, Some(Material::Road));
    assert!((road.position.y + 4.0).abs() < 1e-4);
    assert!((road.distance - 12.0).abs() < 1e-4);
    // foliage, dirt, road
    assert_eq!(scene.cast_count(), 3);
}

#[test]
fn material_probe_respects_ray_length() {
    let scene = scene(0.0, &[]);
    let road = probe_solid_with_material(
        &scene,
        Point3::new(0.0, 5.0, 0.0),
        Vector3::new(0.0, -10.0, 0.0),
        &IgnoreSet::new(),
        Material::Road,
    );
    assert!(!road.is_hit());
    assert_eq!(road.position, Point3::new(0.0, -5.0, 0.0));
}
