use std::sync::Arc;

use drive_physics::dynamics::drivetrain::RAD_PER_SEC_TO_RPM;
use drive_physics::ground::{BoxScene, Environment, SceneBox};
use drive_physics::profile::GearTable;
use drive_physics::{DriverInput, Material, ProfileError, TickContext, TickOutcome, Vehicle, VehicleProfile};
use nalgebra::{Isometry3, Point3, Vector3};

const DT: f32 = 1.0 / 60.0;

fn ctx(step: u32) -> TickContext {
    TickContext { dt: DT, now: f64::from(step) * f64::from(DT), precipitation: false }
}

fn car(profile: VehicleProfile, x: f32, y: f32) -> Vehicle {
    Vehicle::new(Arc::new(profile), Isometry3::translation(x, y, 0.0)).unwrap()
}

#[test]
fn zero_input_from_rest_never_creeps() {
    let scene = BoxScene::flat_ground(200.0, Material::Road);
    let mut v = car(VehicleProfile::sedan(), 0.0, 0.8);

    for step in 0..90 {
        let out = match v.tick(&scene, &DriverInput::default(), &ctx(step)) {
            TickOutcome::Applied(out) => out,
            TickOutcome::Skipped => panic!("tick {step} skipped"),
        };
        assert!(out.hard_stop);
        v.integrate(&out, DT);
        assert_eq!(v.state.linvel.x, 0.0);
        assert_eq!(v.state.linvel.z, 0.0);
    }
    assert_eq!(v.state.pose.translation.vector.x, 0.0);
    assert_eq!(v.state.pose.translation.vector.z, 0.0);
}

#[test]
fn coasting_on_long_steps_comes_to_rest() {
    let scene = BoxScene::flat_ground(200.0, Material::Road);
    let mut v = car(VehicleProfile::sedan(), 0.0, 0.8);
    for step in 0..120 {
        let outcome = v.tick(&scene, &DriverInput::default(), &ctx(step));
        v.integrate(outcome.applied().unwrap(), DT);
    }

    v.state.linvel.z = 1.2;
    let dt = 0.4;
    let mut now = 2.0;
    for _ in 0..12 {
        now += f64::from(dt);
        let tick = TickContext { dt, now, precipitation: false };
        let outcome = v.tick(&scene, &DriverInput::default(), &tick);
        v.integrate(outcome.applied().unwrap(), dt);
    }
    assert!(v.state.linvel.z.abs() < 0.05, "still moving: {}", v.state.linvel.z);
}

#[test]
fn reported_rpm_in_first_gear_uses_its_ratio_directly() {
    let mut profile = VehicleProfile::sedan();
    profile.gears = GearTable::new(vec![3.0, 3.2, 2.5, 1.5, 1.0]).unwrap();
    let scene = BoxScene::flat_ground(200.0, Material::Road);
    let mut v = car(profile, 0.0, 0.8);
    v.state.linvel = Vector3::new(0.0, 0.0, 10.0);

    let outcome = v.tick(&scene, &DriverInput { forward: 1.0, ..Default::default() }, &ctx(0));
    let out = outcome.applied().unwrap();
    let p = v.profile();
    let engine_speed = 10.0 / p.wheel_radius * p.speed_unit_conversion;
    let expected = engine_speed * 3.0 * 2.5 * RAD_PER_SEC_TO_RPM;

    assert_eq!(out.gear, 1);
    assert_eq!(out.shift_progress, 0.0);
    assert!((out.rpm - expected).abs() < 1e-2, "rpm {} != {expected}", out.rpm);
    assert_eq!(out.rpm, out.full_rpm);
}

#[test]
fn airborne_vehicle_gets_no_thrust_and_no_wheel_force() {
    let scene = BoxScene::flat_ground(200.0, Material::Road);
    let mut v = car(VehicleProfile::sedan(), 0.0, 50.0);
    v.state.linvel = Vector3::new(0.0, -3.0, 25.0);

    let input = DriverInput { forward: 1.0, nitro_hold: true, ..Default::default() };
    let outcome = v.tick(&scene, &input, &ctx(0));
    let out = outcome.applied().unwrap();
    assert!(out.airborne);
    assert_eq!(out.thrust, Vector3::zeros());
    assert!(out.wheels.iter().all(|w| !w.contact.grounded && w.force == Vector3::zeros()));
    assert_eq!(out.gravity_scale, v.profile().nitro_gravity_scale);
}

#[test]
fn airborne_steering_keeps_partial_authority() {
    let scene = BoxScene::flat_ground(200.0, Material::Road);
    let input = DriverInput { forward: 1.0, heading: 1.0, ..Default::default() };

    let mut ground = car(VehicleProfile::sedan(), 0.0, 0.8);
    let mut air = car(VehicleProfile::sedan(), 0.0, 50.0);
    for v in [&mut ground, &mut air] {
        v.state.linvel = Vector3::new(0.0, 0.0, 20.0);
        v.state.heading = 1.0;
    }
    let g = ground.tick(&scene, &input, &ctx(0));
    let a = air.tick(&scene, &input, &ctx(0));
    let (g, a) = (g.applied().unwrap(), a.applied().unwrap());

    let ratio = a.steer_torque.y / g.steer_torque.y;
    assert!((ratio - air.profile().airborne_steer_authority).abs() < 1e-4);
}

#[test]
fn nan_inputs_and_velocities_stay_contained() {
    let scene = BoxScene::flat_ground(200.0, Material::Road);
    let mut v = car(VehicleProfile::sports(), 0.0, 0.8);
    let input = DriverInput { forward: f32::NAN, heading: f32::INFINITY, ..Default::default() };

    for step in 0..30 {
        let outcome = v.tick(&scene, &input, &ctx(step));
        let out = outcome.applied().unwrap();
        assert!(out.thrust.iter().all(|c| c.is_finite()));
        assert!(out.steer_torque.iter().all(|c| c.is_finite()));
        assert!(out.rpm.is_finite() && out.traction.is_finite());
        v.integrate(out, DT);
    }

    v.state.pose.translation.vector.y = f32::NAN;
    assert_eq!(v.tick(&scene, &DriverInput::default(), &ctx(31)), TickOutcome::Skipped);
}

#[test]
fn invalid_profiles_never_start() {
    let mut short = VehicleProfile::sedan();
    short.gears = serde_json::from_str("[3.0, 3.2]").unwrap();
    let err = Vehicle::new(Arc::new(short), Isometry3::identity()).unwrap_err();
    assert!(matches!(err, ProfileError::GearTableTooShort(2)));

    let mut bad_travel = VehicleProfile::sedan();
    bad_travel.suspension.travel_height = 0.0;
    assert!(Vehicle::new(Arc::new(bad_travel), Isometry3::identity()).is_err());
}

#[test]
fn countersteer_slide_drops_traction() {
    let scene = BoxScene::flat_ground(200.0, Material::Road);
    let mut v = car(VehicleProfile::sedan(), 0.0, 0.8);
    v.state.linvel = Vector3::new(-12.0, 0.0, 25.0);
    v.state.heading = 1.0;

    let input = DriverInput { forward: 1.0, heading: 1.0, ..Default::default() };
    let first = v.tick(&scene, &input, &ctx(0));
    assert!(first.applied().unwrap().drift_active);

    let mut last = 1.0;
    for step in 1..10 {
        let outcome = v.tick(&scene, &input, &ctx(step));
        last = outcome.applied().unwrap().traction;
    }
    assert!(last < 0.9);
    assert!(last >= v.profile().traction.floor);
}

#[test]
fn roof_overhead_reports_tunnel() {
    let mut scene = BoxScene::flat_ground(200.0, Material::Road);
    scene.add(SceneBox::solid(Point3::new(-15.0, 8.0, -40.0), Point3::new(15.0, 9.0, 40.0), Material::Concrete));
    let mut v = car(VehicleProfile::sedan(), 0.0, 0.8);
    let outcome = v.tick(&scene, &DriverInput::default(), &ctx(0));
    assert_eq!(outcome.applied().unwrap().environment, Environment::Tunnel);
    assert_eq!(v.state.environment, Environment::Tunnel);
}

#[test]
fn autopilot_turns_towards_the_lane_centre() {
    let scene = BoxScene::flat_ground(500.0, Material::Road);
    let mut v = car(VehicleProfile::sedan(), 2.0, 0.8);
    v.state.linvel = Vector3::new(0.0, 0.0, 15.0);
    let input = DriverInput { autopilot: true, ..Default::default() };

    let outcome = v.tick(&scene, &input, &ctx(0));
    let first = outcome.applied().unwrap();
    let ap = first.autopilot.unwrap();
    assert!(ap.engaged);
    assert_eq!(ap.lane, 0);
    assert!(ap.error > 0.0);
    assert!(first.steer_torque.y > 0.0);
    v.integrate(first, DT);

    for step in 1..60 {
        let outcome = v.tick(&scene, &input, &ctx(step));
        v.integrate(outcome.applied().unwrap(), DT);
        if step == 20 {
            // nose swung towards +x
            let forward = v.state.pose.rotation * Vector3::z();
            assert!(forward.x > 0.0);
        }
    }
    assert!(v.state.pose.translation.vector.x > 2.0);
}

#[test]
fn autopilot_off_road_passes_input_through() {
    let scene = BoxScene::flat_ground(200.0, Material::Grass);
    let mut v = car(VehicleProfile::sedan(), 2.0, 0.8);
    let input = DriverInput { autopilot: true, forward: 0.5, ..Default::default() };
    let outcome = v.tick(&scene, &input, &ctx(0));
    let out = outcome.applied().unwrap();
    assert!(!out.autopilot.unwrap().engaged);
    assert_eq!(out.throttle, 0.5);
}
