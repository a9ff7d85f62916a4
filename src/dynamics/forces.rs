// ==============================================================================
// forces.rs — FORCE AGGREGATOR (VEHICLE SPACE, x = lateral, z = forward)
// ==============================================================================
// thrust = drag + rolling + braking + engine + nitro + tire_pop
//
// drag      -drag_coef * v * |v|        per-axis class scale, lateral amplified
//                                       while rolling backwards
// rolling   -roll_coef * v              per-axis class scale, lateral side also
//                                       scaled by traction; optional lateral
//                                       clamp to +-fraction * mass
// braking   coasting (or handbrake) above stop_speed: opposes forward velocity
//           at brake_coef * upgrade * mass, capped so that together with drag
//           and rolling it cannot carry v.z past zero within one step; at or
//           below stop_speed the vehicle is hard-stopped instead
// engine    throttle * final_drive * unit_conv * base_torque * ratio
//           * power_multiplier * upgrade; committed ratio forward, reverse
//           ratio backwards; * submerged_thrust_factor under water
// nitro     mass * nitro_force along a slightly pitched-down forward axis
// tire_pop  -v * mass * pop_drag * severity while average health < 0.999
//
// Airborne: the whole thrust is zero. Every term is sanitized before summing.
// ==============================================================================

use nalgebra::Vector3;
use serde::Serialize;

use crate::dynamics::sanitize::{finite_or, sanitize_vec, sign};
use crate::profile::VehicleProfile;

/// |throttle| below this counts as coasting.
pub const THROTTLE_DEADZONE: f32 = 0.01;
/// Average health below this means "tires popped".
pub const POPPED_HEALTH: f32 = 0.999;

#[derive(Debug, Clone, Copy)]
pub struct ForceInput {
    pub local_velocity: Vector3<f32>,
    pub mass: f32,
    pub throttle: f32,
    pub handbrake: bool,
    pub traction: f32,
    /// Forward ratio of the committed gear.
    pub committed_ratio: f32,
    pub nitro: bool,
    /// Average tire health in [0, 1].
    pub tire_health: f32,
    pub submerged: bool,
    pub airborne: bool,
    pub engine_upgrade: f32,
    pub brake_upgrade: f32,
    /// Step length the forces will be applied over, seconds.
    pub dt: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ForceBreakdown {
    pub drag: Vector3<f32>,
    pub rolling: Vector3<f32>,
    pub braking: Vector3<f32>,
    pub engine: Vector3<f32>,
    pub nitro: Vector3<f32>,
    pub tire_pop: Vector3<f32>,
    /// Sum of the terms above, vehicle space, weight units.
    pub thrust: Vector3<f32>,
    /// Planar velocity must be zeroed this tick.
    pub hard_stop: bool,
    pub gravity_scale: f32,
    pub effective_throttle: f32,
}

/// Health of one tire: ramps 0 -> 1 over `duration` seconds after a pop.
pub fn tire_health(popped_at: Option<f64>, now: f64, duration: f32) -> f32 {
    match popped_at {
        None => 1.0,
        Some(t) => finite_or(((now - t) / duration as f64) as f32, 1.0).clamp(0.0, 1.0),
    }
}

pub fn tires_popped(average_health: f32) -> bool {
    average_health < POPPED_HEALTH
}

pub fn aggregate(profile: &VehicleProfile, input: &ForceInput) -> ForceBreakdown {
    let gravity_scale = if input.nitro { profile.nitro_gravity_scale } else { 1.0 };

    if input.airborne {
        return ForceBreakdown {
            gravity_scale,
            ..ForceBreakdown::default()
        };
    }

    let v = sanitize_vec(Vector3::new(input.local_velocity.x, 0.0, input.local_velocity.z));
    let speed = v.norm();
    let mass = finite_or(input.mass, profile.default_mass);
    let traction = finite_or(input.traction, profile.traction.floor);
    let health = finite_or(input.tire_health, 1.0).clamp(0.0, 1.0);
    let popped = tires_popped(health);

    // drag
    let reversing = v.z < 0.0;
    let lateral_drag = profile.drag_scale.lateral * if reversing { profile.reverse_lateral_drag } else { 1.0 };
    let drag = sanitize_vec(Vector3::new(
        -profile.drag_coefficient * v.x * speed * lateral_drag,
        0.0,
        -profile.drag_coefficient * v.z * speed * profile.drag_scale.forward,
    ));

    // rolling resistance
    let mut lateral_roll = -profile.rolling_coefficient * v.x * profile.rolling_scale.lateral * traction;
    if let Some(fraction) = profile.lateral_rolling_clamp {
        let limit = (fraction * mass).abs();
        lateral_roll = finite_or(lateral_roll, 0.0).clamp(-limit, limit);
    }
    let rolling = sanitize_vec(Vector3::new(
        lateral_roll,
        0.0,
        -profile.rolling_coefficient * v.z * profile.rolling_scale.forward,
    ));

    // braking / hard stop
    let throttle = if popped || input.handbrake { 0.0 } else { finite_or(input.throttle, 0.0).clamp(-1.0, 1.0) };
    let coasting = throttle.abs() < THROTTLE_DEADZONE;
    let mut braking = Vector3::zeros();
    let mut hard_stop = false;
    if coasting {
        if speed > profile.stop_speed {
            let mut magnitude = profile.brake_coefficient * finite_or(input.brake_upgrade, 1.0) * mass;
            let dt = finite_or(input.dt, 0.0);
            if dt > 0.0 {
                // weight units that bring v.z to zero over this step
                let stopping = finite_or(v.z.abs() * mass / (profile.gravity * dt), magnitude);
                let resisting = (drag.z + rolling.z).abs();
                magnitude = magnitude.min((stopping - resisting).max(0.0));
            }
            braking = sanitize_vec(Vector3::new(0.0, 0.0, -sign(v.z) * magnitude));
        } else {
            hard_stop = true;
        }
    }

    // engine
    let ratio = if throttle >= 0.0 { input.committed_ratio } else { profile.gears.reverse() };
    let mut engine_force = throttle
        * profile.gears.final_drive()
        * profile.speed_unit_conversion
        * profile.base_torque
        * ratio
        * profile.power_multiplier
        * finite_or(input.engine_upgrade, 1.0);
    if input.submerged {
        engine_force *= profile.submerged_thrust_factor;
    }
    let engine = sanitize_vec(Vector3::new(0.0, 0.0, engine_force));

    // nitro
    let nitro = if input.nitro {
        let dir = Vector3::new(0.0, -profile.nitro_pitch.sin(), profile.nitro_pitch.cos());
        sanitize_vec(dir * mass * profile.nitro_force)
    } else {
        Vector3::zeros()
    };

    // tire pop correction
    let tire_pop = if popped {
        let severity = finite_or((1.0 - health) / (1.0 - profile.tire_pop_threshold), 1.0).clamp(0.0, 1.0);
        sanitize_vec(-v * mass * profile.tire_pop_drag * severity)
    } else {
        Vector3::zeros()
    };

    let thrust = sanitize_vec(drag + rolling + braking + engine + nitro + tire_pop);

    ForceBreakdown {
        drag,
        rolling,
        braking,
        engine,
        nitro,
        tire_pop,
        thrust,
        hard_stop,
        gravity_scale,
        effective_throttle: throttle,
    }
}
