// ==============================================================================
// suspension.rs — RAYCAST SUSPENSION (PER-WHEEL SPRING + DAMPER)
// ------------------------------------------------------------------------------
// For each wheel:
// 1) probe along the body's down axis from the attachment point for up to the
//    travel height (probe_solid_bounded)
// 2) compression = distance to the hit, clamped to [0, travel]
// 3) spring = (travel - compression)^2 * (spring_force / travel^2)
//    quadratic, stiffer near full compression, exactly 0 at full extension
// 4) damper = vertical_velocity * damping, only when |v| > threshold
//    (no damper contribution at rest, so the body does not buzz)
// 5) clamp to +-0.5 * mass
// 6) scale by dt / REFERENCE_STEP for sub-reference steps (never boosted)
// 7) no solid ground -> exactly zero force (airborne)
//
// Forces are in weight units along the body up axis. This module only measures
// and computes; the host applies the result.
// ==============================================================================

use nalgebra::{Isometry3, Point3, Vector3};
use serde::Serialize;

use crate::dynamics::sanitize::finite_or;
use crate::ground::{probe_solid_bounded, IgnoreSet, Material, SurfaceId, WorldQuery};
use crate::profile::SuspensionTuning;

pub use crate::dynamics::REFERENCE_STEP;

/// Vertical wheel speed below which the damper is inactive.
pub const DAMPING_SPEED_THRESHOLD: f32 = 0.1;
/// Per-wheel force limit as a fraction of mass.
pub const WHEEL_FORCE_LIMIT: f32 = 0.5;

pub const FALLBACK_SPRING_FORCE: f32 = 4000.0;
pub const FALLBACK_DAMPING: f32 = 40.0;

#[derive(Debug, Clone, Copy)]
pub struct SuspensionParams {
    pub travel_height: f32,
    pub mass: f32,
    pub spring_force: f32,
    pub damping: f32,
}

/// Spring force and damping coefficient for `mass`. Non-finite results collapse
/// to [`FALLBACK_SPRING_FORCE`] / [`FALLBACK_DAMPING`].
pub fn derive_coefficients(mass: f32, tuning: &SuspensionTuning) -> (f32, f32) {
    (
        finite_or(mass * tuning.stiffness, FALLBACK_SPRING_FORCE),
        finite_or(mass * tuning.damping, FALLBACK_DAMPING),
    )
}

/// Quadratic spring curve, before damping, clamping and time scaling.
#[inline]
pub fn spring_curve(travel_height: f32, compression: f32, spring_force: f32) -> f32 {
    let c = compression.clamp(0.0, travel_height);
    let free = travel_height - c;
    finite_or(free * free * (spring_force / (travel_height * travel_height)), 0.0)
}

/// Frame-time normalisation: short steps scale the force down, long steps use 1.
#[inline]
pub fn time_scale(dt: f32) -> f32 {
    if dt < REFERENCE_STEP {
        finite_or(dt / REFERENCE_STEP, 0.0).clamp(0.0, 1.0)
    } else {
        1.0
    }
}

/// Steps 3-6 for a wheel that found ground.
pub fn compute_suspension_force(compression: f32, vertical_velocity: f32, p: &SuspensionParams, dt: f32) -> f32 {
    let mut force = spring_curve(p.travel_height, compression, p.spring_force);

    let v = finite_or(vertical_velocity, 0.0);
    if v.abs() > DAMPING_SPEED_THRESHOLD {
        force -= v * p.damping;
    }

    let limit = (WHEEL_FORCE_LIMIT * p.mass).abs();
    let force = finite_or(force, 0.0).clamp(-limit, limit);

    force * time_scale(dt)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SuspensionContact {
    pub grounded: bool,
    pub compression: f32,
    /// Force along the body up axis (weight units).
    pub force: f32,
    pub hit_point: Point3<f32>,
    pub material: Option<Material>,
    pub surface: Option<SurfaceId>,
}

impl SuspensionContact {
    fn airborne(end: Point3<f32>, travel_height: f32) -> Self {
        Self {
            grounded: false,
            compression: travel_height,
            force: 0.0,
            hit_point: end,
            material: None,
            surface: None,
        }
    }
}

/// Rigid-body motion of the chassis for the current tick.
#[derive(Debug, Clone, Copy)]
pub struct BodyMotion<'a> {
    pub pose: &'a Isometry3<f32>,
    pub linvel: Vector3<f32>,
    pub angvel: Vector3<f32>,
}

impl BodyMotion<'_> {
    /// v(p) = v + w x (p - c), with the body origin as the reference point.
    pub fn point_velocity(&self, p: &Point3<f32>) -> Vector3<f32> {
        let r = p.coords - self.pose.translation.vector;
        self.linvel + self.angvel.cross(&r)
    }
}

pub fn solve_wheel<W: WorldQuery + ?Sized>(
    world: &W,
    body: &BodyMotion<'_>,
    attachment: &Point3<f32>,
    params: &SuspensionParams,
    ignore: &IgnoreSet,
    dt: f32,
) -> SuspensionContact {
    let up = body.pose.rotation * Vector3::y();
    let origin = body.pose * attachment;
    let travel = params.travel_height;

    let probe = probe_solid_bounded(world, origin, -up * travel, ignore);
    if !probe.is_hit() {
        return SuspensionContact::airborne(probe.position, travel);
    }

    let compression = probe.distance.clamp(0.0, travel);
    let vertical_velocity = body.point_velocity(&origin).dot(&up);
    let force = compute_suspension_force(compression, vertical_velocity, params, dt);

    SuspensionContact {
        grounded: true,
        compression,
        force,
        hit_point: probe.position,
        material: probe.material,
        surface: probe.hit,
    }
}
