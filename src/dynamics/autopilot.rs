// ==============================================================================
// autopilot.rs — LANE KEEPING (ROAD-FRAME PROPORTIONAL CONTROLLER)
// ==============================================================================
// 1) probe forward-down from the body for a solid Road surface
// 2) body position -> road-local frame; lane = floor(x / lane_width)
// 3) target = lane centre, `lookahead` further along the road in the direction
//    the vehicle is travelling
// 4) error = dot(unit(target - body), vehicle right)       (signed, [-1, 1])
// 5) heading  -= clamp(error * steer_gain, -1, 1)
//    throttle += 1 - |error|^(1/6) - |error|^4 * excursion_penalty
//    both clamped to [-1, 1]
// No road under the probe: inputs pass through untouched.
// ==============================================================================

use nalgebra::{Isometry3, Point3, Vector3};
use serde::Serialize;

use crate::dynamics::sanitize::{finite_or, safe_normalize};
use crate::ground::{probe_solid_with_material, IgnoreSet, Material, WorldQuery};
use crate::profile::AutopilotTuning;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AutopilotOutput {
    pub heading: f32,
    pub throttle: f32,
    /// A road was found and the correction was applied.
    pub engaged: bool,
    pub lane: i32,
    pub error: f32,
}

impl AutopilotOutput {
    fn pass_through(heading: f32, throttle: f32) -> Self {
        Self { heading, throttle, engaged: false, lane: 0, error: 0.0 }
    }
}

/// Lane index and lane-centre x for a road-local lateral offset.
pub fn lane_of(local_x: f32, lane_width: f32) -> (i32, f32) {
    let lane = (local_x / lane_width).floor();
    let lane = finite_or(lane, 0.0);
    (lane as i32, lane * lane_width + lane_width * 0.5)
}

/// Signed lateral error towards `target`, positive when it lies to the right.
pub fn lateral_error(pose: &Isometry3<f32>, target: &Point3<f32>) -> f32 {
    let to_target = target.coords - pose.translation.vector;
    match safe_normalize(to_target) {
        Some(dir) => dir.dot(&(pose.rotation * Vector3::x())).clamp(-1.0, 1.0),
        None => 0.0,
    }
}

pub fn blend(tuning: &AutopilotTuning, heading: f32, throttle: f32, error: f32) -> (f32, f32) {
    let e = finite_or(error, 0.0).abs();
    let steer = (error * tuning.steer_gain).clamp(-1.0, 1.0);
    let push = 1.0 - e.powf(1.0 / 6.0) - e.powi(4) * tuning.excursion_penalty;
    (
        finite_or(heading - steer, 0.0).clamp(-1.0, 1.0),
        finite_or(throttle + push, 0.0).clamp(-1.0, 1.0),
    )
}

pub fn steer<W: WorldQuery + ?Sized>(
    world: &W,
    tuning: &AutopilotTuning,
    pose: &Isometry3<f32>,
    ignore: &IgnoreSet,
    heading: f32,
    throttle: f32,
) -> AutopilotOutput {
    let forward = pose.rotation * Vector3::z();
    let up = pose.rotation * Vector3::y();
    let Some(dir) = safe_normalize(forward - up) else {
        return AutopilotOutput::pass_through(heading, throttle);
    };

    let origin = Point3::from(pose.translation.vector);
    let probe = probe_solid_with_material(world, origin, dir * tuning.probe_length, ignore, Material::Road);
    let Some(road) = probe.frame.filter(|_| probe.is_hit()) else {
        return AutopilotOutput::pass_through(heading, throttle);
    };

    let local = road.inverse_transform_point(&origin);
    let (lane, centre) = lane_of(local.x, tuning.lane_width);

    let road_forward = road.rotation * Vector3::z();
    let ahead = if road_forward.dot(&forward) < 0.0 { -tuning.lookahead } else { tuning.lookahead };
    let target = road * Point3::new(centre, local.y, local.z + ahead);

    let error = lateral_error(pose, &target);
    let (heading, throttle) = blend(tuning, heading, throttle, error);

    AutopilotOutput { heading, throttle, engaged: true, lane, error }
}
