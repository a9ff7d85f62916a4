//! dynamics - per-tick vehicle models (pure functions + small state machines)
//!
//! Everything here is engine-agnostic: inputs are plain numbers and a
//! [`WorldQuery`](crate::ground::WorldQuery), outputs are forces in vehicle or
//! body space. The host decides how to apply them.

pub mod autopilot;
pub mod drivetrain;
pub mod forces;
pub mod sanitize;
pub mod suspension;
pub mod traction;

use sanitize::finite_or;

/// Step length the per-tick rates and the suspension curve are tuned against.
pub const REFERENCE_STEP: f32 = 1.0 / 60.0;

/// Converts a per-reference-step blend rate into the rate for a step of `dt`.
///
/// `1 - (1 - rate)^(dt / REFERENCE_STEP)`, so n short steps approach a target
/// exactly as far as one long step of the same total length.
pub fn step_rate(rate: f32, dt: f32) -> f32 {
    if !dt.is_finite() || dt <= 0.0 {
        return 0.0;
    }
    let rate = finite_or(rate, 0.0).clamp(0.0, 1.0);
    finite_or(1.0 - (1.0 - rate).powf(dt / REFERENCE_STEP), 0.0).clamp(0.0, 1.0)
}
