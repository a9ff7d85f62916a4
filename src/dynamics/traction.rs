// ==============================================================================
// traction.rs — LATERAL GRIP SCALAR + DRIFT WINDOW
// ==============================================================================
// speed_factor = tanh(|v_planar| * speed_gain)        in [0, 1)
//
// Drift trigger (refreshes last_drift only):
//   - heading opposes the lateral velocity and |v_lat| > drift_lateral_speed
//   - popped tires and |v_planar| > popped_drift_speed
//
// Drift window: Idle / Active. Active while now < last_drift + drift_window,
// left purely by time decay; releasing the input does not end it.
//
// target = (1 - speed_factor)^2 while drifting (held or active), else 1,
//          floored, then scaled by wet_factor in precipitation, floored again.
//
// Grip is lost fast (loss_rate) and recovered slowly (recovery_rate); both
// rates are per reference step and re-scaled for the actual dt.
// ==============================================================================

use serde::Serialize;
use tracing::trace;

use crate::dynamics::sanitize::finite_or;
use crate::dynamics::step_rate;
use crate::profile::TractionTuning;

#[derive(Debug, Clone, Copy, Default)]
pub struct TractionInput {
    pub lateral_speed: f32,
    pub forward_speed: f32,
    /// Smoothed heading input, [-1, 1].
    pub heading: f32,
    pub drift_hold: bool,
    pub tires_popped: bool,
    pub precipitation: bool,
    pub now: f64,
    pub dt: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TractionOutput {
    pub traction: f32,
    pub target: f32,
    pub drift_active: bool,
    pub triggered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Traction {
    value: f32,
    last_drift: Option<f64>,
}

impl Default for Traction {
    fn default() -> Self {
        Self { value: 1.0, last_drift: None }
    }
}

#[inline]
pub fn speed_factor(speed: f32, gain: f32) -> f32 {
    finite_or((speed.abs() * gain).tanh(), 0.0)
}

impl Traction {
    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn last_drift(&self) -> Option<f64> {
        self.last_drift
    }

    /// Records a drift trigger at `now`.
    pub fn trigger(&mut self, now: f64) {
        self.last_drift = Some(now);
    }

    pub fn is_drift_active(&self, now: f64, window: f64) -> bool {
        self.last_drift.is_some_and(|t| now >= t && now < t + window)
    }

    pub fn update(&mut self, tuning: &TractionTuning, input: &TractionInput) -> TractionOutput {
        let lateral = finite_or(input.lateral_speed, 0.0);
        let forward = finite_or(input.forward_speed, 0.0);
        let heading = finite_or(input.heading, 0.0);
        let speed = (lateral * lateral + forward * forward).sqrt();

        let countersteer = heading * lateral < 0.0 && lateral.abs() > tuning.drift_lateral_speed;
        let involuntary = input.tires_popped && speed > tuning.popped_drift_speed;
        let triggered = countersteer || involuntary;
        if triggered {
            trace!(lateral, speed, involuntary, "drift triggered");
            self.trigger(input.now);
        }

        let drift_active = self.is_drift_active(input.now, tuning.drift_window);

        let mut target = if input.drift_hold || drift_active {
            let grip = 1.0 - speed_factor(speed, tuning.speed_gain);
            (grip * grip).max(tuning.floor)
        } else {
            1.0
        };
        if input.precipitation {
            target *= tuning.wet_factor;
        }
        let target = target.clamp(tuning.floor, 1.0);

        let rate = if self.value > target { tuning.loss_rate } else { tuning.recovery_rate };
        let next = self.value + (target - self.value) * step_rate(rate, input.dt);
        self.value = finite_or(next, target).clamp(tuning.floor, 1.0);

        TractionOutput {
            traction: self.value,
            target,
            drift_active,
            triggered,
        }
    }
}
