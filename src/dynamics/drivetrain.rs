// ==============================================================================
// drivetrain.rs — GEAR SELECTION + RPM (SHIFT STATE MACHINE)
// ==============================================================================
// engine_speed = |forward_speed| / wheel_radius * unit_conversion
// full_rpm     = engine_speed * final_drive * ratio(target gear) * 60 / 2pi
// rpm          = engine_speed * final_drive * interpolated_ratio * 60 / 2pi
//
// full_rpm always uses the target gear's direct ratio and only drives shift
// decisions; rpm is the reported value and follows the shift blend.
//
// States:
//   Steady { gear }
//   Shifting { from, to, elapsed }   elapsed seconds since the shift began
//
//   Steady   -> Shifting  on a shift decision (automatic or manual request)
//   Shifting -> Steady    when elapsed >= shift_duration; `to` becomes the
//                         committed gear
//
// A shift in progress is never interrupted. While shifting the reported ratio
// is ratio_from * (1 - t^2) + ratio_to * t^2 with t = elapsed / shift_duration
// (slow start, fast finish).
// ==============================================================================

use std::f32::consts::PI;

use serde::Serialize;
use tracing::debug;

use crate::dynamics::sanitize::finite_or;
use crate::profile::{TransmissionMode, VehicleProfile};

/// rad/s -> rev/min
pub const RAD_PER_SEC_TO_RPM: f32 = 60.0 / (2.0 * PI);
/// Slack (seconds) on the commit test so accumulated step rounding cannot
/// hold a shift one tick past its duration.
pub const SHIFT_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ShiftState {
    Steady { gear: u8 },
    Shifting { from: u8, to: u8, elapsed: f64 },
}

impl ShiftState {
    /// Gear the drivetrain is in or heading to.
    pub fn target_gear(&self) -> u8 {
        match *self {
            ShiftState::Steady { gear } => gear,
            ShiftState::Shifting { to, .. } => to,
        }
    }

    /// Gear used for thrust until a shift completes.
    pub fn committed_gear(&self) -> u8 {
        match *self {
            ShiftState::Steady { gear } => gear,
            ShiftState::Shifting { from, .. } => from,
        }
    }

    /// Shift fraction in [0, 1] for a shift lasting `duration` seconds.
    pub fn progress(&self, duration: f32) -> f32 {
        match *self {
            ShiftState::Steady { .. } => 0.0,
            ShiftState::Shifting { elapsed, .. } => finite_or((elapsed / f64::from(duration)) as f32, 1.0).clamp(0.0, 1.0),
        }
    }
}

/// Driver shift request (manual transmission only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShiftRequest {
    #[default]
    None,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DrivetrainInput {
    pub forward_speed: f32,
    pub throttle: f32,
    pub dt: f32,
    pub request: ShiftRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DrivetrainOutput {
    pub gear: u8,
    pub committed_gear: u8,
    pub shift_progress: f32,
    /// Reported (interpolated) forward ratio.
    pub ratio: f32,
    /// Direct ratio of the committed gear, used for thrust.
    pub committed_ratio: f32,
    pub full_rpm: f32,
    pub rpm: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Drivetrain {
    state: ShiftState,
    last_full_rpm: f32,
}

impl Default for Drivetrain {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
pub fn blend_ratio(from: f32, to: f32, t: f32) -> f32 {
    let t2 = t * t;
    from * (1.0 - t2) + to * t2
}

impl Drivetrain {
    pub fn new() -> Self {
        Self {
            state: ShiftState::Steady { gear: 1 },
            last_full_rpm: 0.0,
        }
    }

    pub fn state(&self) -> ShiftState {
        self.state
    }

    pub fn update(&mut self, profile: &VehicleProfile, input: &DrivetrainInput) -> DrivetrainOutput {
        let gears = &profile.gears;
        let final_drive = gears.final_drive();
        let engine_speed = finite_or(
            input.forward_speed.abs() / profile.wheel_radius * profile.speed_unit_conversion,
            0.0,
        );
        let to_rpm = |ratio: f32| finite_or(engine_speed * final_drive * ratio * RAD_PER_SEC_TO_RPM, 0.0);

        if profile.transmission == TransmissionMode::Fixed {
            let ratio = if input.throttle < 0.0 { gears.reverse() } else { gears.forward(1) };
            let rpm = to_rpm(ratio);
            self.state = ShiftState::Steady { gear: 1 };
            self.last_full_rpm = rpm;
            return DrivetrainOutput {
                gear: 1,
                committed_gear: 1,
                shift_progress: 0.0,
                ratio,
                committed_ratio: ratio,
                full_rpm: rpm,
                rpm,
            };
        }

        // 1) advance a shift in progress
        if let ShiftState::Shifting { from, to, elapsed } = self.state {
            let elapsed = elapsed + f64::from(finite_or(input.dt, 0.0).max(0.0));
            self.state = if elapsed + SHIFT_EPSILON >= f64::from(profile.shift_duration) {
                debug!(from, to, "gear committed");
                ShiftState::Steady { gear: to }
            } else {
                ShiftState::Shifting { from, to, elapsed }
            };
        }

        // 2) decision signal uses the target gear's direct ratio
        let full_rpm = to_rpm(gears.forward(self.state.target_gear()));

        // 3) new shifts only start from Steady
        if let ShiftState::Steady { gear } = self.state {
            let next = match profile.transmission {
                TransmissionMode::Automatic => self.auto_shift(profile, gear, full_rpm, input.throttle),
                TransmissionMode::Manual => manual_shift(gear, gears.top_gear(), input.request),
                TransmissionMode::Fixed => None,
            };
            if let Some(to) = next {
                self.state = ShiftState::Shifting { from: gear, to, elapsed: 0.0 };
            }
        }
        self.last_full_rpm = full_rpm;

        // 4) reported ratio / rpm
        let committed_ratio = gears.forward(self.state.committed_gear());
        let ratio = match self.state {
            ShiftState::Steady { gear } => gears.forward(gear),
            ShiftState::Shifting { from, to, .. } => {
                blend_ratio(gears.forward(from), gears.forward(to), self.state.progress(profile.shift_duration))
            }
        };

        DrivetrainOutput {
            gear: self.state.target_gear(),
            committed_gear: self.state.committed_gear(),
            shift_progress: self.state.progress(profile.shift_duration),
            ratio,
            committed_ratio,
            full_rpm,
            rpm: to_rpm(ratio),
        }
    }

    fn auto_shift(&self, profile: &VehicleProfile, gear: u8, full_rpm: f32, throttle: f32) -> Option<u8> {
        let rising = full_rpm > self.last_full_rpm;
        let falling = full_rpm < self.last_full_rpm;
        let top = profile.gears.top_gear();

        if throttle > 0.0 && rising && full_rpm > profile.upshift_rpm && gear < top {
            Some(gear + 1)
        } else if falling && full_rpm < profile.downshift_rpm && gear > 1 {
            Some(gear - 1)
        } else {
            None
        }
    }
}

fn manual_shift(gear: u8, top: u8, request: ShiftRequest) -> Option<u8> {
    match request {
        ShiftRequest::Up if gear < top => Some(gear + 1),
        ShiftRequest::Down if gear > 1 => Some(gear - 1),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::GearTable;

    fn manual_profile() -> VehicleProfile {
        VehicleProfile {
            transmission: TransmissionMode::Manual,
            gears: GearTable::new(vec![3.4, 3.0, 2.5, 1.8, 1.3]).unwrap(),
            ..VehicleProfile::sedan()
        }
    }

    fn step(dt: &mut Drivetrain, p: &VehicleProfile, speed: f32, throttle: f32, dt_s: f32, request: ShiftRequest) -> DrivetrainOutput {
        dt.update(p, &DrivetrainInput { forward_speed: speed, throttle, dt: dt_s, request })
    }

    #[test]
    fn steady_gear_reports_direct_ratio() {
        let p = manual_profile();
        let mut d = Drivetrain::new();
        let out = step(&mut d, &p, 10.0, 1.0, 1.0 / 60.0, ShiftRequest::None);

        assert_eq!(out.gear, 1);
        assert_eq!(out.ratio, 2.5);
        let expected = 10.0 / p.wheel_radius * 3.4 * 2.5 * RAD_PER_SEC_TO_RPM;
        assert!((out.rpm - expected).abs() < 1e-2);
        assert_eq!(out.rpm, out.full_rpm);
    }

    #[test]
    fn shift_blends_squared_and_commits_after_duration() {
        let p = manual_profile();
        let mut d = Drivetrain::new();

        let start = step(&mut d, &p, 10.0, 1.0, 1.0 / 60.0, ShiftRequest::Up);
        assert_eq!(d.state(), ShiftState::Shifting { from: 1, to: 2, elapsed: 0.0 });
        assert_eq!(start.ratio, 2.5);
        assert_eq!(start.committed_gear, 1);
        assert_eq!(start.gear, 2);

        let mid = step(&mut d, &p, 10.0, 1.0, 0.13, ShiftRequest::None);
        assert!((mid.shift_progress - 0.5).abs() < 1e-6);
        assert!((mid.ratio - (2.5 * (1.0 - 0.25) + 1.8 * 0.25)).abs() < 1e-6);
        // full rpm already uses the target ratio
        assert!(mid.full_rpm < mid.rpm);

        let done = step(&mut d, &p, 10.0, 1.0, 0.13, ShiftRequest::None);
        assert_eq!(d.state(), ShiftState::Steady { gear: 2 });
        assert_eq!(done.ratio, 1.8);
        assert_eq!(done.shift_progress, 0.0);
        assert_eq!(done.committed_gear, 2);
    }

    #[test]
    fn shift_is_not_complete_before_duration() {
        let p = manual_profile();
        let mut d = Drivetrain::new();
        step(&mut d, &p, 10.0, 1.0, 0.0, ShiftRequest::Up);
        step(&mut d, &p, 10.0, 1.0, 0.13, ShiftRequest::None);
        let out = step(&mut d, &p, 10.0, 1.0, 0.12, ShiftRequest::None);
        assert!(matches!(d.state(), ShiftState::Shifting { .. }));
        assert!(out.ratio > 1.8);
    }

    #[test]
    fn many_small_steps_commit_once_duration_has_elapsed() {
        let p = manual_profile();
        let mut d = Drivetrain::new();
        step(&mut d, &p, 10.0, 1.0, 0.0, ShiftRequest::Up);
        for _ in 0..99 {
            step(&mut d, &p, 10.0, 1.0, 0.0026, ShiftRequest::None);
        }
        assert!(matches!(d.state(), ShiftState::Shifting { .. }));

        let out = step(&mut d, &p, 10.0, 1.0, 0.0026, ShiftRequest::None);
        assert_eq!(d.state(), ShiftState::Steady { gear: 2 });
        assert_eq!(out.ratio, 1.8);
    }

    #[test]
    fn shifts_are_not_reentrant() {
        let p = manual_profile();
        let mut d = Drivetrain::new();
        step(&mut d, &p, 10.0, 1.0, 0.0, ShiftRequest::Up);
        step(&mut d, &p, 10.0, 1.0, 0.1, ShiftRequest::Up);
        assert!(matches!(d.state(), ShiftState::Shifting { from: 1, to: 2, .. }));
    }

    #[test]
    fn manual_gears_stay_in_range() {
        let p = manual_profile();
        let mut d = Drivetrain::new();
        step(&mut d, &p, 0.0, 0.0, 0.1, ShiftRequest::Down);
        assert_eq!(d.state(), ShiftState::Steady { gear: 1 });

        for _ in 0..20 {
            step(&mut d, &p, 0.0, 0.0, 0.3, ShiftRequest::Up);
        }
        assert_eq!(d.state().target_gear(), 3);
    }

    #[test]
    fn automatic_upshift_needs_rising_rpm_and_throttle() {
        let p = VehicleProfile::sedan();
        let mut d = Drivetrain::new();
        let per_unit = 1.0 / p.wheel_radius * p.gears.final_drive() * p.gears.forward(1) * RAD_PER_SEC_TO_RPM;
        let above = (p.upshift_rpm + 200.0) / per_unit;

        // over the line but coasting: no upshift
        step(&mut d, &p, above * 0.9, 0.0, 1.0 / 60.0, ShiftRequest::None);
        step(&mut d, &p, above, 0.0, 1.0 / 60.0, ShiftRequest::None);
        assert_eq!(d.state(), ShiftState::Steady { gear: 1 });

        // throttle, rising, above 6000
        step(&mut d, &p, above * 1.01, 1.0, 1.0 / 60.0, ShiftRequest::None);
        assert!(matches!(d.state(), ShiftState::Shifting { from: 1, to: 2, .. }));
    }

    #[test]
    fn automatic_downshift_on_falling_rpm() {
        let p = VehicleProfile::sedan();
        let mut d = Drivetrain { state: ShiftState::Steady { gear: 3 }, last_full_rpm: 5000.0 };
        step(&mut d, &p, 2.0, 0.0, 1.0 / 60.0, ShiftRequest::None);
        assert!(matches!(d.state(), ShiftState::Shifting { from: 3, to: 2, .. }));
    }

    #[test]
    fn automatic_never_drops_below_first_or_above_top() {
        let p = VehicleProfile::sedan();
        let mut d = Drivetrain::new();
        for _ in 0..10 {
            step(&mut d, &p, 0.0, 0.0, 0.5, ShiftRequest::None);
        }
        assert_eq!(d.state(), ShiftState::Steady { gear: 1 });

        let top = p.gears.top_gear();
        let mut d = Drivetrain { state: ShiftState::Steady { gear: top }, last_full_rpm: 0.0 };
        step(&mut d, &p, 500.0, 1.0, 1.0 / 60.0, ShiftRequest::None);
        assert_eq!(d.state(), ShiftState::Steady { gear: top });
    }

    #[test]
    fn fixed_transmission_picks_ratio_by_throttle_sign() {
        let p = VehicleProfile::truck();
        let mut d = Drivetrain::new();
        let fwd = step(&mut d, &p, 20.0, 1.0, 1.0 / 60.0, ShiftRequest::None);
        assert_eq!(fwd.ratio, p.gears.forward(1));
        let rev = step(&mut d, &p, 20.0, -1.0, 1.0 / 60.0, ShiftRequest::None);
        assert_eq!(rev.ratio, p.gears.reverse());
        assert_eq!(d.state(), ShiftState::Steady { gear: 1 });
    }

    #[test]
    fn nan_speed_reports_zero_rpm() {
        let p = VehicleProfile::sedan();
        let mut d = Drivetrain::new();
        let out = step(&mut d, &p, f32::NAN, 1.0, 1.0 / 60.0, ShiftRequest::None);
        assert_eq!(out.rpm, 0.0);
        assert_eq!(out.gear, 1);
    }
}
