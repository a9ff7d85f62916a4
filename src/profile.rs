// ==============================================================================
// profile.rs — VEHICLE CLASS TUNING (IMMUTABLE PER CLASS)
// ------------------------------------------------------------------------------
// A VehicleProfile carries every constant the force models need: drag/roll/
// brake coefficients, per-axis class multipliers, the gear table, engine and
// unit-conversion constants, suspension presets, tire-pop timing, traction and
// autopilot tunables. Force code never hard-codes a class; it reads the profile.
//
// Profiles are validated before a vehicle may start. An invalid profile is fatal
// at initialization time (ProfileError), never a runtime surprise.
// ==============================================================================

use std::path::Path;

use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const WHEEL_COUNT: usize = 4;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("gear table needs final drive, reverse and at least one forward gear (got {0} entries)")]
    GearTableTooShort(usize),
    #[error("gear ratio at index {index} is {value}, expected a finite positive number")]
    BadGearRatio { index: usize, value: f32 },
    #[error("`{field}` is {value}, expected a finite positive number")]
    NotPositive { field: &'static str, value: f32 },
    #[error("`{field}` is {value}, expected a value in [{min}, {max}]")]
    OutOfRange { field: &'static str, value: f32, min: f32, max: f32 },
    #[error("expected 4 wheels, got {0}")]
    WheelCount(usize),
    #[error("failed to read profile: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse profile: {0}")]
    Parse(#[from] serde_json::Error),
}

// ============================================
// ----- gears --------------------------------
// ============================================

/// Gear-ratio table laid out as `[final drive, reverse, gear 1, .., gear N]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GearTable {
    ratios: Vec<f32>,
}

impl GearTable {
    pub fn new(ratios: Vec<f32>) -> Result<Self, ProfileError> {
        if ratios.len() < 3 {
            return Err(ProfileError::GearTableTooShort(ratios.len()));
        }
        if let Some((index, &value)) = ratios.iter().enumerate().find(|(_, r)| !(r.is_finite() && **r > 0.0)) {
            return Err(ProfileError::BadGearRatio { index, value });
        }
        Ok(Self { ratios })
    }

    pub fn final_drive(&self) -> f32 {
        self.ratios[0]
    }

    pub fn reverse(&self) -> f32 {
        self.ratios[1]
    }

    /// Number of forward gears (N).
    pub fn top_gear(&self) -> u8 {
        (self.ratios.len() - 2).min(u8::MAX as usize) as u8
    }

    /// Ratio of forward gear `gear` (1-based), clamped into [1, N].
    pub fn forward(&self, gear: u8) -> f32 {
        let g = gear.clamp(1, self.top_gear()) as usize;
        self.ratios[g + 1]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmissionMode {
    /// RPM-driven up/down shifts.
    #[default]
    Automatic,
    /// Driver-requested shifts through the same shift machine.
    Manual,
    /// "No gears": one ratio picked by throttle sign.
    Fixed,
}

// ============================================
// ----- sub-tunings --------------------------
// ============================================

/// Per-axis multiplier in vehicle space (x = lateral, z = forward).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisScale {
    pub lateral: f32,
    pub forward: f32,
}

impl AxisScale {
    pub const ONE: AxisScale = AxisScale { lateral: 1.0, forward: 1.0 };
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuspensionTuning {
    /// Spring force at full compression, per unit of mass.
    pub stiffness: f32,
    /// Damping coefficient per unit of mass.
    pub damping: f32,
    /// Base travel height (probe length below each attachment point).
    pub travel_height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TractionTuning {
    /// Lowest traction ever reported.
    pub floor: f32,
    /// Lateral speed above which countersteer triggers a drift.
    pub drift_lateral_speed: f32,
    /// Speed above which popped tires force a drift.
    pub popped_drift_speed: f32,
    /// Seconds a drift stays active after its last trigger.
    pub drift_window: f64,
    /// Gain inside `tanh(speed * gain)`.
    pub speed_gain: f32,
    /// Per-reference-step approach rate while losing grip.
    pub loss_rate: f32,
    /// Per-reference-step approach rate while recovering grip.
    pub recovery_rate: f32,
    /// Target multiplier while precipitation is active.
    pub wet_factor: f32,
}

impl Default for TractionTuning {
    fn default() -> Self {
        Self {
            floor: 0.07,
            drift_lateral_speed: 8.0,
            popped_drift_speed: 30.0,
            drift_window: 0.3,
            speed_gain: 0.03,
            loss_rate: 0.2,
            recovery_rate: 0.01,
            wet_factor: 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutopilotTuning {
    pub lane_width: f32,
    /// Length of the forward-down road probe.
    pub probe_length: f32,
    /// Distance ahead along the road at which the lane centre is aimed.
    pub lookahead: f32,
    pub steer_gain: f32,
    pub excursion_penalty: f32,
}

impl Default for AutopilotTuning {
    fn default() -> Self {
        Self {
            lane_width: 12.0,
            probe_length: 30.0,
            lookahead: 12.0,
            steer_gain: 4.0,
            excursion_penalty: 0.3,
        }
    }
}

// ============================================
// ----- profile ------------------------------
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleProfile {
    pub name: String,
    pub default_mass: f32,

    // --- resistive forces ---
    pub drag_coefficient: f32,
    pub rolling_coefficient: f32,
    pub brake_coefficient: f32,
    pub drag_scale: AxisScale,
    pub rolling_scale: AxisScale,
    /// Extra lateral drag multiplier while rolling backwards.
    pub reverse_lateral_drag: f32,
    /// Clamp on lateral rolling resistance as a fraction of mass.
    pub lateral_rolling_clamp: Option<f32>,
    /// Speed under which a coasting vehicle is hard-stopped.
    pub stop_speed: f32,

    // --- drivetrain ---
    pub gears: GearTable,
    pub transmission: TransmissionMode,
    pub upshift_rpm: f32,
    pub downshift_rpm: f32,
    /// Seconds to complete a shift.
    pub shift_duration: f32,
    pub wheel_radius: f32,
    /// Converts wheel angular speed units to engine speed units.
    pub speed_unit_conversion: f32,
    /// Base torque constant of the thrust formula.
    pub base_torque: f32,
    /// Class engine-power multiplier (upgrades multiply on top).
    pub power_multiplier: f32,
    /// Thrust factor while the front reference point is under water.
    pub submerged_thrust_factor: f32,

    // --- steering ---
    /// Yaw rate (rad/s) at full heading input.
    pub turn_rate: f32,
    /// Torque per rad/s of yaw-rate error, per unit of mass.
    pub steer_gain: f32,
    /// Share of steering authority kept while airborne.
    pub airborne_steer_authority: f32,
    /// Per-reference-step smoothing of the heading input.
    pub heading_smoothing: f32,

    // --- nitro ---
    /// Nitro force per unit of mass.
    pub nitro_force: f32,
    /// Downward tilt of the nitro force (radians).
    pub nitro_pitch: f32,
    pub nitro_gravity_scale: f32,

    // --- tires ---
    /// Seconds for a popped tire to ramp back to full health.
    pub tire_pop_duration: f32,
    /// Health below which the pop correction applies at full severity.
    pub tire_pop_threshold: f32,
    /// Corrective drag per unit of mass while popped.
    pub tire_pop_drag: f32,

    // --- sensing / geometry ---
    pub suspension: SuspensionTuning,
    /// Wheel attachment points in body space (FL, FR, RL, RR).
    pub wheel_positions: Vec<[f32; 3]>,
    /// Body-space point checked for submersion.
    pub front_reference: [f32; 3],
    /// Ground probe length below the body centre for the airborne check.
    pub airborne_probe: f32,
    pub tunnel_probe_height: f32,
    pub city_probe_distance: f32,

    pub traction: TractionTuning,
    pub autopilot: AutopilotTuning,

    /// Converts weight units to Newtons on the host side.
    pub gravity: f32,
}

impl VehicleProfile {
    pub fn sedan() -> Self {
        Self {
            name: "sedan".into(),
            default_mass: 1200.0,

            drag_coefficient: 0.12,
            rolling_coefficient: 4.0,
            brake_coefficient: 0.6,
            drag_scale: AxisScale { lateral: 1.0, forward: 1.0 },
            rolling_scale: AxisScale { lateral: 36.0, forward: 1.0 },
            reverse_lateral_drag: 2.5,
            lateral_rolling_clamp: None,
            stop_speed: 1.0,

            gears: GearTable { ratios: vec![3.4, 3.2, 2.9, 1.9, 1.35, 1.05, 0.85] },
            transmission: TransmissionMode::Automatic,
            upshift_rpm: 6000.0,
            downshift_rpm: 3400.0,
            shift_duration: 0.26,
            wheel_radius: 0.34,
            speed_unit_conversion: 1.0,
            base_torque: 50.0,
            power_multiplier: 1.2,
            submerged_thrust_factor: 0.625,

            turn_rate: 1.6,
            steer_gain: 0.8,
            airborne_steer_authority: 0.35,
            heading_smoothing: 0.25,

            nitro_force: 0.35,
            nitro_pitch: 0.08,
            nitro_gravity_scale: 1.4,

            tire_pop_duration: 20.0,
            tire_pop_threshold: 0.5,
            tire_pop_drag: 0.05,

            suspension: SuspensionTuning { stiffness: 1.0, damping: 0.04, travel_height: 0.9 },
            wheel_positions: vec![
                [-0.8, -0.2, 1.4],
                [0.8, -0.2, 1.4],
                [-0.8, -0.2, -1.4],
                [0.8, -0.2, -1.4],
            ],
            front_reference: [0.0, 0.0, 2.1],
            airborne_probe: 2.0,
            tunnel_probe_height: 25.0,
            city_probe_distance: 40.0,

            traction: TractionTuning::default(),
            autopilot: AutopilotTuning::default(),

            gravity: 9.81,
        }
    }

    pub fn sports() -> Self {
        Self {
            name: "sports".into(),
            default_mass: 1350.0,
            drag_coefficient: 0.09,
            drag_scale: AxisScale { lateral: 1.2, forward: 0.8 },
            brake_coefficient: 0.9,
            gears: GearTable { ratios: vec![3.7, 3.1, 3.1, 2.1, 1.6, 1.25, 1.0, 0.82] },
            power_multiplier: 1.9,
            turn_rate: 1.9,
            nitro_force: 0.5,
            suspension: SuspensionTuning { stiffness: 1.3, damping: 0.05, travel_height: 0.7 },
            ..Self::sedan()
        }
    }

    /// Heavy single-ratio class with clamped lateral rolling resistance.
    pub fn truck() -> Self {
        Self {
            name: "truck".into(),
            default_mass: 6000.0,
            drag_coefficient: 0.3,
            drag_scale: AxisScale { lateral: 1.5, forward: 1.0 },
            rolling_coefficient: 6.0,
            rolling_scale: AxisScale { lateral: 30.0, forward: 1.5 },
            lateral_rolling_clamp: Some(0.05),
            brake_coefficient: 0.45,
            gears: GearTable { ratios: vec![4.1, 6.0, 5.5] },
            transmission: TransmissionMode::Fixed,
            wheel_radius: 0.5,
            power_multiplier: 4.5,
            turn_rate: 0.9,
            nitro_force: 0.2,
            suspension: SuspensionTuning { stiffness: 0.9, damping: 0.06, travel_height: 1.2 },
            wheel_positions: vec![
                [-1.1, -0.4, 2.6],
                [1.1, -0.4, 2.6],
                [-1.1, -0.4, -2.6],
                [1.1, -0.4, -2.6],
            ],
            front_reference: [0.0, 0.2, 3.6],
            airborne_probe: 2.8,
            ..Self::sedan()
        }
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "sedan" => Some(Self::sedan()),
            "sports" => Some(Self::sports()),
            "truck" => Some(Self::truck()),
            _ => None,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ProfileError> {
        let profile: Self = serde_json::from_str(text)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn wheel_attachment(&self, index: usize) -> Point3<f32> {
        let [x, y, z] = self.wheel_positions[index];
        Point3::new(x, y, z)
    }

    pub fn front_reference_point(&self) -> Point3<f32> {
        let [x, y, z] = self.front_reference;
        Point3::new(x, y, z)
    }

    /// Rejects any profile a vehicle cannot run with.
    pub fn validate(&self) -> Result<(), ProfileError> {
        // re-run the table checks; deserialised tables bypass GearTable::new
        GearTable::new(self.gears.ratios.clone())?;

        if self.wheel_positions.len() != WHEEL_COUNT {
            return Err(ProfileError::WheelCount(self.wheel_positions.len()));
        }

        let positive = [
            ("default_mass", self.default_mass),
            ("wheel_radius", self.wheel_radius),
            ("shift_duration", self.shift_duration),
            ("speed_unit_conversion", self.speed_unit_conversion),
            ("suspension.travel_height", self.suspension.travel_height),
            ("tire_pop_duration", self.tire_pop_duration),
            ("gravity", self.gravity),
            ("autopilot.lane_width", self.autopilot.lane_width),
            ("autopilot.probe_length", self.autopilot.probe_length),
            ("autopilot.lookahead", self.autopilot.lookahead),
            ("airborne_probe", self.airborne_probe),
            ("upshift_rpm", self.upshift_rpm),
            ("traction.drift_window", self.traction.drift_window as f32),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ProfileError::NotPositive { field, value });
            }
        }

        let non_negative = [
            ("drag_coefficient", self.drag_coefficient),
            ("rolling_coefficient", self.rolling_coefficient),
            ("brake_coefficient", self.brake_coefficient),
            ("base_torque", self.base_torque),
            ("power_multiplier", self.power_multiplier),
            ("suspension.stiffness", self.suspension.stiffness),
            ("suspension.damping", self.suspension.damping),
            ("stop_speed", self.stop_speed),
            ("downshift_rpm", self.downshift_rpm),
            ("turn_rate", self.turn_rate),
            ("nitro_force", self.nitro_force),
        ];
        for (field, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ProfileError::OutOfRange { field, value, min: 0.0, max: f32::MAX });
            }
        }

        let unit = [
            ("traction.floor", self.traction.floor),
            ("traction.loss_rate", self.traction.loss_rate),
            ("traction.recovery_rate", self.traction.recovery_rate),
            ("traction.wet_factor", self.traction.wet_factor),
            ("tire_pop_threshold", self.tire_pop_threshold),
            ("submerged_thrust_factor", self.submerged_thrust_factor),
            ("airborne_steer_authority", self.airborne_steer_authority),
            ("heading_smoothing", self.heading_smoothing),
        ];
        for (field, value) in unit {
            if !(value.is_finite() && (0.0..=1.0).contains(&value)) {
                return Err(ProfileError::OutOfRange { field, value, min: 0.0, max: 1.0 });
            }
        }

        if self.downshift_rpm >= self.upshift_rpm {
            return Err(ProfileError::OutOfRange {
                field: "downshift_rpm",
                value: self.downshift_rpm,
                min: 0.0,
                max: self.upshift_rpm,
            });
        }

        Ok(())
    }
}

impl Default for VehicleProfile {
    fn default() -> Self {
        Self::sedan()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        for p in [VehicleProfile::sedan(), VehicleProfile::sports(), VehicleProfile::truck()] {
            p.validate().unwrap_or_else(|e| panic!("{} invalid: {e}", p.name));
        }
    }

    #[test]
    fn gear_table_layout() {
        let table = GearTable::new(vec![3.4, 3.0, 2.5, 1.8, 1.2]).unwrap();
        assert_eq!(table.final_drive(), 3.4);
        assert_eq!(table.reverse(), 3.0);
        assert_eq!(table.top_gear(), 3);
        assert_eq!(table.forward(1), 2.5);
        assert_eq!(table.forward(3), 1.2);
        assert_eq!(table.forward(9), 1.2);
    }

    #[test]
    fn short_or_broken_gear_tables_are_rejected() {
        assert!(matches!(GearTable::new(vec![3.4, 3.0]), Err(ProfileError::GearTableTooShort(2))));
        assert!(matches!(
            GearTable::new(vec![3.4, 3.0, f32::NAN]),
            Err(ProfileError::BadGearRatio { index: 2, .. })
        ));
        assert!(matches!(
            GearTable::new(vec![3.4, 0.0, 2.0]),
            Err(ProfileError::BadGearRatio { index: 1, .. })
        ));
    }

    #[test]
    fn json_round_trip_validates() {
        let text = serde_json::to_string(&VehicleProfile::sports()).unwrap();
        let back = VehicleProfile::from_json(&text).unwrap();
        assert_eq!(back, VehicleProfile::sports());

        let mut broken = VehicleProfile::sedan();
        broken.wheel_radius = 0.0;
        let text = serde_json::to_string(&broken).unwrap();
        assert!(matches!(
            VehicleProfile::from_json(&text),
            Err(ProfileError::NotPositive { field: "wheel_radius", .. })
        ));
    }

    #[test]
    fn missing_fields_fail_to_parse() {
        assert!(matches!(VehicleProfile::from_json(r#"{"name":"x"}"#), Err(ProfileError::Parse(_))));
    }

    #[test]
    fn wheel_count_is_enforced() {
        let mut p = VehicleProfile::sedan();
        p.wheel_positions.pop();
        assert!(matches!(p.validate(), Err(ProfileError::WheelCount(3))));
    }
}
