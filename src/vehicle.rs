// ==============================================================================
// vehicle.rs — ONE VEHICLE, ONE TICK
// ==============================================================================
// Per tick, strictly in this order:
//   0) guard: non-finite pose / velocity or a bad dt skips the tick untouched
//   1) autopilot (when enabled) rewrites heading + throttle
//   2) sensing: airborne probe, environment, submersion, tire health
//   3) drivetrain  (gear / rpm / shift blend)
//   4) traction    (grip + drift window)
//   5) forces      (thrust + yaw torque)
//   6) suspension  (4 wheels, independent)
//   7) bookkeeping (spike pops, wheel roll, last material)
//
// Outputs are in weight units; the host multiplies by `profile.gravity` before
// handing them to its rigid-body engine. `integrate` is a small headless
// integrator for running without one.
// ==============================================================================

use std::f32::consts::TAU;
use std::sync::Arc;

use nalgebra::{Isometry3, Point3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dynamics::autopilot::{self, AutopilotOutput};
use crate::dynamics::drivetrain::{Drivetrain, DrivetrainInput, ShiftRequest};
use crate::dynamics::forces::{self, ForceBreakdown, ForceInput};
use crate::dynamics::sanitize::{finite_or, is_finite_vec, sanitize_vec};
use crate::dynamics::suspension::{self, BodyMotion, SuspensionContact, SuspensionParams};
use crate::dynamics::traction::{Traction, TractionInput};
use crate::dynamics::step_rate;
use crate::ground::{
    probe_solid, probe_touching_material, sense_environment, Environment, IgnoreSet, Material, WorldQuery,
};
use crate::profile::{ProfileError, VehicleProfile, WHEEL_COUNT};

/// Upward probe length used to test whether the front reference point sits
/// inside a water volume.
pub const SUBMERSION_PROBE: f32 = 0.05;
/// Forward speed at which steering reaches full authority.
pub const STEER_FULL_SPEED: f32 = 5.0;
/// Per-reference-step blend rate of the visual wheel spin.
pub const WHEEL_SPIN_SMOOTHING: f32 = 0.3;

/// Normalized driver controls for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverInput {
    /// -1 full reverse .. 1 full throttle
    pub forward: f32,
    /// -1 full right .. 1 full left
    pub heading: f32,
    pub drift_hold: bool,
    pub handbrake: bool,
    pub autopilot: bool,
    pub nitro_hold: bool,
    pub shift_up: bool,
    pub shift_down: bool,
}

impl DriverInput {
    fn shift_request(&self) -> ShiftRequest {
        match (self.shift_up, self.shift_down) {
            (true, false) => ShiftRequest::Up,
            (false, true) => ShiftRequest::Down,
            _ => ShiftRequest::None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TickContext {
    pub dt: f32,
    /// Simulation clock, seconds.
    pub now: f64,
    pub precipitation: bool,
}

/// Multipliers bought by the player; 1.0 is stock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Upgrades {
    pub engine: f32,
    pub brake: f32,
}

impl Default for Upgrades {
    fn default() -> Self {
        Self { engine: 1.0, brake: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WheelState {
    /// Attachment point in body space.
    pub attachment: Point3<f32>,
    pub compression: f32,
    pub force: f32,
    pub grounded: bool,
    pub material: Option<Material>,
    /// Simulation time of the last pop.
    pub popped_at: Option<f64>,
}

impl WheelState {
    fn new(attachment: Point3<f32>, travel_height: f32) -> Self {
        Self {
            attachment,
            compression: travel_height,
            force: 0.0,
            grounded: false,
            material: None,
            popped_at: None,
        }
    }

    pub fn health(&self, now: f64, duration: f32) -> f32 {
        forces::tire_health(self.popped_at, now, duration)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleState {
    pub pose: Isometry3<f32>,
    pub linvel: Vector3<f32>,
    pub angvel: Vector3<f32>,
    pub mass: f32,
    pub spring_force: f32,
    pub damping: f32,
    /// Added to the profile's travel height.
    pub suspension_offset: f32,
    pub drivetrain: Drivetrain,
    pub traction: Traction,
    pub heading: f32,
    pub wheel_spin: f32,
    /// [0, 2pi)
    pub wheel_roll: f32,
    pub wheels: [WheelState; WHEEL_COUNT],
    pub tires_popped: bool,
    pub drift_active: bool,
    pub material: Option<Material>,
    pub environment: Environment,
    pub submerged: bool,
    pub airborne: bool,
    pub nitro: bool,
    pub upgrades: Upgrades,
    /// The vehicle's own colliders, never reported as ground.
    #[serde(skip)]
    pub ignore: IgnoreSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WheelOutput {
    /// World-space force (weight units) at `point`.
    pub force: Vector3<f32>,
    pub point: Point3<f32>,
    pub contact: SuspensionContact,
}

/// Everything the host and presentation layers consume after a tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickOutput {
    /// World-space thrust at the centre of mass (weight units).
    pub thrust: Vector3<f32>,
    pub forces: ForceBreakdown,
    /// World-space steering torque (weight units).
    pub steer_torque: Vector3<f32>,
    pub wheels: [WheelOutput; WHEEL_COUNT],
    pub gear: u8,
    pub committed_gear: u8,
    pub shift_progress: f32,
    pub rpm: f32,
    pub full_rpm: f32,
    pub traction: f32,
    pub drift_active: bool,
    pub environment: Environment,
    pub material: Option<Material>,
    pub tires_popped: bool,
    pub airborne: bool,
    pub submerged: bool,
    pub nitro: bool,
    pub hard_stop: bool,
    pub gravity_scale: f32,
    pub heading: f32,
    pub throttle: f32,
    pub wheel_roll: f32,
    pub autopilot: Option<AutopilotOutput>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Applied(Box<TickOutput>),
    /// Prior state retained unchanged.
    Skipped,
}

impl TickOutcome {
    pub fn applied(&self) -> Option<&TickOutput> {
        match self {
            TickOutcome::Applied(out) => Some(out),
            TickOutcome::Skipped => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Vehicle {
    profile: Arc<VehicleProfile>,
    pub state: VehicleState,
}

impl Vehicle {
    /// Fails when the profile cannot drive a vehicle.
    pub fn new(profile: Arc<VehicleProfile>, pose: Isometry3<f32>) -> Result<Self, ProfileError> {
        profile.validate()?;

        let mass = profile.default_mass;
        let (spring_force, damping) = suspension::derive_coefficients(mass, &profile.suspension);
        let travel = profile.suspension.travel_height;
        let wheels = std::array::from_fn(|i| WheelState::new(profile.wheel_attachment(i), travel));

        let state = VehicleState {
            pose,
            linvel: Vector3::zeros(),
            angvel: Vector3::zeros(),
            mass,
            spring_force,
            damping,
            suspension_offset: 0.0,
            drivetrain: Drivetrain::new(),
            traction: Traction::default(),
            heading: 0.0,
            wheel_spin: 0.0,
            wheel_roll: 0.0,
            wheels,
            tires_popped: false,
            drift_active: false,
            material: None,
            environment: Environment::Outside,
            submerged: false,
            airborne: false,
            nitro: false,
            upgrades: Upgrades::default(),
            ignore: IgnoreSet::new(),
        };

        Ok(Self { profile, state })
    }

    pub fn profile(&self) -> &VehicleProfile {
        &self.profile
    }

    /// Changes mass and re-derives the suspension coefficients.
    pub fn set_mass(&mut self, mass: f32) {
        let mass = if mass.is_finite() && mass > 0.0 { mass } else { self.profile.default_mass };
        let (spring_force, damping) = suspension::derive_coefficients(mass, &self.profile.suspension);
        self.state.mass = mass;
        self.state.spring_force = spring_force;
        self.state.damping = damping;
    }

    pub fn set_suspension_offset(&mut self, offset: f32) {
        let base = self.profile.suspension.travel_height;
        // keep at least a sliver of travel
        self.state.suspension_offset = finite_or(offset, 0.0).max(-base * 0.9);
    }

    pub fn set_upgrades(&mut self, upgrades: Upgrades) {
        self.state.upgrades = Upgrades {
            engine: finite_or(upgrades.engine, 1.0).max(0.0),
            brake: finite_or(upgrades.brake, 1.0).max(0.0),
        };
    }

    pub fn set_ignore(&mut self, ignore: IgnoreSet) {
        self.state.ignore = ignore;
    }

    /// Pops one tire. Returns false for an unknown wheel index.
    pub fn pop_tire(&mut self, wheel: usize, now: f64) -> bool {
        let Some(w) = self.state.wheels.get_mut(wheel) else {
            return false;
        };
        w.popped_at = Some(now);
        info!(wheel, now, "tire popped");
        true
    }

    pub fn travel_height(&self) -> f32 {
        self.profile.suspension.travel_height + self.state.suspension_offset
    }

    pub fn average_tire_health(&self, now: f64) -> f32 {
        let total: f32 = self
            .state
            .wheels
            .iter()
            .map(|w| w.health(now, self.profile.tire_pop_duration))
            .sum();
        total / WHEEL_COUNT as f32
    }

    pub fn tick<W: WorldQuery + ?Sized>(&mut self, world: &W, input: &DriverInput, ctx: &TickContext) -> TickOutcome {
        let s = &self.state;
        let pose_ok = is_finite_vec(&s.pose.translation.vector)
            && s.pose.rotation.coords.iter().all(|c| c.is_finite());
        if !pose_ok || !is_finite_vec(&s.linvel) || !is_finite_vec(&s.angvel) {
            debug!("non-finite body state, tick skipped");
            return TickOutcome::Skipped;
        }
        if !ctx.dt.is_finite() || ctx.dt <= 0.0 || !ctx.now.is_finite() {
            debug!(dt = ctx.dt, "bad timestep, tick skipped");
            return TickOutcome::Skipped;
        }

        let profile = Arc::clone(&self.profile);
        let dt = ctx.dt;
        let pose = self.state.pose;
        let ignore = self.state.ignore;
        let up = pose.rotation * Vector3::y();
        let local_velocity = sanitize_vec(pose.rotation.inverse() * self.state.linvel);

        let mut heading = finite_or(input.heading, 0.0).clamp(-1.0, 1.0);
        let mut throttle = finite_or(input.forward, 0.0).clamp(-1.0, 1.0);

        // 1) autopilot
        let autopilot = input.autopilot.then(|| {
            let out = autopilot::steer(world, &profile.autopilot, &pose, &ignore, heading, throttle);
            heading = out.heading;
            throttle = out.throttle;
            out
        });

        self.state.heading += (heading - self.state.heading) * step_rate(profile.heading_smoothing, dt);
        self.state.heading = finite_or(self.state.heading, 0.0).clamp(-1.0, 1.0);

        // 2) sensing
        let origin = Point3::from(pose.translation.vector);
        let below = probe_solid(world, origin, -up * profile.airborne_probe, &ignore);
        let airborne = !below.is_hit();
        self.state.airborne = airborne;
        if let Some(material) = below.material {
            self.state.material = Some(material);
        }

        self.state.environment =
            sense_environment(world, &pose, &ignore, profile.tunnel_probe_height, profile.city_probe_distance);

        let front = pose * profile.front_reference_point();
        self.state.submerged =
            probe_touching_material(world, front, up * SUBMERSION_PROBE, &ignore, Material::Water).is_hit();

        let health = self.average_tire_health(ctx.now);
        self.state.tires_popped = forces::tires_popped(health);
        self.state.nitro = input.nitro_hold;

        // 3) drivetrain
        let drive = self.state.drivetrain.update(
            &profile,
            &DrivetrainInput {
                forward_speed: local_velocity.z,
                throttle,
                dt,
                request: input.shift_request(),
            },
        );

        // 4) traction
        let grip = self.state.traction.update(
            &profile.traction,
            &TractionInput {
                lateral_speed: local_velocity.x,
                forward_speed: local_velocity.z,
                heading: self.state.heading,
                drift_hold: input.drift_hold,
                tires_popped: self.state.tires_popped,
                precipitation: ctx.precipitation,
                now: ctx.now,
                dt,
            },
        );
        self.state.drift_active = grip.drift_active;

        // 5) forces
        let breakdown = forces::aggregate(
            &profile,
            &ForceInput {
                local_velocity,
                mass: self.state.mass,
                throttle,
                handbrake: input.handbrake,
                traction: grip.traction,
                committed_ratio: drive.committed_ratio,
                nitro: input.nitro_hold,
                tire_health: health,
                submerged: self.state.submerged,
                airborne,
                engine_upgrade: self.state.upgrades.engine,
                brake_upgrade: self.state.upgrades.brake,
                dt,
            },
        );
        let thrust = sanitize_vec(pose.rotation * breakdown.thrust);
        let steer_torque = sanitize_vec(up * self.yaw_torque(local_velocity.z, airborne));

        // 6) suspension
        let params = SuspensionParams {
            travel_height: self.travel_height(),
            mass: self.state.mass,
            spring_force: self.state.spring_force,
            damping: self.state.damping,
        };
        let motion = BodyMotion { pose: &pose, linvel: self.state.linvel, angvel: self.state.angvel };
        let wheels: [WheelOutput; WHEEL_COUNT] = std::array::from_fn(|i| {
            let attachment = self.state.wheels[i].attachment;
            let contact = suspension::solve_wheel(world, &motion, &attachment, &params, &ignore, dt);
            WheelOutput {
                force: sanitize_vec(up * contact.force),
                point: pose * attachment,
                contact,
            }
        });

        // 7) bookkeeping
        for (i, out) in wheels.iter().enumerate() {
            let wheel = &mut self.state.wheels[i];
            wheel.compression = out.contact.compression;
            wheel.force = out.contact.force;
            wheel.grounded = out.contact.grounded;
            wheel.material = out.contact.material;
        }
        self.pop_tires_on_spikes(ctx.now);
        self.advance_wheel_roll(local_velocity.z, dt);

        TickOutcome::Applied(Box::new(TickOutput {
            thrust,
            forces: breakdown,
            steer_torque,
            wheels,
            gear: drive.gear,
            committed_gear: drive.committed_gear,
            shift_progress: drive.shift_progress,
            rpm: drive.rpm,
            full_rpm: drive.full_rpm,
            traction: grip.traction,
            drift_active: grip.drift_active,
            environment: self.state.environment,
            material: self.state.material,
            tires_popped: self.state.tires_popped,
            airborne,
            submerged: self.state.submerged,
            nitro: input.nitro_hold,
            hard_stop: breakdown.hard_stop,
            gravity_scale: breakdown.gravity_scale,
            heading: self.state.heading,
            throttle: breakdown.effective_throttle,
            wheel_roll: self.state.wheel_roll,
            autopilot,
        }))
    }

    /// Yaw torque about the body up axis, driving the yaw rate towards
    /// `-heading * turn_rate` (scaled by forward speed, reduced in the air).
    fn yaw_torque(&self, forward_speed: f32, airborne: bool) -> f32 {
        let p = &self.profile;
        let up = self.state.pose.rotation * Vector3::y();
        let yaw_rate = self.state.angvel.dot(&up);

        let speed_authority = (forward_speed / STEER_FULL_SPEED).clamp(-1.0, 1.0);
        let target = -self.state.heading * p.turn_rate * speed_authority;
        let authority = if airborne { p.airborne_steer_authority } else { 1.0 };

        finite_or((target - yaw_rate) * p.steer_gain * authority * self.state.mass, 0.0)
    }

    fn pop_tires_on_spikes(&mut self, now: f64) {
        let duration = self.profile.tire_pop_duration;
        for i in 0..WHEEL_COUNT {
            let wheel = &self.state.wheels[i];
            let healthy = wheel.health(now, duration) >= 1.0;
            if wheel.grounded && wheel.material == Some(Material::Spikes) && healthy {
                self.pop_tire(i, now);
            }
        }
    }

    fn advance_wheel_roll(&mut self, forward_speed: f32, dt: f32) {
        let target = finite_or(forward_speed / self.profile.wheel_radius, 0.0);
        let spin = self.state.wheel_spin + (target - self.state.wheel_spin) * step_rate(WHEEL_SPIN_SMOOTHING, dt);
        self.state.wheel_spin = finite_or(spin, 0.0);
        let roll = (self.state.wheel_roll + self.state.wheel_spin * dt).rem_euclid(TAU);
        // rem_euclid can round up to exactly TAU
        self.state.wheel_roll = if roll.is_finite() && roll < TAU { roll } else { 0.0 };
    }

    /// Headless semi-implicit Euler step applying `out` to the stored body
    /// state. Wheel forces act at the centre of mass here; only the steering
    /// torque rotates the body.
    pub fn integrate(&mut self, out: &TickOutput, dt: f32) {
        if !dt.is_finite() || dt <= 0.0 {
            return;
        }
        let g = self.profile.gravity;
        let mass = self.state.mass;

        let wheel_force: Vector3<f32> = out.wheels.iter().map(|w| w.force).sum();
        let weight = Vector3::new(0.0, -mass * out.gravity_scale, 0.0);
        let accel = (out.thrust + wheel_force + weight) * (g / mass);
        self.state.linvel = sanitize_vec(self.state.linvel + accel * dt);

        let angular = out.steer_torque * (g / mass);
        self.state.angvel = sanitize_vec(self.state.angvel + angular * dt);

        if out.hard_stop {
            self.hard_stop();
        }

        self.state.pose.translation.vector += self.state.linvel * dt;
        let spin = UnitQuaternion::new(self.state.angvel * dt);
        self.state.pose.rotation = spin * self.state.pose.rotation;
    }

    /// Zeroes the planar (body x / z) velocity, keeping the vertical part.
    pub fn hard_stop(&mut self) {
        let rotation = self.state.pose.rotation;
        let mut local = rotation.inverse() * self.state.linvel;
        local.x = 0.0;
        local.z = 0.0;
        self.state.linvel = sanitize_vec(rotation * local);
    }
}
