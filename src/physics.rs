// src/physics.rs
//
// Rapier host: owns the rigid-body world, exposes it to the vehicle core as a
// `WorldQuery`, runs one `Vehicle::tick` per car and applies the outputs as
// impulses before stepping the pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use ::nalgebra::{Isometry3, Point3, Quaternion, Translation3, Unit, UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rapier3d::prelude::*;
use rapier3d::prelude::{Group, InteractionGroups};
use tracing::{debug, info, warn};

use crate::ground::{IgnoreSet, Material, SurfaceHit, SurfaceId, WorldQuery};
use crate::profile::{ProfileError, VehicleProfile};
use crate::vehicle::{DriverInput, TickContext, TickOutcome, TickOutput, Upgrades, Vehicle};

const GROUP_GROUND: Group = Group::from_bits_truncate(0b0001);
const GROUP_CHASSIS: Group = Group::from_bits_truncate(0b0010);

/// Half width of the demo road: four 12 m lanes.
pub const ROAD_HALF_WIDTH: f32 = 24.0;
pub const TRACK_HALF_LENGTH: f32 = 500.0;
/// Bodies beyond this distance from the origin are reset.
const WORLD_LIMIT: f32 = 2_000.0;

#[derive(Debug, Clone, Copy)]
struct Surface {
    id: SurfaceId,
    material: Material,
}

/// A player's car: the simulated vehicle plus its rapier body.
pub struct Car {
    pub body: RigidBodyHandle,
    pub vehicle: Vehicle,
    pub input: DriverInput,
    pub last: Option<TickOutput>,
}

#[inline]
fn to_point(p: &Point<Real>) -> Point3<f32> {
    Point3::new(p.x, p.y, p.z)
}

#[inline]
fn to_vector(v: &Vector<Real>) -> Vector3<f32> {
    Vector3::new(v.x, v.y, v.z)
}

#[inline]
fn to_isometry(iso: &Isometry<Real>) -> Isometry3<f32> {
    let t = &iso.translation.vector;
    let q = &iso.rotation;
    Isometry3::from_parts(
        Translation3::new(t.x, t.y, t.z),
        UnitQuaternion::new_unchecked(Quaternion::new(q.w, q.i, q.j, q.k)),
    )
}

#[inline]
fn from_vector(v: &Vector3<f32>) -> Vector<Real> {
    vector![v.x, v.y, v.z]
}

#[inline]
fn from_point(p: &Point3<f32>) -> Point<Real> {
    point![p.x, p.y, p.z]
}

/// Read-only view of the collision world handed to the vehicle core.
pub struct RapierQuery<'a> {
    bodies: &'a RigidBodySet,
    colliders: &'a ColliderSet,
    pipeline: &'a QueryPipeline,
    surfaces: &'a HashMap<ColliderHandle, Surface>,
}

impl WorldQuery for RapierQuery<'_> {
    fn cast_ray(
        &self,
        origin: Point3<f32>,
        dir: Unit<Vector3<f32>>,
        max_dist: f32,
        ignore: &IgnoreSet,
    ) -> Option<SurfaceHit> {
        let ray = Ray::new(from_point(&origin), from_vector(&dir));
        let skip = |handle: ColliderHandle, _: &Collider| {
            self.surfaces.get(&handle).is_none_or(|s| !ignore.contains(s.id))
        };
        let filter = QueryFilter::default().predicate(&skip);

        let (handle, hit) =
            self.pipeline
                .cast_ray_and_get_normal(self.bodies, self.colliders, &ray, max_dist, true, filter)?;
        let collider = self.colliders.get(handle)?;
        let surface = self.surfaces.get(&handle)?;
        let distance = hit.time_of_impact;

        Some(SurfaceHit {
            surface: surface.id,
            distance,
            position: to_point(&ray.point_at(distance)),
            normal: to_vector(&hit.normal),
            material: surface.material,
            solid: !collider.is_sensor(),
            frame: to_isometry(collider.position()),
        })
    }
}

pub struct PhysicsWorld {
    pub gravity: Vector<Real>,
    pub pipeline: PhysicsPipeline,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    pub joints: ImpulseJointSet,
    pub multibody_joints: MultibodyJointSet,
    pub ccd: CCDSolver,
    pub query_pipeline: QueryPipeline,
    surfaces: HashMap<ColliderHandle, Surface>,
    next_surface: u64,
    pub cars: HashMap<String, Car>,
    profile: Arc<VehicleProfile>,
    /// Simulation clock, seconds.
    pub time: f64,
    pub precipitation: bool,
}

impl PhysicsWorld {
    pub fn new(profile: Arc<VehicleProfile>) -> Self {
        Self {
            gravity: vector![0.0, -profile.gravity, 0.0],
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            surfaces: HashMap::new(),
            next_surface: 0,
            cars: HashMap::new(),
            profile,
            time: 0.0,
            precipitation: false,
        }
    }

    /// World with the demo track already built.
    pub fn with_demo_track(profile: Arc<VehicleProfile>, seed: u64) -> Self {
        let mut world = Self::new(profile);
        world.build_demo_track(seed);
        world
    }

    pub fn query(&self) -> RapierQuery<'_> {
        RapierQuery {
            bodies: &self.bodies,
            colliders: &self.colliders,
            pipeline: &self.query_pipeline,
            surfaces: &self.surfaces,
        }
    }

    fn register(&mut self, handle: ColliderHandle, material: Material) -> SurfaceId {
        let id = SurfaceId(self.next_surface);
        self.next_surface += 1;
        self.surfaces.insert(handle, Surface { id, material });
        id
    }

    /// Static box; sensors are non-solid (foliage, water).
    pub fn add_static_box(
        &mut self,
        center: [f32; 3],
        half_extents: [f32; 3],
        material: Material,
        solid: bool,
    ) -> SurfaceId {
        let [hx, hy, hz] = half_extents;
        let collider = ColliderBuilder::cuboid(hx, hy, hz)
            .translation(vector![center[0], center[1], center[2]])
            .sensor(!solid)
            .collision_groups(InteractionGroups::new(GROUP_GROUND, GROUP_CHASSIS))
            .friction(1.2)
            .restitution(0.0)
            .build();
        let handle = self.colliders.insert(collider);
        self.register(handle, material)
    }

    /// Road along z with grass shoulders, a tunnel, a pond, a spike strip and
    /// randomly placed hedges.
    pub fn build_demo_track(&mut self, seed: u64) {
        let l = TRACK_HALF_LENGTH;

        self.add_static_box([0.0, -0.5, 0.0], [ROAD_HALF_WIDTH, 0.5, l], Material::Road, true);
        for side in [-1.0, 1.0] {
            let x = side * (ROAD_HALF_WIDTH + 50.0);
            self.add_static_box([x, -0.55, 0.0], [50.0, 0.5, l], Material::Grass, true);
        }

        // tunnel: two walls and a roof over the road
        let (tz, tlen) = (200.0, 40.0);
        for side in [-1.0, 1.0] {
            self.add_static_box([side * (ROAD_HALF_WIDTH + 1.0), 5.0, tz], [1.0, 5.0, tlen], Material::Concrete, true);
        }
        self.add_static_box([0.0, 10.5, tz], [ROAD_HALF_WIDTH + 2.0, 0.5, tlen], Material::Concrete, true);

        // pond on the left shoulder
        self.add_static_box([-(ROAD_HALF_WIDTH + 30.0), 0.5, -100.0], [20.0, 1.5, 20.0], Material::Water, false);

        // spike strip across the right-hand lanes
        self.add_static_box([ROAD_HALF_WIDTH * 0.5, 0.02, 300.0], [ROAD_HALF_WIDTH * 0.5, 0.05, 0.5], Material::Spikes, true);

        let mut rng = StdRng::seed_from_u64(seed);
        let hedges = 40;
        for _ in 0..hedges {
            let side = if rng.gen_bool(0.5) { -1.0 } else { 1.0 };
            let x = side * rng.gen_range(ROAD_HALF_WIDTH + 3.0..ROAD_HALF_WIDTH + 40.0);
            let z = rng.gen_range(-l + 10.0..l - 10.0);
            let size = rng.gen_range(0.8..2.5);
            self.add_static_box([x, size, z], [size, size, size], Material::Foliage, false);
        }

        self.query_pipeline.update(&self.colliders);
        info!(seed, surfaces = self.surfaces.len(), "demo track built");
    }

    /// Spawns a car at `position` (ride height is added on top of y).
    pub fn spawn_car(&mut self, id: &str, position: [f32; 3]) -> Result<(), ProfileError> {
        let profile = Arc::clone(&self.profile);
        let ride = profile.suspension.travel_height;
        let pose = Isometry3::translation(position[0], position[1] + ride, position[2]);
        let mut vehicle = Vehicle::new(Arc::clone(&profile), pose)?;

        let rb = RigidBodyBuilder::dynamic()
            .translation(vector![position[0], position[1] + ride, position[2]])
            .angular_damping(0.6)
            .ccd_enabled(true)
            .build();
        let body = self.bodies.insert(rb);

        // chassis box spanning the wheel base, lifted clear of the wheels
        let (hx, hz) = chassis_half_extents(&profile);
        let collider = ColliderBuilder::cuboid(hx, 0.35, hz)
            .translation(vector![0.0, 0.3, 0.0])
            .mass(profile.default_mass)
            .collision_groups(InteractionGroups::new(GROUP_CHASSIS, GROUP_GROUND))
            .friction(0.0)
            .restitution(0.0)
            .build();
        let handle = self.colliders.insert_with_parent(collider, body, &mut self.bodies);
        let chassis = self.register(handle, Material::Metal);
        vehicle.set_ignore(IgnoreSet::with(&[chassis]));

        self.cars.insert(
            id.to_string(),
            Car { body, vehicle, input: DriverInput::default(), last: None },
        );
        info!(player = id, ?position, "vehicle spawned");
        Ok(())
    }

    pub fn despawn_car(&mut self, id: &str) {
        let Some(car) = self.cars.remove(id) else { return };
        if let Some(body) = self.bodies.get(car.body) {
            for handle in body.colliders() {
                self.surfaces.remove(handle);
            }
        }
        self.bodies.remove(
            car.body,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            true,
        );
        info!(player = id, "vehicle removed");
    }

    pub fn set_input(&mut self, id: &str, input: DriverInput) {
        if let Some(car) = self.cars.get_mut(id) {
            car.input = input;
        }
    }

    pub fn pop_tire(&mut self, id: &str, wheel: usize) -> bool {
        let now = self.time;
        self.cars.get_mut(id).is_some_and(|car| car.vehicle.pop_tire(wheel, now))
    }

    pub fn set_upgrades(&mut self, id: &str, upgrades: Upgrades) {
        if let Some(car) = self.cars.get_mut(id) {
            car.vehicle.set_upgrades(upgrades);
        }
    }

    /// One fixed step: tick every car against the current world, apply the
    /// outputs, then advance rapier.
    pub fn step(&mut self, dt: Real) {
        self.query_pipeline.update(&self.colliders);
        let ctx = TickContext { dt, now: self.time, precipitation: self.precipitation };
        let g = self.profile.gravity;

        let mut applied: Vec<(RigidBodyHandle, TickOutput)> = Vec::with_capacity(self.cars.len());
        {
            let query = RapierQuery {
                bodies: &self.bodies,
                colliders: &self.colliders,
                pipeline: &self.query_pipeline,
                surfaces: &self.surfaces,
            };
            for (id, car) in self.cars.iter_mut() {
                let Some(body) = query.bodies.get(car.body) else {
                    debug!(player = %id, "body missing, tick skipped");
                    continue;
                };
                let state = &mut car.vehicle.state;
                state.pose = to_isometry(body.position());
                state.linvel = to_vector(body.linvel());
                state.angvel = to_vector(body.angvel());

                match car.vehicle.tick(&query, &car.input, &ctx) {
                    TickOutcome::Applied(out) => {
                        car.last = Some((*out).clone());
                        applied.push((car.body, *out));
                    }
                    TickOutcome::Skipped => debug!(player = %id, "tick skipped"),
                }
            }
        }

        for (handle, out) in &applied {
            let Some(body) = self.bodies.get_mut(*handle) else { continue };
            body.set_gravity_scale(out.gravity_scale, true);
            body.apply_impulse(from_vector(&(out.thrust * g * dt)), true);
            body.apply_torque_impulse(from_vector(&(out.steer_torque * g * dt)), true);
            for wheel in &out.wheels {
                if wheel.contact.grounded {
                    body.apply_impulse_at_point(
                        from_vector(&(wheel.force * g * dt)),
                        from_point(&wheel.point),
                        true,
                    );
                }
            }
            if out.hard_stop {
                let rot = *body.rotation();
                let mut local = rot.inverse() * *body.linvel();
                local.x = 0.0;
                local.z = 0.0;
                body.set_linvel(rot * local, true);
            }
        }

        let hooks = ();
        let mut events = ();
        self.pipeline.step(
            &self.gravity,
            &IntegrationParameters {
                dt,
                ..IntegrationParameters::default()
            },
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            Some(&mut self.query_pipeline),
            &mut events,
            &hooks,
        );
        self.time += f64::from(dt);

        for (id, car) in self.cars.iter() {
            let Some(body) = self.bodies.get_mut(car.body) else { continue };
            let pos = *body.translation();
            let bad = !pos.iter().all(|c| c.is_finite()) || pos.iter().any(|c| c.abs() > WORLD_LIMIT);
            if bad {
                let reset = vector![0.0, 2.0, 0.0];
                body.set_translation(reset, true);
                body.set_rotation(Rotation::identity(), true);
                body.set_linvel(vector![0.0, 0.0, 0.0], true);
                body.set_angvel(vector![0.0, 0.0, 0.0], true);
                warn!(player = %id, "reset runaway body");
            }
        }
    }
}

fn chassis_half_extents(profile: &VehicleProfile) -> (f32, f32) {
    let hx = profile.wheel_positions.iter().map(|p| p[0].abs()).fold(0.5, f32::max);
    let hz = profile.wheel_positions.iter().map(|p| p[2].abs()).fold(1.0, f32::max);
    (hx + 0.2, hz + 0.5)
}
