//! drive_physics - per-tick wheeled vehicle dynamics
//!
//! Core (engine-agnostic): `ground`, `dynamics`, `profile`, `vehicle`.
//! Host (rapier + websocket server): `physics`, `state`, `net`, `spawn`, `config`.

pub mod config;
pub mod dynamics;
pub mod ground;
pub mod net;
pub mod physics;
pub mod profile;
pub mod spawn;
pub mod state;
pub mod vehicle;

pub use ground::{GroundQueryResult, IgnoreSet, Material, SurfaceId, WorldQuery};
pub use profile::{ProfileError, VehicleProfile};
pub use vehicle::{DriverInput, TickContext, TickOutcome, TickOutput, Vehicle, VehicleState};
