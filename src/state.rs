use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::physics::PhysicsWorld;
use crate::vehicle::TickOutput;

/// Messages pushed to clients.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage<'a> {
    Welcome { player_id: &'a str, lane: i32 },
    Pong,
    Snapshot(Snapshot<'a>),
}

#[derive(Debug, Serialize)]
pub struct VehicleSnapshot<'a> {
    pub id: &'a str,
    pub position: [f32; 3],
    /// x, y, z, w
    pub rotation: [f32; 4],
    pub velocity: [f32; 3],
    pub output: Option<&'a TickOutput>,
}

#[derive(Debug, Serialize)]
pub struct Snapshot<'a> {
    pub tick: u64,
    pub time: f64,
    pub vehicles: Vec<VehicleSnapshot<'a>>,
}

pub struct SharedGameState {
    pub tick: u64,
    pub clients: HashMap<String, UnboundedSender<String>>,
}

impl Default for SharedGameState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedGameState {
    pub fn new() -> Self {
        Self {
            tick: 0,
            clients: HashMap::new(),
        }
    }

    pub fn register_client(&mut self, id: &str, tx: UnboundedSender<String>) {
        self.clients.insert(id.to_string(), tx);
    }

    pub fn remove_client(&mut self, id: &str) {
        self.clients.remove(id);
    }

    pub fn snapshot<'a>(&self, physics: &'a PhysicsWorld) -> Snapshot<'a> {
        let mut vehicles = Vec::with_capacity(physics.cars.len());
        for (id, car) in &physics.cars {
            let Some(body) = physics.bodies.get(car.body) else { continue };
            let pos = body.translation();
            let rot = body.rotation();
            let vel = body.linvel();
            vehicles.push(VehicleSnapshot {
                id,
                position: [pos.x, pos.y, pos.z],
                rotation: [rot.i, rot.j, rot.k, rot.w],
                velocity: [vel.x, vel.y, vel.z],
                output: car.last.as_ref(),
            });
        }
        Snapshot {
            tick: self.tick,
            time: physics.time,
            vehicles,
        }
    }

    /// Serialise one snapshot and send it to every client. Clients whose
    /// channel has closed are dropped.
    pub fn broadcast_snapshot(&mut self, physics: &PhysicsWorld) {
        let message = ServerMessage::Snapshot(self.snapshot(physics));
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(err) => {
                warn!(%err, "snapshot serialisation failed");
                return;
            }
        };
        self.clients.retain(|_, tx| tx.send(json.clone()).is_ok());
    }
}
