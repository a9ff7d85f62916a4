use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};
use tungstenite::Message;
use uuid::Uuid;

use crate::physics::PhysicsWorld;
use crate::spawn::SpawnManager;
use crate::state::{ServerMessage, SharedGameState};
use crate::vehicle::{DriverInput, Upgrades};

/// Messages accepted from clients.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Input(DriverInput),
    PopTire { wheel: usize },
    Upgrade(Upgrades),
    Ping,
}

impl ClientMessage {
    pub fn from_json(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(msg) => Some(msg),
            Err(err) => {
                debug!(%err, "ignoring malformed client message");
                None
            }
        }
    }
}

#[derive(Clone)]
pub struct Shared {
    pub state: Arc<Mutex<SharedGameState>>,
    pub physics: Arc<Mutex<PhysicsWorld>>,
    pub spawns: Arc<Mutex<SpawnManager>>,
}

pub async fn start_websocket_server(addr: SocketAddr, shared: Shared) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("websocket listening on ws://{addr}");

    loop {
        let (raw, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(err) => {
                warn!(%err, "accept failed");
                continue;
            }
        };
        tokio::spawn(handle_client(raw, peer, shared.clone()));
    }
}

async fn handle_client(raw: TcpStream, peer: SocketAddr, shared: Shared) {
    let ws = match accept_async(raw).await {
        Ok(ws) => ws,
        Err(err) => {
            warn!(%peer, %err, "websocket handshake failed");
            return;
        }
    };
    let (mut write, mut read) = ws.split();

    // -------------------------------
    // 1) Outgoing channel + send loop
    // -------------------------------
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if write.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    // -------------------------------
    // 2) Spawn slot + vehicle
    // -------------------------------
    let player_id = Uuid::new_v4().to_string();
    let spawn = shared.spawns.lock().await.allocate_spawn(&player_id);
    if let Err(err) = shared.physics.lock().await.spawn_car(&player_id, spawn.position) {
        warn!(%err, player = %player_id, "vehicle failed to start");
        shared.spawns.lock().await.release(&player_id);
        return;
    }
    shared.state.lock().await.register_client(&player_id, tx.clone());
    info!(player = %player_id, %peer, lane = spawn.lane, "player connected");

    if let Ok(welcome) = serde_json::to_string(&ServerMessage::Welcome { player_id: &player_id, lane: spawn.lane }) {
        let _ = tx.send(welcome);
    }

    // -------------------------------
    // 3) Receive loop
    // -------------------------------
    while let Some(msg) = read.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(_) => break,
        };
        if !msg.is_text() {
            continue;
        }
        let Ok(text) = msg.to_text() else { continue };
        let Some(parsed) = ClientMessage::from_json(text) else { continue };

        match parsed {
            ClientMessage::Input(input) => shared.physics.lock().await.set_input(&player_id, input),
            ClientMessage::PopTire { wheel } => {
                shared.physics.lock().await.pop_tire(&player_id, wheel);
            }
            ClientMessage::Upgrade(upgrades) => shared.physics.lock().await.set_upgrades(&player_id, upgrades),
            ClientMessage::Ping => {
                if let Ok(pong) = serde_json::to_string(&ServerMessage::Pong) {
                    let _ = tx.send(pong);
                }
            }
        }
    }

    // -------------------------------
    // 4) Cleanup
    // -------------------------------
    shared.state.lock().await.remove_client(&player_id);
    shared.physics.lock().await.despawn_car(&player_id);
    shared.spawns.lock().await.release(&player_id);
    info!(player = %player_id, "player disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_message_fills_missing_fields_with_defaults() {
        let msg = ClientMessage::from_json(r#"{"type":"input","forward":0.5,"nitro_hold":true}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Input(DriverInput { forward: 0.5, nitro_hold: true, ..DriverInput::default() })
        );
    }

    #[test]
    fn other_messages_parse() {
        assert_eq!(ClientMessage::from_json(r#"{"type":"ping"}"#), Some(ClientMessage::Ping));
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"pop_tire","wheel":2}"#),
            Some(ClientMessage::PopTire { wheel: 2 })
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"upgrade","engine":1.2,"brake":1.5}"#),
            Some(ClientMessage::Upgrade(Upgrades { engine: 1.2, brake: 1.5 }))
        );
    }

    #[test]
    fn garbage_is_ignored() {
        assert_eq!(ClientMessage::from_json("not json"), None);
        assert_eq!(ClientMessage::from_json(r#"{"type":"teleport"}"#), None);
    }
}
