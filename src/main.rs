use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use drive_physics::config::ServerConfig;
use drive_physics::net::{start_websocket_server, Shared};
use drive_physics::physics::PhysicsWorld;
use drive_physics::spawn::SpawnManager;
use drive_physics::state::SharedGameState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let profile = Arc::new(config.load_profile()?);
    info!(profile = %profile.name, hz = config.tick_hz, rain = config.precipitation, "starting drive physics server");

    let mut world = PhysicsWorld::with_demo_track(Arc::clone(&profile), config.seed);
    world.precipitation = config.precipitation;

    let shared = Shared {
        state: Arc::new(Mutex::new(SharedGameState::new())),
        physics: Arc::new(Mutex::new(world)),
        spawns: Arc::new(Mutex::new(SpawnManager::new())),
    };

    let server = shared.clone();
    let bind = config.bind;
    tokio::spawn(async move {
        if let Err(err) = start_websocket_server(bind, server).await {
            error!(%err, "websocket server stopped");
        }
    });

    // Fixed timestep
    let dt = config.tick_seconds();
    let mut ticker = interval(Duration::from_secs_f32(dt));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let mut phys = shared.physics.lock().await;
        let mut game = shared.state.lock().await;

        phys.step(dt);

        game.tick += 1;
        game.broadcast_snapshot(&phys);
    }
}
