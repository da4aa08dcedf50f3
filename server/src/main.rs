use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod coordinator;
mod dictionary;
mod error;
mod game;
mod hub;
mod signaling;
mod state;
mod store;
mod web;

use crate::config::load_settings;
use crate::coordinator::RoomCoordinator;
use crate::dictionary::Dictionary;
use crate::error::Result as AppResult;
use crate::hub::ConnectionHub;
use crate::signaling::{InMemoryReadySet, SignalingRelay};
use crate::state::AppState;
use crate::store::RoomStoreHandle;
use crate::web::run_server;

#[tokio::main]
async fn main() -> AppResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=info,tower_http=debug", env!("CARGO_PKG_NAME")).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app_settings = load_settings()?;
    tracing::info!(
        server.port = app_settings.server.port,
        dictionary.source = ?app_settings.dictionary.source_type,
        game.max_players = app_settings.game.max_players,
        game.turn_timeout_seconds = ?app_settings.game.turn_timeout_seconds,
        "Configuration loaded"
    );

    let dictionary = Arc::new(Dictionary::new(app_settings.dictionary.clone()).await?);
    tracing::info!(words.count = dictionary.len().await, "Dictionary ready");

    let hub = ConnectionHub::new();
    let store = Arc::new(RoomStoreHandle::spawn(64));
    let coordinator = RoomCoordinator::new(
        store,
        hub.clone(),
        dictionary.clone(),
        app_settings.game.clone(),
    );
    if coordinator.spawn_idle_room_reaper().is_none() {
        tracing::info!("Idle room reaping disabled");
    }
    let relay = SignalingRelay::new(Arc::new(InMemoryReadySet::new()), hub.clone());

    let app_state = AppState {
        coordinator,
        relay,
        hub,
        dictionary,
        server_config: Arc::new(app_settings.server.clone()),
    };

    run_server(app_state, app_settings.server).await?;

    Ok(())
}
