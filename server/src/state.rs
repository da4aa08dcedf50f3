use std::sync::Arc;

use crate::config::ServerConfig;
use crate::coordinator::RoomCoordinator;
use crate::dictionary::Dictionary;
use crate::hub::ConnectionHub;
use crate::signaling::SignalingRelay;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: RoomCoordinator,
    pub relay: SignalingRelay,
    pub hub: ConnectionHub,
    pub dictionary: Arc<Dictionary>,
    pub server_config: Arc<ServerConfig>,
}
