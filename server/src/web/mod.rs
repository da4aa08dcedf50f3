use axum::{
    Router,
    routing::{any, get, post},
};
use http::HeaderValue;
use std::{net::SocketAddr, sync::Arc};
use tokio::time::Duration;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::compression::CompressionLevel;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::config::ServerConfig;
use crate::error::Result as AppResult;
use crate::state::AppState;

pub mod error;
pub mod handlers;
pub mod ws;

pub use self::error::WebError;

const RATE_LIMIT_REPLENISH_MS: u64 = 500;
const RATE_LIMIT_BURST: u32 = 30;
const RATE_LIMIT_SWEEP: Duration = Duration::from_secs(60);
const RATE_LIMIT_STORAGE_WARN: usize = 1_000_000;

/// Parses the configured origins, skipping the ones that are not valid
/// header values.
fn allowed_origins(origins: &[String]) -> Vec<HeaderValue> {
    origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(cors.origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect()
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins = allowed_origins(origins);
    if origins.is_empty() {
        tracing::info!("No browser origins allowed, clients must be same-origin");
        return CorsLayer::new();
    }
    tracing::info!(cors.origins.count = origins.len(), "Browser clients allowed from configured origins");
    CorsLayer::new()
        .allow_methods(vec![http::Method::GET, http::Method::POST])
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_headers(vec![
            http::header::CONTENT_TYPE,
            http::header::AUTHORIZATION,
            http::header::ACCEPT,
        ])
}

fn routes(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/api/rooms",
            post(handlers::create_room_handler).get(handlers::list_rooms_handler),
        )
        .route("/api/rooms/{code}", get(handlers::get_room_handler))
        .route("/api/rooms/{code}/start", post(handlers::start_game_handler))
        .route(
            "/api/rooms/{code}/submit-move",
            post(handlers::submit_move_handler),
        )
        .route(
            "/api/rooms/{code}/eliminate",
            post(handlers::eliminate_handler),
        )
        .route("/api/rooms/{code}/leave", post(handlers::leave_room_handler))
        .route("/api/dictionary/check", post(handlers::check_word_handler))
        .route(
            "/api/dictionary/refresh",
            post(handlers::refresh_dictionary_handler),
        )
        .route("/ws", any(ws::ws_handler))
        .with_state(app_state)
}

#[tracing::instrument(skip(app_state, server_config), fields(
    server.port = server_config.port,
    cors.origins.count = server_config.cors_origins.len()
))]
pub async fn run_server(app_state: AppState, server_config: ServerConfig) -> AppResult<()> {
    let cors = cors_layer(&server_config.cors_origins);

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(RATE_LIMIT_REPLENISH_MS)
            .burst_size(RATE_LIMIT_BURST)
            .finish()
            .ok_or_else(|| {
                WebError::InternalServerError("Invalid rate limiter configuration".to_string())
            })?,
    );
    tracing::debug!(
        rate_limit.replenish_ms = RATE_LIMIT_REPLENISH_MS,
        rate_limit.burst = RATE_LIMIT_BURST,
        "Per-client request limit set"
    );

    let limiter = governor_conf.limiter().clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(RATE_LIMIT_SWEEP).await;
            let tracked_clients = limiter.len();
            if tracked_clients > RATE_LIMIT_STORAGE_WARN {
                tracing::warn!(
                    rate_limit.tracked_clients = tracked_clients,
                    "Rate limiter is tracking an unusual number of clients"
                );
            }
            limiter.retain_recent();
        }
    });

    let app = routes(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CompressionLayer::new()
                .quality(CompressionLevel::Default)
                .gzip(true),
        )
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], server_config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(server.address = %addr, "Word chain server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_origins_are_skipped() {
        let origins = allowed_origins(&[
            "https://play.example.com".to_string(),
            "bad\norigin".to_string(),
        ]);
        assert_eq!(
            origins,
            vec![HeaderValue::from_static("https://play.example.com")]
        );
    }
}
