use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, Json,
    },
    routing::{get, post},
    Router,
};
use dashboard::ConnectionStatus;
use futures::Stream;
use serde_json::json;
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{info, warn};

mod config;

mod dashboard;

mod error;

mod gauge;

mod geometry;

mod ha_client;

mod hub;

mod page;

mod rooms;

mod scene;

mod sparkline;

mod state;

use config::Config;

use dashboard::Dashboard;

use ha_client::HaClient;

use hub::HubConfig;

use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ha_weather_dashboard=info".into()),
        )
        .init();

    let config = Config::from_env()?;

    info!("Starting ha-weather-dashboard...");
    info!("Hub at {}", config.ha_base_url);
    info!("Watching entities: {:?}", config.watched_entities());

    // Startup order: config, gauges, hub connection, listeners.
    let ha_client = HaClient::new(&config);
    let dashboard = Arc::new(Dashboard::new(&config, ha_client));
    dashboard.initialize();

    let (retry_tx, retry_rx) = mpsc::channel(1);
    tokio::spawn(dashboard::supervise(
        dashboard.clone(),
        HubConfig::from(&config),
        retry_rx,
    ));

    let app_state = AppState {
        dashboard,
        config: config.clone(),
        retry_tx,
    };

    let app = router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    info!("Dashboard listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/events", get(scene_events))
        .route("/api/status", get(status))
        .route("/api/retry", post(retry))
        .route("/api/env-config", get(env_config))
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(page::render(&state.dashboard))
}

async fn status(State(state): State<AppState>) -> Json<ConnectionStatus> {
    Json(state.dashboard.status())
}

/// Manual reconnect; the supervisor never retries on its own. Only a
/// failed session can be retried.
async fn retry(State(state): State<AppState>) -> StatusCode {
    if !matches!(state.dashboard.status(), ConnectionStatus::Failed { .. }) {
        return StatusCode::CONFLICT;
    }
    match state.retry_tx.try_send(()) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(mpsc::error::TrySendError::Full(())) => StatusCode::CONFLICT,
        Err(mpsc::error::TrySendError::Closed(())) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Hub URL, rooms and entity ids. The token stays server-side.
async fn env_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = &state.config;
    Json(json!({
        "ha_base_url": config.ha_base_url,
        "entities": config.entities,
        "rooms": config.rooms,
    }))
}

// Scene stream: one `scene` event per scene revision

async fn scene_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let period = Duration::from_millis(state.config.refresh_ms.max(10));

    let stream = async_stream::stream! {
        let mut interval = tokio::time::interval(period);
        let mut sent = None;

        loop {
            interval.tick().await;

            let (revision, nodes) = state.dashboard.scene_snapshot();
            if sent == Some(revision) {
                continue;
            }

            match Event::default().event("scene").json_data(&nodes) {
                Ok(event) => {
                    sent = Some(revision);
                    yield Ok(event);
                }
                Err(e) => warn!("Error encoding scene: {}", e),
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
