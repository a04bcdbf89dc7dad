//! Application context: owns the store, the scene and every renderer, wires
//! listeners, and supervises the hub connection.

use crate::config::{Config, EntityMap};
use crate::gauge::{Gauge, GaugeConfig, NumberFormat, RainfallGauge};
use crate::ha_client::HaClient;
use crate::hub::{self, HubConfig};
use crate::rooms::RoomPanel;
use crate::scene::{lock, Node, Scene, SharedScene};
use crate::sparkline::Sparkline;
use crate::state::{EntityState, StateStore};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

pub const STATUS_ID: &str = "status";
pub const OVERLAY_ID: &str = "overlay";
pub const OVERLAY_MESSAGE_ID: &str = "overlay-message";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Failed { message: String },
}

struct HistoryTrack {
    entity_id: String,
    sparkline: Arc<Mutex<Sparkline>>,
}

pub struct Dashboard {
    store: Arc<StateStore>,
    scene: SharedScene,
    entities: EntityMap,
    temperature: Arc<Gauge>,
    secondary: Arc<Gauge>,
    humidity: Arc<Gauge>,
    pressure: Arc<Gauge>,
    rainfall: Arc<Mutex<RainfallGauge>>,
    histories: Vec<HistoryTrack>,
    rooms: Vec<Arc<RoomPanel>>,
    ha_client: HaClient,
    history_hours: i64,
    status_tx: watch::Sender<ConnectionStatus>,
    listeners_bound: AtomicBool,
}

fn numeric_or_warn(state: &EntityState) -> Option<f64> {
    match state.numeric() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Skipping update: {}", e);
            None
        }
    }
}

impl Dashboard {
    /// Builds every renderer and declares its elements.
    pub fn new(config: &Config, ha_client: HaClient) -> Self {
        let format = NumberFormat::new(&config.locale);
        let mut scene = Scene::default();

        let temperature = Arc::new(Gauge::new(GaugeConfig::temperature(), format));
        let secondary = Arc::new(Gauge::new(GaugeConfig::secondary_temperature(), format));
        let humidity = Arc::new(Gauge::new(GaugeConfig::humidity(), format));
        let pressure = Arc::new(Gauge::new(GaugeConfig::pressure(), format));
        for gauge in [&temperature, &secondary, &humidity, &pressure] {
            gauge.declare(&mut scene);
        }
        let rainfall = RainfallGauge::new(format);
        rainfall.declare(&mut scene);

        let entities = config.entities.clone();
        let histories: Vec<HistoryTrack> = [
            ("temperature-history", &entities.temperature, 1.0),
            ("humidity-history", &entities.humidity, 3.0),
            ("pressure-history", &entities.pressure, 1.0),
        ]
        .into_iter()
        .map(|(id, entity_id, padding)| {
            let sparkline = Sparkline::new(id, config.history_points, padding);
            sparkline.declare(&mut scene);
            HistoryTrack {
                entity_id: entity_id.clone(),
                sparkline: Arc::new(Mutex::new(sparkline)),
            }
        })
        .collect();

        let rooms: Vec<Arc<RoomPanel>> = config
            .rooms
            .iter()
            .map(|room| {
                let panel = RoomPanel::new(room.clone(), format);
                panel.declare(&mut scene);
                Arc::new(panel)
            })
            .collect();

        scene.declare(STATUS_ID);
        scene.declare(OVERLAY_ID);
        scene.declare(OVERLAY_MESSAGE_ID);

        let (status_tx, _) = watch::channel(ConnectionStatus::Connecting);

        Dashboard {
            store: Arc::new(StateStore::new()),
            scene: Arc::new(Mutex::new(scene)),
            entities,
            temperature,
            secondary,
            humidity,
            pressure,
            rainfall: Arc::new(Mutex::new(rainfall)),
            histories,
            rooms,
            ha_client,
            history_hours: config.history_hours,
            status_tx,
            listeners_bound: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> Arc<StateStore> {
        self.store.clone()
    }

    #[cfg(test)]
    pub fn scene(&self) -> &SharedScene {
        &self.scene
    }

    pub fn scene_snapshot(&self) -> (u64, BTreeMap<String, Node>) {
        lock(&self.scene).snapshot()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_tx.borrow().clone()
    }

    /// Gauges in display order.
    pub fn gauge_configs(&self) -> Vec<GaugeConfig> {
        let mut configs: Vec<GaugeConfig> = [
            &self.temperature,
            &self.secondary,
            &self.humidity,
            &self.pressure,
        ]
        .iter()
        .map(|g| g.config().clone())
        .collect();
        configs.push(lock(&self.rainfall).config().clone());
        configs
    }

    pub fn sparkline_ids(&self) -> Vec<String> {
        self.histories
            .iter()
            .map(|track| lock(&track.sparkline).id().to_string())
            .collect()
    }

    pub fn rooms(&self) -> &[Arc<RoomPanel>] {
        &self.rooms
    }

    /// First paint: gauges at their minimum with placeholder text, rainfall
    /// hidden, empty sparklines.
    pub fn initialize(&self) {
        {
            let mut rain = lock(&self.rainfall);
            let mut scene = lock(&self.scene);

            for gauge in [&self.temperature, &self.secondary, &self.humidity, &self.pressure] {
                if let Err(e) = gauge.render(&mut scene, gauge.config().min, true) {
                    warn!("Gauge {}: {}", gauge.config().id, e);
                }
            }
            if let Err(e) = rain
                .render(&mut scene, 0.0, true)
                .and_then(|_| rain.update_visibility(&mut scene, 0.0, 0.0))
            {
                warn!("Gauge rainfall: {}", e);
            }
        }

        for track in &self.histories {
            let sparkline = lock(&track.sparkline);
            if let Err(e) = sparkline.render(&mut lock(&self.scene)) {
                warn!("Sparkline {}: {}", sparkline.id(), e);
            }
        }

        self.set_status(ConnectionStatus::Connecting);
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        let (label, failure) = match &status {
            ConnectionStatus::Connecting => ("Connecting…", None),
            ConnectionStatus::Connected => ("Connected", None),
            ConnectionStatus::Failed { message } => ("Disconnected", Some(message.as_str())),
        };

        {
            let mut scene = lock(&self.scene);
            let result = scene
                .set_text(STATUS_ID, label)
                .and_then(|_| scene.set_hidden(OVERLAY_ID, failure.is_none()));
            let result = match (result, failure) {
                (Ok(()), Some(message)) => scene.set_text(OVERLAY_MESSAGE_ID, message),
                (result, _) => result,
            };
            if let Err(e) = result {
                warn!("Status indicator: {}", e);
            }
        }

        self.status_tx.send_replace(status);
    }

    /// Registers every renderer with the store. Listeners are never removed,
    /// so only the first call has any effect.
    pub fn bind_listeners(&self) {
        if self.listeners_bound.swap(true, Ordering::SeqCst) {
            return;
        }

        self.bind_gauge(&self.entities.temperature, &self.temperature);
        self.bind_gauge(&self.entities.temperature_secondary, &self.secondary);
        self.bind_gauge(&self.entities.humidity, &self.humidity);
        self.bind_gauge(&self.entities.pressure, &self.pressure);
        self.bind_rainfall();

        for track in &self.histories {
            let sparkline = track.sparkline.clone();
            let scene = self.scene.clone();
            self.store.add_listener(track.entity_id.clone(), move |state| {
                let Some(value) = numeric_or_warn(state) else {
                    return;
                };
                let mut sparkline = lock(&sparkline);
                if let Err(e) = sparkline.add_point(&mut lock(&scene), value, state.last_changed) {
                    warn!("Sparkline {}: {}", sparkline.id(), e);
                }
            });
        }

        for room in &self.rooms {
            room.bind(&self.store, &self.scene);
        }

        info!("Listeners registered");
    }

    fn bind_gauge(&self, entity_id: &str, gauge: &Arc<Gauge>) {
        let gauge = gauge.clone();
        let scene = self.scene.clone();
        self.store.add_listener(entity_id, move |state| {
            let Some(value) = numeric_or_warn(state) else {
                return;
            };
            if let Err(e) = gauge.render(&mut lock(&scene), value, false) {
                warn!("Gauge {}: {}", gauge.config().id, e);
            }
        });
    }

    /// Rain today drives the gauge; both rain sensors drive its visibility.
    fn bind_rainfall(&self) {
        let today_id = self.entities.rain_today.clone();
        let hour_id = self.entities.rain_last_hour.clone();

        for entity_id in [today_id.clone(), hour_id.clone()] {
            let is_today = entity_id == today_id;
            let store = Arc::downgrade(&self.store);
            let scene = self.scene.clone();
            let rain = self.rainfall.clone();
            let (today_id, hour_id) = (today_id.clone(), hour_id.clone());

            self.store.add_listener(entity_id, move |state| {
                let Some(value) = numeric_or_warn(state) else {
                    return;
                };
                let Some(store) = store.upgrade() else {
                    return;
                };
                let reading = |id: &str| {
                    store
                        .get_state(id)
                        .and_then(|s| s.numeric().ok())
                        .unwrap_or(0.0)
                };

                let mut rain = lock(&rain);
                let mut scene = lock(&scene);
                if is_today {
                    if let Err(e) = rain.render(&mut scene, value, false) {
                        warn!("Gauge rainfall: {}", e);
                    }
                }
                if let Err(e) = rain.update_visibility(&mut scene, reading(&today_id), reading(&hour_id)) {
                    warn!("Gauge rainfall: {}", e);
                }
            });
        }
    }

    /// Fetches the sparkline history window for every tracked entity.
    pub async fn load_histories(&self) {
        let since = Utc::now() - chrono::Duration::hours(self.history_hours);

        for track in &self.histories {
            match self.ha_client.fetch_history(&track.entity_id, since).await {
                Ok(points) => {
                    info!("Loaded {} history points for {}", points.len(), track.entity_id);
                    let mut sparkline = lock(&track.sparkline);
                    if let Err(e) = sparkline.load(&mut lock(&self.scene), points) {
                        warn!("Sparkline {}: {}", sparkline.id(), e);
                    }
                }
                Err(e) => warn!("Could not load history for {}: {:#}", track.entity_id, e),
            }
        }
    }
}

/// Connects to the hub and keeps the session running. Failures are shown
/// on the dashboard; the next attempt only starts when `retry_rx` fires.
pub async fn supervise(dashboard: Arc<Dashboard>, hub_config: HubConfig, mut retry_rx: mpsc::Receiver<()>) {
    loop {
        dashboard.set_status(ConnectionStatus::Connecting);

        let err = match hub::connect(&hub_config, dashboard.store()).await {
            Ok(connection) => {
                dashboard.bind_listeners();
                dashboard.set_status(ConnectionStatus::Connected);

                let loader = dashboard.clone();
                tokio::spawn(async move { loader.load_histories().await });

                let err = connection.run().await;
                error!("Hub connection lost: {}", err);
                err
            }
            Err(e) => {
                error!("Could not connect to hub: {}", e);
                e
            }
        };

        // Only a retry requested after this failure counts.
        while retry_rx.try_recv().is_ok() {}
        dashboard.set_status(ConnectionStatus::Failed {
            message: err.to_string(),
        });

        if retry_rx.recv().await.is_none() {
            break;
        }
        info!("Retrying hub connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gauge::PLACEHOLDER;
    use crate::hub::test_support::{
        authenticate, recv_json, send_json, spawn_hub, spawn_hub_for_each, ServerSocket,
    };
    use crate::state::entity;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn dashboard(config: &Config) -> Arc<Dashboard> {
        let dashboard = Arc::new(Dashboard::new(config, HaClient::new(config)));
        dashboard.initialize();
        dashboard
    }

    #[test]
    fn test_initialize_paints_placeholders() {
        let dashboard = dashboard(&Config::for_tests("http://localhost:8123"));
        let scene = lock(dashboard.scene());

        for id in ["temperature", "temperature-secondary", "humidity", "pressure"] {
            assert_eq!(scene.text(&format!("{}-value", id)), Some(PLACEHOLDER));
        }
        assert!(scene.is_hidden("rainfall"));
        assert!(scene.is_hidden("temperature-history-dot"));
        assert_eq!(scene.text(STATUS_ID), Some("Connecting…"));
        assert!(scene.is_hidden(OVERLAY_ID));
    }

    #[test]
    fn test_listeners_drive_gauges_rain_and_sparklines() {
        let dashboard = dashboard(&Config::for_tests("http://localhost:8123"));
        let store = dashboard.store();
        store.update(entity("sensor.outdoor_humidity", "55.2"));

        dashboard.bind_listeners();
        dashboard.bind_listeners();

        // Replayed on registration.
        assert_eq!(lock(dashboard.scene()).text("humidity-value"), Some("55"));

        store.update(entity("sensor.outdoor_pressure", "1008.6"));
        store.update(entity("sensor.rain_today", "0"));
        store.update(entity("sensor.outdoor_temperature", "bogus"));
        {
            let scene = lock(dashboard.scene());
            assert_eq!(scene.text("pressure-value"), Some("1009"));
            assert!(scene.is_hidden("rainfall"));
            assert_eq!(scene.text("temperature-value"), Some(PLACEHOLDER));
        }

        store.update(entity("sensor.rain_last_hour", "0.4"));
        store.update(entity("sensor.rain_today", "6.2"));
        {
            let scene = lock(dashboard.scene());
            assert!(!scene.is_hidden("rainfall"));
            assert_eq!(scene.text("rainfall-value"), Some("6.2"));
        }

        store.update(entity("sensor.outdoor_pressure", "1009.1"));
        let pressure = lock(&dashboard.histories[2].sparkline).buffer().len();
        // Bound once despite the second call.
        assert_eq!(pressure, 2);
    }

    #[test]
    fn test_failed_status_shows_overlay() {
        let dashboard = dashboard(&Config::for_tests("http://localhost:8123"));
        dashboard.set_status(ConnectionStatus::Failed {
            message: "hub rejected the access token".to_string(),
        });

        let scene = lock(dashboard.scene());
        assert!(!scene.is_hidden(OVERLAY_ID));
        assert_eq!(scene.text(OVERLAY_MESSAGE_ID), Some("hub rejected the access token"));
        assert_eq!(scene.text(STATUS_ID), Some("Disconnected"));
        drop(scene);

        dashboard.set_status(ConnectionStatus::Connected);
        assert!(lock(dashboard.scene()).is_hidden(OVERLAY_ID));
        assert_eq!(dashboard.status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_snapshot_paints_temperature_without_placeholder() {
        let url = spawn_hub(|mut ws| async move {
            authenticate(&mut ws).await;
            let _subscribe = recv_json(&mut ws).await;
            let get_states = recv_json(&mut ws).await.unwrap();
            send_json(
                &mut ws,
                json!({"id": get_states["id"], "type": "result", "success": true, "result": [
                    serde_json::to_value(entity("sensor.temp", "21.5")).unwrap(),
                ]}),
            )
            .await;
            let _ = ws.close(None).await;
        })
        .await;

        let mut config = Config::for_tests(&url);
        config.entities.temperature = "sensor.temp".to_string();
        let dashboard = dashboard(&config);
        assert_eq!(lock(dashboard.scene()).text("temperature-value"), Some(PLACEHOLDER));

        let connection = hub::connect(&HubConfig::from(&config), dashboard.store())
            .await
            .unwrap();
        dashboard.bind_listeners();

        // Runs after the gauge listener: records what the first real paint left behind.
        let painted = Arc::new(Mutex::new(Vec::new()));
        let painted_clone = painted.clone();
        let scene = dashboard.scene().clone();
        dashboard.store().add_listener("sensor.temp", move |_| {
            let text = lock(&scene).text("temperature-value").map(str::to_string);
            painted_clone.lock().unwrap().push(text);
        });

        let _ = connection.run().await;

        assert_eq!(*painted.lock().unwrap(), vec![Some("21.5".to_string())]);
        let scene = lock(dashboard.scene());
        assert_eq!(scene.text("temperature-value"), Some("21.5"));
        assert!(scene.attr("temperature-arc", "d").unwrap().contains(" A "));
    }

    #[tokio::test]
    async fn test_supervise_waits_for_manual_retry() {
        let mut config = Config::for_tests("http://127.0.0.1:1");
        config.ha_token = None;
        let dashboard = dashboard(&config);

        let (retry_tx, retry_rx) = mpsc::channel(1);
        let task = tokio::spawn(supervise(dashboard.clone(), HubConfig::from(&config), retry_rx));

        let mut status = dashboard.status_tx.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| matches!(s, ConnectionStatus::Failed { .. })),
        )
        .await
        .unwrap()
        .unwrap();

        let message = lock(dashboard.scene())
            .text(OVERLAY_MESSAGE_ID)
            .map(str::to_string)
            .unwrap();
        assert!(message.contains("HA_LONG_LIVED_TOKEN"), "{}", message);

        drop(retry_tx);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    /// Hub session that authenticates, sends an empty snapshot, then drops
    /// the client after `hold`.
    async fn short_session(mut ws: ServerSocket, hold: Duration) {
        authenticate(&mut ws).await;
        let _subscribe = recv_json(&mut ws).await;
        let get_states = recv_json(&mut ws).await.unwrap();
        send_json(
            &mut ws,
            json!({"id": get_states["id"], "type": "result", "success": true, "result": []}),
        )
        .await;
        tokio::time::sleep(hold).await;
        let _ = ws.close(None).await;
    }

    async fn wait_for_sessions(sessions: &AtomicUsize, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while sessions.load(Ordering::SeqCst) < n {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_retry_after_failure_reconnects_once() {
        let (url, sessions) =
            spawn_hub_for_each(|ws| short_session(ws, Duration::from_millis(200))).await;
        let config = Config::for_tests(&url);
        let dashboard = dashboard(&config);

        let (retry_tx, retry_rx) = mpsc::channel(1);
        tokio::spawn(supervise(dashboard.clone(), HubConfig::from(&config), retry_rx));

        let mut status = dashboard.status_tx.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| matches!(s, ConnectionStatus::Failed { .. })),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(sessions.load(Ordering::SeqCst), 1);

        retry_tx.try_send(()).unwrap();
        wait_for_sessions(&sessions, 2).await;

        // The second session drops too; nothing reconnects on its own.
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(sessions.load(Ordering::SeqCst), 2);
        assert!(matches!(dashboard.status(), ConnectionStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn test_retry_queued_while_connected_is_discarded() {
        let (url, sessions) =
            spawn_hub_for_each(|ws| short_session(ws, Duration::from_millis(500))).await;
        let config = Config::for_tests(&url);
        let dashboard = dashboard(&config);

        let (retry_tx, retry_rx) = mpsc::channel(1);
        tokio::spawn(supervise(dashboard.clone(), HubConfig::from(&config), retry_rx));

        let mut status = dashboard.status_tx.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| *s == ConnectionStatus::Connected),
        )
        .await
        .unwrap()
        .unwrap();
        retry_tx.try_send(()).unwrap();

        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| matches!(s, ConnectionStatus::Failed { .. })),
        )
        .await
        .unwrap()
        .unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;

        assert_eq!(sessions.load(Ordering::SeqCst), 1);
        assert!(matches!(dashboard.status(), ConnectionStatus::Failed { .. }));
    }
}
