//! Websocket client for the hub's event API.
//!
//! `auth_required` → `auth` → `auth_ok`, then one `subscribe_events` and one
//! `get_states` request. After that every `state_changed` event and the
//! state snapshot are written into the [`StateStore`].

use crate::config::Config;
use crate::error::{ConfigError, HubError};
use crate::state::{EntityState, StateStore};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type HubSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub auth_timeout: Duration,
}

impl From<&Config> for HubConfig {
    fn from(config: &Config) -> Self {
        HubConfig {
            base_url: config.ha_base_url.clone(),
            token: config.ha_token.clone(),
            auth_timeout: Duration::from_secs(config.auth_timeout_secs),
        }
    }
}

/// `http://host:8123` → `ws://host:8123/api/websocket`.
pub fn websocket_url(base_url: &str) -> Result<String, ConfigError> {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if base.starts_with("wss://") || base.starts_with("ws://") {
        base.to_string()
    } else {
        return Err(ConfigError::UnsupportedScheme(base_url.to_string()));
    };
    Ok(format!("{}/api/websocket", ws_base))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Incoming {
    AuthRequired,
    AuthOk,
    AuthInvalid {
        #[serde(default)]
        message: String,
    },
    Result {
        id: u64,
        #[serde(default)]
        success: Option<bool>,
        #[serde(default)]
        result: Value,
    },
    Event {
        event: HubEvent,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct HubEvent {
    event_type: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct StateChanged {
    entity_id: String,
    new_state: Option<EntityState>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Outgoing<'a> {
    Auth { access_token: &'a str },
    SubscribeEvents { id: u64, event_type: &'a str },
    GetStates { id: u64 },
}

/// An authenticated session. Drive it with [`HubConnection::run`].
pub struct HubConnection {
    socket: HubSocket,
    store: Arc<StateStore>,
    next_id: u64,
    states_request: u64,
}

/// Opens the socket and completes the handshake within `auth_timeout`.
pub async fn connect(config: &HubConfig, store: Arc<StateStore>) -> Result<HubConnection, HubError> {
    let token = config
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or(ConfigError::Missing("HA_LONG_LIVED_TOKEN"))?;
    let url = websocket_url(&config.base_url)?;

    match timeout(config.auth_timeout, handshake(&url, token, store)).await {
        Ok(result) => result,
        Err(_) => Err(HubError::Timeout(config.auth_timeout)),
    }
}

async fn handshake(url: &str, token: &str, store: Arc<StateStore>) -> Result<HubConnection, HubError> {
    info!("Connecting to hub at {}", url);
    let (socket, _) = connect_async(url).await?;

    let mut conn = HubConnection {
        socket,
        store,
        next_id: 1,
        states_request: 0,
    };

    loop {
        let text = conn.next_text().await?;
        match serde_json::from_str::<Incoming>(&text) {
            Ok(Incoming::AuthRequired) => {
                debug!("Hub requested authentication");
                conn.send(&Outgoing::Auth { access_token: token }).await?;
            }
            Ok(Incoming::AuthOk) => {
                info!("Authenticated with hub");
                conn.subscribe().await?;
                return Ok(conn);
            }
            Ok(Incoming::AuthInvalid { message }) => return Err(HubError::Auth(message)),
            Ok(other) => debug!("Ignoring {:?} before authentication", other),
            Err(e) => warn!("Malformed hub message during handshake: {}", e),
        }
    }
}

impl HubConnection {
    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn subscribe(&mut self) -> Result<(), HubError> {
        let id = self.take_id();
        self.send(&Outgoing::SubscribeEvents {
            id,
            event_type: "state_changed",
        })
        .await?;

        let id = self.take_id();
        self.states_request = id;
        self.send(&Outgoing::GetStates { id }).await
    }

    async fn send(&mut self, message: &Outgoing<'_>) -> Result<(), HubError> {
        let text = serde_json::to_string(message)
            .map_err(|e| HubError::Transport(format!("encoding request: {}", e)))?;
        self.socket.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn next_text(&mut self) -> Result<String, HubError> {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by hub".to_string());
                    return Err(HubError::Transport(reason));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(HubError::Transport("closed by hub".to_string())),
            }
        }
    }

    /// Applies hub messages to the store until the socket fails or closes.
    /// Returns why the session ended; nothing reconnects automatically.
    pub async fn run(mut self) -> HubError {
        loop {
            match self.next_text().await {
                Ok(text) => self.handle(&text),
                Err(e) => return e,
            }
        }
    }

    fn handle(&self, text: &str) {
        let message = match serde_json::from_str::<Incoming>(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Malformed hub message: {}", e);
                return;
            }
        };

        match message {
            Incoming::Event { event } if event.event_type == "state_changed" => {
                match serde_json::from_value::<StateChanged>(event.data) {
                    Ok(StateChanged {
                        new_state: Some(state),
                        ..
                    }) => self.store.update(state),
                    Ok(StateChanged { entity_id, .. }) => {
                        debug!("Entity {} was removed", entity_id)
                    }
                    Err(e) => warn!("Malformed state_changed event: {}", e),
                }
            }
            Incoming::Result { id, success, .. } if success == Some(false) => {
                warn!("Hub request {} failed", id);
            }
            Incoming::Result { id, result, .. } if id == self.states_request => {
                let Value::Array(records) = result else {
                    warn!("State snapshot is not a list");
                    return;
                };
                // A bad record only loses that entity.
                let states: Vec<EntityState> = records
                    .into_iter()
                    .filter_map(|record| match serde_json::from_value::<EntityState>(record) {
                        Ok(state) => Some(state),
                        Err(e) => {
                            warn!("Skipping malformed entity in snapshot: {}", e);
                            None
                        }
                    })
                    .collect();
                info!("Received snapshot of {} entities", states.len());
                self.store.replace_all(states);
            }
            _ => {}
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{authenticate, recv_json, send_json, spawn_hub};
    use super::*;
    use crate::state::entity;
    use serde_json::json;
    use tokio::sync::oneshot;

    fn hub_config(base_url: &str) -> HubConfig {
        HubConfig {
            base_url: base_url.to_string(),
            token: Some("test_token".to_string()),
            auth_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_websocket_url() {
        assert_eq!(
            websocket_url("http://localhost:8123").unwrap(),
            "ws://localhost:8123/api/websocket"
        );
        assert_eq!(
            websocket_url("https://ha.example.org/").unwrap(),
            "wss://ha.example.org/api/websocket"
        );
        assert_eq!(
            websocket_url("ws://hub:8123").unwrap(),
            "ws://hub:8123/api/websocket"
        );
        assert!(matches!(
            websocket_url("ftp://hub"),
            Err(ConfigError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_outgoing_wire_format() {
        assert_eq!(
            serde_json::to_value(Outgoing::SubscribeEvents {
                id: 1,
                event_type: "state_changed"
            })
            .unwrap(),
            json!({"type": "subscribe_events", "id": 1, "event_type": "state_changed"})
        );
        assert_eq!(
            serde_json::to_value(Outgoing::GetStates { id: 2 }).unwrap(),
            json!({"type": "get_states", "id": 2})
        );
    }

    #[tokio::test]
    async fn test_missing_token_is_config_error() {
        let mut config = hub_config("http://127.0.0.1:1");
        config.token = None;
        let err = connect(&config, Arc::new(StateStore::new())).await.err().unwrap();
        assert!(matches!(
            err,
            HubError::Config(ConfigError::Missing("HA_LONG_LIVED_TOKEN"))
        ));
    }

    #[tokio::test]
    async fn test_handshake_sends_one_subscribe_and_one_get_states() {
        let (tx, rx) = oneshot::channel();
        let url = spawn_hub(|mut ws| async move {
            authenticate(&mut ws).await;
            let mut received = Vec::new();
            while let Some(msg) = recv_json(&mut ws).await {
                received.push(msg);
            }
            let _ = tx.send(received);
        })
        .await;

        let conn = connect(&hub_config(&url), Arc::new(StateStore::new()))
            .await
            .unwrap();
        drop(conn);

        let received = rx.await.unwrap();
        assert_eq!(
            received,
            vec![
                json!({"type": "subscribe_events", "id": 1, "event_type": "state_changed"}),
                json!({"type": "get_states", "id": 2}),
            ]
        );
    }

    #[tokio::test]
    async fn test_auth_invalid_is_auth_error() {
        let url = spawn_hub(|mut ws| async move {
            send_json(&mut ws, json!({"type": "auth_required"})).await;
            let _ = recv_json(&mut ws).await;
            send_json(
                &mut ws,
                json!({"type": "auth_invalid", "message": "Invalid access token or password"}),
            )
            .await;
            let _ = recv_json(&mut ws).await;
        })
        .await;

        let err = connect(&hub_config(&url), Arc::new(StateStore::new()))
            .await
            .err()
            .unwrap();
        match err {
            HubError::Auth(message) => assert_eq!(message, "Invalid access token or password"),
            other => panic!("expected auth error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_before_auth_is_transport_error() {
        let url = spawn_hub(|mut ws| async move {
            send_json(&mut ws, json!({"type": "auth_required"})).await;
            let _ = recv_json(&mut ws).await;
            let _ = ws.close(None).await;
        })
        .await;

        let err = connect(&hub_config(&url), Arc::new(StateStore::new()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, HubError::Transport(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_silent_hub_times_out() {
        let url = spawn_hub(|mut ws| async move {
            send_json(&mut ws, json!({"type": "auth_required"})).await;
            let _ = recv_json(&mut ws).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;

        let mut config = hub_config(&url);
        config.auth_timeout = Duration::from_millis(200);
        let err = connect(&config, Arc::new(StateStore::new())).await.err().unwrap();
        assert!(matches!(err, HubError::Timeout(d) if d == Duration::from_millis(200)));
    }

    #[tokio::test]
    async fn test_snapshot_and_events_reach_the_store() {
        let url = spawn_hub(|mut ws| async move {
            authenticate(&mut ws).await;
            let _subscribe = recv_json(&mut ws).await;
            let get_states = recv_json(&mut ws).await.unwrap();
            let id = get_states["id"].clone();

            send_json(&mut ws, json!({"id": 1, "type": "result", "success": true, "result": null})).await;
            send_json(
                &mut ws,
                json!({"id": id, "type": "result", "success": false,
                    "error": {"code": "unknown_error", "message": "busy"},
                    "result": [serde_json::to_value(entity("sensor.stale", "99")).unwrap()]}),
            )
            .await;
            send_json(
                &mut ws,
                json!({"id": id, "type": "result", "success": true, "result": [
                    serde_json::to_value(entity("sensor.temp", "21.5")).unwrap(),
                    serde_json::to_value(entity("sensor.humidity", "60")).unwrap(),
                ]}),
            )
            .await;
            send_json(
                &mut ws,
                json!({"id": 1, "type": "event", "event": {
                    "event_type": "state_changed",
                    "data": {
                        "entity_id": "sensor.temp",
                        "old_state": null,
                        "new_state": serde_json::to_value(entity("sensor.temp", "22.0")).unwrap(),
                    }
                }}),
            )
            .await;
            send_json(
                &mut ws,
                json!({"id": 1, "type": "event", "event": {
                    "event_type": "state_changed",
                    "data": {"entity_id": "sensor.gone", "new_state": null}
                }}),
            )
            .await;
            let _ = ws.close(None).await;
        })
        .await;

        let store = Arc::new(StateStore::new());
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        store.add_listener("sensor.temp", move |s| {
            seen_clone.lock().unwrap().push(s.state.clone());
        });

        let conn = connect(&hub_config(&url), store.clone()).await.unwrap();
        let err = conn.run().await;

        assert!(matches!(err, HubError::Transport(_)));
        assert_eq!(*seen.lock().unwrap(), vec!["21.5", "22.0"]);
        assert_eq!(store.get_state("sensor.humidity").unwrap().state, "60");
        assert!(store.get_state("sensor.gone").is_none());
        assert!(store.get_state("sensor.stale").is_none());
    }

    #[tokio::test]
    async fn test_malformed_entity_does_not_drop_snapshot() {
        let url = spawn_hub(|mut ws| async move {
            authenticate(&mut ws).await;
            let _subscribe = recv_json(&mut ws).await;
            let get_states = recv_json(&mut ws).await.unwrap();
            send_json(
                &mut ws,
                json!({"id": get_states["id"], "type": "result", "success": true, "result": [
                    {"entity_id": "sensor.broken", "state": "1"},
                    serde_json::to_value(entity("sensor.temp", "21.5")).unwrap(),
                    {"entity_id": "sensor.odd", "state": 3, "attributes": {},
                        "last_changed": "2024-03-01T12:00:00Z"},
                ]}),
            )
            .await;
            let _ = ws.close(None).await;
        })
        .await;

        let store = Arc::new(StateStore::new());
        let conn = connect(&hub_config(&url), store.clone()).await.unwrap();
        let _ = conn.run().await;

        assert_eq!(store.get_state("sensor.temp").unwrap().state, "21.5");
        assert!(store.get_state("sensor.broken").is_none());
        assert!(store.get_state("sensor.odd").is_none());
    }
}
