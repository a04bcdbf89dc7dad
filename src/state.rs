use crate::config::Config;
use crate::dashboard::Dashboard;
use crate::error::DataError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;

/// Last known state of one hub entity, as sent by the hub.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub last_changed: DateTime<Utc>,
}

impl EntityState {
    pub fn numeric(&self) -> Result<f64, DataError> {
        self.state
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| DataError {
                entity_id: self.entity_id.clone(),
                value: self.state.clone(),
            })
    }
}

pub type Listener = Arc<dyn Fn(&EntityState) + Send + Sync>;

/// Entity state cache plus the per-entity listener registry.
///
/// The hub task is the only writer. Listeners run synchronously on the
/// writer, in registration order, and may read the store.
#[derive(Default)]
pub struct StateStore {
    cache: DashMap<String, EntityState>,
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_state(&self, entity_id: &str) -> Option<EntityState> {
        self.cache.get(entity_id).map(|s| s.clone())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Registers `callback` for `entity_id`. A cached state is delivered
    /// before this returns.
    pub fn add_listener<F>(&self, entity_id: impl Into<String>, callback: F)
    where
        F: Fn(&EntityState) + Send + Sync + 'static,
    {
        let entity_id = entity_id.into();
        let listener: Listener = Arc::new(callback);

        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(entity_id.clone())
            .or_default()
            .push(listener.clone());

        if let Some(state) = self.get_state(&entity_id) {
            listener(&state);
        }
    }

    /// Replaces the cached state for its entity and notifies its listeners.
    pub fn update(&self, state: EntityState) {
        self.cache.insert(state.entity_id.clone(), state.clone());
        self.notify(&state);
    }

    /// Bulk load from a snapshot, then replay every cached entity once.
    pub fn replace_all(&self, states: Vec<EntityState>) {
        for state in states {
            self.cache.insert(state.entity_id.clone(), state);
        }

        let cached: Vec<EntityState> = self.cache.iter().map(|s| s.value().clone()).collect();
        for state in &cached {
            self.notify(state);
        }
    }

    fn notify(&self, state: &EntityState) {
        let targets = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&state.entity_id)
            .cloned()
            .unwrap_or_default();

        for listener in targets {
            listener(state);
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub dashboard: Arc<Dashboard>,
    pub config: Config,
    pub retry_tx: mpsc::Sender<()>,
}

#[cfg(test)]
pub(crate) fn entity(entity_id: &str, state: &str) -> EntityState {
    EntityState {
        entity_id: entity_id.to_string(),
        state: state.to_string(),
        attributes: Map::new(),
        last_changed: Utc::now(),
    }
}
