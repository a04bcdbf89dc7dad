use crate::error::ConfigError;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::env;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct Config {
    pub ha_base_url: String,
    pub ha_token: Option<String>,
    pub port: u16,
    pub locale: String,
    pub refresh_ms: u64,
    pub auth_timeout_secs: u64,
    pub history_hours: i64,
    pub history_points: usize,
    pub entities: EntityMap,
    pub rooms: Vec<RoomConfig>,
}

/// Outdoor entities shown on the main gauges.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntityMap {
    pub temperature: String,
    pub temperature_secondary: String,
    pub humidity: String,
    pub pressure: String,
    pub rain_today: String,
    pub rain_last_hour: String,
}

impl Default for EntityMap {
    fn default() -> Self {
        EntityMap {
            temperature: "sensor.outdoor_temperature".to_string(),
            temperature_secondary: "sensor.outdoor_feels_like".to_string(),
            humidity: "sensor.outdoor_humidity".to_string(),
            pressure: "sensor.outdoor_pressure".to_string(),
            rain_today: "sensor.rain_today".to_string(),
            rain_last_hour: "sensor.rain_last_hour".to_string(),
        }
    }
}

impl EntityMap {
    fn from_env(entity_re: &Regex) -> Result<Self, ConfigError> {
        let mut map = EntityMap::default();

        let slots = [
            ("TEMPERATURE", &mut map.temperature),
            ("TEMPERATURE_SECONDARY", &mut map.temperature_secondary),
            ("HUMIDITY", &mut map.humidity),
            ("PRESSURE", &mut map.pressure),
            ("RAIN_TODAY", &mut map.rain_today),
            ("RAIN_LAST_HOUR", &mut map.rain_last_hour),
        ];

        for (key, slot) in slots {
            let name = format!("ENTITY_{}", key);
            let Ok(value) = env::var(&name) else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            if !entity_re.is_match(value) {
                return Err(ConfigError::InvalidEntityId {
                    name,
                    value: value.to_string(),
                });
            }
            *slot = value.to_string();
        }

        Ok(map)
    }
}

/// The auxiliary room panels, in display order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomSlot {
    Secondary,
    Tertiary,
    Quad,
    Quint,
}

impl RoomSlot {
    pub const ALL: [RoomSlot; 4] = [
        RoomSlot::Secondary,
        RoomSlot::Tertiary,
        RoomSlot::Quad,
        RoomSlot::Quint,
    ];

    pub fn key(self) -> &'static str {
        match self {
            RoomSlot::Secondary => "secondary",
            RoomSlot::Tertiary => "tertiary",
            RoomSlot::Quad => "quad",
            RoomSlot::Quint => "quint",
        }
    }

    fn env_key(self) -> &'static str {
        match self {
            RoomSlot::Secondary => "SECONDARY",
            RoomSlot::Tertiary => "TERTIARY",
            RoomSlot::Quad => "QUAD",
            RoomSlot::Quint => "QUINT",
        }
    }

    fn default_name(self) -> &'static str {
        match self {
            RoomSlot::Secondary => "Room 2",
            RoomSlot::Tertiary => "Room 3",
            RoomSlot::Quad => "Room 4",
            RoomSlot::Quint => "Room 5",
        }
    }
}

/// Entity ids of one room, resolved once when the configuration is read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoomEntities {
    pub temperature: String,
    pub trend: String,
    pub humidity: String,
    pub co2: String,
}

impl RoomEntities {
    /// `bedroom` and `sensor.bedroom` both resolve to `sensor.bedroom_*`.
    pub fn for_prefix(prefix: &str) -> Self {
        let base = if prefix.contains('.') {
            prefix.to_string()
        } else {
            format!("sensor.{}", prefix)
        };

        RoomEntities {
            temperature: format!("{}_temperature", base),
            trend: format!("{}_temperature_trend", base),
            humidity: format!("{}_humidity", base),
            co2: format!("{}_co2", base),
        }
    }

    fn all(&self) -> [&str; 4] {
        [&self.temperature, &self.trend, &self.humidity, &self.co2]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoomConfig {
    pub slot: RoomSlot,
    pub prefix: String,
    pub name: String,
    pub entities: RoomEntities,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let ha_base_url =
            env::var("HA_BASE_URL").map_err(|_| ConfigError::Missing("HA_BASE_URL"))?;
        // Checked when connecting, so the page can still show why nothing loads.
        let ha_token = env::var("HA_LONG_LIVED_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty());
        let port = env_or("PORT", 8080)?;
        let locale = env::var("LOCALE").unwrap_or_else(|_| "en_US".to_string());
        let refresh_ms = env_or("REFRESH_MS", 500)?;
        let auth_timeout_secs = env_or("AUTH_TIMEOUT_SECS", 10)?;
        let history_hours = env_or("HISTORY_HOURS", 24)?;
        if !(1..=MAX_HISTORY_HOURS).contains(&history_hours) {
            return Err(ConfigError::InvalidNumber {
                name: "HISTORY_HOURS",
                value: history_hours.to_string(),
            });
        }
        let history_points = env_or("HISTORY_POINTS", 144)?;

        // Ensure base URL doesn't end with slash for cleaner path joining
        let ha_base_url = ha_base_url.trim_end_matches('/').to_string();

        let entity_re = entity_id_regex();
        let entities = EntityMap::from_env(&entity_re)?;

        let mut rooms = Vec::new();
        for slot in RoomSlot::ALL {
            let prefix_var = format!("ROOM_{}_PREFIX", slot.env_key());
            let Ok(prefix) = env::var(&prefix_var) else {
                continue;
            };
            let prefix = prefix.trim();
            if prefix.is_empty() {
                continue;
            }

            let name = env::var(format!("ROOM_{}_NAME", slot.env_key()))
                .ok()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| slot.default_name().to_string());

            let entities = RoomEntities::for_prefix(prefix);
            if entities.all().iter().any(|id| !entity_re.is_match(id)) {
                return Err(ConfigError::InvalidEntityId {
                    name: prefix_var,
                    value: prefix.to_string(),
                });
            }

            rooms.push(RoomConfig {
                slot,
                prefix: prefix.to_string(),
                name,
                entities,
            });
        }

        Ok(Config {
            ha_base_url,
            ha_token,
            port,
            locale,
            refresh_ms,
            auth_timeout_secs,
            history_hours,
            history_points,
            entities,
            rooms,
        })
    }

    /// Every entity the dashboard listens to, sorted and deduplicated.
    pub fn watched_entities(&self) -> Vec<String> {
        let mut ids = BTreeSet::new();
        let e = &self.entities;
        for id in [
            &e.temperature,
            &e.temperature_secondary,
            &e.humidity,
            &e.pressure,
            &e.rain_today,
            &e.rain_last_hour,
        ] {
            ids.insert(id.clone());
        }
        for room in &self.rooms {
            for id in room.entities.all() {
                ids.insert(id.to_string());
            }
        }
        ids.into_iter().collect()
    }
}

/// One year; longer windows overflow the history query's start time.
const MAX_HISTORY_HOURS: i64 = 24 * 366;

fn env_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
        Err(_) => Ok(default),
    }
}

fn entity_id_regex() -> Regex {
    Regex::new(r"^[a-z0-9_]+\.[a-z0-9_]+$").expect("Invalid entity id regex")
}

/// Decimal separator used when formatting readings for `locale`.
pub fn decimal_separator(locale: &str) -> char {
    let l = locale.to_lowercase();
    // Nordic, continental European, Cyrillic and a few others use a comma.
    let comma_prefixes = [
        "sv", "no", "nb", "nn", "da", "fi", "is", "de", "nl", "pl", "cs", "sk", "hu", "ro", "bg",
        "hr", "sr", "sl", "bs", "mk", "fr", "es", "pt", "it", "el", "tr", "ru", "uk", "be", "kk",
        "id", "vi", "az", "sq", "hy", "ka",
    ];

    if comma_prefixes.iter().any(|&p| l.starts_with(p)) {
        ','
    } else {
        '.'
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests(ha_base_url: &str) -> Self {
        Config {
            ha_base_url: ha_base_url.to_string(),
            ha_token: Some("test_token".to_string()),
            port: 0,
            locale: "en_US".to_string(),
            refresh_ms: 20,
            auth_timeout_secs: 10,
            history_hours: 24,
            history_points: 144,
            entities: EntityMap::default(),
            rooms: Vec::new(),
        }
    }
}
