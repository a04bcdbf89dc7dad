use crate::config::{RoomConfig, RoomSlot};
use crate::error::RenderError;
use crate::gauge::NumberFormat;
use crate::geometry::{nearest_color, ColorStop};
use crate::scene::{lock, Scene, SharedScene};
use crate::state::StateStore;
use std::sync::Arc;
use tracing::warn;

const CO2_STOPS: &[ColorStop] = &[
    ColorStop::new(400.0, "#22c55e"),
    ColorStop::new(800.0, "#a3e635"),
    ColorStop::new(1000.0, "#fbbf24"),
    ColorStop::new(1500.0, "#f97316"),
    ColorStop::new(2000.0, "#ef4444"),
];

/// Element ids of one room panel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomElements {
    pub root: String,
    pub name: String,
    pub temperature: String,
    pub trend: String,
    pub humidity: String,
    pub co2: String,
    pub co2_icon: String,
}

impl RoomElements {
    pub fn for_slot(slot: RoomSlot) -> Self {
        let base = format!("room-{}", slot.key());
        RoomElements {
            name: format!("{}-name", base),
            temperature: format!("{}-temp", base),
            trend: format!("{}-trend", base),
            humidity: format!("{}-humidity", base),
            co2: format!("{}-co2", base),
            co2_icon: format!("{}-co2-icon", base),
            root: base,
        }
    }

    fn all(&self) -> [&str; 7] {
        [
            &self.root,
            &self.name,
            &self.temperature,
            &self.trend,
            &self.humidity,
            &self.co2,
            &self.co2_icon,
        ]
    }
}

#[derive(Clone, Copy, Debug)]
enum RoomReading {
    Temperature,
    Humidity,
    Co2,
}

pub struct RoomPanel {
    config: RoomConfig,
    elements: RoomElements,
    format: NumberFormat,
}

impl RoomPanel {
    pub fn new(config: RoomConfig, format: NumberFormat) -> Self {
        let elements = RoomElements::for_slot(config.slot);
        RoomPanel {
            config,
            elements,
            format,
        }
    }

    #[cfg(test)]
    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn elements(&self) -> &RoomElements {
        &self.elements
    }

    pub fn declare(&self, scene: &mut Scene) {
        for id in self.elements.all() {
            scene.declare(id);
        }
    }

    /// Writes the room name and subscribes the panel to its four entities.
    pub fn bind(self: &Arc<Self>, store: &StateStore, scene: &SharedScene) {
        if let Err(e) = lock(scene).set_text(&self.elements.name, self.config.name.clone()) {
            warn!("Room {}: {}", self.config.name, e);
        }

        let entities = &self.config.entities;
        let numeric = [
            (entities.temperature.clone(), RoomReading::Temperature),
            (entities.humidity.clone(), RoomReading::Humidity),
            (entities.co2.clone(), RoomReading::Co2),
        ];

        for (entity_id, reading) in numeric {
            let panel = self.clone();
            let scene = scene.clone();
            store.add_listener(entity_id, move |state| {
                let value = match state.numeric() {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("Skipping update: {}", e);
                        return;
                    }
                };
                if let Err(e) = panel.show(&mut lock(&scene), reading, value) {
                    warn!("Room {}: {}", panel.config.name, e);
                }
            });
        }

        let panel = self.clone();
        let scene = scene.clone();
        store.add_listener(entities.trend.clone(), move |state| {
            let glyph = trend_glyph(&state.state);
            if let Err(e) = lock(&scene).set_text(&panel.elements.trend, glyph) {
                warn!("Room {}: {}", panel.config.name, e);
            }
        });
    }

    fn show(&self, scene: &mut Scene, reading: RoomReading, value: f64) -> Result<(), RenderError> {
        match reading {
            RoomReading::Temperature => scene.set_text(
                &self.elements.temperature,
                format!("{}°", self.format.format(value, 1)),
            ),
            RoomReading::Humidity => scene.set_text(
                &self.elements.humidity,
                format!("{}%", self.format.format(value, 0)),
            ),
            RoomReading::Co2 => {
                scene.set_text(
                    &self.elements.co2,
                    format!("{} ppm", self.format.format(value, 0)),
                )?;
                match nearest_color(value, CO2_STOPS) {
                    Some(color) => scene.set_attr(&self.elements.co2_icon, "fill", color),
                    None => Ok(()),
                }
            }
        }
    }
}

/// Arrow for a trend sensor: words like `rising`, or a signed delta.
pub fn trend_glyph(state: &str) -> &'static str {
    match state.trim().to_lowercase().as_str() {
        "rising" | "up" | "increasing" => "↑",
        "falling" | "down" | "decreasing" => "↓",
        other => match other.parse::<f64>() {
            Ok(delta) if delta > 0.0 => "↑",
            Ok(delta) if delta < 0.0 => "↓",
            _ => "→",
        },
    }
}
