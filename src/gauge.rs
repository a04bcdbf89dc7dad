//! Arc gauges: outdoor temperature, secondary temperature, humidity,
//! pressure and rainfall.

use crate::config::decimal_separator;
use crate::error::RenderError;
use crate::geometry::{
    arc_path, clamp, nearest_color, num, polar_to_cartesian, value_to_angle, ColorStop, Sweep,
};
use crate::scene::Scene;

/// Shown instead of a number until the first real reading arrives.
pub const PLACEHOLDER: &str = "--";

pub const CENTER: f64 = 100.0;
pub const RADIUS: f64 = 80.0;

const TEMPERATURE_STOPS: &[ColorStop] = &[
    ColorStop::new(-20.0, "#6366f1"),
    ColorStop::new(-10.0, "#3b82f6"),
    ColorStop::new(0.0, "#38bdf8"),
    ColorStop::new(10.0, "#34d399"),
    ColorStop::new(20.0, "#fbbf24"),
    ColorStop::new(30.0, "#f97316"),
    ColorStop::new(40.0, "#ef4444"),
];

const HUMIDITY_STOPS: &[ColorStop] = &[
    ColorStop::new(0.0, "#f59e0b"),
    ColorStop::new(30.0, "#fbbf24"),
    ColorStop::new(50.0, "#34d399"),
    ColorStop::new(70.0, "#38bdf8"),
    ColorStop::new(100.0, "#2563eb"),
];

const PRESSURE_STOPS: &[ColorStop] = &[
    ColorStop::new(950.0, "#7c3aed"),
    ColorStop::new(990.0, "#38bdf8"),
    ColorStop::new(1013.0, "#34d399"),
    ColorStop::new(1030.0, "#fbbf24"),
    ColorStop::new(1050.0, "#f97316"),
];

const RAIN_STOPS: &[ColorStop] = &[
    ColorStop::new(0.0, "#93c5fd"),
    ColorStop::new(5.0, "#3b82f6"),
    ColorStop::new(25.0, "#1d4ed8"),
    ColorStop::new(100.0, "#1e3a8a"),
];

#[derive(Clone, Debug, PartialEq)]
pub struct GaugeConfig {
    pub id: &'static str,
    pub title: &'static str,
    pub unit: &'static str,
    pub min: f64,
    pub max: f64,
    pub start_angle: f64,
    pub end_angle: f64,
    pub sweep: Sweep,
    pub decimals: usize,
    pub color_stops: &'static [ColorStop],
}

impl GaugeConfig {
    pub fn temperature() -> Self {
        GaugeConfig {
            id: "temperature",
            title: "Temperature",
            unit: "°C",
            min: -20.0,
            max: 40.0,
            start_angle: -135.0,
            end_angle: 135.0,
            sweep: Sweep::Clockwise,
            decimals: 1,
            color_stops: TEMPERATURE_STOPS,
        }
    }

    /// Mirrored gauge that fills from the right.
    pub fn secondary_temperature() -> Self {
        GaugeConfig {
            id: "temperature-secondary",
            title: "Feels like",
            start_angle: 135.0,
            end_angle: -135.0,
            sweep: Sweep::Counterclockwise,
            ..Self::temperature()
        }
    }

    pub fn humidity() -> Self {
        GaugeConfig {
            id: "humidity",
            title: "Humidity",
            unit: "%",
            min: 0.0,
            max: 100.0,
            start_angle: -135.0,
            end_angle: 135.0,
            sweep: Sweep::Clockwise,
            decimals: 0,
            color_stops: HUMIDITY_STOPS,
        }
    }

    pub fn pressure() -> Self {
        GaugeConfig {
            id: "pressure",
            title: "Pressure",
            unit: "hPa",
            min: 950.0,
            max: 1050.0,
            decimals: 0,
            color_stops: PRESSURE_STOPS,
            ..Self::humidity()
        }
    }

    /// `max` is replaced by the selected [`RainBand`] at render time.
    pub fn rainfall() -> Self {
        GaugeConfig {
            id: "rainfall",
            title: "Rain today",
            unit: "mm",
            min: 0.0,
            max: RAIN_BANDS[0].max,
            decimals: 1,
            color_stops: RAIN_STOPS,
            ..Self::humidity()
        }
    }

    pub fn arc_id(&self) -> String {
        format!("{}-arc", self.id)
    }

    pub fn value_id(&self) -> String {
        format!("{}-value", self.id)
    }

    pub fn icon_id(&self) -> String {
        format!("{}-icon", self.id)
    }

    pub fn ticks_id(&self) -> String {
        format!("{}-ticks", self.id)
    }

    /// The full background arc.
    pub fn track_path(&self) -> String {
        arc_path(CENTER, CENTER, RADIUS, self.start_angle, self.end_angle, self.sweep)
    }

    /// Offsets in `[0, 1]` for the interpolated track gradient.
    pub fn gradient_stops(&self) -> Vec<(f64, &'static str)> {
        let span = self.max - self.min;
        self.color_stops
            .iter()
            .map(|stop| {
                let offset = if span > 0.0 {
                    clamp((stop.threshold - self.min) / span, 0.0, 1.0)
                } else {
                    0.0
                };
                (offset, stop.color)
            })
            .collect()
    }
}

/// Locale-aware fixed-decimal formatting.
#[derive(Clone, Copy, Debug)]
pub struct NumberFormat {
    decimal_separator: char,
}

impl NumberFormat {
    pub fn new(locale: &str) -> Self {
        NumberFormat {
            decimal_separator: decimal_separator(locale),
        }
    }

    pub fn format(&self, value: f64, decimals: usize) -> String {
        let s = format!("{:.*}", decimals, value);
        // "-0.0" reads as a glitch on a display.
        let s = if s.starts_with('-') && s[1..].chars().all(|c| c == '0' || c == '.') {
            s[1..].to_string()
        } else {
            s
        };
        if self.decimal_separator == '.' {
            s
        } else {
            s.replace('.', &self.decimal_separator.to_string())
        }
    }
}

/// What a render call wrote.
#[derive(Clone, Debug, PartialEq)]
pub struct GaugeReading {
    pub angle: f64,
    pub arc: String,
    pub text: String,
    pub icon_color: Option<&'static str>,
}

pub struct Gauge {
    config: GaugeConfig,
    format: NumberFormat,
}

impl Gauge {
    pub fn new(config: GaugeConfig, format: NumberFormat) -> Self {
        Gauge { config, format }
    }

    pub fn config(&self) -> &GaugeConfig {
        &self.config
    }

    pub fn declare(&self, scene: &mut Scene) {
        scene.declare(self.config.id);
        scene.declare(self.config.arc_id());
        scene.declare(self.config.value_id());
        scene.declare(self.config.icon_id());
    }

    /// Redraws the gauge for `value`.
    ///
    /// While `initializing`, the arc sits at the minimum and the text shows
    /// [`PLACEHOLDER`]; the icon colour always follows `value`.
    pub fn render(&self, scene: &mut Scene, value: f64, initializing: bool) -> Result<GaugeReading, RenderError> {
        self.paint(scene, value, initializing, self.config.max)
    }

    fn paint(
        &self,
        scene: &mut Scene,
        value: f64,
        initializing: bool,
        max: f64,
    ) -> Result<GaugeReading, RenderError> {
        let c = &self.config;
        let shown = if initializing {
            c.min
        } else {
            clamp(value, c.min, max)
        };
        let angle = value_to_angle(shown, c.min, max, c.start_angle, c.end_angle);
        let arc = arc_path(CENTER, CENTER, RADIUS, c.start_angle, angle, c.sweep);
        // Out-of-range readings pin the arc but are still reported as read.
        let text = if initializing {
            PLACEHOLDER.to_string()
        } else {
            self.format.format(value, c.decimals)
        };
        let icon_color = nearest_color(value, c.color_stops);

        scene.set_attr(&c.arc_id(), "d", arc.clone())?;
        scene.set_text(&c.value_id(), text.clone())?;
        if let Some(color) = icon_color {
            scene.set_attr(&c.icon_id(), "fill", color)?;
        }

        Ok(GaugeReading {
            angle,
            arc,
            text,
            icon_color,
        })
    }
}

/// One rainfall display scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RainBand {
    pub max: f64,
    pub step: f64,
}

pub const RAIN_BANDS: [RainBand; 6] = [
    RainBand { max: 3.0, step: 0.5 },
    RainBand { max: 5.0, step: 1.0 },
    RainBand { max: 10.0, step: 2.0 },
    RainBand { max: 25.0, step: 5.0 },
    RainBand { max: 50.0, step: 10.0 },
    RainBand { max: 100.0, step: 25.0 },
];

/// Smallest band that fits `value`, else the largest.
pub fn select_band(value: f64) -> RainBand {
    RAIN_BANDS[band_index(value)]
}

fn band_index(value: f64) -> usize {
    RAIN_BANDS
        .iter()
        .position(|band| band.max >= value)
        .unwrap_or(RAIN_BANDS.len() - 1)
}

/// Rainfall gauge with an automatically chosen scale.
pub struct RainfallGauge {
    gauge: Gauge,
    band: Option<usize>,
}

impl RainfallGauge {
    pub fn new(format: NumberFormat) -> Self {
        RainfallGauge {
            gauge: Gauge::new(GaugeConfig::rainfall(), format),
            band: None,
        }
    }

    pub fn config(&self) -> &GaugeConfig {
        self.gauge.config()
    }

    #[cfg(test)]
    pub fn band(&self) -> Option<RainBand> {
        self.band.map(|i| RAIN_BANDS[i])
    }

    pub fn declare(&self, scene: &mut Scene) {
        self.gauge.declare(scene);
        scene.declare(self.config().ticks_id());
    }

    /// Redraws the gauge; tick marks are rebuilt only when the band
    /// changes. The flag reports whether they were.
    pub fn render(
        &mut self,
        scene: &mut Scene,
        value: f64,
        initializing: bool,
    ) -> Result<(GaugeReading, bool), RenderError> {
        let index = if initializing { 0 } else { band_index(value) };
        let band = RAIN_BANDS[index];

        let ticks_changed = self.band != Some(index);
        if ticks_changed {
            scene.set_inner(&self.config().ticks_id(), self.tick_markup(band))?;
            self.band = Some(index);
        }

        let reading = self.gauge.paint(scene, value, initializing, band.max)?;
        Ok((reading, ticks_changed))
    }

    /// Hides the whole gauge while it has not rained today or in the last hour.
    pub fn update_visibility(&self, scene: &mut Scene, today: f64, last_hour: f64) -> Result<bool, RenderError> {
        let visible = today > 0.0 || last_hour > 0.0;
        scene.set_hidden(self.config().id, !visible)?;
        Ok(visible)
    }

    fn tick_markup(&self, band: RainBand) -> String {
        let c = self.config();
        let decimals = if band.step.fract() == 0.0 { 0 } else { 1 };
        let steps = (band.max / band.step).round() as usize;

        let mut markup = String::new();
        for i in 0..=steps {
            let value = i as f64 * band.step;
            let angle = value_to_angle(value, c.min, band.max, c.start_angle, c.end_angle);
            let (x1, y1) = polar_to_cartesian(CENTER, CENTER, RADIUS - 6.0, angle);
            let (x2, y2) = polar_to_cartesian(CENTER, CENTER, RADIUS + 6.0, angle);
            let (lx, ly) = polar_to_cartesian(CENTER, CENTER, RADIUS - 18.0, angle);
            markup.push_str(&format!(
                r#"<line class="tick" x1="{}" y1="{}" x2="{}" y2="{}"/><text class="tick-label" x="{}" y="{}" text-anchor="middle">{}</text>"#,
                num(x1),
                num(y1),
                num(x2),
                num(y2),
                num(lx),
                num(ly),
                self.gauge.format.format(value, decimals),
            ));
        }
        markup
    }
}
