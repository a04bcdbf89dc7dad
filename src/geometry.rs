//! Value-to-angle mapping, SVG arc paths and colour-stop lookup.
//!
//! Angles are in degrees with 0° at 12 o'clock, growing clockwise.

use std::f64::consts::PI;

/// Direction an arc is drawn in, from its start angle to its end angle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sweep {
    Clockwise,
    Counterclockwise,
}

impl Sweep {
    fn svg_flag(self) -> u8 {
        match self {
            Sweep::Clockwise => 1,
            Sweep::Counterclockwise => 0,
        }
    }

    fn sign(self) -> f64 {
        match self {
            Sweep::Clockwise => 1.0,
            Sweep::Counterclockwise => -1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorStop {
    pub threshold: f64,
    pub color: &'static str,
}

impl ColorStop {
    pub const fn new(threshold: f64, color: &'static str) -> Self {
        ColorStop { threshold, color }
    }
}

/// Linear map from `[min, max]` onto `[start_angle, end_angle]`.
///
/// Not clamped: values outside the range land outside the angular span.
/// Returns exactly `start_angle` at `min` and exactly `end_angle` at `max`.
pub fn value_to_angle(value: f64, min: f64, max: f64, start_angle: f64, end_angle: f64) -> f64 {
    if max == min {
        return start_angle;
    }
    let t = (value - min) / (max - min);
    start_angle * (1.0 - t) + end_angle * t
}

pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

pub fn polar_to_cartesian(cx: f64, cy: f64, r: f64, angle: f64) -> (f64, f64) {
    let rad = (angle - 90.0) * PI / 180.0;
    (cx + r * rad.cos(), cy + r * rad.sin())
}

/// SVG path for a circular arc from `start_angle` to `end_angle`.
///
/// A zero sweep gives a bare move-to (nothing is drawn). A non-zero sweep
/// that is a whole number of turns gives a full circle, drawn as two half
/// arcs because a single arc segment cannot end where it starts.
pub fn arc_path(cx: f64, cy: f64, r: f64, start_angle: f64, end_angle: f64, sweep: Sweep) -> String {
    let raw = (end_angle - start_angle) * sweep.sign();
    let span = raw.rem_euclid(360.0);
    let (sx, sy) = polar_to_cartesian(cx, cy, r, start_angle);
    let flag = sweep.svg_flag();

    if span == 0.0 {
        if raw == 0.0 {
            return format!("M {} {}", num(sx), num(sy));
        }
        let (mx, my) = polar_to_cartesian(cx, cy, r, start_angle + 180.0 * sweep.sign());
        return format!(
            "M {sx} {sy} A {r} {r} 0 1 {flag} {mx} {my} A {r} {r} 0 1 {flag} {sx} {sy}",
            sx = num(sx),
            sy = num(sy),
            mx = num(mx),
            my = num(my),
            r = num(r),
            flag = flag,
        );
    }

    let (ex, ey) = polar_to_cartesian(cx, cy, r, end_angle);
    let large_arc = u8::from(span > 180.0);
    format!(
        "M {} {} A {r} {r} 0 {} {} {} {}",
        num(sx),
        num(sy),
        large_arc,
        flag,
        num(ex),
        num(ey),
        r = num(r),
    )
}

/// Colour of the stop closest to `value`; ties go to the earlier stop.
pub fn nearest_color(value: f64, stops: &[ColorStop]) -> Option<&'static str> {
    let mut best: Option<(f64, &'static str)> = None;
    for stop in stops {
        let distance = (value - stop.threshold).abs();
        match best {
            Some((d, _)) if distance >= d => {}
            _ => best = Some((distance, stop.color)),
        }
    }
    best.map(|(_, color)| color)
}

/// Fixed two-decimal coordinates keep paths stable and readable.
pub(crate) fn num(v: f64) -> String {
    let s = format!("{:.2}", v);
    if s == "-0.00" {
        "0.00".to_string()
    } else {
        s
    }
}
