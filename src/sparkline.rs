//! Small 24h trend lines under the main gauges.

use crate::error::RenderError;
use crate::geometry::num;
use crate::scene::Scene;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HistoryPoint {
    pub value: f64,
    pub time: DateTime<Utc>,
}

/// Bounded FIFO of recent readings with padded display bounds.
#[derive(Clone, Debug)]
pub struct HistoryBuffer {
    points: VecDeque<HistoryPoint>,
    min: f64,
    max: f64,
    max_points: usize,
    padding: f64,
}

impl HistoryBuffer {
    pub fn new(max_points: usize, padding: f64) -> Self {
        let max_points = max_points.max(1);
        HistoryBuffer {
            points: VecDeque::with_capacity(max_points),
            min: 0.0,
            max: 0.0,
            max_points,
            padding,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.value)
    }

    /// Replaces the contents, keeping the newest `max_points`, and
    /// recomputes the bounds from scratch.
    pub fn load(&mut self, points: Vec<HistoryPoint>) {
        let skip = points.len().saturating_sub(self.max_points);
        self.points = points.into_iter().skip(skip).collect();

        let (lo, hi) = self
            .values()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
        if lo.is_finite() {
            self.min = lo - self.padding;
            self.max = hi + self.padding;
        } else {
            self.min = 0.0;
            self.max = 0.0;
        }
    }

    /// Appends, evicting the oldest point at capacity. A bound only moves
    /// when the value comes within half a padding of it.
    pub fn push(&mut self, point: HistoryPoint) {
        let v = point.value;
        if self.points.is_empty() {
            self.min = v - self.padding;
            self.max = v + self.padding;
        } else {
            if v > self.max - self.padding / 2.0 {
                self.max = v + self.padding;
            }
            if v < self.min + self.padding / 2.0 {
                self.min = v - self.padding;
            }
        }

        self.points.push_back(point);
        while self.points.len() > self.max_points {
            self.points.pop_front();
        }
    }
}

pub struct Sparkline {
    id: String,
    buffer: HistoryBuffer,
    width: f64,
    height: f64,
}

impl Sparkline {
    pub const WIDTH: f64 = 300.0;
    pub const HEIGHT: f64 = 60.0;

    pub fn new(id: impl Into<String>, max_points: usize, padding: f64) -> Self {
        Sparkline {
            id: id.into(),
            buffer: HistoryBuffer::new(max_points, padding),
            width: Self::WIDTH,
            height: Self::HEIGHT,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    #[cfg(test)]
    pub fn buffer(&self) -> &HistoryBuffer {
        &self.buffer
    }

    pub fn line_id(&self) -> String {
        format!("{}-line", self.id)
    }

    pub fn dot_id(&self) -> String {
        format!("{}-dot", self.id)
    }

    pub fn declare(&self, scene: &mut Scene) {
        scene.declare(self.id.clone());
        scene.declare(self.line_id());
        scene.declare(self.dot_id());
    }

    pub fn load(&mut self, scene: &mut Scene, points: Vec<HistoryPoint>) -> Result<(), RenderError> {
        self.buffer.load(points);
        self.render(scene)
    }

    pub fn add_point(&mut self, scene: &mut Scene, value: f64, time: DateTime<Utc>) -> Result<(), RenderError> {
        self.buffer.push(HistoryPoint { value, time });
        self.render(scene)
    }

    pub fn render(&self, scene: &mut Scene) -> Result<(), RenderError> {
        let coords = self.coordinates();
        let Some(&(x, y)) = coords.last() else {
            scene.set_attr(&self.line_id(), "d", "")?;
            return scene.set_hidden(&self.dot_id(), true);
        };

        scene.set_attr(&self.line_id(), "d", smooth_path(&coords))?;
        scene.set_attr(&self.dot_id(), "cx", num(x))?;
        scene.set_attr(&self.dot_id(), "cy", num(y))?;
        scene.set_hidden(&self.dot_id(), false)
    }

    fn coordinates(&self) -> Vec<(f64, f64)> {
        let n = self.buffer.len();
        let step = if n > 1 {
            self.width / (n - 1) as f64
        } else {
            0.0
        };
        let (min, max) = self.buffer.bounds();
        let span = max - min;

        self.buffer
            .values()
            .enumerate()
            .map(|(i, v)| {
                let x = if n > 1 { i as f64 * step } else { self.width };
                let y = if span > 0.0 {
                    self.height - (v - min) / span * self.height
                } else {
                    self.height / 2.0
                };
                (x, y)
            })
            .collect()
    }
}

/// Cubic Bézier through `points`, control points at 20 % of the spacing.
pub fn smooth_path(points: &[(f64, f64)]) -> String {
    let Some(&(x0, y0)) = points.first() else {
        return String::new();
    };

    let mut path = format!("M {} {}", num(x0), num(y0));
    for pair in points.windows(2) {
        let (ax, ay) = pair[0];
        let (bx, by) = pair[1];
        let dx = (bx - ax) * 0.2;
        path.push_str(&format!(
            " C {} {}, {} {}, {} {}",
            num(ax + dx),
            num(ay),
            num(bx - dx),
            num(by),
            num(bx),
            num(by)
        ));
    }
    path
}
