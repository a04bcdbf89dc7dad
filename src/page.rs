//! HTML for the dashboard, built from the current scene. The embedded
//! script mirrors later scene changes from `/events` into the DOM.

use crate::dashboard::{Dashboard, OVERLAY_ID, OVERLAY_MESSAGE_ID, STATUS_ID};
use crate::gauge::{GaugeConfig, CENTER};
use crate::scene::Node;
use crate::sparkline::Sparkline;
use std::collections::BTreeMap;

type Nodes = BTreeMap<String, Node>;

pub fn render(dashboard: &Dashboard) -> String {
    let (_, nodes) = dashboard.scene_snapshot();
    let mut body = String::new();

    body.push_str(&format!(
        r#"<header><h1>Weather</h1>{}</header>"#,
        element(&nodes, "span", STATUS_ID, r#"class="status""#, "")
    ));

    body.push_str(r#"<section class="gauges">"#);
    for config in dashboard.gauge_configs() {
        body.push_str(&gauge(&nodes, &config));
    }
    body.push_str("</section>");

    body.push_str(r#"<section class="history">"#);
    for id in dashboard.sparkline_ids() {
        body.push_str(&sparkline(&nodes, &id));
    }
    body.push_str("</section>");

    body.push_str(r#"<section class="rooms">"#);
    for room in dashboard.rooms() {
        let e = room.elements();
        let reading = |id: &str, class: &str| element(&nodes, "span", id, &format!(r#"class="{}""#, class), "");
        let panel = [
            element(&nodes, "h2", &e.name, "", ""),
            reading(&e.temperature, "temp"),
            reading(&e.trend, "trend"),
            reading(&e.humidity, "humidity"),
            format!(
                r#"<svg viewBox="0 0 10 10" class="co2-icon">{}</svg>"#,
                element(&nodes, "circle", &e.co2_icon, r#"cx="5" cy="5" r="4""#, "")
            ),
            reading(&e.co2, "co2"),
        ]
        .concat();
        body.push_str(&element(&nodes, "div", &e.root, r#"class="room""#, &panel));
    }
    body.push_str("</section>");

    let overlay = format!(
        r#"<div class="overlay-box"><p>Connection to the hub failed.</p>{}<button onclick="retryConnection()">Retry</button></div>"#,
        element(&nodes, "p", OVERLAY_MESSAGE_ID, "", "")
    );
    body.push_str(&element(&nodes, "div", OVERLAY_ID, r#"class="overlay""#, &overlay));

    format!("{}{}{}", HEAD, body, TAIL)
}

fn gauge(nodes: &Nodes, c: &GaugeConfig) -> String {
    let gradient_id = format!("{}-gradient", c.id);
    // Mirrored gauges run their gradient right to left.
    let (x1, x2) = if c.start_angle > c.end_angle { (1, 0) } else { (0, 1) };
    let stops: String = c
        .gradient_stops()
        .iter()
        .map(|(offset, color)| format!(r#"<stop offset="{}" stop-color="{}"/>"#, offset, color))
        .collect();

    let mut inner = format!(
        r#"<defs><linearGradient id="{}" x1="{}" y1="0" x2="{}" y2="0">{}</linearGradient></defs><path class="track" d="{}"/>"#,
        gradient_id,
        x1,
        x2,
        stops,
        c.track_path()
    );
    inner.push_str(&element(
        nodes,
        "path",
        &c.arc_id(),
        &format!(r#"class="value" fill="none" stroke="url(#{})""#, gradient_id),
        "",
    ));
    if nodes.contains_key(&c.ticks_id()) {
        inner.push_str(&element(nodes, "g", &c.ticks_id(), r#"class="ticks""#, ""));
    }
    inner.push_str(&element(
        nodes,
        "circle",
        &c.icon_id(),
        &format!(r#"class="icon" cx="{}" cy="150" r="7""#, CENTER),
        "",
    ));
    inner.push_str(&element(
        nodes,
        "text",
        &c.value_id(),
        &format!(r#"class="reading" x="{}" y="108" text-anchor="middle""#, CENTER),
        "",
    ));
    inner.push_str(&format!(
        r#"<text class="unit" x="{cx}" y="128" text-anchor="middle">{}</text><text class="title" x="{cx}" y="192" text-anchor="middle">{}</text>"#,
        escape(c.unit),
        escape(c.title),
        cx = CENTER
    ));

    element(nodes, "svg", c.id, r#"class="gauge" viewBox="0 0 200 200""#, &inner)
}

fn sparkline(nodes: &Nodes, id: &str) -> String {
    let inner = [
        element(nodes, "path", &format!("{}-line", id), r#"class="line" fill="none""#, ""),
        element(nodes, "circle", &format!("{}-dot", id), r#"class="dot" r="3""#, ""),
    ]
    .concat();
    element(
        nodes,
        "svg",
        id,
        &format!(
            r#"class="sparkline" viewBox="0 0 {} {}" preserveAspectRatio="none""#,
            Sparkline::WIDTH,
            Sparkline::HEIGHT
        ),
        &inner,
    )
}

/// Emits `<tag id=…>` with the node's current attributes, visibility, text
/// and inner markup. `children` is appended after any inner markup.
fn element(nodes: &Nodes, tag: &str, id: &str, fixed_attrs: &str, children: &str) -> String {
    let node = nodes.get(id);
    let mut open = format!(r#"<{} id="{}""#, tag, escape(id));
    if !fixed_attrs.is_empty() {
        open.push(' ');
        open.push_str(fixed_attrs);
    }

    let mut content = String::new();
    if let Some(node) = node {
        for (name, value) in &node.attrs {
            open.push_str(&format!(r#" {}="{}""#, name, escape(value)));
        }
        if node.hidden {
            open.push_str(r#" style="display:none""#);
        }
        if let Some(text) = &node.text {
            content.push_str(&escape(text));
        }
        if let Some(inner) = &node.inner {
            content.push_str(inner);
        }
    }
    content.push_str(children);

    format!("{}>{}</{}>", open, content, tag)
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const HEAD: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Weather</title>
<style>
body { font-family: system-ui, sans-serif; background: #0f172a; color: #e2e8f0; margin: 0; padding: 1rem; }
header { display: flex; justify-content: space-between; align-items: baseline; }
.status { color: #94a3b8; }
.gauges, .history, .rooms { display: flex; flex-wrap: wrap; gap: 1rem; margin-top: 1rem; }
.gauge { width: 200px; height: 200px; }
.gauge .track { stroke: #1e293b; stroke-width: 14; fill: none; }
.gauge .value { stroke-width: 14; stroke-linecap: round; }
.gauge .reading { font-size: 32px; fill: #f8fafc; }
.gauge .unit, .gauge .title { font-size: 13px; fill: #94a3b8; }
.ticks .tick { stroke: #475569; stroke-width: 2; }
.ticks .tick-label { font-size: 9px; fill: #94a3b8; }
.sparkline { width: 300px; height: 60px; }
.sparkline .line { stroke: #38bdf8; stroke-width: 2; }
.sparkline .dot { fill: #f8fafc; }
.room { background: #1e293b; border-radius: 0.5rem; padding: 0.75rem 1rem; min-width: 10rem; }
.room span { display: inline-block; margin-right: 0.5rem; }
.co2-icon { width: 12px; height: 12px; }
.overlay { position: fixed; inset: 0; background: rgba(15, 23, 42, 0.85); display: flex; align-items: center; justify-content: center; }
.overlay-box { background: #1e293b; padding: 1.5rem; border-radius: 0.5rem; text-align: center; }
</style>
</head>
<body>
"##;

const TAIL: &str = r##"
<script>
function applyScene(nodes) {
  for (const [id, node] of Object.entries(nodes)) {
    const el = document.getElementById(id);
    if (!el) continue;
    for (const [name, value] of Object.entries(node.attrs)) el.setAttribute(name, value);
    if (node.text !== undefined) el.textContent = node.text;
    if (node.inner !== undefined) el.innerHTML = node.inner;
    el.style.display = node.hidden ? "none" : "";
  }
}
function retryConnection() {
  fetch("/api/retry", { method: "POST" });
}
const events = new EventSource("/events");
events.addEventListener("scene", (ev) => applyScene(JSON.parse(ev.data)));
</script>
</body>
</html>
"##;
