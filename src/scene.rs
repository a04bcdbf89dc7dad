//! Server-side model of the dashboard's DOM.
//!
//! Renderers write attributes, text and inner markup into declared
//! elements; the page and the event stream read them back out.

use crate::error::RenderError;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Node {
    pub attrs: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inner: Option<String>,
    pub hidden: bool,
}

#[derive(Debug, Default)]
pub struct Scene {
    nodes: HashMap<String, Node>,
    revision: u64,
}

pub type SharedScene = Arc<Mutex<Scene>>;

/// Locks a renderer or the scene, recovering it if a holder panicked mid-write.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Scene {
    pub fn declare(&mut self, id: impl Into<String>) {
        self.nodes.entry(id.into()).or_default();
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut Node, RenderError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| RenderError::MissingElement(id.to_string()))?;
        self.revision += 1;
        Ok(node)
    }

    pub fn set_attr(&mut self, id: &str, name: &str, value: impl Into<String>) -> Result<(), RenderError> {
        self.node_mut(id)?.attrs.insert(name.to_string(), value.into());
        Ok(())
    }

    pub fn set_text(&mut self, id: &str, text: impl Into<String>) -> Result<(), RenderError> {
        self.node_mut(id)?.text = Some(text.into());
        Ok(())
    }

    pub fn set_inner(&mut self, id: &str, markup: impl Into<String>) -> Result<(), RenderError> {
        self.node_mut(id)?.inner = Some(markup.into());
        Ok(())
    }

    pub fn set_hidden(&mut self, id: &str, hidden: bool) -> Result<(), RenderError> {
        self.node_mut(id)?.hidden = hidden;
        Ok(())
    }

    #[cfg(test)]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn text(&self, id: &str) -> Option<&str> {
        self.nodes.get(id)?.text.as_deref()
    }

    pub fn attr(&self, id: &str, name: &str) -> Option<&str> {
        self.nodes.get(id)?.attrs.get(name).map(String::as_str)
    }

    pub fn is_hidden(&self, id: &str) -> bool {
        self.nodes.get(id).is_some_and(|n| n.hidden)
    }

    /// Bumped on every successful write.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn snapshot(&self) -> (u64, BTreeMap<String, Node>) {
        let nodes = self
            .nodes
            .iter()
            .map(|(id, node)| (id.clone(), node.clone()))
            .collect();
        (self.revision, nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_require_declared_elements() {
        let mut scene = Scene::default();
        scene.declare("temperature-value");

        scene.set_text("temperature-value", "21.5").unwrap();
        assert_eq!(scene.text("temperature-value"), Some("21.5"));
        assert_eq!(scene.revision(), 1);

        assert_eq!(
            scene.set_text("nope", "x"),
            Err(RenderError::MissingElement("nope".to_string()))
        );
        assert_eq!(scene.revision(), 1);
    }

    #[test]
    fn snapshot_carries_attrs_and_visibility() {
        let mut scene = Scene::default();
        scene.declare("rainfall");
        scene.declare("rainfall-arc");
        scene.set_hidden("rainfall", true).unwrap();
        scene.set_attr("rainfall-arc", "d", "M 0 0").unwrap();

        let (revision, nodes) = scene.snapshot();
        assert_eq!(revision, 2);
        assert!(nodes["rainfall"].hidden);
        assert_eq!(nodes["rainfall-arc"].attrs["d"], "M 0 0");
        assert!(scene.is_hidden("rainfall"));
        assert_eq!(scene.attr("rainfall-arc", "d"), Some("M 0 0"));
    }
}
