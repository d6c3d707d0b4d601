use serde_json::{json, Value};

use super::element::{Element, NewElement};

const DEFAULT_VIEW_BACKGROUND: &str = "#ffffff";

/// In-memory canvas scene: an ordered element list plus view state.
///
/// Order is paint order; later elements draw on top.
#[derive(Debug, Clone)]
pub struct Scene {
    elements: Vec<Element>,
    view_background_color: String,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            elements: Vec::new(),
            view_background_color: DEFAULT_VIEW_BACKGROUND.to_string(),
        }
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn get(&self, id: &str) -> Option<&Element> {
        self.elements.iter().find(|el| el.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Element> {
        self.elements.iter_mut().find(|el| el.id == id)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Append a new element under a freshly generated id.
    pub fn add(&mut self, new: NewElement) -> Result<&Element, super::element::ElementError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let element = new.build(id)?;
        self.elements.push(element);
        Ok(&self.elements[self.elements.len() - 1])
    }

    /// Remove every element whose id is in `ids`. Unknown ids are ignored.
    pub fn remove_many(&mut self, ids: &[String]) -> usize {
        let before = self.elements.len();
        self.elements.retain(|el| !ids.contains(&el.id));
        before - self.elements.len()
    }

    pub fn clear(&mut self) {
        self.elements.clear();
    }

    /// Snapshot in the shape `getCanvasState` reports.
    pub fn snapshot(&self) -> Value {
        json!({
            "elements": self.elements,
            "appState": { "viewBackgroundColor": self.view_background_color },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x: f64) -> NewElement {
        NewElement::from_payload(&json!({"type": "rectangle", "x": x, "y": 0, "width": 1, "height": 1}))
            .unwrap()
    }

    #[test]
    fn add_generates_distinct_ids() {
        let mut scene = Scene::new();
        let a = scene.add(rect(0.0)).unwrap().id.clone();
        let b = scene.add(rect(1.0)).unwrap().id.clone();
        assert_ne!(a, b);
        assert_eq!(scene.len(), 2);
        assert_eq!(scene.get(&b).unwrap().x, 1.0);
    }

    #[test]
    fn remove_many_ignores_unknown_ids() {
        let mut scene = Scene::new();
        let a = scene.add(rect(0.0)).unwrap().id.clone();
        scene.add(rect(1.0)).unwrap();

        assert_eq!(scene.remove_many(&[a, "nope".into()]), 1);
        assert_eq!(scene.len(), 1);
    }

    #[test]
    fn snapshot_carries_elements_and_view_state() {
        let mut scene = Scene::new();
        scene.add(rect(0.0)).unwrap();
        let snap = scene.snapshot();
        assert_eq!(snap["elements"].as_array().unwrap().len(), 1);
        assert_eq!(snap["appState"]["viewBackgroundColor"], "#ffffff");
    }
}
