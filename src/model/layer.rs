use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// A named group over the contiguous range
/// `[start_index, start_index + object_count)` of a stream's flat object list.
///
/// For objects `[A, B, C, D, E, F]`, a layer with `start_index: 2` and
/// `object_count: 3` holds `C, D, E`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub name: String,
    /// Identity used for diffing. Must be unique within a stream.
    #[serde(rename = "guid")]
    pub unique_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<String>,
    pub object_count: usize,
    pub start_index: usize,
    pub order_index: usize,
    #[serde(rename = "properties", default, skip_serializing_if = "Option::is_none")]
    pub extra_properties: Option<Value>,
}

impl Layer {
    pub fn new(
        name: impl Into<String>,
        unique_id: impl Into<String>,
        start_index: usize,
        object_count: usize,
        order_index: usize,
    ) -> Self {
        Self {
            name: name.into(),
            unique_id: unique_id.into(),
            topology: None,
            object_count,
            start_index,
            order_index,
            extra_properties: None,
        }
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.extra_properties = Some(properties);
        self
    }

    pub fn end_index(&self) -> usize {
        self.start_index.saturating_add(self.object_count)
    }

    pub fn contains_index(&self, index: usize) -> bool {
        index >= self.start_index && index < self.end_index()
    }

    /// The slice of `objects` this layer covers, clamped to the list length.
    pub fn slice<'a, T>(&self, objects: &'a [T]) -> &'a [T] {
        let start = self.start_index.min(objects.len());
        let end = self.end_index().min(objects.len());
        &objects[start..end]
    }
}

/// Outcome of comparing two layer lists by `unique_id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerDiff {
    /// In the old list only.
    pub to_remove: Vec<Layer>,
    /// In the new list only.
    pub to_add: Vec<Layer>,
    /// In both; carries the new version.
    pub to_update: Vec<Layer>,
}

impl LayerDiff {
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty() && self.to_update.is_empty()
    }
}

pub fn diff_layers(old: &[Layer], new: &[Layer]) -> LayerDiff {
    let old_ids: HashSet<&str> = old.iter().map(|l| l.unique_id.as_str()).collect();
    let new_ids: HashSet<&str> = new.iter().map(|l| l.unique_id.as_str()).collect();

    LayerDiff {
        to_remove: old
            .iter()
            .filter(|l| !new_ids.contains(l.unique_id.as_str()))
            .cloned()
            .collect(),
        to_add: new
            .iter()
            .filter(|l| !old_ids.contains(l.unique_id.as_str()))
            .cloned()
            .collect(),
        to_update: new
            .iter()
            .filter(|l| old_ids.contains(l.unique_id.as_str()))
            .cloned()
            .collect(),
    }
}

/// Extra per-object properties, matched to objects by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectProperties {
    pub object_index: usize,
    pub properties: Value,
}

impl ObjectProperties {
    pub fn new(object_index: usize, properties: Value) -> Self {
        Self {
            object_index,
            properties,
        }
    }
}

/// Looks up the properties attached to `index`. When several entries name
/// the same index the last one wins.
pub fn properties_for(properties: &[ObjectProperties], index: usize) -> Option<&Value> {
    properties
        .iter()
        .rev()
        .find(|p| p.object_index == index)
        .map(|p| &p.properties)
}
