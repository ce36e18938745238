//! Host conversion capability.
//!
//! The engine never interprets native application objects itself. A host
//! supplies a [`Converter`] that turns its objects into [`TypedObject`]s for
//! upload and decodes remote objects back into native values.

use anyhow::{Context, Result};
use serde_json::Value;

use super::layer::ObjectProperties;
use super::object::TypedObject;

pub trait Converter: Send + Sync + 'static {
    /// The host's own object type.
    type Native: Clone + Send + Sync + 'static;

    /// Converts natives in order. `None` marks an object that could not be
    /// converted; the slot is kept so indices stay aligned.
    fn convert(&self, objects: &[Self::Native]) -> Vec<Option<TypedObject>>;

    /// Sparse per-index properties for `objects`.
    fn object_properties(&self, _objects: &[Self::Native]) -> Vec<ObjectProperties> {
        Vec::new()
    }

    /// Decodes a remote object (a full descriptor or a fetched payload).
    fn decode(&self, object: &Value, properties: Option<&Value>) -> Result<Self::Native>;

    /// Short identifier, e.g. `"json-converter"`.
    fn description(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Converter whose native type is plain JSON.
///
/// Objects that parse as a [`TypedObject`] are uploaded as such; decoded
/// objects get their properties merged under `"properties"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConverter;

impl Converter for JsonConverter {
    type Native = Value;

    fn convert(&self, objects: &[Value]) -> Vec<Option<TypedObject>> {
        objects
            .iter()
            .map(|object| {
                let mut typed: TypedObject = serde_json::from_value(object.clone()).ok()?;
                if typed.content_hash.is_none() && typed.kind().is_hashed() {
                    typed = TypedObject::new(typed.payload);
                }
                Some(typed)
            })
            .collect()
    }

    fn object_properties(&self, objects: &[Value]) -> Vec<ObjectProperties> {
        objects
            .iter()
            .enumerate()
            .filter_map(|(index, object)| {
                object
                    .get("properties")
                    .filter(|p| !p.is_null())
                    .map(|p| ObjectProperties::new(index, p.clone()))
            })
            .collect()
    }

    fn decode(&self, object: &Value, properties: Option<&Value>) -> Result<Value> {
        let mut decoded = object
            .as_object()
            .cloned()
            .context("remote object is not a JSON object")?;
        if let Some(properties) = properties {
            decoded.insert("properties".to_string(), properties.clone());
        }
        Ok(Value::Object(decoded))
    }

    fn description(&self) -> String {
        "json-converter".to_string()
    }
}
