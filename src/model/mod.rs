pub mod convert;
pub mod layer;
pub mod object;

pub use convert::{Converter, JsonConverter};
pub use layer::{diff_layers, properties_for, Layer, LayerDiff, ObjectProperties};
pub use object::{
    ObjectDescriptor, ObjectKind, ObjectReference, Payload, TypedObject, WireObject,
    EXPLICIT_DECODE_KINDS, HEAVY_KINDS,
};
