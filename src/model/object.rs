use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Tag naming the shape of a [`TypedObject`] payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Boolean,
    Number,
    String,
    Interval,
    Interval2d,
    Point,
    Vector,
    Plane,
    Line,
    Rectangle,
    Circle,
    Box,
    Polyline,
    Curve,
    Mesh,
    Brep,
}

/// Kinds large enough to be deduplicated by content hash.
pub const HEAVY_KINDS: &[ObjectKind] = &[
    ObjectKind::Polyline,
    ObjectKind::Curve,
    ObjectKind::Mesh,
    ObjectKind::Brep,
];

/// Heavy kinds that must be fetched in their `native` encoded form.
pub const EXPLICIT_DECODE_KINDS: &[ObjectKind] = &[ObjectKind::Curve, ObjectKind::Brep];

/// Wire tag of the placeholder sent for objects the converter could not handle.
pub const INVALID_OBJECT_TAG: &str = "invalid_object";

impl ObjectKind {
    pub const ALL: [ObjectKind; 16] = [
        ObjectKind::Boolean,
        ObjectKind::Number,
        ObjectKind::String,
        ObjectKind::Interval,
        ObjectKind::Interval2d,
        ObjectKind::Point,
        ObjectKind::Vector,
        ObjectKind::Plane,
        ObjectKind::Line,
        ObjectKind::Rectangle,
        ObjectKind::Circle,
        ObjectKind::Box,
        ObjectKind::Polyline,
        ObjectKind::Curve,
        ObjectKind::Mesh,
        ObjectKind::Brep,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Boolean => "Boolean",
            ObjectKind::Number => "Number",
            ObjectKind::String => "String",
            ObjectKind::Interval => "Interval",
            ObjectKind::Interval2d => "Interval2d",
            ObjectKind::Point => "Point",
            ObjectKind::Vector => "Vector",
            ObjectKind::Plane => "Plane",
            ObjectKind::Line => "Line",
            ObjectKind::Rectangle => "Rectangle",
            ObjectKind::Circle => "Circle",
            ObjectKind::Box => "Box",
            ObjectKind::Polyline => "Polyline",
            ObjectKind::Curve => "Curve",
            ObjectKind::Mesh => "Mesh",
            ObjectKind::Brep => "Brep",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == tag)
    }

    pub fn is_heavy(&self) -> bool {
        HEAVY_KINDS.contains(self)
    }

    pub fn needs_explicit_decode(&self) -> bool {
        EXPLICIT_DECODE_KINDS.contains(self)
    }

    /// Scalar kinds are cheap to compare by value and carry no content hash.
    pub fn is_hashed(&self) -> bool {
        !matches!(
            self,
            ObjectKind::Boolean
                | ObjectKind::Number
                | ObjectKind::String
                | ObjectKind::Interval
                | ObjectKind::Interval2d
        )
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneFrame {
    pub origin: [f64; 3],
    pub normal: [f64; 3],
    pub xdir: [f64; 3],
    pub ydir: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    pub vertices: Vec<f64>,
    pub faces: Vec<i64>,
    #[serde(default)]
    pub colors: Vec<i64>,
}

/// Kind-specific content of a [`TypedObject`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Payload {
    Boolean {
        value: bool,
    },
    Number {
        value: f64,
    },
    String {
        value: String,
    },
    Interval {
        start: f64,
        end: f64,
    },
    Interval2d {
        u: Interval,
        v: Interval,
    },
    Point {
        value: [f64; 3],
    },
    Vector {
        value: [f64; 3],
    },
    Plane {
        origin: [f64; 3],
        normal: [f64; 3],
        xdir: [f64; 3],
        ydir: [f64; 3],
    },
    Line {
        start: [f64; 3],
        end: [f64; 3],
    },
    Rectangle {
        a: [f64; 3],
        b: [f64; 3],
        c: [f64; 3],
        d: [f64; 3],
    },
    Circle {
        center: [f64; 3],
        normal: [f64; 3],
        radius: f64,
    },
    Box {
        base_plane: PlaneFrame,
        x_size: Interval,
        y_size: Interval,
        z_size: Interval,
    },
    Polyline {
        value: Vec<f64>,
    },
    Curve {
        display_value: Vec<f64>,
        base64: String,
        provenance: String,
    },
    Mesh {
        vertices: Vec<f64>,
        faces: Vec<i64>,
        #[serde(default)]
        colors: Vec<i64>,
    },
    Brep {
        display_value: MeshData,
        base64: String,
        provenance: String,
    },
}

impl Payload {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Payload::Boolean { .. } => ObjectKind::Boolean,
            Payload::Number { .. } => ObjectKind::Number,
            Payload::String { .. } => ObjectKind::String,
            Payload::Interval { .. } => ObjectKind::Interval,
            Payload::Interval2d { .. } => ObjectKind::Interval2d,
            Payload::Point { .. } => ObjectKind::Point,
            Payload::Vector { .. } => ObjectKind::Vector,
            Payload::Plane { .. } => ObjectKind::Plane,
            Payload::Line { .. } => ObjectKind::Line,
            Payload::Rectangle { .. } => ObjectKind::Rectangle,
            Payload::Circle { .. } => ObjectKind::Circle,
            Payload::Box { .. } => ObjectKind::Box,
            Payload::Polyline { .. } => ObjectKind::Polyline,
            Payload::Curve { .. } => ObjectKind::Curve,
            Payload::Mesh { .. } => ObjectKind::Mesh,
            Payload::Brep { .. } => ObjectKind::Brep,
        }
    }
}

/// An object as it travels upstream: a kind-tagged payload plus the
/// content hash that makes it deduplicable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedObject {
    #[serde(rename = "hash", default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl TypedObject {
    /// Wraps a payload, hashing it when its kind is hashed.
    pub fn new(payload: Payload) -> Self {
        let content_hash = if payload.kind().is_hashed() {
            content_hash(&payload)
        } else {
            None
        };
        Self {
            content_hash,
            payload,
        }
    }

    /// Wraps a payload without a hash. Hash-less objects are always sent in full.
    pub fn unhashed(payload: Payload) -> Self {
        Self {
            content_hash: None,
            payload,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.payload.kind()
    }

    pub fn hash(&self) -> Option<&str> {
        self.content_hash.as_deref().filter(|h| !h.is_empty())
    }

    pub fn is_heavy(&self) -> bool {
        self.kind().is_heavy()
    }

    pub fn reference(&self) -> Option<ObjectReference> {
        self.hash().map(|hash| ObjectReference {
            kind: self.kind().as_str().to_string(),
            hash: hash.to_string(),
        })
    }
}

/// `"<Kind>.<md5 hex>"` over the serialized payload.
pub fn content_hash(payload: &Payload) -> Option<String> {
    let bytes = serde_json::to_vec(payload).ok()?;
    Some(format!("{}.{:x}", payload.kind(), md5::compute(bytes)))
}

/// Stand-in for an object the peer already holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectReference {
    #[serde(rename = "type")]
    pub kind: String,
    pub hash: String,
}

impl ObjectReference {
    fn placeholder() -> Self {
        Self {
            kind: INVALID_OBJECT_TAG.to_string(),
            hash: String::new(),
        }
    }
}

/// Transmission form chosen for one slot of an upload.
#[derive(Debug, Clone, PartialEq)]
pub enum WireObject {
    Full(TypedObject),
    Reference(ObjectReference),
    /// Keeps list positions aligned when conversion produced nothing.
    Placeholder,
}

impl WireObject {
    pub fn is_reference(&self) -> bool {
        matches!(self, WireObject::Reference(_))
    }
}

impl Serialize for WireObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            WireObject::Full(object) => object.serialize(serializer),
            WireObject::Reference(reference) => reference.serialize(serializer),
            WireObject::Placeholder => ObjectReference::placeholder().serialize(serializer),
        }
    }
}

/// Raw remote object as listed in a snapshot or live update. Heavy kinds
/// usually arrive as bare `{type, hash}` references.
///
/// Decoding never fails: an entry that is not an object or has no string
/// `type` becomes an untyped descriptor, so one bad entry cannot take the
/// rest of its batch down with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct ObjectDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "hash", default)]
    pub content_hash: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl From<Value> for ObjectDescriptor {
    fn from(value: Value) -> Self {
        let mut fields = match value {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        let kind = match fields.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => String::new(),
        };
        let content_hash = match fields.remove("hash") {
            Some(Value::String(hash)) => Some(hash),
            _ => None,
        };
        Self {
            kind,
            content_hash,
            fields,
        }
    }
}

impl ObjectDescriptor {
    /// False for entries without a type and for sender placeholders.
    pub fn is_typed(&self) -> bool {
        !self.kind.is_empty() && self.kind != INVALID_OBJECT_TAG
    }

    pub fn object_kind(&self) -> Option<ObjectKind> {
        ObjectKind::from_tag(&self.kind)
    }

    pub fn hash(&self) -> Option<&str> {
        self.content_hash.as_deref().filter(|h| !h.is_empty())
    }

    pub fn is_heavy(&self) -> bool {
        self.object_kind().is_some_and(|kind| kind.is_heavy())
    }

    pub fn needs_explicit_decode(&self) -> bool {
        self.object_kind()
            .is_some_and(|kind| kind.needs_explicit_decode())
    }

    /// Geometry endpoint form for this descriptor.
    pub fn fetch_form(&self) -> &'static str {
        if self.needs_explicit_decode() {
            "native"
        } else {
            ""
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert("type".to_string(), Value::String(self.kind.clone()));
        if let Some(hash) = &self.content_hash {
            map.insert("hash".to_string(), Value::String(hash.clone()));
        }
        Value::Object(map)
    }
}
