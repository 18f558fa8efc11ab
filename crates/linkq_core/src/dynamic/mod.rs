//! Generic property bag representation of object graphs.
pub mod mapper;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::CollectionKind;
use crate::types::descriptor::TypeDescriptor;

/// A value that can cross the query boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DynamicValue {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
    Object(DynamicObject),
    Sequence {
        kind: CollectionKind,
        items: Vec<DynamicValue>,
    },
    /// Reference to an object emitted earlier in the same graph with a
    /// matching `reference_id`.
    Reference(u32),
}

impl DynamicValue {
    pub fn list(items: impl IntoIterator<Item = DynamicValue>) -> Self {
        DynamicValue::Sequence {
            kind: CollectionKind::List,
            items: items.into_iter().collect(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DynamicValue::Null)
    }

    pub fn as_object(&self) -> Option<&DynamicObject> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[DynamicValue]> {
        match self {
            Self::Sequence { items, .. } => Some(items),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "bool",
            Self::Int32(_) => "i32",
            Self::Int64(_) => "i64",
            Self::Float64(_) => "f64",
            Self::Utf8(_) => "string",
            Self::Timestamp(_) => "timestamp",
            Self::Uuid(_) => "uuid",
            Self::Object(_) => "object",
            Self::Sequence { .. } => "sequence",
            Self::Reference(_) => "reference",
        }
    }
}

impl From<DynamicObject> for DynamicValue {
    fn from(value: DynamicObject) -> Self {
        DynamicValue::Object(value)
    }
}

/// Ordered mapping of property names to values.
///
/// Carries an optional type descriptor so the receiving side can reconstruct
/// a concrete instance, and an optional reference id if the object is
/// referenced more than once within its graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_info: Option<TypeDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<u32>,
    pub properties: IndexMap<String, DynamicValue>,
}

impl DynamicObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(type_info: TypeDescriptor) -> Self {
        DynamicObject {
            type_info: Some(type_info),
            ..Default::default()
        }
    }

    pub fn get(&self, name: &str) -> Option<&DynamicValue> {
        self.properties.get(name)
    }

    /// Set a property, replacing the previous value if any. Insertion order is
    /// kept for new properties.
    pub fn set(&mut self, name: impl Into<String>, value: DynamicValue) {
        self.properties.insert(name.into(), value);
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}
