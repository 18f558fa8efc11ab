use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use linkq_error::{DbError, Result};

use super::DataType;

/// How instances of a record type get constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Default constructed, then properties set one by one. Properties not
    /// provided keep their default value.
    Class,
    /// Read-only structural type constructed positionally. All properties
    /// must be provided. Instances compare by value.
    Anonymous,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyDef {
    pub name: String,
    pub datatype: DataType,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        PropertyDef {
            name: name.into(),
            datatype,
        }
    }
}

/// A named record type with an ordered list of properties.
///
/// Properties may be defined after the type is declared which allows for
/// types that reference each other (e.g. a parent holding children that point
/// back to the parent).
pub struct RecordType {
    namespace: String,
    name: String,
    kind: RecordKind,
    properties: OnceLock<Vec<PropertyDef>>,
}

impl RecordType {
    /// Create a class type with its properties.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        properties: impl IntoIterator<Item = PropertyDef>,
    ) -> Arc<Self> {
        let record = Self::declare(namespace, name);
        let _ = record.properties.set(properties.into_iter().collect());
        record
    }

    /// Declare a class type without defining its properties yet.
    pub fn declare(namespace: impl Into<String>, name: impl Into<String>) -> Arc<Self> {
        Arc::new(RecordType {
            namespace: namespace.into(),
            name: name.into(),
            kind: RecordKind::Class,
            properties: OnceLock::new(),
        })
    }

    /// Create an anonymous structural type.
    ///
    /// The name is derived from the ordered property names and types, so two
    /// anonymous types with the same shape are equal.
    pub fn anonymous(properties: impl IntoIterator<Item = PropertyDef>) -> Arc<Self> {
        let properties: Vec<_> = properties.into_iter().collect();
        let name = anonymous_name(&properties);
        let record = RecordType {
            namespace: String::new(),
            name,
            kind: RecordKind::Anonymous,
            properties: OnceLock::new(),
        };
        let _ = record.properties.set(properties);
        Arc::new(record)
    }

    /// Define properties for a declared type.
    pub fn define(&self, properties: impl IntoIterator<Item = PropertyDef>) -> Result<()> {
        self.properties
            .set(properties.into_iter().collect())
            .map_err(|_| {
                DbError::new(format!(
                    "Properties for '{}' have already been defined",
                    self.full_name()
                ))
            })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn is_anonymous(&self) -> bool {
        self.kind == RecordKind::Anonymous
    }

    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// Properties of this type, empty if not yet defined.
    pub fn properties(&self) -> &[PropertyDef] {
        self.properties.get().map(|p| p.as_slice()).unwrap_or(&[])
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties().iter().find(|p| p.name == name)
    }

    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties().iter().position(|p| p.name == name)
    }

    pub fn try_property_index(&self, name: &str) -> Result<usize> {
        self.property_index(name).ok_or_else(|| {
            DbError::translation(format!(
                "Type '{}' has no member '{name}'",
                self.full_name()
            ))
        })
    }

    /// Check if two record types have the same shape.
    ///
    /// Identical types are always structurally equal. Otherwise both types
    /// need to have the same kind with the same ordered property names and
    /// types.
    pub fn is_structurally_equal(&self, other: &RecordType) -> bool {
        if self == other {
            return true;
        }
        self.kind == other.kind
            && self.properties().len() == other.properties().len()
            && self
                .properties()
                .iter()
                .zip(other.properties())
                .all(|(a, b)| a.name == b.name && a.datatype == b.datatype)
    }
}

fn anonymous_name(properties: &[PropertyDef]) -> String {
    let fields: Vec<_> = properties
        .iter()
        .map(|p| format!("{}:{}", p.name, p.datatype))
        .collect();
    format!("<>Anonymous{{{}}}", fields.join(","))
}

impl PartialEq for RecordType {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.namespace == other.namespace && self.name == other.name
    }
}

impl Eq for RecordType {}

impl Hash for RecordType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.namespace.hash(state);
        self.name.hash(state);
    }
}

// Properties are printed using the display impl for data types to avoid
// recursing through self-referencing types.
impl fmt::Debug for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let props: Vec<_> = self
            .properties()
            .iter()
            .map(|p| format!("{}: {}", p.name, p.datatype))
            .collect();
        f.debug_struct("RecordType")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("properties", &props)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_types_equal_by_shape() {
        let a = RecordType::anonymous([
            PropertyDef::new("category", DataType::Utf8),
            PropertyDef::new("amount", DataType::Float64),
        ]);
        let b = RecordType::anonymous([
            PropertyDef::new("category", DataType::Utf8),
            PropertyDef::new("amount", DataType::Float64),
        ]);
        let c = RecordType::anonymous([
            PropertyDef::new("amount", DataType::Float64),
            PropertyDef::new("category", DataType::Utf8),
        ]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.is_anonymous());
    }

    #[test]
    fn self_referencing_types() {
        let node = RecordType::declare("graph", "Node");
        node.define([
            PropertyDef::new("id", DataType::Int32),
            PropertyDef::new("next", DataType::Record(node.clone())),
        ])
        .unwrap();

        assert_eq!(1, node.property_index("next").unwrap());
        assert_eq!(DataType::Record(node.clone()), node.properties()[1].datatype);

        // Doesn't overflow the stack.
        let _ = format!("{node:?}");

        // Can't redefine.
        node.define([]).unwrap_err();
    }

    #[test]
    fn missing_member() {
        let ty = RecordType::new("shop", "Product", [PropertyDef::new("id", DataType::Int32)]);
        let err = ty.try_property_index("name").unwrap_err();
        assert!(err.to_string().contains("shop.Product"));
    }
}
