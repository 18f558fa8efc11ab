use std::fmt;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use super::record::RecordType;
use super::{CollectionKind, DataType};

/// Namespace used for the generic builtin types (lists, groupings, etc).
pub const BUILTIN_NAMESPACE: &str = "linkq";

/// Namespace used for opaque handle types.
pub const OPAQUE_NAMESPACE: &str = "linkq.opaque";

/// Portable identity of a type.
///
/// Descriptors only contain names, so they can be sent anywhere. A
/// `TypeResolver` turns a descriptor back into a live `DataType`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generic_arguments: Vec<TypeDescriptor>,
    /// Number of array dimensions wrapping the named type. Zero if this isn't
    /// an array.
    #[serde(default)]
    pub array_rank: u32,
    #[serde(default)]
    pub is_anonymous: bool,
    /// Ordered properties of the type.
    ///
    /// Always present for anonymous types so the receiving side is able to
    /// reconstruct a structural type it has never seen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<PropertyDescriptor>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub type_info: TypeDescriptor,
}

impl TypeDescriptor {
    pub fn named(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeDescriptor {
            name: name.into(),
            namespace: namespace.into(),
            generic_arguments: Vec::new(),
            array_rank: 0,
            is_anonymous: false,
            properties: None,
        }
    }

    fn builtin(name: &str, generic_arguments: Vec<TypeDescriptor>) -> Self {
        TypeDescriptor {
            generic_arguments,
            ..Self::named(BUILTIN_NAMESPACE, name)
        }
    }

    /// Create a descriptor for a type.
    ///
    /// Record descriptors only include properties for anonymous types unless
    /// `include_properties` is set. Nested class types never carry properties
    /// since they may be self-referencing.
    pub fn from_datatype(datatype: &DataType, include_properties: bool) -> Self {
        match datatype {
            DataType::Any => Self::named("", "any"),
            DataType::Unit => Self::named("", "unit"),
            DataType::Boolean => Self::named("", "bool"),
            DataType::Int32 => Self::named("", "i32"),
            DataType::Int64 => Self::named("", "i64"),
            DataType::Float64 => Self::named("", "f64"),
            DataType::Utf8 => Self::named("", "string"),
            DataType::Timestamp => Self::named("", "timestamp"),
            DataType::Uuid => Self::named("", "uuid"),
            DataType::Nullable(inner) => {
                Self::builtin("Nullable", vec![Self::from_datatype(inner, false)])
            }
            DataType::Collection { kind, element } => {
                let element = Self::from_datatype(element, false);
                match kind {
                    CollectionKind::Array => TypeDescriptor {
                        array_rank: element.array_rank + 1,
                        ..element
                    },
                    CollectionKind::List => Self::builtin("List", vec![element]),
                }
            }
            DataType::Grouping { key, element } => Self::builtin(
                "Grouping",
                vec![
                    Self::from_datatype(key, false),
                    Self::from_datatype(element, false),
                ],
            ),
            DataType::Queryable(element) => {
                Self::builtin("Queryable", vec![Self::from_datatype(element, false)])
            }
            DataType::Function { params, ret } => {
                let mut args: Vec<_> = params
                    .iter()
                    .map(|p| Self::from_datatype(p, false))
                    .collect();
                args.push(Self::from_datatype(ret, false));
                Self::builtin("Func", args)
            }
            DataType::Record(record) => Self::from_record(record, include_properties),
            DataType::Opaque(name) => Self::named(OPAQUE_NAMESPACE, name.clone()),
        }
    }

    fn from_record(record: &RecordType, include_properties: bool) -> Self {
        let properties = if record.is_anonymous() || include_properties {
            Some(
                record
                    .properties()
                    .iter()
                    .map(|p| PropertyDescriptor {
                        name: p.name.clone(),
                        type_info: Self::from_datatype(&p.datatype, false),
                    })
                    .collect(),
            )
        } else {
            None
        };

        TypeDescriptor {
            is_anonymous: record.is_anonymous(),
            properties,
            ..Self::named(record.namespace(), record.name())
        }
    }

    pub fn is_array(&self) -> bool {
        self.array_rank > 0
    }

    /// Descriptor with one less array dimension.
    pub fn element_of_array(&self) -> Option<TypeDescriptor> {
        if self.array_rank == 0 {
            return None;
        }
        Some(TypeDescriptor {
            array_rank: self.array_rank - 1,
            ..self.clone()
        })
    }

    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())?;
        if !self.generic_arguments.is_empty() {
            write!(f, "<")?;
            for (idx, arg) in self.generic_arguments.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{arg}")?;
            }
            write!(f, ">")?;
        }
        for _ in 0..self.array_rank {
            write!(f, "[]")?;
        }
        Ok(())
    }
}

/// Produces at most one descriptor per distinct type.
///
/// A cache lives for a single translation pass.
#[derive(Debug, Default)]
pub struct DescriptorCache {
    include_properties: bool,
    cache: HashMap<DataType, TypeDescriptor>,
}

impl DescriptorCache {
    pub fn new(include_properties: bool) -> Self {
        DescriptorCache {
            include_properties,
            cache: HashMap::new(),
        }
    }

    pub fn get(&mut self, datatype: &DataType) -> TypeDescriptor {
        if let Some(desc) = self.cache.get(datatype) {
            return desc.clone();
        }
        let desc = TypeDescriptor::from_datatype(datatype, self.include_properties);
        self.cache.insert(datatype.clone(), desc.clone());
        desc
    }

    /// Number of distinct types seen.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::record::PropertyDef;

    #[test]
    fn array_rank_accumulates() {
        let ty = DataType::array(DataType::array(DataType::Int32));
        let desc = TypeDescriptor::from_datatype(&ty, false);
        assert_eq!("i32", desc.name);
        assert_eq!(2, desc.array_rank);
        assert_eq!("i32[][]", desc.to_string());
    }

    #[test]
    fn anonymous_carries_properties() {
        let anon = RecordType::anonymous([
            PropertyDef::new("category", DataType::Utf8),
            PropertyDef::new("amount", DataType::Float64),
        ]);
        let desc = TypeDescriptor::from_datatype(&DataType::Record(anon), false);
        assert!(desc.is_anonymous);
        let props = desc.properties.unwrap();
        assert_eq!(2, props.len());
        assert_eq!("category", props[0].name);
        assert_eq!("string", props[0].type_info.name);
    }

    #[test]
    fn class_properties_only_when_requested() {
        let product = RecordType::new("shop", "Product", [PropertyDef::new("id", DataType::Int32)]);
        let ty = DataType::Record(product);

        assert!(TypeDescriptor::from_datatype(&ty, false).properties.is_none());
        assert!(TypeDescriptor::from_datatype(&ty, true).properties.is_some());
    }

    #[test]
    fn generic_display() {
        let ty = DataType::queryable(DataType::list(DataType::Utf8));
        let desc = TypeDescriptor::from_datatype(&ty, false);
        assert_eq!("linkq.Queryable<linkq.List<string>>", desc.to_string());
    }

    #[test]
    fn cache_deduplicates() {
        let mut cache = DescriptorCache::new(false);
        cache.get(&DataType::Int32);
        cache.get(&DataType::Int32);
        cache.get(&DataType::Utf8);
        assert_eq!(2, cache.len());
    }
}
