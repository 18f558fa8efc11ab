//! Live types.
//!
//! `DataType` is what a value "is" on either side of the query boundary.
//! `TypeDescriptor` is the portable identity that crosses the boundary, and a
//! `TypeResolver` turns a descriptor back into a `DataType`.
pub mod descriptor;
pub mod emitter;
pub mod record;
pub mod registry;
pub mod resolver;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use linkq_error::{DbError, Result};
use serde::{Deserialize, Serialize};

use self::record::RecordType;
use crate::values::Value;

/// Shape of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionKind {
    /// Fixed size.
    Array,
    /// Growable.
    List,
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Array => write!(f, "Array"),
            Self::List => write!(f, "List"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Unknown/any type.
    ///
    /// Used when a value's static type isn't known, e.g. a null literal or an
    /// untyped dynamic object.
    Any,
    /// No value.
    Unit,
    Boolean,
    Int32,
    Int64,
    Float64,
    Utf8,
    Timestamp,
    Uuid,
    Nullable(Box<DataType>),
    Collection {
        kind: CollectionKind,
        element: Box<DataType>,
    },
    Record(Arc<RecordType>),
    /// Result of a group by. Enumerates as its elements.
    Grouping {
        key: Box<DataType>,
        element: Box<DataType>,
    },
    /// A deferred sequence rooted at some data set.
    Queryable(Box<DataType>),
    /// Type of a lambda.
    Function {
        params: Vec<DataType>,
        ret: Box<DataType>,
    },
    /// A handle that only has meaning in the process that created it.
    ///
    /// Values of this type can never cross the boundary.
    Opaque(String),
}

impl DataType {
    pub fn list(element: DataType) -> Self {
        DataType::Collection {
            kind: CollectionKind::List,
            element: Box::new(element),
        }
    }

    pub fn array(element: DataType) -> Self {
        DataType::Collection {
            kind: CollectionKind::Array,
            element: Box::new(element),
        }
    }

    pub fn queryable(element: DataType) -> Self {
        DataType::Queryable(Box::new(element))
    }

    pub fn grouping(key: DataType, element: DataType) -> Self {
        DataType::Grouping {
            key: Box::new(key),
            element: Box::new(element),
        }
    }

    pub fn nullable(inner: DataType) -> Self {
        match inner {
            // Already nullable, or can hold null anyways.
            DataType::Nullable(_) | DataType::Any => inner,
            other => DataType::Nullable(Box::new(other)),
        }
    }

    /// Default value for this type.
    ///
    /// Value types get their zero value, everything else defaults to null.
    pub fn default_value(&self) -> Value {
        match self {
            Self::Boolean => Value::Boolean(false),
            Self::Int32 => Value::Int32(0),
            Self::Int64 => Value::Int64(0),
            Self::Float64 => Value::Float64(0.0),
            Self::Timestamp => Value::Timestamp(DateTime::<Utc>::UNIX_EPOCH),
            Self::Uuid => Value::Uuid(uuid::Uuid::nil()),
            _ => Value::Null,
        }
    }

    /// If a null value may be assigned to something of this type.
    pub fn accepts_null(&self) -> bool {
        !matches!(
            self,
            Self::Boolean
                | Self::Int32
                | Self::Int64
                | Self::Float64
                | Self::Timestamp
                | Self::Uuid
                | Self::Unit
        )
    }

    /// Strip a nullable wrapper if there is one.
    pub fn non_nullable(&self) -> &DataType {
        match self {
            Self::Nullable(inner) => inner,
            other => other,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self.non_nullable(),
            Self::Int32 | Self::Int64 | Self::Float64
        )
    }

    pub fn is_sequence(&self) -> bool {
        matches!(
            self,
            Self::Collection { .. } | Self::Queryable(_) | Self::Grouping { .. }
        )
    }

    /// Element type if this type can be enumerated.
    pub fn element_type(&self) -> Option<&DataType> {
        match self {
            Self::Collection { element, .. } => Some(element),
            Self::Queryable(element) => Some(element),
            Self::Grouping { element, .. } => Some(element),
            _ => None,
        }
    }

    pub fn try_element_type(&self) -> Result<&DataType> {
        self.element_type()
            .ok_or_else(|| DbError::translation(format!("Type '{self}' is not a sequence")))
    }

    pub fn try_as_record(&self) -> Result<&Arc<RecordType>> {
        match self {
            Self::Record(record) => Ok(record),
            other => Err(DbError::new(format!("Expected a record type, got '{other}'"))),
        }
    }

    /// Type of a member on this type, if it exists.
    pub fn member_type(&self, member: &str) -> Option<DataType> {
        if let Self::Nullable(inner) = self {
            match member {
                "HasValue" => return Some(DataType::Boolean),
                "Value" => return Some(inner.as_ref().clone()),
                _ => (),
            }
        }
        match self.non_nullable() {
            Self::Record(record) => record.property(member).map(|p| p.datatype.clone()),
            Self::Grouping { key, .. } if member == "Key" => Some(key.as_ref().clone()),
            Self::Utf8 if member == "Length" => Some(DataType::Int32),
            Self::Collection { .. } if member == "Count" || member == "Length" => {
                Some(DataType::Int32)
            }
            Self::Timestamp => match member {
                "Year" | "Month" | "Day" | "Hour" | "Minute" | "Second" => Some(DataType::Int32),
                _ => None,
            },
            _ => None,
        }
    }

    /// Check if a value of type `other` can be used where this type is
    /// expected without an explicit conversion.
    pub fn is_assignable_from(&self, other: &DataType) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Self::Any, _) | (_, Self::Any) => true,
            (Self::Nullable(inner), other) => inner.is_assignable_from(other),
            (Self::Int64, Self::Int32) => true,
            (Self::Float64, Self::Int32 | Self::Int64) => true,
            (
                Self::Collection { element: a, .. },
                Self::Collection { element: b, .. } | Self::Queryable(b),
            ) => a.is_assignable_from(b),
            (Self::Queryable(a), Self::Queryable(b)) => a.is_assignable_from(b),
            (Self::Record(a), Self::Record(b)) => a.is_structurally_equal(b),
            _ => false,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Unit => write!(f, "unit"),
            Self::Boolean => write!(f, "bool"),
            Self::Int32 => write!(f, "i32"),
            Self::Int64 => write!(f, "i64"),
            Self::Float64 => write!(f, "f64"),
            Self::Utf8 => write!(f, "string"),
            Self::Timestamp => write!(f, "timestamp"),
            Self::Uuid => write!(f, "uuid"),
            Self::Nullable(inner) => write!(f, "{inner}?"),
            Self::Collection { kind, element } => match kind {
                CollectionKind::Array => write!(f, "{element}[]"),
                CollectionKind::List => write!(f, "List<{element}>"),
            },
            Self::Record(record) => write!(f, "{}", record.full_name()),
            Self::Grouping { key, element } => write!(f, "Grouping<{key}, {element}>"),
            Self::Queryable(element) => write!(f, "Queryable<{element}>"),
            Self::Function { params, ret } => {
                write!(f, "Func<")?;
                for param in params {
                    write!(f, "{param}, ")?;
                }
                write!(f, "{ret}>")
            }
            Self::Opaque(name) => write!(f, "opaque({name})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        assert_eq!(Value::Int32(0), DataType::Int32.default_value());
        assert_eq!(Value::Null, DataType::Utf8.default_value());
        assert_eq!(Value::Null, DataType::nullable(DataType::Int32).default_value());
    }

    #[test]
    fn nested_display() {
        let ty = DataType::queryable(DataType::grouping(DataType::Utf8, DataType::array(DataType::Int64)));
        assert_eq!("Queryable<Grouping<string, i64[]>>", ty.to_string());
    }

    #[test]
    fn widening_assignments() {
        assert!(DataType::Int64.is_assignable_from(&DataType::Int32));
        assert!(DataType::Float64.is_assignable_from(&DataType::Int64));
        assert!(!DataType::Int32.is_assignable_from(&DataType::Int64));
        assert!(DataType::nullable(DataType::Int32).is_assignable_from(&DataType::Int32));
    }
}
