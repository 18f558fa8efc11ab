//! Runtime values.
pub mod dataset;
pub mod object;

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use linkq_error::{DbError, Result};
use uuid::Uuid;

use self::dataset::DataSet;
pub use self::object::ObjectRef;
use crate::types::{CollectionKind, DataType};

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
    Collection(CollectionValue),
    Grouping(Arc<Grouping>),
    Object(ObjectRef),
    Queryable(QueryableValue),
    Opaque(OpaqueValue),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionValue {
    pub kind: CollectionKind,
    pub items: Vec<Value>,
}

/// Group of elements sharing a key.
#[derive(Debug, Clone, PartialEq)]
pub struct Grouping {
    pub key: Value,
    pub elements: Vec<Value>,
}

/// Root of a query.
#[derive(Debug, Clone)]
pub enum QueryableValue {
    /// Placeholder for a data set that lives on the other side of the
    /// boundary. Only the element type is known.
    Remote(DataType),
    /// Data set that can be enumerated in this process.
    Local(Arc<dyn DataSet>),
}

impl QueryableValue {
    pub fn element_type(&self) -> DataType {
        match self {
            Self::Remote(ty) => ty.clone(),
            Self::Local(set) => set.element_type().clone(),
        }
    }
}

/// A value only meaningful to the process that created it (file handles,
/// delegates, connections).
#[derive(Clone)]
pub struct OpaqueValue {
    pub type_name: String,
    pub handle: Arc<dyn Any + Send + Sync>,
}

impl OpaqueValue {
    pub fn new<T: Any + Send + Sync>(type_name: impl Into<String>, handle: T) -> Self {
        OpaqueValue {
            type_name: type_name.into(),
            handle: Arc::new(handle),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.handle.downcast_ref()
    }
}

impl fmt::Debug for OpaqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({})", self.type_name)
    }
}

impl Value {
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Collection(CollectionValue {
            kind: CollectionKind::List,
            items: items.into_iter().collect(),
        })
    }

    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Collection(CollectionValue {
            kind: CollectionKind::Array,
            items: items.into_iter().collect(),
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Best effort type of this value.
    ///
    /// Collection element types are taken from the first non-null element.
    pub fn datatype(&self) -> DataType {
        match self {
            Self::Null => DataType::Any,
            Self::Boolean(_) => DataType::Boolean,
            Self::Int32(_) => DataType::Int32,
            Self::Int64(_) => DataType::Int64,
            Self::Float64(_) => DataType::Float64,
            Self::Utf8(_) => DataType::Utf8,
            Self::Timestamp(_) => DataType::Timestamp,
            Self::Uuid(_) => DataType::Uuid,
            Self::Collection(c) => DataType::Collection {
                kind: c.kind,
                element: Box::new(first_non_null_type(&c.items)),
            },
            Self::Grouping(g) => DataType::grouping(g.key.datatype(), first_non_null_type(&g.elements)),
            Self::Object(obj) => DataType::Record(obj.record_type().clone()),
            Self::Queryable(q) => DataType::queryable(q.element_type()),
            Self::Opaque(o) => DataType::Opaque(o.type_name.clone()),
        }
    }

    /// If this value can be sent across the boundary.
    pub fn is_transportable(&self) -> bool {
        match self {
            Self::Queryable(_) | Self::Opaque(_) => false,
            Self::Collection(c) => c.items.iter().all(|v| v.is_transportable()),
            Self::Grouping(g) => {
                g.key.is_transportable() && g.elements.iter().all(|v| v.is_transportable())
            }
            _ => true,
        }
    }

    pub fn try_as_bool(&self) -> Result<bool> {
        match self {
            Self::Boolean(b) => Ok(*b),
            other => Err(DbError::new(format!("Expected a bool, got {other}"))),
        }
    }

    pub fn try_as_i32(&self) -> Result<i32> {
        match self {
            Self::Int32(v) => Ok(*v),
            Self::Int64(v) => i32::try_from(*v)
                .map_err(|_| DbError::new(format!("Value {v} out of range for i32"))),
            other => Err(DbError::new(format!("Expected an i32, got {other}"))),
        }
    }

    pub fn try_as_i64(&self) -> Result<i64> {
        match self {
            Self::Int32(v) => Ok(*v as i64),
            Self::Int64(v) => Ok(*v),
            other => Err(DbError::new(format!("Expected an i64, got {other}"))),
        }
    }

    pub fn try_as_f64(&self) -> Result<f64> {
        match self {
            Self::Int32(v) => Ok(*v as f64),
            Self::Int64(v) => Ok(*v as f64),
            Self::Float64(v) => Ok(*v),
            other => Err(DbError::new(format!("Expected a number, got {other}"))),
        }
    }

    pub fn try_as_str(&self) -> Result<&str> {
        match self {
            Self::Utf8(s) => Ok(s),
            other => Err(DbError::new(format!("Expected a string, got {other}"))),
        }
    }

    pub fn try_as_object(&self) -> Result<&ObjectRef> {
        match self {
            Self::Object(obj) => Ok(obj),
            other => Err(DbError::new(format!("Expected an object, got {other}"))),
        }
    }

    /// Elements if this value is an in-memory sequence.
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Self::Collection(c) => Some(&c.items),
            Self::Grouping(g) => Some(&g.elements),
            _ => None,
        }
    }

    /// Materialize this value as a sequence of elements.
    ///
    /// Local queryables are enumerated. Remote queryables cannot be enumerated
    /// in this process.
    pub fn into_sequence(self) -> Result<Vec<Value>> {
        match self {
            Self::Collection(c) => Ok(c.items),
            Self::Grouping(g) => Ok(g.elements.clone()),
            Self::Queryable(QueryableValue::Local(set)) => set.rows(),
            Self::Queryable(QueryableValue::Remote(ty)) => Err(DbError::execution(format!(
                "Remote data set of '{ty}' cannot be enumerated locally"
            ))),
            Self::Null => Err(DbError::new("Cannot enumerate a null sequence")
                .with_kind(linkq_error::ErrorKind::NullReference)),
            other => Err(DbError::execution(format!("Value {other} is not a sequence"))),
        }
    }

    /// Compare two values for ordering.
    ///
    /// Nulls sort first. Numbers compare across widths. Errors if the values
    /// aren't comparable.
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        use Value::*;

        Ok(match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Int32(a), Int32(b)) => a.cmp(b),
            (Int32(_) | Int64(_), Int32(_) | Int64(_)) => self.try_as_i64()?.cmp(&other.try_as_i64()?),
            (Int32(_) | Int64(_) | Float64(_), Int32(_) | Int64(_) | Float64(_)) => self
                .try_as_f64()?
                .partial_cmp(&other.try_as_f64()?)
                .unwrap_or(Ordering::Equal),
            (Utf8(a), Utf8(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (Uuid(a), Uuid(b)) => a.cmp(b),
            (Object(a), Object(b))
                if a.record_type().is_anonymous() && a.record_type() == b.record_type() =>
            {
                for (x, y) in a.values().iter().zip(b.values().iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        ord => return Ok(ord),
                    }
                }
                Ordering::Equal
            }
            (a, b) => {
                return Err(DbError::invalid_operation(format!(
                    "Cannot compare {} with {}",
                    a.datatype(),
                    b.datatype()
                )));
            }
        })
    }
}

fn first_non_null_type(items: &[Value]) -> DataType {
    items
        .iter()
        .find(|v| !v.is_null())
        .map(|v| v.datatype())
        .unwrap_or(DataType::Any)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;

        match (self, other) {
            (Null, Null) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Int32(a), Int32(b)) => a == b,
            (Int32(_) | Int64(_), Int32(_) | Int64(_)) => {
                self.try_as_i64().ok() == other.try_as_i64().ok()
            }
            (Int32(_) | Int64(_) | Float64(_), Int32(_) | Int64(_) | Float64(_)) => {
                self.try_as_f64().ok() == other.try_as_f64().ok()
            }
            (Utf8(a), Utf8(b)) => a == b,
            (Timestamp(a), Timestamp(b)) => a == b,
            (Uuid(a), Uuid(b)) => a == b,
            (Collection(a), Collection(b)) => a.items == b.items,
            (Grouping(a), Grouping(b)) => a == b,
            (Object(a), Object(b)) => {
                if ObjectRef::ptr_eq(a, b) {
                    return true;
                }
                // Anonymous instances compare by value, everything else by
                // identity.
                a.record_type().is_anonymous()
                    && a.record_type() == b.record_type()
                    && a.values() == b.values()
            }
            (Queryable(QueryableValue::Local(a)), Queryable(QueryableValue::Local(b))) => {
                Arc::ptr_eq(a, b)
            }
            (Queryable(QueryableValue::Remote(a)), Queryable(QueryableValue::Remote(b))) => a == b,
            (Opaque(a), Opaque(b)) => Arc::ptr_eq(&a.handle, &b.handle),
            _ => false,
        }
    }
}

// Floats make this not strictly true (NaN), but values need to be usable as
// grouping and join keys.
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0u8.hash(state),
            Self::Boolean(b) => b.hash(state),
            // Numbers hash through a common representation so that equal
            // values of different widths hash the same.
            Self::Int32(v) => (*v as f64).to_bits().hash(state),
            Self::Int64(v) => (*v as f64).to_bits().hash(state),
            Self::Float64(v) => {
                let v = if *v == 0.0 { 0.0 } else { *v };
                v.to_bits().hash(state)
            }
            Self::Utf8(s) => s.hash(state),
            Self::Timestamp(t) => t.hash(state),
            Self::Uuid(u) => u.hash(state),
            Self::Collection(c) => c.items.hash(state),
            Self::Grouping(g) => g.key.hash(state),
            Self::Object(obj) => {
                if obj.record_type().is_anonymous() {
                    obj.values().hash(state)
                } else {
                    obj.addr().hash(state)
                }
            }
            Self::Queryable(QueryableValue::Remote(ty)) => ty.hash(state),
            Self::Queryable(QueryableValue::Local(set)) => {
                (Arc::as_ptr(set) as *const () as usize).hash(state)
            }
            Self::Opaque(o) => (Arc::as_ptr(&o.handle) as *const () as usize).hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "'{v}'"),
            Self::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Uuid(v) => write!(f, "{v}"),
            Self::Collection(c) => {
                write!(f, "[")?;
                for (idx, item) in c.items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Grouping(g) => write!(f, "Grouping(key: {}, count: {})", g.key, g.elements.len()),
            Self::Object(obj) => write!(f, "{obj}"),
            Self::Queryable(QueryableValue::Remote(ty)) => write!(f, "RemoteQueryable<{ty}>"),
            Self::Queryable(QueryableValue::Local(set)) => {
                write!(f, "Queryable<{}>", set.element_type())
            }
            Self::Opaque(o) => write!(f, "{o:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float64(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Utf8(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Utf8(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Uuid(value)
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Value::Object(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use hashbrown::HashSet;

    use super::*;
    use crate::types::record::{PropertyDef, RecordType};

    #[test]
    fn numeric_equality_across_widths() {
        assert_eq!(Value::Int32(4), Value::Int64(4));
        assert_eq!(Value::Int64(4), Value::Float64(4.0));
        assert_ne!(Value::Int32(4), Value::Float64(4.5));

        let mut set = HashSet::new();
        set.insert(Value::Int32(4));
        assert!(set.contains(&Value::Int64(4)));
    }

    #[test]
    fn anonymous_objects_compare_by_value() {
        let anon = RecordType::anonymous([PropertyDef::new("k", DataType::Utf8)]);
        let a = ObjectRef::with_values(anon.clone(), vec!["x".into()]).unwrap();
        let b = ObjectRef::with_values(anon.clone(), vec!["x".into()]).unwrap();
        assert_eq!(Value::Object(a.clone()), Value::Object(b.clone()));

        let mut set = HashSet::new();
        set.insert(Value::Object(a));
        assert!(set.contains(&Value::Object(b)));
    }

    #[test]
    fn class_objects_compare_by_identity() {
        let ty = RecordType::new("shop", "Product", [PropertyDef::new("id", DataType::Int32)]);
        let a = ObjectRef::build(&ty, [("id", Value::Int32(1))]).unwrap();
        let b = ObjectRef::build(&ty, [("id", Value::Int32(1))]).unwrap();
        assert_ne!(Value::Object(a.clone()), Value::Object(b));
        assert_eq!(Value::Object(a.clone()), Value::Object(a));
    }

    #[test]
    fn ordering() {
        assert_eq!(Ordering::Less, Value::Null.compare(&Value::Int32(1)).unwrap());
        assert_eq!(Ordering::Greater, Value::Int64(3).compare(&Value::Int32(2)).unwrap());
        assert_eq!(Ordering::Less, Value::from("a").compare(&Value::from("b")).unwrap());
        Value::from("a").compare(&Value::Int32(1)).unwrap_err();
    }

    #[test]
    fn collection_datatype() {
        let v = Value::array([Value::Null, Value::Int32(1)]);
        assert_eq!(DataType::array(DataType::Int32), v.datatype());
    }
}
