use std::fmt;
use std::sync::Arc;

use linkq_error::{DbError, Result};
use parking_lot::RwLock;

use super::Value;
use crate::types::record::RecordType;

/// Shared reference to an instance of a record type.
///
/// Fields are interior mutable so that object graphs containing cycles can be
/// built (allocate first, then fill in references).
#[derive(Clone)]
pub struct ObjectRef(Arc<ObjectInstance>);

struct ObjectInstance {
    ty: Arc<RecordType>,
    fields: RwLock<Vec<Value>>,
}

impl ObjectRef {
    /// Create a new instance with every property set to its default value.
    pub fn new(ty: Arc<RecordType>) -> Self {
        let fields = ty
            .properties()
            .iter()
            .map(|p| p.datatype.default_value())
            .collect();
        ObjectRef(Arc::new(ObjectInstance {
            ty,
            fields: RwLock::new(fields),
        }))
    }

    /// Create an instance from positional field values.
    pub fn with_values(ty: Arc<RecordType>, values: Vec<Value>) -> Result<Self> {
        if values.len() != ty.properties().len() {
            return Err(DbError::new(format!(
                "Type '{}' has {} properties, got {} values",
                ty.full_name(),
                ty.properties().len(),
                values.len()
            )));
        }
        Ok(ObjectRef(Arc::new(ObjectInstance {
            ty,
            fields: RwLock::new(values),
        })))
    }

    /// Create an instance from named values. Properties not named keep their
    /// default.
    pub fn build<S>(ty: &Arc<RecordType>, values: impl IntoIterator<Item = (S, Value)>) -> Result<Self>
    where
        S: AsRef<str>,
    {
        let obj = Self::new(ty.clone());
        for (name, value) in values {
            obj.set(name.as_ref(), value)?;
        }
        Ok(obj)
    }

    pub fn record_type(&self) -> &Arc<RecordType> {
        &self.0.ty
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        let idx = self.0.ty.try_property_index(name)?;
        Ok(self.get_index(idx))
    }

    pub fn get_index(&self, idx: usize) -> Value {
        self.0.fields.read().get(idx).cloned().unwrap_or(Value::Null)
    }

    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        let idx = self.0.ty.try_property_index(name)?;
        self.set_index(idx, value)
    }

    pub fn set_index(&self, idx: usize, value: Value) -> Result<()> {
        let mut fields = self.0.fields.write();
        match fields.get_mut(idx) {
            Some(field) => {
                *field = value;
                Ok(())
            }
            None => Err(DbError::new(format!(
                "Property index {idx} out of range for '{}'",
                self.0.ty.full_name()
            ))),
        }
    }

    /// Snapshot of all field values in property order.
    pub fn values(&self) -> Vec<Value> {
        self.0.fields.read().clone()
    }

    pub fn ptr_eq(a: &ObjectRef, b: &ObjectRef) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Address of the instance, stable for the lifetime of the instance.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:#x}", self.0.ty.full_name(), self.addr())
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{ ", self.0.ty.full_name())?;
        let fields = self.0.fields.read();
        for (idx, (prop, value)) in self.0.ty.properties().iter().zip(fields.iter()).enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            match value {
                // Don't follow references, they may be cyclic.
                Value::Object(obj) => write!(f, "{}: {:?}", prop.name, obj)?,
                other => write!(f, "{}: {}", prop.name, other)?,
            }
        }
        write!(f, " }}")
    }
}
