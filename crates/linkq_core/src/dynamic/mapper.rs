use std::fmt::Debug;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hashbrown::{HashMap, HashSet};
use linkq_error::{DbError, Result};
use tracing::trace;
use uuid::Uuid;

use super::{DynamicObject, DynamicValue};
use crate::types::descriptor::{DescriptorCache, TypeDescriptor};
use crate::types::emitter::TypeEmitter;
use crate::types::record::{PropertyDef, RecordKind, RecordType};
use crate::types::resolver::TypeResolver;
use crate::types::{CollectionKind, DataType};
use crate::values::{CollectionValue, Grouping, ObjectRef, Value};

const GROUPING_KEY: &str = "Key";
const GROUPING_ELEMENTS: &str = "Elements";

/// Custom handling for specific values or types.
///
/// Returning `None` falls back to the default mapping.
pub trait MapperHook: Debug + Send + Sync {
    fn map_out(&self, _value: &Value) -> Option<Result<DynamicValue>> {
        None
    }

    fn map_in(&self, _value: &DynamicValue, _target: &DataType) -> Option<Result<Value>> {
        None
    }
}

/// Converts values to and from dynamic property bags.
#[derive(Debug, Clone)]
pub struct DynamicObjectMapper {
    resolver: Arc<dyn TypeResolver>,
    emitter: Arc<TypeEmitter>,
    include_type_info: bool,
    include_property_descriptors: bool,
    hook: Option<Arc<dyn MapperHook>>,
}

impl DynamicObjectMapper {
    pub fn new(resolver: Arc<dyn TypeResolver>, emitter: Arc<TypeEmitter>) -> Self {
        DynamicObjectMapper {
            resolver,
            emitter,
            include_type_info: true,
            include_property_descriptors: false,
            hook: None,
        }
    }

    /// Set if objects carry type descriptors when mapped out.
    pub fn with_type_info(mut self, include: bool) -> Self {
        self.include_type_info = include;
        self
    }

    /// Set if class type descriptors carry their properties.
    pub fn with_property_descriptors(mut self, include: bool) -> Self {
        self.include_property_descriptors = include;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn MapperHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn resolver(&self) -> &Arc<dyn TypeResolver> {
        &self.resolver
    }

    pub fn emitter(&self) -> &Arc<TypeEmitter> {
        &self.emitter
    }

    /// Map a value out to its dynamic representation.
    ///
    /// Objects reachable more than once (shared or cyclic) are emitted in full
    /// at their first occurrence, and as a `Reference` afterwards.
    pub fn map_out(&self, value: &Value) -> Result<DynamicValue> {
        let mut shared = HashSet::new();
        find_shared(value, &mut HashSet::new(), &mut shared);

        let mut state = MapOutState {
            shared,
            ids: HashMap::new(),
            descriptors: DescriptorCache::new(self.include_property_descriptors),
        };
        self.map_out_inner(value, &mut state)
    }

    fn map_out_inner(&self, value: &Value, state: &mut MapOutState) -> Result<DynamicValue> {
        if let Some(hook) = &self.hook {
            if let Some(result) = hook.map_out(value) {
                return result;
            }
        }

        Ok(match value {
            Value::Null => DynamicValue::Null,
            Value::Boolean(v) => DynamicValue::Boolean(*v),
            Value::Int32(v) => DynamicValue::Int32(*v),
            Value::Int64(v) => DynamicValue::Int64(*v),
            Value::Float64(v) => DynamicValue::Float64(*v),
            Value::Utf8(v) => DynamicValue::Utf8(v.clone()),
            Value::Timestamp(v) => DynamicValue::Timestamp(*v),
            Value::Uuid(v) => DynamicValue::Uuid(*v),
            Value::Collection(c) => DynamicValue::Sequence {
                kind: c.kind,
                items: c
                    .items
                    .iter()
                    .map(|item| self.map_out_inner(item, state))
                    .collect::<Result<_>>()?,
            },
            Value::Grouping(g) => {
                let mut obj = if self.include_type_info {
                    DynamicObject::with_type(state.descriptors.get(&value.datatype()))
                } else {
                    DynamicObject::new()
                };
                obj.set(GROUPING_KEY, self.map_out_inner(&g.key, state)?);
                let elements = g
                    .elements
                    .iter()
                    .map(|e| self.map_out_inner(e, state))
                    .collect::<Result<Vec<_>>>()?;
                obj.set(GROUPING_ELEMENTS, DynamicValue::list(elements));
                DynamicValue::Object(obj)
            }
            Value::Object(instance) => {
                let addr = instance.addr();
                if let Some(id) = state.ids.get(&addr) {
                    return Ok(DynamicValue::Reference(*id));
                }

                let record = instance.record_type();
                let mut obj = if self.include_type_info {
                    DynamicObject::with_type(state.descriptors.get(&value.datatype()))
                } else {
                    DynamicObject::new()
                };

                if state.shared.contains(&addr) {
                    let id = state.ids.len() as u32;
                    state.ids.insert(addr, id);
                    obj.reference_id = Some(id);
                }

                for (prop, field) in record.properties().iter().zip(instance.values()) {
                    let mapped = self.map_out_inner(&field, state)?;
                    obj.set(prop.name.clone(), mapped);
                }

                DynamicValue::Object(obj)
            }
            Value::Queryable(_) | Value::Opaque(_) => {
                return Err(DbError::mapping(format!(
                    "Value of type '{}' cannot be mapped to a dynamic object",
                    value.datatype()
                )));
            }
        })
    }

    /// Map a dynamic value in.
    ///
    /// The target type is taken from `target` if provided, otherwise from the
    /// embedded type descriptor of objects, otherwise inferred from the shape
    /// of the object.
    pub fn map_in(&self, value: &DynamicValue, target: Option<&DataType>) -> Result<Value> {
        let mut state = MapInState::default();
        let target = target.cloned().unwrap_or(DataType::Any);
        self.map_in_inner(value, &target, &mut state)
    }

    /// Map a dynamic sequence in, keeping its collection kind and element
    /// count.
    pub fn map_in_collection(
        &self,
        value: &DynamicValue,
        element_type: Option<&DataType>,
    ) -> Result<Value> {
        let mut state = MapInState::default();
        let element_type = element_type.cloned().unwrap_or(DataType::Any);
        match value {
            DynamicValue::Sequence { kind, items } => {
                self.map_in_sequence(*kind, items, &element_type, &mut state)
            }
            other => Err(DbError::mapping(format!(
                "Expected a sequence, got {}",
                other.variant_name()
            ))),
        }
    }

    fn map_in_sequence(
        &self,
        kind: CollectionKind,
        items: &[DynamicValue],
        element_type: &DataType,
        state: &mut MapInState,
    ) -> Result<Value> {
        let items = items
            .iter()
            .map(|item| self.map_in_inner(item, element_type, state))
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::Collection(CollectionValue { kind, items }))
    }

    fn map_in_inner(
        &self,
        value: &DynamicValue,
        target: &DataType,
        state: &mut MapInState,
    ) -> Result<Value> {
        if let Some(hook) = &self.hook {
            if let Some(result) = hook.map_in(value, target) {
                return result;
            }
        }

        if let DynamicValue::Reference(id) = value {
            let instance = state.references.get(id).cloned().ok_or_else(|| {
                DbError::mapping(format!("Reference to unknown object id {id}"))
            })?;
            if let DataType::Record(expected) = target.non_nullable() {
                if instance.record_type() != expected {
                    return Err(DbError::mapping(format!(
                        "Referenced object of type '{}' cannot be assigned to '{}'",
                        instance.record_type().full_name(),
                        expected.full_name()
                    )));
                }
            }
            return Ok(Value::Object(instance));
        }

        if value.is_null() {
            if target.accepts_null() {
                return Ok(Value::Null);
            }
            return Err(DbError::mapping(format!(
                "Null cannot be assigned to '{target}'"
            )));
        }

        let mismatch = || {
            DbError::mapping(format!(
                "Value of kind '{}' cannot be assigned to '{target}'",
                value.variant_name()
            ))
        };

        match target.non_nullable() {
            DataType::Any => self.map_in_inferred(value, state),
            DataType::Boolean => match value {
                DynamicValue::Boolean(v) => Ok(Value::Boolean(*v)),
                _ => Err(mismatch()),
            },
            DataType::Int32 => {
                let v = integer_of(value).ok_or_else(mismatch)?;
                i32::try_from(v)
                    .map(Value::Int32)
                    .map_err(|_| DbError::mapping(format!("Value {v} out of range for i32")))
            }
            DataType::Int64 => integer_of(value).map(Value::Int64).ok_or_else(mismatch),
            DataType::Float64 => match value {
                DynamicValue::Int32(v) => Ok(Value::Float64(*v as f64)),
                DynamicValue::Int64(v) => Ok(Value::Float64(*v as f64)),
                DynamicValue::Float64(v) => Ok(Value::Float64(*v)),
                _ => Err(mismatch()),
            },
            DataType::Utf8 => match value {
                DynamicValue::Utf8(v) => Ok(Value::Utf8(v.clone())),
                _ => Err(mismatch()),
            },
            DataType::Timestamp => match value {
                DynamicValue::Timestamp(v) => Ok(Value::Timestamp(*v)),
                DynamicValue::Utf8(s) => DateTime::parse_from_rfc3339(s)
                    .map(|v| Value::Timestamp(v.with_timezone(&Utc)))
                    .map_err(|e| {
                        DbError::mapping(format!("Invalid timestamp '{s}'")).with_field("error", e)
                    }),
                _ => Err(mismatch()),
            },
            DataType::Uuid => match value {
                DynamicValue::Uuid(v) => Ok(Value::Uuid(*v)),
                DynamicValue::Utf8(s) => Uuid::parse_str(s)
                    .map(Value::Uuid)
                    .map_err(|e| DbError::mapping(format!("Invalid uuid '{s}'")).with_field("error", e)),
                _ => Err(mismatch()),
            },
            DataType::Collection { kind, element } => match value {
                DynamicValue::Sequence { items, .. } => {
                    self.map_in_sequence(*kind, items, element, state)
                }
                _ => Err(mismatch()),
            },
            // Materialized query results come back as plain lists.
            DataType::Queryable(element) => match value {
                DynamicValue::Sequence { kind, items } => {
                    self.map_in_sequence(*kind, items, element, state)
                }
                _ => Err(mismatch()),
            },
            DataType::Grouping { key, element } => match value {
                DynamicValue::Object(obj) => self.map_in_grouping(obj, key, element, state),
                _ => Err(mismatch()),
            },
            DataType::Record(record) => match value {
                DynamicValue::Object(obj) => self.map_in_object(obj, record, state),
                _ => Err(mismatch()),
            },
            DataType::Unit | DataType::Function { .. } | DataType::Opaque(_) => Err(
                DbError::mapping(format!("Values cannot be mapped in as '{target}'")),
            ),
            DataType::Nullable(_) => Err(DbError::mapping(format!(
                "Nested nullable type '{target}' not supported"
            ))),
        }
    }

    /// Map in a value with no known target type.
    fn map_in_inferred(&self, value: &DynamicValue, state: &mut MapInState) -> Result<Value> {
        Ok(match value {
            DynamicValue::Null => Value::Null,
            DynamicValue::Boolean(v) => Value::Boolean(*v),
            DynamicValue::Int32(v) => Value::Int32(*v),
            DynamicValue::Int64(v) => Value::Int64(*v),
            DynamicValue::Float64(v) => Value::Float64(*v),
            DynamicValue::Utf8(v) => Value::Utf8(v.clone()),
            DynamicValue::Timestamp(v) => Value::Timestamp(*v),
            DynamicValue::Uuid(v) => Value::Uuid(*v),
            DynamicValue::Sequence { kind, items } => {
                self.map_in_sequence(*kind, items, &DataType::Any, state)?
            }
            DynamicValue::Object(obj) => {
                let target = match &obj.type_info {
                    Some(desc) => self.resolve(desc)?,
                    None => DataType::Any,
                };
                let target = match target {
                    DataType::Any => DataType::Record(self.emit_for(obj)),
                    other => other,
                };
                return self.map_in_inner(value, &target, state);
            }
            DynamicValue::Reference(_) => {
                return self.map_in_inner(value, &DataType::Any, state);
            }
        })
    }

    fn map_in_grouping(
        &self,
        obj: &DynamicObject,
        key: &DataType,
        element: &DataType,
        state: &mut MapInState,
    ) -> Result<Value> {
        let key_value = obj
            .get(GROUPING_KEY)
            .ok_or_else(|| missing_property("Grouping", GROUPING_KEY))?;
        let key = self.map_in_inner(key_value, key, state)?;

        let elements = match obj.get(GROUPING_ELEMENTS) {
            Some(DynamicValue::Sequence { items, .. }) => items
                .iter()
                .map(|item| self.map_in_inner(item, element, state))
                .collect::<Result<Vec<_>>>()?,
            Some(_) => {
                return Err(DbError::mapping(
                    "Property 'Elements' of 'Grouping' must be a sequence",
                ));
            }
            None => return Err(missing_property("Grouping", GROUPING_ELEMENTS)),
        };

        Ok(Value::Grouping(Arc::new(Grouping { key, elements })))
    }

    fn map_in_object(
        &self,
        obj: &DynamicObject,
        record: &Arc<RecordType>,
        state: &mut MapInState,
    ) -> Result<Value> {
        // Allocate and register before filling in properties so that nested
        // references back to this object resolve to the same instance.
        let instance = ObjectRef::new(record.clone());
        if let Some(id) = obj.reference_id {
            state.references.insert(id, instance.clone());
        }

        // Class instances keep defaults for missing properties.
        if record.kind() == RecordKind::Anonymous {
            if let Some(prop) = record.properties().iter().find(|p| obj.get(&p.name).is_none()) {
                return Err(missing_property(&record.full_name(), &prop.name));
            }
        }

        // Fill in wire order. A reference can only point at an object that
        // was emitted earlier on the wire, regardless of how the target type
        // orders its properties.
        for (name, field) in &obj.properties {
            let idx = record.property_index(name).ok_or_else(|| {
                DbError::mapping(format!(
                    "Type '{}' has no property '{name}'",
                    record.full_name()
                ))
            })?;
            let prop = &record.properties()[idx];
            let value = self.map_in_inner(field, &prop.datatype, state).map_err(|e| {
                DbError::mapping(format!(
                    "Unable to map property '{}' of type '{}': {}",
                    prop.name,
                    record.full_name(),
                    e.message()
                ))
            })?;
            instance.set_index(idx, value)?;
        }

        Ok(Value::Object(instance))
    }

    fn resolve(&self, desc: &TypeDescriptor) -> Result<DataType> {
        self.resolver.resolve(desc).map_err(|e| {
            DbError::mapping(format!("Unable to resolve type '{desc}': {}", e.message()))
        })
    }

    /// Emit a structural type for an object without type information.
    fn emit_for(&self, obj: &DynamicObject) -> Arc<RecordType> {
        let properties: Vec<_> = obj
            .properties
            .iter()
            .map(|(name, value)| PropertyDef::new(name.clone(), infer_type(value)))
            .collect();
        trace!(properties = properties.len(), "inferring type for untyped object");
        self.emitter.emit(&properties)
    }
}

struct MapOutState {
    /// Objects reachable more than once.
    shared: HashSet<usize>,
    /// Reference ids for shared objects already emitted.
    ids: HashMap<usize, u32>,
    descriptors: DescriptorCache,
}

#[derive(Default)]
struct MapInState {
    references: HashMap<u32, ObjectRef>,
}

/// Walk a value graph, recording object addresses reached more than once.
fn find_shared(value: &Value, visited: &mut HashSet<usize>, shared: &mut HashSet<usize>) {
    match value {
        Value::Object(obj) => {
            if !visited.insert(obj.addr()) {
                shared.insert(obj.addr());
                return;
            }
            for field in obj.values() {
                find_shared(&field, visited, shared);
            }
        }
        Value::Collection(c) => {
            for item in &c.items {
                find_shared(item, visited, shared);
            }
        }
        Value::Grouping(g) => {
            find_shared(&g.key, visited, shared);
            for item in &g.elements {
                find_shared(item, visited, shared);
            }
        }
        _ => (),
    }
}

fn integer_of(value: &DynamicValue) -> Option<i64> {
    match value {
        DynamicValue::Int32(v) => Some(*v as i64),
        DynamicValue::Int64(v) => Some(*v),
        DynamicValue::Float64(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
            Some(*v as i64)
        }
        _ => None,
    }
}

fn infer_type(value: &DynamicValue) -> DataType {
    match value {
        DynamicValue::Null | DynamicValue::Reference(_) | DynamicValue::Object(_) => DataType::Any,
        DynamicValue::Boolean(_) => DataType::Boolean,
        DynamicValue::Int32(_) => DataType::Int32,
        DynamicValue::Int64(_) => DataType::Int64,
        DynamicValue::Float64(_) => DataType::Float64,
        DynamicValue::Utf8(_) => DataType::Utf8,
        DynamicValue::Timestamp(_) => DataType::Timestamp,
        DynamicValue::Uuid(_) => DataType::Uuid,
        DynamicValue::Sequence { kind, items } => DataType::Collection {
            kind: *kind,
            element: Box::new(
                items
                    .iter()
                    .find(|v| !v.is_null())
                    .map(infer_type)
                    .unwrap_or(DataType::Any),
            ),
        },
    }
}

fn missing_property(type_name: &str, property: &str) -> DbError {
    DbError::mapping(format!(
        "Missing property '{property}' required by type '{type_name}'"
    ))
}
