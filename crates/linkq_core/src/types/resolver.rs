use std::fmt::Debug;
use std::sync::Arc;

use hashbrown::HashMap;
use linkq_error::{DbError, Result};
use parking_lot::RwLock;

use super::descriptor::{BUILTIN_NAMESPACE, OPAQUE_NAMESPACE, PropertyDescriptor, TypeDescriptor};
use super::emitter::TypeEmitter;
use super::record::PropertyDef;
use super::registry::TypeRegistry;
use super::DataType;

/// Resolves portable type descriptors into live types.
pub trait TypeResolver: Debug + Send + Sync {
    fn resolve(&self, descriptor: &TypeDescriptor) -> Result<DataType>;
}

/// Resolves builtin types structurally, record types through a registry, and
/// falls back to emitting a structural type for descriptors that carry their
/// properties.
#[derive(Debug)]
pub struct DefaultTypeResolver {
    registry: Arc<TypeRegistry>,
    emitter: Arc<TypeEmitter>,
    /// Resolved types keyed by descriptor.
    ///
    /// Types containing emitted records are never cached here, holding them
    /// strongly would keep them alive forever.
    cache: RwLock<HashMap<TypeDescriptor, DataType>>,
}

impl DefaultTypeResolver {
    pub fn new(registry: Arc<TypeRegistry>, emitter: Arc<TypeEmitter>) -> Self {
        DefaultTypeResolver {
            registry,
            emitter,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn emitter(&self) -> &Arc<TypeEmitter> {
        &self.emitter
    }

    fn resolve_uncached(&self, desc: &TypeDescriptor) -> Result<DataType> {
        if let Some(element) = desc.element_of_array() {
            return Ok(DataType::array(self.resolve(&element)?));
        }

        if desc.namespace.is_empty() && desc.generic_arguments.is_empty() {
            let primitive = match desc.name.as_str() {
                "any" => Some(DataType::Any),
                "unit" => Some(DataType::Unit),
                "bool" => Some(DataType::Boolean),
                "i32" => Some(DataType::Int32),
                "i64" => Some(DataType::Int64),
                "f64" => Some(DataType::Float64),
                "string" => Some(DataType::Utf8),
                "timestamp" => Some(DataType::Timestamp),
                "uuid" => Some(DataType::Uuid),
                _ => None,
            };
            if let Some(primitive) = primitive {
                return Ok(primitive);
            }
        }

        if desc.namespace == BUILTIN_NAMESPACE {
            return self.resolve_builtin_generic(desc);
        }

        if desc.namespace == OPAQUE_NAMESPACE {
            return Err(DbError::translation(format!(
                "Type '{desc}' is a local handle and cannot be resolved"
            )));
        }

        if let Some(record) = self.registry.get(&desc.namespace, &desc.name) {
            return Ok(DataType::Record(record));
        }

        if let Some(properties) = &desc.properties {
            let properties = self.resolve_properties(properties)?;
            return Ok(DataType::Record(self.emitter.emit(&properties)));
        }

        Err(DbError::translation(format!("Unable to resolve type '{desc}'")))
    }

    fn resolve_builtin_generic(&self, desc: &TypeDescriptor) -> Result<DataType> {
        let args = desc
            .generic_arguments
            .iter()
            .map(|arg| self.resolve(arg))
            .collect::<Result<Vec<_>>>()?;

        let expect_args = |n: usize| -> Result<()> {
            if args.len() != n {
                return Err(DbError::translation(format!(
                    "Type '{desc}' expects {n} generic arguments, got {}",
                    args.len()
                )));
            }
            Ok(())
        };

        let mut args_iter = args.iter().cloned();
        let mut next = || args_iter.next().unwrap_or(DataType::Any);

        Ok(match desc.name.as_str() {
            "Nullable" => {
                expect_args(1)?;
                DataType::nullable(next())
            }
            "List" => {
                expect_args(1)?;
                DataType::list(next())
            }
            "Queryable" => {
                expect_args(1)?;
                DataType::queryable(next())
            }
            "Grouping" => {
                expect_args(2)?;
                let key = next();
                DataType::grouping(key, next())
            }
            "Func" => {
                if args.is_empty() {
                    return Err(DbError::translation(
                        "Function type requires at least a return type",
                    ));
                }
                let mut params = args.clone();
                let ret = params.pop().unwrap_or(DataType::Unit);
                DataType::Function {
                    params,
                    ret: Box::new(ret),
                }
            }
            other => {
                return Err(DbError::translation(format!(
                    "Unknown builtin type '{other}'"
                )));
            }
        })
    }

    fn resolve_properties(&self, properties: &[PropertyDescriptor]) -> Result<Vec<PropertyDef>> {
        properties
            .iter()
            .map(|p| Ok(PropertyDef::new(p.name.clone(), self.resolve(&p.type_info)?)))
            .collect()
    }
}

impl TypeResolver for DefaultTypeResolver {
    fn resolve(&self, descriptor: &TypeDescriptor) -> Result<DataType> {
        if let Some(ty) = self.cache.read().get(descriptor) {
            return Ok(ty.clone());
        }

        let ty = self.resolve_uncached(descriptor)?;
        if !contains_anonymous(&ty) {
            self.cache.write().insert(descriptor.clone(), ty.clone());
        }

        Ok(ty)
    }
}

fn contains_anonymous(ty: &DataType) -> bool {
    match ty {
        DataType::Record(record) => record.is_anonymous(),
        DataType::Nullable(inner) | DataType::Queryable(inner) => contains_anonymous(inner),
        DataType::Collection { element, .. } => contains_anonymous(element),
        DataType::Grouping { key, element } => contains_anonymous(key) || contains_anonymous(element),
        DataType::Function { params, ret } => {
            params.iter().any(contains_anonymous) || contains_anonymous(ret)
        }
        _ => false,
    }
}

/// Namespace remapping rule.
///
/// A namespace matches if it's equal to `from`, or if it starts with `from`
/// followed by a '.'.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceMapping {
    pub from: String,
    pub to: String,
}

impl NamespaceMapping {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        NamespaceMapping {
            from: from.into(),
            to: to.into(),
        }
    }

    fn apply(&self, namespace: &str) -> Option<String> {
        if namespace == self.from {
            return Some(self.to.clone());
        }
        namespace
            .strip_prefix(self.from.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .map(|rest| format!("{}.{rest}", self.to))
    }
}

/// Resolver remapping namespaces before delegating to an inner resolver.
///
/// Useful when both sides share the shape of a model but not its name, e.g. a
/// client facing model and a server internal model.
#[derive(Debug)]
pub struct NamespaceMappingResolver {
    inner: Arc<dyn TypeResolver>,
    mappings: Vec<NamespaceMapping>,
}

impl NamespaceMappingResolver {
    pub fn new(inner: Arc<dyn TypeResolver>, mappings: Vec<NamespaceMapping>) -> Self {
        NamespaceMappingResolver { inner, mappings }
    }

    /// Rewrite namespaces in a descriptor, including generic arguments and
    /// properties.
    pub fn remap(&self, desc: &TypeDescriptor) -> TypeDescriptor {
        let namespace = self
            .mappings
            .iter()
            .find_map(|m| m.apply(&desc.namespace))
            .unwrap_or_else(|| desc.namespace.clone());

        TypeDescriptor {
            name: desc.name.clone(),
            namespace,
            generic_arguments: desc.generic_arguments.iter().map(|g| self.remap(g)).collect(),
            array_rank: desc.array_rank,
            is_anonymous: desc.is_anonymous,
            properties: desc.properties.as_ref().map(|props| {
                props
                    .iter()
                    .map(|p| PropertyDescriptor {
                        name: p.name.clone(),
                        type_info: self.remap(&p.type_info),
                    })
                    .collect()
            }),
        }
    }
}

impl TypeResolver for NamespaceMappingResolver {
    fn resolve(&self, descriptor: &TypeDescriptor) -> Result<DataType> {
        self.inner.resolve(&self.remap(descriptor))
    }
}
