use std::sync::Arc;

use hashbrown::HashMap;
use linkq_error::{DbError, Result};
use parking_lot::RwLock;

use super::record::RecordType;

/// Registry of known record types keyed by namespace and name.
///
/// Reads are expected to vastly outnumber writes. Writes only happen when a
/// type is first registered.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<(String, String), Arc<RecordType>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type.
    ///
    /// Registering the same type twice is a no-op. Registering a different
    /// type under an existing name errors.
    pub fn register(&self, record: Arc<RecordType>) -> Result<()> {
        let key = (record.namespace().to_string(), record.name().to_string());

        let mut types = self.types.write();
        match types.get(&key) {
            Some(existing) if Arc::ptr_eq(existing, &record) => Ok(()),
            Some(existing) if existing.properties() == record.properties() => Ok(()),
            Some(_) => Err(DbError::new(format!(
                "A different type named '{}' is already registered",
                record.full_name()
            ))),
            None => {
                types.insert(key, record);
                Ok(())
            }
        }
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<RecordType>> {
        // TODO: Avoid the allocations with a borrowed key lookup (hashbrown
        // `Equivalent`).
        self.types
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;
    use crate::types::record::PropertyDef;

    #[test]
    fn register_and_get() {
        let registry = TypeRegistry::new();
        let product = RecordType::new("shop", "Product", [PropertyDef::new("id", DataType::Int32)]);
        registry.register(product.clone()).unwrap();
        registry.register(product.clone()).unwrap();

        let got = registry.get("shop", "Product").unwrap();
        assert!(Arc::ptr_eq(&product, &got));
        assert!(registry.get("shop", "Order").is_none());
    }

    #[test]
    fn conflicting_registration() {
        let registry = TypeRegistry::new();
        registry
            .register(RecordType::new("shop", "Product", [PropertyDef::new("id", DataType::Int32)]))
            .unwrap();
        registry
            .register(RecordType::new("shop", "Product", [PropertyDef::new("id", DataType::Utf8)]))
            .unwrap_err();
    }
}
