use std::fmt::Debug;
use std::sync::Arc;

use hashbrown::HashMap;
use linkq_error::{DbError, Result};
use parking_lot::RwLock;

use crate::types::DataType;
use crate::types::descriptor::TypeDescriptor;
use crate::values::dataset::DataSet;

/// Provides the real data set behind a queryable resource descriptor.
pub trait ResourceProvider: Debug + Send + Sync {
    /// `element_type` is the resolved element type of the descriptor.
    fn resource(
        &self,
        descriptor: &TypeDescriptor,
        element_type: &DataType,
    ) -> Result<Arc<dyn DataSet>>;
}

/// Data sets registered by element type.
#[derive(Debug, Default)]
pub struct MemoryResourceProvider {
    sets: RwLock<HashMap<String, Arc<dyn DataSet>>>,
}

impl MemoryResourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a data set, replacing any existing set with the same element
    /// type.
    pub fn register(&self, set: Arc<dyn DataSet>) {
        let key = key_for(set.element_type());
        self.sets.write().insert(key, set);
    }

    pub fn len(&self) -> usize {
        self.sets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn key_for(element_type: &DataType) -> String {
    TypeDescriptor::from_datatype(element_type, false).to_string()
}

impl ResourceProvider for MemoryResourceProvider {
    fn resource(
        &self,
        descriptor: &TypeDescriptor,
        element_type: &DataType,
    ) -> Result<Arc<dyn DataSet>> {
        self.sets
            .read()
            .get(&key_for(element_type))
            .cloned()
            .ok_or_else(|| {
                DbError::translation(format!("No data set registered for '{descriptor}'"))
            })
    }
}
