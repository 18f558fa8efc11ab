//! Shared fixtures for unit tests.
use std::sync::Arc;

use crate::config::QueryConfig;
use crate::dynamic::mapper::DynamicObjectMapper;
use crate::types::DataType;
use crate::types::emitter::TypeEmitter;
use crate::types::record::{PropertyDef, RecordType};
use crate::types::registry::TypeRegistry;
use crate::types::resolver::DefaultTypeResolver;
use crate::values::dataset::MemoryDataSet;
use crate::values::{ObjectRef, Value};

/// A small model with a flat record type and a self referencing one.
pub(crate) struct TestModel {
    pub emitter: Arc<TypeEmitter>,
    pub resolver: Arc<DefaultTypeResolver>,
    /// shop.Product { id: i32, name: string, price: f64 }
    pub product: Arc<RecordType>,
    /// graph.Node { name: string, next: graph.Node }
    pub node: Arc<RecordType>,
}

impl TestModel {
    pub fn new() -> Self {
        let product = RecordType::new(
            "shop",
            "Product",
            [
                PropertyDef::new("id", DataType::Int32),
                PropertyDef::new("name", DataType::Utf8),
                PropertyDef::new("price", DataType::Float64),
            ],
        );

        let node = RecordType::declare("graph", "Node");
        node.define([
            PropertyDef::new("name", DataType::Utf8),
            PropertyDef::new("next", DataType::Record(node.clone())),
        ])
        .unwrap();

        let registry = Arc::new(TypeRegistry::new());
        registry.register(product.clone()).unwrap();
        registry.register(node.clone()).unwrap();

        let emitter = Arc::new(TypeEmitter::from_config(&QueryConfig::default()));
        let resolver = Arc::new(DefaultTypeResolver::new(registry, emitter.clone()));

        TestModel {
            emitter,
            resolver,
            product,
            node,
        }
    }

    pub fn mapper(&self) -> DynamicObjectMapper {
        DynamicObjectMapper::new(self.resolver.clone(), self.emitter.clone())
    }

    pub fn product_type(&self) -> DataType {
        DataType::Record(self.product.clone())
    }

    /// The products used throughout the tests.
    pub fn products(&self) -> Vec<Value> {
        vec![
            product(self, 10, "Apple", 1.5),
            product(self, 12, "Car", 9000.0),
            product(self, 13, "Car", 12000.0),
        ]
    }

    pub fn product_set(&self) -> Arc<MemoryDataSet> {
        Arc::new(MemoryDataSet::new(self.product_type(), self.products()))
    }
}

pub(crate) fn product(model: &TestModel, id: i32, name: &str, price: f64) -> Value {
    let obj = ObjectRef::build(
        &model.product,
        [
            ("id", Value::Int32(id)),
            ("name", Value::from(name)),
            ("price", Value::Float64(price)),
        ],
    )
    .unwrap();
    Value::Object(obj)
}
