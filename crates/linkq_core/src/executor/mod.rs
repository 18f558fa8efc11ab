//! Executes IR queries against live data sets.
pub mod provider;
pub mod stages;

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use linkq_error::Result;
use tracing::{debug, warn};

pub use self::provider::ExecutorDataProvider;
pub use self::stages::{DefaultExecutionStages, ExecutionStages};
use crate::config::QueryConfig;
use crate::dynamic::DynamicValue;
use crate::dynamic::mapper::DynamicObjectMapper;
use crate::ir::Expression;
use crate::query::QueryResponse;
use crate::translate::ResourceProvider;
use crate::values::Value;

#[derive(Debug, Clone)]
pub struct ExpressionExecutor {
    stages: Arc<dyn ExecutionStages>,
}

impl ExpressionExecutor {
    pub fn new(stages: Arc<dyn ExecutionStages>) -> Self {
        ExpressionExecutor { stages }
    }

    pub fn with_defaults(
        mapper: DynamicObjectMapper,
        resources: Arc<dyn ResourceProvider>,
        config: &QueryConfig,
    ) -> Self {
        Self::new(Arc::new(DefaultExecutionStages::new(mapper, resources, config)))
    }

    pub fn stages(&self) -> &Arc<dyn ExecutionStages> {
        &self.stages
    }

    /// Execute a query, returning errors as a tagged error response.
    pub fn execute(&self, expr: &Expression) -> QueryResponse {
        match self.try_execute(expr) {
            Ok(value) => QueryResponse::Value(value),
            Err(e) => {
                warn!(error = %e, type_name = e.type_name(), "query execution failed");
                QueryResponse::error(&e)
            }
        }
    }

    pub fn try_execute(&self, expr: &Expression) -> Result<DynamicValue> {
        let value = self.evaluate(expr)?;
        let converted = self.stages.convert_result(&value)?;
        debug!("converted query result");
        Ok(converted)
    }

    /// Execute a sequence query, converting one element per pull.
    ///
    /// Failures before the first element produce a single error response.
    pub fn execute_stream(&self, expr: &Expression) -> BoxStream<'static, QueryResponse> {
        let items = match self.evaluate(expr).and_then(Value::into_sequence) {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, type_name = e.type_name(), "query execution failed");
                return stream::once(async move { QueryResponse::error(&e) }).boxed();
            }
        };

        let stages = self.stages.clone();
        stream::iter(items)
            .map(move |item| match stages.convert_result(&item) {
                Ok(value) => QueryResponse::Value(value),
                Err(e) => {
                    warn!(error = %e, "failed to convert streamed element");
                    QueryResponse::error(&e)
                }
            })
            .boxed()
    }

    fn evaluate(&self, expr: &Expression) -> Result<Value> {
        debug!(%expr, "executing query");
        let prepared = self.stages.prepare_ir(expr.clone())?;

        let translated = self.stages.transform(&prepared)?;
        debug!(variables = translated.variables().count(), "rebuilt query");

        let native = self.stages.prepare_native(translated)?;
        debug!(%native, "prepared native query");

        let raw = self.stages.execute(&native)?;
        self.stages.process_result(raw)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::dynamic::DynamicObject;
    use crate::expr::builder::*;
    use crate::expr::method::QueryOperator;
    use crate::ir::{ConstantValue, MethodInfo, QueryableResourceDescriptor};
    use crate::testutil::TestModel;
    use crate::translate::{ForwardTranslator, MemoryResourceProvider};
    use crate::types::DataType;
    use crate::types::descriptor::TypeDescriptor;
    use crate::values::QueryableValue;

    fn executor(model: &TestModel) -> ExpressionExecutor {
        let provider = MemoryResourceProvider::new();
        provider.register(model.product_set());
        ExpressionExecutor::with_defaults(model.mapper(), Arc::new(provider), &QueryConfig::default())
    }

    fn translate(model: &TestModel, op: QueryOperator, args: Vec<crate::expr::Expr>) -> Expression {
        let mut all = vec![constant(
            Value::Queryable(QueryableValue::Remote(model.product_type())),
            DataType::queryable(model.product_type()),
        )];
        all.extend(args);
        let query = call_query(op, all).unwrap();
        ForwardTranslator::new(model.mapper(), &QueryConfig::default())
            .translate(&query)
            .unwrap()
    }

    fn names(value: &DynamicValue) -> Vec<String> {
        value
            .as_sequence()
            .unwrap()
            .iter()
            .map(|v| match v.as_object().unwrap().get("name") {
                Some(DynamicValue::Utf8(s)) => s.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[test]
    fn ordered_filter() {
        logutil::init_test();
        let model = TestModel::new();
        let pred = lambda1("x", model.product_type(), |x| gt(member(x, "price")?, lit(2.0))).unwrap();
        let filtered = translate(&model, QueryOperator::Where, vec![pred]);
        let result = executor(&model).try_execute(&filtered).unwrap();
        assert_eq!(vec!["Car", "Car"], names(&result));

        let objects: Vec<&DynamicObject> = result
            .as_sequence()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap())
            .collect();
        assert_eq!(
            Some(&DynamicValue::Int32(12)),
            objects[0].get("id"),
        );
        assert_eq!(
            Some(&TypeDescriptor::named("shop", "Product")),
            objects[0].type_info.as_ref(),
        );
    }

    #[test]
    fn single_errors_become_responses() {
        let model = TestModel::new();
        let pred = lambda1("x", model.product_type(), |x| eq(member(x, "name")?, lit("Car"))).unwrap();
        let query = translate(&model, QueryOperator::Single, vec![pred]);

        match executor(&model).execute(&query) {
            QueryResponse::Error(e) => {
                assert_eq!("InvalidOperation", e.type_name);
                assert_eq!("sequence contains more than one matching element", e.message);
            }
            other => panic!("unexpected {other:?}"),
        }

        let pred = lambda1("x", model.product_type(), |x| eq(member(x, "name")?, lit("Boat"))).unwrap();
        let query = translate(&model, QueryOperator::SingleOrDefault, vec![pred]);
        assert_eq!(
            QueryResponse::Value(DynamicValue::Null),
            executor(&model).execute(&query)
        );
    }

    #[test]
    fn unbound_parameters_rejected() {
        let model = TestModel::new();
        let product = TypeDescriptor::named("shop", "Product");
        let query = Expression::MethodCall {
            instance: None,
            method: MethodInfo {
                declaring_type: "Queryable".to_string(),
                name: "Count".to_string(),
                generic_arguments: Vec::new(),
            },
            arguments: vec![
                Expression::Constant {
                    value: ConstantValue::QueryableResource(QueryableResourceDescriptor {
                        element_type: product.clone(),
                    }),
                    type_info: product.clone(),
                },
                Expression::Parameter {
                    name: "y".to_string(),
                    type_info: product,
                },
            ],
        };
        let err = executor(&model).try_execute(&query).unwrap_err();
        assert!(err.to_string().contains("'y'"), "{err}");
    }

    #[test]
    fn unknown_methods_rejected() {
        let model = TestModel::new();
        let query = Expression::MethodCall {
            instance: None,
            method: MethodInfo {
                declaring_type: "Local".to_string(),
                name: "score".to_string(),
                generic_arguments: Vec::new(),
            },
            arguments: Vec::new(),
        };
        let err = executor(&model).try_execute(&query).unwrap_err();
        assert!(err.to_string().contains("Local.score"), "{err}");
    }

    #[test]
    fn streamed_elements() {
        let model = TestModel::new();
        let ir = translate(&model, QueryOperator::Skip, vec![lit(1)]);
        let responses: Vec<_> =
            futures::executor::block_on(executor(&model).execute_stream(&ir).collect());
        assert_eq!(2, responses.len());
        assert!(responses.iter().all(|r| matches!(r, QueryResponse::Value(_))));
    }

    /// Counts executions, then falls back to the defaults.
    #[derive(Debug)]
    struct CountingStages {
        defaults: DefaultExecutionStages,
        executions: AtomicUsize,
    }

    impl ExecutionStages for CountingStages {
        fn defaults(&self) -> &DefaultExecutionStages {
            &self.defaults
        }

        fn execute(&self, expr: &crate::expr::Expr) -> Result<Value> {
            self.executions.fetch_add(1, Ordering::Relaxed);
            self.defaults.execute(expr)
        }
    }

    #[test]
    fn overridden_stage() {
        let model = TestModel::new();
        let provider = MemoryResourceProvider::new();
        provider.register(model.product_set());
        let stages = Arc::new(CountingStages {
            defaults: DefaultExecutionStages::new(
                model.mapper(),
                Arc::new(provider),
                &QueryConfig::default(),
            ),
            executions: AtomicUsize::new(0),
        });
        let executor = ExpressionExecutor::new(stages.clone());

        let ir = translate(&model, QueryOperator::Count, Vec::new());
        assert_eq!(DynamicValue::Int32(3), executor.try_execute(&ir).unwrap());
        assert_eq!(1, stages.executions.load(Ordering::Relaxed));
    }
}
