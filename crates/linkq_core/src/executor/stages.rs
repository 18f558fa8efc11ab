use std::fmt::Debug;
use std::sync::Arc;

use linkq_error::{DbError, Result};

use crate::config::QueryConfig;
use crate::dynamic::DynamicValue;
use crate::dynamic::mapper::DynamicObjectMapper;
use crate::expr::Expr;
use crate::expr::evaluator::Evaluator;
use crate::expr::local_eval::{DefaultLocalEvaluation, PartialEvaluator};
use crate::expr::method::MethodKind;
use crate::ir::{ConstantValue, Expression};
use crate::translate::{ResourceProvider, ReverseTranslator, TranslatedQuery};
use crate::values::Value;

/// Stages run by the expression executor, in order.
///
/// Every stage has a default delegating to `DefaultExecutionStages`.
/// Integrations override the stages they need, e.g. `execute` to hand the
/// rebuilt tree to an external store.
pub trait ExecutionStages: Debug + Send + Sync {
    fn defaults(&self) -> &DefaultExecutionStages;

    /// Validate the incoming IR before anything is rebuilt.
    fn prepare_ir(&self, expr: Expression) -> Result<Expression> {
        self.defaults().prepare_ir(expr)
    }

    /// Rebuild an executable tree from IR.
    fn transform(&self, expr: &Expression) -> Result<TranslatedQuery> {
        self.defaults().transform(expr)
    }

    fn prepare_native(&self, query: TranslatedQuery) -> Result<Expr> {
        self.defaults().prepare_native(query)
    }

    fn execute(&self, expr: &Expr) -> Result<Value> {
        self.defaults().execute(expr)
    }

    /// Post process the raw result. Queryables are materialized here.
    fn process_result(&self, value: Value) -> Result<Value> {
        self.defaults().process_result(value)
    }

    fn convert_result(&self, value: &Value) -> Result<DynamicValue> {
        self.defaults().convert_result(value)
    }
}

#[derive(Debug, Clone)]
pub struct DefaultExecutionStages {
    mapper: DynamicObjectMapper,
    output_mapper: DynamicObjectMapper,
    resources: Arc<dyn ResourceProvider>,
    evaluate_all: bool,
}

impl DefaultExecutionStages {
    pub fn new(
        mapper: DynamicObjectMapper,
        resources: Arc<dyn ResourceProvider>,
        config: &QueryConfig,
    ) -> Self {
        let output_mapper = mapper
            .clone()
            .with_type_info(config.include_result_type_info)
            .with_property_descriptors(config.include_property_descriptors);
        DefaultExecutionStages {
            mapper,
            output_mapper,
            resources,
            evaluate_all: config.evaluate_all_local_subtrees,
        }
    }

    pub fn resources(&self) -> &Arc<dyn ResourceProvider> {
        &self.resources
    }

    /// Checks that every parameter is bound by an enclosing lambda, that only
    /// transportable methods are called, and that every resource resolves.
    pub fn prepare_ir(&self, expr: Expression) -> Result<Expression> {
        self.validate(&expr, &mut Vec::new())?;
        Ok(expr)
    }

    fn validate<'a>(&self, expr: &'a Expression, scope: &mut Vec<&'a str>) -> Result<()> {
        match expr {
            Expression::Parameter { name, .. } => {
                if !scope.contains(&name.as_str()) {
                    return Err(DbError::translation(format!(
                        "Parameter '{name}' is not bound by an enclosing lambda"
                    )));
                }
                Ok(())
            }
            Expression::Lambda { parameters, body } => {
                let depth = scope.len();
                scope.extend(parameters.iter().map(|p| p.name.as_str()));
                let result = self.validate(body, scope);
                scope.truncate(depth);
                result
            }
            Expression::MethodCall { method, .. } => {
                if MethodKind::from_names(&method.declaring_type, &method.name).is_none() {
                    return Err(DbError::translation(format!(
                        "Method '{}' cannot be executed here",
                        method.full_name()
                    )));
                }
                self.validate_children(expr, scope)
            }
            Expression::Constant {
                value: ConstantValue::QueryableResource(resource),
                ..
            } => {
                let element = self.mapper.resolver().resolve(&resource.element_type)?;
                self.resources.resource(&resource.element_type, &element)?;
                Ok(())
            }
            _ => self.validate_children(expr, scope),
        }
    }

    fn validate_children<'a>(&self, expr: &'a Expression, scope: &mut Vec<&'a str>) -> Result<()> {
        for child in expr.children() {
            self.validate(child, scope)?;
        }
        Ok(())
    }

    pub fn transform(&self, expr: &Expression) -> Result<TranslatedQuery> {
        ReverseTranslator::new(self.mapper.clone())
            .with_resources(self.resources.clone())
            .translate(expr)
    }

    pub fn prepare_native(&self, query: TranslatedQuery) -> Result<Expr> {
        PartialEvaluator::new(&DefaultLocalEvaluation, self.evaluate_all).evaluate(&query.expr)
    }

    pub fn execute(&self, expr: &Expr) -> Result<Value> {
        Evaluator::new().evaluate(expr)
    }

    pub fn process_result(&self, value: Value) -> Result<Value> {
        match value {
            Value::Queryable(_) => Ok(Value::list(value.into_sequence()?)),
            other => Ok(other),
        }
    }

    pub fn convert_result(&self, value: &Value) -> Result<DynamicValue> {
        self.output_mapper.map_out(value)
    }
}

impl ExecutionStages for DefaultExecutionStages {
    fn defaults(&self) -> &DefaultExecutionStages {
        self
    }
}
