use std::sync::Arc;

use hashbrown::HashMap;
use indexmap::IndexMap;
use linkq_error::{DbError, Result};
use tracing::debug;

use super::resource::ResourceProvider;
use crate::dynamic::DynamicValue;
use crate::dynamic::mapper::DynamicObjectMapper;
use crate::expr::builder;
use crate::expr::evaluator::Evaluator;
use crate::expr::method::MethodKind;
use crate::expr::{CapturedVariable, Expr, NewArrayKind, UnaryOperator};
use crate::ir::{ConstantValue, Expression};
use crate::types::DataType;
use crate::types::descriptor::TypeDescriptor;
use crate::types::resolver::TypeResolver;
use crate::values::{QueryableValue, Value};

/// A native tree rebuilt from IR.
#[derive(Debug, Clone)]
pub struct TranslatedQuery {
    pub expr: Expr,
    variables: IndexMap<String, Arc<CapturedVariable>>,
}

impl TranslatedQuery {
    /// Variables in the order they first appeared in the query.
    pub fn variables(&self) -> impl Iterator<Item = &Arc<CapturedVariable>> {
        self.variables.values()
    }

    pub fn variable(&self, name: &str) -> Option<&Arc<CapturedVariable>> {
        self.variables.get(name)
    }

    /// Replace the value of a variable. The next evaluation of `expr` sees the
    /// new value.
    pub fn rebind(&self, name: &str, value: Value) -> Result<()> {
        let var = self
            .variables
            .get(name)
            .ok_or_else(|| DbError::new(format!("No variable named '{name}' in query")))?;
        var.set(value)
    }
}

#[derive(Debug, Default)]
struct ReverseState {
    cells: HashMap<u32, Arc<CapturedVariable>>,
    snapshots: HashMap<u32, Value>,
    variables: IndexMap<String, Arc<CapturedVariable>>,
}

/// Rebuilds native expression trees from IR.
#[derive(Debug, Clone)]
pub struct ReverseTranslator {
    mapper: DynamicObjectMapper,
    resources: Option<Arc<dyn ResourceProvider>>,
}

impl ReverseTranslator {
    /// Types are resolved with the mapper's resolver. Without a resource
    /// provider, resource descriptors become remote queryables.
    pub fn new(mapper: DynamicObjectMapper) -> Self {
        ReverseTranslator {
            mapper,
            resources: None,
        }
    }

    pub fn with_resources(mut self, resources: Arc<dyn ResourceProvider>) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn resolver(&self) -> &Arc<dyn TypeResolver> {
        self.mapper.resolver()
    }

    pub fn translate(&self, expr: &Expression) -> Result<TranslatedQuery> {
        debug!(%expr, "rebuilding query");
        let mut state = ReverseState::default();
        let expr = self.visit(expr, &mut state)?;
        Ok(TranslatedQuery {
            expr,
            variables: state.variables,
        })
    }

    fn resolve(&self, desc: &TypeDescriptor) -> Result<DataType> {
        self.resolver().resolve(desc)
    }

    fn visit(&self, expr: &Expression, state: &mut ReverseState) -> Result<Expr> {
        match expr {
            Expression::Constant { value, type_info } => self.constant(value, type_info, state),
            Expression::Parameter { name, type_info } => {
                Ok(builder::param(name.clone(), self.resolve(type_info)?))
            }
            Expression::MemberAccess { expression, member } => {
                builder::member(self.visit(expression, state)?, member)
            }
            Expression::Unary {
                operator,
                operand,
                type_info,
            } => {
                let operand = self.visit(operand, state)?;
                match operator {
                    UnaryOperator::Not => builder::not(operand),
                    UnaryOperator::Negate => builder::neg(operand),
                    UnaryOperator::Convert => builder::convert(operand, self.resolve(type_info)?),
                }
            }
            Expression::Binary {
                operator,
                left,
                right,
            } => builder::binary(
                *operator,
                self.visit(left, state)?,
                self.visit(right, state)?,
            ),
            Expression::Conditional {
                test,
                if_true,
                if_false,
            } => builder::cond(
                self.visit(test, state)?,
                self.visit(if_true, state)?,
                self.visit(if_false, state)?,
            ),
            Expression::New {
                type_info,
                arguments,
            } => {
                let ty = self.resolve(type_info)?;
                let record = ty.try_as_record()?;
                builder::new_record(record, self.visit_all(arguments, state)?)
            }
            Expression::MemberInit { new, bindings } => {
                let type_info = match new.as_ref() {
                    Expression::New { type_info, .. } => type_info,
                    other => {
                        return Err(DbError::translation(format!(
                            "Member init requires a constructor, got '{other}'"
                        )));
                    }
                };
                let ty = self.resolve(type_info)?;
                let bindings = bindings
                    .iter()
                    .map(|b| Ok((b.member.clone(), self.visit(&b.expression, state)?)))
                    .collect::<Result<Vec<_>>>()?;
                builder::member_init(ty.try_as_record()?, bindings)
            }
            Expression::ListInit {
                element_type,
                initializers,
            } => builder::list_init(
                self.resolve(element_type)?,
                self.visit_all(initializers, state)?,
            ),
            Expression::NewArray {
                element_type,
                kind,
                expressions,
            } => {
                let element_type = self.resolve(element_type)?;
                let mut expressions = self.visit_all(expressions, state)?;
                match kind {
                    NewArrayKind::Init => builder::new_array(element_type, expressions),
                    NewArrayKind::Bounds => match (expressions.pop(), expressions.is_empty()) {
                        (Some(len), true) => builder::new_array_bounds(element_type, len),
                        _ => Err(DbError::translation(format!(
                            "Array bounds expect one length: '{expr}'"
                        ))),
                    },
                }
            }
            Expression::Collection {
                kind,
                element_type,
                items,
            } => {
                let element_type = self.resolve(element_type)?;
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    let item = self.visit(item, state)?;
                    values.push(Evaluator::new().evaluate(&item)?);
                }
                Ok(builder::collection(*kind, element_type, values))
            }
            Expression::MethodCall {
                instance,
                method,
                arguments,
            } => {
                let kind = MethodKind::from_names(&method.declaring_type, &method.name)
                    .ok_or_else(|| {
                        DbError::translation(format!("Unknown method '{}'", method.full_name()))
                    })?;
                let instance = match instance {
                    Some(i) => Some(self.visit(i, state)?),
                    None => None,
                };
                builder::call(kind, instance, self.visit_all(arguments, state)?)
            }
            Expression::Lambda { parameters, body } => {
                let parameters = parameters
                    .iter()
                    .map(|p| Ok((p.name.clone(), self.resolve(&p.type_info)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(builder::lambda(parameters, self.visit(body, state)?))
            }
        }
    }

    fn visit_all(&self, exprs: &[Expression], state: &mut ReverseState) -> Result<Vec<Expr>> {
        exprs.iter().map(|e| self.visit(e, state)).collect()
    }

    fn constant(
        &self,
        value: &ConstantValue,
        type_info: &TypeDescriptor,
        state: &mut ReverseState,
    ) -> Result<Expr> {
        if let Some(scalar) = value.to_scalar() {
            return Ok(builder::constant(scalar, self.resolve(type_info)?));
        }

        match value {
            ConstantValue::QueryableResource(resource) => {
                let element = self.resolve(&resource.element_type)?;
                let value = match &self.resources {
                    Some(provider) => QueryableValue::Local(
                        provider.resource(&resource.element_type, &element)?,
                    ),
                    None => QueryableValue::Remote(element.clone()),
                };
                Ok(builder::constant(
                    Value::Queryable(value),
                    DataType::queryable(element),
                ))
            }
            ConstantValue::Argument(arg) => {
                let datatype = self.resolve(type_info)?;
                let value = match state.snapshots.get(&arg.instance_id) {
                    Some(v) => v.clone(),
                    None => {
                        let v = self.mapper.map_in(&arg.value, Some(&datatype))?;
                        state.snapshots.insert(arg.instance_id, v.clone());
                        v
                    }
                };
                Ok(builder::constant(value, datatype))
            }
            ConstantValue::Variable(var) => {
                let cell = self.cell(state, var.instance_id, &var.name, || {
                    let datatype = self.resolve(&var.type_info)?;
                    let value = self.mapper.map_in(&var.value, Some(&datatype))?;
                    Ok((datatype, value))
                })?;
                Ok(Expr::Captured(cell))
            }
            ConstantValue::VariableList(var) => {
                let cell = self.cell(state, var.instance_id, &var.name, || {
                    let element = self.resolve(&var.element_type)?;
                    let value = self.mapper.map_in_collection(
                        &DynamicValue::Sequence {
                            kind: var.kind,
                            items: var.values.clone(),
                        },
                        Some(&element),
                    )?;
                    let datatype = DataType::Collection {
                        kind: var.kind,
                        element: Box::new(element),
                    };
                    Ok((datatype, value))
                })?;
                Ok(Expr::Captured(cell))
            }
            other => Err(DbError::translation(format!(
                "Unexpected constant '{other}'"
            ))),
        }
    }

    /// Get or create the cell for a variable instance.
    fn cell<F>(
        &self,
        state: &mut ReverseState,
        instance_id: u32,
        name: &str,
        init: F,
    ) -> Result<Arc<CapturedVariable>>
    where
        F: FnOnce() -> Result<(DataType, Value)>,
    {
        if let Some(cell) = state.cells.get(&instance_id) {
            return Ok(cell.clone());
        }
        let (datatype, value) = init()?;
        let cell = CapturedVariable::new(name, datatype, value);
        state.cells.insert(instance_id, cell.clone());
        if state.variables.contains_key(name) {
            return Err(DbError::translation(format!(
                "Variable '{name}' is bound to more than one instance"
            )));
        }
        state.variables.insert(name.to_string(), cell.clone());
        Ok(cell)
    }
}
