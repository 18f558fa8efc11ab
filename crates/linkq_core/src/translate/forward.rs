use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use linkq_error::{DbError, Result};
use tracing::debug;

use super::policy::{ArgumentTreatment, DefaultArgumentPolicy, QueryArgumentPolicy};
use crate::config::QueryConfig;
use crate::dynamic::DynamicValue;
use crate::dynamic::mapper::DynamicObjectMapper;
use crate::expr::local_eval::{DefaultLocalEvaluation, LocalEvaluation, PartialEvaluator};
use crate::expr::method::MethodKind;
use crate::expr::{CapturedVariable, Expr};
use crate::ir::{
    ConstantQueryArgument,
    ConstantValue,
    Expression,
    MemberBinding,
    MethodInfo,
    ParameterDecl,
    QueryableResourceDescriptor,
    VariableQueryArgument,
    VariableQueryArgumentList,
};
use crate::types::DataType;
use crate::types::descriptor::{DescriptorCache, TypeDescriptor};
use crate::values::{QueryableValue, Value};

/// Identity of a value that may appear more than once in a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum InstanceKey {
    Cell(usize),
    Object(usize),
}

#[derive(Debug)]
struct ForwardState {
    descriptors: DescriptorCache,
    instance_ids: HashMap<InstanceKey, u32>,
    /// Variable names handed out so far, and the instance owning each.
    variable_names: HashMap<String, u32>,
    next_id: u32,
}

impl ForwardState {
    fn descriptor(&mut self, datatype: &DataType) -> TypeDescriptor {
        self.descriptors.get(datatype)
    }

    fn instance_id(&mut self, key: Option<InstanceKey>) -> u32 {
        if let Some(key) = key {
            if let Some(id) = self.instance_ids.get(&key) {
                return *id;
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        if let Some(key) = key {
            self.instance_ids.insert(key, id);
        }
        id
    }

    /// Name for a variable argument. Distinct instances sharing a name get a
    /// numeric suffix so every name addresses exactly one instance.
    fn variable_name(&mut self, base: &str, instance_id: u32) -> String {
        let mut name = base.to_string();
        let mut suffix = 0;
        loop {
            match self.variable_names.get(&name) {
                Some(owner) if *owner == instance_id => return name,
                Some(_) => {
                    suffix += 1;
                    name = format!("{base}_{suffix}");
                }
                None => {
                    self.variable_names.insert(name.clone(), instance_id);
                    return name;
                }
            }
        }
    }
}

/// Translates native expression trees into IR.
#[derive(Clone)]
pub struct ForwardTranslator {
    mapper: DynamicObjectMapper,
    policy: Arc<dyn QueryArgumentPolicy>,
    local: Arc<dyn LocalEvaluation>,
    evaluate_all: bool,
    include_property_descriptors: bool,
}

impl fmt::Debug for ForwardTranslator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardTranslator")
            .field("policy", &self.policy)
            .field("evaluate_all", &self.evaluate_all)
            .field("include_property_descriptors", &self.include_property_descriptors)
            .finish_non_exhaustive()
    }
}

impl ForwardTranslator {
    pub fn new(mapper: DynamicObjectMapper, config: &QueryConfig) -> Self {
        ForwardTranslator {
            mapper,
            policy: Arc::new(DefaultArgumentPolicy::from_config(config)),
            local: Arc::new(DefaultLocalEvaluation),
            evaluate_all: config.evaluate_all_local_subtrees,
            include_property_descriptors: config.include_property_descriptors,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn QueryArgumentPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_local_evaluation(mut self, local: Arc<dyn LocalEvaluation>) -> Self {
        self.local = local;
        self
    }

    pub fn translate(&self, expr: &Expr) -> Result<Expression> {
        debug!(%expr, "translating query");

        let expr = PartialEvaluator::new(self.local.as_ref(), self.evaluate_all).evaluate(expr)?;
        let mut state = ForwardState {
            descriptors: DescriptorCache::new(self.include_property_descriptors),
            instance_ids: HashMap::new(),
            variable_names: HashMap::new(),
            next_id: 0,
        };
        let translated = self.visit(&expr, &mut state)?;

        debug!(%translated, types = state.descriptors.len(), "translated query");
        Ok(translated)
    }

    fn visit(&self, expr: &Expr, state: &mut ForwardState) -> Result<Expression> {
        let boxed = |e: &Expr, state: &mut ForwardState| -> Result<Box<Expression>> {
            Ok(Box::new(self.visit(e, state)?))
        };

        Ok(match expr {
            Expr::Constant { value, datatype } => self.constant(expr, value, datatype, None, state)?,
            Expr::Captured(var) => {
                self.constant(expr, &var.get(), var.datatype(), Some(var), state)?
            }
            Expr::Parameter { name, datatype } => Expression::Parameter {
                name: name.clone(),
                type_info: state.descriptor(datatype),
            },
            Expr::Member { expr, member, .. } => Expression::MemberAccess {
                expression: boxed(expr, state)?,
                member: member.clone(),
            },
            Expr::Unary {
                op,
                operand,
                datatype,
            } => Expression::Unary {
                operator: *op,
                operand: boxed(operand, state)?,
                type_info: state.descriptor(datatype),
            },
            Expr::Binary {
                op, left, right, ..
            } => Expression::Binary {
                operator: *op,
                left: boxed(left, state)?,
                right: boxed(right, state)?,
            },
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => Expression::Conditional {
                test: boxed(test, state)?,
                if_true: boxed(if_true, state)?,
                if_false: boxed(if_false, state)?,
            },
            Expr::New { record, arguments } => Expression::New {
                type_info: state.descriptor(&DataType::Record(record.clone())),
                arguments: self.visit_all(arguments, state)?,
            },
            Expr::MemberInit { new, bindings } => Expression::MemberInit {
                new: boxed(new, state)?,
                bindings: bindings
                    .iter()
                    .map(|(member, e)| {
                        Ok(MemberBinding {
                            member: member.clone(),
                            expression: self.visit(e, state)?,
                        })
                    })
                    .collect::<Result<_>>()?,
            },
            Expr::ListInit {
                element_type,
                initializers,
            } => Expression::ListInit {
                element_type: state.descriptor(element_type),
                initializers: self.visit_all(initializers, state)?,
            },
            Expr::NewArray {
                element_type,
                kind,
                expressions,
            } => Expression::NewArray {
                element_type: state.descriptor(element_type),
                kind: *kind,
                expressions: self.visit_all(expressions, state)?,
            },
            Expr::Call {
                instance,
                method,
                arguments,
                ..
            } => {
                if let MethodKind::Local(func) = &method.kind {
                    return Err(DbError::translation(format!(
                        "Local function '{}' cannot be translated: '{expr}'",
                        func.name
                    )));
                }
                // Terminal operators drop their generic arguments, the
                // receiving side infers them from the source.
                let generic_arguments = match method.kind.query_operator() {
                    Some(op) if op.is_terminal() => Vec::new(),
                    _ => method
                        .generic_arguments
                        .iter()
                        .map(|t| state.descriptor(t))
                        .collect(),
                };
                Expression::MethodCall {
                    instance: match instance {
                        Some(i) => Some(boxed(i, state)?),
                        None => None,
                    },
                    method: MethodInfo {
                        declaring_type: method.kind.declaring_type().to_string(),
                        name: method.kind.name().to_string(),
                        generic_arguments,
                    },
                    arguments: self.visit_all(arguments, state)?,
                }
            }
            Expr::Lambda { parameters, body } => Expression::Lambda {
                parameters: parameters
                    .iter()
                    .map(|(name, ty)| ParameterDecl {
                        name: name.clone(),
                        type_info: state.descriptor(ty),
                    })
                    .collect(),
                body: boxed(body, state)?,
            },
        })
    }

    fn visit_all(&self, exprs: &[Expr], state: &mut ForwardState) -> Result<Vec<Expression>> {
        exprs.iter().map(|e| self.visit(e, state)).collect()
    }

    fn constant(
        &self,
        node: &Expr,
        value: &Value,
        datatype: &DataType,
        captured: Option<&Arc<CapturedVariable>>,
        state: &mut ForwardState,
    ) -> Result<Expression> {
        match value {
            Value::Queryable(QueryableValue::Remote(element)) => {
                return Ok(Expression::Constant {
                    value: ConstantValue::QueryableResource(QueryableResourceDescriptor {
                        element_type: state.descriptor(element),
                    }),
                    type_info: state.descriptor(datatype),
                });
            }
            Value::Queryable(QueryableValue::Local(_)) => {
                return Err(DbError::translation(format!(
                    "Local data set cannot be translated: '{node}'"
                )));
            }
            v if !v.is_transportable() => {
                return Err(DbError::translation(format!(
                    "Value of type '{}' cannot leave this process: '{node}'",
                    v.datatype()
                )));
            }
            _ => (),
        }

        let key = match (captured, value) {
            (Some(var), _) => Some(InstanceKey::Cell(Arc::as_ptr(var) as usize)),
            (None, Value::Object(obj)) => Some(InstanceKey::Object(obj.addr())),
            _ => None,
        };

        let type_info = state.descriptor(datatype);
        let constant = match self.policy.treatment(value, datatype, captured.is_some()) {
            ArgumentTreatment::Inline => match (ConstantValue::from_scalar(value), value) {
                (Some(scalar), _) => scalar,
                (None, Value::Collection(c)) => {
                    let element = match datatype.element_type() {
                        Some(DataType::Any) | None => value
                            .datatype()
                            .element_type()
                            .cloned()
                            .unwrap_or(DataType::Any),
                        Some(element) => element.clone(),
                    };
                    let items = c
                        .items
                        .iter()
                        .map(|item| self.constant(node, item, &element, None, state))
                        .collect::<Result<Vec<_>>>()?;
                    return Ok(Expression::Collection {
                        kind: c.kind,
                        element_type: state.descriptor(&element),
                        items,
                    });
                }
                (None, _) => ConstantValue::Argument(ConstantQueryArgument {
                    instance_id: state.instance_id(key),
                    value: self.mapper.map_out(value)?,
                }),
            },
            ArgumentTreatment::Snapshot => ConstantValue::Argument(ConstantQueryArgument {
                instance_id: state.instance_id(key),
                value: self.mapper.map_out(value)?,
            }),
            ArgumentTreatment::Variable => {
                let instance_id = state.instance_id(key);
                let name = match captured {
                    Some(var) => state.variable_name(var.name(), instance_id),
                    None => state.variable_name(&format!("arg{instance_id}"), instance_id),
                };
                match value {
                    Value::Collection(c) => {
                        let element = datatype.element_type().cloned().unwrap_or(DataType::Any);
                        let values = match self.mapper.map_out(value)? {
                            DynamicValue::Sequence { items, .. } => items,
                            other => vec![other],
                        };
                        ConstantValue::VariableList(VariableQueryArgumentList {
                            name,
                            instance_id,
                            kind: c.kind,
                            element_type: state.descriptor(&element),
                            values,
                        })
                    }
                    _ => ConstantValue::Variable(VariableQueryArgument {
                        name,
                        instance_id,
                        type_info: type_info.clone(),
                        value: self.mapper.map_out(value)?,
                    }),
                }
            }
        };

        Ok(Expression::Constant {
            value: constant,
            type_info,
        })
    }
}
