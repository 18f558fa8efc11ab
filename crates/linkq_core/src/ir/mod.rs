//! Serializable, transport neutral query trees.
//!
//! An `Expression` is what crosses the query boundary. It only references
//! types through `TypeDescriptor`s and values through `DynamicValue`s, so it
//! can be carried by any serde format.
mod display;

use chrono::{DateTime, Utc};
use hashbrown::HashSet;
use linkq_error::{DbError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dynamic::DynamicValue;
use crate::types::CollectionKind;
use crate::types::descriptor::TypeDescriptor;
use crate::values::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node")]
pub enum Expression {
    Constant {
        value: ConstantValue,
        type_info: TypeDescriptor,
    },
    Parameter {
        name: String,
        type_info: TypeDescriptor,
    },
    MemberAccess {
        expression: Box<Expression>,
        member: String,
    },
    Unary {
        operator: UnaryOperator,
        operand: Box<Expression>,
        type_info: TypeDescriptor,
    },
    Binary {
        operator: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Conditional {
        test: Box<Expression>,
        if_true: Box<Expression>,
        if_false: Box<Expression>,
    },
    /// Construct a record. Arguments are positional and only allowed for
    /// anonymous types.
    New {
        type_info: TypeDescriptor,
        arguments: Vec<Expression>,
    },
    MemberInit {
        new: Box<Expression>,
        bindings: Vec<MemberBinding>,
    },
    ListInit {
        element_type: TypeDescriptor,
        initializers: Vec<Expression>,
    },
    NewArray {
        element_type: TypeDescriptor,
        kind: NewArrayKind,
        expressions: Vec<Expression>,
    },
    /// Inlined constant collection.
    Collection {
        kind: CollectionKind,
        element_type: TypeDescriptor,
        items: Vec<Expression>,
    },
    MethodCall {
        instance: Option<Box<Expression>>,
        method: MethodInfo,
        arguments: Vec<Expression>,
    },
    Lambda {
        parameters: Vec<ParameterDecl>,
        body: Box<Expression>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOperator {
    Not,
    Negate,
    /// Convert the operand to the type of the node.
    Convert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    AndAlso,
    OrElse,
    Coalesce,
    ArrayIndex,
}

impl BinaryOperator {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Equal
                | Self::NotEqual
                | Self::LessThan
                | Self::LessThanOrEqual
                | Self::GreaterThan
                | Self::GreaterThanOrEqual
        )
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide | Self::Modulo
        )
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::AndAlso => "&&",
            Self::OrElse => "||",
            Self::Coalesce => "??",
            Self::ArrayIndex => "[]",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NewArrayKind {
    /// Array initialized with the given elements.
    Init,
    /// Array of default values with the length given by the single
    /// expression.
    Bounds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberBinding {
    pub member: String,
    pub expression: Expression,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterDecl {
    pub name: String,
    pub type_info: TypeDescriptor,
}

/// Reference to a well known method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodInfo {
    /// "Queryable", "Enumerable", "String" or "Math".
    pub declaring_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generic_arguments: Vec<TypeDescriptor>,
}

impl MethodInfo {
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.declaring_type, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstantValue {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
    /// Root data set of a query.
    QueryableResource(QueryableResourceDescriptor),
    /// Value snapshotted at translation time.
    Argument(ConstantQueryArgument),
    /// Value kept addressable by name.
    Variable(VariableQueryArgument),
    VariableList(VariableQueryArgumentList),
}

impl ConstantValue {
    /// Create a constant from a scalar value. Returns None for values that
    /// aren't scalars.
    pub fn from_scalar(value: &Value) -> Option<Self> {
        Some(match value {
            Value::Null => Self::Null,
            Value::Boolean(v) => Self::Boolean(*v),
            Value::Int32(v) => Self::Int32(*v),
            Value::Int64(v) => Self::Int64(*v),
            Value::Float64(v) => Self::Float64(*v),
            Value::Utf8(v) => Self::Utf8(v.clone()),
            Value::Timestamp(v) => Self::Timestamp(*v),
            Value::Uuid(v) => Self::Uuid(*v),
            _ => return None,
        })
    }

    /// Scalar value for this constant. Returns None for non-scalar constants.
    pub fn to_scalar(&self) -> Option<Value> {
        Some(match self {
            Self::Null => Value::Null,
            Self::Boolean(v) => Value::Boolean(*v),
            Self::Int32(v) => Value::Int32(*v),
            Self::Int64(v) => Value::Int64(*v),
            Self::Float64(v) => Value::Float64(*v),
            Self::Utf8(v) => Value::Utf8(v.clone()),
            Self::Timestamp(v) => Value::Timestamp(*v),
            Self::Uuid(v) => Value::Uuid(*v),
            _ => return None,
        })
    }
}

/// Placeholder for the root data set of the given element type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryableResourceDescriptor {
    pub element_type: TypeDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantQueryArgument {
    /// Ids are shared between arguments referring to the same instance.
    pub instance_id: u32,
    pub value: DynamicValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableQueryArgument {
    pub name: String,
    pub instance_id: u32,
    pub type_info: TypeDescriptor,
    pub value: DynamicValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableQueryArgumentList {
    pub name: String,
    pub instance_id: u32,
    pub kind: CollectionKind,
    pub element_type: TypeDescriptor,
    pub values: Vec<DynamicValue>,
}

/// Borrowed view of a variable argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VariableArgument<'a> {
    Single(&'a VariableQueryArgument),
    List(&'a VariableQueryArgumentList),
}

impl VariableArgument<'_> {
    pub fn name(&self) -> &str {
        match self {
            Self::Single(v) => &v.name,
            Self::List(v) => &v.name,
        }
    }

    pub fn instance_id(&self) -> u32 {
        match self {
            Self::Single(v) => v.instance_id,
            Self::List(v) => v.instance_id,
        }
    }
}

impl Expression {
    /// Direct children of this node in evaluation order.
    pub fn children(&self) -> Vec<&Expression> {
        match self {
            Self::Constant { .. } | Self::Parameter { .. } => Vec::new(),
            Self::MemberAccess { expression, .. } => vec![expression.as_ref()],
            Self::Unary { operand, .. } => vec![operand.as_ref()],
            Self::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Self::Conditional {
                test,
                if_true,
                if_false,
            } => vec![test.as_ref(), if_true.as_ref(), if_false.as_ref()],
            Self::New { arguments, .. } => arguments.iter().collect(),
            Self::MemberInit { new, bindings } => std::iter::once(new.as_ref())
                .chain(bindings.iter().map(|b| &b.expression))
                .collect(),
            Self::ListInit { initializers, .. } => initializers.iter().collect(),
            Self::NewArray { expressions, .. } => expressions.iter().collect(),
            Self::Collection { items, .. } => items.iter().collect(),
            Self::MethodCall {
                instance,
                arguments,
                ..
            } => instance
                .iter()
                .map(|i| i.as_ref())
                .chain(arguments.iter())
                .collect(),
            Self::Lambda { body, .. } => vec![body.as_ref()],
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Expression> {
        match self {
            Self::Constant { .. } | Self::Parameter { .. } => Vec::new(),
            Self::MemberAccess { expression, .. } => vec![expression.as_mut()],
            Self::Unary { operand, .. } => vec![operand.as_mut()],
            Self::Binary { left, right, .. } => vec![left.as_mut(), right.as_mut()],
            Self::Conditional {
                test,
                if_true,
                if_false,
            } => vec![test.as_mut(), if_true.as_mut(), if_false.as_mut()],
            Self::New { arguments, .. } => arguments.iter_mut().collect(),
            Self::MemberInit { new, bindings } => std::iter::once(new.as_mut())
                .chain(bindings.iter_mut().map(|b| &mut b.expression))
                .collect(),
            Self::ListInit { initializers, .. } => initializers.iter_mut().collect(),
            Self::NewArray { expressions, .. } => expressions.iter_mut().collect(),
            Self::Collection { items, .. } => items.iter_mut().collect(),
            Self::MethodCall {
                instance,
                arguments,
                ..
            } => instance
                .iter_mut()
                .map(|i| i.as_mut())
                .chain(arguments.iter_mut())
                .collect(),
            Self::Lambda { body, .. } => vec![body.as_mut()],
        }
    }

    pub fn for_each_child<'a>(&'a self, mut f: impl FnMut(&'a Expression)) {
        for child in self.children() {
            f(child)
        }
    }

    /// Visit this node and all of its descendants, parents first.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expression)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    fn walk_mut(&mut self, f: &mut impl FnMut(&mut Expression)) {
        f(self);
        for child in self.children_mut() {
            child.walk_mut(f);
        }
    }

    /// All variable arguments in this tree, one per instance.
    pub fn variable_arguments(&self) -> Vec<VariableArgument<'_>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.walk(&mut |expr| {
            let var = match expr {
                Self::Constant {
                    value: ConstantValue::Variable(v),
                    ..
                } => VariableArgument::Single(v),
                Self::Constant {
                    value: ConstantValue::VariableList(v),
                    ..
                } => VariableArgument::List(v),
                _ => return,
            };
            if seen.insert(var.instance_id()) {
                out.push(var);
            }
        });
        out
    }

    /// Replace the value of every variable argument with the given name.
    ///
    /// Variable lists expect a sequence. Returns the number of replaced
    /// arguments, errors if there's no variable with that name.
    pub fn set_variable(&mut self, name: &str, value: DynamicValue) -> Result<usize> {
        let mut count = 0;
        let mut error = None;
        self.walk_mut(&mut |expr| {
            if let Self::Constant { value: constant, .. } = expr {
                match constant {
                    ConstantValue::Variable(v) if v.name == name => {
                        v.value = value.clone();
                        count += 1;
                    }
                    ConstantValue::VariableList(v) if v.name == name => match &value {
                        DynamicValue::Sequence { items, .. } => {
                            v.values = items.clone();
                            count += 1;
                        }
                        other => {
                            error = Some(DbError::new(format!(
                                "Variable list '{name}' requires a sequence, got {}",
                                other.variant_name()
                            )));
                        }
                    },
                    _ => (),
                }
            }
        });

        if let Some(error) = error {
            return Err(error);
        }
        if count == 0 {
            return Err(DbError::new(format!("No variable named '{name}' in query")));
        }
        Ok(count)
    }

    /// Number of nodes in this tree.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_| count += 1);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variable_query() -> Expression {
        let product = TypeDescriptor::named("shop", "Product");
        let ids = Expression::Constant {
            value: ConstantValue::VariableList(VariableQueryArgumentList {
                name: "ids".into(),
                instance_id: 0,
                kind: CollectionKind::List,
                element_type: TypeDescriptor::named("", "i32"),
                values: vec![DynamicValue::Int32(1)],
            }),
            type_info: TypeDescriptor::named("linkq", "List"),
        };
        let p = Expression::Parameter {
            name: "x".into(),
            type_info: product.clone(),
        };
        Expression::MethodCall {
            instance: None,
            method: MethodInfo {
                declaring_type: "Queryable".into(),
                name: "Where".into(),
                generic_arguments: vec![product.clone()],
            },
            arguments: vec![
                Expression::Constant {
                    value: ConstantValue::QueryableResource(QueryableResourceDescriptor {
                        element_type: product.clone(),
                    }),
                    type_info: product.clone(),
                },
                Expression::Lambda {
                    parameters: vec![ParameterDecl {
                        name: "x".into(),
                        type_info: product,
                    }],
                    body: Box::new(Expression::MethodCall {
                        instance: None,
                        method: MethodInfo {
                            declaring_type: "Enumerable".into(),
                            name: "Contains".into(),
                            generic_arguments: Vec::new(),
                        },
                        arguments: vec![
                            ids.clone(),
                            Expression::MemberAccess {
                                expression: Box::new(p),
                                member: "id".into(),
                            },
                        ],
                    }),
                },
            ],
        }
    }

    #[test]
    fn variables_found_once() {
        let query = variable_query();
        let vars = query.variable_arguments();
        assert_eq!(1, vars.len());
        assert_eq!("ids", vars[0].name());
    }

    #[test]
    fn set_variable_by_name() {
        let mut query = variable_query();
        let n = query
            .set_variable(
                "ids",
                DynamicValue::list([DynamicValue::Int32(4), DynamicValue::Int32(5)]),
            )
            .unwrap();
        assert_eq!(1, n);
        match query.variable_arguments()[0] {
            VariableArgument::List(v) => assert_eq!(2, v.values.len()),
            other => panic!("unexpected {other:?}"),
        }

        query.set_variable("missing", DynamicValue::Null).unwrap_err();
        query.set_variable("ids", DynamicValue::Int32(1)).unwrap_err();
    }

    #[test]
    fn json_round_trip() {
        let query = variable_query();
        let json = serde_json::to_string(&query).unwrap();
        let back: Expression = serde_json::from_str(&json).unwrap();
        assert_eq!(query, back);
        assert_eq!(7, back.node_count());
    }
}
