//! Native query trees.
//!
//! These are the trees a caller composes and the trees the executor runs.
//! Unlike the IR they reference live types and values.
pub mod builder;
pub mod evaluator;
pub mod local_eval;
pub mod method;

mod operators;

use std::fmt;
use std::sync::Arc;

use linkq_error::{DbError, Result};
use parking_lot::RwLock;

pub use crate::ir::{BinaryOperator, NewArrayKind, UnaryOperator};
use self::method::{Method, MethodKind};
use crate::types::DataType;
use crate::types::record::RecordType;
use crate::values::Value;

/// A variable captured by a query.
///
/// The value may change after the query has been built, every translation
/// and evaluation reads the current value.
pub struct CapturedVariable {
    name: String,
    datatype: DataType,
    value: RwLock<Value>,
}

impl CapturedVariable {
    pub fn new(name: impl Into<String>, datatype: DataType, value: Value) -> Arc<Self> {
        Arc::new(CapturedVariable {
            name: name.into(),
            datatype,
            value: RwLock::new(value),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn datatype(&self) -> &DataType {
        &self.datatype
    }

    pub fn get(&self) -> Value {
        self.value.read().clone()
    }

    /// Replace the value, checking it's assignable to the variable's type.
    pub fn set(&self, value: Value) -> Result<()> {
        let assignable = if value.is_null() {
            self.datatype.accepts_null()
        } else {
            self.datatype.is_assignable_from(&value.datatype())
        };
        if !assignable {
            return Err(DbError::invalid_operation(format!(
                "Value of type '{}' cannot be assigned to variable '{}' of type '{}'",
                value.datatype(),
                self.name,
                self.datatype
            )));
        }
        *self.value.write() = value;
        Ok(())
    }
}

impl fmt::Debug for CapturedVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedVariable")
            .field("name", &self.name)
            .field("datatype", &self.datatype)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Constant {
        value: Value,
        datatype: DataType,
    },
    Captured(Arc<CapturedVariable>),
    Parameter {
        name: String,
        datatype: DataType,
    },
    Member {
        expr: Box<Expr>,
        member: String,
        datatype: DataType,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<Expr>,
        datatype: DataType,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
        datatype: DataType,
    },
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
        datatype: DataType,
    },
    New {
        record: Arc<RecordType>,
        arguments: Vec<Expr>,
    },
    MemberInit {
        new: Box<Expr>,
        bindings: Vec<(String, Expr)>,
    },
    ListInit {
        element_type: DataType,
        initializers: Vec<Expr>,
    },
    NewArray {
        element_type: DataType,
        kind: NewArrayKind,
        expressions: Vec<Expr>,
    },
    Call {
        instance: Option<Box<Expr>>,
        method: Method,
        arguments: Vec<Expr>,
        datatype: DataType,
    },
    Lambda {
        parameters: Vec<(String, DataType)>,
        body: Box<Expr>,
    },
}

impl Expr {
    pub fn datatype(&self) -> DataType {
        match self {
            Self::Constant { datatype, .. }
            | Self::Parameter { datatype, .. }
            | Self::Member { datatype, .. }
            | Self::Unary { datatype, .. }
            | Self::Binary { datatype, .. }
            | Self::Conditional { datatype, .. }
            | Self::Call { datatype, .. } => datatype.clone(),
            Self::Captured(var) => var.datatype().clone(),
            Self::New { record, .. } => DataType::Record(record.clone()),
            Self::MemberInit { new, .. } => new.datatype(),
            Self::ListInit { element_type, .. } => DataType::list(element_type.clone()),
            Self::NewArray { element_type, .. } => DataType::array(element_type.clone()),
            Self::Lambda { parameters, body } => DataType::Function {
                params: parameters.iter().map(|(_, ty)| ty.clone()).collect(),
                ret: Box::new(body.datatype()),
            },
        }
    }

    /// Direct children in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Self::Constant { .. } | Self::Captured(_) | Self::Parameter { .. } => Vec::new(),
            Self::Member { expr, .. } => vec![expr.as_ref()],
            Self::Unary { operand, .. } => vec![operand.as_ref()],
            Self::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Self::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => vec![test.as_ref(), if_true.as_ref(), if_false.as_ref()],
            Self::New { arguments, .. } => arguments.iter().collect(),
            Self::MemberInit { new, bindings } => std::iter::once(new.as_ref())
                .chain(bindings.iter().map(|(_, e)| e))
                .collect(),
            Self::ListInit { initializers, .. } => initializers.iter().collect(),
            Self::NewArray { expressions, .. } => expressions.iter().collect(),
            Self::Call {
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

    /// Rebuild this node with every child replaced by the output of `f`.
    ///
    /// Children are visited in the same order as `children`. Node types are
    /// kept as is, replacements are expected to have the same type as the
    /// child they replace.
    pub fn try_map_children<F>(&self, f: &mut F) -> Result<Expr>
    where
        F: FnMut(&Expr) -> Result<Expr>,
    {
        let boxed = |e: &Expr, f: &mut F| -> Result<Box<Expr>> { Ok(Box::new(f(e)?)) };

        Ok(match self {
            Self::Constant { .. } | Self::Captured(_) | Self::Parameter { .. } => self.clone(),
            Self::Member {
                expr,
                member,
                datatype,
            } => Self::Member {
                expr: boxed(expr, f)?,
                member: member.clone(),
                datatype: datatype.clone(),
            },
            Self::Unary {
                op,
                operand,
                datatype,
            } => Self::Unary {
                op: *op,
                operand: boxed(operand, f)?,
                datatype: datatype.clone(),
            },
            Self::Binary {
                op,
                left,
                right,
                datatype,
            } => Self::Binary {
                op: *op,
                left: boxed(left, f)?,
                right: boxed(right, f)?,
                datatype: datatype.clone(),
            },
            Self::Conditional {
                test,
                if_true,
                if_false,
                datatype,
            } => Self::Conditional {
                test: boxed(test, f)?,
                if_true: boxed(if_true, f)?,
                if_false: boxed(if_false, f)?,
                datatype: datatype.clone(),
            },
            Self::New { record, arguments } => Self::New {
                record: record.clone(),
                arguments: arguments.iter().map(&mut *f).collect::<Result<_>>()?,
            },
            Self::MemberInit { new, bindings } => Self::MemberInit {
                new: boxed(new, f)?,
                bindings: bindings
                    .iter()
                    .map(|(name, e)| Ok((name.clone(), f(e)?)))
                    .collect::<Result<_>>()?,
            },
            Self::ListInit {
                element_type,
                initializers,
            } => Self::ListInit {
                element_type: element_type.clone(),
                initializers: initializers.iter().map(&mut *f).collect::<Result<_>>()?,
            },
            Self::NewArray {
                element_type,
                kind,
                expressions,
            } => Self::NewArray {
                element_type: element_type.clone(),
                kind: *kind,
                expressions: expressions.iter().map(&mut *f).collect::<Result<_>>()?,
            },
            Self::Call {
                instance,
                method,
                arguments,
                datatype,
            } => Self::Call {
                instance: match instance {
                    Some(instance) => Some(boxed(instance, f)?),
                    None => None,
                },
                method: method.clone(),
                arguments: arguments.iter().map(&mut *f).collect::<Result<_>>()?,
                datatype: datatype.clone(),
            },
            Self::Lambda { parameters, body } => Self::Lambda {
                parameters: parameters.clone(),
                body: boxed(body, f)?,
            },
        })
    }

    /// Visit this node and all descendants, parents first.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    /// Find the first node matching the predicate.
    pub fn find<'a>(&'a self, mut pred: impl FnMut(&Expr) -> bool) -> Option<&'a Expr> {
        let mut found = None;
        self.walk(&mut |e| {
            if found.is_none() && pred(e) {
                found = Some(e);
            }
        });
        found
    }

    pub fn as_lambda(&self) -> Option<(&[(String, DataType)], &Expr)> {
        match self {
            Self::Lambda { parameters, body } => Some((parameters, body)),
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{item}")?;
            }
            Ok(())
        }

        match self {
            Self::Constant { value, .. } => write!(f, "{value}"),
            Self::Captured(var) => write!(f, "${}", var.name()),
            Self::Parameter { name, .. } => write!(f, "{name}"),
            Self::Member { expr, member, .. } => write!(f, "{expr}.{member}"),
            Self::Unary {
                op,
                operand,
                datatype,
            } => match op {
                UnaryOperator::Not => write!(f, "!({operand})"),
                UnaryOperator::Negate => write!(f, "-({operand})"),
                UnaryOperator::Convert => write!(f, "({datatype})({operand})"),
            },
            Self::Binary {
                op, left, right, ..
            } => match op {
                BinaryOperator::ArrayIndex => write!(f, "{left}[{right}]"),
                other => write!(f, "({left} {} {right})", other.symbol()),
            },
            Self::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => write!(f, "({test} ? {if_true} : {if_false})"),
            Self::New { record, arguments } => {
                write!(f, "new {}(", record.full_name())?;
                list(f, arguments)?;
                write!(f, ")")
            }
            Self::MemberInit { new, bindings } => {
                write!(f, "{new} {{ ")?;
                for (idx, (name, e)) in bindings.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name} = {e}")?;
                }
                write!(f, " }}")
            }
            Self::ListInit {
                element_type,
                initializers,
            } => {
                write!(f, "new List<{element_type}> {{ ")?;
                list(f, initializers)?;
                write!(f, " }}")
            }
            Self::NewArray {
                element_type,
                kind,
                expressions,
            } => match kind {
                NewArrayKind::Init => {
                    write!(f, "new {element_type}[] {{ ")?;
                    list(f, expressions)?;
                    write!(f, " }}")
                }
                NewArrayKind::Bounds => {
                    write!(f, "new {element_type}[")?;
                    list(f, expressions)?;
                    write!(f, "]")
                }
            },
            Self::Call {
                instance,
                method,
                arguments,
                ..
            } => {
                match instance {
                    Some(instance) => write!(f, "{instance}.{}(", method.kind.name())?,
                    None => write!(f, "{}(", method.full_name())?,
                }
                list(f, arguments)?;
                write!(f, ")")
            }
            Self::Lambda { parameters, body } => {
                if parameters.len() == 1 {
                    write!(f, "{}", parameters[0].0)?;
                } else {
                    write!(f, "(")?;
                    for (idx, (name, _)) in parameters.iter().enumerate() {
                        if idx > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{name}")?;
                    }
                    write!(f, ")")?;
                }
                write!(f, " => {body}")
            }
        }
    }
}

/// Check if an expression calls a method only available in this process.
pub(crate) fn is_local_call(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Call {
            method: Method {
                kind: MethodKind::Local(_),
                ..
            },
            ..
        }
    )
}

#[cfg(test)]
mod tests {
    use super::builder::*;
    use super::*;

    #[test]
    fn captured_set_checks_type() {
        let var = CapturedVariable::new("min", DataType::Int64, Value::Int64(1));
        var.set(Value::Int32(4)).unwrap();
        assert_eq!(Value::Int32(4), var.get());
        var.set(Value::from("a")).unwrap_err();
        var.set(Value::Null).unwrap_err();
    }

    #[test]
    fn display() {
        let x = param("x", DataType::Int32);
        let body = gt(x.clone(), lit(3)).unwrap();
        let f = lambda(vec![("x", DataType::Int32)], body);
        assert_eq!("x => (x > 3)", f.to_string());
    }

    #[test]
    fn map_children_replaces_in_order() {
        let e = add(lit(1), lit(2)).unwrap();
        let mut n = 10;
        let mapped = e
            .try_map_children(&mut |_| {
                n += 1;
                Ok(lit(n))
            })
            .unwrap();
        assert_eq!("(11 + 12)", mapped.to_string());
    }
}
