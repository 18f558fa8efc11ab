//! Functions for building typed expression trees.
//!
//! Builders validate operand types and compute the result type of each node,
//! so a tree that builds is a tree the evaluator can run.
use std::sync::Arc;

use linkq_error::{DbError, Result};

use super::method::{
    LocalFunction,
    MathMethod,
    Method,
    MethodKind,
    QueryOperator,
    StringMethod,
    infer_local_call,
    infer_math_call,
    infer_query_call,
    infer_string_call,
    widest_numeric,
};
use super::{BinaryOperator, CapturedVariable, Expr, NewArrayKind, UnaryOperator};
use crate::types::record::{RecordKind, RecordType};
use crate::types::{CollectionKind, DataType};
use crate::values::Value;

/// Constant with the type inferred from the value.
pub fn lit(value: impl Into<Value>) -> Expr {
    let value = value.into();
    let datatype = value.datatype();
    Expr::Constant { value, datatype }
}

/// Constant with an explicit type.
pub fn constant(value: Value, datatype: DataType) -> Expr {
    Expr::Constant { value, datatype }
}

pub fn captured(variable: &Arc<CapturedVariable>) -> Expr {
    Expr::Captured(variable.clone())
}

pub fn param(name: impl Into<String>, datatype: DataType) -> Expr {
    Expr::Parameter {
        name: name.into(),
        datatype,
    }
}

pub fn lambda<S: Into<String>>(parameters: Vec<(S, DataType)>, body: Expr) -> Expr {
    Expr::Lambda {
        parameters: parameters
            .into_iter()
            .map(|(name, ty)| (name.into(), ty))
            .collect(),
        body: Box::new(body),
    }
}

/// Build a single parameter lambda, passing the parameter expression to the
/// body function.
pub fn lambda1<F>(name: &str, datatype: DataType, body: F) -> Result<Expr>
where
    F: FnOnce(Expr) -> Result<Expr>,
{
    let body = body(param(name, datatype.clone()))?;
    Ok(lambda(vec![(name, datatype)], body))
}

/// Build a two parameter lambda.
pub fn lambda2<F>(names: (&str, &str), types: (DataType, DataType), body: F) -> Result<Expr>
where
    F: FnOnce(Expr, Expr) -> Result<Expr>,
{
    let body = body(
        param(names.0, types.0.clone()),
        param(names.1, types.1.clone()),
    )?;
    Ok(lambda(vec![(names.0, types.0), (names.1, types.1)], body))
}

pub fn member(expr: Expr, name: &str) -> Result<Expr> {
    let source = expr.datatype();
    let datatype = source.member_type(name).ok_or_else(|| {
        DbError::translation(format!("Type '{source}' has no member '{name}'"))
    })?;
    Ok(Expr::Member {
        expr: Box::new(expr),
        member: name.to_string(),
        datatype,
    })
}

pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Result<Expr> {
    let (lt, rt) = (left.datatype(), right.datatype());
    let mismatch = || {
        DbError::translation(format!(
            "Operator '{}' not defined for '{lt}' and '{rt}'",
            op.symbol()
        ))
    };

    let datatype = match op {
        BinaryOperator::Add if is_string(&lt) || is_string(&rt) => {
            if !(accepts_string(&lt) && accepts_string(&rt)) {
                return Err(mismatch());
            }
            DataType::Utf8
        }
        op if op.is_arithmetic() => {
            if !(is_numeric_or_any(&lt) && is_numeric_or_any(&rt)) {
                return Err(mismatch());
            }
            widest_numeric(&lt, &rt)
        }
        op if op.is_comparison() => {
            if !(lt.is_assignable_from(&rt) || rt.is_assignable_from(&lt)) {
                return Err(mismatch());
            }
            DataType::Boolean
        }
        BinaryOperator::AndAlso | BinaryOperator::OrElse => {
            let nullable_bool = DataType::nullable(DataType::Boolean);
            if !(nullable_bool.is_assignable_from(&lt) && nullable_bool.is_assignable_from(&rt)) {
                return Err(mismatch());
            }
            DataType::Boolean
        }
        BinaryOperator::Coalesce => {
            if !lt.accepts_null() {
                return Err(DbError::translation(format!(
                    "Left side of '??' must be nullable, got '{lt}'"
                )));
            }
            if !lt.non_nullable().is_assignable_from(&rt) {
                return Err(mismatch());
            }
            rt.clone()
        }
        BinaryOperator::ArrayIndex => {
            let element = match &lt {
                DataType::Collection { element, .. } => element.as_ref().clone(),
                _ => return Err(mismatch()),
            };
            if !DataType::Int32.is_assignable_from(&rt) {
                return Err(mismatch());
            }
            element
        }
        _ => return Err(mismatch()),
    };

    Ok(Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
        datatype,
    })
}

fn is_string(ty: &DataType) -> bool {
    matches!(ty.non_nullable(), DataType::Utf8)
}

fn accepts_string(ty: &DataType) -> bool {
    matches!(ty.non_nullable(), DataType::Utf8 | DataType::Any)
}

fn is_numeric_or_any(ty: &DataType) -> bool {
    ty.is_numeric() || matches!(ty, DataType::Any)
}

pub fn eq(left: Expr, right: Expr) -> Result<Expr> {
    binary(BinaryOperator::Equal, left, right)
}

pub fn ne(left: Expr, right: Expr) -> Result<Expr> {
    binary(BinaryOperator::NotEqual, left, right)
}

pub fn lt(left: Expr, right: Expr) -> Result<Expr> {
    binary(BinaryOperator::LessThan, left, right)
}

pub fn le(left: Expr, right: Expr) -> Result<Expr> {
    binary(BinaryOperator::LessThanOrEqual, left, right)
}

pub fn gt(left: Expr, right: Expr) -> Result<Expr> {
    binary(BinaryOperator::GreaterThan, left, right)
}

pub fn ge(left: Expr, right: Expr) -> Result<Expr> {
    binary(BinaryOperator::GreaterThanOrEqual, left, right)
}

pub fn and(left: Expr, right: Expr) -> Result<Expr> {
    binary(BinaryOperator::AndAlso, left, right)
}

pub fn or(left: Expr, right: Expr) -> Result<Expr> {
    binary(BinaryOperator::OrElse, left, right)
}

pub fn add(left: Expr, right: Expr) -> Result<Expr> {
    binary(BinaryOperator::Add, left, right)
}

pub fn sub(left: Expr, right: Expr) -> Result<Expr> {
    binary(BinaryOperator::Subtract, left, right)
}

pub fn mul(left: Expr, right: Expr) -> Result<Expr> {
    binary(BinaryOperator::Multiply, left, right)
}

pub fn div(left: Expr, right: Expr) -> Result<Expr> {
    binary(BinaryOperator::Divide, left, right)
}

pub fn rem(left: Expr, right: Expr) -> Result<Expr> {
    binary(BinaryOperator::Modulo, left, right)
}

pub fn coalesce(left: Expr, right: Expr) -> Result<Expr> {
    binary(BinaryOperator::Coalesce, left, right)
}

pub fn index(array: Expr, idx: Expr) -> Result<Expr> {
    binary(BinaryOperator::ArrayIndex, array, idx)
}

pub fn not(operand: Expr) -> Result<Expr> {
    let ty = operand.datatype();
    if !DataType::nullable(DataType::Boolean).is_assignable_from(&ty) {
        return Err(DbError::translation(format!(
            "Operator '!' not defined for '{ty}'"
        )));
    }
    Ok(Expr::Unary {
        op: UnaryOperator::Not,
        operand: Box::new(operand),
        datatype: ty,
    })
}

pub fn neg(operand: Expr) -> Result<Expr> {
    let ty = operand.datatype();
    if !ty.is_numeric() {
        return Err(DbError::translation(format!(
            "Operator '-' not defined for '{ty}'"
        )));
    }
    Ok(Expr::Unary {
        op: UnaryOperator::Negate,
        operand: Box::new(operand),
        datatype: ty,
    })
}

pub fn convert(operand: Expr, target: DataType) -> Result<Expr> {
    let from = operand.datatype();
    let convertible = target.is_assignable_from(&from)
        || from.is_assignable_from(&target)
        || (from.is_numeric() && target.is_numeric())
        || matches!(target.non_nullable(), DataType::Utf8);
    if !convertible {
        return Err(DbError::translation(format!(
            "Cannot convert '{from}' to '{target}'"
        )));
    }
    Ok(Expr::Unary {
        op: UnaryOperator::Convert,
        operand: Box::new(operand),
        datatype: target,
    })
}

pub fn cond(test: Expr, if_true: Expr, if_false: Expr) -> Result<Expr> {
    let test_type = test.datatype();
    if !DataType::Boolean.is_assignable_from(&test_type) {
        return Err(DbError::translation(format!(
            "Condition must be bool, got '{test_type}'"
        )));
    }
    let (tt, ft) = (if_true.datatype(), if_false.datatype());
    let datatype = if tt.is_assignable_from(&ft) {
        tt
    } else if ft.is_assignable_from(&tt) {
        ft
    } else {
        return Err(DbError::translation(format!(
            "Conditional branches have incompatible types '{tt}' and '{ft}'"
        )));
    };
    Ok(Expr::Conditional {
        test: Box::new(test),
        if_true: Box::new(if_true),
        if_false: Box::new(if_false),
        datatype,
    })
}

/// Construct a record.
///
/// Anonymous records take one positional argument per property. Class records
/// take no arguments, use `member_init` to set properties.
pub fn new_record(record: &Arc<RecordType>, arguments: Vec<Expr>) -> Result<Expr> {
    match record.kind() {
        RecordKind::Anonymous => {
            let props = record.properties();
            if props.len() != arguments.len() {
                return Err(DbError::translation(format!(
                    "Type '{}' has {} properties, got {} arguments",
                    record.full_name(),
                    props.len(),
                    arguments.len()
                )));
            }
            for (prop, arg) in props.iter().zip(&arguments) {
                check_assignable(record, &prop.name, &prop.datatype, arg)?;
            }
        }
        RecordKind::Class => {
            if !arguments.is_empty() {
                return Err(DbError::translation(format!(
                    "Type '{}' is constructed without arguments",
                    record.full_name()
                )));
            }
        }
    }
    Ok(Expr::New {
        record: record.clone(),
        arguments,
    })
}

/// Construct a class record and set properties.
pub fn member_init<S: Into<String>>(
    record: &Arc<RecordType>,
    bindings: Vec<(S, Expr)>,
) -> Result<Expr> {
    if record.kind() != RecordKind::Class {
        return Err(DbError::translation(format!(
            "Properties of '{}' can't be set after construction",
            record.full_name()
        )));
    }
    let new = new_record(record, Vec::new())?;
    let bindings = bindings
        .into_iter()
        .map(|(name, expr)| {
            let name = name.into();
            let prop = record.property(&name).ok_or_else(|| {
                DbError::translation(format!(
                    "Type '{}' has no member '{name}'",
                    record.full_name()
                ))
            })?;
            check_assignable(record, &name, &prop.datatype, &expr)?;
            Ok((name, expr))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Expr::MemberInit {
        new: Box::new(new),
        bindings,
    })
}

fn check_assignable(record: &RecordType, name: &str, expected: &DataType, expr: &Expr) -> Result<()> {
    let actual = expr.datatype();
    if !expected.is_assignable_from(&actual) {
        return Err(DbError::translation(format!(
            "Property '{name}' of '{}' has type '{expected}', got '{actual}'",
            record.full_name()
        )));
    }
    Ok(())
}

pub fn list_init(element_type: DataType, initializers: Vec<Expr>) -> Result<Expr> {
    check_elements(&element_type, &initializers)?;
    Ok(Expr::ListInit {
        element_type,
        initializers,
    })
}

pub fn new_array(element_type: DataType, expressions: Vec<Expr>) -> Result<Expr> {
    check_elements(&element_type, &expressions)?;
    Ok(Expr::NewArray {
        element_type,
        kind: NewArrayKind::Init,
        expressions,
    })
}

/// Array of `len` default values.
pub fn new_array_bounds(element_type: DataType, len: Expr) -> Result<Expr> {
    let len_type = len.datatype();
    if !DataType::Int32.is_assignable_from(&len_type) {
        return Err(DbError::translation(format!(
            "Array bounds must be i32, got '{len_type}'"
        )));
    }
    Ok(Expr::NewArray {
        element_type,
        kind: NewArrayKind::Bounds,
        expressions: vec![len],
    })
}

fn check_elements(element_type: &DataType, items: &[Expr]) -> Result<()> {
    for item in items {
        let ty = item.datatype();
        if !element_type.is_assignable_from(&ty) {
            return Err(DbError::translation(format!(
                "Element of type '{ty}' cannot be added to a collection of '{element_type}'"
            )));
        }
    }
    Ok(())
}

/// Constant collection.
pub fn collection(kind: CollectionKind, element_type: DataType, items: Vec<Value>) -> Expr {
    Expr::Constant {
        value: Value::Collection(crate::values::CollectionValue { kind, items }),
        datatype: DataType::Collection {
            kind,
            element: Box::new(element_type),
        },
    }
}

/// Call a query operator against a queryable.
pub fn call_query(op: QueryOperator, arguments: Vec<Expr>) -> Result<Expr> {
    let (generic_arguments, datatype) = infer_query_call(op, &arguments)?;
    Ok(Expr::Call {
        instance: None,
        method: Method {
            kind: MethodKind::Query(op),
            generic_arguments,
        },
        arguments,
        datatype,
    })
}

/// Call a query operator against an in-memory sequence.
pub fn call_enumerable(op: QueryOperator, arguments: Vec<Expr>) -> Result<Expr> {
    let (generic_arguments, datatype) = infer_query_call(op, &arguments)?;
    Ok(Expr::Call {
        instance: None,
        method: Method {
            kind: MethodKind::Enumerable(op),
            generic_arguments,
        },
        arguments,
        datatype,
    })
}

pub fn call_string(method: StringMethod, instance: Option<Expr>, arguments: Vec<Expr>) -> Result<Expr> {
    let datatype = infer_string_call(method, instance.as_ref(), &arguments)?;
    Ok(Expr::Call {
        instance: instance.map(Box::new),
        method: Method {
            kind: MethodKind::String(method),
            generic_arguments: Vec::new(),
        },
        arguments,
        datatype,
    })
}

pub fn call_math(method: MathMethod, arguments: Vec<Expr>) -> Result<Expr> {
    let datatype = infer_math_call(method, &arguments)?;
    Ok(Expr::Call {
        instance: None,
        method: Method {
            kind: MethodKind::Math(method),
            generic_arguments: Vec::new(),
        },
        arguments,
        datatype,
    })
}

pub fn call_local(func: &Arc<LocalFunction>, arguments: Vec<Expr>) -> Result<Expr> {
    let datatype = infer_local_call(func, &arguments)?;
    Ok(Expr::Call {
        instance: None,
        method: Method {
            kind: MethodKind::Local(func.clone()),
            generic_arguments: Vec::new(),
        },
        arguments,
        datatype,
    })
}

/// Rebuild a call for a method kind, re-inferring generic arguments and the
/// result type.
pub fn call(kind: MethodKind, instance: Option<Expr>, arguments: Vec<Expr>) -> Result<Expr> {
    let no_instance = |name: &str| -> Result<()> {
        if instance.is_some() {
            return Err(DbError::translation(format!(
                "Method '{name}' doesn't take an instance"
            )));
        }
        Ok(())
    };

    match kind {
        MethodKind::Query(op) => {
            no_instance(op.name())?;
            call_query(op, arguments)
        }
        MethodKind::Enumerable(op) => {
            no_instance(op.name())?;
            call_enumerable(op, arguments)
        }
        MethodKind::String(m) => call_string(m, instance, arguments),
        MethodKind::Math(m) => {
            no_instance(m.name())?;
            call_math(m, arguments)
        }
        MethodKind::Local(f) => {
            no_instance(&f.name)?;
            call_local(&f, arguments)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::record::PropertyDef;

    #[test]
    fn arithmetic_widens() {
        let e = add(lit(1), lit(2i64)).unwrap();
        assert_eq!(DataType::Int64, e.datatype());
        let e = mul(lit(1), lit(2.5)).unwrap();
        assert_eq!(DataType::Float64, e.datatype());
        add(lit(1), lit(true)).unwrap_err();
    }

    #[test]
    fn string_concat() {
        let e = add(lit("a"), lit("b")).unwrap();
        assert_eq!(DataType::Utf8, e.datatype());
    }

    #[test]
    fn member_checks_type() {
        let product = RecordType::new("shop", "Product", [PropertyDef::new("id", DataType::Int32)]);
        let p = param("p", DataType::Record(product));
        assert_eq!(DataType::Int32, member(p.clone(), "id").unwrap().datatype());
        let err = member(p, "price").unwrap_err();
        assert!(err.to_string().contains("price"));
    }

    #[test]
    fn where_requires_bool_predicate() {
        let source = constant(
            Value::Queryable(crate::values::QueryableValue::Remote(DataType::Int32)),
            DataType::queryable(DataType::Int32),
        );
        let pred = lambda1("x", DataType::Int32, |x| gt(x, lit(1))).unwrap();
        let q = call_query(QueryOperator::Where, vec![source.clone(), pred]).unwrap();
        assert_eq!(DataType::queryable(DataType::Int32), q.datatype());

        let not_bool = lambda1("x", DataType::Int32, |x| add(x, lit(1))).unwrap();
        call_query(QueryOperator::Where, vec![source, not_bool]).unwrap_err();
    }

    #[test]
    fn anonymous_construction_positional() {
        let anon = RecordType::anonymous([
            PropertyDef::new("a", DataType::Int32),
            PropertyDef::new("b", DataType::Utf8),
        ]);
        new_record(&anon, vec![lit(1), lit("x")]).unwrap();
        new_record(&anon, vec![lit(1)]).unwrap_err();
        member_init(&anon, vec![("a", lit(1))]).unwrap_err();
    }

    #[test]
    fn group_by_types() {
        let source = collection(CollectionKind::List, DataType::Utf8, vec!["a".into()]);
        let key = lambda1("s", DataType::Utf8, |s| member(s, "Length")).unwrap();
        let g = call_enumerable(QueryOperator::GroupBy, vec![source, key]).unwrap();
        assert_eq!(
            DataType::list(DataType::grouping(DataType::Int32, DataType::Utf8)),
            g.datatype()
        );
    }
}
