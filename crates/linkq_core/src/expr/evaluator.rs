use chrono::{Datelike, Timelike};
use linkq_error::{DbError, ErrorKind, Result};

use super::method::{MathMethod, MethodKind, StringMethod};
use super::operators::evaluate_query;
use super::{BinaryOperator, Expr, NewArrayKind, UnaryOperator};
use crate::types::DataType;
use crate::types::record::RecordKind;
use crate::values::{ObjectRef, Value};

pub(crate) fn null_reference(msg: impl Into<String>) -> DbError {
    DbError::new(msg).with_kind(ErrorKind::NullReference)
}

fn overflow() -> DbError {
    DbError::new("arithmetic operation resulted in an overflow").with_kind(ErrorKind::Overflow)
}

fn divide_by_zero() -> DbError {
    DbError::new("attempted to divide by zero").with_kind(ErrorKind::DivideByZero)
}

/// Interprets native expression trees.
///
/// Lambda parameters are bound in a scope stack, inner lambdas shadow outer
/// parameters with the same name.
#[derive(Debug, Default)]
pub struct Evaluator {
    scope: Vec<(String, Value)>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a lambda to arguments.
    pub fn apply(&mut self, lambda: &Expr, args: &[Value]) -> Result<Value> {
        let (params, body) = lambda.as_lambda().ok_or_else(|| {
            DbError::execution(format!("Expected a lambda, got '{lambda}'"))
        })?;
        if params.len() != args.len() {
            return Err(DbError::execution(format!(
                "Lambda '{lambda}' expects {} arguments, got {}",
                params.len(),
                args.len()
            )));
        }

        let depth = self.scope.len();
        self.scope.extend(
            params
                .iter()
                .zip(args)
                .map(|((name, _), arg)| (name.clone(), arg.clone())),
        );
        let result = self.evaluate(body);
        self.scope.truncate(depth);
        result
    }

    /// Apply a lambda expecting a boolean result. Null is treated as false.
    pub fn apply_predicate(&mut self, lambda: &Expr, args: &[Value]) -> Result<bool> {
        match self.apply(lambda, args)? {
            Value::Null => Ok(false),
            other => other.try_as_bool(),
        }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Constant { value, .. } => Ok(value.clone()),
            Expr::Captured(var) => Ok(var.get()),
            Expr::Parameter { name, .. } => self
                .scope
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| DbError::execution(format!("Parameter '{name}' is not bound"))),
            Expr::Member { expr, member, .. } => {
                let source_type = expr.datatype();
                let value = self.evaluate(expr)?;
                member_access(value, &source_type, member)
            }
            Expr::Unary {
                op,
                operand,
                datatype,
            } => {
                let value = self.evaluate(operand)?;
                match op {
                    UnaryOperator::Not => match value {
                        Value::Null => Ok(Value::Null),
                        v => Ok(Value::Boolean(!v.try_as_bool()?)),
                    },
                    UnaryOperator::Negate => match value {
                        Value::Null => Ok(Value::Null),
                        Value::Int32(v) => v.checked_neg().map(Value::Int32).ok_or_else(overflow),
                        Value::Int64(v) => v.checked_neg().map(Value::Int64).ok_or_else(overflow),
                        Value::Float64(v) => Ok(Value::Float64(-v)),
                        other => Err(DbError::invalid_operation(format!("Cannot negate {other}"))),
                    },
                    UnaryOperator::Convert => convert_value(value, datatype),
                }
            }
            Expr::Binary {
                op,
                left,
                right,
                datatype,
            } => self.evaluate_binary(*op, left, right, datatype),
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => {
                if self.evaluate(test)?.try_as_bool()? {
                    self.evaluate(if_true)
                } else {
                    self.evaluate(if_false)
                }
            }
            Expr::New { record, arguments } => {
                let values = arguments
                    .iter()
                    .map(|a| self.evaluate(a))
                    .collect::<Result<Vec<_>>>()?;
                let obj = match record.kind() {
                    RecordKind::Anonymous => {
                        let values = values
                            .into_iter()
                            .zip(record.properties())
                            .map(|(v, p)| coerce(v, &p.datatype))
                            .collect::<Result<Vec<_>>>()?;
                        ObjectRef::with_values(record.clone(), values)?
                    }
                    RecordKind::Class => ObjectRef::new(record.clone()),
                };
                Ok(Value::Object(obj))
            }
            Expr::MemberInit { new, bindings } => {
                let value = self.evaluate(new)?;
                let obj = value.try_as_object()?;
                for (name, expr) in bindings {
                    let v = self.evaluate(expr)?;
                    let v = match obj.record_type().property(name) {
                        Some(prop) => coerce(v, &prop.datatype)?,
                        None => v,
                    };
                    obj.set(name, v)?;
                }
                Ok(value)
            }
            Expr::ListInit { initializers, .. } => Ok(Value::list(
                initializers
                    .iter()
                    .map(|e| self.evaluate(e))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Expr::NewArray {
                element_type,
                kind,
                expressions,
            } => match kind {
                NewArrayKind::Init => Ok(Value::array(
                    expressions
                        .iter()
                        .map(|e| self.evaluate(e))
                        .collect::<Result<Vec<_>>>()?,
                )),
                NewArrayKind::Bounds => {
                    let len = match expressions.first() {
                        Some(e) => self.evaluate(e)?.try_as_i32()?,
                        None => return Err(DbError::execution("Array bounds missing")),
                    };
                    let len = usize::try_from(len).map_err(|_| {
                        DbError::invalid_operation(format!("Array length {len} is negative"))
                    })?;
                    Ok(Value::array(
                        std::iter::repeat_n(element_type.default_value(), len),
                    ))
                }
            },
            Expr::Call {
                instance,
                method,
                arguments,
                datatype,
            } => match &method.kind {
                MethodKind::Query(op) | MethodKind::Enumerable(op) => {
                    evaluate_query(self, *op, arguments, datatype)
                }
                MethodKind::String(m) => {
                    let instance = match instance {
                        Some(i) => Some(self.evaluate(i)?),
                        None => None,
                    };
                    let args = self.evaluate_all(arguments)?;
                    string_method(*m, instance, args)
                }
                MethodKind::Math(m) => {
                    let args = self.evaluate_all(arguments)?;
                    math_method(*m, args, datatype)
                }
                MethodKind::Local(f) => {
                    let args = self.evaluate_all(arguments)?;
                    f.call(&args)
                }
            },
            Expr::Lambda { .. } => Err(DbError::execution(format!(
                "Lambda '{expr}' can only be evaluated by applying it"
            ))),
        }
    }

    fn evaluate_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>> {
        exprs.iter().map(|e| self.evaluate(e)).collect()
    }

    fn evaluate_binary(
        &mut self,
        op: BinaryOperator,
        left: &Expr,
        right: &Expr,
        datatype: &DataType,
    ) -> Result<Value> {
        match op {
            BinaryOperator::AndAlso => {
                if !self.evaluate(left)?.try_as_bool()? {
                    return Ok(Value::Boolean(false));
                }
                Ok(Value::Boolean(self.evaluate(right)?.try_as_bool()?))
            }
            BinaryOperator::OrElse => {
                if self.evaluate(left)?.try_as_bool()? {
                    return Ok(Value::Boolean(true));
                }
                Ok(Value::Boolean(self.evaluate(right)?.try_as_bool()?))
            }
            BinaryOperator::Coalesce => match self.evaluate(left)? {
                Value::Null => self.evaluate(right),
                v => Ok(v),
            },
            op => {
                let l = self.evaluate(left)?;
                let r = self.evaluate(right)?;
                binary_value(op, l, r, datatype)
            }
        }
    }
}

/// Apply a strict binary operator to two values.
pub(crate) fn binary_value(
    op: BinaryOperator,
    l: Value,
    r: Value,
    datatype: &DataType,
) -> Result<Value> {
    use BinaryOperator as B;

    match op {
        B::Equal => Ok(Value::Boolean(l == r)),
        B::NotEqual => Ok(Value::Boolean(l != r)),
        B::LessThan | B::LessThanOrEqual | B::GreaterThan | B::GreaterThanOrEqual => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Boolean(false));
            }
            let ord = l.compare(&r)?;
            Ok(Value::Boolean(match op {
                B::LessThan => ord.is_lt(),
                B::LessThanOrEqual => ord.is_le(),
                B::GreaterThan => ord.is_gt(),
                _ => ord.is_ge(),
            }))
        }
        B::Add if matches!(datatype.non_nullable(), DataType::Utf8) => {
            let part = |v: Value| match v {
                Value::Null => String::new(),
                Value::Utf8(s) => s,
                other => other.to_string(),
            };
            Ok(Value::Utf8(part(l) + &part(r)))
        }
        B::Add | B::Subtract | B::Multiply | B::Divide | B::Modulo => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            arithmetic(op, &l, &r, datatype)
        }
        B::ArrayIndex => {
            let idx = r.try_as_i32()?;
            let items = match &l {
                Value::Null => return Err(null_reference("Cannot index into a null array")),
                v => v.as_sequence().ok_or_else(|| {
                    DbError::invalid_operation(format!("Cannot index into {v}"))
                })?,
            };
            usize::try_from(idx)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .ok_or_else(|| {
                    DbError::invalid_operation("index was outside the bounds of the array")
                })
        }
        B::AndAlso | B::OrElse => {
            let (l, r) = (l.try_as_bool()?, r.try_as_bool()?);
            Ok(Value::Boolean(if op == B::AndAlso { l && r } else { l || r }))
        }
        B::Coalesce => Ok(if l.is_null() { r } else { l }),
    }
}

fn arithmetic(op: BinaryOperator, l: &Value, r: &Value, datatype: &DataType) -> Result<Value> {
    use BinaryOperator as B;

    match datatype.non_nullable() {
        DataType::Int32 => {
            let (a, b) = (l.try_as_i32()?, r.try_as_i32()?);
            let out = match op {
                B::Add => a.checked_add(b),
                B::Subtract => a.checked_sub(b),
                B::Multiply => a.checked_mul(b),
                B::Divide if b == 0 => return Err(divide_by_zero()),
                B::Divide => a.checked_div(b),
                B::Modulo if b == 0 => return Err(divide_by_zero()),
                _ => a.checked_rem(b),
            };
            out.map(Value::Int32).ok_or_else(overflow)
        }
        DataType::Int64 => {
            let (a, b) = (l.try_as_i64()?, r.try_as_i64()?);
            let out = match op {
                B::Add => a.checked_add(b),
                B::Subtract => a.checked_sub(b),
                B::Multiply => a.checked_mul(b),
                B::Divide if b == 0 => return Err(divide_by_zero()),
                B::Divide => a.checked_div(b),
                B::Modulo if b == 0 => return Err(divide_by_zero()),
                _ => a.checked_rem(b),
            };
            out.map(Value::Int64).ok_or_else(overflow)
        }
        _ => {
            let (a, b) = (l.try_as_f64()?, r.try_as_f64()?);
            Ok(Value::Float64(match op {
                B::Add => a + b,
                B::Subtract => a - b,
                B::Multiply => a * b,
                B::Divide => a / b,
                _ => a % b,
            }))
        }
    }
}

fn member_access(value: Value, source_type: &DataType, member: &str) -> Result<Value> {
    if let DataType::Nullable(_) = source_type {
        match member {
            "HasValue" => return Ok(Value::Boolean(!value.is_null())),
            "Value" if value.is_null() => {
                return Err(DbError::invalid_operation(
                    "nullable object must have a value",
                ));
            }
            "Value" => return Ok(value),
            _ => (),
        }
    }

    match value {
        Value::Null => Err(null_reference(format!(
            "Cannot access member '{member}' of a null '{source_type}'"
        ))),
        Value::Object(obj) => obj.get(member),
        Value::Grouping(g) if member == "Key" => Ok(g.key.clone()),
        Value::Utf8(s) if member == "Length" => len_value(s.chars().count()),
        Value::Collection(c) if member == "Count" || member == "Length" => {
            len_value(c.items.len())
        }
        Value::Timestamp(ts) => {
            let part = match member {
                "Year" => ts.year(),
                "Month" => ts.month() as i32,
                "Day" => ts.day() as i32,
                "Hour" => ts.hour() as i32,
                "Minute" => ts.minute() as i32,
                "Second" => ts.second() as i32,
                _ => return Err(no_member(&Value::Timestamp(ts), member)),
            };
            Ok(Value::Int32(part))
        }
        other => Err(no_member(&other, member)),
    }
}

fn no_member(value: &Value, member: &str) -> DbError {
    DbError::execution(format!(
        "Value of type '{}' has no member '{member}'",
        value.datatype()
    ))
}

fn len_value(len: usize) -> Result<Value> {
    i32::try_from(len).map(Value::Int32).map_err(|_| overflow())
}

/// Convert a value to a target type, failing on loss of range.
pub(crate) fn convert_value(value: Value, target: &DataType) -> Result<Value> {
    if value.is_null() {
        if target.accepts_null() {
            return Ok(Value::Null);
        }
        return Err(DbError::invalid_operation(
            "nullable object must have a value",
        ));
    }

    let target = target.non_nullable();
    let incompatible = |v: &Value| {
        DbError::invalid_operation(format!(
            "Cannot convert value of type '{}' to '{target}'",
            v.datatype()
        ))
    };

    Ok(match (target, value) {
        (DataType::Int32, Value::Int32(v)) => Value::Int32(v),
        (DataType::Int32, Value::Int64(v)) => {
            Value::Int32(i32::try_from(v).map_err(|_| overflow())?)
        }
        (DataType::Int32, Value::Float64(v)) => {
            let t = v.trunc();
            if !(i32::MIN as f64..=i32::MAX as f64).contains(&t) {
                return Err(overflow());
            }
            Value::Int32(t as i32)
        }
        (DataType::Int64, Value::Int32(v)) => Value::Int64(v as i64),
        (DataType::Int64, Value::Int64(v)) => Value::Int64(v),
        (DataType::Int64, Value::Float64(v)) => {
            let t = v.trunc();
            if !(i64::MIN as f64..=i64::MAX as f64).contains(&t) {
                return Err(overflow());
            }
            Value::Int64(t as i64)
        }
        (DataType::Float64, v @ (Value::Int32(_) | Value::Int64(_) | Value::Float64(_))) => {
            Value::Float64(v.try_as_f64()?)
        }
        (DataType::Utf8, Value::Utf8(s)) => Value::Utf8(s),
        (DataType::Utf8, v) => Value::Utf8(v.to_string()),
        (target, v) => {
            if target.is_assignable_from(&v.datatype()) {
                v
            } else {
                return Err(incompatible(&v));
            }
        }
    })
}

/// Widen a numeric value to its declared type. Non-numeric values are
/// returned as is.
pub(crate) fn coerce(value: Value, target: &DataType) -> Result<Value> {
    let numeric = matches!(value, Value::Int32(_) | Value::Int64(_) | Value::Float64(_));
    if numeric && target.is_numeric() && value.datatype() != *target.non_nullable() {
        return convert_value(value, target);
    }
    Ok(value)
}

fn string_method(method: StringMethod, instance: Option<Value>, args: Vec<Value>) -> Result<Value> {
    let arg_str = |idx: usize| -> Result<String> {
        match args.get(idx) {
            Some(Value::Utf8(s)) => Ok(s.clone()),
            Some(Value::Null) => Err(null_reference(format!(
                "Argument to String.{} is null",
                method.name()
            ))),
            Some(other) => Ok(other.to_string()),
            None => Err(DbError::execution(format!(
                "String.{} missing argument {idx}",
                method.name()
            ))),
        }
    };

    if method.is_static() {
        return Ok(match method {
            StringMethod::IsNullOrEmpty => Value::Boolean(match args.first() {
                None | Some(Value::Null) => true,
                Some(v) => v.try_as_str()?.is_empty(),
            }),
            _ => Value::Utf8(
                args.iter()
                    .map(|v| match v {
                        Value::Null => Ok(""),
                        v => v.try_as_str(),
                    })
                    .collect::<Result<String>>()?,
            ),
        });
    }

    let s = match instance {
        Some(Value::Utf8(s)) => s,
        Some(Value::Null) | None => {
            return Err(null_reference(format!(
                "Cannot call String.{} on a null string",
                method.name()
            )));
        }
        Some(other) => other.try_as_str()?.to_string(),
    };

    Ok(match method {
        StringMethod::Contains => Value::Boolean(s.contains(&arg_str(0)?)),
        StringMethod::StartsWith => Value::Boolean(s.starts_with(&arg_str(0)?)),
        StringMethod::EndsWith => Value::Boolean(s.ends_with(&arg_str(0)?)),
        StringMethod::ToUpper => Value::Utf8(s.to_uppercase()),
        StringMethod::ToLower => Value::Utf8(s.to_lowercase()),
        StringMethod::Trim => Value::Utf8(s.trim().to_string()),
        StringMethod::IsNullOrEmpty | StringMethod::Concat => {
            return Err(DbError::new(format!(
                "String.{} called as an instance method",
                method.name()
            )));
        }
    })
}

fn math_method(method: MathMethod, args: Vec<Value>, datatype: &DataType) -> Result<Value> {
    if args.iter().any(|a| a.is_null()) {
        return Ok(Value::Null);
    }
    fn arg_at(method: MathMethod, args: &[Value], idx: usize) -> Result<&Value> {
        args.get(idx).ok_or_else(|| {
            DbError::execution(format!("Math.{} missing argument {idx}", method.name()))
        })
    }
    let arg = |idx: usize| arg_at(method, &args, idx);
    let float = |idx: usize| -> Result<f64> { arg(idx)?.try_as_f64() };

    Ok(match method {
        MathMethod::Abs => match arg(0)? {
            Value::Int32(v) => Value::Int32(v.checked_abs().ok_or_else(overflow)?),
            Value::Int64(v) => Value::Int64(v.checked_abs().ok_or_else(overflow)?),
            v => Value::Float64(v.try_as_f64()?.abs()),
        },
        MathMethod::Round => Value::Float64(float(0)?.round_ties_even()),
        MathMethod::Floor => Value::Float64(float(0)?.floor()),
        MathMethod::Ceiling => Value::Float64(float(0)?.ceil()),
        MathMethod::Sqrt => Value::Float64(float(0)?.sqrt()),
        MathMethod::Pow => Value::Float64(float(0)?.powf(float(1)?)),
        MathMethod::Max | MathMethod::Min => {
            let (a, b) = (arg(0)?, arg(1)?);
            let a_first = match a.compare(b)? {
                std::cmp::Ordering::Less => method == MathMethod::Min,
                _ => method == MathMethod::Max,
            };
            let picked = if a_first { a.clone() } else { b.clone() };
            coerce(picked, datatype)?
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::CapturedVariable;
    use crate::expr::builder::*;
    use crate::expr::method::QueryOperator;
    use crate::types::record::{PropertyDef, RecordType};

    fn eval(expr: &Expr) -> Result<Value> {
        Evaluator::new().evaluate(expr)
    }

    #[test]
    fn checked_arithmetic() {
        assert_eq!(Value::Int32(7), eval(&add(lit(3), lit(4)).unwrap()).unwrap());

        let err = eval(&div(lit(1), lit(0)).unwrap()).unwrap_err();
        assert_eq!(&ErrorKind::DivideByZero, err.kind());

        let err = eval(&add(lit(i32::MAX), lit(1)).unwrap()).unwrap_err();
        assert_eq!(&ErrorKind::Overflow, err.kind());

        // Floats don't trap.
        let v = eval(&div(lit(1.0), lit(0)).unwrap()).unwrap();
        assert_eq!(Value::Float64(f64::INFINITY), v);
    }

    #[test]
    fn null_member_access() {
        let ty = RecordType::new("shop", "Product", [PropertyDef::new("id", DataType::Int32)]);
        let e = member(constant(Value::Null, DataType::Record(ty)), "id").unwrap();
        let err = eval(&e).unwrap_err();
        assert_eq!(&ErrorKind::NullReference, err.kind());
    }

    #[test]
    fn nullable_members() {
        let n = constant(Value::Null, DataType::nullable(DataType::Int32));
        let has_value = member(n.clone(), "HasValue").unwrap();
        assert_eq!(Value::Boolean(false), eval(&has_value).unwrap());
        eval(&member(n, "Value").unwrap()).unwrap_err();
    }

    #[test]
    fn comparisons_with_null_are_false() {
        let n = constant(Value::Null, DataType::nullable(DataType::Int32));
        assert_eq!(Value::Boolean(false), eval(&lt(n.clone(), lit(1)).unwrap()).unwrap());
        assert_eq!(Value::Boolean(false), eval(&ge(n.clone(), lit(1)).unwrap()).unwrap());
        assert_eq!(Value::Boolean(true), eval(&eq(n, lit(Value::Null)).unwrap()).unwrap());
    }

    #[test]
    fn short_circuit() {
        // Right side would divide by zero.
        let bad = eq(div(lit(1), lit(0)).unwrap(), lit(1)).unwrap();
        let e = and(lit(false), bad.clone()).unwrap();
        assert_eq!(Value::Boolean(false), eval(&e).unwrap());
        let e = or(lit(true), bad).unwrap();
        assert_eq!(Value::Boolean(true), eval(&e).unwrap());
    }

    #[test]
    fn lambda_scopes_shadow() {
        let inner = lambda1("x", DataType::Int32, |x| add(x, lit(100))).unwrap();
        let outer = lambda1("x", DataType::Int32, |x| {
            let source = list_init(DataType::Int32, vec![x])?;
            call_enumerable(QueryOperator::Select, vec![source, inner])
        })
        .unwrap();
        let out = Evaluator::new().apply(&outer, &[Value::Int32(1)]).unwrap();
        assert_eq!(Value::list([Value::Int32(101)]), out);
    }

    #[test]
    fn captured_reads_current_value() {
        let var = CapturedVariable::new("n", DataType::Int32, Value::Int32(1));
        let e = add(captured(&var), lit(1)).unwrap();
        assert_eq!(Value::Int32(2), eval(&e).unwrap());
        var.set(Value::Int32(10)).unwrap();
        assert_eq!(Value::Int32(11), eval(&e).unwrap());
    }

    #[test]
    fn anonymous_construction() {
        let anon = RecordType::anonymous([
            PropertyDef::new("a", DataType::Int64),
            PropertyDef::new("b", DataType::Utf8),
        ]);
        let v = eval(&new_record(&anon, vec![lit(1), lit("x")]).unwrap()).unwrap();
        let obj = v.try_as_object().unwrap();
        assert!(matches!(obj.get("a").unwrap(), Value::Int64(1)));
    }

    #[test]
    fn class_member_init() {
        let ty = RecordType::new(
            "shop",
            "Product",
            [
                PropertyDef::new("id", DataType::Int32),
                PropertyDef::new("name", DataType::Utf8),
            ],
        );
        let v = eval(&member_init(&ty, vec![("name", lit("Car"))]).unwrap()).unwrap();
        let obj = v.try_as_object().unwrap();
        assert_eq!(Value::Int32(0), obj.get("id").unwrap());
        assert_eq!(Value::from("Car"), obj.get("name").unwrap());
    }

    #[test]
    fn array_index_bounds() {
        let arr = new_array(DataType::Int32, vec![lit(1), lit(2)]).unwrap();
        assert_eq!(Value::Int32(2), eval(&index(arr.clone(), lit(1)).unwrap()).unwrap());
        let err = eval(&index(arr, lit(2)).unwrap()).unwrap_err();
        assert_eq!(&ErrorKind::InvalidOperation, err.kind());

        let bounds = new_array_bounds(DataType::Int32, lit(3)).unwrap();
        assert_eq!(Value::array(vec![Value::Int32(0); 3]), eval(&bounds).unwrap());
    }

    #[test]
    fn strings_and_math() {
        let s = call_string(StringMethod::StartsWith, Some(lit("Carrot")), vec![lit("Car")]).unwrap();
        assert_eq!(Value::Boolean(true), eval(&s).unwrap());

        let s = call_string(StringMethod::IsNullOrEmpty, None, vec![constant(Value::Null, DataType::Utf8)])
            .unwrap();
        assert_eq!(Value::Boolean(true), eval(&s).unwrap());

        let r = call_math(MathMethod::Round, vec![lit(2.5)]).unwrap();
        assert_eq!(Value::Float64(2.0), eval(&r).unwrap());

        let m = call_math(MathMethod::Max, vec![lit(3), lit(7i64)]).unwrap();
        assert!(matches!(eval(&m).unwrap(), Value::Int64(7)));
    }

    #[test]
    fn convert_checks_range() {
        let e = convert(lit(i64::MAX), DataType::Int32).unwrap();
        assert_eq!(&ErrorKind::Overflow, eval(&e).unwrap_err().kind());
        let e = convert(lit(3.9), DataType::Int32).unwrap();
        assert_eq!(Value::Int32(3), eval(&e).unwrap());
    }

    #[test]
    fn local_function_call() {
        let twice = crate::expr::method::LocalFunction::new(
            "twice",
            vec![DataType::Int32],
            DataType::Int32,
            |args: &[Value]| Ok(Value::Int32(args[0].try_as_i32()? * 2)),
        );
        let e = call_local(&twice, vec![lit(21)]).unwrap();
        assert_eq!(Value::Int32(42), eval(&e).unwrap());
    }
}
