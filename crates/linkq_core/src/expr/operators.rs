//! Query operators over materialized sequences.
use std::cmp::Ordering;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use indexmap::IndexMap;
use linkq_error::{DbError, Result};

use super::evaluator::Evaluator;
use super::method::{MethodKind, QueryOperator};
use super::{Expr, evaluator};
use crate::types::DataType;
use crate::values::{Grouping, Value};

pub(crate) const NO_MATCH: &str = "sequence contains no matching element";
pub(crate) const MORE_THAN_ONE_MATCH: &str = "sequence contains more than one matching element";
pub(crate) const NO_ELEMENTS: &str = "sequence contains no elements";

/// Get the operator and arguments if the expression is a query operator call.
fn as_query_call(expr: &Expr) -> Option<(QueryOperator, &[Expr])> {
    match expr {
        Expr::Call {
            method,
            arguments,
            ..
        } => match method.kind {
            MethodKind::Query(op) | MethodKind::Enumerable(op) => Some((op, arguments)),
            _ => None,
        },
        _ => None,
    }
}

fn arg(op: QueryOperator, args: &[Expr], idx: usize) -> Result<&Expr> {
    args.get(idx).ok_or_else(|| {
        DbError::execution(format!("{} missing argument {idx}", op.name()))
    })
}

fn source(eval: &mut Evaluator, op: QueryOperator, args: &[Expr]) -> Result<Vec<Value>> {
    eval.evaluate(arg(op, args, 0)?)?.into_sequence()
}

/// Source elements, filtered by the optional predicate at `args[1]`.
fn filtered(eval: &mut Evaluator, op: QueryOperator, args: &[Expr]) -> Result<Vec<Value>> {
    let items = source(eval, op, args)?;
    match args.get(1) {
        Some(pred) => {
            let mut out = Vec::new();
            for item in items {
                if eval.apply_predicate(pred, std::slice::from_ref(&item))? {
                    out.push(item);
                }
            }
            Ok(out)
        }
        None => Ok(items),
    }
}

/// Source elements, projected by the optional selector at `args[1]`.
fn projected(eval: &mut Evaluator, op: QueryOperator, args: &[Expr]) -> Result<Vec<Value>> {
    let items = source(eval, op, args)?;
    match args.get(1) {
        Some(selector) => items
            .into_iter()
            .map(|item| eval.apply(selector, &[item]))
            .collect(),
        None => Ok(items),
    }
}

fn count(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| {
        DbError::new("sequence is too long to count").with_kind(linkq_error::ErrorKind::Overflow)
    })
}

pub(crate) fn evaluate_query(
    eval: &mut Evaluator,
    op: QueryOperator,
    args: &[Expr],
    datatype: &DataType,
) -> Result<Value> {
    use QueryOperator as Q;

    Ok(match op {
        Q::Where => Value::list(filtered(eval, op, args)?),
        Q::Select => {
            let selector = arg(op, args, 1)?;
            let items = source(eval, op, args)?;
            Value::list(
                items
                    .into_iter()
                    .map(|item| eval.apply(selector, &[item]))
                    .collect::<Result<Vec<_>>>()?,
            )
        }
        Q::SelectMany => {
            let selector = arg(op, args, 1)?;
            let mut out = Vec::new();
            for item in source(eval, op, args)? {
                let inner = eval
                    .apply(selector, std::slice::from_ref(&item))?
                    .into_sequence()?;
                match args.get(2) {
                    Some(result) => {
                        for c in inner {
                            out.push(eval.apply(result, &[item.clone(), c])?);
                        }
                    }
                    None => out.extend(inner),
                }
            }
            Value::list(out)
        }
        Q::OrderBy | Q::OrderByDescending | Q::ThenBy | Q::ThenByDescending => {
            Value::list(order(eval, op, args)?)
        }
        Q::Join => {
            let inner = eval.evaluate(arg(op, args, 1)?)?.into_sequence()?;
            let (outer_key, inner_key, result) =
                (arg(op, args, 2)?, arg(op, args, 3)?, arg(op, args, 4)?);

            let mut table: HashMap<Value, Vec<Value>> = HashMap::new();
            for item in inner {
                let key = eval.apply(inner_key, std::slice::from_ref(&item))?;
                if key.is_null() {
                    continue;
                }
                table.entry(key).or_default().push(item);
            }

            let mut out = Vec::new();
            for item in source(eval, op, args)? {
                let key = eval.apply(outer_key, std::slice::from_ref(&item))?;
                if key.is_null() {
                    continue;
                }
                if let Some(matches) = table.get(&key) {
                    for m in matches {
                        out.push(eval.apply(result, &[item.clone(), m.clone()])?);
                    }
                }
            }
            Value::list(out)
        }
        Q::GroupBy => {
            let key_selector = arg(op, args, 1)?;
            let mut groups: IndexMap<Value, Vec<Value>> = IndexMap::new();
            for item in source(eval, op, args)? {
                let key = eval.apply(key_selector, std::slice::from_ref(&item))?;
                let element = match args.get(2) {
                    Some(element_selector) => eval.apply(element_selector, &[item])?,
                    None => item,
                };
                groups.entry(key).or_default().push(element);
            }
            Value::list(
                groups
                    .into_iter()
                    .map(|(key, elements)| Value::Grouping(Arc::new(Grouping { key, elements }))),
            )
        }
        Q::Skip | Q::Take => {
            let n = eval.evaluate(arg(op, args, 1)?)?.try_as_i32()?;
            let n = usize::try_from(n).unwrap_or(0);
            let items = source(eval, op, args)?;
            if op == Q::Skip {
                Value::list(items.into_iter().skip(n))
            } else {
                Value::list(items.into_iter().take(n))
            }
        }
        Q::Distinct => {
            let mut seen = HashSet::new();
            Value::list(
                source(eval, op, args)?
                    .into_iter()
                    .filter(|item| seen.insert(item.clone())),
            )
        }
        // Related data is always loaded in memory.
        Q::Include | Q::ThenInclude => Value::list(source(eval, op, args)?),
        Q::Count => Value::Int32(count(filtered(eval, op, args)?.len())?),
        Q::LongCount => Value::Int64(filtered(eval, op, args)?.len() as i64),
        Q::Any => Value::Boolean(match args.get(1) {
            Some(pred) => {
                let mut any = false;
                for item in source(eval, op, args)? {
                    if eval.apply_predicate(pred, &[item])? {
                        any = true;
                        break;
                    }
                }
                any
            }
            None => !source(eval, op, args)?.is_empty(),
        }),
        Q::All => {
            let pred = arg(op, args, 1)?;
            let mut all = true;
            for item in source(eval, op, args)? {
                if !eval.apply_predicate(pred, &[item])? {
                    all = false;
                    break;
                }
            }
            Value::Boolean(all)
        }
        Q::Contains => {
            let needle = eval.evaluate(arg(op, args, 1)?)?;
            Value::Boolean(source(eval, op, args)?.contains(&needle))
        }
        Q::First | Q::FirstOrDefault => {
            match filtered(eval, op, args)?.into_iter().next() {
                Some(v) => v,
                None if op == Q::FirstOrDefault => datatype.default_value(),
                None => return Err(DbError::invalid_operation(NO_MATCH)),
            }
        }
        Q::Last | Q::LastOrDefault => match filtered(eval, op, args)?.pop() {
            Some(v) => v,
            None if op == Q::LastOrDefault => datatype.default_value(),
            None => return Err(DbError::invalid_operation(NO_MATCH)),
        },
        Q::Single | Q::SingleOrDefault => {
            let mut items = filtered(eval, op, args)?;
            match items.len() {
                0 if op == Q::SingleOrDefault => datatype.default_value(),
                0 => return Err(DbError::invalid_operation(NO_MATCH)),
                1 => items.swap_remove(0),
                _ => return Err(DbError::invalid_operation(MORE_THAN_ONE_MATCH)),
            }
        }
        Q::Sum => sum(projected(eval, op, args)?, datatype)?,
        Q::Min | Q::Max => {
            let mut best: Option<Value> = None;
            for v in projected(eval, op, args)? {
                if v.is_null() {
                    continue;
                }
                best = Some(match best {
                    None => v,
                    Some(b) => {
                        let ord = v.compare(&b)?;
                        let replace = if op == Q::Min {
                            ord == Ordering::Less
                        } else {
                            ord == Ordering::Greater
                        };
                        if replace { v } else { b }
                    }
                });
            }
            match best {
                Some(v) => evaluator::coerce(v, datatype)?,
                None if datatype.accepts_null() => Value::Null,
                None => return Err(DbError::invalid_operation(NO_ELEMENTS)),
            }
        }
        Q::Average => {
            let values: Vec<f64> = projected(eval, op, args)?
                .into_iter()
                .filter(|v| !v.is_null())
                .map(|v| v.try_as_f64())
                .collect::<Result<_>>()?;
            if values.is_empty() {
                if datatype.accepts_null() {
                    return Ok(Value::Null);
                }
                return Err(DbError::invalid_operation(NO_ELEMENTS));
            }
            Value::Float64(values.iter().sum::<f64>() / values.len() as f64)
        }
    })
}

/// Sum non-null values, starting from zero of the result type.
fn sum(values: Vec<Value>, datatype: &DataType) -> Result<Value> {
    let mut acc = datatype.non_nullable().default_value();
    for v in values.into_iter().filter(|v| !v.is_null()) {
        acc = evaluator::binary_value(
            super::BinaryOperator::Add,
            acc,
            v,
            datatype.non_nullable(),
        )?;
    }
    Ok(acc)
}

/// Evaluate an ordering chain.
///
/// `ThenBy` calls walk down to the `OrderBy` that started the chain, the
/// source of that call is sorted once by all keys.
fn order(eval: &mut Evaluator, op: QueryOperator, args: &[Expr]) -> Result<Vec<Value>> {
    use QueryOperator as Q;

    // Keys in reverse order while walking down.
    let mut keys = vec![(arg(op, args, 1)?, is_descending(op))];
    let mut current_op = op;
    let mut current_args = args;
    while matches!(current_op, Q::ThenBy | Q::ThenByDescending) {
        let inner = arg(current_op, current_args, 0)?;
        let (inner_op, inner_args) = match as_query_call(inner) {
            Some((
                inner_op @ (Q::OrderBy | Q::OrderByDescending | Q::ThenBy | Q::ThenByDescending),
                inner_args,
            )) => (inner_op, inner_args),
            _ => {
                return Err(DbError::invalid_operation(format!(
                    "{} requires an ordered sequence",
                    current_op.name()
                )));
            }
        };
        keys.push((arg(inner_op, inner_args, 1)?, is_descending(inner_op)));
        current_op = inner_op;
        current_args = inner_args;
    }
    keys.reverse();

    let items = source(eval, current_op, current_args)?;
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let item_keys = keys
            .iter()
            .map(|(selector, _)| eval.apply(selector, std::slice::from_ref(&item)))
            .collect::<Result<Vec<_>>>()?;
        keyed.push((item_keys, item));
    }

    let mut err = None;
    // Stable, equal keys keep source order.
    keyed.sort_by(|(a, _), (b, _)| {
        for ((ka, kb), (_, desc)) in a.iter().zip(b).zip(&keys) {
            match ka.compare(kb) {
                Ok(Ordering::Equal) => continue,
                Ok(ord) if *desc => return ord.reverse(),
                Ok(ord) => return ord,
                Err(e) => {
                    err.get_or_insert(e);
                    return Ordering::Equal;
                }
            }
        }
        Ordering::Equal
    });
    if let Some(err) = err {
        return Err(err);
    }

    Ok(keyed.into_iter().map(|(_, item)| item).collect())
}

fn is_descending(op: QueryOperator) -> bool {
    matches!(
        op,
        QueryOperator::OrderByDescending | QueryOperator::ThenByDescending
    )
}

#[cfg(test)]
mod tests {
    use linkq_error::ErrorKind;

    use super::*;
    use crate::expr::builder::*;
    use crate::types::CollectionKind;
    use crate::types::record::{PropertyDef, RecordType};
    use crate::values::ObjectRef;

    fn ints(values: impl IntoIterator<Item = i32>) -> Expr {
        collection(
            CollectionKind::List,
            DataType::Int32,
            values.into_iter().map(Value::Int32).collect(),
        )
    }

    fn run(op: QueryOperator, args: Vec<Expr>) -> Result<Value> {
        let call = call_enumerable(op, args)?;
        Evaluator::new().evaluate(&call)
    }

    fn int_list(values: impl IntoIterator<Item = i32>) -> Value {
        Value::list(values.into_iter().map(Value::Int32))
    }

    fn is_even() -> Expr {
        lambda1("x", DataType::Int32, |x| eq(rem(x, lit(2))?, lit(0))).unwrap()
    }

    #[test]
    fn paging() {
        let skipped = call_enumerable(QueryOperator::Skip, vec![ints(0..10), lit(3)]).unwrap();
        let out = run(QueryOperator::Take, vec![skipped, lit(4)]).unwrap();
        assert_eq!(int_list([3, 4, 5, 6]), out);

        // Negative counts clamp.
        assert_eq!(int_list(0..3), run(QueryOperator::Skip, vec![ints(0..3), lit(-2)]).unwrap());
    }

    #[test]
    fn single_edge_cases() {
        let none = lambda1("x", DataType::Int32, |x| gt(x, lit(100))).unwrap();
        let err = run(QueryOperator::Single, vec![ints(0..5), none.clone()]).unwrap_err();
        assert_eq!(NO_MATCH, err.message());
        assert_eq!(&ErrorKind::InvalidOperation, err.kind());

        let err = run(QueryOperator::Single, vec![ints(0..5), is_even()]).unwrap_err();
        assert_eq!(MORE_THAN_ONE_MATCH, err.message());

        let err = run(QueryOperator::SingleOrDefault, vec![ints(0..5), is_even()]).unwrap_err();
        assert_eq!(MORE_THAN_ONE_MATCH, err.message());

        let v = run(QueryOperator::SingleOrDefault, vec![ints(0..5), none]).unwrap();
        assert_eq!(Value::Int32(0), v);
    }

    #[test]
    fn first_only_fails_on_empty() {
        assert_eq!(Value::Int32(0), run(QueryOperator::First, vec![ints(0..5), is_even()]).unwrap());
        let err = run(QueryOperator::First, vec![ints([1, 3]), is_even()]).unwrap_err();
        assert_eq!(NO_MATCH, err.message());
        assert_eq!(
            Value::Int32(0),
            run(QueryOperator::FirstOrDefault, vec![ints([1, 3]), is_even()]).unwrap()
        );
        assert_eq!(Value::Int32(4), run(QueryOperator::Last, vec![ints(0..5), is_even()]).unwrap());
    }

    #[test]
    fn multi_key_ordering_is_stable() {
        let pair = RecordType::anonymous([
            PropertyDef::new("a", DataType::Int32),
            PropertyDef::new("b", DataType::Utf8),
        ]);
        let row = |a: i32, b: &str| {
            Value::Object(ObjectRef::with_values(pair.clone(), vec![a.into(), b.into()]).unwrap())
        };
        let rows = vec![row(2, "x"), row(1, "z"), row(2, "a"), row(1, "z"), row(1, "a")];
        let source = collection(CollectionKind::List, DataType::Record(pair.clone()), rows.clone());

        let ty = DataType::Record(pair.clone());
        let by_a = lambda1("p", ty.clone(), |p| member(p, "a")).unwrap();
        let by_b = lambda1("p", ty, |p| member(p, "b")).unwrap();
        let ordered = call_enumerable(QueryOperator::OrderBy, vec![source, by_a]).unwrap();
        let out = run(QueryOperator::ThenByDescending, vec![ordered, by_b]).unwrap();

        let expected = vec![
            rows[1].clone(),
            rows[3].clone(),
            rows[4].clone(),
            rows[0].clone(),
            rows[2].clone(),
        ];
        assert_eq!(Value::list(expected), out);
    }

    #[test]
    fn then_by_requires_order() {
        let key = lambda1("x", DataType::Int32, Ok).unwrap();
        let err = run(QueryOperator::ThenBy, vec![ints(0..3), key]).unwrap_err();
        assert!(err.message().contains("ordered sequence"));
    }

    #[test]
    fn group_by_keeps_first_seen_order() {
        let key = lambda1("x", DataType::Int32, |x| rem(x, lit(3))).unwrap();
        let out = run(QueryOperator::GroupBy, vec![ints([5, 3, 4, 6, 1]), key]).unwrap();
        let groups = out.into_sequence().unwrap();
        let keys: Vec<_> = groups
            .iter()
            .map(|g| match g {
                Value::Grouping(g) => g.key.clone(),
                other => panic!("not a grouping: {other}"),
            })
            .collect();
        assert_eq!(vec![Value::Int32(2), Value::Int32(0), Value::Int32(1)], keys);
        assert_eq!(Some(&[Value::Int32(3), Value::Int32(6)][..]), groups[1].as_sequence());
    }

    #[test]
    fn join_skips_null_keys() {
        let nullable = DataType::nullable(DataType::Int32);
        let outer = collection(
            CollectionKind::List,
            nullable.clone(),
            vec![Value::Int32(1), Value::Null, Value::Int32(2)],
        );
        let inner = collection(
            CollectionKind::List,
            nullable.clone(),
            vec![Value::Null, Value::Int32(2), Value::Int32(2)],
        );
        let key = || lambda1("k", nullable.clone(), Ok).unwrap();
        let result = lambda2(("o", "i"), (nullable.clone(), nullable.clone()), |o, _| Ok(o)).unwrap();
        let out = run(QueryOperator::Join, vec![outer, inner, key(), key(), result]).unwrap();
        assert_eq!(int_list([2, 2]), out);
    }

    #[test]
    fn aggregates() {
        assert_eq!(Value::Int32(10), run(QueryOperator::Sum, vec![ints(0..5)]).unwrap());
        assert_eq!(Value::Int32(0), run(QueryOperator::Sum, vec![ints(0..0)]).unwrap());
        assert_eq!(Value::Int32(4), run(QueryOperator::Max, vec![ints(0..5)]).unwrap());
        assert_eq!(Value::Float64(2.0), run(QueryOperator::Average, vec![ints(0..5)]).unwrap());

        let err = run(QueryOperator::Min, vec![ints(0..0)]).unwrap_err();
        assert_eq!(NO_ELEMENTS, err.message());

        let overflow = run(QueryOperator::Sum, vec![ints([i32::MAX, 1])]).unwrap_err();
        assert_eq!(&ErrorKind::Overflow, overflow.kind());
    }

    #[test]
    fn distinct_and_contains() {
        assert_eq!(
            int_list([1, 2, 3]),
            run(QueryOperator::Distinct, vec![ints([1, 2, 1, 3, 2])]).unwrap()
        );
        assert_eq!(
            Value::Boolean(true),
            run(QueryOperator::Contains, vec![ints([1, 2]), lit(2i64)]).unwrap()
        );
        assert_eq!(
            Value::Boolean(false),
            run(QueryOperator::All, vec![ints([2, 3]), is_even()]).unwrap()
        );
        assert_eq!(
            Value::Int32(2),
            run(QueryOperator::Count, vec![ints(0..4), is_even()]).unwrap()
        );
    }
}
