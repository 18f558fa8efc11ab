//! Pre-evaluation of sub-trees before a query leaves the process.
use linkq_error::Result;
use tracing::trace;

use super::evaluator::Evaluator;
use super::method::MethodKind;
use super::{Expr, is_local_call};
use crate::values::Value;

/// Decides if a single node may be evaluated in this process.
///
/// A sub-tree is only evaluated when every node in it passes.
pub trait LocalEvaluation: Send + Sync {
    fn can_evaluate_locally(&self, expr: &Expr) -> bool;
}

impl<F> LocalEvaluation for F
where
    F: Fn(&Expr) -> bool + Send + Sync,
{
    fn can_evaluate_locally(&self, expr: &Expr) -> bool {
        self(expr)
    }
}

/// Everything except lambdas, their parameters, and anything touching a
/// queryable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLocalEvaluation;

impl LocalEvaluation for DefaultLocalEvaluation {
    fn can_evaluate_locally(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Parameter { .. } | Expr::Lambda { .. } => false,
            Expr::Constant {
                value: Value::Queryable(_),
                ..
            } => false,
            Expr::Call { method, .. } => !matches!(method.kind, MethodKind::Query(_)),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct NodeInfo {
    /// Whole sub-tree can be evaluated here.
    evaluable: bool,
    /// Sub-tree references something that can't leave the process.
    needs_local: bool,
}

/// Replaces evaluable sub-trees with constants.
///
/// Sub-trees that can't be sent elsewhere (local function calls, opaque
/// handles) are always replaced. Other evaluable sub-trees are only replaced
/// when `evaluate_all` is set. Bare constants and captured variables are never
/// folded on their own.
pub struct PartialEvaluator<'a> {
    local: &'a dyn LocalEvaluation,
    evaluate_all: bool,
}

impl<'a> PartialEvaluator<'a> {
    pub fn new(local: &'a dyn LocalEvaluation, evaluate_all: bool) -> Self {
        PartialEvaluator {
            local,
            evaluate_all,
        }
    }

    pub fn evaluate(&self, expr: &Expr) -> Result<Expr> {
        let (expr, info) = self.visit(expr)?;
        if info.evaluable && self.should_fold(&expr, info) {
            return fold(&expr);
        }
        Ok(expr)
    }

    fn visit(&self, expr: &Expr) -> Result<(Expr, NodeInfo)> {
        let mut infos = Vec::new();
        let rebuilt = expr.try_map_children(&mut |child| {
            let (child, info) = self.visit(child)?;
            infos.push(info);
            Ok(child)
        })?;

        let info = NodeInfo {
            evaluable: self.local.can_evaluate_locally(expr) && infos.iter().all(|i| i.evaluable),
            needs_local: is_local_call(expr)
                || holds_local_value(expr)
                || infos.iter().any(|i| i.needs_local),
        };
        if info.evaluable {
            // Parent decides.
            return Ok((rebuilt, info));
        }

        let mut idx = 0;
        let rebuilt = rebuilt.try_map_children(&mut |child| {
            let child_info = infos[idx];
            idx += 1;
            if child_info.evaluable && self.should_fold(child, child_info) {
                fold(child)
            } else {
                Ok(child.clone())
            }
        })?;

        Ok((rebuilt, info))
    }

    fn should_fold(&self, expr: &Expr, info: NodeInfo) -> bool {
        if info.needs_local {
            return true;
        }
        self.evaluate_all && !matches!(expr, Expr::Constant { .. } | Expr::Captured(_))
    }
}

fn holds_local_value(expr: &Expr) -> bool {
    let local = |v: &Value| !v.is_transportable() && !matches!(v, Value::Queryable(_));
    match expr {
        Expr::Constant { value, .. } => local(value),
        Expr::Captured(var) => local(&var.get()),
        _ => false,
    }
}

fn fold(expr: &Expr) -> Result<Expr> {
    let value = Evaluator::new().evaluate(expr)?;
    trace!(%expr, %value, "folded local sub-tree");
    Ok(Expr::Constant {
        value,
        datatype: expr.datatype(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::builder::*;
    use crate::expr::method::LocalFunction;
    use crate::expr::CapturedVariable;
    use crate::types::DataType;
    use crate::values::OpaqueValue;

    fn threshold() -> std::sync::Arc<LocalFunction> {
        LocalFunction::new(
            "threshold",
            vec![DataType::Opaque("Settings".into())],
            DataType::Int32,
            |args: &[Value]| match &args[0] {
                Value::Opaque(o) => Ok(Value::Int32(*o.downcast_ref::<i32>().unwrap_or(&0))),
                _ => Ok(Value::Int32(0)),
            },
        )
    }

    #[test]
    fn local_calls_are_folded() {
        let settings = CapturedVariable::new(
            "settings",
            DataType::Opaque("Settings".into()),
            Value::Opaque(OpaqueValue::new("Settings", 7i32)),
        );
        let f = threshold();
        let pred = lambda1("x", DataType::Int32, |x| {
            gt(x, call_local(&f, vec![captured(&settings)])?)
        })
        .unwrap();

        let out = PartialEvaluator::new(&DefaultLocalEvaluation, false)
            .evaluate(&pred)
            .unwrap();
        assert_eq!("x => (x > 7)", out.to_string());
    }

    #[test]
    fn parameters_block_folding() {
        let pred = lambda1("x", DataType::Int32, |x| gt(add(x, lit(1))?, add(lit(1), lit(2))?))
            .unwrap();

        let out = PartialEvaluator::new(&DefaultLocalEvaluation, false)
            .evaluate(&pred)
            .unwrap();
        assert_eq!("x => ((x + 1) > (1 + 2))", out.to_string());

        let out = PartialEvaluator::new(&DefaultLocalEvaluation, true)
            .evaluate(&pred)
            .unwrap();
        assert_eq!("x => ((x + 1) > 3)", out.to_string());
    }

    #[test]
    fn captured_kept_addressable() {
        let var = CapturedVariable::new("min", DataType::Int32, Value::Int32(4));
        let pred = lambda1("x", DataType::Int32, |x| gt(x, captured(&var))).unwrap();
        let out = PartialEvaluator::new(&DefaultLocalEvaluation, true)
            .evaluate(&pred)
            .unwrap();
        assert!(matches!(
            out.as_lambda().unwrap().1,
            Expr::Binary { right, .. } if matches!(right.as_ref(), Expr::Captured(_))
        ));
    }

    #[test]
    fn custom_policy() {
        let never = |_: &Expr| false;
        let e = add(lit(1), lit(2)).unwrap();
        let out = PartialEvaluator::new(&never, true).evaluate(&e).unwrap();
        assert_eq!("(1 + 2)", out.to_string());
    }
}
