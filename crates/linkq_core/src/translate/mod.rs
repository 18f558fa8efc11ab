//! Translation between native expression trees and IR.
pub mod forward;
pub mod policy;
pub mod resource;
pub mod reverse;

pub use self::forward::ForwardTranslator;
pub use self::policy::{ArgumentTreatment, DefaultArgumentPolicy, QueryArgumentPolicy};
pub use self::resource::{MemoryResourceProvider, ResourceProvider};
pub use self::reverse::{ReverseTranslator, TranslatedQuery};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::config::QueryConfig;
    use crate::dynamic::DynamicValue;
    use crate::expr::builder::*;
    use crate::expr::evaluator::Evaluator;
    use crate::expr::method::{LocalFunction, QueryOperator, StringMethod};
    use crate::expr::{CapturedVariable, Expr};
    use crate::ir::{ConstantValue, Expression, VariableArgument};
    use crate::testutil::{TestModel, product};
    use crate::types::DataType;
    use crate::values::{QueryableValue, Value};

    fn remote_products(model: &TestModel) -> Expr {
        constant(
            Value::Queryable(QueryableValue::Remote(model.product_type())),
            DataType::queryable(model.product_type()),
        )
    }

    fn forward(model: &TestModel) -> ForwardTranslator {
        ForwardTranslator::new(model.mapper(), &QueryConfig::default())
    }

    fn reverse_with_data(model: &TestModel) -> ReverseTranslator {
        let provider = MemoryResourceProvider::new();
        provider.register(model.product_set());
        ReverseTranslator::new(model.mapper()).with_resources(Arc::new(provider))
    }

    /// Send IR through json like a real boundary would.
    fn over_wire(expr: &Expression) -> Expression {
        let json = serde_json::to_string(expr).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    fn ids(value: Value) -> Vec<i32> {
        value
            .into_sequence()
            .unwrap()
            .iter()
            .map(|p| p.try_as_object().unwrap().get("id").unwrap().try_as_i32().unwrap())
            .collect()
    }

    #[test]
    fn filter_through_boundary() {
        let model = TestModel::new();
        let pred = lambda1("x", model.product_type(), |x| eq(member(x, "name")?, lit("Car"))).unwrap();
        let query = call_query(QueryOperator::Where, vec![remote_products(&model), pred]).unwrap();

        let ir = forward(&model).translate(&query).unwrap();
        assert_eq!(
            "Queryable.Where(Resource<shop.Product>, x => (x.name == 'Car'))",
            ir.to_string()
        );

        let rebuilt = reverse_with_data(&model).translate(&over_wire(&ir)).unwrap();
        let result = Evaluator::new().evaluate(&rebuilt.expr).unwrap();
        assert_eq!(vec![12, 13], ids(result));
    }

    #[test]
    fn sampled_predicates_round_trip() {
        let model = TestModel::new();
        let mut rng = StdRng::seed_from_u64(7);
        let names = ["Apple", "Car", "Carrot", "Bike", ""];

        for _ in 0..20 {
            let min_id: i32 = rng.random_range(0..20);
            let max_price: f64 = rng.random_range(0.0..100.0);
            let prefix = names[rng.random_range(0..names.len())];

            let pred = lambda1("x", model.product_type(), |x| {
                let by_id = gt(member(x.clone(), "id")?, lit(min_id))?;
                let by_name = call_string(
                    StringMethod::StartsWith,
                    Some(member(x.clone(), "name")?),
                    vec![lit(prefix)],
                )?;
                let by_price = lt(member(x, "price")?, lit(max_price))?;
                or(and(by_id, by_name)?, by_price)
            })
            .unwrap();

            let ir = forward(&model).translate(&pred).unwrap();
            let rebuilt = reverse_with_data(&model).translate(&over_wire(&ir)).unwrap();

            for _ in 0..10 {
                let sample = product(
                    &model,
                    rng.random_range(0..20),
                    names[rng.random_range(0..names.len())],
                    rng.random_range(0.0..100.0),
                );
                let expected = Evaluator::new().apply(&pred, &[sample.clone()]).unwrap();
                let actual = Evaluator::new().apply(&rebuilt.expr, &[sample]).unwrap();
                assert_eq!(expected, actual, "predicate: {pred}");
            }
        }
    }

    #[test]
    fn retranslation_is_idempotent() {
        let model = TestModel::new();
        let min = CapturedVariable::new("min", DataType::Int32, Value::Int32(11));
        let pred = lambda1("x", model.product_type(), |x| gt(member(x, "id")?, captured(&min))).unwrap();
        let filtered = call_query(QueryOperator::Where, vec![remote_products(&model), pred]).unwrap();
        let query = call_query(QueryOperator::Count, vec![filtered]).unwrap();

        let first = forward(&model).translate(&query).unwrap();
        let rebuilt = ReverseTranslator::new(model.mapper()).translate(&first).unwrap();
        let second = forward(&model).translate(&rebuilt.expr).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn terminal_generics_stripped() {
        let model = TestModel::new();
        let query = call_query(QueryOperator::First, vec![remote_products(&model)]).unwrap();
        let ir = forward(&model).translate(&query).unwrap();
        match &ir {
            Expression::MethodCall { method, .. } => assert!(method.generic_arguments.is_empty()),
            other => panic!("unexpected {other}"),
        }

        // Inferred again on the way back.
        let rebuilt = ReverseTranslator::new(model.mapper()).translate(&ir).unwrap();
        assert_eq!(model.product_type(), rebuilt.expr.datatype());
    }

    #[test]
    fn shared_captures_share_instance() {
        let model = TestModel::new();
        let id = CapturedVariable::new("id", DataType::Int32, Value::Int32(12));
        let pred = lambda1("x", model.product_type(), |x| {
            let lower = ge(member(x.clone(), "id")?, captured(&id))?;
            let upper = le(member(x, "id")?, captured(&id))?;
            and(lower, upper)
        })
        .unwrap();

        let ir = forward(&model).translate(&pred).unwrap();
        let vars = ir.variable_arguments();
        assert_eq!(1, vars.len());
        assert_eq!("id", vars[0].name());

        let rebuilt = reverse_with_data(&model).translate(&ir).unwrap();
        let mut cells = Vec::new();
        rebuilt.expr.walk(&mut |e| {
            if let Expr::Captured(c) = e {
                cells.push(c.clone());
            }
        });
        assert_eq!(2, cells.len());
        assert!(Arc::ptr_eq(&cells[0], &cells[1]));
    }

    #[test]
    fn distinct_captures_with_same_name() {
        let model = TestModel::new();
        let lower = CapturedVariable::new("bound", DataType::Int32, Value::Int32(11));
        let upper = CapturedVariable::new("bound", DataType::Int32, Value::Int32(13));
        let above = lambda1("x", model.product_type(), |x| gt(member(x, "id")?, captured(&lower))).unwrap();
        let below = lambda1("x", model.product_type(), |x| lt(member(x, "id")?, captured(&upper))).unwrap();
        let query = call_query(QueryOperator::Where, vec![remote_products(&model), above]).unwrap();
        let query = call_query(QueryOperator::Where, vec![query, below]).unwrap();

        let ir = forward(&model).translate(&query).unwrap();
        let names: Vec<String> = ir
            .variable_arguments()
            .iter()
            .map(|v| v.name().to_string())
            .collect();
        assert_eq!(vec!["bound".to_string(), "bound_1".to_string()], names);

        let rebuilt = reverse_with_data(&model).translate(&over_wire(&ir)).unwrap();
        assert_eq!(vec![12], ids(Evaluator::new().evaluate(&rebuilt.expr).unwrap()));

        rebuilt.rebind("bound_1", Value::Int32(14)).unwrap();
        assert_eq!(vec![12, 13], ids(Evaluator::new().evaluate(&rebuilt.expr).unwrap()));
    }

    #[test]
    fn rebinding_variables() {
        let model = TestModel::new();
        let wanted = CapturedVariable::new(
            "wanted",
            DataType::list(DataType::Int32),
            Value::list([Value::Int32(10)]),
        );
        let pred = lambda1("x", model.product_type(), |x| {
            call_enumerable(QueryOperator::Contains, vec![captured(&wanted), member(x, "id")?])
        })
        .unwrap();
        let query = call_query(QueryOperator::Where, vec![remote_products(&model), pred]).unwrap();

        let ir = forward(&model).translate(&query).unwrap();
        assert!(matches!(ir.variable_arguments()[0], VariableArgument::List(_)));

        let rebuilt = reverse_with_data(&model).translate(&over_wire(&ir)).unwrap();
        assert_eq!(vec![10], ids(Evaluator::new().evaluate(&rebuilt.expr).unwrap()));

        rebuilt
            .rebind("wanted", Value::list([Value::Int32(12), Value::Int32(13)]))
            .unwrap();
        assert_eq!(vec![12, 13], ids(Evaluator::new().evaluate(&rebuilt.expr).unwrap()));

        // Same thing, but substituted in the IR.
        let mut ir = ir;
        ir.set_variable("wanted", DynamicValue::list([DynamicValue::Int32(13)]))
            .unwrap();
        let rebuilt = reverse_with_data(&model).translate(&ir).unwrap();
        assert_eq!(vec![13], ids(Evaluator::new().evaluate(&rebuilt.expr).unwrap()));
    }

    #[test]
    fn long_collections_become_variables() {
        let model = TestModel::new();
        let config = QueryConfig {
            inline_collection_max_len: 2,
            ..Default::default()
        };
        let translator = ForwardTranslator::new(model.mapper(), &config);

        let short = collection(
            crate::types::CollectionKind::Array,
            DataType::Int32,
            vec![Value::Int32(1), Value::Int32(2)],
        );
        let long = collection(
            crate::types::CollectionKind::Array,
            DataType::Int32,
            vec![Value::Int32(1), Value::Int32(2), Value::Int32(3)],
        );

        let ir = translator.translate(&short).unwrap();
        assert!(matches!(ir, Expression::Collection { ref items, .. } if items.len() == 2));

        let ir = translator.translate(&long).unwrap();
        match ir {
            Expression::Constant {
                value: ConstantValue::VariableList(list),
                ..
            } => {
                assert_eq!("arg0", list.name);
                assert_eq!(3, list.values.len());
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn object_constants_snapshotted_once() {
        let model = TestModel::new();
        let car = product(&model, 12, "Car", 1.0);
        let pred = lambda1("x", model.product_type(), |x| {
            or(
                eq(x.clone(), constant(car.clone(), model.product_type()))?,
                eq(x, constant(car.clone(), model.product_type()))?,
            )
        })
        .unwrap();

        let ir = forward(&model).translate(&pred).unwrap();
        let mut ids = Vec::new();
        ir.walk(&mut |e| {
            if let Expression::Constant {
                value: ConstantValue::Argument(arg),
                ..
            } = e
            {
                ids.push(arg.instance_id);
            }
        });
        assert_eq!(vec![0, 0], ids);

        // Both sides see the same instance after rebuilding.
        let rebuilt = reverse_with_data(&model).translate(&ir).unwrap();
        let mut values = Vec::new();
        rebuilt.expr.walk(&mut |e| {
            if let Expr::Constant { value, .. } = e {
                values.push(value.clone());
            }
        });
        assert_eq!(values[0], values[1]);
    }

    #[test]
    fn local_only_nodes_rejected() {
        let model = TestModel::new();
        let f = LocalFunction::new("score", vec![DataType::Int32], DataType::Int32, |args: &[Value]| {
            Ok(args[0].clone())
        });
        let pred = lambda1("x", model.product_type(), |x| {
            gt(call_local(&f, vec![member(x, "id")?])?, lit(1))
        })
        .unwrap();

        let err = forward(&model).translate(&pred).unwrap_err();
        assert!(err.to_string().contains("score"), "{err}");
    }

    #[test]
    fn unknown_resource_fails() {
        let model = TestModel::new();
        let query = call_query(
            QueryOperator::Count,
            vec![constant(
                Value::Queryable(QueryableValue::Remote(DataType::Int32)),
                DataType::queryable(DataType::Int32),
            )],
        )
        .unwrap();
        let ir = forward(&model).translate(&query).unwrap();
        let err = reverse_with_data(&model).translate(&ir).unwrap_err();
        assert!(err.to_string().contains("No data set"), "{err}");
    }
}
