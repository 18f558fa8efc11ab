//! Deferred queries and the providers that execute them.
pub mod context;
pub mod execution;
pub mod provider;
pub mod queryable;
pub mod response;
pub mod result_mapper;
pub mod stream;

pub use self::context::QueryContext;
pub use self::execution::{ExecutionState, QueryExecution};
pub use self::provider::{AsyncDataProvider, DataProvider, StreamingDataProvider};
pub use self::queryable::Queryable;
pub use self::response::{QueryResponse, RemoteError};
pub use self::result_mapper::{FromValue, ResultMapper};
pub use self::stream::{CancellationToken, QueryStream};

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::StreamExt;
    use futures::executor::block_on;
    use futures::stream::BoxStream;
    use linkq_error::Result;

    use super::*;
    use crate::config::QueryConfig;
    use crate::executor::{ExecutorDataProvider, ExpressionExecutor};
    use crate::expr::builder::*;
    use crate::expr::method::QueryOperator;
    use crate::ir::Expression;
    use crate::testutil::TestModel;
    use crate::translate::MemoryResourceProvider;
    use crate::types::DataType;
    use crate::types::record::{PropertyDef, RecordType};
    use crate::values::dataset::MemoryDataSet;
    use crate::values::{ObjectRef, Value};

    /// Wraps the executor provider, counting calls and pulled elements.
    #[derive(Debug)]
    struct CountingProvider {
        inner: ExecutorDataProvider,
        calls: AtomicUsize,
        pulls: Arc<AtomicUsize>,
    }

    impl DataProvider for CountingProvider {
        fn execute(&self, query: &Expression) -> Result<QueryResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.execute(query)
        }
    }

    impl AsyncDataProvider for CountingProvider {
        fn execute_async(
            &self,
            query: Expression,
        ) -> futures::future::BoxFuture<'static, Result<QueryResponse>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.execute_async(query)
        }
    }

    impl StreamingDataProvider for CountingProvider {
        fn execute_stream(&self, query: Expression) -> BoxStream<'static, Result<QueryResponse>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let pulls = self.pulls.clone();
            self.inner
                .execute_stream(query)
                .inspect(move |_| {
                    pulls.fetch_add(1, Ordering::SeqCst);
                })
                .boxed()
        }
    }

    struct Fixture {
        model: TestModel,
        provider: Arc<CountingProvider>,
        context: QueryContext,
    }

    impl Fixture {
        fn new() -> Self {
            let model = TestModel::new();
            let resources = MemoryResourceProvider::new();
            resources.register(model.product_set());
            resources.register(Arc::new(MemoryDataSet::new(
                DataType::Int32,
                (0..10).rev().map(Value::Int32).collect(),
            )));

            let executor = ExpressionExecutor::with_defaults(
                model.mapper(),
                Arc::new(resources),
                &QueryConfig::default(),
            );
            let provider = Arc::new(CountingProvider {
                inner: ExecutorDataProvider::new(executor),
                calls: AtomicUsize::new(0),
                pulls: Arc::new(AtomicUsize::new(0)),
            });
            let context = QueryContext::new(model.mapper(), QueryConfig::default())
                .with_provider(provider.clone())
                .with_async_provider(provider.clone())
                .with_streaming_provider(provider.clone());

            Fixture {
                model,
                provider,
                context,
            }
        }

        fn products(&self) -> Queryable {
            self.context.query(self.model.product_type())
        }

        fn calls(&self) -> usize {
            self.provider.calls.load(Ordering::SeqCst)
        }
    }

    fn ids(values: Vec<Value>) -> Vec<i32> {
        values
            .into_iter()
            .map(|v| ObjectRef::from_value(v).unwrap().get("id").unwrap().try_as_i32().unwrap())
            .collect()
    }

    #[test]
    fn nothing_runs_until_terminal() {
        logutil::init_test();
        let fixture = Fixture::new();
        let query = fixture
            .products()
            .filter(|x| eq(member(x, "name")?, lit("Car")))
            .unwrap()
            .order_by_descending(|x| member(x, "price"))
            .unwrap();
        assert_eq!(0, fixture.calls());

        assert_eq!(vec![13, 12], ids(query.to_vec().unwrap()));
        assert_eq!(1, fixture.calls());
        assert_eq!(2, query.count().unwrap());
        assert_eq!(2, fixture.calls());
    }

    #[test]
    fn single_edge_cases() {
        let fixture = Fixture::new();
        let products = fixture.products();

        let err = products
            .single_where(|x| eq(member(x, "name")?, lit("Boat")))
            .unwrap_err();
        assert_eq!("InvalidOperation", err.type_name());
        assert_eq!("sequence contains no matching element", err.message());

        let err = products
            .single_where(|x| eq(member(x, "name")?, lit("Car")))
            .unwrap_err();
        assert_eq!("sequence contains more than one matching element", err.message());

        let none = products
            .single_or_default_where(|x| eq(member(x, "name")?, lit("Boat")))
            .unwrap();
        assert_eq!(Value::Null, none);

        let apple = products
            .single_where(|x| eq(member(x, "name")?, lit("Apple")))
            .unwrap();
        assert_eq!(10, ids(vec![apple])[0]);

        // First only fails on no matches.
        let first = products
            .first_where(|x| eq(member(x, "name")?, lit("Car")))
            .unwrap();
        assert_eq!(12, ids(vec![first])[0]);
        let err = products
            .first_where(|x| gt(member(x, "id")?, lit(100)))
            .unwrap_err();
        assert_eq!("sequence contains no matching element", err.message());
    }

    #[test]
    fn paging() {
        let fixture = Fixture::new();
        let page = fixture
            .context
            .query(DataType::Int32)
            .order_by(Ok)
            .unwrap()
            .skip(3)
            .unwrap()
            .take(4)
            .unwrap()
            .to_vec()
            .unwrap();
        assert_eq!(
            vec![3, 4, 5, 6],
            Vec::<i32>::from_value(Value::list(page)).unwrap()
        );
    }

    #[test]
    fn anonymous_projection() {
        let fixture = Fixture::new();
        let shape = RecordType::anonymous([
            PropertyDef::new("category", DataType::Utf8),
            PropertyDef::new("amount", DataType::Float64),
        ]);
        let rows = fixture
            .products()
            .select(|x| new_record(&shape, vec![member(x.clone(), "name")?, member(x, "price")?]))
            .unwrap()
            .to_vec()
            .unwrap();

        assert_eq!(3, rows.len());
        let car = ObjectRef::from_value(rows[1].clone()).unwrap();
        assert_eq!(&shape, car.record_type());
        assert_eq!(Value::from("Car"), car.get("category").unwrap());
        assert_eq!(Value::Float64(9000.0), car.get("amount").unwrap());

        // Anonymous values compare structurally.
        let expected = ObjectRef::with_values(
            shape.clone(),
            vec![Value::from("Car"), Value::Float64(9000.0)],
        )
        .unwrap();
        assert_eq!(Value::Object(expected), rows[1]);
    }

    #[test]
    fn grouping_keeps_first_seen_order() {
        let fixture = Fixture::new();
        let shape = RecordType::anonymous([
            PropertyDef::new("name", DataType::Utf8),
            PropertyDef::new("count", DataType::Int32),
        ]);
        let rows = fixture
            .products()
            .group_by(|x| member(x, "name"))
            .unwrap()
            .select(|g| {
                new_record(
                    &shape,
                    vec![
                        member(g.clone(), "Key")?,
                        call_enumerable(QueryOperator::Count, vec![g])?,
                    ],
                )
            })
            .unwrap()
            .to_vec()
            .unwrap();

        let summary: Vec<(String, i32)> = rows
            .into_iter()
            .map(|row| {
                let row = ObjectRef::from_value(row).unwrap();
                (
                    String::from_value(row.get("name").unwrap()).unwrap(),
                    row.get("count").unwrap().try_as_i32().unwrap(),
                )
            })
            .collect();
        assert_eq!(
            vec![("Apple".to_string(), 1), ("Car".to_string(), 2)],
            summary
        );
    }

    #[test]
    fn remote_errors_keep_type() {
        let fixture = Fixture::new();
        let err = fixture
            .products()
            .count_where(|x| eq(div(member(x, "id")?, lit(0))?, lit(1)))
            .unwrap_err();
        assert_eq!("DivideByZero", err.type_name());
    }

    #[test]
    fn dictionary_keys() {
        let fixture = Fixture::new();
        let by_id = fixture.products().to_dictionary(|x| member(x, "id")).unwrap();
        assert_eq!(
            vec![Value::Int32(10), Value::Int32(12), Value::Int32(13)],
            by_id.keys().cloned().collect::<Vec<_>>()
        );

        let err = fixture
            .products()
            .to_dictionary(|x| member(x, "name"))
            .unwrap_err();
        assert_eq!("an item with the same key has already been added", err.message());
    }

    #[test]
    fn aggregates() {
        let fixture = Fixture::new();
        let prices = fixture.products().select(|x| member(x, "price")).unwrap();
        assert_eq!(Value::Float64(21001.5), prices.sum().unwrap());
        assert_eq!(Value::Float64(1.5), prices.min().unwrap());
        assert_eq!(Value::Float64(12000.0), prices.max().unwrap());
        assert_eq!(Value::Float64(7000.5), prices.average().unwrap());
        assert!(prices.contains(Value::Float64(1.5)).unwrap());
        assert!(prices.all(|p| gt(p, lit(1.0))).unwrap());
        assert_eq!(3, fixture.products().long_count().unwrap());

        let empty = prices.filter(|p| lt(p, lit(0.0))).unwrap();
        let err = empty.max().unwrap_err();
        assert_eq!("sequence contains no elements", err.message());
        assert!(!empty.any().unwrap());
    }

    #[test]
    fn async_terminals() {
        let fixture = Fixture::new();
        let products = fixture.products();
        block_on(async {
            assert_eq!(3, products.count_async().await.unwrap());
            assert_eq!(vec![10, 12, 13], ids(products.to_vec_async().await.unwrap()));
            let last = products.last_async().await.unwrap();
            assert_eq!(vec![13], ids(vec![last]));

            let err = products.single_async().await.unwrap_err();
            assert_eq!("sequence contains more than one matching element", err.message());
        });
        assert_eq!(4, fixture.calls());
    }

    #[test]
    fn streaming_with_cancellation() {
        let fixture = Fixture::new();
        let token = CancellationToken::new();
        let mut stream = fixture.products().stream(token.clone()).unwrap();

        block_on(async {
            let first = stream.next().await.unwrap().unwrap();
            assert_eq!(vec![10], ids(vec![first]));

            token.cancel();
            let err = stream.next().await.unwrap().unwrap_err();
            assert_eq!("Cancelled", err.type_name());
            assert!(stream.next().await.is_none());
        });

        // Remaining elements were never pulled.
        assert_eq!(1, fixture.provider.pulls.load(Ordering::SeqCst));
    }

    #[test]
    fn streaming_to_completion() {
        let fixture = Fixture::new();
        let stream = fixture
            .context
            .query(DataType::Int32)
            .filter(|x| lt(x, lit(3)))
            .unwrap()
            .stream(CancellationToken::new())
            .unwrap();
        let values: Vec<i32> = block_on(stream.map(|v| v.unwrap().try_as_i32().unwrap()).collect());
        assert_eq!(vec![2, 1, 0], values);
    }

    #[test]
    fn missing_provider() {
        let model = TestModel::new();
        let context = QueryContext::new(model.mapper(), QueryConfig::default());
        let err = context.query(model.product_type()).count().unwrap_err();
        assert!(err.to_string().contains("No data provider"), "{err}");
    }
}
