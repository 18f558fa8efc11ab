//! Queries that cross a JSON boundary between a client and a server with
//! independently declared types.
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{TimeZone, Utc};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use linkq_core::config::QueryConfig;
use linkq_core::dynamic::mapper::DynamicObjectMapper;
use linkq_core::executor::ExpressionExecutor;
use linkq_core::expr::CapturedVariable;
use linkq_core::expr::builder::*;
use linkq_core::expr::method::QueryOperator;
use linkq_core::ir::Expression;
use linkq_core::query::*;
use linkq_core::translate::MemoryResourceProvider;
use linkq_core::types::DataType;
use linkq_core::types::emitter::TypeEmitter;
use linkq_core::types::record::{PropertyDef, RecordType};
use linkq_core::types::registry::TypeRegistry;
use linkq_core::types::resolver::{DefaultTypeResolver, NamespaceMapping, NamespaceMappingResolver};
use linkq_core::values::dataset::MemoryDataSet;
use linkq_core::values::{ObjectRef, Value};
use linkq_error::{Result, ResultExt};

/// Customer and order types declared under a namespace. The two types
/// reference each other.
struct Model {
    customer: Arc<RecordType>,
    order: Arc<RecordType>,
}

impl Model {
    fn new(namespace: &str) -> Self {
        let customer = RecordType::declare(namespace, "Customer");
        let order = RecordType::declare(namespace, "Order");
        customer
            .define([
                PropertyDef::new("name", DataType::Utf8),
                PropertyDef::new("orders", DataType::list(DataType::Record(order.clone()))),
            ])
            .unwrap();
        order
            .define([
                PropertyDef::new("id", DataType::Int32),
                PropertyDef::new("customer", DataType::Record(customer.clone())),
                PropertyDef::new("total", DataType::Float64),
                PropertyDef::new("placed", DataType::Timestamp),
            ])
            .unwrap();
        Model { customer, order }
    }

    fn registry(&self) -> Arc<TypeRegistry> {
        let registry = Arc::new(TypeRegistry::new());
        registry.register(self.customer.clone()).unwrap();
        registry.register(self.order.clone()).unwrap();
        registry
    }

    fn customer_type(&self) -> DataType {
        DataType::Record(self.customer.clone())
    }

    fn order_type(&self) -> DataType {
        DataType::Record(self.order.clone())
    }

    /// Customers and their orders. Ann has orders 1 and 2, Bob has orders 3
    /// and 4.
    fn data(&self) -> (Vec<Value>, Vec<Value>) {
        let mut customers = Vec::new();
        let mut all = Vec::new();
        for (name, orders) in [
            ("Ann", [(1, 40.0, (2023, 12, 30)), (2, 75.5, (2024, 1, 2))]),
            ("Bob", [(3, 120.0, (2024, 1, 5)), (4, 15.0, (2024, 2, 1))]),
        ] {
            let customer = ObjectRef::build(&self.customer, [("name", Value::from(name))]).unwrap();
            let placed: Vec<Value> = orders
                .into_iter()
                .map(|(id, total, (y, m, d))| {
                    let at = Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap();
                    let order = ObjectRef::build(
                        &self.order,
                        [
                            ("id", Value::Int32(id)),
                            ("customer", Value::Object(customer.clone())),
                            ("total", Value::Float64(total)),
                            ("placed", Value::Timestamp(at)),
                        ],
                    )
                    .unwrap();
                    Value::Object(order)
                })
                .collect();
            customer.set("orders", Value::list(placed.clone())).unwrap();
            customers.push(Value::Object(customer));
            all.extend(placed);
        }
        (customers, all)
    }
}

/// Provider that only ever hands JSON text to the server.
#[derive(Debug)]
struct JsonWire {
    server: Arc<ExpressionExecutor>,
    requests: AtomicUsize,
}

impl JsonWire {
    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

fn encode_query(query: &Expression) -> Result<String> {
    serde_json::to_string(query).context("failed to encode query")
}

fn decode_response(response: &str) -> Result<QueryResponse> {
    serde_json::from_str(response).context("failed to decode response")
}

fn serve(server: &ExpressionExecutor, request: &str) -> Result<String> {
    let query: Expression = serde_json::from_str(request).context("failed to decode query")?;
    serde_json::to_string(&server.execute(&query)).context("failed to encode response")
}

impl DataProvider for JsonWire {
    fn execute(&self, query: &Expression) -> Result<QueryResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let request = encode_query(query)?;
        decode_response(&serve(&self.server, &request)?)
    }
}

impl AsyncDataProvider for JsonWire {
    fn execute_async(&self, query: Expression) -> BoxFuture<'static, Result<QueryResponse>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let server = self.server.clone();
        async move {
            let request = encode_query(&query)?;
            let response = tokio::spawn(async move { serve(&server, &request) })
                .await
                .context("server task failed")??;
            decode_response(&response)
        }
        .boxed()
    }
}

impl StreamingDataProvider for JsonWire {
    fn execute_stream(&self, query: Expression) -> BoxStream<'static, Result<QueryResponse>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let decoded = encode_query(&query).and_then(|request| {
            serde_json::from_str::<Expression>(&request).context("failed to decode query")
        });
        let responses = match decoded {
            Ok(query) => self.server.execute_stream(&query),
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };
        responses
            .map(|response| {
                let encoded =
                    serde_json::to_string(&response).context("failed to encode response")?;
                decode_response(&encoded)
            })
            .boxed()
    }
}

struct Setup {
    client: Model,
    wire: Arc<JsonWire>,
    context: QueryContext,
}

impl Setup {
    fn new() -> Self {
        logutil::init_test();
        let config = QueryConfig::default();

        let store = Model::new("store");
        let server_emitter = Arc::new(TypeEmitter::from_config(&config));
        let server_resolver = Arc::new(NamespaceMappingResolver::new(
            Arc::new(DefaultTypeResolver::new(store.registry(), server_emitter.clone())),
            vec![NamespaceMapping::new("client", "store")],
        ));
        let resources = MemoryResourceProvider::new();
        let (customers, orders) = store.data();
        resources.register(Arc::new(MemoryDataSet::new(store.customer_type(), customers)));
        resources.register(Arc::new(MemoryDataSet::new(store.order_type(), orders)));
        let server = ExpressionExecutor::with_defaults(
            DynamicObjectMapper::new(server_resolver, server_emitter),
            Arc::new(resources),
            &config,
        );

        let client = Model::new("client");
        let client_emitter = Arc::new(TypeEmitter::from_config(&config));
        let client_resolver = Arc::new(DefaultTypeResolver::new(
            client.registry(),
            client_emitter.clone(),
        ));
        let wire = Arc::new(JsonWire {
            server: Arc::new(server),
            requests: AtomicUsize::new(0),
        });
        let context = QueryContext::new(
            DynamicObjectMapper::new(client_resolver, client_emitter),
            config,
        )
        .with_provider(wire.clone())
        .with_async_provider(wire.clone())
        .with_streaming_provider(wire.clone());

        Setup {
            client,
            wire,
            context,
        }
    }

    fn orders(&self) -> Queryable {
        self.context.query(self.client.order_type())
    }

    fn customers(&self) -> Queryable {
        self.context.query(self.client.customer_type())
    }
}

fn object(value: Value) -> ObjectRef {
    ObjectRef::from_value(value).unwrap()
}

fn ids(values: Vec<Value>) -> Vec<i32> {
    values
        .into_iter()
        .map(|v| object(v).get("id").unwrap().try_as_i32().unwrap())
        .collect()
}

#[tokio::test]
async fn filter_and_order() {
    let setup = Setup::new();
    let large = setup
        .orders()
        .filter(|o| gt(member(o, "total")?, lit(50.0)))
        .unwrap()
        .order_by_descending(|o| member(o, "total"))
        .unwrap();

    assert_eq!(vec![3, 2], ids(large.to_vec_async().await.unwrap()));
    assert_eq!(2, large.count_async().await.unwrap());

    // Results come back as client types.
    let first = object(large.first_async().await.unwrap());
    assert_eq!(&setup.client.order, first.record_type());
}

#[tokio::test]
async fn errors_keep_their_type() {
    let setup = Setup::new();
    let ann = setup
        .orders()
        .filter(|o| eq(member(member(o, "customer")?, "name")?, lit("Ann")))
        .unwrap();

    let err = ann.single_async().await.unwrap_err();
    assert_eq!("InvalidOperation", err.type_name());
    assert_eq!("sequence contains more than one matching element", err.message());

    let nobody = setup
        .orders()
        .filter(|o| eq(member(member(o, "customer")?, "name")?, lit("Cara")))
        .unwrap();
    assert_eq!(Value::Null, nobody.single_or_default_async().await.unwrap());
}

#[tokio::test]
async fn cyclic_results_keep_identity() {
    let setup = Setup::new();
    let order = setup
        .orders()
        .filter(|o| eq(member(o, "id")?, lit(2)))
        .unwrap()
        .first_async()
        .await
        .unwrap();
    let order = object(order);

    let customer = object(order.get("customer").unwrap());
    assert_eq!(Value::from("Ann"), customer.get("name").unwrap());
    assert_eq!(&setup.client.customer, customer.record_type());

    let placed = Vec::<ObjectRef>::from_value(customer.get("orders").unwrap()).unwrap();
    assert_eq!(2, placed.len());
    assert!(ObjectRef::ptr_eq(&placed[1], &order));
    for o in &placed {
        let back = object(o.get("customer").unwrap());
        assert!(ObjectRef::ptr_eq(&back, &customer));
    }
}

#[tokio::test]
async fn rebound_variables_change_results() {
    let setup = Setup::new();
    let min = CapturedVariable::new("min_total", DataType::Float64, Value::Float64(50.0));
    let query = setup
        .orders()
        .filter(|o| gt(member(o, "total")?, captured(&min)))
        .unwrap();

    assert_eq!(2, query.count_async().await.unwrap());
    min.set(Value::Float64(10.0)).unwrap();
    assert_eq!(4, query.count_async().await.unwrap());

    let translated = setup.context.translate(query.expr()).unwrap();
    let variables = translated.variable_arguments();
    let names: Vec<&str> = variables.iter().map(|v| v.name()).collect();
    assert_eq!(vec!["min_total"], names);
}

#[tokio::test]
async fn streaming_stops_on_cancel() {
    let setup = Setup::new();
    let token = CancellationToken::new();
    let mut stream = setup
        .orders()
        .order_by(|o| member(o, "id"))
        .unwrap()
        .stream(token.clone())
        .unwrap();

    let first = stream.next().await.unwrap().unwrap();
    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(vec![1, 2], ids(vec![first, second]));

    token.cancel();
    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!("Cancelled", err.type_name());
    assert!(stream.next().await.is_none());
}

#[test]
fn timestamp_members() {
    let setup = Setup::new();
    let this_year = setup
        .orders()
        .filter(|o| eq(member(member(o, "placed")?, "Year")?, lit(2024)))
        .unwrap();
    assert_eq!(3, this_year.count().unwrap());

    let cutoff = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
    let before = setup
        .orders()
        .filter(|o| lt(member(o, "placed")?, lit(cutoff)))
        .unwrap()
        .to_vec()
        .unwrap();
    assert_eq!(vec![1, 2], ids(before));
}

#[test]
fn grouped_totals() {
    let setup = Setup::new();
    let shape = RecordType::anonymous([
        PropertyDef::new("customer", DataType::Utf8),
        PropertyDef::new("orders", DataType::Int32),
        PropertyDef::new("amount", DataType::Float64),
    ]);
    let order_type = setup.client.order_type();
    let rows = setup
        .orders()
        .group_by(|o| member(member(o, "customer")?, "name"))
        .unwrap()
        .select(|g| {
            new_record(
                &shape,
                vec![
                    member(g.clone(), "Key")?,
                    call_enumerable(QueryOperator::Count, vec![g.clone()])?,
                    call_enumerable(
                        QueryOperator::Sum,
                        vec![g, lambda1("o", order_type, |o| member(o, "total"))?],
                    )?,
                ],
            )
        })
        .unwrap()
        .to_vec()
        .unwrap();

    let summary: Vec<(String, i32, f64)> = rows
        .into_iter()
        .map(|row| {
            let row = object(row);
            (
                String::from_value(row.get("customer").unwrap()).unwrap(),
                row.get("orders").unwrap().try_as_i32().unwrap(),
                row.get("amount").unwrap().try_as_f64().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        vec![
            ("Ann".to_string(), 2, 115.5),
            ("Bob".to_string(), 2, 135.0)
        ],
        summary
    );
}

#[test]
fn unknown_resource_reported_by_server() {
    let setup = Setup::new();
    let err = setup.context.query(DataType::Int32).count().unwrap_err();
    assert_eq!("Translation", err.type_name());
}

#[test]
fn flattening_customer_orders() {
    let setup = Setup::new();
    let orders = setup
        .customers()
        .select_many(|c| member(c, "orders"))
        .unwrap();
    assert_eq!(0, setup.wire.requests());
    assert_eq!(vec![1, 2, 3, 4], ids(orders.to_vec().unwrap()));
    assert_eq!(1, setup.wire.requests());

    let shape = RecordType::anonymous([
        PropertyDef::new("customer", DataType::Utf8),
        PropertyDef::new("total", DataType::Float64),
    ]);
    let large = setup
        .customers()
        .select_many_with(
            |c| member(c, "orders"),
            |c, o| new_record(&shape, vec![member(c, "name")?, member(o, "total")?]),
        )
        .unwrap()
        .filter(|row| gt(member(row, "total")?, lit(50.0)))
        .unwrap();
    assert_eq!(1, setup.wire.requests());

    let rows: Vec<(String, f64)> = large
        .to_vec()
        .unwrap()
        .into_iter()
        .map(|row| {
            let row = object(row);
            (
                String::from_value(row.get("customer").unwrap()).unwrap(),
                row.get("total").unwrap().try_as_f64().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        vec![("Ann".to_string(), 75.5), ("Bob".to_string(), 120.0)],
        rows
    );
}

#[test]
fn join_orders_to_customers() {
    let setup = Setup::new();
    let shape = RecordType::anonymous([
        PropertyDef::new("order", DataType::Int32),
        PropertyDef::new("customer", DataType::Utf8),
    ]);
    let joined = setup
        .orders()
        .join(
            &setup.customers(),
            |o| member(member(o, "customer")?, "name"),
            |c| member(c, "name"),
            |o, c| new_record(&shape, vec![member(o, "id")?, member(c, "name")?]),
        )
        .unwrap()
        .order_by_descending(|row| member(row, "order"))
        .unwrap();
    assert_eq!(0, setup.wire.requests());

    let rows: Vec<(i32, String)> = joined
        .to_vec()
        .unwrap()
        .into_iter()
        .map(|row| {
            let row = object(row);
            (
                row.get("order").unwrap().try_as_i32().unwrap(),
                String::from_value(row.get("customer").unwrap()).unwrap(),
            )
        })
        .collect();
    assert_eq!(
        vec![
            (4, "Bob".to_string()),
            (3, "Bob".to_string()),
            (2, "Ann".to_string()),
            (1, "Ann".to_string()),
        ],
        rows
    );
    assert_eq!(1, setup.wire.requests());
}

#[tokio::test]
async fn includes_keep_elements_and_navigations() {
    let setup = Setup::new();
    let small = setup
        .orders()
        .include(|o| member(o, "customer"))
        .unwrap()
        .then_include(|o| member(member(o, "customer")?, "orders"))
        .unwrap()
        .filter(|o| lt(member(o, "total")?, lit(50.0)))
        .unwrap();
    assert_eq!(0, setup.wire.requests());

    let rows = small.to_vec_async().await.unwrap();
    assert_eq!(1, setup.wire.requests());
    assert_eq!(vec![1, 4], ids(rows.clone()));

    let bob = object(object(rows[1].clone()).get("customer").unwrap());
    assert_eq!(Value::from("Bob"), bob.get("name").unwrap());
    let placed = Vec::<ObjectRef>::from_value(bob.get("orders").unwrap()).unwrap();
    assert_eq!(2, placed.len());
}

#[test]
fn grouping_with_element_selector() {
    let setup = Setup::new();
    let groups = setup
        .orders()
        .group_by_with_element(
            |o| member(member(o, "customer")?, "name"),
            |o| member(o, "total"),
        )
        .unwrap();
    assert_eq!(0, setup.wire.requests());

    let summary: Vec<(Value, Vec<Value>)> = groups
        .to_vec()
        .unwrap()
        .into_iter()
        .map(|g| match g {
            Value::Grouping(g) => (g.key.clone(), g.elements.clone()),
            other => panic!("expected a grouping, got {other}"),
        })
        .collect();
    assert_eq!(
        vec![
            (
                Value::from("Ann"),
                vec![Value::Float64(40.0), Value::Float64(75.5)]
            ),
            (
                Value::from("Bob"),
                vec![Value::Float64(120.0), Value::Float64(15.0)]
            ),
        ],
        summary
    );
    assert_eq!(1, setup.wire.requests());
}
