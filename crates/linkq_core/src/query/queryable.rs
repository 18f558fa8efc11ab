use std::sync::Arc;

use indexmap::IndexMap;
use indexmap::map::Entry;
use linkq_error::{DbError, Result};

use super::context::QueryContext;
use super::result_mapper::FromValue;
use super::stream::{CancellationToken, QueryStream};
use crate::expr::Expr;
use crate::expr::builder::{call_query, constant, lambda1, lambda2, lit};
use crate::expr::evaluator::Evaluator;
use crate::expr::method::QueryOperator;
use crate::types::DataType;
use crate::values::Value;

const DUPLICATE_KEY: &str = "an item with the same key has already been added";

/// A deferred query.
///
/// Fluent operations wrap the current tree in a new call and never execute
/// anything. Terminal operations translate the tree and hand it to the
/// context's provider.
#[derive(Debug, Clone)]
pub struct Queryable {
    context: QueryContext,
    expr: Arc<Expr>,
}

impl Queryable {
    pub(crate) fn new(context: QueryContext, expr: Expr) -> Self {
        Queryable {
            context,
            expr: Arc::new(expr),
        }
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn context(&self) -> &QueryContext {
        &self.context
    }

    pub fn element_type(&self) -> Result<DataType> {
        self.expr.datatype().try_element_type().cloned()
    }

    fn chain(&self, op: QueryOperator, args: Vec<Expr>) -> Result<Queryable> {
        Ok(Queryable::new(self.context.clone(), self.call(op, args)?))
    }

    fn call(&self, op: QueryOperator, args: Vec<Expr>) -> Result<Expr> {
        let mut arguments = Vec::with_capacity(args.len() + 1);
        arguments.push(self.expr.as_ref().clone());
        arguments.extend(args);
        call_query(op, arguments)
    }

    /// Lambda over the element type.
    fn selector<F>(&self, body: F) -> Result<Expr>
    where
        F: FnOnce(Expr) -> Result<Expr>,
    {
        lambda1("x", self.element_type()?, body)
    }

    pub fn filter<F>(&self, predicate: F) -> Result<Queryable>
    where
        F: FnOnce(Expr) -> Result<Expr>,
    {
        self.chain(QueryOperator::Where, vec![self.selector(predicate)?])
    }

    pub fn select<F>(&self, selector: F) -> Result<Queryable>
    where
        F: FnOnce(Expr) -> Result<Expr>,
    {
        self.chain(QueryOperator::Select, vec![self.selector(selector)?])
    }

    pub fn select_many<F>(&self, collection: F) -> Result<Queryable>
    where
        F: FnOnce(Expr) -> Result<Expr>,
    {
        self.chain(QueryOperator::SelectMany, vec![self.selector(collection)?])
    }

    /// Flatten, combining each source element with each element of its
    /// collection.
    pub fn select_many_with<F, R>(&self, collection: F, result: R) -> Result<Queryable>
    where
        F: FnOnce(Expr) -> Result<Expr>,
        R: FnOnce(Expr, Expr) -> Result<Expr>,
    {
        let collection = self.selector(collection)?;
        let item_type = match collection.as_lambda() {
            Some((_, body)) => body.datatype().try_element_type()?.clone(),
            None => return Err(DbError::new("Expected a collection selector")),
        };
        let result = lambda2(("x", "y"), (self.element_type()?, item_type), result)?;
        self.chain(QueryOperator::SelectMany, vec![collection, result])
    }

    pub fn order_by<F>(&self, key: F) -> Result<Queryable>
    where
        F: FnOnce(Expr) -> Result<Expr>,
    {
        self.chain(QueryOperator::OrderBy, vec![self.selector(key)?])
    }

    pub fn order_by_descending<F>(&self, key: F) -> Result<Queryable>
    where
        F: FnOnce(Expr) -> Result<Expr>,
    {
        self.chain(QueryOperator::OrderByDescending, vec![self.selector(key)?])
    }

    pub fn then_by<F>(&self, key: F) -> Result<Queryable>
    where
        F: FnOnce(Expr) -> Result<Expr>,
    {
        self.chain(QueryOperator::ThenBy, vec![self.selector(key)?])
    }

    pub fn then_by_descending<F>(&self, key: F) -> Result<Queryable>
    where
        F: FnOnce(Expr) -> Result<Expr>,
    {
        self.chain(QueryOperator::ThenByDescending, vec![self.selector(key)?])
    }

    /// Inner join on equal keys.
    pub fn join<O, I, R>(
        &self,
        inner: &Queryable,
        outer_key: O,
        inner_key: I,
        result: R,
    ) -> Result<Queryable>
    where
        O: FnOnce(Expr) -> Result<Expr>,
        I: FnOnce(Expr) -> Result<Expr>,
        R: FnOnce(Expr, Expr) -> Result<Expr>,
    {
        let outer_type = self.element_type()?;
        let inner_type = inner.element_type()?;
        let outer_key = lambda1("x", outer_type.clone(), outer_key)?;
        let inner_key = lambda1("y", inner_type.clone(), inner_key)?;
        let result = lambda2(("x", "y"), (outer_type, inner_type), result)?;
        self.chain(
            QueryOperator::Join,
            vec![inner.expr.as_ref().clone(), outer_key, inner_key, result],
        )
    }

    pub fn group_by<K>(&self, key: K) -> Result<Queryable>
    where
        K: FnOnce(Expr) -> Result<Expr>,
    {
        self.chain(QueryOperator::GroupBy, vec![self.selector(key)?])
    }

    pub fn group_by_with_element<K, E>(&self, key: K, element: E) -> Result<Queryable>
    where
        K: FnOnce(Expr) -> Result<Expr>,
        E: FnOnce(Expr) -> Result<Expr>,
    {
        self.chain(
            QueryOperator::GroupBy,
            vec![self.selector(key)?, self.selector(element)?],
        )
    }

    pub fn skip(&self, count: i32) -> Result<Queryable> {
        self.chain(QueryOperator::Skip, vec![lit(count)])
    }

    pub fn take(&self, count: i32) -> Result<Queryable> {
        self.chain(QueryOperator::Take, vec![lit(count)])
    }

    pub fn distinct(&self) -> Result<Queryable> {
        self.chain(QueryOperator::Distinct, Vec::new())
    }

    /// Mark a navigation property to be loaded with each element.
    pub fn include<F>(&self, navigation: F) -> Result<Queryable>
    where
        F: FnOnce(Expr) -> Result<Expr>,
    {
        self.chain(QueryOperator::Include, vec![self.selector(navigation)?])
    }

    pub fn then_include<F>(&self, navigation: F) -> Result<Queryable>
    where
        F: FnOnce(Expr) -> Result<Expr>,
    {
        self.chain(QueryOperator::ThenInclude, vec![self.selector(navigation)?])
    }

    fn run<T: FromValue>(&self, op: QueryOperator, args: Vec<Expr>) -> Result<T> {
        let expr = self.call(op, args)?;
        T::from_value(self.context.execute(&expr)?)
    }

    async fn run_async<T: FromValue>(&self, op: QueryOperator, args: Vec<Expr>) -> Result<T> {
        let expr = self.call(op, args)?;
        T::from_value(self.context.execute_async(&expr).await?)
    }

    fn item(&self, value: Value) -> Result<Expr> {
        Ok(constant(value, self.element_type()?))
    }

    pub fn to_vec(&self) -> Result<Vec<Value>> {
        Vec::from_value(self.context.execute(&self.expr)?)
    }

    pub fn count(&self) -> Result<i32> {
        self.run(QueryOperator::Count, Vec::new())
    }

    pub fn count_where<F>(&self, predicate: F) -> Result<i32>
    where
        F: FnOnce(Expr) -> Result<Expr>,
    {
        self.run(QueryOperator::Count, vec![self.selector(predicate)?])
    }

    pub fn long_count(&self) -> Result<i64> {
        self.run(QueryOperator::LongCount, Vec::new())
    }

    pub fn any(&self) -> Result<bool> {
        self.run(QueryOperator::Any, Vec::new())
    }

    pub fn any_where<F>(&self, predicate: F) -> Result<bool>
    where
        F: FnOnce(Expr) -> Result<Expr>,
    {
        self.run(QueryOperator::Any, vec![self.selector(predicate)?])
    }

    pub fn all<F>(&self, predicate: F) -> Result<bool>
    where
        F: FnOnce(Expr) -> Result<Expr>,
    {
        self.run(QueryOperator::All, vec![self.selector(predicate)?])
    }

    pub fn contains(&self, item: Value) -> Result<bool> {
        self.run(QueryOperator::Contains, vec![self.item(item)?])
    }

    /// First element, failing if there is none.
    pub fn first(&self) -> Result<Value> {
        self.run(QueryOperator::First, Vec::new())
    }

    pub fn first_where<F>(&self, predicate: F) -> Result<Value>
    where
        F: FnOnce(Expr) -> Result<Expr>,
    {
        self.run(QueryOperator::First, vec![self.selector(predicate)?])
    }

    pub fn first_or_default(&self) -> Result<Value> {
        self.run(QueryOperator::FirstOrDefault, Vec::new())
    }

    pub fn first_or_default_where<F>(&self, predicate: F) -> Result<Value>
    where
        F: FnOnce(Expr) -> Result<Expr>,
    {
        self.run(QueryOperator::FirstOrDefault, vec![self.selector(predicate)?])
    }

    /// The only element, failing if there are zero or several.
    pub fn single(&self) -> Result<Value> {
        self.run(QueryOperator::Single, Vec::new())
    }

    pub fn single_where<F>(&self, predicate: F) -> Result<Value>
    where
        F: FnOnce(Expr) -> Result<Expr>,
    {
        self.run(QueryOperator::Single, vec![self.selector(predicate)?])
    }

    /// The only element, or the element type's default if there are none.
    /// Still fails on several.
    pub fn single_or_default(&self) -> Result<Value> {
        self.run(QueryOperator::SingleOrDefault, Vec::new())
    }

    pub fn single_or_default_where<F>(&self, predicate: F) -> Result<Value>
    where
        F: FnOnce(Expr) -> Result<Expr>,
    {
        self.run(QueryOperator::SingleOrDefault, vec![self.selector(predicate)?])
    }

    pub fn last(&self) -> Result<Value> {
        self.run(QueryOperator::Last, Vec::new())
    }

    pub fn last_or_default(&self) -> Result<Value> {
        self.run(QueryOperator::LastOrDefault, Vec::new())
    }

    pub fn sum(&self) -> Result<Value> {
        self.run(QueryOperator::Sum, Vec::new())
    }

    pub fn min(&self) -> Result<Value> {
        self.run(QueryOperator::Min, Vec::new())
    }

    pub fn max(&self) -> Result<Value> {
        self.run(QueryOperator::Max, Vec::new())
    }

    pub fn average(&self) -> Result<Value> {
        self.run(QueryOperator::Average, Vec::new())
    }

    /// Materialize into a map keyed by `key`, keeping element order.
    ///
    /// Keys are computed after the elements are received.
    pub fn to_dictionary<K>(&self, key: K) -> Result<IndexMap<Value, Value>>
    where
        K: FnOnce(Expr) -> Result<Expr>,
    {
        let key = self.selector(key)?;
        build_dictionary(&key, self.to_vec()?)
    }

    pub async fn to_vec_async(&self) -> Result<Vec<Value>> {
        Vec::from_value(self.context.execute_async(&self.expr).await?)
    }

    pub async fn count_async(&self) -> Result<i32> {
        self.run_async(QueryOperator::Count, Vec::new()).await
    }

    pub async fn long_count_async(&self) -> Result<i64> {
        self.run_async(QueryOperator::LongCount, Vec::new()).await
    }

    pub async fn any_async(&self) -> Result<bool> {
        self.run_async(QueryOperator::Any, Vec::new()).await
    }

    pub async fn all_async<F>(&self, predicate: F) -> Result<bool>
    where
        F: FnOnce(Expr) -> Result<Expr>,
    {
        let predicate = self.selector(predicate)?;
        self.run_async(QueryOperator::All, vec![predicate]).await
    }

    pub async fn contains_async(&self, item: Value) -> Result<bool> {
        let item = self.item(item)?;
        self.run_async(QueryOperator::Contains, vec![item]).await
    }

    pub async fn first_async(&self) -> Result<Value> {
        self.run_async(QueryOperator::First, Vec::new()).await
    }

    pub async fn first_or_default_async(&self) -> Result<Value> {
        self.run_async(QueryOperator::FirstOrDefault, Vec::new()).await
    }

    pub async fn single_async(&self) -> Result<Value> {
        self.run_async(QueryOperator::Single, Vec::new()).await
    }

    pub async fn single_or_default_async(&self) -> Result<Value> {
        self.run_async(QueryOperator::SingleOrDefault, Vec::new()).await
    }

    pub async fn last_async(&self) -> Result<Value> {
        self.run_async(QueryOperator::Last, Vec::new()).await
    }

    pub async fn last_or_default_async(&self) -> Result<Value> {
        self.run_async(QueryOperator::LastOrDefault, Vec::new()).await
    }

    pub async fn sum_async(&self) -> Result<Value> {
        self.run_async(QueryOperator::Sum, Vec::new()).await
    }

    pub async fn min_async(&self) -> Result<Value> {
        self.run_async(QueryOperator::Min, Vec::new()).await
    }

    pub async fn max_async(&self) -> Result<Value> {
        self.run_async(QueryOperator::Max, Vec::new()).await
    }

    pub async fn average_async(&self) -> Result<Value> {
        self.run_async(QueryOperator::Average, Vec::new()).await
    }

    pub async fn to_dictionary_async<K>(&self, key: K) -> Result<IndexMap<Value, Value>>
    where
        K: FnOnce(Expr) -> Result<Expr>,
    {
        let key = self.selector(key)?;
        build_dictionary(&key, self.to_vec_async().await?)
    }

    /// Stream the elements of this query, mapping each one as it's pulled.
    pub fn stream(&self, token: CancellationToken) -> Result<QueryStream> {
        self.context.stream(&self.expr, token)
    }
}

fn build_dictionary(key: &Expr, items: Vec<Value>) -> Result<IndexMap<Value, Value>> {
    let mut evaluator = Evaluator::new();
    let mut map = IndexMap::with_capacity(items.len());
    for item in items {
        let k = evaluator.apply(key, std::slice::from_ref(&item))?;
        if k.is_null() {
            return Err(DbError::invalid_operation("dictionary key cannot be null"));
        }
        match map.entry(k) {
            Entry::Occupied(_) => return Err(DbError::invalid_operation(DUPLICATE_KEY)),
            Entry::Vacant(entry) => {
                entry.insert(item);
            }
        }
    }
    Ok(map)
}
