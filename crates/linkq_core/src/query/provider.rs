use std::fmt::Debug;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use linkq_error::Result;

use super::response::QueryResponse;
use crate::ir::Expression;

/// Executes translated queries, blocking until the response is available.
///
/// `Err` is reserved for failures of the provider itself. Errors raised while
/// executing the query are returned as `QueryResponse::Error`.
pub trait DataProvider: Debug + Send + Sync {
    fn execute(&self, query: &Expression) -> Result<QueryResponse>;
}

/// Executes translated queries, resolving once with the full response.
pub trait AsyncDataProvider: Debug + Send + Sync {
    fn execute_async(&self, query: Expression) -> BoxFuture<'static, Result<QueryResponse>>;
}

/// Executes translated sequence queries, producing one response per element.
///
/// Dropping the stream must stop production of further elements.
pub trait StreamingDataProvider: Debug + Send + Sync {
    fn execute_stream(&self, query: Expression) -> BoxStream<'static, Result<QueryResponse>>;
}
