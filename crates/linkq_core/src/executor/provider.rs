use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use linkq_error::Result;

use super::ExpressionExecutor;
use crate::ir::Expression;
use crate::query::{AsyncDataProvider, DataProvider, QueryResponse, StreamingDataProvider};

/// Serves queries in process by handing them straight to an executor.
#[derive(Debug, Clone)]
pub struct ExecutorDataProvider {
    executor: Arc<ExpressionExecutor>,
}

impl ExecutorDataProvider {
    pub fn new(executor: ExpressionExecutor) -> Self {
        ExecutorDataProvider {
            executor: Arc::new(executor),
        }
    }
}

impl DataProvider for ExecutorDataProvider {
    fn execute(&self, query: &Expression) -> Result<QueryResponse> {
        Ok(self.executor.execute(query))
    }
}

impl AsyncDataProvider for ExecutorDataProvider {
    fn execute_async(&self, query: Expression) -> BoxFuture<'static, Result<QueryResponse>> {
        let executor = self.executor.clone();
        async move { Ok(executor.execute(&query)) }.boxed()
    }
}

impl StreamingDataProvider for ExecutorDataProvider {
    fn execute_stream(&self, query: Expression) -> BoxStream<'static, Result<QueryResponse>> {
        self.executor.execute_stream(&query).map(Ok).boxed()
    }
}
