use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use linkq_error::{DbError, Result};

use super::execution::{ExecutionState, QueryExecution};
use super::response::QueryResponse;
use super::result_mapper::ResultMapper;
use crate::types::DataType;
use crate::values::Value;

/// Cooperative cancellation flag shared between a stream and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Elements of a streamed query, mapped as they're pulled.
///
/// The token is checked before every pull. Once cancelled, the stream yields a
/// single cancellation error and ends without pulling from the provider again.
pub struct QueryStream {
    inner: BoxStream<'static, Result<QueryResponse>>,
    mapper: ResultMapper,
    element_type: DataType,
    token: CancellationToken,
    execution: QueryExecution,
    done: bool,
}

impl fmt::Debug for QueryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryStream")
            .field("element_type", &self.element_type)
            .field("execution", &self.execution)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl QueryStream {
    pub(crate) fn new(
        inner: BoxStream<'static, Result<QueryResponse>>,
        mapper: ResultMapper,
        element_type: DataType,
        token: CancellationToken,
        execution: QueryExecution,
    ) -> Self {
        QueryStream {
            inner,
            mapper,
            element_type,
            token,
            execution,
            done: false,
        }
    }

    pub fn element_type(&self) -> &DataType {
        &self.element_type
    }

    fn finish_with_error(&mut self, error: DbError) -> Poll<Option<Result<Value>>> {
        self.done = true;
        Poll::Ready(Some(Err(self.execution.fail(error))))
    }

    fn map_item(&mut self, response: QueryResponse) -> Result<Value> {
        self.execution.advance(ExecutionState::Mapping)?;
        let value = self.mapper.map(response, &self.element_type)?;
        self.execution.advance(ExecutionState::Providing)?;
        Ok(value)
    }
}

impl Stream for QueryStream {
    type Item = Result<Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        if self.token.is_cancelled() {
            return self.finish_with_error(DbError::cancelled());
        }

        match self.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(response))) => match self.map_item(response) {
                Ok(value) => Poll::Ready(Some(Ok(value))),
                Err(e) => self.finish_with_error(e),
            },
            Poll::Ready(Some(Err(e))) => self.finish_with_error(e),
            Poll::Ready(None) => {
                self.done = true;
                if let Err(e) = self.execution.advance(ExecutionState::Materialized) {
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
