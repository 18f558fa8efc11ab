use std::sync::Arc;

use futures::stream::BoxStream;
use linkq_error::{DbError, Result};
use tracing::debug;

use super::execution::{ExecutionState, QueryExecution};
use super::provider::{AsyncDataProvider, DataProvider, StreamingDataProvider};
use super::queryable::Queryable;
use super::response::QueryResponse;
use super::result_mapper::ResultMapper;
use super::stream::{CancellationToken, QueryStream};
use crate::config::QueryConfig;
use crate::dynamic::mapper::DynamicObjectMapper;
use crate::expr::Expr;
use crate::expr::builder;
use crate::ir::Expression;
use crate::translate::ForwardTranslator;
use crate::types::DataType;
use crate::values::{QueryableValue, Value};

/// Everything needed to build, translate, and run deferred queries.
#[derive(Debug, Clone)]
pub struct QueryContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug, Clone)]
struct ContextInner {
    config: QueryConfig,
    translator: ForwardTranslator,
    results: ResultMapper,
    provider: Option<Arc<dyn DataProvider>>,
    async_provider: Option<Arc<dyn AsyncDataProvider>>,
    streaming_provider: Option<Arc<dyn StreamingDataProvider>>,
}

impl QueryContext {
    pub fn new(mapper: DynamicObjectMapper, config: QueryConfig) -> Self {
        let mapper = mapper.with_property_descriptors(config.include_property_descriptors);
        QueryContext {
            inner: Arc::new(ContextInner {
                translator: ForwardTranslator::new(mapper.clone(), &config),
                results: ResultMapper::new(mapper),
                config,
                provider: None,
                async_provider: None,
                streaming_provider: None,
            }),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn DataProvider>) -> Self {
        Arc::make_mut(&mut self.inner).provider = Some(provider);
        self
    }

    pub fn with_async_provider(mut self, provider: Arc<dyn AsyncDataProvider>) -> Self {
        Arc::make_mut(&mut self.inner).async_provider = Some(provider);
        self
    }

    pub fn with_streaming_provider(mut self, provider: Arc<dyn StreamingDataProvider>) -> Self {
        Arc::make_mut(&mut self.inner).streaming_provider = Some(provider);
        self
    }

    /// Replace the translator, e.g. to use a custom argument policy.
    pub fn with_translator(mut self, translator: ForwardTranslator) -> Self {
        Arc::make_mut(&mut self.inner).translator = translator;
        self
    }

    pub fn config(&self) -> &QueryConfig {
        &self.inner.config
    }

    pub fn translator(&self) -> &ForwardTranslator {
        &self.inner.translator
    }

    /// Root queryable over every element of `element_type` on the providing
    /// side.
    pub fn query(&self, element_type: DataType) -> Queryable {
        let root = builder::constant(
            Value::Queryable(QueryableValue::Remote(element_type.clone())),
            DataType::queryable(element_type),
        );
        Queryable::new(self.clone(), root)
    }

    /// Translate a query without executing it.
    pub fn translate(&self, expr: &Expr) -> Result<Expression> {
        self.inner.translator.translate(expr)
    }

    pub(crate) fn execute(&self, expr: &Expr) -> Result<Value> {
        let mut execution = QueryExecution::new();
        self.execute_inner(expr, &mut execution)
            .map_err(|e| execution.fail(e))
    }

    fn execute_inner(&self, expr: &Expr, execution: &mut QueryExecution) -> Result<Value> {
        let query = self.translate_for(expr, execution)?;
        let provider = self
            .inner
            .provider
            .as_ref()
            .ok_or_else(|| DbError::new("No data provider configured"))?;
        let response = provider.execute(&query)?;
        self.map_response(expr, response, execution)
    }

    pub(crate) async fn execute_async(&self, expr: &Expr) -> Result<Value> {
        let mut execution = QueryExecution::new();
        let result = self.execute_async_inner(expr, &mut execution).await;
        result.map_err(|e| execution.fail(e))
    }

    async fn execute_async_inner(
        &self,
        expr: &Expr,
        execution: &mut QueryExecution,
    ) -> Result<Value> {
        let query = self.translate_for(expr, execution)?;
        let provider = self
            .inner
            .async_provider
            .as_ref()
            .ok_or_else(|| DbError::new("No async data provider configured"))?;
        let response = provider.execute_async(query).await?;
        self.map_response(expr, response, execution)
    }

    pub(crate) fn stream(&self, expr: &Expr, token: CancellationToken) -> Result<QueryStream> {
        let mut execution = QueryExecution::new();
        match self.open_stream(expr, &mut execution) {
            Ok((inner, element_type)) => Ok(QueryStream::new(
                inner,
                self.inner.results.clone(),
                element_type,
                token,
                execution,
            )),
            Err(e) => Err(execution.fail(e)),
        }
    }

    fn open_stream(
        &self,
        expr: &Expr,
        execution: &mut QueryExecution,
    ) -> Result<(BoxStream<'static, Result<QueryResponse>>, DataType)> {
        let element_type = expr.datatype().try_element_type()?.clone();
        let query = self.translate_for(expr, execution)?;
        let provider = self
            .inner
            .streaming_provider
            .as_ref()
            .ok_or_else(|| DbError::new("No streaming data provider configured"))?;
        Ok((provider.execute_stream(query), element_type))
    }

    /// Translate and move on to providing.
    fn translate_for(&self, expr: &Expr, execution: &mut QueryExecution) -> Result<Expression> {
        execution.advance(ExecutionState::Translating)?;
        let query = self.translate(expr)?;
        debug!(query_id = %execution.id(), nodes = query.node_count(), "sending query");
        execution.advance(ExecutionState::Providing)?;
        Ok(query)
    }

    fn map_response(
        &self,
        expr: &Expr,
        response: QueryResponse,
        execution: &mut QueryExecution,
    ) -> Result<Value> {
        execution.advance(ExecutionState::Mapping)?;
        let value = self.inner.results.map(response, &expr.datatype())?;
        execution.advance(ExecutionState::Materialized)?;
        Ok(value)
    }
}
