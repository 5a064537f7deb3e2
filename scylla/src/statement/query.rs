use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::Consistency;
use crate::capability::{AttemptRecord, ExecutableQuery, QueryError, QueryExecutor};
use crate::connection::Connection;
use crate::frame::Rows;
use crate::policies::{RetryPolicy, SpeculativeExecutionPolicy};

/// An ad-hoc CQL statement: the source text plus the execution knobs the
/// capability bundle requires. Grounded on the teacher's `Query`, which
/// carried only `contents`/`page_size`/`consistency`/`is_idempotent`/
/// `retry_policy`; extended with the remaining capability-bundle verbs
/// (routing key, keyspace/table hints, LWT flag, speculative policy
/// override, context, and the attempt-telemetry hook).
pub struct Query {
    contents: String,
    page_size: Option<i32>,
    pub consistency: Consistency,
    pub is_idempotent: bool,
    pub is_lwt: bool,
    pub keyspace: Option<String>,
    pub table: Option<String>,
    pub routing_key: Option<Bytes>,
    pub custom_partitioner: Option<String>,
    pub retry_policy: Option<Arc<dyn RetryPolicy>>,
    pub speculative_execution_policy: Option<Arc<dyn SpeculativeExecutionPolicy>>,
    executor: Arc<dyn QueryExecutor>,
    attempt_hook: Option<Arc<dyn Fn(&AttemptRecord<'_>) + Send + Sync>>,
    context: CancellationToken,
}

impl Query {
    /// Creates a new `Query` from CQL text and the executor that will carry
    /// out the wire-level execution.
    pub fn new(contents: impl Into<String>, executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            contents: contents.into(),
            page_size: None,
            consistency: Consistency::default(),
            is_idempotent: false,
            is_lwt: false,
            keyspace: None,
            table: None,
            routing_key: None,
            custom_partitioner: None,
            retry_policy: None,
            speculative_execution_policy: None,
            executor,
            attempt_hook: None,
            context: CancellationToken::new(),
        }
    }

    /// Returns the string representation of the CQL query.
    pub fn get_contents(&self) -> &str {
        &self.contents
    }

    /// Sets the page size for this CQL query.
    pub fn set_page_size(&mut self, page_size: i32) {
        assert!(page_size > 0, "page size must be larger than 0");
        self.page_size = Some(page_size);
    }

    /// Disables paging for this CQL query.
    pub fn disable_paging(&mut self) {
        self.page_size = None;
    }

    /// Returns the page size for this CQL query.
    pub fn get_page_size(&self) -> Option<i32> {
        self.page_size
    }

    /// Sets the consistency to be used when executing this query.
    pub fn set_consistency(&mut self, c: Consistency) {
        self.consistency = c;
    }

    /// Gets the consistency to be used when executing this query.
    pub fn get_consistency(&self) -> Consistency {
        self.consistency
    }

    /// Installs a callback invoked once per completed attempt, the
    /// equivalent of the source's `query.attempt(...)` telemetry hook.
    pub fn on_attempt(mut self, hook: Arc<dyn Fn(&AttemptRecord<'_>) + Send + Sync>) -> Self {
        self.attempt_hook = Some(hook);
        self
    }
}

#[async_trait]
impl ExecutableQuery for Query {
    async fn execute(
        &self,
        ctx: &CancellationToken,
        conn: &dyn Connection,
    ) -> Result<Rows, Box<dyn QueryError>> {
        self.executor.execute(ctx, conn).await
    }

    fn record_attempt(&self, record: &AttemptRecord<'_>) {
        if let Some(hook) = &self.attempt_hook {
            hook(record);
        }
    }

    fn retry_policy(&self) -> Option<Arc<dyn RetryPolicy>> {
        self.retry_policy.clone()
    }

    fn speculative_execution_policy(&self) -> Option<Arc<dyn SpeculativeExecutionPolicy>> {
        self.speculative_execution_policy.clone()
    }

    fn routing_key(&self) -> Option<Bytes> {
        self.routing_key.clone()
    }

    fn custom_partitioner(&self) -> Option<&str> {
        self.custom_partitioner.as_deref()
    }

    fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    fn consistency(&self) -> Consistency {
        self.consistency
    }

    fn is_idempotent(&self) -> bool {
        // A lightweight transaction is never safe to retry blindly: a
        // retried CAS can observe its own prior (seemingly failed)
        // application, so LWT statements never count as idempotent
        // regardless of the caller's flag.
        self.is_idempotent && !self.is_lwt
    }

    fn is_lwt(&self) -> bool {
        self.is_lwt
    }

    fn context(&self) -> &CancellationToken {
        &self.context
    }
}
