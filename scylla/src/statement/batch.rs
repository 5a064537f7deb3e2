use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::Consistency;
use crate::capability::{AttemptRecord, ExecutableQuery, QueryError, QueryExecutor};
use crate::connection::Connection;
use crate::frame::Rows;
use crate::policies::{RetryPolicy, SpeculativeExecutionPolicy};
use crate::statement::{prepared_statement::PreparedStatement, query::Query};

/// Whether a batch is replayed atomically, logged for replay on failure, or
/// applied without either guarantee. Unchanged from the teacher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchType {
    Logged,
    Unlogged,
    Counter,
}

/// One statement inside a [`Batch`].
#[derive(Clone)]
pub enum BatchStatement {
    Query(Query),
    PreparedStatement(PreparedStatement),
}

impl From<Query> for BatchStatement {
    fn from(q: Query) -> Self {
        BatchStatement::Query(q)
    }
}

impl From<PreparedStatement> for BatchStatement {
    fn from(p: PreparedStatement) -> Self {
        BatchStatement::PreparedStatement(p)
    }
}

/// A CQL batch: several statements submitted and, per `batch_type`, applied
/// together. Grounded on the teacher's `Batch`; extended with the same
/// capability-bundle fields `Query`/`PreparedStatement` carry so a batch is
/// itself an `ExecutableQuery` the execution core can drive uniformly.
#[derive(Clone)]
pub struct Batch {
    statements: Vec<BatchStatement>,
    batch_type: BatchType,
    pub consistency: Consistency,
    pub is_idempotent: bool,
    pub keyspace: Option<String>,
    routing_key: Option<Bytes>,
    pub custom_partitioner: Option<String>,
    pub retry_policy: Option<Arc<dyn RetryPolicy>>,
    pub speculative_execution_policy: Option<Arc<dyn SpeculativeExecutionPolicy>>,
    executor: Arc<dyn QueryExecutor>,
    attempt_hook: Option<Arc<dyn Fn(&AttemptRecord<'_>) + Send + Sync>>,
    context: CancellationToken,
}

impl Batch {
    /// Creates a new, empty `Batch` of `batch_type` type.
    pub fn new(batch_type: BatchType, executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            statements: Vec::new(),
            batch_type,
            consistency: Consistency::default(),
            is_idempotent: false,
            keyspace: None,
            routing_key: None,
            custom_partitioner: None,
            retry_policy: None,
            speculative_execution_policy: None,
            executor,
            attempt_hook: None,
            context: CancellationToken::new(),
        }
    }

    /// Appends a new statement to the batch.
    pub fn append_statement(&mut self, statement: impl Into<BatchStatement>) {
        self.statements.push(statement.into());
    }

    /// Gets type of batch.
    pub fn get_type(&self) -> BatchType {
        self.batch_type
    }

    /// Returns statements contained in the batch.
    pub fn get_statements(&self) -> &[BatchStatement] {
        self.statements.as_ref()
    }

    /// Sets the consistency to be used when executing this batch.
    pub fn set_consistency(&mut self, c: Consistency) {
        self.consistency = c;
    }

    /// Gets the consistency to be used when executing this batch.
    pub fn get_consistency(&self) -> Consistency {
        self.consistency
    }

    /// Sets the routing key used to pick the coordinator for this batch. A
    /// batch has no single bound statement to derive a key from, so the
    /// caller supplies one explicitly (typically the key of its first
    /// statement).
    pub fn set_routing_key(&mut self, key: Bytes) {
        self.routing_key = Some(key);
    }

    pub fn on_attempt(mut self, hook: Arc<dyn Fn(&AttemptRecord<'_>) + Send + Sync>) -> Self {
        self.attempt_hook = Some(hook);
        self
    }
}

#[async_trait]
impl ExecutableQuery for Batch {
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
        None
    }

    fn consistency(&self) -> Consistency {
        self.consistency
    }

    fn is_idempotent(&self) -> bool {
        // A counter batch is never idempotent regardless of the caller's
        // flag: replaying a counter update double-applies it.
        self.is_idempotent && self.batch_type != BatchType::Counter
    }

    fn is_lwt(&self) -> bool {
        false
    }

    fn context(&self) -> &CancellationToken {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Rows;

    struct NoopExecutor;

    #[async_trait]
    impl QueryExecutor for NoopExecutor {
        async fn execute(
            &self,
            _ctx: &CancellationToken,
            _conn: &dyn Connection,
        ) -> Result<Rows, Box<dyn QueryError>> {
            Ok(Rows::default())
        }
    }

    #[test]
    fn counter_batch_is_never_idempotent() {
        let mut batch = Batch::new(BatchType::Counter, Arc::new(NoopExecutor));
        batch.is_idempotent = true;
        assert!(!batch.is_idempotent());
    }

    #[test]
    fn logged_batch_honors_caller_idempotence_flag() {
        let mut batch = Batch::new(BatchType::Logged, Arc::new(NoopExecutor));
        batch.is_idempotent = true;
        assert!(batch.is_idempotent());
    }

    #[test]
    fn empty_batch_has_no_statements() {
        let batch = Batch::new(BatchType::Logged, Arc::new(NoopExecutor));
        assert!(batch.get_statements().is_empty());
    }
}
