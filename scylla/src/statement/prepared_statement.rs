use std::convert::TryInto;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::Consistency;
use crate::capability::{AttemptRecord, ExecutableQuery, QueryError, QueryExecutor};
use crate::connection::Connection;
use crate::frame::Rows;
use crate::policies::{RetryPolicy, SpeculativeExecutionPolicy};

/// The slice of a prepared statement's metadata the routing layer needs: the
/// positions, within a row of bound values, that make up the partition key.
/// Column typing and the rest of the server-returned metadata belong to
/// result-set decoding, which lives outside this crate.
#[derive(Debug, Clone, Default)]
pub struct PreparedMetadata {
    pub pk_indexes: Vec<u16>,
}

/// A statement prepared on the server ahead of execution. Grounded on
/// the teacher's `PreparedStatement`, narrowed to the routing-relevant
/// metadata and extended with the capability-bundle fields `Query` also
/// carries (executor, retry/speculative overrides, context, attempt hook).
#[derive(Clone)]
pub struct PreparedStatement {
    id: Bytes,
    metadata: PreparedMetadata,
    statement: String,
    page_size: Option<i32>,
    pub consistency: Consistency,
    pub is_idempotent: bool,
    pub is_lwt: bool,
    pub keyspace: Option<String>,
    pub table: Option<String>,
    routing_key: Option<Bytes>,
    pub custom_partitioner: Option<String>,
    pub retry_policy: Option<Arc<dyn RetryPolicy>>,
    pub speculative_execution_policy: Option<Arc<dyn SpeculativeExecutionPolicy>>,
    executor: Arc<dyn QueryExecutor>,
    attempt_hook: Option<Arc<dyn Fn(&AttemptRecord<'_>) + Send + Sync>>,
    context: CancellationToken,
}

impl PreparedStatement {
    pub fn new(
        id: Bytes,
        metadata: PreparedMetadata,
        statement: String,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self {
            id,
            metadata,
            statement,
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

    pub fn get_id(&self) -> &Bytes {
        &self.id
    }

    pub fn get_statement(&self) -> &str {
        &self.statement
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

    /// Installs a callback invoked once per completed attempt.
    pub fn on_attempt(mut self, hook: Arc<dyn Fn(&AttemptRecord<'_>) + Send + Sync>) -> Self {
        self.attempt_hook = Some(hook);
        self
    }

    /// Computes and caches the partition key of the target table from the
    /// already-serialized bound column values, per-value serialization
    /// rules matching the teacher's `compute_partition_key`.
    ///
    /// Ref: https://github.com/scylladb/scylla/blob/40adf38915b6d8f5314c621a94d694d172360833/compound_compat.hh#L33-L47
    pub fn bind_routing_key(
        &mut self,
        bound_values: &[Option<Bytes>],
    ) -> Result<(), PartitionKeyError> {
        self.routing_key = Some(compute_partition_key(&self.metadata, bound_values)?);
        Ok(())
    }
}

fn compute_partition_key(
    metadata: &PreparedMetadata,
    bound_values: &[Option<Bytes>],
) -> Result<Bytes, PartitionKeyError> {
    let mut buf = BytesMut::new();

    if metadata.pk_indexes.len() == 1 {
        if let Some(v) = bound_values
            .get(metadata.pk_indexes[0] as usize)
            .ok_or_else(|| {
                PartitionKeyError::NoPkIndexValue(metadata.pk_indexes[0], bound_values.len())
            })?
        {
            buf.extend_from_slice(v);
        }
        return Ok(buf.into());
    }
    // TODO: consider what happens if a prepared statement is of type (?, something, ?),
    // where all three parameters form a partition key. The middle one is not available
    // in bound values.

    for pk_index in &metadata.pk_indexes {
        let next_val = bound_values.get(*pk_index as usize).ok_or_else(|| {
            PartitionKeyError::NoPkIndexValue(*pk_index, bound_values.len())
        })?;

        if let Some(v) = next_val {
            let v_len_u16: u16 = v
                .len()
                .try_into()
                .map_err(|_| PartitionKeyError::ValueTooLong(v.len()))?;

            buf.put_u16(v_len_u16);
            buf.extend_from_slice(v);
            buf.put_u8(0);
        }
    }
    Ok(buf.into())
}

#[derive(Debug, Error, PartialEq, Eq, PartialOrd, Ord)]
pub enum PartitionKeyError {
    #[error("No value with given pk_index! pk_index: {0}, values.len(): {1}")]
    NoPkIndexValue(u16, usize),
    #[error("Value bytes too long to create partition key, max 65 535 allowed! value.len(): {0}")]
    ValueTooLong(usize),
}

#[async_trait]
impl ExecutableQuery for PreparedStatement {
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
        self.is_idempotent && !self.is_lwt
    }

    fn is_lwt(&self) -> bool {
        self.is_lwt
    }

    fn context(&self) -> &CancellationToken {
        &self.context
    }
}
