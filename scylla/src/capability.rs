//! The query capability bundle: a single interface carrying all the verbs a
//! query needs to support, so the execution core stays polymorphic over
//! `Query`/`PreparedStatement`/`Batch` without any inheritance hierarchy.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::connection::Connection;
use crate::errors::TransientOutcome;
use crate::frame::Rows;
use crate::policies::{HostDescriptor, RetryPolicy, SpeculativeExecutionPolicy};
use crate::statement::Consistency;

/// An error produced by [`ExecutableQuery::execute`]. Bundles
/// [`std::error::Error`] (so it composes with `?` and `thiserror`) with
/// [`TransientOutcome`], so the attempt engine can recognize passthrough
/// outcomes (context cancelled, deadline exceeded, not found) without
/// hardcoding a specific database's error type.
pub trait QueryError: std::error::Error + TransientOutcome + Send + Sync + 'static {}

impl<T> QueryError for T where T: std::error::Error + TransientOutcome + Send + Sync + 'static {}

/// The actual wire-level execution of one statement against one connection.
/// Wire protocol framing and result-set decoding live outside this crate;
/// `QueryExecutor` is the seam a surrounding driver plugs into, analogous to
/// the closures (`do_query: impl Fn(Arc<Connection>) -> QueryFut`) the
/// teacher's `Session::run_query` takes for the same purpose.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &CancellationToken,
        conn: &dyn Connection,
    ) -> Result<Rows, Box<dyn QueryError>>;
}

/// One completed attempt, handed to [`ExecutableQuery::record_attempt`] for
/// telemetry. Never mutated once built.
pub struct AttemptRecord<'a> {
    pub keyspace: Option<&'a str>,
    pub start: Instant,
    pub end: Instant,
    pub host: Option<Arc<dyn HostDescriptor>>,
    pub succeeded: bool,
}

/// The capability set every query-like object (`Query`, `PreparedStatement`,
/// `Batch`) must expose to the execution core: execute, record an attempt,
/// retry policy, speculation policy, routing key, idempotency, custom
/// partitioner, context.
///
/// Borrow/release reference counting is not part of this trait: it is
/// modeled as ordinary `Arc` clone/drop via
/// [`crate::execution::borrow::QueryHandle`], an atomic reference count with
/// a drop hook.
#[async_trait]
pub trait ExecutableQuery: Send + Sync {
    /// Runs the query against a borrowed connection. Returns the decoded
    /// rows on success; wire framing and result decoding happen below this
    /// boundary, outside this crate.
    async fn execute(
        &self,
        ctx: &CancellationToken,
        conn: &dyn Connection,
    ) -> Result<Rows, Box<dyn QueryError>>;

    /// Telemetry hook, called exactly once per completed attempt.
    fn record_attempt(&self, record: &AttemptRecord<'_>);

    /// Per-statement retry policy override, if the caller set one. Falls
    /// back to the driver's [`crate::policies::ExecutionProfile`] default
    /// when `None`, mirroring
    /// `query.retry_policy.take().unwrap_or_else(|| self.retry_policy.clone_boxed())`
    /// in the teacher's `Session::query`/`execute`/`batch`.
    fn retry_policy(&self) -> Option<Arc<dyn RetryPolicy>>;

    /// Per-statement speculative execution policy override. `None` defers to
    /// the driver default; `Some(policy)` with `policy.attempts() == 0` is
    /// equivalent to disabling speculation for this query specifically.
    fn speculative_execution_policy(&self) -> Option<Arc<dyn SpeculativeExecutionPolicy>>;

    /// Routing key bytes, if derivable for this statement (e.g. a prepared
    /// statement's bound partition key). Ad-hoc queries without a known key
    /// return `None`.
    fn routing_key(&self) -> Option<bytes::Bytes>;

    /// Name of a custom partitioner to use instead of the cluster default
    /// when hashing `routing_key` into a token, if the statement specifies
    /// one.
    fn custom_partitioner(&self) -> Option<&str>;

    fn keyspace(&self) -> Option<&str>;
    fn table(&self) -> Option<&str>;

    /// Consistency level the statement was set up with, fed into
    /// [`crate::policies::retry::QueryInfo`] for retry classification.
    fn consistency(&self) -> Consistency;

    /// Whether re-executing this query is known to be safe. Precondition for
    /// speculation and for the retry policy to retry a write.
    fn is_idempotent(&self) -> bool;

    /// Whether this statement is a lightweight transaction (conditional
    /// update). LWT statements are never idempotent regardless of the
    /// caller's `is_idempotent` flag, since a retried CAS can observe its own
    /// prior (seemingly failed) application.
    fn is_lwt(&self) -> bool;

    /// The query's own cancellation scope. The execution driver derives a
    /// child token from this for the lifetime of one `execute_query` call.
    fn context(&self) -> &CancellationToken;
}
