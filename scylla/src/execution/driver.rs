use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace_span, Instrument};

use crate::capability::ExecutableQuery;
use crate::connection::ConnectionPool;
use crate::policies::host_selection::{
    HostSelectionPolicy, HostSource, SynchronizedHostIterator, UnsynchronizedHostSource,
};

use super::attempt::run_attempt;
use super::borrow::{QueryBorrow, QueryHandle};
use super::iterator::QueryResultIterator;

/// The Execution Driver: `executeQuery(query) -> iterator`. The outer
/// `error` return from the source is reserved and always nil in every
/// specified path, which this crate renders idiomatically by simply not
/// having an outer `Result`: the iterator's own error field is the entire
/// failure surface.
pub async fn execute_query(
    query: Arc<dyn ExecutableQuery>,
    host_selection_policy: Arc<dyn HostSelectionPolicy>,
    pool: Arc<dyn ConnectionPool>,
) -> QueryResultIterator {
    let handle = QueryHandle::new(query.clone());
    execute_with_handle(query, host_selection_policy, pool, handle).await
}

/// Does the actual work of [`execute_query`]; split out so tests can hand in
/// a [`QueryHandle`] and inspect its borrow count once the call returns.
async fn execute_with_handle(
    query: Arc<dyn ExecutableQuery>,
    host_selection_policy: Arc<dyn HostSelectionPolicy>,
    pool: Arc<dyn ConnectionPool>,
    handle: QueryHandle,
) -> QueryResultIterator {
    let span = tracing::debug_span!("execute_query", idempotent = query.is_idempotent());
    // A span guard held across an `.await` loses track of the task's actual
    // suspension points once other tasks interleave on the same worker, so
    // the whole body runs inside the span via `Instrument` instead (see the
    // per-attempt spans in `spawn_attempt` below for the same pattern).
    async move {
        let host_iter = host_selection_policy.pick(query.as_ref());

        let speculative_policy = query.speculative_execution_policy();
        let extra_attempts = speculative_policy.as_ref().map_or(0, |p| p.attempts());

        if !query.is_idempotent() || extra_attempts == 0 {
            // Non-idempotent queries can never tolerate duplicate side
            // effects, so speculation is unconditionally disabled regardless
            // of policy. A single consumer never needs the synchronized
            // adapter.
            let hosts = UnsynchronizedHostSource::new(host_iter);
            let borrow = handle.borrow();
            return run_attempt(query.context(), &*borrow, &hosts, pool.as_ref()).await;
        }

        tracing::trace!(extra_attempts, "speculative execution enabled");

        let hosts: Arc<dyn HostSource> = Arc::new(SynchronizedHostIterator::new(host_iter));
        let child = query.context().child_token();

        let (tx, mut rx) = mpsc::channel(1);

        spawn_attempt(0, &child, &handle, &hosts, &pool, &tx);

        let delay = speculative_policy
            .as_ref()
            .map_or(Duration::ZERO, |p| p.delay())
            .max(Duration::from_nanos(1));
        let mut ticker = tokio::time::interval(delay);
        // The first tick of `interval` fires immediately; the primary attempt
        // already covers t=0, so the first speculative attempt must wait a
        // full `delay`. Consume that immediate tick before entering the loop.
        ticker.tick().await;

        let mut spawned = 0usize;
        let result = loop {
            if spawned >= extra_attempts {
                tokio::select! {
                    _ = child.cancelled() => break QueryResultIterator::cancelled(),
                    Some(result) = rx.recv() => break result,
                }
            } else {
                tokio::select! {
                    _ = ticker.tick() => {
                        spawned += 1;
                        tracing::trace!(attempt_no = spawned, "spawning speculative attempt");
                        spawn_attempt(spawned, &child, &handle, &hosts, &pool, &tx);
                    }
                    _ = child.cancelled() => break QueryResultIterator::cancelled(),
                    Some(result) = rx.recv() => break result,
                }
            }
        };

        // Cancel so any attempt still in flight unwinds. This is cooperative,
        // not forcible: attempts already committed to I/O finish or time out
        // at that layer.
        child.cancel();
        result
    }
    .instrument(span)
    .await
}

fn spawn_attempt(
    attempt_no: usize,
    child: &CancellationToken,
    handle: &QueryHandle,
    hosts: &Arc<dyn HostSource>,
    pool: &Arc<dyn ConnectionPool>,
    tx: &mpsc::Sender<QueryResultIterator>,
) {
    let ctx = child.clone();
    let borrow = handle.borrow();
    let hosts = hosts.clone();
    let pool = pool.clone();
    let tx = tx.clone();

    tokio::spawn(
        run(ctx, borrow, hosts, pool, tx).instrument(trace_span!("attempt", attempt_no)),
    );
}

/// The Attempt Task Wrapper: runs one attempt engine invocation on behalf of
/// the driver and delivers its iterator to the results channel unless the
/// enclosing scope cancels delivery first. `borrow` is dropped when this
/// function returns regardless of which branch fires, which is the
/// unconditional borrow release the contract requires.
async fn run(
    ctx: CancellationToken,
    borrow: QueryBorrow,
    hosts: Arc<dyn HostSource>,
    pool: Arc<dyn ConnectionPool>,
    tx: mpsc::Sender<QueryResultIterator>,
) {
    let result = run_attempt(&ctx, &*borrow, hosts.as_ref(), pool.as_ref()).await;
    tokio::select! {
        _ = tx.send(result) => {}
        _ = ctx.cancelled() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{AttemptRecord, QueryError};
    use crate::connection::{Connection, PoolShard};
    use crate::frame::Rows;
    use crate::policies::retry::FallthroughRetryPolicy;
    use crate::policies::{HostDescriptor, RetryPolicy, SimpleSpeculativeExecutionPolicy, Token};
    use async_trait::async_trait;
    use std::fmt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct OneHost;

    impl HostDescriptor for OneHost {
        fn hostname(&self) -> &str {
            "A"
        }
        fn is_up(&self) -> bool {
            true
        }
    }

    struct OneSelectedHost;
    impl crate::policies::SelectedHost for OneSelectedHost {
        fn info(&self) -> Option<Arc<dyn HostDescriptor>> {
            Some(Arc::new(OneHost))
        }
        fn token(&self) -> Token {
            Token(0)
        }
        fn mark(&self, _outcome: Option<&(dyn std::error::Error + Send + Sync)>) {}
    }

    #[derive(Debug)]
    struct SingleHostPolicy;
    impl HostSelectionPolicy for SingleHostPolicy {
        fn pick(&self, _query: &dyn ExecutableQuery) -> Box<dyn crate::policies::HostIterator> {
            Box::new(SingleHostIterator { yielded: false })
        }
    }

    struct SingleHostIterator {
        yielded: bool,
    }
    impl crate::policies::HostIterator for SingleHostIterator {
        fn next(&mut self) -> Option<Box<dyn crate::policies::SelectedHost>> {
            if self.yielded {
                None
            } else {
                self.yielded = true;
                Some(Box::new(OneSelectedHost))
            }
        }
    }

    /// Unlike [`SingleHostPolicy`], never exhausts: every `next()` call
    /// hands back another selection of the same host. Used by tests where
    /// more than one attempt needs to pick a host from the shared iterator.
    #[derive(Debug)]
    struct RepeatingHostPolicy;
    impl HostSelectionPolicy for RepeatingHostPolicy {
        fn pick(&self, _query: &dyn ExecutableQuery) -> Box<dyn crate::policies::HostIterator> {
            Box::new(RepeatingHostIterator)
        }
    }

    struct RepeatingHostIterator;
    impl crate::policies::HostIterator for RepeatingHostIterator {
        fn next(&mut self) -> Option<Box<dyn crate::policies::SelectedHost>> {
            Some(Box::new(OneSelectedHost))
        }
    }

    struct OneConnection;
    impl Connection for OneConnection {}

    struct OneShard;
    impl PoolShard for OneShard {
        fn pick(&self, _token: Token) -> Option<Arc<dyn Connection>> {
            Some(Arc::new(OneConnection))
        }
    }

    #[derive(Debug)]
    struct OnePool;
    impl ConnectionPool for OnePool {
        fn get_pool(&self, _host: &dyn HostDescriptor) -> Option<Arc<dyn PoolShard>> {
            Some(Arc::new(OneShard))
        }
    }

    #[derive(Debug)]
    struct Boom;
    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "boom")
        }
    }
    impl std::error::Error for Boom {}
    impl crate::errors::TransientOutcome for Boom {}

    struct DelayedQuery {
        context: CancellationToken,
        delay: Duration,
        idempotent: bool,
        speculative: Option<Arc<dyn crate::policies::SpeculativeExecutionPolicy>>,
        calls: Arc<AtomicUsize>,
        fails_first_n: usize,
    }

    #[async_trait]
    impl ExecutableQuery for DelayedQuery {
        async fn execute(
            &self,
            _ctx: &CancellationToken,
            _conn: &dyn Connection,
        ) -> Result<Rows, Box<dyn QueryError>> {
            tokio::time::sleep(self.delay).await;
            let call_no = self.calls.fetch_add(1, Ordering::SeqCst);
            if call_no < self.fails_first_n {
                Err(Box::new(Boom))
            } else {
                Ok(Rows::default())
            }
        }
        fn record_attempt(&self, _record: &AttemptRecord<'_>) {}
        fn retry_policy(&self) -> Option<Arc<dyn RetryPolicy>> {
            Some(Arc::new(FallthroughRetryPolicy))
        }
        fn speculative_execution_policy(
            &self,
        ) -> Option<Arc<dyn crate::policies::SpeculativeExecutionPolicy>> {
            self.speculative.clone()
        }
        fn routing_key(&self) -> Option<bytes::Bytes> {
            None
        }
        fn custom_partitioner(&self) -> Option<&str> {
            None
        }
        fn keyspace(&self) -> Option<&str> {
            None
        }
        fn table(&self) -> Option<&str> {
            None
        }
        fn consistency(&self) -> crate::statement::Consistency {
            crate::statement::Consistency::default()
        }
        fn is_idempotent(&self) -> bool {
            self.idempotent
        }
        fn is_lwt(&self) -> bool {
            false
        }
        fn context(&self) -> &CancellationToken {
            &self.context
        }
    }

    /// Each completed `execute` call sleeps for a caller-chosen, per-attempt
    /// duration instead of one fixed delay, so a test can make a later-spawned
    /// attempt finish before an earlier one.
    struct StaggeredQuery {
        context: CancellationToken,
        delays: Vec<Duration>,
        idempotent: bool,
        speculative: Option<Arc<dyn crate::policies::SpeculativeExecutionPolicy>>,
        calls: Arc<AtomicUsize>,
    }

    impl StaggeredQuery {
        fn delay_for(&self, call_no: usize) -> Duration {
            self.delays
                .get(call_no)
                .copied()
                .unwrap_or_else(|| *self.delays.last().unwrap())
        }
    }

    #[async_trait]
    impl ExecutableQuery for StaggeredQuery {
        async fn execute(
            &self,
            _ctx: &CancellationToken,
            _conn: &dyn Connection,
        ) -> Result<Rows, Box<dyn QueryError>> {
            let call_no = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay_for(call_no)).await;
            Ok(Rows::default())
        }
        fn record_attempt(&self, _record: &AttemptRecord<'_>) {}
        fn retry_policy(&self) -> Option<Arc<dyn RetryPolicy>> {
            Some(Arc::new(FallthroughRetryPolicy))
        }
        fn speculative_execution_policy(
            &self,
        ) -> Option<Arc<dyn crate::policies::SpeculativeExecutionPolicy>> {
            self.speculative.clone()
        }
        fn routing_key(&self) -> Option<bytes::Bytes> {
            None
        }
        fn custom_partitioner(&self) -> Option<&str> {
            None
        }
        fn keyspace(&self) -> Option<&str> {
            None
        }
        fn table(&self) -> Option<&str> {
            None
        }
        fn consistency(&self) -> crate::statement::Consistency {
            crate::statement::Consistency::default()
        }
        fn is_idempotent(&self) -> bool {
            self.idempotent
        }
        fn is_lwt(&self) -> bool {
            false
        }
        fn context(&self) -> &CancellationToken {
            &self.context
        }
    }

    #[tokio::test]
    async fn happy_path_no_speculation() {
        let query: Arc<dyn ExecutableQuery> = Arc::new(DelayedQuery {
            context: CancellationToken::new(),
            delay: Duration::ZERO,
            idempotent: true,
            speculative: None,
            calls: Arc::new(AtomicUsize::new(0)),
            fails_first_n: 0,
        });

        let iter = execute_query(query, Arc::new(SingleHostPolicy), Arc::new(OnePool)).await;
        assert!(iter.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn non_idempotent_query_never_speculates_even_with_a_policy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let query: Arc<dyn ExecutableQuery> = Arc::new(DelayedQuery {
            context: CancellationToken::new(),
            delay: Duration::from_millis(200),
            idempotent: false,
            speculative: Some(Arc::new(SimpleSpeculativeExecutionPolicy {
                attempts: 3,
                delay: Duration::from_millis(10),
            })),
            calls: calls.clone(),
            fails_first_n: 0,
        });

        let handle = tokio::spawn(execute_query(
            query,
            Arc::new(SingleHostPolicy),
            Arc::new(OnePool),
        ));
        tokio::time::advance(Duration::from_millis(500)).await;
        let iter = handle.await.unwrap();

        assert!(iter.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn speculative_race_primary_wins() {
        // The delay is never reached before the primary completes, so no
        // speculative task is ever spawned.
        let calls = Arc::new(AtomicUsize::new(0));
        let query: Arc<dyn ExecutableQuery> = Arc::new(DelayedQuery {
            context: CancellationToken::new(),
            delay: Duration::from_millis(30),
            idempotent: true,
            speculative: Some(Arc::new(SimpleSpeculativeExecutionPolicy {
                attempts: 2,
                delay: Duration::from_millis(50),
            })),
            calls: calls.clone(),
            fails_first_n: 0,
        });

        let handle = tokio::spawn(execute_query(
            query,
            Arc::new(SingleHostPolicy),
            Arc::new(OnePool),
        ));
        tokio::time::advance(Duration::from_millis(200)).await;
        let iter = handle.await.unwrap();

        assert!(iter.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn speculative_race_secondary_wins() {
        // The primary's `execute` call (call_no 0) is slow; the speculative
        // attempt spawned at the policy's 10ms tick is fast (call_no 1) and
        // wins the race. The primary's eventual result is dropped and its
        // borrow is still released once it unwinds after cancellation.
        let calls = Arc::new(AtomicUsize::new(0));
        let query: Arc<dyn ExecutableQuery> = Arc::new(StaggeredQuery {
            context: CancellationToken::new(),
            delays: vec![Duration::from_millis(100), Duration::from_millis(20)],
            idempotent: true,
            speculative: Some(Arc::new(SimpleSpeculativeExecutionPolicy {
                attempts: 1,
                delay: Duration::from_millis(10),
            })),
            calls: calls.clone(),
        });

        let handle = QueryHandle::new(query.clone());
        let task = tokio::spawn(execute_with_handle(
            query,
            Arc::new(RepeatingHostPolicy),
            Arc::new(OnePool),
            handle.clone(),
        ));
        tokio::time::advance(Duration::from_millis(500)).await;
        let iter = task.await.unwrap();

        assert!(iter.is_ok());
        // Both attempts had started `execute` (and so consumed a call slot)
        // by the time the result was surfaced: the secondary at call_no 1
        // (20ms delay) finishes at t=30ms, before the primary's call_no 0
        // (100ms delay) finishes at t=100ms.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // Cancellation unwinds the still-running primary attempt; its borrow
        // and the secondary's are both released, regardless of which one
        // lost the race.
        assert_eq!(handle.active_borrows(), 0);
    }
}
