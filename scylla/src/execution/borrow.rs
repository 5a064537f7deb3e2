use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::capability::ExecutableQuery;

/// Explicit borrow/release reference counting for the user-facing query,
/// modeled as an atomic reference count with a drop hook. Every attempt
/// task calls [`borrow`](QueryHandle::borrow) before it spawns and the
/// returned [`QueryBorrow`] releases on drop, regardless of how the task
/// exits (success, cancellation, or losing the result race), so
/// borrow/release stays balanced without callers having to remember to do
/// it.
#[derive(Clone)]
pub struct QueryHandle {
    query: Arc<dyn ExecutableQuery>,
    active_borrows: Arc<AtomicUsize>,
}

impl QueryHandle {
    pub fn new(query: Arc<dyn ExecutableQuery>) -> Self {
        Self {
            query,
            active_borrows: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn query(&self) -> &Arc<dyn ExecutableQuery> {
        &self.query
    }

    /// Borrows the query for the lifetime of one attempt task.
    pub fn borrow(&self) -> QueryBorrow {
        self.active_borrows.fetch_add(1, Ordering::SeqCst);
        QueryBorrow {
            query: self.query.clone(),
            active_borrows: self.active_borrows.clone(),
        }
    }

    /// Number of attempts currently holding a borrow. Tests use this to
    /// assert that borrow/release stays balanced and that a non-idempotent
    /// query never exceeds one live attempt.
    pub fn active_borrows(&self) -> usize {
        self.active_borrows.load(Ordering::SeqCst)
    }
}

/// One outstanding borrow of a query. Derefs to the capability bundle so an
/// attempt task can call `execute`/`attempt`/etc. directly through it.
pub struct QueryBorrow {
    query: Arc<dyn ExecutableQuery>,
    active_borrows: Arc<AtomicUsize>,
}

impl Deref for QueryBorrow {
    type Target = dyn ExecutableQuery;

    fn deref(&self) -> &Self::Target {
        self.query.as_ref()
    }
}

impl Drop for QueryBorrow {
    fn drop(&mut self) {
        self.active_borrows.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{AttemptRecord, QueryError};
    use crate::connection::Connection;
    use crate::frame::Rows;
    use crate::policies::{RetryPolicy, SpeculativeExecutionPolicy};
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct StubQuery {
        context: CancellationToken,
    }

    #[async_trait]
    impl ExecutableQuery for StubQuery {
        async fn execute(
            &self,
            _ctx: &CancellationToken,
            _conn: &dyn Connection,
        ) -> Result<Rows, Box<dyn QueryError>> {
            Ok(Rows::default())
        }

        fn record_attempt(&self, _record: &AttemptRecord<'_>) {}
        fn retry_policy(&self) -> Option<Arc<dyn RetryPolicy>> {
            None
        }
        fn speculative_execution_policy(&self) -> Option<Arc<dyn SpeculativeExecutionPolicy>> {
            None
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
            true
        }
        fn is_lwt(&self) -> bool {
            false
        }
        fn context(&self) -> &CancellationToken {
            &self.context
        }
    }

    #[test]
    fn borrow_and_release_are_balanced() {
        let handle = QueryHandle::new(Arc::new(StubQuery {
            context: CancellationToken::new(),
        }));
        assert_eq!(handle.active_borrows(), 0);

        let borrow_a = handle.borrow();
        let borrow_b = handle.borrow();
        assert_eq!(handle.active_borrows(), 2);

        drop(borrow_a);
        assert_eq!(handle.active_borrows(), 1);

        drop(borrow_b);
        assert_eq!(handle.active_borrows(), 0);
    }
}
