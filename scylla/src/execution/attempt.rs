use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::capability::{AttemptRecord, ExecutableQuery};
use crate::connection::ConnectionPool;
use crate::errors::{
    ExecutionError, HostSelectionError, HostSelectionErrorKind, HostSelectionErrorList,
    QueryErrorBox,
};
use crate::policies::host_selection::{HostSource, SelectedHost};
use crate::policies::retry::{QueryInfo, RetryVerdict};

use super::iterator::QueryResultIterator;

/// Runs a single logical execution of `query` against hosts drawn from
/// `hosts`, retrying per `query.retry_policy()` until the host iterator is
/// exhausted or a terminal retry verdict is reached. Always returns an
/// iterator; never fails outright.
pub async fn run_attempt(
    ctx: &CancellationToken,
    query: &dyn ExecutableQuery,
    hosts: &dyn HostSource,
    pool: &dyn ConnectionPool,
) -> QueryResultIterator {
    let mut errors = HostSelectionErrorList::default();
    let mut retry_session = query.retry_policy().map(|policy| policy.new_session());
    let mut pending: Option<Box<dyn SelectedHost>> = None;

    loop {
        let selected = match pending.take() {
            Some(selected) => selected,
            None => match hosts.next().await {
                Some(selected) => selected,
                None => {
                    return if errors.is_empty() {
                        QueryResultIterator::failure(ExecutionError::NoConnections, None)
                    } else {
                        QueryResultIterator::failure(ExecutionError::SelectionFailed(errors), None)
                    };
                }
            },
        };

        let host_name = selected.info().as_ref().map(|d| d.hostname().to_string());

        let descriptor = match selected.info() {
            Some(descriptor) if descriptor.is_up() => descriptor,
            _ => {
                debug!(host = host_name.as_deref(), "host is nil or down, skipping");
                errors.push(HostSelectionError {
                    host: host_name,
                    cause: HostSelectionErrorKind::HostNilOrDown,
                });
                continue;
            }
        };

        let pool_shard = match pool.get_pool(descriptor.as_ref()) {
            Some(shard) => shard,
            None => {
                debug!(host = host_name.as_deref(), "no connection pool for host");
                errors.push(HostSelectionError {
                    host: host_name,
                    cause: HostSelectionErrorKind::NoConnPool,
                });
                continue;
            }
        };

        let conn = match pool_shard.pick(selected.token()) {
            Some(conn) => conn,
            None => {
                debug!(host = host_name.as_deref(), "no connection in host pool");
                errors.push(HostSelectionError {
                    host: host_name,
                    cause: HostSelectionErrorKind::NoConnInHostPool,
                });
                continue;
            }
        };

        let start = Instant::now();
        let outcome = query.execute(ctx, conn.as_ref()).await;
        let end = Instant::now();

        query.record_attempt(&AttemptRecord {
            keyspace: query.keyspace(),
            start,
            end,
            host: Some(descriptor.clone()),
            succeeded: outcome.is_ok(),
        });

        let err = match outcome {
            Ok(rows) => {
                // nil / success is a logical outcome, never a host fault.
                selected.mark(None);
                return QueryResultIterator::success(rows, descriptor);
            }
            Err(err) => err,
        };

        // Context-cancelled, deadline-exceeded and not-found are passthrough
        // outcomes: logical results of the request itself, not symptoms of
        // a failing node, so they don't penalize the host and short-circuit
        // retries.
        if err.is_transient() {
            selected.mark(None);
            return QueryResultIterator::failure(
                ExecutionError::Query(Box::new(QueryErrorBox(err))),
                Some(descriptor),
            );
        }

        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(QueryErrorBox(err));
        selected.mark(Some(boxed.as_ref()));

        let keep_retrying = match &mut retry_session {
            Some(session) => session.attempt(),
            None => false,
        };

        if !keep_retrying {
            return QueryResultIterator::failure(
                ExecutionError::Query(boxed),
                Some(descriptor),
            );
        }

        let verdict = retry_session.as_mut().unwrap().get_retry_type(&QueryInfo {
            error: boxed.as_ref(),
            is_idempotent: query.is_idempotent(),
            consistency: query.consistency(),
        });

        errors.push(HostSelectionError {
            host: host_name,
            cause: HostSelectionErrorKind::QueryFailed(boxed.to_string()),
        });

        match verdict {
            RetryVerdict::Retry => {
                pending = Some(selected);
            }
            RetryVerdict::RetryNextHost => {
                // pending stays None: the next loop iteration advances hosts.
            }
            RetryVerdict::Rethrow | RetryVerdict::Ignore => {
                // Returns the current iterator without joining the errors
                // accumulated so far on earlier hosts.
                return QueryResultIterator::failure(
                    ExecutionError::Query(boxed),
                    Some(descriptor),
                );
            }
        }
    }
}
