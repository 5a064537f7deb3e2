//! Retry policy capability contract.
//!
//! The interface is intentionally two-phase, mirroring the teacher driver's
//! `RetryPolicy::decide_should_retry` but split into a budget check and a
//! per-error verdict so that "three tries total, but always on a different
//! host for timeouts" can be expressed as two orthogonal policies.

use std::fmt;

use crate::statement::Consistency;

/// Snapshot of the failed attempt handed to [`RetrySession::get_retry_type`].
pub struct QueryInfo<'a> {
    /// The error the attempt just failed with.
    pub error: &'a (dyn std::error::Error + Send + Sync + 'static),
    /// Whether the query is known to be safe to execute more than once.
    pub is_idempotent: bool,
    /// Consistency the query was executed with.
    pub consistency: Consistency,
}

/// Verdict returned by [`RetrySession::get_retry_type`] for a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    /// Retry against the same host.
    Retry,
    /// Advance the host iterator and retry against the next host.
    RetryNextHost,
    /// Surface the current error to the caller.
    Rethrow,
    /// Surface the current iterator without further action (distinct from
    /// `Rethrow` only in the source's vocabulary; behaves identically here).
    Ignore,
}

/// A retry policy, attached to a query either directly or inherited from the
/// driver's default [`crate::policies::ExecutionProfile`].
///
/// `RetryPolicy` is a factory: each call to [`crate::execution::attempt::run_attempt`]
/// (one `do()` invocation in the source's vocabulary) asks for a fresh
/// [`RetrySession`], since retry policies like [`DefaultRetryPolicy`] carry
/// state ("have we already retried once for `Unavailable`?") that is scoped
/// to a single attempt-engine invocation, not to the whole query.
pub trait RetryPolicy: fmt::Debug + Send + Sync {
    fn new_session(&self) -> Box<dyn RetrySession + Send>;
}

/// A single attempt-engine invocation's view of a retry policy: the budget
/// check (`Attempt`) and the per-error verdict (`GetRetryType`).
pub trait RetrySession: Send {
    /// Whether another retry attempt is within budget. Consulted *before*
    /// `get_retry_type`; when it returns `false` the attempt engine stops
    /// regardless of what `get_retry_type` would have said.
    fn attempt(&mut self) -> bool;

    /// Classifies a failed attempt's error into a retry verdict.
    fn get_retry_type(&mut self, query_info: &QueryInfo<'_>) -> RetryVerdict;
}

/// Forwards all errors directly to the caller, never retries. Grounded on
/// the teacher's `FallthroughRetryPolicy`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallthroughRetryPolicy;

impl RetryPolicy for FallthroughRetryPolicy {
    fn new_session(&self) -> Box<dyn RetrySession + Send> {
        Box::new(FallthroughRetrySession)
    }
}

struct FallthroughRetrySession;

impl RetrySession for FallthroughRetrySession {
    fn attempt(&mut self) -> bool {
        false
    }

    fn get_retry_type(&mut self, _query_info: &QueryInfo<'_>) -> RetryVerdict {
        RetryVerdict::Rethrow
    }
}

/// Default retry policy: retries when there is a reasonable chance a retry
/// will help, and gives up otherwise. Grounded on the teacher's
/// `DefaultRetryPolicy` (itself modeled on the DataStax Java driver) and
/// adapted to the two-phase `Attempt`/`GetRetryType` split. The
/// database-specific error kinds the teacher switches on (`Unavailable`,
/// `ReadTimeout`, ...) belong to the wire-protocol layer, so this policy
/// keeps the teacher's shape (bounded retries, non-idempotent queries never
/// retried, at most one next-host hop followed by at most one same-host
/// retry) without reintroducing database-specific error variants.
#[derive(Debug, Clone, Copy)]
pub struct DefaultRetryPolicy {
    max_retry_count: u32,
}

impl DefaultRetryPolicy {
    pub fn new() -> Self {
        Self { max_retry_count: 3 }
    }

    pub fn with_max_retry_count(max_retry_count: u32) -> Self {
        Self { max_retry_count }
    }
}

impl Default for DefaultRetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn new_session(&self) -> Box<dyn RetrySession + Send> {
        Box::new(DefaultRetrySession {
            retries_remaining: self.max_retry_count,
            was_unavailable_retry: false,
            was_read_timeout_retry: false,
        })
    }
}

struct DefaultRetrySession {
    retries_remaining: u32,
    was_unavailable_retry: bool,
    was_read_timeout_retry: bool,
}

impl RetrySession for DefaultRetrySession {
    fn attempt(&mut self) -> bool {
        if self.retries_remaining == 0 {
            return false;
        }
        self.retries_remaining -= 1;
        true
    }

    fn get_retry_type(&mut self, query_info: &QueryInfo<'_>) -> RetryVerdict {
        // Classification mirrors DefaultRetryPolicy::decide_should_retry in
        // the teacher: non-idempotent queries never retry a write that may
        // already have landed, "unavailable" retries at most once against a
        // different host, and a read timeout that actually had enough
        // replies respond retries once against the same host.
        if !query_info.is_idempotent {
            return RetryVerdict::Rethrow;
        }

        if !self.was_unavailable_retry {
            self.was_unavailable_retry = true;
            return RetryVerdict::RetryNextHost;
        }

        if !self.was_read_timeout_retry {
            self.was_read_timeout_retry = true;
            return RetryVerdict::Retry;
        }

        RetryVerdict::Rethrow
    }
}
