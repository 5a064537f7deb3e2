use std::fmt;

use thiserror::Error;

use crate::policies::retry::RetryVerdict;

/// One of the reasons a candidate host was skipped before a connection could
/// even be attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostSelectionErrorKind {
    /// The routing policy produced a host that is absent or marked down.
    #[error("host is nil or down")]
    HostNilOrDown,

    /// No pool shard is registered for this host (typically a race with a
    /// topology change).
    #[error("no connection pool for host")]
    NoConnPool,

    /// The shard exists but currently has no usable connection.
    #[error("no connection available in host pool")]
    NoConnInHostPool,

    /// An attempt against this host ran and failed, and the retry policy
    /// chose to continue with `Retry` or `RetryNextHost`. Carries the failed
    /// attempt's error, formatted, since the accumulated list is a
    /// `HostSelectionErrorKind` regardless of which gate produced it.
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// A single host-selection failure, printed as `"<host>: <cause>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSelectionError {
    /// Hostname of the candidate that failed, if the iterator gave us one at
    /// all (it is possible for the host descriptor itself to be absent).
    pub host: Option<String>,
    pub cause: HostSelectionErrorKind,
}

impl fmt::Display for HostSelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Some(host) => write!(f, "{host}: {}", self.cause),
            None => write!(f, "<no host>: {}", self.cause),
        }
    }
}

impl std::error::Error for HostSelectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Preserves every underlying host-selection cause instead of flattening
/// them into a single string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSelectionErrorList(pub Vec<HostSelectionError>);

impl HostSelectionErrorList {
    pub fn push(&mut self, err: HostSelectionError) {
        self.0.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for HostSelectionErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut causes = self.0.iter();
        if let Some(first) = causes.next() {
            write!(f, "{first}")?;
            for cause in causes {
                write!(f, "; {cause}")?;
            }
            Ok(())
        } else {
            write!(f, "no host-selection errors recorded")
        }
    }
}

impl std::error::Error for HostSelectionErrorList {}

/// The error surfaced inside a [`crate::execution::iterator::QueryResultIterator`]
/// when an execution does not produce rows.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The host iterator produced no hosts at all.
    #[error("no connections: host iterator produced no candidates")]
    NoConnections,

    /// Every candidate host failed the liveness/pool/connection gates or was
    /// exhausted by retries; carries every accumulated cause.
    #[error("all candidate hosts failed: {0}")]
    SelectionFailed(HostSelectionErrorList),

    /// The retry policy returned a verdict the attempt engine does not
    /// recognize. This indicates a bug in the retry policy, not in the
    /// query or the cluster.
    #[error("retry policy returned an unrecognized verdict: {0:?}")]
    UnknownRetryType(RetryVerdict),

    /// The execution's cancellation scope was cancelled before a result was
    /// produced.
    #[error("execution cancelled")]
    Cancelled,

    /// Any other error produced by `query.execute(..)`, after retry
    /// classification decided not to retry further.
    #[error(transparent)]
    Query(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Implemented by the error type a query's `execute` returns, so the core can
/// recognize passthrough outcomes (context cancelled, deadline exceeded,
/// not found) without hardcoding a specific database's error type.
///
/// A transient outcome is a logical result of the request itself. It must
/// not penalize the host's health score (`Mark(nil)`), and it short-circuits
/// retries exactly like a success would.
pub trait TransientOutcome {
    fn is_transient(&self) -> bool {
        false
    }
}

/// Adapts a boxed [`crate::capability::QueryError`] into a boxed
/// `std::error::Error + Send + Sync`.
pub(crate) struct QueryErrorBox(pub Box<dyn crate::capability::QueryError>);

impl fmt::Debug for QueryErrorBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for QueryErrorBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for QueryErrorBox {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

