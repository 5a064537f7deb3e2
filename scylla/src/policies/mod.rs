//! Capability contracts the execution core consumes: host selection, retry,
//! and speculative execution policies.

pub mod host_selection;
pub mod retry;
pub mod speculative_execution;

pub use host_selection::{HostDescriptor, HostIterator, HostSelectionPolicy, SelectedHost, Token};
pub use retry::{QueryInfo, RetryPolicy, RetrySession, RetryVerdict};
pub use speculative_execution::{NoSpeculation, SimpleSpeculativeExecutionPolicy, SpeculativeExecutionPolicy};

use std::sync::Arc;

use host_selection::RoundRobinPolicy;
use retry::DefaultRetryPolicy;

/// The per-execution policy bundle a caller assembles once, analogous to the
/// teacher's `SessionConfig`. Per-statement overrides on
/// `Query`/`PreparedStatement`/`Batch` take precedence over these defaults;
/// see [`crate::capability::ExecutableQuery::retry_policy`] and
/// [`crate::capability::ExecutableQuery::speculative_execution_policy`].
#[derive(Clone)]
pub struct ExecutionProfile {
    pub host_selection_policy: Arc<dyn HostSelectionPolicy>,
    pub retry_policy: Arc<dyn RetryPolicy>,
    /// `None` means no speculation, equivalent to a policy whose
    /// `attempts()` returns zero.
    pub speculative_execution_policy: Option<Arc<dyn SpeculativeExecutionPolicy>>,
}

impl ExecutionProfile {
    pub fn new(host_selection_policy: Arc<dyn HostSelectionPolicy>) -> Self {
        Self {
            host_selection_policy,
            retry_policy: Arc::new(DefaultRetryPolicy::new()),
            speculative_execution_policy: None,
        }
    }
}

impl std::fmt::Debug for ExecutionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionProfile")
            .field("speculative_execution_policy", &self.speculative_execution_policy.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for ExecutionProfile {
    /// Mirrors `SessionConfig::new()`'s defaults in the teacher: a
    /// round-robin host selection policy (over no hosts, a real driver
    /// wires this up from topology discovery), the default retry policy,
    /// and no speculative execution.
    fn default() -> Self {
        Self::new(Arc::new(RoundRobinPolicy::new(Vec::new())))
    }
}
