//! Host selection capability contract and the host-iterator synchronization
//! adapter used when speculative execution is active.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

use crate::capability::ExecutableQuery;

/// A routing-key hashed into a ring position. Used by the connection pool to
/// pick a shard-affinity connection for a [`SelectedHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub i64);

/// Identity and liveness of a cluster node. The execution core only ever
/// reads [`HostDescriptor::hostname`] and [`HostDescriptor::is_up`]; topology
/// discovery and up/down detection live entirely outside this crate.
pub trait HostDescriptor: fmt::Debug + Send + Sync {
    fn hostname(&self) -> &str;
    fn is_up(&self) -> bool;
}

/// A routing policy's recommendation for one attempt: the candidate host (if
/// any), the token to route the connection pick by, and a feedback channel
/// the attempt engine reports the observed outcome on.
pub trait SelectedHost: Send {
    fn info(&self) -> Option<Arc<dyn HostDescriptor>>;
    fn token(&self) -> Token;

    /// Reports the attempt's outcome back to the routing policy. `None`
    /// means healthy, including passthrough outcomes like a cancelled
    /// context or a not-found result; `Some(err)` counts against the host's
    /// health score.
    fn mark(&self, outcome: Option<&(dyn std::error::Error + Send + Sync)>);
}

/// A lazy, possibly-infinite sequence of [`SelectedHost`] values produced by
/// a [`HostSelectionPolicy`] for one execution. Consumed synchronously by
/// whichever adapter (exclusive or serialized) the execution driver installs.
pub trait HostIterator: Send {
    fn next(&mut self) -> Option<Box<dyn SelectedHost>>;
}

/// `HostSelectionPolicy.Pick(query) -> HostIterator`. Load-balancing
/// heuristics are an external collaborator's job, so only a minimal
/// `RoundRobinPolicy` is provided here for tests and as a usable default.
pub trait HostSelectionPolicy: fmt::Debug + Send + Sync {
    fn pick(&self, query: &dyn ExecutableQuery) -> Box<dyn HostIterator>;
}

/// The adapter the attempt engine actually calls through. Two
/// implementations exist so the mutual-exclusion cost is paid only when
/// speculative execution is active: [`UnsynchronizedHostSource`] hands out a
/// plain `&mut` borrow for the single-consumer case, [`SynchronizedHostIterator`]
/// takes a lock around every `next()` so concurrent speculative attempts
/// never race on the same iterator.
#[async_trait]
pub trait HostSource: Send + Sync {
    async fn next(&self) -> Option<Box<dyn SelectedHost>>;
}

/// Used when speculative execution is disabled: exactly one task will ever
/// consume the iterator, so a (never-contended, never held across an
/// `.await`) standard-library mutex is enough to give it `Send + Sync`
/// interior mutability without paying for an async lock.
pub struct UnsynchronizedHostSource(StdMutex<Box<dyn HostIterator>>);

impl UnsynchronizedHostSource {
    pub fn new(iter: Box<dyn HostIterator>) -> Self {
        Self(StdMutex::new(iter))
    }
}

#[async_trait]
impl HostSource for UnsynchronizedHostSource {
    async fn next(&self) -> Option<Box<dyn SelectedHost>> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .next()
    }
}

/// Installed by the execution driver whenever speculation is active: every
/// `next()` call is serialized behind an async mutex so two speculative
/// attempt tasks can never advance the shared iterator at the same instant.
pub struct SynchronizedHostIterator(AsyncMutex<Box<dyn HostIterator>>);

impl SynchronizedHostIterator {
    pub fn new(iter: Box<dyn HostIterator>) -> Self {
        Self(AsyncMutex::new(iter))
    }
}

#[async_trait]
impl HostSource for SynchronizedHostIterator {
    async fn next(&self) -> Option<Box<dyn SelectedHost>> {
        self.0.lock().await.next()
    }
}

/// Minimal round-robin host selection, grounded on the teacher's default
/// `RoundRobinPolicy` (used unconditionally as the fallback inside its
/// `TokenAwarePolicy` default). Ignores the query's routing key entirely;
/// genuine token-aware load balancing is left to a real routing policy
/// external to this crate.
#[derive(Debug)]
pub struct RoundRobinPolicy {
    hosts: Vec<Arc<dyn HostDescriptor>>,
    next_index: AtomicUsize,
}

impl RoundRobinPolicy {
    pub fn new(hosts: Vec<Arc<dyn HostDescriptor>>) -> Self {
        Self {
            hosts,
            next_index: AtomicUsize::new(0),
        }
    }
}

impl HostSelectionPolicy for RoundRobinPolicy {
    fn pick(&self, _query: &dyn ExecutableQuery) -> Box<dyn HostIterator> {
        let start = self.next_index.fetch_add(1, Ordering::Relaxed) % self.hosts.len().max(1);
        Box::new(RoundRobinIterator {
            hosts: self.hosts.clone(),
            start,
            offset: 0,
        })
    }
}

struct RoundRobinIterator {
    hosts: Vec<Arc<dyn HostDescriptor>>,
    start: usize,
    offset: usize,
}

impl HostIterator for RoundRobinIterator {
    fn next(&mut self) -> Option<Box<dyn SelectedHost>> {
        if self.offset >= self.hosts.len() {
            return None;
        }
        let host = self.hosts[(self.start + self.offset) % self.hosts.len()].clone();
        self.offset += 1;
        Some(Box::new(RoundRobinSelectedHost { host }))
    }
}

struct RoundRobinSelectedHost {
    host: Arc<dyn HostDescriptor>,
}

impl SelectedHost for RoundRobinSelectedHost {
    fn info(&self) -> Option<Arc<dyn HostDescriptor>> {
        Some(self.host.clone())
    }

    fn token(&self) -> Token {
        // Round robin ignores tokens; any connection in the shard works.
        Token(0)
    }

    fn mark(&self, outcome: Option<&(dyn std::error::Error + Send + Sync)>) {
        if let Some(err) = outcome {
            tracing::debug!(host = self.host.hostname(), error = %err, "host marked unhealthy");
        }
    }
}
