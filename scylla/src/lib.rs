//! Query execution core for a token-aware, distributed wide-column database
//! driver.
//!
//! Given a [`capability::ExecutableQuery`] (a [`statement::Query`],
//! [`statement::PreparedStatement`], or [`statement::Batch`]), this crate
//! chooses a sequence of candidate hosts from a pluggable
//! [`policies::HostSelectionPolicy`], dispatches the query over a connection
//! borrowed from a [`connection::ConnectionPool`], applies the query's
//! [`policies::RetryPolicy`] across failed attempts, and, for idempotent
//! queries under a [`policies::SpeculativeExecutionPolicy`], races
//! additional hedged attempts, surfacing whichever [`execution::QueryResultIterator`]
//! arrives first.
//!
//! Wire protocol framing, topology discovery, connection pool construction,
//! and result-set decoding all live outside this crate: it only consumes the
//! narrow seams those layers expose ([`capability::QueryExecutor`],
//! [`connection::ConnectionPool`], the policy traits in [`policies`]).
//!
//! The entry point is [`execution::execute_query`].

pub mod capability;
pub mod connection;
pub mod errors;
pub mod execution;
pub mod frame;
pub mod policies;
pub mod statement;

pub use capability::{AttemptRecord, ExecutableQuery, QueryError, QueryExecutor};
pub use connection::{Connection, ConnectionPool, PoolShard};
pub use errors::ExecutionError;
pub use execution::execute_query;
pub use execution::iterator::QueryResultIterator;
pub use policies::ExecutionProfile;
