//! Statement types: the concrete `Query`/`PreparedStatement`/`Batch` shapes
//! that implement the query capability contract (see [`crate::capability`]).

pub mod batch;
pub mod prepared_statement;
pub mod query;

pub use batch::Batch;
pub use prepared_statement::PreparedStatement;
pub use query::Query;

/// Consistency level requested for a statement.
///
/// Mirrors the levels defined by the CQL native protocol; the execution core
/// never interprets these itself, it only forwards them to `execute` and to
/// the retry policy's [`crate::policies::retry::QueryInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    LocalOne,
    Serial,
    LocalSerial,
}

impl Default for Consistency {
    fn default() -> Self {
        Consistency::LocalQuorum
    }
}
