//! Minimal result-row shape. Wire framing and result-set decoding live
//! outside this crate; this module exists only so
//! [`crate::execution::iterator::QueryResultIterator`] has something
//! concrete to carry between an attempt and the caller.

pub mod response;

pub use response::{Row, Rows};
