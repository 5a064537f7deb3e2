//! The execution core: the Attempt Engine, the Execution Driver that
//! orchestrates it across retries and speculative attempts, the query
//! borrow/release bookkeeping, and the result iterator both surface.

pub mod attempt;
pub mod borrow;
pub mod driver;
pub mod iterator;

pub use attempt::run_attempt;
pub use driver::execute_query;
pub use iterator::QueryResultIterator;
