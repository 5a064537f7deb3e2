use std::sync::Arc;

use crate::errors::ExecutionError;
use crate::frame::Rows;
use crate::policies::HostDescriptor;

/// Lazy, finite stream of rows produced by one attempt, or a terminal error.
/// Ownership transfers to the caller on return from
/// [`crate::execution::driver::execute_query`].
#[derive(Debug, Default)]
pub struct QueryResultIterator {
    rows: Option<Rows>,
    error: Option<ExecutionError>,
    host: Option<Arc<dyn HostDescriptor>>,
}

impl QueryResultIterator {
    pub fn success(rows: Rows, host: Arc<dyn HostDescriptor>) -> Self {
        Self {
            rows: Some(rows),
            error: None,
            host: Some(host),
        }
    }

    pub fn failure(error: ExecutionError, host: Option<Arc<dyn HostDescriptor>>) -> Self {
        Self {
            rows: None,
            error: Some(error),
            host,
        }
    }

    /// The iterator surfaced when the enclosing cancellation scope is
    /// cancelled before a result arrives.
    pub fn cancelled() -> Self {
        Self::failure(ExecutionError::Cancelled, None)
    }

    pub fn rows(&self) -> Option<&Rows> {
        self.rows.as_ref()
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        self.error.as_ref()
    }

    pub fn host(&self) -> Option<&Arc<dyn HostDescriptor>> {
        self.host.as_ref()
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Rows, ExecutionError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.rows.unwrap_or_default()),
        }
    }
}
