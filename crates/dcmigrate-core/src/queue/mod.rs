//! Managed queue length lookup.
//!
//! `*_WAIT` stages learn that background work has drained by polling the
//! length of the queue feeding it. The stage machine never polls; drivers
//! do, on their own schedule.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

type BoxedCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug, Clone)]
pub enum QueueError {
    /// The queue service could not be reached. Retry with backoff.
    #[error("{message}")]
    Connection {
        message: String,
        #[source]
        source: BoxedCause,
    },

    /// The service answered but refused the request. Needs an operator.
    #[error("Queue API returned an unsuccessful response: {message}")]
    UnsuccessfulResponse { message: String },

    /// The request itself was malformed, e.g. a blank queue name.
    #[error("Bad queue request: {message}")]
    BadRequest { message: String },
}

impl QueueError {
    pub fn connection<E>(message: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Self::Connection {
            message: message.into(),
            source: Arc::from(source.into()),
        }
    }

    pub fn unsuccessful(message: impl Into<String>) -> Self {
        Self::UnsuccessfulResponse {
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Reports the number of pending messages in a named queue.
#[async_trait]
pub trait QueueLengthPoller: Send + Sync {
    /// Approximate number of messages still pending in `queue_name`,
    /// including ones currently being processed.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(n))`: The queue exists and holds about `n` messages
    /// - `Ok(None)`: The queue has not been provisioned (yet)
    /// - `Err(_)`: See [`QueueError`] for which failures are retryable
    async fn queue_length(&self, queue_name: &str) -> Result<Option<u64>, QueueError>;
}

/// Rejects blank queue names before any request is made.
pub fn validate_queue_name(queue_name: &str) -> Result<(), QueueError> {
    if queue_name.trim().is_empty() {
        return Err(QueueError::bad_request("Expected queue name to be specified"));
    }
    Ok(())
}
