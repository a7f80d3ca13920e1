use std::time::Duration;

use crate::request::Response;

/// A failure that produced no response at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid request target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("transport failure: {0}")]
    Other(String),
}

/// The ways a dispatched request can fail.
///
/// Only rate limiting is ever retried, and only inside the dispatcher; every
/// other variant reaches the caller as soon as it happens.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The transport could not produce a response.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The upstream answered with a status other than success or 429.
    #[error("upstream responded with status {}", .response.status)]
    Upstream { response: Response },

    /// The upstream kept answering 429 until the retry ceiling was reached.
    #[error("rate limited by upstream, gave up after {retries} retries")]
    RateLimited { retries: u32, response: Response },

    /// The resource asked for does not exist.
    #[error("the resource was not found")]
    NotFound,

    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl DispatchError {
    /// The status of the response behind this error, if there was one.
    pub fn status(&self) -> Option<u16> {
        self.response().map(|response| response.status)
    }

    pub fn response(&self) -> Option<&Response> {
        match self {
            DispatchError::Upstream { response } | DispatchError::RateLimited { response, .. } => {
                Some(response)
            }
            _ => None,
        }
    }
}

/// Returned by a batch map whose [`CancellationToken`](crate::CancellationToken)
/// was observed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("the batch operation was cancelled")]
pub struct Cancelled;
