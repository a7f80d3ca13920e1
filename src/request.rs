//! Request descriptors handed to the dispatcher, and the responses handed back.

use std::{fmt, mem, time::Duration};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Status code an upstream uses to signal rate limiting.
pub const TOO_MANY_REQUESTS: u16 = 429;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the transport needs to perform one request, plus the queueing
/// hints the dispatcher consumes.
///
/// The `priority` marker is stripped when the descriptor is submitted, so a
/// transport never sees it set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestDescriptor {
    pub method: Method,

    /// Path relative to the transport's base URL, or an absolute URL.
    pub target: String,

    /// Query parameters, in the order they should be encoded.
    pub params: Vec<(String, String)>,

    pub body: Option<Value>,

    /// Serve this request ahead of every normal request. Among priority
    /// requests, the most recently submitted one is served first.
    pub priority: bool,

    /// Retry ceiling for this request alone; overrides the dispatcher's
    /// [`RetryPolicy`](crate::RetryPolicy) when set.
    pub max_retries: Option<u32>,

    /// Overrides the transport's default timeout.
    pub timeout: Option<Duration>,
}

impl RequestDescriptor {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::Get, target)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::Delete, target)
    }

    pub fn head(target: impl Into<String>) -> Self {
        Self::new(Method::Head, target)
    }

    pub fn options(target: impl Into<String>) -> Self {
        Self::new(Method::Options, target)
    }

    pub fn post(target: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, target).with_body(body)
    }

    pub fn put(target: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, target).with_body(body)
    }

    pub fn patch(target: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Patch, target).with_body(body)
    }

    /// Append a query parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Mark this request as time-sensitive. See [`RequestDescriptor::priority`].
    pub fn prioritized(mut self) -> Self {
        self.priority = true;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Remove the priority marker, returning whether it was set.
    pub(crate) fn take_priority(&mut self) -> bool {
        mem::take(&mut self.priority)
    }
}

/// A response as returned by the transport, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        self.status == TOO_MANY_REQUESTS
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// The body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
