use std::{
    fmt::{self, Debug, Formatter},
    future::Future,
    sync::Arc,
};

use futures::future::{BoxFuture, FutureExt};

use crate::{error::TransportError, request::RequestDescriptor, request::Response};

/// The collaborator that actually talks to the network. It performs exactly
/// one request per call and reports any response, whatever its status, as
/// `Ok`; `Err` is reserved for failures that produced no response.
///
/// The returned future must not submit to the dispatcher that is polling it.
pub trait Transport: Send + Sync + 'static {
    fn perform(&self, request: RequestDescriptor) -> BoxFuture<'static, Result<Response, TransportError>>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn perform(&self, request: RequestDescriptor) -> BoxFuture<'static, Result<Response, TransportError>> {
        (**self).perform(request)
    }
}

/// A [`Transport`] backed by a closure. Created with [`transport_fn`].
#[derive(Clone)]
pub struct TransportFn<F> {
    perform: F,
}

impl<F> Debug for TransportFn<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportFn")
            .field("perform", &"<closure>")
            .finish()
    }
}

/// Wrap an async closure as a [`Transport`].
///
/// ```
/// use futures::future;
/// use ratequeue::{transport_fn, Response};
///
/// let transport = transport_fn(|request| future::ready(Ok(Response::new(200, request.target))));
/// ```
pub fn transport_fn<F, Fut>(perform: F) -> TransportFn<F>
where
    F: Fn(RequestDescriptor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, TransportError>> + Send + 'static,
{
    TransportFn { perform }
}

impl<F, Fut> Transport for TransportFn<F>
where
    F: Fn(RequestDescriptor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, TransportError>> + Send + 'static,
{
    fn perform(&self, request: RequestDescriptor) -> BoxFuture<'static, Result<Response, TransportError>> {
        (self.perform)(request).boxed()
    }
}
