//! Ratequeue is a client-side access layer for rate-limited HTTP APIs. It
//! serializes every outbound call through a single lane, lets time-sensitive
//! calls jump the queue, and recovers transparently when the upstream answers
//! `429 Too Many Requests`. Alongside it, [`map_async`] transforms large
//! result sets without starving the executor, and can be cancelled.
//!
//! ## Overview
//!
//! Requests are described with a [`RequestDescriptor`] and handed to a
//! [`Dispatcher`], which performs them through a [`Transport`]. The transport
//! is the only part that talks to the network; [`HttpTransport`] (behind the
//! default `http` feature) does this with reqwest, and [`transport_fn`] turns
//! any async closure into one.
//!
//! ```
//! use futures::{executor, future};
//! use ratequeue::{transport_fn, Dispatcher, Response};
//!
//! let dispatcher = Dispatcher::new(transport_fn(|request| {
//!     future::ready(Ok(Response::new(200, format!("hello from {}", request.target))))
//! }));
//!
//! let response = executor::block_on(dispatcher.get("/shows/1")).unwrap();
//! assert_eq!(response.text(), "hello from /shows/1");
//! ```
//!
//! ### Ordering
//!
//! At most one request is in flight at any time. Every submitted request is
//! either a normal request or, if marked with
//! [`prioritized`](RequestDescriptor::prioritized), a priority request:
//!
//! - normal requests are served first come, first served;
//! - every waiting priority request is served before any waiting normal
//!   request;
//! - among waiting priority requests, the most recently submitted one is
//!   served first. Priority requests stand for user actions, and the latest
//!   action is the one the user is waiting on.
//!
//! ```
//! # use futures::{executor, future};
//! # use ratequeue::{transport_fn, Dispatcher, RequestDescriptor, Response};
//! # let dispatcher = Dispatcher::new(transport_fn(|request| {
//! #     future::ready(Ok(Response::new(200, request.target)))
//! # }));
//! let background = dispatcher.get("/shows/1/episodes");
//! let typed = dispatcher.submit(RequestDescriptor::get("/search?q=fi").prioritized());
//! let retyped = dispatcher.submit(RequestDescriptor::get("/search?q=fir").prioritized());
//! # executor::block_on(future::join3(background, typed, retyped));
//! ```
//!
//! Here `/shows/1/episodes` was already in flight when the others arrived, so
//! it completes first; then `q=fir` runs, then `q=fi`.
//!
//! ### Rate limiting
//!
//! When the upstream answers 429, the request is retried in place after a
//! delay given by its [`Backoff`]: with the default 2 second base, the waits
//! are 2s, 3s, 4.5s, and so on, growing by half each time up to 20s. Requests
//! queued behind it wait too. The [`RetryPolicy`]'s `max_retries` (or a
//! descriptor's own) bounds the number of retries; past it, the 429 is
//! reported as [`DispatchError::RateLimited`]. Every other failure is
//! reported immediately, and the lane moves on to the next request.
//!
//! Delays are produced by an async function supplied in [`DispatchRules`], so
//! no particular runtime is required:
//!
//! ```
//! use std::time::Duration;
//! use futures_timer::Delay; // a runtime-agnostic async sleep
//! # use futures::future;
//! use ratequeue::{transport_fn, Backoff, DispatchRules, Dispatcher, Response, RetryPolicy};
//! # let transport = transport_fn(|request| future::ready(Ok(Response::new(200, request.target))));
//!
//! let dispatcher = Dispatcher::with_rules(DispatchRules {
//!     transport,
//!     sleep: Delay::new,
//!     policy: RetryPolicy {
//!         backoff: Backoff::with_base(Duration::from_millis(500)),
//!         max_retries: Some(5),
//!     },
//! });
//! ```
//!
//! ### Batch mapping
//!
//! [`map_async`] applies a synchronous transform to every element of a
//! sequence, pausing briefly every `batch_size` elements so other tasks get a
//! turn. At each pause it checks a [`CancellationToken`]; once the token is
//! cancelled, the map fails with [`Cancelled`] and no partial output escapes.
//!
//! ```
//! use futures::executor;
//! use ratequeue::{map_async, CancellationToken};
//!
//! let token = CancellationToken::new();
//! let doubled = executor::block_on(map_async(1..=50, |x| x * 2, 20, &token)).unwrap();
//! assert_eq!(doubled.len(), 50);
//! ```
//!
//! ## Design notes
//!
//! ### Who runs the lane
//!
//! A dispatcher owns no thread and no runtime. Its lane is a state machine
//! behind a lock, and it advances whenever something polls it. That
//! something is either a [`RequestFuture`], which steps the lane until its
//! own request has settled, or a drain task started through
//! [`Dispatcher::with_spawner`], which steps it until the queue is empty.
//! Both paths take turns under the same lock, so there is still only one
//! request in flight.
//!
//! The in-flight request wakes only the last task that polled it. Every other
//! waiting handle sleeps until its own request settles, or until the task
//! that was stepping the lane finishes or is dropped, at which point one
//! sleeper is woken to carry on.
//!
//! Without a spawner, the lane sits still while nobody polls a handle: a
//! request whose handle is dropped keeps its place in the queue but is only
//! sent once some later handle is polled. Give the dispatcher a spawner
//! (a `futures` `ThreadPool`, or [`TokioSpawner`] with the
//! `http` feature; [`Dispatcher::from_config`] does this) to have every
//! request sent on its own. In either mode, dropping a `RequestFuture`
//! never cancels its request; the outcome is discarded.
//!
//! ### Type-erased handles
//!
//! [`Dispatcher`] and [`RequestFuture`] carry no type parameters; the
//! transport and sleep function are erased when the dispatcher is built. The
//! cost is one boxed future per request.

mod backoff;
mod config;
mod dispatch;
mod error;
mod map;
mod queue;
mod request;
mod search;
mod transport;
mod wakerset;

#[cfg(feature = "http")]
mod http;

pub use backoff::Backoff;
pub use config::{DispatchConfig, DEFAULT_BASE_URL};
pub use dispatch::{DispatchRules, Dispatcher, RequestFuture, RetryPolicy};
pub use error::{Cancelled, DispatchError, TransportError};
pub use map::{map_async, CancellationToken, MapRules, DEFAULT_BATCH_SIZE, DEFAULT_PAUSE};
pub use request::{Method, RequestDescriptor, Response, TOO_MANY_REQUESTS};
pub use search::SEARCH_ENDPOINT;
pub use transport::{transport_fn, Transport, TransportFn};

#[cfg(feature = "http")]
pub use http::{HttpTransport, TokioSpawner};
