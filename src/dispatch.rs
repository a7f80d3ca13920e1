use std::{
    collections::{HashMap, HashSet},
    fmt::{self, Debug, Formatter},
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use arc_swap::ArcSwap;
use futures::{
    future::{BoxFuture, FutureExt},
    task::{Spawn, SpawnExt},
};
use futures_timer::Delay;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::{
    backoff::Backoff,
    error::DispatchError,
    queue::RequestQueue,
    request::{RequestDescriptor, Response},
    transport::Transport,
    wakerset::WakerSet,
};

type Outcome = Result<Response, DispatchError>;

/// Identifies one submitted request for as long as the dispatcher tracks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EntryId(u64);

/// The waker slot used by a spawned drain task. Submitted entries are
/// numbered from 1.
const DRAIN: EntryId = EntryId(0);

impl EntryId {
    #[cfg(test)]
    pub(crate) fn new(id: u64) -> Self {
        EntryId(id)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How rate-limited requests are retried.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RetryPolicy {
    pub backoff: Backoff,

    /// The most retries a single request gets after being rate limited.
    /// `None` retries until the upstream stops answering 429; `Some(0)`
    /// never retries.
    pub max_retries: Option<u32>,
}

/// Everything a [`Dispatcher`] is built from.
///
/// `sleep` is called with each backoff delay and must return a future that
/// completes once that much time has passed. [`Dispatcher::new`] uses
/// [`futures_timer::Delay`]; tests typically substitute something that
/// records the delay and completes immediately.
#[derive(Debug, Clone)]
pub struct DispatchRules<T, Sleep> {
    pub transport: T,
    pub sleep: Sleep,
    pub policy: RetryPolicy,
}

struct Entry {
    id: EntryId,
    descriptor: RequestDescriptor,
}

struct Active {
    id: EntryId,
    fut: BoxFuture<'static, Outcome>,
}

/// Starts the single in-flight call for an entry. Type-erased so that the
/// lane and its handles don't carry the transport's type around.
trait Execute: Send + Sync {
    fn execute(&self, id: EntryId, descriptor: RequestDescriptor) -> BoxFuture<'static, Outcome>;
}

struct Executor<T, Sleep> {
    transport: Arc<T>,
    sleep: Arc<Sleep>,
    policy: Arc<ArcSwap<RetryPolicy>>,
}

impl<T, Sleep> Clone for Executor<T, Sleep> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            sleep: Arc::clone(&self.sleep),
            policy: Arc::clone(&self.policy),
        }
    }
}

impl<T, Sleep, D> Executor<T, Sleep>
where
    T: Transport,
    Sleep: Fn(Duration) -> D + Send + Sync + 'static,
    D: Future<Output = ()> + Send + 'static,
{
    async fn run(self, id: EntryId, descriptor: RequestDescriptor) -> Outcome {
        let mut retries: u32 = 0;

        loop {
            let response = self.transport.perform(descriptor.clone()).await?;

            if response.is_success() {
                trace!(%id, status = response.status, "request succeeded");
                return Ok(response);
            }

            if !response.is_rate_limited() {
                debug!(%id, target = %descriptor.target, status = response.status, "upstream error");
                return Err(DispatchError::Upstream { response });
            }

            // Loaded on every 429 so that policy changes apply to requests
            // already backing off.
            let policy: RetryPolicy = **self.policy.load();
            let ceiling = descriptor.max_retries.or(policy.max_retries);
            if matches!(ceiling, Some(max) if retries >= max) {
                warn!(%id, target = %descriptor.target, retries, "rate limited, retry ceiling reached");
                return Err(DispatchError::RateLimited { retries, response });
            }

            let delay = policy.backoff.delay(retries);
            retries = retries.saturating_add(1);
            warn!(
                %id,
                target = %descriptor.target,
                retries,
                delay_ms = delay.as_millis() as u64,
                "rate limited, backing off"
            );
            (self.sleep)(delay).await;
        }
    }
}

impl<T, Sleep, D> Execute for Executor<T, Sleep>
where
    T: Transport,
    Sleep: Fn(Duration) -> D + Send + Sync + 'static,
    D: Future<Output = ()> + Send + 'static,
{
    fn execute(&self, id: EntryId, descriptor: RequestDescriptor) -> BoxFuture<'static, Outcome> {
        self.clone().run(id, descriptor).boxed()
    }
}

/// The dispatcher's shared state. The occupied `active` slot is the run
/// state: it is filled when draining starts and emptied once the queue runs
/// dry, and it never holds more than one request.
struct Lane {
    queue: RequestQueue<Entry>,
    active: Option<Active>,

    // Outcomes waiting for their handle to be polled.
    finished: HashMap<EntryId, Outcome>,

    // Entries whose handle was dropped before they settled. They still run,
    // in order; their outcome is thrown away.
    abandoned: HashSet<EntryId>,

    wakers: WakerSet,
    next_id: u64,
    executor: Arc<dyn Execute>,

    // Set by `Dispatcher::with_spawner`. While `draining` is true a spawned
    // task owns the lane and runs it until the queue is empty.
    spawner: Option<Arc<dyn Spawn + Send + Sync>>,
    draining: bool,
}

impl Lane {
    fn enqueue(&mut self, mut descriptor: RequestDescriptor) -> EntryId {
        self.next_id += 1;
        let id = EntryId(self.next_id);
        let priority = descriptor.take_priority();

        debug!(%id, method = %descriptor.method, target = %descriptor.target, priority, "request queued");
        self.queue.push(Entry { id, descriptor }, priority);

        if self.active.is_none() {
            debug!("lane idle, draining");
            self.advance();

            // A drain task that saw the lane go idle through someone else's
            // poll is still parked; it has work again.
            if self.draining {
                self.wakers.wake(DRAIN);
            }
        }

        id
    }

    /// If the lane has work, a spawner, and no drain task yet, mark it as
    /// draining and hand back the spawner that should start one.
    fn claim_drain(&mut self) -> Option<Arc<dyn Spawn + Send + Sync>> {
        if self.active.is_none() || self.draining {
            return None;
        }

        let spawner = self.spawner.clone()?;
        self.draining = true;
        Some(spawner)
    }

    /// Move the next queued entry into the active slot, or mark the lane idle.
    fn advance(&mut self) {
        match self.queue.pop() {
            Some(Entry { id, descriptor }) => {
                trace!(%id, remaining = self.queue.len(), "request dispatched");
                let fut = self.executor.execute(id, descriptor);
                self.active = Some(Active { id, fut });
            }
            None => {
                debug!("queue drained, lane idle");
                self.active = None;
            }
        }
    }

    /// Store an outcome for its handle. Returns false if nobody is waiting
    /// for it any more.
    fn settle(&mut self, id: EntryId, outcome: Outcome) -> bool {
        if self.abandoned.remove(&id) {
            debug!(%id, ok = outcome.is_ok(), "discarding outcome of abandoned request");
            return false;
        }

        self.finished.insert(id, outcome);
        true
    }

    /// Poll the in-flight request once on behalf of `driver`, which becomes
    /// the driving waker. If the request finishes, its outcome is settled
    /// and the next entry moves into the lane.
    ///
    /// Returns `None` if the lane is idle.
    fn step(&mut self, driver: EntryId, ctx: &mut Context<'_>) -> Option<Poll<()>> {
        let active = self.active.as_mut()?;

        self.wakers.register(driver, ctx.waker());
        match active.fut.as_mut().poll(ctx) {
            Poll::Pending => Some(Poll::Pending),
            Poll::Ready(outcome) => {
                let done = active.id;
                if self.settle(done, outcome) && done != driver {
                    self.wakers.wake(done);
                }
                self.advance();
                Some(Poll::Ready(()))
            }
        }
    }

    /// Drive the lane on behalf of the handle for `id`, until that entry has
    /// settled or the in-flight request can make no further progress.
    fn poll_entry(&mut self, id: EntryId, ctx: &mut Context<'_>) -> Poll<Outcome> {
        loop {
            if let Some(outcome) = self.finished.remove(&id) {
                return Poll::Ready(outcome);
            }

            // An entry that is neither finished nor abandoned is either
            // active or queued, and a non-empty queue always has an active
            // entry.
            match self.step(id, ctx) {
                Some(Poll::Pending) => return Poll::Pending,
                Some(Poll::Ready(())) => {}
                None => unreachable!("request {} is neither queued, in flight nor settled", id),
            }
        }
    }

    /// Drive the lane on behalf of a drain task until the queue is empty.
    fn poll_drain(&mut self, ctx: &mut Context<'_>) -> Poll<()> {
        loop {
            match self.step(DRAIN, ctx) {
                Some(Poll::Pending) => return Poll::Pending,
                Some(Poll::Ready(())) => {}
                None => break,
            }
        }

        trace!("drain task finished");
        self.wakers.discard_waker(DRAIN);
        self.draining = false;
        Poll::Ready(())
    }
}

/// Runs a dispatcher's lane in the background, so that requests are
/// performed whether or not anyone polls their handles. Spawned once per
/// busy period; it completes when the queue runs dry.
struct Drain {
    lane: Arc<Mutex<Lane>>,
}

impl Future for Drain {
    type Output = ();

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<()> {
        self.lane.lock().poll_drain(ctx)
    }
}

/// A queue of HTTP requests served one at a time, through a single lane.
///
/// See the [crate docs](crate) for ordering and retry behavior.
#[derive(Clone)]
pub struct Dispatcher {
    lane: Arc<Mutex<Lane>>,
    policy: Arc<ArcSwap<RetryPolicy>>,
}

impl Debug for Dispatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let lane = self.lane.lock();
        f.debug_struct("Dispatcher")
            .field("running", &lane.active.is_some())
            .field("queued", &lane.queue.len())
            .field("draining", &lane.draining)
            .field("policy", &**self.policy.load())
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher over `transport`, with the default retry policy
    /// and timer-based backoff.
    pub fn new<T: Transport>(transport: T) -> Self {
        Self::with_rules(DispatchRules {
            transport,
            sleep: Delay::new,
            policy: RetryPolicy::default(),
        })
    }

    pub fn with_rules<T, Sleep, D>(rules: DispatchRules<T, Sleep>) -> Self
    where
        T: Transport,
        Sleep: Fn(Duration) -> D + Send + Sync + 'static,
        D: Future<Output = ()> + Send + 'static,
    {
        let policy = Arc::new(ArcSwap::from_pointee(rules.policy));
        let executor = Executor {
            transport: Arc::new(rules.transport),
            sleep: Arc::new(rules.sleep),
            policy: Arc::clone(&policy),
        };

        let lane = Lane {
            queue: RequestQueue::default(),
            active: None,
            finished: HashMap::new(),
            abandoned: HashSet::new(),
            wakers: WakerSet::default(),
            next_id: 0,
            executor: Arc::new(executor),
            spawner: None,
            draining: false,
        };

        Self {
            lane: Arc::new(Mutex::new(lane)),
            policy,
        }
    }

    /// Run the lane on tasks spawned with `spawner`, so that every submitted
    /// request is performed even if its handle is dropped or never polled.
    /// Without a spawner the lane only moves while some handle is polled.
    ///
    /// The spawner is shared by every clone of this dispatcher.
    pub fn with_spawner<S>(self, spawner: S) -> Self
    where
        S: Spawn + Send + Sync + 'static,
    {
        let drain = {
            let mut lane = self.lane.lock();
            lane.spawner = Some(Arc::new(spawner));
            lane.claim_drain()
        };

        if let Some(spawner) = drain {
            self.spawn_drain(&*spawner);
        }

        self
    }

    fn spawn_drain(&self, spawner: &(dyn Spawn + Send + Sync)) {
        let drain = Drain {
            lane: Arc::clone(&self.lane),
        };

        match spawner.spawn(drain) {
            Ok(()) => trace!("drain task spawned"),
            Err(err) => {
                warn!(%err, "couldn't spawn drain task, lane will run as handles are polled");
                self.lane.lock().draining = false;
            }
        }
    }

    /// Queue a request. The returned future completes exactly once, with the
    /// response or the error that ended the request.
    ///
    /// The request is queued immediately, whether or not the future is ever
    /// polled. If the lane was idle, this request becomes the in-flight one.
    pub fn submit(&self, descriptor: RequestDescriptor) -> RequestFuture {
        let (id, drain) = {
            let mut lane = self.lane.lock();
            let id = lane.enqueue(descriptor);
            (id, lane.claim_drain())
        };

        if let Some(spawner) = drain {
            self.spawn_drain(&*spawner);
        }

        RequestFuture {
            id: Some(id),
            lane: Arc::clone(&self.lane),
        }
    }

    pub fn get(&self, target: impl Into<String>) -> RequestFuture {
        self.submit(RequestDescriptor::get(target))
    }

    pub fn delete(&self, target: impl Into<String>) -> RequestFuture {
        self.submit(RequestDescriptor::delete(target))
    }

    pub fn head(&self, target: impl Into<String>) -> RequestFuture {
        self.submit(RequestDescriptor::head(target))
    }

    pub fn options(&self, target: impl Into<String>) -> RequestFuture {
        self.submit(RequestDescriptor::options(target))
    }

    pub fn post(&self, target: impl Into<String>, body: Value) -> RequestFuture {
        self.submit(RequestDescriptor::post(target, body))
    }

    pub fn put(&self, target: impl Into<String>, body: Value) -> RequestFuture {
        self.submit(RequestDescriptor::put(target, body))
    }

    pub fn patch(&self, target: impl Into<String>, body: Value) -> RequestFuture {
        self.submit(RequestDescriptor::patch(target, body))
    }

    pub fn policy(&self) -> RetryPolicy {
        **self.policy.load()
    }

    /// Replace the retry policy. Requests already backing off pick up the new
    /// policy at their next 429.
    pub fn set_policy(&self, policy: RetryPolicy) {
        self.policy.store(Arc::new(policy));
    }

    pub fn set_max_retries(&self, max_retries: Option<u32>) {
        self.policy.rcu(|policy| RetryPolicy {
            max_retries,
            ..**policy
        });
    }

    /// Whether a request currently occupies the lane.
    pub fn is_running(&self) -> bool {
        self.lane.lock().active.is_some()
    }

    /// Number of requests waiting behind the in-flight one.
    pub fn queued(&self) -> usize {
        self.lane.lock().queue.len()
    }
}

/// The caller's handle on a submitted request.
///
/// Polling any handle drives the dispatcher's lane: the in-flight request,
/// and every request queued ahead of this one, is executed by whichever
/// handles are being polled (and by the drain task, if the dispatcher has a
/// spawner). When the handle that was driving the lane completes or is
/// dropped, another waiting handle is woken to take over.
///
/// Dropping a handle does not cancel its request. It still runs in its turn;
/// the outcome is discarded.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct RequestFuture {
    id: Option<EntryId>,
    lane: Arc<Mutex<Lane>>,
}

impl Debug for RequestFuture {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestFuture").field("id", &self.id).finish()
    }
}

impl Future for RequestFuture {
    type Output = Result<Response, DispatchError>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = Pin::into_inner(self);
        let id = this.id.expect("Can't re-poll a completed RequestFuture");

        // The lock is held for the duration of this poll only, never across
        // polls.
        let mut lane = this.lane.lock();

        match lane.poll_entry(id, ctx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(outcome) => {
                // If we were driving the lane and there's more to do, hand
                // that job to another waiting handle.
                if lane.active.is_some() {
                    lane.wakers.discard_and_wake(id);
                } else {
                    lane.wakers.discard_waker(id);
                }
                drop(lane);
                this.id = None;
                Poll::Ready(outcome)
            }
        }
    }
}

impl Drop for RequestFuture {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            let mut lane = self.lane.lock();
            if lane.finished.remove(&id).is_none() {
                lane.abandoned.insert(id);
            }

            // discard_and_wake ensures that if we were the driving handle,
            // another handle will be selected to progress the lane.
            if lane.active.is_some() {
                lane.wakers.discard_and_wake(id);
            } else {
                lane.wakers.discard_waker(id);
            }
        }
    }
}
