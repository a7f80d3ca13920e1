//! These tests ensure that the handle driving the lane hands that job to
//! another handle when it completes or is dropped, and that handles are
//! notified when their own request settles.

use cooked_waker::{IntoWaker, Wake, WakeRef};
use futures::{executor, future, FutureExt};
use ratequeue::{
    transport_fn, DispatchRules, Dispatcher, RequestDescriptor, RequestFuture, Response,
    RetryPolicy,
};
use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll, Waker},
    time::Duration,
};

/// A waker that stores true if it has been awoken
#[derive(Debug, Clone, Default, IntoWaker)]
struct BoolWaker {
    cell: Arc<AtomicBool>,
}

impl BoolWaker {
    fn reset(&self) {
        self.cell.store(false, Ordering::SeqCst)
    }

    fn is_signaled(&self) -> bool {
        self.cell.load(Ordering::SeqCst)
    }
}

impl WakeRef for BoolWaker {
    fn wake_by_ref(&self) {
        self.cell.store(true, Ordering::SeqCst)
    }
}

impl Wake for BoolWaker {}

/// A future that returns pending the first N times it is polled, then
/// returns Ready. It wakes its task immediately each time it is pending.
#[derive(Debug, Clone)]
struct Skipper {
    remaining_skips: usize,
}

impl Skipper {
    fn new(count: usize) -> Self {
        Skipper {
            remaining_skips: count,
        }
    }
}

impl Future for Skipper {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match &mut self.get_mut().remaining_skips {
            0 => Poll::Ready(()),
            skips => {
                *skips -= 1;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }
}

/// A manually polled request handle, with its own signal.
struct Task {
    fut: RequestFuture,
    signal: BoolWaker,
    waker: Waker,
}

impl Task {
    fn new(fut: RequestFuture) -> Self {
        let signal = BoolWaker::default();

        Task {
            fut,
            waker: signal.clone().into_waker(),
            signal,
        }
    }

    /// Poll the handle, returning the response body if it completed.
    fn poll(&mut self) -> Poll<String> {
        self.signal.reset();
        self.fut
            .poll_unpin(&mut Context::from_waker(&self.waker))
            .map(|result| result.unwrap().text())
    }

    fn reset(&self) {
        self.signal.reset()
    }

    fn is_signaled(&self) -> bool {
        self.signal.is_signaled()
    }
}

/// A dispatcher whose requests each take `skips` extra polls to complete.
/// Every performed target is recorded in `calls`.
fn skipping_dispatcher(skips: usize, calls: Arc<Mutex<Vec<String>>>) -> Dispatcher {
    Dispatcher::with_rules(DispatchRules {
        transport: transport_fn(move |request: RequestDescriptor| {
            calls.lock().unwrap().push(request.target.clone());
            async move {
                Skipper::new(skips).await;
                Ok(Response::new(200, request.target))
            }
        }),
        sleep: |_: Duration| future::ready(()),
        policy: RetryPolicy::default(),
    })
}

#[test]
fn test_notify_lifecycle() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = skipping_dispatcher(1, calls.clone());

    let mut task1 = Task::new(dispatcher.get("1"));
    let mut task2 = Task::new(dispatcher.get("2"));
    let mut task3 = Task::new(dispatcher.get("3"));

    // task3 drives request 1 into its skip. Only task3 is signaled, by the
    // request itself.
    assert_eq!(task3.poll(), Poll::Pending);
    assert!(!task1.is_signaled());
    assert!(!task2.is_signaled());
    assert!(task3.is_signaled());
    task3.reset();

    // task1 takes over and finishes its own request, which starts request 2.
    // Having driven the lane, task1 hands it back to task3.
    assert_eq!(task1.poll(), Poll::Ready(String::from("1")));
    assert!(!task2.is_signaled());
    assert!(task3.is_signaled());

    // task3 drives request 2 into its skip.
    assert_eq!(task3.poll(), Poll::Pending);
    assert!(task3.is_signaled());
    task3.reset();

    // task2 finishes request 2, starts request 3, and hands over to task3.
    assert_eq!(task2.poll(), Poll::Ready(String::from("2")));
    assert!(task3.is_signaled());

    assert_eq!(task3.poll(), Poll::Pending);
    assert_eq!(task3.poll(), Poll::Ready(String::from("3")));

    assert!(!dispatcher.is_running());
    assert_eq!(*calls.lock().unwrap(), ["1", "2", "3"]);
}

#[test]
fn test_passenger_woken_when_settled() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = skipping_dispatcher(1, calls.clone());

    let mut task1 = Task::new(dispatcher.get("1"));
    let mut task2 = Task::new(dispatcher.get("2"));

    assert_eq!(task1.poll(), Poll::Pending);
    task1.reset();

    // task2 takes over as driver and finishes request 1 on task1's behalf;
    // task1 must be told.
    assert_eq!(task2.poll(), Poll::Pending);
    assert!(task1.is_signaled());

    assert_eq!(task1.poll(), Poll::Ready(String::from("1")));
    assert_eq!(task2.poll(), Poll::Ready(String::from("2")));
}

#[test]
fn test_driver_drop_hands_over() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = skipping_dispatcher(3, calls.clone());

    let mut task1 = Task::new(dispatcher.get("1"));
    let mut task2 = Task::new(dispatcher.get("2"));
    let mut task3 = Task::new(dispatcher.get("3"));

    // Poll tasks 1 and 3; task3 is now the driver.
    assert_eq!(task1.poll(), Poll::Pending);
    assert_eq!(task3.poll(), Poll::Pending);
    task1.reset();
    task3.reset();

    // We immediately drop the driving task. This should cause task1, the
    // only other task that has been polled, to be awoken so that it can take
    // over.
    drop(task3);
    assert!(task1.is_signaled());
    assert!(!task2.is_signaled());

    // Dropping a task that isn't driving wakes nobody.
    task1.reset();
    assert_eq!(task2.poll(), Poll::Pending);
    task2.reset();
    drop(task1);
    assert!(!task2.is_signaled());

    // Request 1 still completes, and request 3 still runs, but neither
    // outcome has anyone to go to.
    let mut last = Poll::Pending;
    for _ in 0..10 {
        last = task2.poll();
        if last.is_ready() {
            break;
        }
    }
    assert_eq!(last, Poll::Ready(String::from("2")));

    let fourth = executor::block_on(dispatcher.get("4")).unwrap();
    assert_eq!(fourth.text(), "4");
    assert_eq!(*calls.lock().unwrap(), ["1", "2", "3", "4"]);
    assert!(!dispatcher.is_running());
}

#[test]
fn test_dropped_queued_request_still_runs() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = skipping_dispatcher(0, calls.clone());

    let first = dispatcher.get("first");
    let dropped = dispatcher.get("dropped");
    let last = dispatcher.get("last");
    drop(dropped);

    let (first, last) = executor::block_on(future::join(first, last));

    assert_eq!(first.unwrap().text(), "first");
    assert_eq!(last.unwrap().text(), "last");
    assert_eq!(*calls.lock().unwrap(), ["first", "dropped", "last"]);
}
