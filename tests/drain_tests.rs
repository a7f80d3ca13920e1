//! These tests ensure that a dispatcher with a spawner performs every
//! request on its own, including requests whose handles were dropped or
//! never polled.

use futures::{executor, executor::ThreadPool, future};
use futures_timer::Delay;
use ratequeue::{
    transport_fn, Backoff, DispatchRules, Dispatcher, RequestDescriptor, Response, RetryPolicy,
    Transport, TOO_MANY_REQUESTS,
};
use serde_json::json;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

const PATIENCE: Duration = Duration::from_secs(5);

/// A transport that reports "METHOD target" for every request it performs.
fn reporting_transport(report: mpsc::Sender<String>) -> impl Transport {
    let report = Mutex::new(report);

    transport_fn(move |request: RequestDescriptor| {
        report
            .lock()
            .unwrap()
            .send(format!("{} {}", request.method, request.target))
            .unwrap();
        future::ready(Ok(Response::new(200, request.target)))
    })
}

fn spawned_dispatcher(transport: impl Transport, policy: RetryPolicy) -> Dispatcher {
    Dispatcher::with_rules(DispatchRules {
        transport,
        sleep: Delay::new,
        policy,
    })
    .with_spawner(ThreadPool::new().unwrap())
}

fn wait_until_idle(dispatcher: &Dispatcher) {
    let deadline = Instant::now() + PATIENCE;
    while dispatcher.is_running() {
        assert!(Instant::now() < deadline, "lane never went idle");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn dropped_submissions_are_performed() {
    let (report, reports) = mpsc::channel();
    let dispatcher = spawned_dispatcher(reporting_transport(report), RetryPolicy::default());

    drop(dispatcher.post("/a", json!({})));
    drop(dispatcher.delete("/b"));

    assert_eq!(reports.recv_timeout(PATIENCE).unwrap(), "POST /a");
    assert_eq!(reports.recv_timeout(PATIENCE).unwrap(), "DELETE /b");

    wait_until_idle(&dispatcher);
    assert_eq!(dispatcher.queued(), 0);
}

#[test]
fn lane_restarts_after_going_idle() {
    let (report, reports) = mpsc::channel();
    let dispatcher = spawned_dispatcher(reporting_transport(report), RetryPolicy::default());

    drop(dispatcher.get("/first"));
    assert_eq!(reports.recv_timeout(PATIENCE).unwrap(), "GET /first");
    wait_until_idle(&dispatcher);

    drop(dispatcher.get("/second"));
    assert_eq!(reports.recv_timeout(PATIENCE).unwrap(), "GET /second");
    wait_until_idle(&dispatcher);
}

#[test]
fn dropped_rate_limited_request_is_retried() {
    let (report, reports) = mpsc::channel();
    let report = Mutex::new(report);
    let calls = AtomicUsize::new(0);

    let transport = transport_fn(move |request: RequestDescriptor| {
        report.lock().unwrap().send(request.target.clone()).unwrap();
        let status = match calls.fetch_add(1, Ordering::SeqCst) {
            0 => TOO_MANY_REQUESTS,
            _ => 200,
        };
        future::ready(Ok(Response::new(status, "")))
    });

    let dispatcher = spawned_dispatcher(
        transport,
        RetryPolicy {
            backoff: Backoff::with_base(Duration::from_millis(1)),
            max_retries: None,
        },
    );

    drop(dispatcher.get("/limited"));

    assert_eq!(reports.recv_timeout(PATIENCE).unwrap(), "/limited");
    assert_eq!(reports.recv_timeout(PATIENCE).unwrap(), "/limited");
    wait_until_idle(&dispatcher);
}

#[test]
fn handles_still_resolve_in_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let transport = {
        let order = order.clone();
        transport_fn(move |request: RequestDescriptor| {
            order.lock().unwrap().push(request.target.clone());
            async move {
                Delay::new(Duration::from_millis(1)).await;
                Ok(Response::new(200, request.target))
            }
        })
    };

    let dispatcher = spawned_dispatcher(transport, RetryPolicy::default());

    let mut handles: Vec<_> = (0..10).map(|i| dispatcher.get(i.to_string())).collect();
    drop(handles.remove(4));

    let bodies: Vec<String> = executor::block_on(future::join_all(handles))
        .into_iter()
        .map(|result| result.unwrap().text())
        .collect();

    assert_eq!(bodies, ["0", "1", "2", "3", "5", "6", "7", "8", "9"]);
    wait_until_idle(&dispatcher);

    let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    assert_eq!(*order.lock().unwrap(), expected);
}
