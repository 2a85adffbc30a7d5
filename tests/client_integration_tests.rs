mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use audit_http::{Cookie, HttpClient, HttpClientError, Request, RequestOptions, Url};
use common::{client_with, MockReply, MockTransport};
use parking_lot::Mutex;

#[tokio::test]
async fn simple_get_carries_configured_defaults() {
    let transport = MockTransport::new(|_| MockReply::ok("hello"));
    let client = HttpClient::builder()
        .transport(transport.clone())
        .blocking_transport(transport.clone())
        .user_agent("X/1")
        .request_header("Accept", "*/*")
        .build()
        .unwrap();

    client.request("http://h/p", RequestOptions::new()).await.unwrap();
    client.run().await;

    let dispatched = transport.dispatched();
    assert_eq!(dispatched.len(), 1);
    let record = &dispatched[0];
    assert_eq!(record.method, reqwest::Method::GET);
    assert!(record.cookies.is_empty());
    assert!(record
        .headers
        .iter()
        .any(|(name, value)| name == "user-agent" && value == "X/1"));
    assert!(record
        .headers
        .iter()
        .any(|(name, value)| name == "accept" && value == "*/*"));
}

#[tokio::test]
async fn jar_cookies_merge_under_caller_cookies() {
    let transport = MockTransport::new(|_| MockReply::ok(""));
    let client = HttpClient::builder()
        .transport(transport.clone())
        .blocking_transport(transport.clone())
        .cookie("a", "1")
        .build()
        .unwrap();

    client
        .get(
            "http://h/p",
            RequestOptions::new().cookies([("a", "2"), ("b", "3")]),
        )
        .await
        .unwrap();
    client.run().await;

    let record = &transport.dispatched()[0];
    assert_eq!(
        record.cookies,
        vec![("a".to_string(), "2".to_string()), ("b".to_string(), "3".to_string())]
    );
}

#[tokio::test]
async fn no_cookie_jar_suppresses_jar_cookies() {
    let transport = MockTransport::new(|_| MockReply::ok(""));
    let client = HttpClient::builder()
        .transport(transport.clone())
        .blocking_transport(transport.clone())
        .cookie("a", "1")
        .build()
        .unwrap();

    client
        .get(
            "http://h/p",
            RequestOptions::new().no_cookie_jar().cookies([("b", "2")]),
        )
        .await
        .unwrap();
    client.run().await;

    let record = &transport.dispatched()[0];
    assert_eq!(record.cookies, vec![("b".to_string(), "2".to_string())]);
}

#[tokio::test]
async fn counting_is_deterministic_after_drain() {
    let transport = MockTransport::new(|_| MockReply::ok("body"));
    let client = client_with(&transport);

    for index in 0..10 {
        client
            .get(&format!("http://h/p{index}"), RequestOptions::new())
            .await
            .unwrap();
    }
    client.run().await;

    let stats = client.statistics();
    assert_eq!(stats.request_count, 10);
    assert_eq!(stats.response_count, 10);
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn timeouts_are_counted_and_surfaced_as_responses() {
    let transport = MockTransport::new(|request| {
        if request.url().path().starts_with("/slow") {
            MockReply::timeout()
        } else {
            MockReply::ok("fast")
        }
    });
    let client = client_with(&transport);

    let seen_timeouts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen_timeouts);
    client.on_complete(move |response| {
        if response.is_timed_out() {
            assert_eq!(response.status, 0);
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    for index in 0..10 {
        let path = if index < 3 { format!("/slow{index}") } else { format!("/ok{index}") };
        client
            .get(&format!("http://h{path}"), RequestOptions::new())
            .await
            .unwrap();
    }
    client.run().await;

    let stats = client.statistics();
    assert_eq!(stats.response_count, 10);
    assert_eq!(stats.time_out_count, 3);
    assert_eq!(seen_timeouts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn high_priority_requests_dispatch_first() {
    let transport = MockTransport::new(|_| MockReply::ok(""));
    let client = client_with(&transport);

    for index in 0..3 {
        client
            .get(&format!("http://h/normal{index}"), RequestOptions::new())
            .await
            .unwrap();
    }
    client
        .get("http://h/urgent", RequestOptions::new().high_priority())
        .await
        .unwrap();
    client.run().await;

    let first = &transport.dispatched()[0];
    assert_eq!(first.url.path(), "/urgent");
    assert!(first.high_priority);
}

#[tokio::test]
async fn crossing_the_queue_threshold_triggers_an_emergency_run() {
    let transport = MockTransport::new(|_| MockReply::ok(""));
    let client = HttpClient::builder()
        .transport(transport.clone())
        .blocking_transport(transport.clone())
        .request_queue_size(3)
        .build()
        .unwrap();

    for index in 0..3 {
        client
            .get(&format!("http://h/p{index}"), RequestOptions::new())
            .await
            .unwrap();
    }

    // No explicit run: the third enqueue crossed the threshold.
    assert_eq!(transport.dispatch_count(), 3);
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn failing_observers_do_not_stop_the_rest() {
    let transport = MockTransport::new(|_| MockReply::ok(""));
    let client = client_with(&transport);

    let order = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&order);
    client.on_complete(move |_| log.lock().push("first"));
    client.on_complete(|_| panic!("misbehaving observer"));
    let log = Arc::clone(&order);
    client.on_complete(move |_| log.lock().push("third"));

    client.get("http://h/p", RequestOptions::new()).await.unwrap();
    client.run().await;

    assert_eq!(*order.lock(), vec!["first", "third"]);
}

#[tokio::test]
async fn blocking_requests_return_their_response() {
    let transport = MockTransport::new(|_| MockReply::ok("sync body"));
    let client = client_with(&transport);

    let callback_ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&callback_ran);
    let dispatched = client
        .request(
            "http://h/sync",
            RequestOptions::new().blocking().on_complete(move |response| {
                assert_eq!(response.body, "sync body");
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

    let response = dispatched.into_response().expect("blocking yields a response");
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "sync body");
    assert_eq!(callback_ran.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn after_run_hooks_extend_the_burst() {
    let transport = MockTransport::new(|_| MockReply::ok(""));
    let client = client_with(&transport);

    let fired = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&fired);
    let chained = client.clone();
    client.after_run(move || {
        log.lock().push("first hook");
        chained.queue(Request::new(Url::parse("http://h/from-hook").unwrap()));

        let log = Arc::clone(&log);
        chained.after_run(move || log.lock().push("second hook"));
    });

    client.get("http://h/initial", RequestOptions::new()).await.unwrap();
    client.run().await;

    assert_eq!(*fired.lock(), vec!["first hook", "second hook"]);
    let paths: Vec<String> = transport
        .dispatched()
        .iter()
        .map(|record| record.url.path().to_string())
        .collect();
    assert_eq!(paths, vec!["/initial", "/from-hook"]);
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn after_each_run_observers_persist_across_bursts() {
    let transport = MockTransport::new(|_| MockReply::ok(""));
    let client = client_with(&transport);

    let bursts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&bursts);
    client.after_each_run(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    client.get("http://h/a", RequestOptions::new()).await.unwrap();
    client.run().await;
    client.get("http://h/b", RequestOptions::new()).await.unwrap();
    client.run().await;

    assert_eq!(bursts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn on_queue_fires_before_dispatch() {
    let transport = MockTransport::new(|_| MockReply::ok(""));
    let client = client_with(&transport);

    let queued = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&queued);
    client.on_queue(move |request| log.lock().push(request.url().path().to_string()));

    client.get("http://h/watched", RequestOptions::new()).await.unwrap();
    assert_eq!(*queued.lock(), vec!["/watched"]);
}

#[tokio::test]
async fn response_cookies_are_harvested_when_requested() {
    let transport = MockTransport::new(|_| {
        MockReply::ok("welcome").header("Set-Cookie", "sid=abc123; Path=/")
    });
    let client = client_with(&transport);

    let announced = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&announced);
    client.on_new_cookies(move |cookies, response| {
        assert_eq!(response.status, 200);
        log.lock()
            .extend(cookies.iter().map(|cookie| cookie.name.clone()));
    });

    client
        .get("http://h/login", RequestOptions::new().update_cookies(true))
        .await
        .unwrap();
    client.run().await;

    assert_eq!(*announced.lock(), vec!["sid"]);
    let jar: Vec<Cookie> = client.cookies();
    assert_eq!(jar.len(), 1);
    assert_eq!(jar[0].name, "sid");
    assert_eq!(jar[0].value, "abc123");

    // Without update_cookies the same response leaves the jar alone.
    client.reset(true);
    client.get("http://h/login", RequestOptions::new()).await.unwrap();
    client.run().await;
    assert!(client.cookies().is_empty());
}

#[tokio::test]
async fn sandbox_isolates_state_and_returns_the_block_value() {
    let transport = MockTransport::new(|_| MockReply::ok(""));
    let client = client_with(&transport);

    let outer_hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&outer_hits);
    client.on_complete(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let requests_before = client.statistics().request_count;

    let inner_hits = Arc::new(AtomicUsize::new(0));
    let inner_counter = Arc::clone(&inner_hits);
    let value = client
        .sandbox(|scoped| async move {
            scoped.update_cookies(vec![Cookie::new("ephemeral", "1")]);
            scoped.on_complete(move |_| {
                inner_counter.fetch_add(1, Ordering::SeqCst);
            });
            scoped.get("http://h/inside", RequestOptions::new()).await.unwrap();
            scoped.run().await;
            42
        })
        .await;

    assert_eq!(value, 42);
    assert_eq!(inner_hits.load(Ordering::SeqCst), 1);
    // The outer observer was quiescent inside the sandbox.
    assert_eq!(outer_hits.load(Ordering::SeqCst), 0);
    // Cookies and counters from inside the sandbox are gone.
    assert!(client.cookies().is_empty());
    assert_eq!(client.statistics().request_count, requests_before);

    // The outer observer survived and the inner one is gone.
    client.get("http://h/after", RequestOptions::new()).await.unwrap();
    client.run().await;
    assert_eq!(outer_hits.load(Ordering::SeqCst), 1);
    assert_eq!(inner_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_urls_and_unknown_events_are_programmer_errors() {
    let transport = MockTransport::new(|_| MockReply::ok(""));
    let client = client_with(&transport);

    let result = client.request("", RequestOptions::new()).await;
    assert!(matches!(result, Err(HttpClientError::InvalidArgument(_))));

    let result = client.request("   ", RequestOptions::new()).await;
    assert!(matches!(result, Err(HttpClientError::InvalidArgument(_))));

    let result = client.observe("no_such_event", Box::new(|_| {}));
    assert!(matches!(result, Err(HttpClientError::UnknownEvent(_))));
}

#[tokio::test]
async fn transport_failures_are_responses_not_errors() {
    let transport = MockTransport::new(|_| MockReply::failure("connection refused"));
    let client = client_with(&transport);

    let seen = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&seen);
    client
        .get(
            "http://h/down",
            RequestOptions::new().on_complete(move |response| {
                *slot.lock() = Some((response.status, response.transport_message.clone()));
            }),
        )
        .await
        .unwrap();
    client.run().await;

    let (status, message) = seen.lock().clone().expect("response delivered");
    assert_eq!(status, 0);
    assert_eq!(message.as_deref(), Some("connection refused"));
    assert_eq!(client.statistics().time_out_count, 0);
}

#[tokio::test]
async fn cookie_and_header_shims_issue_gets() {
    let transport = MockTransport::new(|_| MockReply::ok(""));
    let client = client_with(&transport);

    client.cookie("http://h/a", [("session", "1")]).await.unwrap();
    client.header("http://h/b", [("X-Probe", "yes")]).await.unwrap();
    client.run().await;

    let dispatched = transport.dispatched();
    assert_eq!(dispatched.len(), 2);
    assert!(dispatched.iter().all(|record| record.method == reqwest::Method::GET));
    assert_eq!(
        dispatched[0].cookies,
        vec![("session".to_string(), "1".to_string())]
    );
    assert!(dispatched[1]
        .headers
        .iter()
        .any(|(name, value)| name == "x-probe" && value == "yes"));
}

#[tokio::test]
async fn abort_drops_queued_work() {
    let transport = MockTransport::new(|_| MockReply::ok(""));
    let client = client_with(&transport);

    for index in 0..4 {
        client
            .get(&format!("http://h/p{index}"), RequestOptions::new())
            .await
            .unwrap();
    }
    client.abort();
    client.run().await;

    assert_eq!(transport.dispatch_count(), 0);
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(client.statistics().response_count, 0);
}

#[tokio::test]
async fn reset_restores_the_constructed_state() {
    let transport = MockTransport::new(|_| MockReply::ok(""));
    let client = HttpClient::builder()
        .transport(transport.clone())
        .blocking_transport(transport.clone())
        .cookie("seed", "1")
        .build()
        .unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    client.on_complete(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    client.update_cookies(vec![Cookie::new("learned", "2")]);
    client.get("http://h/x", RequestOptions::new()).await.unwrap();
    client.run().await;
    assert_eq!(client.cookies().len(), 2);

    client.reset(true);

    assert_eq!(client.statistics().request_count, 0);
    assert_eq!(client.pending_requests(), 0);
    let names: Vec<String> = client.cookies().iter().map(|c| c.name.clone()).collect();
    assert_eq!(names, vec!["seed"]);

    // Observers were cleared too.
    client.get("http://h/y", RequestOptions::new()).await.unwrap();
    client.run().await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
