//! End-to-end smoke tests for the full hubmq stack.
//!
//! Each test boots a real broker (and event forwarder) on an ephemeral
//! port and talks to it over real sockets. Workers run as background
//! tasks; the assertions look only at what comes back over the wire.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hubmq_broker::{Broker, BrokerOptions, EventForwarder};
use hubmq_client::{
    AsyncRequester, EventPublisher, EventSubscriber, ReplyHandler, SyncRequester, WorkerClient,
    WorkerOptions,
};
use hubmq_protocol::message::BusMessage;
use serde_json::json;

struct Hub {
    requests: String,
    events_in: String,
    events_out: String,
}

/// Boot a broker and forwarder on ephemeral ports and run both.
async fn hub_with(options: BrokerOptions) -> Hub {
    let broker = Broker::bind("tcp://127.0.0.1:0", options)
        .await
        .expect("broker should bind");
    let forwarder = EventForwarder::bind("tcp://127.0.0.1:0", "tcp://127.0.0.1:0")
        .await
        .expect("forwarder should bind");
    let hub = Hub {
        requests: broker.endpoint().to_owned(),
        events_in: forwarder.in_endpoint().to_owned(),
        events_out: forwarder.out_endpoint().to_owned(),
    };
    tokio::spawn(broker.run());
    tokio::spawn(forwarder.run());
    hub
}

async fn hub() -> Hub {
    hub_with(BrokerOptions::default()).await
}

/// Register a worker that answers every request with its own payload.
async fn spawn_echo_worker(broker_addr: &str, service: &str) {
    let mut worker = WorkerClient::connect(broker_addr, service, WorkerOptions::default())
        .await
        .expect("worker should connect");
    tokio::spawn(async move {
        loop {
            match worker.receive_request(None).await {
                Ok(Some(request)) => {
                    let data = serde_json::Value::Object(request.data().clone());
                    if worker.send_reply(data).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(_) => break,
            }
        }
    });
}

/// Register a worker that stamps its tag into each reply and holds the
/// request for `delay` before answering.
async fn spawn_tagged_worker(broker_addr: &str, service: &str, tag: &'static str, delay: Duration) {
    let mut worker = WorkerClient::connect(broker_addr, service, WorkerOptions::default())
        .await
        .expect("worker should connect");
    tokio::spawn(async move {
        loop {
            match worker.receive_request(None).await {
                Ok(Some(request)) => {
                    tokio::time::sleep(delay).await;
                    let mut data = request.data().clone();
                    data.insert("by".to_owned(), json!(tag));
                    let data = serde_json::Value::Object(data);
                    if worker.send_reply(data).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(_) => break,
            }
        }
    });
}

async fn ask(
    broker_addr: &str,
    service: &str,
    message: &BusMessage,
    timeout: Duration,
) -> Option<BusMessage> {
    let mut requester = SyncRequester::connect(broker_addr)
        .await
        .expect("requester should connect");
    requester
        .request(service, message, timeout)
        .await
        .expect("request should not fail")
}

// ---------------------------------------------------------------------------
// Request / reply
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_echo_a_request_back() {
    let hub = hub().await;
    spawn_echo_worker(&hub.requests, "echo").await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut message = BusMessage::new("echo.say");
    message.set("text", json!("hello"));
    let reply = ask(&hub.requests, "echo", &message, Duration::from_secs(5)).await;

    let reply = reply.expect("echo should answer in time");
    assert_eq!(reply.action(), "echo.say.result");
    assert_eq!(reply.get("text"), Some(&json!("hello")));
}

#[tokio::test]
async fn should_refuse_requests_without_workers() {
    let hub = hub().await;

    let started = Instant::now();
    let reply = ask(
        &hub.requests,
        "nobody",
        &BusMessage::new("nobody.ping"),
        Duration::from_secs(1),
    )
    .await;

    let reply = reply.expect("broker should answer instead of timing out");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(reply.action(), "nobody.ping.result");
    assert_eq!(reply.status(), Some(false));
    assert_eq!(reply.reason(), Some("service unavailable"));
}

#[tokio::test]
async fn should_keep_concurrent_requests_apart() {
    let hub = hub().await;
    spawn_echo_worker(&hub.requests, "echo").await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut handles = Vec::new();
    for n in 0..5_i64 {
        let addr = hub.requests.clone();
        handles.push(tokio::spawn(async move {
            let mut message = BusMessage::new("echo.say");
            message.set("n", json!(n));
            let reply = ask(&addr, "echo", &message, Duration::from_secs(5))
                .await
                .expect("every caller should get an answer");
            assert_eq!(reply.get("n"), Some(&json!(n)));
        }));
    }
    for handle in handles {
        handle.await.expect("requester task should not panic");
    }
}

#[tokio::test]
async fn should_spread_work_across_idle_workers() {
    let hub = hub().await;
    spawn_tagged_worker(&hub.requests, "work", "first", Duration::from_millis(300)).await;
    spawn_tagged_worker(&hub.requests, "work", "second", Duration::from_millis(300)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let addr = hub.requests.clone();
        handles.push(tokio::spawn(async move {
            let reply = ask(
                &addr,
                "work",
                &BusMessage::new("work.do"),
                Duration::from_secs(5),
            )
            .await
            .expect("both callers should get an answer");
            reply
                .get("by")
                .and_then(|value| value.as_str())
                .map(ToOwned::to_owned)
                .expect("reply should name its worker")
        }));
    }
    let mut seen = Vec::new();
    for handle in handles {
        seen.push(handle.await.expect("requester task should not panic"));
    }
    seen.sort();
    assert_eq!(seen, ["first", "second"]);
}

#[tokio::test]
async fn should_answer_queued_requests_when_the_worker_frees_up() {
    let hub = hub().await;
    spawn_tagged_worker(&hub.requests, "slow", "only", Duration::from_millis(200)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut handles = Vec::new();
    for n in 0..2_i64 {
        let addr = hub.requests.clone();
        handles.push(tokio::spawn(async move {
            let mut message = BusMessage::new("slow.do");
            message.set("n", json!(n));
            let reply = ask(&addr, "slow", &message, Duration::from_secs(5))
                .await
                .expect("queued caller should still get an answer");
            assert_eq!(reply.get("n"), Some(&json!(n)));
        }));
    }
    for handle in handles {
        handle.await.expect("requester task should not panic");
    }
}

// ---------------------------------------------------------------------------
// Worker lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_report_no_request_on_every_empty_poll() {
    let hub = hub().await;
    let mut worker = WorkerClient::connect(&hub.requests, "idle", WorkerOptions::default())
        .await
        .expect("worker should connect");

    for _ in 0..3 {
        let polled = worker
            .receive_request(Some(Duration::ZERO))
            .await
            .expect("empty poll should not fail");
        assert!(polled.is_none());
    }
}

#[tokio::test]
async fn should_evict_a_silent_worker() {
    let hub = hub_with(BrokerOptions {
        heartbeat_interval: Duration::from_millis(200),
        liveness: 2,
        max_pending: 16,
    })
    .await;

    // Registers, then never polls, so it also never heartbeats.
    let worker = WorkerClient::connect(&hub.requests, "lonely", WorkerOptions::default())
        .await
        .expect("worker should connect");
    tokio::time::sleep(Duration::from_millis(900)).await;

    let reply = ask(
        &hub.requests,
        "lonely",
        &BusMessage::new("lonely.ping"),
        Duration::from_secs(1),
    )
    .await
    .expect("broker should refuse instead of dispatching to the evicted worker");
    assert_eq!(reply.status(), Some(false));
    drop(worker);
}

// ---------------------------------------------------------------------------
// Fire-and-forget requester
// ---------------------------------------------------------------------------

struct Recorder(tokio::sync::mpsc::Sender<BusMessage>);

#[async_trait::async_trait]
impl ReplyHandler for Recorder {
    async fn on_reply(&self, reply: BusMessage) {
        let _ = self.0.send(reply).await;
    }
}

#[tokio::test]
async fn should_deliver_replies_through_the_handler() {
    let hub = hub().await;
    spawn_echo_worker(&hub.requests, "echo").await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let (tx, mut rx) = tokio::sync::mpsc::channel(4);
    let requester = AsyncRequester::connect(&hub.requests, Arc::new(Recorder(tx)))
        .await
        .expect("requester should connect");
    let mut message = BusMessage::new("echo.say");
    message.set("text", json!("later"));
    requester
        .send("echo", message)
        .await
        .expect("send should succeed");

    let reply = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("reply should arrive in time")
        .expect("channel should stay open");
    assert_eq!(reply.action(), "echo.say.result");
    assert_eq!(reply.get("text"), Some(&json!("later")));
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_forward_events_to_matching_subscribers() {
    let hub = hub().await;
    let mut devices = EventSubscriber::connect(&hub.events_out, &["device."])
        .await
        .expect("subscriber should connect");
    let mut firehose = EventSubscriber::connect(&hub.events_out, &[])
        .await
        .expect("subscriber should connect");
    let mut publisher = EventPublisher::connect(&hub.events_in)
        .await
        .expect("publisher should connect");
    tokio::time::sleep(Duration::from_millis(300)).await;

    publisher
        .publish("device.update", json!({"state": "on"}))
        .await
        .expect("publish should succeed");
    publisher
        .publish("plugin.started", json!({"name": "bridge"}))
        .await
        .expect("publish should succeed");

    let event = devices
        .recv_timeout(Duration::from_secs(2))
        .await
        .expect("receive should not fail")
        .expect("device event should arrive");
    assert_eq!(event.name(), "device.update");
    assert_eq!(event.payload()["state"], json!("on"));
    let stray = devices
        .recv_timeout(Duration::from_millis(300))
        .await
        .expect("receive should not fail");
    assert!(stray.is_none());

    let first = firehose
        .recv_timeout(Duration::from_secs(2))
        .await
        .expect("receive should not fail")
        .expect("first event should arrive");
    let second = firehose
        .recv_timeout(Duration::from_secs(2))
        .await
        .expect("receive should not fail")
        .expect("second event should arrive");
    assert_eq!(first.name(), "device.update");
    assert_eq!(second.name(), "plugin.started");
}

#[tokio::test]
async fn should_publish_without_subscribers() {
    let hub = hub().await;
    let mut publisher = EventPublisher::connect(&hub.events_in)
        .await
        .expect("publisher should connect");
    publisher
        .publish("device.update", json!({"state": "off"}))
        .await
        .expect("publishing with no subscribers should succeed");
}
