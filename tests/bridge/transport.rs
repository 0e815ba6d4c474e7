use crate::common::{response, wait_until, FakeBackend};
use debugpy_bridge::dap::client::{ClientOptions, DapClient, EventHandler};
use debugpy_bridge::dap::protocol;
use debugpy_bridge::debugger::Error;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Value>>,
}

impl EventHandler for Recorder {
    fn handle_event(&self, _: &DapClient, event: Value) {
        self.events.lock().unwrap().push(event);
    }
}

fn connect(backend: &FakeBackend, handler: Arc<Recorder>) -> Arc<DapClient> {
    let options = ClientOptions {
        request_timeout: Duration::from_secs(2),
        ..ClientOptions::default()
    };
    DapClient::spawn(backend.endpoint(), options, handler)
        .wait()
        .unwrap()
}

#[test]
fn test_sent_messages_arrive_unchanged() {
    let backend = FakeBackend::with_script(|_| vec![]);
    let client = connect(&backend, Arc::default());

    let messages = [
        json!({"type": "request", "seq": 1, "command": "initialize", "arguments": {"adapterID": "x"}}),
        json!({"type": "request", "seq": 2, "command": "threads"}),
        json!({"type": "request", "seq": 40, "command": "evaluate", "arguments": {"expression": "ü + 1"}}),
    ];
    for message in &messages {
        client.send_request(message.clone()).unwrap();
    }
    let seq = client
        .send_request(json!({"type": "request", "command": "pause"}))
        .unwrap();
    assert_eq!(seq, 41);

    wait_until("backend requests", || backend.requests().len() == 4);
    let received = backend.requests();
    for (sent, received) in messages.iter().zip(&received) {
        assert_eq!(sent, received);
    }
    assert_eq!(received[3]["seq"], 41);
    assert_eq!(received[3]["command"], "pause");
    assert_eq!(received[3]["type"], "request");
}

#[test]
fn test_request_waits_for_its_own_response() {
    let backend = FakeBackend::with_script(|request| {
        vec![
            json!({"type": "event", "event": "output", "body": {"output": "noise"}}),
            response(request, json!({"echo": request["arguments"]})),
        ]
    });
    let recorder = Arc::new(Recorder::default());
    let client = connect(&backend, recorder.clone());

    let reply = client
        .request(json!({"type": "request", "command": "evaluate", "arguments": {"expression": "1"}}))
        .unwrap();
    assert_eq!(reply["body"]["echo"]["expression"], "1");
    assert!(protocol::is_response_to(
        &reply,
        reply["request_seq"].as_i64().unwrap(),
        "evaluate"
    ));

    wait_until("output event", || recorder.events.lock().unwrap().len() == 1);
}

#[test]
fn test_wait_timeout_does_not_block_other_waiters() {
    let backend = FakeBackend::with_script(|request| {
        thread::sleep(Duration::from_millis(100));
        vec![response(request, json!({}))]
    });
    let client = connect(&backend, Arc::default());

    let waiter = thread::spawn({
        let client = client.clone();
        move || {
            let start = Instant::now();
            let err = client
                .wait_for_message_timeout("nothing", |_| false, Duration::from_millis(300))
                .unwrap_err();
            (err, start.elapsed())
        }
    });

    let reply = client
        .request(json!({"type": "request", "command": "threads"}))
        .unwrap();
    assert_eq!(reply["command"], "threads");

    let (err, elapsed) = waiter.join().unwrap();
    assert!(matches!(err, Error::Timeout { .. }));
    assert!(elapsed >= Duration::from_millis(300));
}

#[test]
fn test_requests_sharing_seq_are_both_answered() {
    // the stack trace is answered only once the front end request with the same seq shows up
    let backend = FakeBackend::with_script(|request| match request["command"].as_str() {
        Some("stackTrace") => vec![],
        Some("threads") => vec![
            json!({
                "type": "response",
                "request_seq": request["seq"],
                "success": true,
                "command": "stackTrace",
                "body": {"stackFrames": []},
            }),
            response(request, json!({"threads": []})),
        ],
        _ => vec![response(request, json!({}))],
    });
    let client = connect(&backend, Arc::default());

    client
        .request(json!({"type": "request", "seq": 10, "command": "continue"}))
        .unwrap();
    let stack = thread::spawn({
        let client = client.clone();
        move || {
            client.request(json!({"type": "request", "command": "stackTrace", "arguments": {"threadId": 1}}))
        }
    });
    wait_until("stackTrace request", || {
        backend.requests_of("stackTrace").len() == 1
    });
    assert_eq!(backend.requests_of("stackTrace")[0]["seq"], 11);

    let threads = client
        .request(json!({"type": "request", "seq": 11, "command": "threads"}))
        .unwrap();
    assert_eq!(threads["command"], "threads");
    assert_eq!(stack.join().unwrap().unwrap()["command"], "stackTrace");
}

#[test]
fn test_closed_connection() {
    let backend = FakeBackend::with_script(|_| vec![]);
    let client = connect(&backend, Arc::default());
    assert!(client.is_connected());
    assert_eq!(client.endpoint(), backend.endpoint());

    client.shutdown();
    assert!(!client.is_connected());
    let err = client
        .request(json!({"type": "request", "command": "threads"}))
        .unwrap_err();
    assert!(err.is_fatal());
}
