//! End-to-end tests of the JSON-RPC stub against an in-process host.
#![cfg(unix)]

use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use rstest::rstest;
use serde_json::{Value, json};
use tether_core::{
    AckQueue, CallKind, CallRequest, InstanceId, MemberIndex, MemberKind, Notification,
    RemoteError, RemoteStub, StreamError,
};
use tether_rpc::jsonrpc::{JsonRpcMessage, JsonRpcNotification, JsonRpcResponse};
use tether_rpc::methods;
use tether_rpc::{FrameReader, FrameWriter, RpcConnection, RpcOptions};

const LIVENESS: Duration = Duration::from_secs(5);
const IGNORED_MEMBER: u32 = 99;

/// Something the host received that the tests want to inspect.
#[derive(Debug, Clone, PartialEq)]
struct Observed {
    method: String,
    params: Option<Value>,
}

struct Host {
    stream: UnixStream,
    observed: Receiver<Observed>,
}

impl Host {
    fn next_observed(&self) -> Observed {
        self.observed
            .recv_timeout(LIVENESS)
            .expect("host observed nothing")
    }

    fn hang_up(&self) {
        self.stream
            .shutdown(Shutdown::Both)
            .expect("shut down host socket");
    }
}

fn reply_to(method: &str, params: Option<&Value>) -> Option<Result<Value, (i64, &'static str)>> {
    match method {
        methods::PING | methods::EVENTS_OPEN => Some(Ok(Value::Null)),
        methods::CREATE => {
            let class_id = params.and_then(|p| p.get("class_id")).and_then(Value::as_str);
            if class_id == Some("Broken") {
                Some(Err((-32000, "cannot create")))
            } else {
                Some(Ok(json!("Clock#1")))
            }
        }
        methods::DESCRIBE => Some(Ok(json!([{"name": "tick", "index": 2, "kind": "event"}]))),
        methods::CALL => {
            let index = params.and_then(|p| p.get("index")).and_then(Value::as_u64);
            if index == Some(u64::from(IGNORED_MEMBER)) {
                None
            } else {
                Some(Ok(params.cloned().unwrap_or(Value::Null)))
            }
        }
        methods::CONNECT_EVENT => Some(Ok(json!(true))),
        methods::DISCONNECT_EVENT => Some(Ok(json!(false))),
        _ => Some(Err((-32601, "unknown method"))),
    }
}

fn send<T: serde::Serialize>(writer: &mut FrameWriter<UnixStream>, message: &T) {
    let payload = serde_json::to_vec(message).expect("encode host message");
    writer.send(&payload).expect("host write");
}

fn serve(stream: UnixStream, queued: Vec<Notification>, observed: &Sender<Observed>) {
    let mut reader = FrameReader::new(stream.try_clone().expect("clone host socket"));
    let mut writer = FrameWriter::new(stream);
    let mut pushes = Some(queued);
    while let Ok(Some(payload)) = reader.receive() {
        let message: JsonRpcMessage = serde_json::from_slice(&payload).expect("decode");
        match message {
            JsonRpcMessage::Request(request) => {
                let opened = request.method == methods::EVENTS_OPEN;
                match reply_to(&request.method, request.params.as_ref()) {
                    Some(Ok(result)) => send(&mut writer, &JsonRpcResponse::success(request.id, result)),
                    Some(Err((code, text))) => {
                        send(&mut writer, &JsonRpcResponse::failure(request.id, code, text));
                    }
                    None => {}
                }
                if opened {
                    for notification in pushes.take().unwrap_or_default() {
                        let params = serde_json::to_value(&notification).expect("encode event");
                        send(
                            &mut writer,
                            &JsonRpcNotification::new(methods::EVENTS_NOTIFY, Some(params)),
                        );
                    }
                }
            }
            JsonRpcMessage::Notification(notification) => {
                let closing = notification.method == methods::EVENTS_CLOSE;
                observed
                    .send(Observed {
                        method: notification.method,
                        params: notification.params,
                    })
                    .expect("report observation");
                if closing {
                    send(&mut writer, &JsonRpcNotification::new(methods::EVENTS_END, None));
                }
            }
            JsonRpcMessage::Response(_) => {}
        }
    }
}

fn connect(options: RpcOptions, pushes: Vec<Notification>) -> (RpcConnection, Host) {
    let (client_side, host_side) = UnixStream::pair().expect("socket pair");
    let (observed_tx, observed_rx) = mpsc::channel();
    let host_stream = host_side.try_clone().expect("clone host socket");
    thread::spawn(move || serve(host_side, pushes, &observed_tx));
    let reader = client_side.try_clone().expect("clone client socket");
    let connection = RpcConnection::new(reader, client_side, options).expect("connection");
    (
        connection,
        Host {
            stream: host_stream,
            observed: observed_rx,
        },
    )
}

fn call_request(index: u32, callback: Option<u32>) -> CallRequest {
    CallRequest {
        instance: InstanceId::from("Clock#1"),
        index: MemberIndex::new(index),
        kind: CallKind::Invoke,
        arguments: vec![json!("now")],
        callback: callback.map(MemberIndex::new),
    }
}

#[rstest]
fn unary_calls_round_trip() {
    let (connection, _host) = connect(RpcOptions::default(), Vec::new());

    connection.ready(LIVENESS).expect("host ready");
    let instance = connection.create("Clock").expect("create");
    assert_eq!(instance, InstanceId::from("Clock#1"));

    let members = connection.describe(&instance).expect("describe");
    assert_eq!(members.len(), 1);
    assert_eq!(members.first().map(|m| m.kind), Some(MemberKind::Event));

    let echoed = connection.call(call_request(4, Some(2))).expect("call");
    assert_eq!(echoed.get("callback"), Some(&json!(2)));
    let untagged = connection.call(call_request(4, None)).expect("call");
    assert_eq!(untagged.get("callback"), None);

    assert!(connection.connect_event(&instance, MemberIndex::new(2)).expect("connect"));
    assert!(!connection.disconnect_event(&instance, MemberIndex::new(2)).expect("disconnect"));
}

#[rstest]
fn host_errors_become_rejections() {
    let (connection, _host) = connect(RpcOptions::default(), Vec::new());

    let error = connection.create("Broken").expect_err("host refuses");

    assert!(matches!(
        error,
        RemoteError::Rejected { code: -32000, ref message } if message == "cannot create"
    ));
}

#[rstest]
fn unanswered_call_times_out() {
    let options = RpcOptions::new(Duration::from_millis(100));
    let (connection, _host) = connect(options, Vec::new());

    let error = connection
        .call(call_request(IGNORED_MEMBER, None))
        .expect_err("no answer");

    assert!(matches!(
        error,
        RemoteError::Timeout { ref method, timeout_ms: 100 } if method == "call"
    ));
    connection.ready(LIVENESS).expect("connection still usable");
}

#[rstest]
fn event_call_delivers_then_closes_gracefully() {
    let pushes = vec![
        Notification::new("Clock#1", 2, "a", vec![json!(true)]),
        Notification::new("Clock#1", 2, "b", vec![json!(false)]),
    ];
    let (connection, host) = connect(RpcOptions::default(), pushes.clone());
    let acks = Arc::new(AckQueue::bounded(4));

    let call = connection.handle_event(Arc::clone(&acks)).expect("open");
    let mut inbound = call.inbound;
    for expected in &pushes {
        let received = inbound.next().expect("notification").expect("healthy stream");
        assert_eq!(&received, expected);
        acks.put(received.acknowledgement()).expect("queue open");
    }
    acks.close();

    assert!(inbound.next().is_none());
    let observed: Vec<Observed> = (0..3).map(|_| host.next_observed()).collect();
    assert_eq!(
        observed,
        [
            Observed {
                method: String::from(methods::EVENTS_ACK),
                params: Some(json!({"index": 2, "correlation_id": "a"})),
            },
            Observed {
                method: String::from(methods::EVENTS_ACK),
                params: Some(json!({"index": 2, "correlation_id": "b"})),
            },
            Observed {
                method: String::from(methods::EVENTS_CLOSE),
                params: None,
            },
        ]
    );
}

#[rstest]
fn cancelled_event_call_reports_cancellation() {
    let (connection, host) = connect(RpcOptions::default(), Vec::new());
    let acks = Arc::new(AckQueue::unbounded());
    let call = connection.handle_event(Arc::clone(&acks)).expect("open");
    let mut inbound = call.inbound;

    call.control.cancel();
    acks.close_now();

    assert!(matches!(inbound.next(), Some(Err(StreamError::Cancelled))));
    assert!(inbound.next().is_none());
    assert_eq!(host.next_observed().method, methods::EVENTS_CANCEL);
}

#[rstest]
fn wake_does_not_end_the_event_call() {
    let pushes = vec![Notification::new("Clock#1", 2, "late", Vec::new())];
    let (connection, _host) = connect(RpcOptions::default(), pushes);
    let call = connection
        .handle_event(Arc::new(AckQueue::unbounded()))
        .expect("open");
    let mut inbound = call.inbound;

    call.control.wake();

    let received = inbound.next().expect("notification").expect("healthy stream");
    assert_eq!(received.correlation_id.as_str(), "late");
}

#[rstest]
fn hang_up_fails_stream_and_later_calls() {
    let (connection, host) = connect(RpcOptions::default(), Vec::new());
    let call = connection
        .handle_event(Arc::new(AckQueue::unbounded()))
        .expect("open");
    let mut inbound = call.inbound;

    host.hang_up();

    assert!(matches!(inbound.next(), Some(Err(StreamError::Failed { .. }))));
    assert!(!connection.is_connected());
    assert!(matches!(
        connection.create("Clock"),
        Err(RemoteError::Disconnected)
    ));
}
