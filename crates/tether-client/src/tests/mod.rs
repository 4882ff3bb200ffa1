//! Client and remote object tests against a scripted host.


use std::sync::mpsc;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tether_config::Config;
use tether_core::testing::ScriptedRemote;
use tether_core::{
    CallContext, CallKind, Handler, HandlerError, ManagerError, MemberDescriptor, MemberIndex,
    MemberKind, Notification, RemoteError,
};

use crate::{Client, ClientError, RemoteObject};

pub(crate) const TIMER: &str = "timer";
pub(crate) const TICK: MemberIndex = MemberIndex::new(2);
pub(crate) const LIVENESS: Duration = Duration::from_secs(5);

pub(crate) fn timer_members() -> Vec<MemberDescriptor> {
    vec![
        MemberDescriptor::new("count", 0, MemberKind::Property),
        MemberDescriptor::new("start", 1, MemberKind::Method),
        MemberDescriptor::new("tick", TICK, MemberKind::Event),
        MemberDescriptor::new("interval", 3, MemberKind::Property),
    ]
}

pub(crate) fn scripted_host() -> ScriptedRemote {
    ScriptedRemote::new()
        .with_class(TIMER, timer_members())
        .with_responder(|request| match request.kind {
            CallKind::GetProperty => Ok(json!(42)),
            CallKind::SetProperty => Ok(Value::Null),
            CallKind::Invoke => Ok(Value::from(request.arguments.len())),
        })
}

pub(crate) fn connect(remote: &ScriptedRemote) -> Client {
    Client::connect(Arc::new(remote.clone()), &Config::default()).expect("connect client")
}

/// Handler reading `count` through the object whose event invoked it.
pub(crate) fn reading_handler(object: Weak<RemoteObject>) -> Handler {
    Handler::new(move |context, _| {
        let target = object
            .upgrade()
            .ok_or_else(|| HandlerError::new("object dropped"))?;
        target
            .get(context, "count")
            .map(drop)
            .map_err(|error| HandlerError::new(error.to_string()))
    })
}

struct Fixture {
    remote: ScriptedRemote,
    client: Client,
}

#[fixture]
fn fixture() -> Fixture {
    let remote = scripted_host();
    let client = connect(&remote);
    Fixture { remote, client }
}

#[rstest]
fn create_indexes_members(fixture: Fixture) {
    let object = fixture.client.create(TIMER).expect("create timer");
    assert_eq!(object.class_id(), TIMER);
    assert_eq!(object.instance().as_str(), "timer#1");
    assert_eq!(object.members().len(), 4);
    assert_eq!(object.member("tick").expect("tick").index, TICK);
    assert!(fixture.client.handlers().is_registered(object.instance()));
}

#[rstest]
fn create_rejects_unknown_classes(fixture: Fixture) {
    let error = fixture.client.create("sprocket").expect_err("unknown class");
    assert!(matches!(
        error,
        ClientError::Remote(RemoteError::Rejected { code: -32602, .. })
    ));
}

#[rstest]
fn property_and_method_calls_reach_the_host(fixture: Fixture) {
    let object = fixture.client.create(TIMER).expect("create timer");
    let root = CallContext::root();
    assert_eq!(object.get(&root, "count").expect("get"), json!(42));
    object.set(&root, "interval", json!(250)).expect("set");
    let result = object
        .invoke(&root, "start", vec![json!(1), json!(2)])
        .expect("invoke");
    assert_eq!(result, json!(2));

    let calls = fixture.remote.calls();
    let kinds: Vec<CallKind> = calls.iter().map(|call| call.kind).collect();
    assert_eq!(
        kinds,
        vec![CallKind::GetProperty, CallKind::SetProperty, CallKind::Invoke]
    );
    assert!(calls.iter().all(|call| call.callback.is_none()));
    assert_eq!(
        calls.get(1).map(|call| call.arguments.clone()),
        Some(vec![json!(250)])
    );
}

#[rstest]
#[case("start", MemberKind::Property)]
#[case("tick", MemberKind::Property)]
fn reading_a_non_property_is_refused(
    fixture: Fixture,
    #[case] name: &str,
    #[case] expected: MemberKind,
) {
    let object = fixture.client.create(TIMER).expect("create timer");
    let error = object
        .get(&CallContext::root(), name)
        .expect_err("wrong kind");
    assert!(matches!(
        error,
        ClientError::WrongMemberKind { expected: wanted, .. } if wanted == expected
    ));
    assert!(fixture.remote.calls().is_empty());
}

#[rstest]
fn connecting_to_a_method_is_refused(fixture: Fixture) {
    let object = fixture.client.create(TIMER).expect("create timer");
    let error = object
        .connect("start", Handler::new(|_, _| Ok(())))
        .expect_err("not an event");
    assert!(matches!(error, ClientError::WrongMemberKind { .. }));
    assert!(fixture.remote.subscriptions().is_empty());
}

#[rstest]
fn handler_calls_are_tagged_with_the_event(fixture: Fixture) {
    let object = Arc::new(fixture.client.create(TIMER).expect("create timer"));
    object
        .connect("tick", reading_handler(Arc::downgrade(&object)))
        .expect("connect");
    fixture.remote.push(Notification::new(
        object.instance().clone(),
        TICK,
        "t1",
        Vec::new(),
    ));
    assert!(fixture.remote.wait_for_acknowledgements(1, LIVENESS));
    let tags: Vec<Option<MemberIndex>> = fixture
        .remote
        .calls()
        .iter()
        .map(|call| call.callback)
        .collect();
    assert_eq!(tags, vec![Some(TICK)]);
}

#[rstest]
fn disconnect_reports_unknown_handlers(fixture: Fixture) {
    let object = fixture.client.create(TIMER).expect("create timer");
    let handler = Handler::new(|_, _| Ok(()));
    assert!(!object.disconnect("tick", &handler).expect("no-op disconnect"));
    object.connect("tick", handler.clone()).expect("connect");
    assert!(object.disconnect("tick", &handler).expect("disconnect"));
    assert_eq!(fixture.remote.unsubscriptions().len(), 1);
}

#[rstest]
fn destroy_is_idempotent_and_unregisters(fixture: Fixture) {
    let object = fixture.client.create(TIMER).expect("create timer");
    object
        .connect("tick", Handler::new(|_, _| Ok(())))
        .expect("connect");
    object.destroy().expect("destroy");
    object.destroy().expect("second destroy");
    assert_eq!(fixture.remote.destroyed().len(), 1);
    assert!(!fixture.client.handlers().is_registered(object.instance()));
    assert!(matches!(
        object.get(&CallContext::root(), "count"),
        Err(ClientError::Closed)
    ));
}

#[rstest]
fn rejected_destroy_keeps_the_object_usable(fixture: Fixture) {
    let object = fixture.client.create(TIMER).expect("create timer");
    object
        .connect("tick", Handler::new(|_, _| Ok(())))
        .expect("connect");
    fixture.remote.refuse_destroy(true);

    assert!(matches!(
        object.destroy(),
        Err(ClientError::DestroyRejected { .. })
    ));
    assert!(!object.is_destroyed());
    assert!(fixture.client.handlers().is_registered(object.instance()));
    assert_eq!(
        object.get(&CallContext::root(), "count").expect("still readable"),
        json!(42)
    );
    fixture.remote.push(Notification::new(
        object.instance().clone(),
        TICK,
        "kept",
        Vec::new(),
    ));
    assert!(fixture.remote.wait_for_acknowledgements(1, LIVENESS));

    fixture.remote.refuse_destroy(false);
    object.destroy().expect("retried destroy");
    assert!(object.is_destroyed());
    assert!(!fixture.client.handlers().is_registered(object.instance()));
    assert_eq!(fixture.remote.destroyed().len(), 1);
}

#[rstest]
fn dropping_an_object_destroys_it(fixture: Fixture) {
    let object = fixture.client.create(TIMER).expect("create timer");
    let instance = object.instance().clone();
    drop(object);
    assert_eq!(fixture.remote.destroyed(), vec![instance]);
}

#[rstest]
fn close_is_idempotent(fixture: Fixture) {
    assert_eq!(fixture.client.close(Some(LIVENESS)).expect("close"), 0);
    assert_eq!(fixture.client.close(Some(LIVENESS)).expect("close again"), 0);
    assert!(fixture.client.is_closed());
    assert!(matches!(
        fixture.client.create(TIMER),
        Err(ClientError::Closed)
    ));
}

#[rstest]
fn timed_out_close_can_be_retried(fixture: Fixture) {
    let object = fixture.client.create(TIMER).expect("create timer");
    let (entered_tx, entered_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let entered = Mutex::new(entered_tx);
    let release = Mutex::new(release_rx);
    object
        .connect(
            "tick",
            Handler::new(move |_, _| {
                entered
                    .lock()
                    .map_err(|_| HandlerError::new("poisoned"))?
                    .send(())
                    .map_err(|error| HandlerError::new(error.to_string()))?;
                release
                    .lock()
                    .map_err(|_| HandlerError::new("poisoned"))?
                    .recv()
                    .map_err(|error| HandlerError::new(error.to_string()))
            }),
        )
        .expect("connect");
    fixture.remote.push(Notification::new(
        object.instance().clone(),
        TICK,
        "slow",
        Vec::new(),
    ));
    entered_rx.recv_timeout(LIVENESS).expect("handler entered");

    let error = fixture
        .client
        .close(Some(Duration::from_millis(50)))
        .expect_err("handler still running");
    assert!(matches!(
        error,
        ClientError::Manager(ManagerError::Timeout { .. })
    ));
    assert!(!fixture.client.is_closed());

    release_tx.send(()).expect("release handler");
    assert_eq!(fixture.client.close(Some(LIVENESS)).expect("retry"), 0);
    assert!(fixture.client.is_closed());
}

#[rstest]
fn closing_from_a_handler_lets_the_loop_finish() {
    let remote = scripted_host();
    let client = Arc::new(connect(&remote));
    let object = client.create(TIMER).expect("create timer");
    let (seen_tx, seen_rx) = mpsc::channel();
    let seen = Mutex::new(seen_tx);
    let closing = Arc::downgrade(&client);
    object
        .connect(
            "tick",
            Handler::new(move |_, _| {
                let owner = closing
                    .upgrade()
                    .ok_or_else(|| HandlerError::new("client dropped"))?;
                seen.lock()
                    .map_err(|_| HandlerError::new("poisoned"))?
                    .send(owner.close(Some(LIVENESS)))
                    .map_err(|error| HandlerError::new(error.to_string()))
            }),
        )
        .expect("connect");
    remote.push(Notification::new(
        object.instance().clone(),
        TICK,
        "stop",
        Vec::new(),
    ));

    let from_handler = seen_rx.recv_timeout(LIVENESS).expect("handler ran");
    assert!(matches!(
        from_handler,
        Err(ClientError::Manager(ManagerError::StopFromDispatchThread))
    ));
    assert!(client.is_closed());
    assert_eq!(client.close(Some(LIVENESS)).expect("close from the owner"), 0);
    assert!(!client.dispatch().is_running());
}

#[rstest]
fn a_failing_stream_surfaces_on_close(fixture: Fixture) {
    let object = fixture.client.create(TIMER).expect("create timer");
    object
        .connect("tick", Handler::new(|_, _| Ok(())))
        .expect("connect");
    fixture.remote.fail("host crashed");
    let error = fixture.client.close(Some(LIVENESS)).expect_err("transport failure");
    assert!(matches!(error, ClientError::Manager(ManagerError::Dispatch(_))));
    assert!(fixture.client.is_closed());
}
