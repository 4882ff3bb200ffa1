//! Behaviour-driven tests for notification delivery and subscriptions.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::Value;

use crate::error::{DispatchError, HandlerError};
use crate::protocol::{Acknowledgement, CallKind, CallRequest, InstanceId, MemberIndex, Notification};
use crate::registry::{Handler, HandlerRegistry};
use crate::remote::RemoteStub;
use crate::stream::NotificationStream;
use crate::testing::ScriptedRemote;
use crate::{CallContext, DispatchLoop};

const INSTANCE: &str = "gadget#1";
const LIVENESS: Duration = Duration::from_secs(5);

struct World {
    remote: ScriptedRemote,
    registry: Arc<HandlerRegistry>,
    stream: Arc<NotificationStream>,
    dispatch: DispatchLoop,
    recorded: Arc<Mutex<Vec<Value>>>,
    handlers: Vec<Handler>,
    outcome: Option<Result<i32, DispatchError>>,
}

#[fixture]
fn world() -> World {
    let remote = ScriptedRemote::new();
    let stub: Arc<dyn RemoteStub> = Arc::new(remote.clone());
    let registry = Arc::new(HandlerRegistry::new(Arc::clone(&stub)));
    registry.register_instance(InstanceId::from(INSTANCE));
    let stream = Arc::new(NotificationStream::new(stub, Some(8)));
    let dispatch = DispatchLoop::new(Arc::clone(&registry), Arc::clone(&stream));
    World {
        remote,
        registry,
        stream,
        dispatch,
        recorded: Arc::new(Mutex::new(Vec::new())),
        handlers: Vec::new(),
        outcome: None,
    }
}

fn unquote(text: &str) -> &str {
    text.trim_matches('"')
}

fn connect(world: &mut World, index: u32, handler: Handler) {
    world
        .registry
        .connect(
            &InstanceId::from(INSTANCE),
            MemberIndex::new(index),
            handler.clone(),
        )
        .expect("connect handler");
    world.handlers.push(handler);
}

fn tagged_call(remote: &ScriptedRemote, context: &CallContext<'_>) -> Result<Value, HandlerError> {
    remote
        .call(CallRequest {
            instance: InstanceId::from(INSTANCE),
            index: MemberIndex::new(1),
            kind: CallKind::GetProperty,
            arguments: Vec::new(),
            callback: context.callback_tag(),
        })
        .map_err(|error| HandlerError::new(error.to_string()))
}

#[given("a handler recording arguments on member {index}")]
fn given_recorder(world: &mut World, index: u32) {
    let sink = Arc::clone(&world.recorded);
    let handler = Handler::new(move |_, arguments| {
        sink.lock()
            .expect("recorded lock")
            .extend(arguments.iter().cloned());
        Ok(())
    });
    connect(world, index, handler);
}

#[given("a failing handler on member {index}")]
fn given_failing_handler(world: &mut World, index: u32) {
    connect(
        world,
        index,
        Handler::new(|_, _| Err(HandlerError::new("handler refused"))),
    );
}

#[given("a handler on member {index} that calls the host")]
fn given_calling_handler(world: &mut World, index: u32) {
    let remote = world.remote.clone();
    let handler = Handler::new(move |context, _| tagged_call(&remote, context).map(drop));
    connect(world, index, handler);
}

#[given("two handlers connected on member {index}")]
fn given_two_handlers(world: &mut World, index: u32) {
    connect(world, index, Handler::new(|_, _| Ok(())));
    connect(world, index, Handler::new(|_, _| Ok(())));
}

#[given("the host sends notification {id} on member {index} with argument {argument}")]
fn given_notification(world: &mut World, id: String, index: u32, argument: String) {
    let value: Value = serde_json::from_str(&argument).expect("argument is JSON");
    world.remote.push(Notification::new(
        INSTANCE,
        index,
        unquote(&id),
        vec![value],
    ));
}

#[given("the host ends the event stream")]
fn given_stream_end(world: &mut World) {
    world.remote.end();
}

#[given("the loop was asked to exit with code {code}")]
fn given_exit_requested(world: &mut World, code: i32) {
    world.dispatch.exit(code);
}

#[when("a call is made outside any handler")]
fn when_root_call(world: &mut World) {
    tagged_call(&world.remote, &CallContext::root()).expect("root call");
}

#[when("the dispatch loop runs")]
fn when_loop_runs(world: &mut World) {
    world.outcome = Some(world.dispatch.run());
    world.stream.close();
}

#[when("the first handler is disconnected")]
fn when_first_disconnected(world: &mut World) {
    disconnect_nth(world, 0);
}

#[when("the second handler is disconnected")]
fn when_second_disconnected(world: &mut World) {
    disconnect_nth(world, 1);
}

fn disconnect_nth(world: &mut World, position: usize) {
    let handler = world.handlers.get(position).expect("handler connected");
    let removed = world
        .registry
        .disconnect(&InstanceId::from(INSTANCE), MemberIndex::new(4), handler)
        .expect("disconnect handler");
    assert!(removed);
}

#[then("the loop returns exit code {code}")]
fn then_exit_code(world: &mut World, code: i32) {
    let outcome = world.outcome.as_ref().expect("loop should have run");
    assert!(
        matches!(outcome, Ok(returned) if *returned == code),
        "unexpected outcome: {outcome:?}"
    );
}

#[then("the recorded arguments are {expected}")]
fn then_recorded(world: &mut World, expected: String) {
    let values: Vec<Value> = serde_json::from_str(unquote(&expected)).expect("expected JSON list");
    assert_eq!(*world.recorded.lock().expect("recorded lock"), values);
}

#[then("no handler was invoked")]
fn then_no_handler(world: &mut World) {
    assert!(world.recorded.lock().expect("recorded lock").is_empty());
    assert_eq!(world.dispatch.delivered(), 0);
}

#[then("the host receives acknowledgements {expected}")]
fn then_acknowledgements(world: &mut World, expected: String) {
    let wanted: Vec<Acknowledgement> = unquote(&expected)
        .split(',')
        .map(|pair| {
            let (index, id) = pair.split_once(':').expect("index:id pair");
            Acknowledgement::new(index.parse::<u32>().expect("numeric index"), id)
        })
        .collect();
    assert!(world.remote.wait_for_acknowledgements(wanted.len(), LIVENESS));
    assert_eq!(world.remote.acknowledgements(), wanted);
}

#[then("{count} handler failures were reported")]
fn then_failures(world: &mut World, count: u64) {
    assert_eq!(world.dispatch.handler_failures(), count);
}

#[then("the host saw {subscribes} subscribe and {unsubscribes} unsubscribe calls")]
fn then_subscription_calls(world: &mut World, subscribes: usize, unsubscribes: usize) {
    assert_eq!(world.remote.subscriptions().len(), subscribes);
    assert_eq!(world.remote.unsubscriptions().len(), unsubscribes);
}

#[then("the host saw calls tagged {expected}")]
fn then_call_tags(world: &mut World, expected: String) {
    let tags: Vec<String> = world
        .remote
        .calls()
        .iter()
        .map(|call| {
            call.callback
                .map_or_else(|| String::from("none"), |index| index.to_string())
        })
        .collect();
    assert_eq!(tags.join(","), unquote(&expected));
}

#[scenario(path = "tests/features/notification_dispatch.feature")]
fn notification_dispatch_behaviour(world: World) {
    let _ = world;
}
