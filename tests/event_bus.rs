//! Black-box coverage of the event bus's testable properties.

use std::any::{Any, TypeId};
use std::sync::{Arc, Mutex};

use ratebus::bus::{DeadEvent, Event, EventBus};

#[derive(Debug)]
struct Ping;

impl Event for Ping {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct A;

impl Event for A {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// B conceptually "extends" A: its hierarchy includes both TypeIds, so a
/// subscriber registered against A also receives B instances.
#[derive(Debug)]
struct B;

impl Event for B {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_hierarchy(&self) -> Vec<TypeId> {
        vec![TypeId::of::<B>(), TypeId::of::<A>()]
    }
}

struct Counter;

#[test]
fn register_then_post_delivers_exactly_once() {
    let bus = EventBus::new("test");
    let hits = Arc::new(Mutex::new(0));
    let sink = hits.clone();

    let listener = Arc::new(Counter);
    bus.listener(listener).on::<Ping, _>(move |_: &Ping| *sink.lock().unwrap() += 1).register();

    bus.post(Ping);
    assert_eq!(*hits.lock().unwrap(), 1);
}

#[test]
fn posting_with_no_subscribers_yields_exactly_one_dead_event() {
    let bus = EventBus::new("test");
    let dead_events = Arc::new(Mutex::new(Vec::new()));
    let sink = dead_events.clone();

    let listener = Arc::new(Counter);
    bus.listener(listener)
        .on::<DeadEvent, _>(move |event: &DeadEvent| sink.lock().unwrap().push(event.source_bus.clone()))
        .register();

    // Ping has no subscribers, so it bounces back as exactly one DeadEvent.
    bus.post(Ping);
    assert_eq!(dead_events.lock().unwrap().len(), 1);

    // A DeadEvent with no subscriber of its own does not recurse into a
    // second DeadEvent.
    let bus2 = EventBus::new("test2");
    bus2.post(Ping);
}

#[test]
fn unregister_then_post_delivers_nothing_then_register_restores_delivery() {
    let bus = EventBus::new("test");
    let hits = Arc::new(Mutex::new(0));
    let sink = hits.clone();

    let listener = Arc::new(Counter);
    let registration = bus.listener(listener.clone()).on::<Ping, _>({
        let sink = sink.clone();
        move |_: &Ping| *sink.lock().unwrap() += 1
    }).register();

    bus.post(Ping);
    assert_eq!(*hits.lock().unwrap(), 1);

    bus.unregister(&registration).unwrap();
    bus.post(Ping);
    assert_eq!(*hits.lock().unwrap(), 1, "removed listener must not see further posts");

    bus.listener(listener).on::<Ping, _>(move |_: &Ping| *sink.lock().unwrap() += 1).register();
    bus.post(Ping);
    assert_eq!(*hits.lock().unwrap(), 2, "re-registering restores delivery");
}

#[test]
fn unregister_of_unknown_registration_fails() {
    let bus = EventBus::new("test");
    let hits = Arc::new(Mutex::new(0));
    let sink = hits.clone();
    let listener = Arc::new(Counter);
    let registration = bus.listener(listener).on::<Ping, _>(move |_: &Ping| *sink.lock().unwrap() += 1).register();

    bus.unregister(&registration).unwrap();
    assert!(bus.unregister(&registration).is_err());
}

#[test]
fn supertype_subscriber_receives_subclass_instance_but_not_vice_versa() {
    let bus = EventBus::new("test");
    let a_hits = Arc::new(Mutex::new(0));
    let b_hits = Arc::new(Mutex::new(0));
    let (a_sink, b_sink) = (a_hits.clone(), b_hits.clone());

    let listener = Arc::new(Counter);
    bus.listener(listener)
        .on::<A, _>(move |_: &A| *a_sink.lock().unwrap() += 1)
        .on::<B, _>(move |_: &B| *b_sink.lock().unwrap() += 1)
        .register();

    bus.post(B);
    assert_eq!(*a_hits.lock().unwrap(), 1, "onA fires for a B instance");
    assert_eq!(*b_hits.lock().unwrap(), 1, "onB fires for a B instance");

    bus.post(A);
    assert_eq!(*a_hits.lock().unwrap(), 2, "onA fires again for a plain A");
    assert_eq!(*b_hits.lock().unwrap(), 1, "onB does not fire for a plain A");
}

#[derive(Debug)]
struct X;

impl Event for X {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct Y;

impl Event for Y {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[test]
fn per_thread_dispatcher_delivers_reentrant_post_after_the_outer_event_finishes() {
    let bus = EventBus::new("test");
    let order = Arc::new(Mutex::new(Vec::new()));

    let x_listener = Arc::new(Counter);
    {
        let order = order.clone();
        let bus_for_repost = bus.clone();
        bus.listener(x_listener)
            .on::<X, _>(move |_: &X| {
                order.lock().unwrap().push("X-subscriber-1");
                bus_for_repost.post(Y);
            })
            .register();
    }

    let x2_listener = Arc::new(Counter);
    {
        let order = order.clone();
        bus.listener(x2_listener)
            .on::<X, _>(move |_: &X| order.lock().unwrap().push("X-subscriber-2"))
            .register();
    }

    let y_listener = Arc::new(Counter);
    {
        let order = order.clone();
        bus.listener(y_listener).on::<Y, _>(move |_: &Y| order.lock().unwrap().push("Y-subscriber")).register();
    }

    bus.post(X);

    let order = order.lock().unwrap().clone();
    assert_eq!(order, vec!["X-subscriber-1", "X-subscriber-2", "Y-subscriber"]);
}

#[test]
fn subscriber_failure_is_forwarded_and_does_not_fail_the_post() {
    let bus = EventBus::new("test");
    let other_ran = Arc::new(Mutex::new(false));
    let sink = other_ran.clone();

    let panicking = Arc::new(Counter);
    bus.listener(panicking).on::<Ping, _>(|_: &Ping| panic!("boom")).register();

    let well_behaved = Arc::new(Counter);
    bus.listener(well_behaved).on::<Ping, _>(move |_: &Ping| *sink.lock().unwrap() = true).register();

    bus.post(Ping);
    assert!(*other_ran.lock().unwrap(), "a panicking subscriber must not stop other subscribers from running");
}
