//! A bound `(listener, handler, executor)` tuple (spec.md §4.5).
//!
//! This crate has no reflection (spec.md §9's "Reflective invocation of
//! subscribers" fallback), so a `Subscriber` is not discovered from a
//! `@Subscribe`-annotated method; it is created directly by
//! [`super::ListenerBuilder::on`]/`on_concurrent`, one per registered
//! closure. "Method identity" — used for equality and for re-finding the
//! same subscriber set on `unregister` — is the `(listener identity,
//! registration-order index)` pair instead of `(name, parameter types)`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::Mutex;

use super::events::{render_panic_payload, SubscriberFailure};
use super::executor::Executor;
use super::Event;
use super::EventBus;

pub(crate) type HandlerFn = dyn Fn(&dyn Any) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync;

/// Stable identity of the object a set of handlers was registered against.
/// Two subscribers are equal iff they share this AND `handler_index`
/// (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) usize);

impl ListenerId {
    pub(crate) fn of<L: ?Sized>(listener: &Arc<L>) -> Self {
        ListenerId(Arc::as_ptr(listener) as *const () as usize)
    }
}

pub struct Subscriber {
    pub(crate) listener_id: ListenerId,
    pub(crate) listener_type_name: &'static str,
    pub(crate) handler_index: usize,
    pub(crate) event_type_name: &'static str,
    pub(crate) call: Box<HandlerFn>,
    pub(crate) allow_concurrent: bool,
    pub(crate) call_lock: Mutex<()>,
    pub(crate) executor: Arc<dyn Executor>,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("listener_type_name", &self.listener_type_name)
            .field("handler_index", &self.handler_index)
            .field("event_type_name", &self.event_type_name)
            .field("allow_concurrent", &self.allow_concurrent)
            .finish()
    }
}

impl Subscriber {
    pub(crate) fn key(&self) -> (ListenerId, usize) {
        (self.listener_id, self.handler_index)
    }

    pub(crate) fn eq_identity(&self, other: &Subscriber) -> bool {
        self.key() == other.key()
    }

    /// Submit this subscriber's invocation of `event` to its executor.
    /// Unmarked subscribers serialize on `call_lock`; marked ("allow
    /// concurrent events") subscribers take no lock (spec.md §4.5).
    pub(crate) fn dispatch_event(self: &Arc<Self>, event: Arc<dyn Event>, bus: Arc<EventBus>) {
        let subscriber = self.clone();
        let executor = subscriber.executor.clone();
        executor.execute(Box::new(move || {
            let _serialize = if subscriber.allow_concurrent {
                None
            } else {
                Some(subscriber.call_lock.lock())
            };

            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| (subscriber.call)(event.as_any())));

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    bus.handle_subscriber_failure(SubscriberFailure::Returned(err), &subscriber, event.as_ref());
                }
                Err(panic_payload) => {
                    let rendered = render_panic_payload(panic_payload);
                    bus.handle_subscriber_failure(SubscriberFailure::Panicked(rendered), &subscriber, event.as_ref());
                }
            }
        }));
    }
}
