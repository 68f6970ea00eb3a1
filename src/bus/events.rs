//! Value types created on demand per post and never stored (spec.md §3).

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::subscriber::Subscriber;
use super::Event;

/// Wraps a posted event that matched no subscriber, so that a listener
/// interested in misses can observe them (spec.md §4.7, §8.2).
///
/// Posting a `DeadEvent` that itself matches no subscriber does not recurse
/// — the bus checks for this type specifically before wrapping.
pub struct DeadEvent {
    /// The [`EventBus::name`][super::EventBus::name] that produced this.
    pub source_bus: String,
    /// The original event that had no subscribers.
    pub wrapped: Arc<dyn Event>,
}

impl fmt::Debug for DeadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadEvent")
            .field("source_bus", &self.source_bus)
            .field("wrapped_type", &self.wrapped.as_any().type_id())
            .finish()
    }
}

impl Event for DeadEvent {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// What a subscriber raised, captured so the exception handler can log it
/// without needing to know the event or handler's concrete types.
pub enum SubscriberFailure {
    /// The handler returned `Err(..)`.
    Returned(Box<dyn std::error::Error + Send + Sync>),
    /// The handler panicked; this is the panic payload rendered to a string
    /// where possible (`&str`/`String` payloads — the common case for
    /// `panic!("...")`), or a fixed message otherwise.
    Panicked(String),
}

impl fmt::Debug for SubscriberFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriberFailure::Returned(e) => write!(f, "Returned({e})"),
            SubscriberFailure::Panicked(msg) => write!(f, "Panicked({msg})"),
        }
    }
}

impl fmt::Display for SubscriberFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriberFailure::Returned(e) => write!(f, "subscriber returned an error: {e}"),
            SubscriberFailure::Panicked(msg) => write!(f, "subscriber panicked: {msg}"),
        }
    }
}

/// Context captured alongside a [`SubscriberFailure`]: `(bus, event, listener,
/// method)` per spec.md §4.5, generalized since this crate has no reflection
/// — `listener_type_name`/`handler_index` stand in for "listener object" and
/// "method".
#[derive(Debug, Clone)]
pub struct ExceptionContext {
    pub bus_name: String,
    pub event_type_name: &'static str,
    pub listener_type_name: &'static str,
    pub handler_index: usize,
}

impl ExceptionContext {
    pub(crate) fn new(bus_name: &str, event_type_name: &'static str, subscriber: &Subscriber) -> Self {
        ExceptionContext {
            bus_name: bus_name.to_string(),
            event_type_name,
            listener_type_name: subscriber.listener_type_name,
            handler_index: subscriber.handler_index,
        }
    }
}

pub(crate) fn render_panic_payload(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
