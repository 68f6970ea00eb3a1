//! A publish/subscribe event bus with pluggable dispatch and a
//! type-hierarchy-aware subscriber registry (spec.md §4.4-§4.7).
//!
//! Rust has no runtime class hierarchy to walk, so [`Event::type_hierarchy`]
//! makes the hierarchy explicit instead of discovered: an event type
//! declares which other types it should also be delivered to subscribers of.
//! Subscriber discovery is similarly explicit — there is no
//! `@Subscribe`-annotation scan; callers build a [`ListenerBuilder`] and name
//! each `(event type, handler closure)` pair directly (spec.md §9's own
//! fallback for hosts without pervasive reflection).

pub mod dispatch;
pub mod events;
pub mod executor;
pub mod registry;
pub mod subscriber;

use std::any::{Any, TypeId};
use std::sync::Arc;

use parking_lot::Mutex;

pub use dispatch::{Dispatcher, ImmediateDispatcher, LegacyAsyncDispatcher, PerThreadQueuedDispatcher};
pub use events::{DeadEvent, ExceptionContext, SubscriberFailure};
pub use executor::{Executor, InlineExecutor, ThreadExecutor, TokioExecutor};
pub use registry::Registration;

use executor::default_executor;
use registry::SubscriberRegistry;
use subscriber::{ListenerId, Subscriber};

/// Anything that can be posted to an [`EventBus`].
///
/// Implementors declare their own supertype list via [`Event::type_hierarchy`]
/// (self's `TypeId` first); the default is "no declared supertypes".
pub trait Event: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    /// Self's `TypeId` plus every type a subscriber might also want to
    /// receive this event as. Cached per concrete type by
    /// [`registry::SubscriberRegistry::hierarchy_of`].
    fn type_hierarchy(&self) -> Vec<TypeId> {
        vec![self.as_any().type_id()]
    }
}

/// Invoked after any subscriber call raises — by returning `Err` or by
/// panicking (spec.md §6, §7).
pub trait SubscriberExceptionHandler: Send + Sync {
    fn handle_exception(&self, failure: &SubscriberFailure, context: &ExceptionContext);
}

/// Logs at error level and swallows the result — Guava's `EventBus` default
/// (`LoggingHandler`), and the only sane default for a handler whose own
/// failures must never propagate (spec.md §4.5, §7).
#[derive(Debug, Default)]
pub struct LoggingExceptionHandler;

impl SubscriberExceptionHandler for LoggingExceptionHandler {
    fn handle_exception(&self, failure: &SubscriberFailure, context: &ExceptionContext) {
        tracing::error!(
            bus = %context.bus_name,
            event_type = context.event_type_name,
            listener_type = context.listener_type_name,
            handler_index = context.handler_index,
            %failure,
            "event bus subscriber failed"
        );
    }
}

/// A publish/subscribe event bus.
///
/// `post` performs no locking of its own — concurrency is delegated to the
/// registry's weakly-consistent iteration and the chosen [`Dispatcher`]'s
/// discipline (spec.md §4.7).
pub struct EventBus {
    name: String,
    registry: SubscriberRegistry,
    dispatcher: Box<dyn Dispatcher>,
    exception_handler: Mutex<Arc<dyn SubscriberExceptionHandler>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").field("name", &self.name).finish()
    }
}

impl EventBus {
    /// A synchronous bus: per-thread queued dispatch, inline executor by
    /// default for each subscriber (spec.md §4.6's default for the
    /// synchronous bus).
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        EventBusBuilder::new(name).build()
    }

    /// An unnamed synchronous bus, for callers that don't care to
    /// distinguish buses in logs.
    pub fn new_unnamed() -> Arc<Self> {
        Self::new("default")
    }

    /// An asynchronous bus: legacy-async dispatch (spec.md §4.6's default
    /// for the asynchronous bus).
    pub fn new_async(name: impl Into<String>) -> Arc<Self> {
        EventBusBuilder::new(name)
            .dispatcher(Box::<LegacyAsyncDispatcher>::default())
            .build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start registering one or more handlers for `listener`. Nothing is
    /// installed until [`ListenerBuilder::register`] is called.
    pub fn listener<L: Send + Sync + 'static>(self: &Arc<Self>, listener: Arc<L>) -> ListenerBuilder<L> {
        ListenerBuilder {
            bus: self.clone(),
            listener,
            pending: Vec::new(),
        }
    }

    /// Remove exactly the subscribers named by `registration`.
    ///
    /// Fails with [`crate::Error::NotRegistered`] if any of them were
    /// already removed; whatever *was* still present is removed anyway — a
    /// partial removal is never rolled back (spec.md §4.4, §7).
    pub fn unregister(&self, registration: &Registration) -> crate::error::Result<()> {
        self.registry.unregister(registration)
    }

    /// Post `event`. Delivers to every subscriber whose declared event type
    /// is in `event`'s flattened hierarchy, via the bus's dispatcher. If
    /// nothing matched and `event` is not itself a [`DeadEvent`], wraps it
    /// in one and posts that instead (spec.md §4.7).
    pub fn post<E: Event>(self: &Arc<Self>, event: E) {
        self.post_dyn(Arc::new(event));
    }

    fn post_dyn(self: &Arc<Self>, event: Arc<dyn Event>) {
        let hierarchy = self.registry.hierarchy_of(event.as_ref());
        let subscribers = self.registry.subscribers_for(&hierarchy);

        if !subscribers.is_empty() {
            self.dispatcher.dispatch(event, subscribers, self);
            return;
        }

        if event.as_any().downcast_ref::<DeadEvent>().is_some() {
            tracing::trace!(bus = %self.name, "dead event had no subscribers; not recursing");
            return;
        }

        tracing::debug!(bus = %self.name, "no subscribers matched; posting DeadEvent");
        self.post_dyn(Arc::new(DeadEvent {
            source_bus: self.name.clone(),
            wrapped: event,
        }));
    }

    pub(crate) fn handle_subscriber_failure(&self, failure: SubscriberFailure, subscriber: &Subscriber, event: &dyn Event) {
        let context = ExceptionContext::new(&self.name, subscriber.event_type_name, subscriber);
        let handler = self.exception_handler.lock().clone();
        let _ = event; // context already captures everything the handler needs
        // A panic here must never propagate back into the dispatch path —
        // logged at severe level and discarded (spec.md §4.5, §7).
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            handler.handle_exception(&failure, &context);
        }));
        if outcome.is_err() {
            tracing::error!(bus = %self.name, "exception handler itself panicked; discarding");
        }
    }

    /// Replace the exception handler used for subsequently-dispatched
    /// failures.
    pub fn set_exception_handler(&self, handler: Arc<dyn SubscriberExceptionHandler>) {
        *self.exception_handler.lock() = handler;
    }
}

/// Configures an [`EventBus`] before it's built (spec.md §4.6's "selected at
/// bus construction").
pub struct EventBusBuilder {
    name: String,
    dispatcher: Box<dyn Dispatcher>,
    exception_handler: Arc<dyn SubscriberExceptionHandler>,
}

impl EventBusBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dispatcher: Box::<PerThreadQueuedDispatcher>::default(),
            exception_handler: Arc::new(LoggingExceptionHandler),
        }
    }

    pub fn dispatcher(mut self, dispatcher: Box<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn exception_handler(mut self, handler: Arc<dyn SubscriberExceptionHandler>) -> Self {
        self.exception_handler = handler;
        self
    }

    pub fn build(self) -> Arc<EventBus> {
        Arc::new(EventBus {
            name: self.name,
            registry: SubscriberRegistry::new(),
            dispatcher: self.dispatcher,
            exception_handler: Mutex::new(self.exception_handler),
        })
    }
}

struct PendingHandler {
    type_id: TypeId,
    event_type_name: &'static str,
    allow_concurrent: bool,
    call: Box<subscriber::HandlerFn>,
}

/// Accumulates `(event type, handler)` pairs for one listener before
/// installing them into the bus's registry in a single [`register`][Self::register]
/// call — the closest analogue this crate has to Guava's "discover all
/// subscriber methods of a type" (spec.md §4.4), since there is no
/// reflection to discover them with.
pub struct ListenerBuilder<L> {
    bus: Arc<EventBus>,
    listener: Arc<L>,
    pending: Vec<PendingHandler>,
}

impl<L: Send + Sync + 'static> ListenerBuilder<L> {
    /// Register a handler for `E`. Concurrent dispatches of this handler are
    /// serialized against each other (spec.md §4.5's "unmarked" default).
    pub fn on<E, F>(self, handler: F) -> Self
    where
        E: Event + 'static,
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.on_fallible::<E, _>(move |event| {
            handler(event);
            Ok(())
        })
    }

    /// As [`ListenerBuilder::on`], but the handler may report a business
    /// failure, which is forwarded to the bus's exception handler instead of
    /// failing the post (spec.md §4.5, §7).
    pub fn on_fallible<E, F>(mut self, handler: F) -> Self
    where
        E: Event + 'static,
        F: Fn(&E) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync + 'static,
    {
        self.pending.push(PendingHandler {
            type_id: TypeId::of::<E>(),
            event_type_name: std::any::type_name::<E>(),
            allow_concurrent: false,
            call: wrap_handler(handler),
        });
        self
    }

    /// As [`ListenerBuilder::on`], but marks the handler "allow concurrent
    /// events": dispatches may run in parallel with each other without
    /// coordination (spec.md §4.5's "marked" case).
    pub fn on_concurrent<E, F>(mut self, handler: F) -> Self
    where
        E: Event + 'static,
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.pending.push(PendingHandler {
            type_id: TypeId::of::<E>(),
            event_type_name: std::any::type_name::<E>(),
            allow_concurrent: true,
            call: wrap_handler(move |event: &E| {
                handler(event);
                Ok(())
            }),
        });
        self
    }

    /// Install every pending handler into the bus's registry, bound to
    /// `executor` (defaults to [`InlineExecutor`] via [`Self::register`]).
    pub fn register_with_executor(self, executor: Arc<dyn Executor>) -> Registration {
        let listener_id = ListenerId::of(&self.listener);
        let listener_type_name = std::any::type_name::<L>();
        let _keep_alive = self.listener; // identity anchor; dropped with the bus's last subscriber reference is fine, the Arc is cloned below

        let mut entries = Vec::with_capacity(self.pending.len());
        for (index, pending) in self.pending.into_iter().enumerate() {
            let subscriber = Arc::new(Subscriber {
                listener_id,
                listener_type_name,
                handler_index: index,
                event_type_name: pending.event_type_name,
                call: pending.call,
                allow_concurrent: pending.allow_concurrent,
                call_lock: Mutex::new(()),
                executor: executor.clone(),
            });
            entries.push((pending.type_id, subscriber));
        }
        self.bus.registry.register(entries)
    }

    /// Install every pending handler, using [`InlineExecutor`] (handlers run
    /// synchronously, on the posting/dispatching thread).
    pub fn register(self) -> Registration {
        self.register_with_executor(default_executor())
    }
}

fn wrap_handler<E, F>(handler: F) -> Box<subscriber::HandlerFn>
where
    E: Event + 'static,
    F: Fn(&E) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync + 'static,
{
    Box::new(move |event: &dyn Any| {
        let typed = event
            .downcast_ref::<E>()
            .expect("subscriber registry only delivers events matching their declared type");
        handler(typed)
    })
}
