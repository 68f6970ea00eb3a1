//! The three dispatch strategies (spec.md §4.6).

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

use super::subscriber::Subscriber;
use super::{Event, EventBus};

/// Hands a posted event's matched subscribers off for delivery.
///
/// Implementations own all dispatch-time ordering discipline; the bus
/// itself holds no lock around `post` (spec.md §4.7).
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, event: Arc<dyn Event>, subscribers: Vec<Arc<Subscriber>>, bus: &Arc<EventBus>);
}

thread_local! {
    static QUEUE: RefCell<VecDeque<(Arc<dyn Event>, Vec<Arc<Subscriber>>)>> = RefCell::new(VecDeque::new());
    static DISPATCHING: Cell<bool> = const { Cell::new(false) };
}

/// Default dispatcher for the synchronous bus.
///
/// Each posting thread owns a FIFO queue and a re-entrancy flag. A
/// re-entrant `post` from inside a subscriber enqueues its event and
/// returns immediately — the outer dispatch loop picks it up — guaranteeing
/// that if subscriber S of event A posts event B, every subscriber of A
/// finishes seeing A before any subscriber of B sees B (spec.md §4.6, §5,
/// §8.3). Ordering between threads is unspecified.
#[derive(Debug, Default)]
pub struct PerThreadQueuedDispatcher;

impl Dispatcher for PerThreadQueuedDispatcher {
    fn dispatch(&self, event: Arc<dyn Event>, subscribers: Vec<Arc<Subscriber>>, bus: &Arc<EventBus>) {
        QUEUE.with(|q| q.borrow_mut().push_back((event, subscribers)));

        if DISPATCHING.with(Cell::get) {
            // Re-entrant post: the outer loop on this thread owns draining.
            return;
        }
        DISPATCHING.with(|d| d.set(true));

        loop {
            let next = QUEUE.with(|q| q.borrow_mut().pop_front());
            let Some((event, subscribers)) = next else {
                break;
            };
            for subscriber in &subscribers {
                subscriber.dispatch_event(event.clone(), bus.clone());
            }
        }

        DISPATCHING.with(|d| d.set(false));
    }
}

/// Default dispatcher for the asynchronous bus.
///
/// A single queue shared by every posting thread; each `dispatch` call
/// appends `(event, subscriber)` pairs for every matched subscriber, then
/// drains the *entire* shared queue on the calling thread, submitting each
/// pair to its subscriber's executor. Draining on the posting thread means a
/// slow executor submission can block other posters — flagged "legacy" and
/// intentionally not redesigned (spec.md §9).
///
/// The system this was extracted from backs this queue with a lock-free
/// MPMC queue; this crate's dependency stack has no such crate, so a
/// `std::sync::Mutex`-guarded `VecDeque` stands in — observationally
/// identical (FIFO, drained-by-one-thread-at-a-time) but not lock-free.
#[derive(Default)]
pub struct LegacyAsyncDispatcher {
    queue: StdMutex<VecDeque<(Arc<dyn Event>, Arc<Subscriber>)>>,
}

impl std::fmt::Debug for LegacyAsyncDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self
            .queue
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .len();
        f.debug_struct("LegacyAsyncDispatcher")
            .field("queue_len", &len)
            .finish()
    }
}

impl Dispatcher for LegacyAsyncDispatcher {
    fn dispatch(&self, event: Arc<dyn Event>, subscribers: Vec<Arc<Subscriber>>, bus: &Arc<EventBus>) {
        {
            let mut queue = self.queue.lock().unwrap_or_else(|poison| poison.into_inner());
            for subscriber in subscribers {
                queue.push_back((event.clone(), subscriber));
            }
        }

        loop {
            let next = {
                let mut queue = self.queue.lock().unwrap_or_else(|poison| poison.into_inner());
                queue.pop_front()
            };
            let Some((event, subscriber)) = next else {
                break;
            };
            subscriber.dispatch_event(event, bus.clone());
        }
    }
}

/// Invokes every matched subscriber inline, in iterator order, with no
/// queuing. A re-entrant post from inside a subscriber nests its delivery
/// inside the current one (unlike [`PerThreadQueuedDispatcher`]).
#[derive(Debug, Default)]
pub struct ImmediateDispatcher;

impl Dispatcher for ImmediateDispatcher {
    fn dispatch(&self, event: Arc<dyn Event>, subscribers: Vec<Arc<Subscriber>>, bus: &Arc<EventBus>) {
        for subscriber in &subscribers {
            subscriber.dispatch_event(event.clone(), bus.clone());
        }
    }
}
