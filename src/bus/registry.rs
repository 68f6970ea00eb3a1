//! Type-indexed subscriber store plus the two process-wide caches
//! (spec.md §3, §4.4).
//!
//! Grounded in `nowhere-actors::Registry`
//! (`examples/viewfromnowhere-view-from-nowhere/nowhere-actors/src/registry.rs`),
//! which already indexes `Box<dyn Any + Send + Sync>` by `TypeId` in a
//! `DashMap` for exactly this "type-indexed, no-external-lock" shape.
//!
//! Rust has no class unloading, so both caches here are permanent maps keyed
//! by `TypeId` rather than Guava's weak-keyed `MapMaker` caches — the
//! fallback spec.md §9 explicitly sanctions. `DashMap`'s per-shard locking
//! gives the "at-most-one-concurrent-load-per-key" guarantee the spec asks
//! for via its `entry` API.

use std::any::TypeId;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use super::subscriber::{ListenerId, Subscriber};
use super::Event;
use crate::error::{Error, Result};

/// A copy-on-write, insertion-ordered set of subscribers for one declared
/// event type.
///
/// Reads take a snapshot `Arc` under a read lock and release it immediately;
/// iteration over that snapshot is entirely lock-free, so it tolerates
/// concurrent insert/remove without throwing and without missing anything
/// that was present for its whole duration (spec.md §4.4's "weakly
/// consistent" requirement).
#[derive(Default)]
struct CowSet {
    inner: RwLock<Arc<Vec<Arc<Subscriber>>>>,
}

impl CowSet {
    fn snapshot(&self) -> Arc<Vec<Arc<Subscriber>>> {
        self.inner.read().clone()
    }

    fn insert(&self, subscriber: Arc<Subscriber>) {
        let mut guard = self.inner.write();
        if guard.iter().any(|s| s.eq_identity(&subscriber)) {
            return;
        }
        let mut next = (**guard).clone();
        next.push(subscriber);
        *guard = Arc::new(next);
    }

    /// Returns `true` if a matching subscriber was found and removed.
    fn remove(&self, key: (ListenerId, usize)) -> bool {
        let mut guard = self.inner.write();
        match guard.iter().position(|s| s.key() == key) {
            Some(pos) => {
                let mut next = (**guard).clone();
                next.remove(pos);
                *guard = Arc::new(next);
                true
            }
            None => false,
        }
    }
}

/// A handle identifying exactly the subscribers created by one
/// [`super::ListenerBuilder::register`] call, so `unregister` can re-find
/// and remove precisely that set.
#[derive(Debug, Clone)]
pub struct Registration {
    pub(crate) entries: Vec<(TypeId, ListenerId, usize)>,
}

#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    by_type: DashMap<TypeId, CowSet>,
    hierarchy_cache: DashMap<TypeId, Arc<Vec<TypeId>>>,
}

impl SubscriberRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert every `(event_type, subscriber)` pair as one atomic-per-entry
    /// batch (each entry's insertion into its `CowSet` is itself atomic
    /// under that set's lock; concurrent registers of unrelated types never
    /// contend with each other — spec.md §4.4).
    pub(crate) fn register(&self, subscribers: Vec<(TypeId, Arc<Subscriber>)>) -> Registration {
        let mut entries = Vec::with_capacity(subscribers.len());
        for (type_id, subscriber) in subscribers {
            let key = subscriber.key();
            self.by_type.entry(type_id).or_default().insert(subscriber);
            entries.push((type_id, key.0, key.1));
        }
        Registration { entries }
    }

    /// Remove exactly the subscribers named by `registration`. Absent
    /// entries are not rolled back into place — whatever was removed stays
    /// removed — but the call still reports failure if anything was missing
    /// (spec.md §4.4, §7).
    pub(crate) fn unregister(&self, registration: &Registration) -> Result<()> {
        let mut all_present = true;
        for &(type_id, listener_id, handler_index) in &registration.entries {
            let removed = match self.by_type.get(&type_id) {
                Some(set) => set.remove((listener_id, handler_index)),
                None => false,
            };
            all_present &= removed;
        }
        if all_present {
            Ok(())
        } else {
            Err(Error::NotRegistered)
        }
    }

    /// The flattened hierarchy (self plus declared supertypes) of `event`'s
    /// runtime type, computed once per concrete type and cached thereafter.
    pub(crate) fn hierarchy_of(&self, event: &dyn Event) -> Arc<Vec<TypeId>> {
        let concrete = event.as_any().type_id();
        self.hierarchy_cache
            .entry(concrete)
            .or_insert_with(|| Arc::new(event.type_hierarchy()))
            .clone()
    }

    /// All subscribers registered against any type in `hierarchy`, in an
    /// unspecified-but-stable cross-type order (spec.md §4.4).
    pub(crate) fn subscribers_for(&self, hierarchy: &[TypeId]) -> Vec<Arc<Subscriber>> {
        let mut out = Vec::new();
        for type_id in hierarchy {
            if let Some(set) = self.by_type.get(type_id) {
                out.extend(set.snapshot().iter().cloned());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::executor::InlineExecutor;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dummy_subscriber(listener_id: ListenerId, handler_index: usize) -> Arc<Subscriber> {
        Arc::new(Subscriber {
            listener_id,
            listener_type_name: "test::Listener",
            handler_index,
            event_type_name: "test::EventA",
            call: Box::new(|_| Ok(())),
            allow_concurrent: false,
            call_lock: PlMutex::new(()),
            executor: Arc::new(InlineExecutor),
        })
    }

    #[test]
    fn concurrent_iteration_never_sees_a_subscriber_removed_twice_or_panics() {
        let registry = Arc::new(SubscriberRegistry::new());
        let type_id = TypeId::of::<u8>();

        let mut regs = vec![];
        for i in 0..8 {
            let sub = dummy_subscriber(ListenerId(0x1000 + i), i);
            regs.push(registry.register(vec![(type_id, sub)]));
        }

        let seen = Arc::new(AtomicUsize::new(0));
        let r = registry.clone();
        let seen_reader = seen.clone();
        let reader = std::thread::spawn(move || {
            for _ in 0..500 {
                let snap = r.subscribers_for(&[type_id]);
                seen_reader.fetch_add(snap.len(), Ordering::Relaxed);
            }
        });

        let unreg = registry.clone();
        let unregister_one = regs.pop().unwrap();
        let writer = std::thread::spawn(move || {
            unreg.unregister(&unregister_one).unwrap();
        });

        reader.join().unwrap();
        writer.join().unwrap();

        let remaining = registry.subscribers_for(&[type_id]);
        assert_eq!(remaining.len(), 7);
    }

    #[test]
    fn unregister_of_unknown_listener_fails_without_touching_others() {
        let registry = SubscriberRegistry::new();
        let type_id = TypeId::of::<u8>();
        let sub = dummy_subscriber(ListenerId(0xbeef), 0);
        let registered = registry.register(vec![(type_id, sub)]);

        let bogus = Registration {
            entries: vec![(type_id, ListenerId(0xdead), 0)],
        };
        assert!(registry.unregister(&bogus).is_err());
        assert_eq!(registry.subscribers_for(&[type_id]).len(), 1);

        registry.unregister(&registered).unwrap();
        assert_eq!(registry.subscribers_for(&[type_id]).len(), 0);
    }
}
