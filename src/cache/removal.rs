//! Removal notifications (spec.md §4.8's `removalListener(l)` row).

/// Why an entry left the cache. Matches Guava's five causes verbatim (spec.md
/// §3's supplemented enumeration — see SPEC_FULL.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Removed by an explicit `invalidate`/`invalidate_all` call.
    Explicit,
    /// Overwritten by a `put` of the same key.
    Replaced,
    /// Collected by the host runtime's garbage collector. This crate has no
    /// weak/soft references (`weak_values`/`soft_values` are recorded as
    /// configuration only — see DESIGN.md), so this cause is never produced
    /// here; it exists so a removal listener written against the full
    /// Guava-shaped enum still compiles and matches exhaustively.
    Collected,
    /// Evicted by `expire_after_write`/`expire_after_access`.
    Expired,
    /// Evicted to honor `maximum_size`/`maximum_weight`.
    Size,
}

impl RemovalCause {
    /// `true` for every cause except an explicit caller-initiated removal or
    /// an overwrite — i.e. the entry left involuntarily.
    pub fn was_evicted(self) -> bool {
        !matches!(self, RemovalCause::Explicit | RemovalCause::Replaced)
    }
}

/// Delivered to a [`RemovalListener`] once per entry that leaves the cache.
#[derive(Debug, Clone)]
pub struct RemovalNotification<K, V> {
    pub key: K,
    pub value: V,
    pub cause: RemovalCause,
}

/// Callback invoked synchronously, inline with the operation that triggered
/// the removal (Guava's default `RemovalListener` dispatch mode; there is no
/// `removalListener` on its own executor here).
pub trait RemovalListener<K, V>: Send + Sync {
    fn on_removal(&self, notification: RemovalNotification<K, V>);
}

impl<K, V, F> RemovalListener<K, V> for F
where
    F: Fn(RemovalNotification<K, V>) + Send + Sync,
{
    fn on_removal(&self, notification: RemovalNotification<K, V>) {
        self(notification)
    }
}
