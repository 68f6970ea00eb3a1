//! A validated-configuration cache surface (spec.md §4.8, §1, §6).
//!
//! `CacheBuilder` is the contractual piece this crate commits to: eager,
//! typed validation of every option, mirroring how Guava's own builder
//! rejects bad combinations at `build()` time rather than at first use.
//! `build()`/`build_with_loader()` return a small, correct, single-map cache
//! — linear eviction scan, a single striped lock, no segmented concurrent
//! hash table — standing in for the segmented engine this specification
//! does not describe (spec.md §1's "acknowledged but not implemented here
//! because the source file is not provided").

pub mod removal;
pub mod stats;
pub mod ticker;

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{Error, Result};
pub use removal::{RemovalCause, RemovalListener, RemovalNotification};
pub use stats::CacheStats;
use stats::StatsCounter;
pub use ticker::{SystemTicker, Ticker};

/// Assigns a weight to a key/value pair for `maximum_weight` eviction
/// (spec.md §4.8's `weigher`).
pub trait Weigher<K, V>: Send + Sync {
    fn weigh(&self, key: &K, value: &V) -> u32;
}

impl<K, V, F> Weigher<K, V> for F
where
    F: Fn(&K, &V) -> u32 + Send + Sync,
{
    fn weigh(&self, key: &K, value: &V) -> u32 {
        self(key, value)
    }
}

/// Computes a value for a missing key (spec.md §4.8's `build(loader)`).
pub trait Loader<K, V>: Send + Sync {
    fn load(&self, key: &K) -> std::result::Result<V, Box<dyn std::error::Error + Send + Sync>>;
}

impl<K, V, F> Loader<K, V> for F
where
    F: Fn(&K) -> std::result::Result<V, Box<dyn std::error::Error + Send + Sync>> + Send + Sync,
{
    fn load(&self, key: &K) -> std::result::Result<V, Box<dyn std::error::Error + Send + Sync>> {
        self(key)
    }
}

enum SizeLimit<K, V> {
    None,
    Count(u64),
    Weight { max: u64, weigher: Arc<dyn Weigher<K, V>> },
}

struct Options<K, V> {
    initial_capacity: usize,
    limit: SizeLimit<K, V>,
    expire_after_write: Option<Duration>,
    expire_after_access: Option<Duration>,
    #[allow(dead_code)] // recorded for API fidelity; see DESIGN.md's reference-strength note
    weak_keys: bool,
    #[allow(dead_code)]
    weak_values: bool,
    #[allow(dead_code)]
    soft_values: bool,
    removal_listener: Option<Arc<dyn RemovalListener<K, V>>>,
    ticker: Arc<dyn Ticker>,
}

/// Builds a [`Cache`] or [`LoadingCache`], validating every option eagerly
/// and rejecting a duplicate or conflicting setter the moment it's called
/// (spec.md §4.8).
pub struct CacheBuilder<K, V> {
    initial_capacity: Option<u32>,
    concurrency_level: Option<u32>,
    max_size: Option<u64>,
    max_weight: Option<u64>,
    weigher: Option<Arc<dyn Weigher<K, V>>>,
    expire_after_write: Option<Duration>,
    expire_after_access: Option<Duration>,
    refresh_after_write: Option<Duration>,
    weak_keys: bool,
    weak_values: bool,
    soft_values: bool,
    removal_listener: Option<Arc<dyn RemovalListener<K, V>>>,
    ticker: Option<Arc<dyn Ticker>>,
    record_stats: bool,
}

impl<K, V> Default for CacheBuilder<K, V> {
    fn default() -> Self {
        Self {
            initial_capacity: None,
            concurrency_level: None,
            max_size: None,
            max_weight: None,
            weigher: None,
            expire_after_write: None,
            expire_after_access: None,
            refresh_after_write: None,
            weak_keys: false,
            weak_values: false,
            soft_values: false,
            removal_listener: None,
            ticker: None,
            record_stats: false,
        }
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_capacity(mut self, n: u32) -> Result<Self> {
        if self.initial_capacity.is_some() {
            return Err(Error::DuplicateOption("initialCapacity"));
        }
        self.initial_capacity = Some(n);
        Ok(self)
    }

    pub fn concurrency_level(mut self, n: u32) -> Result<Self> {
        if self.concurrency_level.is_some() {
            return Err(Error::DuplicateOption("concurrencyLevel"));
        }
        if n == 0 {
            return Err(Error::InvalidOption {
                option: "concurrencyLevel",
                constraint: "> 0",
                value: 0,
            });
        }
        self.concurrency_level = Some(n);
        Ok(self)
    }

    pub fn maximum_size(mut self, n: u64) -> Result<Self> {
        if self.max_size.is_some() {
            return Err(Error::DuplicateOption("maximumSize"));
        }
        if self.max_weight.is_some() {
            return Err(Error::InvalidOption {
                option: "maximumSize",
                constraint: "not combined with maximumWeight",
                value: n as i64,
            });
        }
        self.max_size = Some(n);
        Ok(self)
    }

    pub fn maximum_weight(mut self, n: u64) -> Result<Self> {
        if self.max_weight.is_some() {
            return Err(Error::DuplicateOption("maximumWeight"));
        }
        if self.max_size.is_some() {
            return Err(Error::InvalidOption {
                option: "maximumWeight",
                constraint: "not combined with maximumSize",
                value: n as i64,
            });
        }
        self.max_weight = Some(n);
        Ok(self)
    }

    pub fn weigher(mut self, weigher: impl Weigher<K, V> + 'static) -> Result<Self> {
        if self.weigher.is_some() {
            return Err(Error::DuplicateOption("weigher"));
        }
        self.weigher = Some(Arc::new(weigher));
        Ok(self)
    }

    pub fn expire_after_write(mut self, duration: Duration) -> Result<Self> {
        if self.expire_after_write.is_some() {
            return Err(Error::DuplicateOption("expireAfterWrite"));
        }
        self.expire_after_write = Some(duration);
        Ok(self)
    }

    pub fn expire_after_access(mut self, duration: Duration) -> Result<Self> {
        if self.expire_after_access.is_some() {
            return Err(Error::DuplicateOption("expireAfterAccess"));
        }
        self.expire_after_access = Some(duration);
        Ok(self)
    }

    pub fn refresh_after_write(mut self, duration: Duration) -> Result<Self> {
        if self.refresh_after_write.is_some() {
            return Err(Error::DuplicateOption("refreshAfterWrite"));
        }
        if duration.is_zero() {
            return Err(Error::InvalidOption {
                option: "refreshAfterWrite",
                constraint: "> 0",
                value: 0,
            });
        }
        self.refresh_after_write = Some(duration);
        Ok(self)
    }

    pub fn weak_keys(mut self) -> Result<Self> {
        if self.weak_keys {
            return Err(Error::DuplicateOption("weakKeys"));
        }
        self.weak_keys = true;
        Ok(self)
    }

    pub fn weak_values(mut self) -> Result<Self> {
        if self.weak_values {
            return Err(Error::DuplicateOption("weakValues"));
        }
        if self.soft_values {
            return Err(Error::InvalidOption {
                option: "weakValues",
                constraint: "not combined with softValues",
                value: 1,
            });
        }
        self.weak_values = true;
        Ok(self)
    }

    pub fn soft_values(mut self) -> Result<Self> {
        if self.soft_values {
            return Err(Error::DuplicateOption("softValues"));
        }
        if self.weak_values {
            return Err(Error::InvalidOption {
                option: "softValues",
                constraint: "not combined with weakValues",
                value: 1,
            });
        }
        self.soft_values = true;
        Ok(self)
    }

    pub fn removal_listener(mut self, listener: impl RemovalListener<K, V> + 'static) -> Result<Self> {
        if self.removal_listener.is_some() {
            return Err(Error::DuplicateOption("removalListener"));
        }
        self.removal_listener = Some(Arc::new(listener));
        Ok(self)
    }

    pub fn ticker(mut self, ticker: impl Ticker + 'static) -> Result<Self> {
        if self.ticker.is_some() {
            return Err(Error::DuplicateOption("ticker"));
        }
        self.ticker = Some(Arc::new(ticker));
        Ok(self)
    }

    pub fn record_stats(mut self) -> Result<Self> {
        if self.record_stats {
            return Err(Error::DuplicateOption("recordStats"));
        }
        self.record_stats = true;
        Ok(self)
    }

    fn into_options(self) -> Result<Options<K, V>> {
        if self.max_weight.is_some() && self.weigher.is_none() {
            return Err(Error::MissingRequiredOption("maximumWeight requires a weigher"));
        }
        if self.weigher.is_some() && self.max_weight.is_none() {
            return Err(Error::MissingRequiredOption("weigher requires maximumWeight"));
        }

        let limit = match (self.max_size, self.max_weight, self.weigher) {
            (Some(n), _, _) => SizeLimit::Count(n),
            (None, Some(max), Some(weigher)) => SizeLimit::Weight { max, weigher },
            (None, None, _) => SizeLimit::None,
            (None, Some(_), None) => unreachable!("validated above: maximumWeight requires a weigher"),
        };

        Ok(Options {
            initial_capacity: self.initial_capacity.unwrap_or(16) as usize,
            limit,
            expire_after_write: self.expire_after_write,
            expire_after_access: self.expire_after_access,
            weak_keys: self.weak_keys,
            weak_values: self.weak_values,
            soft_values: self.soft_values,
            removal_listener: self.removal_listener,
            ticker: self.ticker.unwrap_or_else(|| Arc::new(SystemTicker)),
        })
    }

    /// Build a manual cache. Fails if `refresh_after_write` was set — refresh
    /// requires a loader (spec.md §4.8).
    pub fn build(self) -> Result<Cache<K, V>> {
        if self.refresh_after_write.is_some() {
            return Err(Error::MissingRequiredOption("refreshAfterWrite requires build(loader)"));
        }
        let record_stats = self.record_stats;
        let options = self.into_options()?;
        Ok(Cache::new(options, record_stats))
    }

    /// Build a loading cache backed by `loader`.
    pub fn build_with_loader<L>(self, loader: L) -> Result<LoadingCache<K, V, L>>
    where
        L: Loader<K, V> + 'static,
    {
        let record_stats = self.record_stats;
        let refresh_after_write = self.refresh_after_write;
        let options = self.into_options()?;
        Ok(LoadingCache::new(options, record_stats, refresh_after_write, loader))
    }
}

struct Entry<V> {
    value: V,
    weight: u32,
    written_at_nanos: u64,
    last_accessed_nanos: u64,
}

struct State<K, V> {
    map: HashMap<K, Entry<V>>,
    /// Front = least recently used. Reshuffled on every access; fine for a
    /// "minimal functional backing", not for a hot path at scale.
    recency: VecDeque<K>,
    total_weight: u64,
}

fn touch_recency<K: Eq + Hash + Clone>(recency: &mut VecDeque<K>, key: &K) {
    if let Some(pos) = recency.iter().position(|k| k == key) {
        recency.remove(pos);
    }
    recency.push_back(key.clone());
}

/// A manual cache: callers decide what goes in via [`Cache::get_if_present`]
/// / [`Cache::put`]. See [`LoadingCache`] for the `get`-computes-on-miss
/// variant (spec.md §4.8's `build()` vs `build(loader)`).
pub struct Cache<K, V> {
    options: Options<K, V>,
    state: Mutex<State<K, V>>,
    stats: Option<StatsCounter>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn new(options: Options<K, V>, record_stats: bool) -> Self {
        let capacity = options.initial_capacity;
        Self {
            options,
            state: Mutex::new(State {
                map: HashMap::with_capacity(capacity),
                recency: VecDeque::with_capacity(capacity),
                total_weight: 0,
            }),
            stats: record_stats.then(StatsCounter::default),
        }
    }

    pub fn get_if_present(&self, key: &K) -> Option<V> {
        let now = self.options.ticker.read_nanos();
        let mut state = self.state.lock();
        if self.expire_one(&mut state, key, now) {
            if let Some(stats) = &self.stats {
                stats.record_miss();
            }
            return None;
        }
        match state.map.get(key) {
            Some(entry) => {
                let value = entry.value.clone();
                touch_recency(&mut state.recency, key);
                if let Some(entry) = state.map.get_mut(key) {
                    entry.last_accessed_nanos = now;
                }
                if let Some(stats) = &self.stats {
                    stats.record_hit();
                }
                Some(value)
            }
            None => {
                if let Some(stats) = &self.stats {
                    stats.record_miss();
                }
                None
            }
        }
    }

    pub fn put(&self, key: K, value: V) {
        let now = self.options.ticker.read_nanos();
        let weight = self.weight_of(&key, &value);
        let mut state = self.state.lock();
        if let Some(previous) = state.map.remove(&key) {
            state.total_weight -= previous.weight as u64;
            self.notify(&key, previous.value, RemovalCause::Replaced);
        }
        state.total_weight += weight as u64;
        state.map.insert(
            key.clone(),
            Entry {
                value,
                weight,
                written_at_nanos: now,
                last_accessed_nanos: now,
            },
        );
        touch_recency(&mut state.recency, &key);
        self.evict_over_capacity(&mut state);
    }

    pub fn invalidate(&self, key: &K) {
        let mut state = self.state.lock();
        if let Some(entry) = state.map.remove(key) {
            state.total_weight -= entry.weight as u64;
            if let Some(pos) = state.recency.iter().position(|k| k == key) {
                state.recency.remove(pos);
            }
            self.notify(key, entry.value, RemovalCause::Explicit);
        }
    }

    pub fn invalidate_all(&self) {
        let mut state = self.state.lock();
        let removed: Vec<(K, V)> = state.map.drain().map(|(k, e)| (k, e.value)).collect();
        state.recency.clear();
        state.total_weight = 0;
        drop(state);
        for (key, value) in removed {
            self.notify(&key, value, RemovalCause::Explicit);
        }
    }

    pub fn size(&self) -> usize {
        self.state.lock().map.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.as_ref().map(StatsCounter::snapshot).unwrap_or_default()
    }

    fn weight_of(&self, key: &K, value: &V) -> u32 {
        match &self.options.limit {
            SizeLimit::Weight { weigher, .. } => weigher.weigh(key, value),
            _ => 1,
        }
    }

    /// Removes `key` if it's present and expired as of `now`. Returns
    /// whether it was.
    fn expire_one(&self, state: &mut State<K, V>, key: &K, now: u64) -> bool {
        let Some(entry) = state.map.get(key) else {
            return false;
        };
        let expired = self
            .options
            .expire_after_write
            .is_some_and(|ttl| now.saturating_sub(entry.written_at_nanos) >= ttl.as_nanos() as u64)
            || self
                .options
                .expire_after_access
                .is_some_and(|ttl| now.saturating_sub(entry.last_accessed_nanos) >= ttl.as_nanos() as u64);
        if !expired {
            return false;
        }
        let entry = state.map.remove(key).expect("checked present above");
        state.total_weight -= entry.weight as u64;
        if let Some(pos) = state.recency.iter().position(|k| k == key) {
            state.recency.remove(pos);
        }
        self.notify(key, entry.value, RemovalCause::Expired);
        true
    }

    fn evict_over_capacity(&self, state: &mut State<K, V>) {
        loop {
            let over = match &self.options.limit {
                SizeLimit::None => false,
                SizeLimit::Count(max) => state.map.len() as u64 > *max,
                SizeLimit::Weight { max, .. } => state.total_weight > *max,
            };
            if !over {
                break;
            }
            let Some(victim) = state.recency.pop_front() else {
                break;
            };
            if let Some(entry) = state.map.remove(&victim) {
                state.total_weight -= entry.weight as u64;
                if let Some(stats) = &self.stats {
                    stats.record_eviction();
                }
                self.notify(&victim, entry.value, RemovalCause::Size);
            }
        }
    }

    fn notify(&self, key: &K, value: V, cause: RemovalCause) {
        if let Some(listener) = &self.options.removal_listener {
            listener.on_removal(RemovalNotification {
                key: key.clone(),
                value,
                cause,
            });
        }
    }
}

/// A cache whose misses compute their own value via a [`Loader`] (spec.md
/// §4.8's `build(loader)`), with single-flight coalescing of concurrent
/// loads for the same key — the same "at-most-one-concurrent-load-per-key"
/// discipline spec.md §5 requires of the bus's hierarchy caches.
pub struct LoadingCache<K, V, L> {
    cache: Cache<K, V>,
    refresh_after_write: Option<Duration>,
    loader: L,
    in_flight: DashMap<K, Arc<Mutex<()>>>,
}

impl<K, V, L> LoadingCache<K, V, L>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    L: Loader<K, V>,
{
    fn new(options: Options<K, V>, record_stats: bool, refresh_after_write: Option<Duration>, loader: L) -> Self {
        Self {
            cache: Cache::new(options, record_stats),
            refresh_after_write,
            loader,
            in_flight: DashMap::new(),
        }
    }

    /// Returns the cached value, loading it via the loader on a miss.
    /// Concurrent misses for the same key share one load.
    pub fn get(&self, key: &K) -> std::result::Result<V, Box<dyn std::error::Error + Send + Sync>> {
        if let Some(value) = self.cache.get_if_present(key) {
            return Ok(value);
        }

        let flight_lock = self.in_flight.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone();
        let _guard = flight_lock.lock();

        if let Some(value) = self.cache.get_if_present(key) {
            return Ok(value);
        }

        let started = self.cache.options.ticker.read_nanos();
        let outcome = self.loader.load(key);
        let elapsed = self.cache.options.ticker.read_nanos().saturating_sub(started);

        match &outcome {
            Ok(value) => {
                if let Some(stats) = &self.cache.stats {
                    stats.record_load_success(elapsed);
                }
                self.cache.put(key.clone(), value.clone());
            }
            Err(_) => {
                if let Some(stats) = &self.cache.stats {
                    stats.record_load_exception(elapsed);
                }
            }
        }
        self.in_flight.remove(key);
        outcome
    }

    /// Force a reload of `key`, replacing whatever was cached for it.
    pub fn refresh(&self, key: &K) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let value = self.loader.load(key)?;
        self.cache.put(key.clone(), value);
        Ok(())
    }

    pub fn is_eligible_for_refresh(&self, key: &K, now_nanos: u64) -> bool {
        let Some(ttl) = self.refresh_after_write else {
            return false;
        };
        let state = self.cache.state.lock();
        state
            .map
            .get(key)
            .is_some_and(|entry| now_nanos.saturating_sub(entry.written_at_nanos) >= ttl.as_nanos() as u64)
    }

    pub fn get_if_present(&self, key: &K) -> Option<V> {
        self.cache.get_if_present(key)
    }

    pub fn invalidate(&self, key: &K) {
        self.cache.invalidate(key);
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn size(&self) -> usize {
        self.cache.size()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn duplicate_option_is_rejected() {
        let builder: CacheBuilder<String, u32> = CacheBuilder::new().maximum_size(10).unwrap();
        assert!(matches!(builder.maximum_size(20), Err(Error::DuplicateOption("maximumSize"))));
    }

    #[test]
    fn max_size_and_max_weight_are_mutually_exclusive() {
        let builder: CacheBuilder<String, u32> = CacheBuilder::new().maximum_size(10).unwrap();
        assert!(builder.maximum_weight(10).is_err());
    }

    #[test]
    fn weigher_without_max_weight_fails_at_build() {
        let builder: CacheBuilder<String, u32> = CacheBuilder::new().weigher(|_: &String, v: &u32| *v).unwrap();
        assert!(builder.build().is_err());
    }

    #[test]
    fn refresh_after_write_requires_a_loader() {
        let builder: CacheBuilder<String, u32> = CacheBuilder::new().refresh_after_write(Duration::from_secs(1)).unwrap();
        assert!(builder.build().is_err());
    }

    #[test]
    fn manual_cache_put_get_invalidate_round_trip() {
        let cache: Cache<&str, u32> = CacheBuilder::new().build().unwrap();
        cache.put("a", 1);
        assert_eq!(cache.get_if_present(&"a"), Some(1));
        cache.invalidate(&"a");
        assert_eq!(cache.get_if_present(&"a"), None);
    }

    #[test]
    fn maximum_size_evicts_least_recently_used() {
        let cache: Cache<i32, i32> = CacheBuilder::new().maximum_size(2).unwrap().build().unwrap();
        cache.put(1, 1);
        cache.put(2, 2);
        cache.get_if_present(&1); // 1 is now most-recently-used
        cache.put(3, 3); // evicts 2, the least recently used
        assert_eq!(cache.get_if_present(&1), Some(1));
        assert_eq!(cache.get_if_present(&2), None);
        assert_eq!(cache.get_if_present(&3), Some(3));
    }

    #[test]
    fn removal_listener_sees_every_cause() {
        let causes = Arc::new(Mutex::new(Vec::new()));
        let sink = causes.clone();
        let cache: Cache<i32, i32> = CacheBuilder::new()
            .maximum_size(1)
            .unwrap()
            .removal_listener(move |n: RemovalNotification<i32, i32>| sink.lock().push(n.cause))
            .unwrap()
            .build()
            .unwrap();
        cache.put(1, 1);
        cache.put(1, 2); // Replaced
        cache.put(2, 2); // evicts key 1 for Size
        cache.invalidate(&2); // Explicit
        assert_eq!(*causes.lock(), vec![RemovalCause::Replaced, RemovalCause::Size, RemovalCause::Explicit]);
    }

    #[test]
    fn loading_cache_loads_once_per_key() {
        let load_count = Arc::new(AtomicU32::new(0));
        let counter = load_count.clone();
        let cache: LoadingCache<i32, i32, _> = CacheBuilder::new()
            .build_with_loader(move |key: &i32| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(key * 10)
            })
            .unwrap();

        assert_eq!(cache.get(&4).unwrap(), 40);
        assert_eq!(cache.get(&4).unwrap(), 40);
        assert_eq!(load_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let cache: Cache<i32, i32> = CacheBuilder::new().record_stats().unwrap().build().unwrap();
        cache.get_if_present(&1);
        cache.put(1, 1);
        cache.get_if_present(&1);
        let stats = cache.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
    }
}
