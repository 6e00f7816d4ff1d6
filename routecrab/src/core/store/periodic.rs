use super::Store;
use std::collections::hash_map::Entry;
use std::time::{Duration, SystemTime};

#[cfg(feature = "ahash")]
type SlotMap = std::collections::HashMap<String, Slot, ahash::RandomState>;
#[cfg(not(feature = "ahash"))]
type SlotMap = std::collections::HashMap<String, Slot>;

/// One limiter counter and the instant it stops counting
#[derive(Debug, Clone, Copy)]
struct Slot {
    tat: i64,
    expires_at: SystemTime,
}

impl Slot {
    fn live_at(&self, now: SystemTime) -> bool {
        self.expires_at > now
    }
}

/// In-process store that sweeps expired keys at a fixed interval
///
/// Gateway limiter keys are derived from route, rule and caller, so the key
/// space grows with traffic; the periodic sweep keeps it bounded to callers
/// seen within the longest rule period.
///
/// # Example
///
/// ```
/// use routecrab::{PeriodicStore, RateLimiter};
/// use std::time::Duration;
///
/// let store = PeriodicStore::builder()
///     .capacity(100_000)
///     .cleanup_interval(Duration::from_secs(300))
///     .build();
/// let limiter = RateLimiter::new(store);
/// ```
pub struct PeriodicStore {
    slots: SlotMap,
    sweep_every: Duration,
    next_sweep: SystemTime,
    last_evicted: usize,
}

/// Builder for [`PeriodicStore`]
#[derive(Debug, Clone)]
pub struct PeriodicStoreBuilder {
    capacity: usize,
    sweep_every: Duration,
}

impl PeriodicStore {
    /// Store with room for 1000 keys and a 60 second sweep
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> PeriodicStoreBuilder {
        PeriodicStoreBuilder {
            capacity: 1000,
            sweep_every: Duration::from_secs(60),
        }
    }

    /// Number of keys currently held, expired or not
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Keys removed by the most recent sweep
    pub fn last_evicted(&self) -> usize {
        self.last_evicted
    }

    fn sweep(&mut self, now: SystemTime) {
        if now < self.next_sweep {
            return;
        }
        let held = self.slots.len();
        self.slots.retain(|_, slot| slot.live_at(now));
        self.last_evicted = held - self.slots.len();
        self.next_sweep = now + self.sweep_every;
    }
}

impl Default for PeriodicStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for PeriodicStore {
    fn compare_and_swap_with_ttl(
        &mut self,
        key: &str,
        old: i64,
        new: i64,
        ttl: Duration,
        now: SystemTime,
    ) -> Result<bool, String> {
        self.sweep(now);

        let Some(slot) = self.slots.get_mut(key) else {
            return Ok(false);
        };
        if !slot.live_at(now) || slot.tat != old {
            return Ok(false);
        }
        *slot = Slot {
            tat: new,
            expires_at: now + ttl,
        };
        Ok(true)
    }

    fn get(&self, key: &str, now: SystemTime) -> Result<Option<i64>, String> {
        Ok(self
            .slots
            .get(key)
            .filter(|slot| slot.live_at(now))
            .map(|slot| slot.tat))
    }

    fn set_if_not_exists_with_ttl(
        &mut self,
        key: &str,
        value: i64,
        ttl: Duration,
        now: SystemTime,
    ) -> Result<bool, String> {
        self.sweep(now);

        let fresh = Slot {
            tat: value,
            expires_at: now + ttl,
        };
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().live_at(now) {
                    return Ok(false);
                }
                occupied.insert(fresh);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
            }
        }
        Ok(true)
    }
}

impl PeriodicStoreBuilder {
    /// Expected number of live keys
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Interval between sweeps of expired keys
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.sweep_every = interval;
        self
    }

    pub fn build(self) -> PeriodicStore {
        // Headroom so a full table does not rehash between sweeps
        let slots = SlotMap::with_capacity_and_hasher(self.capacity + self.capacity / 3, Default::default());
        PeriodicStore {
            slots,
            sweep_every: self.sweep_every,
            next_sweep: SystemTime::now() + self.sweep_every,
            last_evicted: 0,
        }
    }
}
