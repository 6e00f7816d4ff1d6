use std::time::{Duration, SystemTime};


mod periodic;

pub use periodic::{PeriodicStore, PeriodicStoreBuilder};

/// Counter storage for the GCRA limiter
///
/// Values are theoretical arrival times in nanoseconds since the epoch. Every
/// write carries a TTL after which the key reads as absent.
pub trait Store {
    /// Replace `old` with `new` if the key still holds `old`
    fn compare_and_swap_with_ttl(
        &mut self,
        key: &str,
        old: i64,
        new: i64,
        ttl: Duration,
        now: SystemTime,
    ) -> Result<bool, String>;

    /// Read the live value of a key
    fn get(&self, key: &str, now: SystemTime) -> Result<Option<i64>, String>;

    /// Insert a value if the key is absent or expired
    fn set_if_not_exists_with_ttl(
        &mut self,
        key: &str,
        value: i64,
        ttl: Duration,
        now: SystemTime,
    ) -> Result<bool, String>;
}
