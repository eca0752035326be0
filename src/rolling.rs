//! A per-key sliding-window occurrence counter.
//!
//! See [`RollingCounter`].

use crate::clock::{Clock, SystemClock};
use std::{
    borrow::Borrow,
    collections::{HashMap, VecDeque},
    hash::Hash,
    time::{Duration, Instant},
};
use tracing::{trace, warn};

/// The error returned when a [`RollingCounter`] is given a window it can't use.
///
/// Every entry in a counter with a zero window would expire the moment it was added.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum InvalidConfiguration {
    /// The window was zero, negative, not a number, or shorter than one nanosecond
    #[error("rolling counter ttl must be at least 1ns, got {0}s")]
    TooShort(f64),

    /// The window does not fit in a [`Duration`]
    #[error("rolling counter ttl of {0}s is too long to represent")]
    TooLong(f64),
}

impl InvalidConfiguration {
    pub(crate) fn zero() -> Self {
        InvalidConfiguration::TooShort(0.0)
    }

    /// The rejected window length, in seconds
    pub fn rejected_secs(&self) -> f64 {
        match *self {
            InvalidConfiguration::TooShort(secs) | InvalidConfiguration::TooLong(secs) => secs,
        }
    }
}

/// Counts how often each key occurred within a trailing time window.
///
/// Each call to [`add`](RollingCounter::add) records one occurrence of a key at the current time.
/// Occurrences older than the counter's `ttl` are forgotten; [`max`](RollingCounter::max) reports
/// the key with the most occurrences still inside the window.
///
/// Expiry is lazy: there is no background timer. Both `add` and `max` first prune every
/// occurrence which has fallen out of the window, and drop keys left without any occurrence, so
/// memory stays bounded by the arrival rate times the window even under add-only workloads.
///
/// ## Ordering
/// Occurrences are appended in the order they are recorded. Because the [`Clock`] is monotonic
/// and `add` takes `&mut self`, each key's timestamps are non-decreasing, so the expired entries
/// of a key always form a prefix of its sequence. Pruning therefore binary-searches for the
/// window boundary and trims the prefix, and recording never needs to keep anything sorted.
///
/// Sharing one counter between threads requires external synchronization (e.g. a mutex around
/// the counter); interleaved writers without one would break the ordering above.
///
/// ```
/// use roost::RollingCounter;
/// use std::time::Duration;
///
/// let mut counter = RollingCounter::new(Duration::from_secs(1))?;
/// counter.add("node-a");
/// counter.add("node-a");
/// counter.add("node-b");
/// assert_eq!(counter.max(), Some("node-a"));
/// # Ok::<_, roost::rolling::InvalidConfiguration>(())
/// ```
#[derive(Debug, Clone)]
pub struct RollingCounter<K, C = SystemClock> {
    counts: HashMap<K, VecDeque<Instant>>,
    ttl: Duration,
    clock: C,
}

impl<K> RollingCounter<K, SystemClock>
where
    K: Hash + Eq + Ord + Clone,
{
    /// Create a counter with the given window length, reading time from the system clock.
    ///
    /// Fails if `ttl` is zero.
    pub fn new(ttl: Duration) -> Result<Self, InvalidConfiguration> {
        Self::with_clock(ttl, SystemClock)
    }

    /// Create a counter with a window given in (possibly fractional) seconds.
    ///
    /// Fails if `secs` is zero, negative, or not finite, or if it rounds down to a zero duration.
    pub fn from_secs_f64(secs: f64) -> Result<Self, InvalidConfiguration> {
        Self::with_clock(ttl_from_secs_f64(secs)?, SystemClock)
    }
}

pub(crate) fn ttl_from_secs_f64(secs: f64) -> Result<Duration, InvalidConfiguration> {
    if secs.is_nan() || secs <= 0.0 {
        return Err(InvalidConfiguration::TooShort(secs));
    }
    match Duration::try_from_secs_f64(secs) {
        Ok(ttl) if ttl.is_zero() => Err(InvalidConfiguration::TooShort(secs)),
        Ok(ttl) => Ok(ttl),
        Err(_) => Err(InvalidConfiguration::TooLong(secs)),
    }
}

impl<K, C> RollingCounter<K, C>
where
    K: Hash + Eq + Ord + Clone,
    C: Clock,
{
    /// Create a counter with the given window length, reading time from `clock`.
    ///
    /// Fails if `ttl` is zero.
    pub fn with_clock(ttl: Duration, clock: C) -> Result<Self, InvalidConfiguration> {
        if ttl.is_zero() {
            return Err(InvalidConfiguration::zero());
        }
        Ok(RollingCounter {
            counts: HashMap::new(),
            ttl,
            clock,
        })
    }

    /// Record one occurrence of `key` at the current time.
    ///
    /// Expired occurrences of every key are pruned first.
    pub fn add(&mut self, key: K) {
        let now = self.clock.now();
        self.expire(now);

        let timestamps = self.counts.entry(key).or_default();
        let now = match timestamps.back() {
            Some(&latest) if latest > now => {
                warn!(
                    behind = ?(latest - now),
                    "clock went backwards; clamping occurrence to the latest recorded time"
                );
                latest
            }
            _ => now,
        };
        timestamps.push_back(now);
    }

    /// The key with the most occurrences within the window, or `None` if no key occurred within
    /// it.
    ///
    /// Expired occurrences of every key are pruned first. When several keys share the highest
    /// count, the one which occurred most recently wins; if that is tied as well, the smallest key
    /// wins.
    pub fn max(&mut self) -> Option<K> {
        let now = self.clock.now();
        self.expire(now);

        self.counts
            .iter()
            .filter_map(|(key, timestamps)| {
                timestamps
                    .back()
                    .map(|&latest| (key, timestamps.len(), latest))
            })
            .max_by(|(key_a, count_a, latest_a), (key_b, count_b, latest_b)| {
                count_a
                    .cmp(count_b)
                    .then(latest_a.cmp(latest_b))
                    .then_with(|| key_b.cmp(key_a))
            })
            .map(|(key, _, _)| key.clone())
    }

    /// The length of this counter's window
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The number of occurrences of `key` as of the last `add` or `max` call.
    ///
    /// This does not prune; occurrences which expired since the last call are still counted.
    pub fn count<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.counts.get(key).map_or(0, VecDeque::len)
    }

    /// Whether `key` is currently tracked. Like [`count`](RollingCounter::count), this does not
    /// prune.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.counts.contains_key(key)
    }

    /// The number of distinct keys currently tracked
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether no key is currently tracked
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Forget every occurrence of every key
    pub fn clear(&mut self) {
        self.counts.clear();
    }

    fn expire(&mut self, now: Instant) {
        let ttl = self.ttl;
        let before = self.counts.len();
        self.counts.retain(|_key, timestamps| {
            trim_expired(timestamps, now, ttl);
            !timestamps.is_empty()
        });

        let dropped = before - self.counts.len();
        if dropped > 0 {
            trace!(dropped, remaining = self.counts.len(), "expired idle keys");
        }
    }
}

/// Remove the leading run of timestamps at least `ttl` older than `now`.
///
/// `timestamps` must be non-decreasing.
fn trim_expired(timestamps: &mut VecDeque<Instant>, now: Instant, ttl: Duration) {
    let expired = timestamps.partition_point(|&t| now.saturating_duration_since(t) >= ttl);
    timestamps.drain(..expired);
}
