//! Time sources for windowed counting.
//!
//! See the [`Clock`] trait.

use std::time::Instant;

/// A source of monotonic time.
///
/// [`RollingCounter`](crate::RollingCounter) reads the clock once per `add` or `max` call, and
/// relies on successive readings never going backwards.
pub trait Clock {
    /// The current point in time
    fn now(&self) -> Instant;
}

/// The process-wide monotonic clock, backed by [`Instant::now`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

#[cfg(any(test, feature = "mock"))]
pub use manual::ManualClock;

#[cfg(any(test, feature = "mock"))]
mod manual {
    use super::Clock;
    use parking_lot::Mutex;
    use std::{
        sync::Arc,
        time::{Duration, Instant},
    };

    /// A clock which only moves when told to.
    ///
    /// Clones share the same underlying time, so a test can keep one handle while a counter owns
    /// another.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        now: Arc<Mutex<Instant>>,
    }

    impl ManualClock {
        /// Create a new clock, starting at the current system time
        pub fn new() -> Self {
            ManualClock {
                now: Arc::new(Mutex::new(Instant::now())),
            }
        }

        /// Move this clock (and all of its clones) forward by the given duration
        pub fn advance(&self, by: Duration) {
            *self.now.lock() += by;
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock()
        }
    }
}
