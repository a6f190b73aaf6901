//! Environment abstraction for deterministic testing.
//!
//! Decouples key bookkeeping and frame protection from system resources
//! (time, randomness). Production code uses [`SystemEnv`]; tests drive a
//! manual clock and a seeded RNG.

use std::fmt;

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// Monotonic instant type used to stamp key slots.
    type Instant: Copy + Ord + Send + Sync + fmt::Debug + 'static;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u32`.
    ///
    /// Used to pick the starting frame counter of an outbound stream.
    fn random_u32(&self) -> u32 {
        let mut bytes = [0u8; 4];
        self.random_bytes(&mut bytes);
        u32::from_be_bytes(bytes)
    }
}

/// Production environment using system time and cryptographic RNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. A media pipeline without working randomness
/// cannot pick unpredictable frame counters, and OS RNG failure indicates a
/// broken host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::Duration,
    };

    use super::Environment;

    /// Manual clock plus a counter-based byte stream, for unit tests only.
    #[derive(Clone, Default)]
    pub(crate) struct ManualEnv {
        millis: Arc<AtomicU64>,
        counter: Arc<AtomicU64>,
    }

    impl ManualEnv {
        pub(crate) fn advance(&self, duration: Duration) {
            self.millis.fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
        }
    }

    impl Environment for ManualEnv {
        type Instant = Duration;

        fn now(&self) -> Duration {
            Duration::from_millis(self.millis.load(Ordering::SeqCst))
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            for byte in buffer {
                *byte = self.counter.fetch_add(1, Ordering::SeqCst) as u8;
            }
        }
    }
}
