//! Synchronization building blocks for the bucket protocol.
//!
//! Re-exports the atomic types behind a `loom` feature gate (std atomics
//! in production, loom's model-checked versions under test), and houses
//! the bounded spin-try lock acquisition that find/insert/remove use on
//! bucket locks, plus the monotonic clock backing request cooldowns.

use parking_lot::{Mutex, MutexGuard};

#[cfg(not(feature = "loom"))]
pub use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};

#[cfg(feature = "loom")]
pub use loom::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};

use std::sync::OnceLock;
use std::time::Instant;

/// Pause between bucket-lock attempts in [`lock_with_tries`].
///
/// Bucket locks are held for a handful of slot comparisons, so a CPU
/// relax hint is the right wait. Under loom the hint becomes a yield so
/// the model checker can interleave the contending thread.
#[inline]
pub fn spin_loop() {
    #[cfg(not(feature = "loom"))]
    std::hint::spin_loop();

    #[cfg(feature = "loom")]
    loom::thread::yield_now();
}

/// Try to acquire a mutex, spinning for at most `tries` attempts.
///
/// Returns `None` if the lock could not be acquired within the budget.
/// Callers map that to a transient failure rather than blocking.
#[inline]
pub fn lock_with_tries<T>(mutex: &Mutex<T>, tries: u64) -> Option<MutexGuard<'_, T>> {
    for _ in 0..tries {
        if let Some(guard) = mutex.try_lock() {
            return Some(guard);
        }
        spin_loop();
    }
    None
}

fn anchor() -> Instant {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    *ANCHOR.get_or_init(Instant::now)
}

/// Nanoseconds elapsed on the process-wide monotonic clock.
///
/// Structural request cooldowns are stored as values of this clock in
/// relaxed atomics, so they can be compared and updated without locks.
pub fn monotonic_nanos() -> u64 {
    anchor().elapsed().as_nanos() as u64
}
