//! Bounded-wait locking between the render and preload contexts.
//!
//! The render context owns the frame deadline and may block unconditionally.
//! The background preload context must never delay a frame, so its only way
//! in is [`SlackMutex::try_lock_within`], bounded by the slack the frame
//! coordinator granted it. A timed-out acquire means "skip this cycle", not
//! an error.

use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

/// A mutex with an unconditional acquire for the render context and a
/// bounded-wait acquire for the background context.
///
/// Release is structural: both acquire paths hand back a [`MutexGuard`]
/// that unlocks when dropped, on every exit path.
pub struct SlackMutex<T> {
    inner: Mutex<T>,
}

impl<T> SlackMutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Block until the lock is available.
    ///
    /// Reserved for the render context at frame boundaries; the background
    /// context has no unconditional wait.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }

    /// Acquire within `timeout`, or give up.
    ///
    /// Returns `None` when the lock could not be taken in time; the caller
    /// skips its work for this cycle rather than delay the frame.
    pub fn try_lock_within(&self, timeout: Duration) -> Option<MutexGuard<'_, T>> {
        if timeout.is_zero() {
            return self.inner.try_lock();
        }
        self.inner.try_lock_for(timeout)
    }
}

impl<T: Default> Default for SlackMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_uncontended_bounded_acquire() {
        let m = SlackMutex::new(5u32);
        let guard = m.try_lock_within(Duration::from_millis(10));
        assert_eq!(*guard.unwrap(), 5);
    }

    #[test]
    fn test_zero_timeout_is_try_lock() {
        let m = SlackMutex::new(());
        let held = m.lock();
        assert!(m.try_lock_within(Duration::ZERO).is_none());
        drop(held);
        assert!(m.try_lock_within(Duration::ZERO).is_some());
    }

    #[test]
    fn test_bounded_acquire_times_out_under_contention() {
        let m = Arc::new(SlackMutex::new(()));
        let holder = m.clone();

        let t = thread::spawn(move || {
            let _guard = holder.lock();
            thread::sleep(Duration::from_millis(100));
        });

        // Give the holder time to take the lock.
        thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        let result = m.try_lock_within(Duration::from_millis(10));
        let waited = start.elapsed();

        assert!(result.is_none());
        // The wait is bounded: well under the holder's 100ms.
        assert!(waited < Duration::from_millis(80));

        t.join().unwrap();
    }

    #[test]
    fn test_unconditional_acquire_waits() {
        let m = Arc::new(SlackMutex::new(0u32));
        let writer = m.clone();

        let t = thread::spawn(move || {
            let mut guard = writer.lock();
            thread::sleep(Duration::from_millis(30));
            *guard = 7;
        });

        thread::sleep(Duration::from_millis(10));
        let guard = m.lock();
        assert_eq!(*guard, 7);
        drop(guard);
        t.join().unwrap();
    }
}
