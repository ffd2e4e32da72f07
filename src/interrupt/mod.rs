//! Interruptible sleeps shared between the mapping worker and its owner.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// A cancellation flag combined with a timed wait that can be cut short.
///
/// Calling [`cancel`](Self::cancel) wakes every thread blocked in
/// [`wait`](Self::wait), and from then on `wait` returns immediately until
/// [`reset`](Self::reset) is called.
#[derive(Debug, Default)]
pub struct CancellableWait {
    flag: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl CancellableWait {
    /// Create a new, non-cancelled instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock-free check of the cancellation flag
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Set the flag and wake all waiters. Idempotent.
    pub fn cancel(&self) {
        {
            // Store under the lock so a waiter can't miss the notification
            // between its flag check and going to sleep.
            let _guard = self.lock.lock();
            self.flag.store(true, Ordering::Release);
        }
        self.cond.notify_all();
    }

    /// Clear the flag. Must only be called while nobody is waiting.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }

    /// Block until cancelled or until `timeout` elapses (`None` waits forever).
    ///
    /// Returns `true` iff the instance was cancelled. Cancellation wins when it
    /// coincides with the timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut guard = self.lock.lock();
        if self.is_cancelled() {
            return true;
        }

        // A timeout too large to represent as an Instant is as good as none
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        match deadline {
            Some(deadline) => {
                while !self.is_cancelled() {
                    if self.cond.wait_until(&mut guard, deadline).timed_out() {
                        return self.is_cancelled();
                    }
                }
                true
            }
            None => {
                while !self.is_cancelled() {
                    self.cond.wait(&mut guard);
                }
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_cancelled_wait_returns_immediately() {
        let wait = CancellableWait::new();
        wait.cancel();

        let start = Instant::now();
        assert!(wait.wait(Some(Duration::ZERO)));
        assert!(wait.wait(Some(Duration::from_secs(60))));
        assert!(wait.wait(None));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_timeout_without_cancel() {
        let wait = CancellableWait::new();
        let start = Instant::now();

        assert!(!wait.wait(Some(Duration::from_millis(50))));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(!wait.is_cancelled());
    }

    #[test]
    fn test_cancel_wakes_unbounded_waiter() {
        let wait = Arc::new(CancellableWait::new());

        let waiter = {
            let wait = wait.clone();
            thread::spawn(move || wait.wait(None))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        wait.cancel();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_cancel_wakes_all_waiters() {
        let wait = Arc::new(CancellableWait::new());

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let wait = wait.clone();
                thread::spawn(move || wait.wait(Some(Duration::from_secs(60))))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        wait.cancel();

        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
    }

    #[test]
    fn test_cancel_is_idempotent_and_reset_clears() {
        let wait = CancellableWait::new();
        wait.cancel();
        wait.cancel();
        assert!(wait.is_cancelled());

        wait.reset();
        assert!(!wait.is_cancelled());
        assert!(!wait.wait(Some(Duration::from_millis(1))));
    }

    #[test]
    fn test_huge_timeout_still_cancellable() {
        let wait = Arc::new(CancellableWait::new());

        let waiter = {
            let wait = wait.clone();
            thread::spawn(move || wait.wait(Some(Duration::MAX)))
        };

        thread::sleep(Duration::from_millis(20));
        wait.cancel();
        assert!(waiter.join().unwrap());
    }
}
