//! Cooperative stop signal.
//!
//! A `StopToken` is handed to every worker at construction and polled at
//! defined checkpoints. It is write-once: `cancel()` flips it to stopped and
//! it never resets. Waits on the token return early when it is cancelled, so
//! a worker sleeping through a reconnect delay observes shutdown promptly.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Default)]
pub struct StopToken {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    stopped: Mutex<bool>,
    changed: Condvar,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Returns `true` only for the call that flipped the token.
    pub fn cancel(&self) -> bool {
        let mut stopped = self.lock();
        if *stopped {
            return false;
        }
        *stopped = true;
        drop(stopped);
        self.inner.changed.notify_all();
        true
    }

    pub fn is_stopped(&self) -> bool {
        *self.lock()
    }

    /// Sleep for up to `timeout`. Returns `true` if the token is stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.lock();
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            stopped = self
                .inner
                .changed
                .wait_timeout(stopped, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *stopped
    }

    /// Block until the token is stopped.
    pub fn wait(&self) {
        let mut stopped = self.lock();
        while !*stopped {
            stopped = self
                .inner
                .changed
                .wait(stopped)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.inner
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn cancel_is_write_once() {
        let token = StopToken::new();
        assert!(!token.is_stopped());
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_stopped());
    }

    #[test]
    fn wait_timeout_expires_when_not_cancelled() {
        let token = StopToken::new();
        let start = Instant::now();
        assert!(!token.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn cancel_interrupts_a_long_wait() {
        let token = StopToken::new();
        let sleeper = {
            let token = token.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let stopped = token.wait_timeout(Duration::from_secs(30));
                (stopped, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        let (stopped, elapsed) = sleeper.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn wait_returns_after_cancel() {
        let token = StopToken::new();
        let waiter = {
            let token = token.clone();
            thread::spawn(move || token.wait())
        };
        token.cancel();
        waiter.join().unwrap();
    }
}
