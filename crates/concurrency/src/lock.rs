//! Read/write lock manager with timeout, retry, and abandonment epochs
//!
//! The manager owns the protected state and hands it to closures under a
//! `parking_lot::RwLock`. Acquisition is bounded: each attempt waits at
//! most the configured timeout, and the retry budget caps the number of
//! attempts before the operation fails with `LockTimeout`.
//!
//! Writers starved past their budget can optionally advance the
//! abandonment generation. Readers that captured [`LockManager::generation`]
//! before a long computation can compare it afterwards to learn that a
//! writer gave up while they held the lock; what to do about it is the
//! caller's policy.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

use chainstate_core::{ChainstateError, Result};

/// Acquisition policy for the lock manager.
///
/// A zero timeout or a zero retry budget disables bounded acquisition
/// for that lock kind: the caller blocks until the lock is granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// How long each read acquisition attempt may wait.
    pub read_timeout: Duration,
    /// How many read timeouts are tolerated before giving up.
    pub read_retries: u32,
    /// How long each write acquisition attempt may wait.
    pub write_timeout: Duration,
    /// How many write timeouts are tolerated before giving up.
    pub write_retries: u32,
    /// Advance the abandonment generation when the write budget is
    /// exhausted, signalling readers that a writer gave up on them.
    pub rotate_on_write_timeout: bool,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            read_retries: 5,
            write_timeout: Duration::from_secs(1),
            write_retries: 10_000,
            rotate_on_write_timeout: false,
        }
    }
}

/// Owns a piece of state and serializes access to it: parallel readers,
/// single writer, bounded acquisition.
pub struct LockManager<T> {
    state: RwLock<T>,
    policy: LockPolicy,
    generation: AtomicU64,
}

impl<T> LockManager<T> {
    /// Wrap `state` under the given policy.
    pub fn new(state: T, policy: LockPolicy) -> Self {
        Self {
            state: RwLock::new(state),
            policy,
            generation: AtomicU64::new(0),
        }
    }

    /// The acquisition policy in force.
    pub fn policy(&self) -> LockPolicy {
        self.policy
    }

    /// Current abandonment generation. Incremented each time a writer
    /// exhausts its budget while rotation is enabled.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Unwrap the protected state. Consumes the manager, so no lock is
    /// needed.
    pub fn into_inner(self) -> T {
        self.state.into_inner()
    }

    /// Run `f` with shared access to the state.
    ///
    /// Fails with `LockTimeout` when the read budget is exhausted; no
    /// state is touched in that case.
    pub fn with_read_lock<R>(&self, f: impl FnOnce(&T) -> Result<R>) -> Result<R> {
        if self.policy.read_timeout.is_zero() || self.policy.read_retries == 0 {
            return f(&self.state.read());
        }
        let mut attempts = 0u32;
        loop {
            if let Some(guard) = self.state.try_read_for(self.policy.read_timeout) {
                return f(&guard);
            }
            attempts += 1;
            if attempts > self.policy.read_retries {
                return Err(ChainstateError::LockTimeout {
                    kind: "read",
                    attempts,
                });
            }
            warn!(target: "chainstate::lock", attempts, "read lock timeout, retrying");
        }
    }

    /// Run `f` with exclusive access to the state.
    ///
    /// Fails with `LockTimeout` when the write budget is exhausted. If
    /// rotation is enabled, the abandonment generation is advanced
    /// before the failure is reported.
    pub fn with_write_lock<R>(&self, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        if self.policy.write_timeout.is_zero() || self.policy.write_retries == 0 {
            return f(&mut self.state.write());
        }
        let mut attempts = 0u32;
        loop {
            if let Some(mut guard) = self.state.try_write_for(self.policy.write_timeout) {
                return f(&mut guard);
            }
            attempts += 1;
            if attempts > self.policy.write_retries {
                if self.policy.rotate_on_write_timeout {
                    let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                    warn!(
                        target: "chainstate::lock",
                        generation,
                        "write lock budget exhausted, abandoning readers"
                    );
                }
                return Err(ChainstateError::LockTimeout {
                    kind: "write",
                    attempts,
                });
            }
            warn!(target: "chainstate::lock", attempts, "write lock timeout, retrying");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn contended_policy() -> LockPolicy {
        LockPolicy {
            read_timeout: Duration::from_millis(10),
            read_retries: 2,
            write_timeout: Duration::from_millis(10),
            write_retries: 2,
            rotate_on_write_timeout: false,
        }
    }

    #[test]
    fn read_and_write_pass_through() {
        let manager = LockManager::new(10i64, LockPolicy::default());
        manager.with_write_lock(|v| {
            *v += 5;
            Ok(())
        })
        .unwrap();
        let seen = manager.with_read_lock(|v| Ok(*v)).unwrap();
        assert_eq!(seen, 15);
    }

    #[test]
    fn closure_errors_propagate() {
        let manager = LockManager::new((), LockPolicy::default());
        let err = manager
            .with_read_lock(|_| -> Result<()> { Err(ChainstateError::ReadOnly) })
            .unwrap_err();
        assert!(matches!(err, ChainstateError::ReadOnly));
    }

    #[test]
    fn read_times_out_under_writer() {
        let manager = Arc::new(LockManager::new(0i64, contended_policy()));
        let barrier = Arc::new(Barrier::new(2));

        let writer = {
            let manager = Arc::clone(&manager);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                manager
                    .with_write_lock(|_| {
                        barrier.wait();
                        thread::sleep(Duration::from_millis(200));
                        Ok(())
                    })
                    .unwrap();
            })
        };

        barrier.wait();
        let err = manager.with_read_lock(|v| Ok(*v)).unwrap_err();
        assert!(matches!(
            err,
            ChainstateError::LockTimeout { kind: "read", .. }
        ));
        writer.join().unwrap();
    }

    #[test]
    fn write_timeout_advances_generation_when_rotating() {
        let policy = LockPolicy {
            rotate_on_write_timeout: true,
            ..contended_policy()
        };
        let manager = Arc::new(LockManager::new(0i64, policy));
        let barrier = Arc::new(Barrier::new(2));

        let reader = {
            let manager = Arc::clone(&manager);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                manager
                    .with_read_lock(|_| {
                        barrier.wait();
                        thread::sleep(Duration::from_millis(200));
                        Ok(())
                    })
                    .unwrap();
            })
        };

        barrier.wait();
        assert_eq!(manager.generation(), 0);
        let err = manager.with_write_lock(|_| Ok(())).unwrap_err();
        assert!(matches!(
            err,
            ChainstateError::LockTimeout { kind: "write", .. }
        ));
        assert_eq!(manager.generation(), 1);
        reader.join().unwrap();
    }

    #[test]
    fn zero_retries_block_until_granted() {
        let policy = LockPolicy {
            read_retries: 0,
            ..LockPolicy::default()
        };
        let manager = LockManager::new(7i64, policy);
        assert_eq!(manager.with_read_lock(|v| Ok(*v)).unwrap(), 7);
    }

    #[test]
    fn into_inner_returns_state() {
        let manager = LockManager::new(vec![1, 2, 3], LockPolicy::default());
        assert_eq!(manager.into_inner(), vec![1, 2, 3]);
    }
}
