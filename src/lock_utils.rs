//! Lock poisoning recovery for in-process governance state.
//!
//! A panic while holding one of these locks must not take the request
//! handlers down with it. Poisoning is logged at ERROR level and the guard
//! is recovered.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::error;

/// Acquire a Mutex lock, recovering from poisoning if necessary.
///
/// # Arguments
/// * `mutex` - The Mutex to lock
/// * `context` - A description of what the lock protects (for logging)
pub fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            error!(
                "Mutex poisoned for '{}' - recovering with potentially stale data",
                context
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a RwLock read lock, recovering from poisoning if necessary.
pub fn read_lock_or_recover<'a, T>(rwlock: &'a RwLock<T>, context: &str) -> RwLockReadGuard<'a, T> {
    match rwlock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            error!(
                "RwLock (read) poisoned for '{}' - recovering with potentially stale data",
                context
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a RwLock write lock, recovering from poisoning if necessary.
pub fn write_lock_or_recover<'a, T>(
    rwlock: &'a RwLock<T>,
    context: &str,
) -> RwLockWriteGuard<'a, T> {
    match rwlock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            error!(
                "RwLock (write) poisoned for '{}' - recovering with potentially stale data",
                context
            );
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_write_then_read() {
        let rwlock = RwLock::new(0u64);
        {
            let mut guard = write_lock_or_recover(&rwlock, "treasury balance");
            *guard = 100;
        }
        assert_eq!(*read_lock_or_recover(&rwlock, "treasury balance"), 100);
    }

    #[test]
    fn test_mutex_poisoning_recovery() {
        let mutex = Arc::new(Mutex::new(42));
        let mutex_clone = Arc::clone(&mutex);

        let handle = thread::spawn(move || {
            let _guard = mutex_clone.lock().unwrap();
            panic!("Intentional panic to poison the lock");
        });
        let _ = handle.join();

        let guard = lock_or_recover(&mutex, "poisoned clock");
        assert_eq!(*guard, 42);
    }

    #[test]
    fn test_rwlock_poisoning_recovery() {
        let rwlock = Arc::new(RwLock::new(String::from("original")));
        let rwlock_clone = Arc::clone(&rwlock);

        let handle = thread::spawn(move || {
            let _guard = rwlock_clone.write().unwrap();
            panic!("Intentional panic to poison the lock");
        });
        let _ = handle.join();

        let guard = read_lock_or_recover(&rwlock, "poisoned ledger");
        assert_eq!(*guard, "original");
    }
}
