use std::sync::{Mutex, MutexGuard};

/// Locks a std mutex, recovering the guard if a previous holder panicked.
pub fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
