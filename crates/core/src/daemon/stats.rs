use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::warn;

/// Running counters shared by the daemon's tasks.
#[derive(Debug, Default)]
pub struct DaemonStats {
    fetch_count: AtomicU64,
    error_count: AtomicU64,
    liquidation_count: AtomicU64,
    last_error: Mutex<Option<String>>,
    last_fetch_time: Mutex<Option<DateTime<Utc>>>,
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Daemon stats mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

impl DaemonStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one successful venue fetch.
    pub fn record_fetch(&self) {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
        *lock_or_recover(&self.last_fetch_time) = Some(Utc::now());
    }

    pub fn record_error(&self, message: impl Into<String>) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        *lock_or_recover(&self.last_error) = Some(message.into());
    }

    pub fn record_liquidations(&self, count: u64) {
        self.liquidation_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn liquidation_count(&self) -> u64 {
        self.liquidation_count.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        lock_or_recover(&self.last_error).clone()
    }

    pub fn last_fetch_time(&self) -> Option<DateTime<Utc>> {
        *lock_or_recover(&self.last_fetch_time)
    }
}
