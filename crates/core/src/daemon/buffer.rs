//! In-memory liquidation buffer drained by the daemon's flusher.

use std::sync::{Mutex, MutexGuard};

use log::{debug, warn};
use perpflow_market_data::{Liquidation, Record};
use tokio::sync::Notify;

use crate::constants::MAX_RETAINED_LIQUIDATIONS;
use crate::errors::Result;
use crate::telemetry::RecordStore;

/// Collects streamed liquidations until `threshold` of them are waiting.
///
/// Pushes come from stream handlers on arbitrary tasks, so the buffer is
/// guarded by a plain mutex and never held across an await.
///
/// While the store keeps failing, restored batches are capped at `capacity`
/// events; the oldest are dropped first.
#[derive(Debug)]
pub struct LiquidationBuffer {
    events: Mutex<Vec<Liquidation>>,
    threshold: usize,
    capacity: usize,
    full: Notify,
}

impl LiquidationBuffer {
    pub fn new(threshold: usize) -> Self {
        Self::with_capacity(threshold, MAX_RETAINED_LIQUIDATIONS)
    }

    pub fn with_capacity(threshold: usize, capacity: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            events: Mutex::new(Vec::new()),
            threshold,
            capacity: capacity.max(threshold),
            full: Notify::new(),
        }
    }

    fn lock_events(&self) -> MutexGuard<'_, Vec<Liquidation>> {
        self.events.lock().unwrap_or_else(|poisoned| {
            warn!("Liquidation buffer mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Add an event. Returns `true` when the buffer reached its threshold and
    /// the flusher was signalled.
    pub fn push(&self, liquidation: Liquidation) -> bool {
        let len = {
            let mut events = self.lock_events();
            events.push(liquidation);
            events.len()
        };
        if len >= self.threshold {
            self.full.notify_one();
            true
        } else {
            false
        }
    }

    /// Remove and return everything buffered.
    pub fn take(&self) -> Vec<Liquidation> {
        std::mem::take(&mut *self.lock_events())
    }

    /// Put a batch back in front of anything buffered since it was taken.
    ///
    /// Returns how many of the oldest events were dropped to stay within
    /// capacity.
    pub fn restore(&self, mut batch: Vec<Liquidation>) -> usize {
        let mut events = self.lock_events();
        batch.append(&mut events);
        let excess = batch.len().saturating_sub(self.capacity);
        if excess > 0 {
            batch.drain(..excess);
            warn!(
                "Liquidation buffer over capacity ({}), dropped {} oldest event(s)",
                self.capacity, excess
            );
        }
        *events = batch;
        excess
    }

    pub fn len(&self) -> usize {
        self.lock_events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_events().is_empty()
    }

    /// Resolves once a push reaches the threshold.
    pub async fn wait_full(&self) {
        self.full.notified().await;
    }

    /// Write everything buffered to `store`. On failure the batch is put
    /// back and the error returned.
    ///
    /// The store writes one partition at a time, so a failure can leave some
    /// groups of the batch already written. The whole batch is still put
    /// back and those groups are written again by the next successful flush.
    pub async fn flush(&self, store: &dyn RecordStore) -> Result<usize> {
        let batch = self.take();
        if batch.is_empty() {
            return Ok(0);
        }
        let records: Vec<Record> = batch.iter().cloned().map(Record::from).collect();
        match store.write(&records).await {
            Ok(written) => {
                debug!("Flushed {} liquidation(s)", written);
                Ok(written)
            }
            Err(e) => {
                self.restore(batch);
                Err(e)
            }
        }
    }
}
