//! Per-device mutual exclusion.
//!
//! Every read-modify-write of a device's state (command, telemetry tick,
//! lifecycle change) runs under the device's lock, so operations on one
//! device never interleave while different devices proceed in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct DeviceLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DeviceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `device_id`.
    pub async fn lock(&self, device_id: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(device_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Drop the lock entry of a deleted device. Holders keep their guard.
    pub fn forget(&self, device_id: &str) {
        self.locks.remove(device_id);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
