//! Telemetry scheduler.
//!
//! Owns one cancellable timer per armed device. `arm` always cancels the
//! previous timer for the device before installing a new one, so a device
//! never has two timers.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use mqttsim_core::{Error, Result};

use crate::context::SimContext;
use crate::kinds::get_kind;

pub struct TelemetryScheduler {
    ctx: Arc<SimContext>,
    timers: DashMap<String, JoinHandle<()>>,
}

impl TelemetryScheduler {
    pub(crate) fn new(ctx: Arc<SimContext>) -> Self {
        Self {
            ctx,
            timers: DashMap::new(),
        }
    }

    /// Cancel any timer of `device_id`, then start a new one if `interval_secs > 0`.
    pub fn arm(&self, device_id: &str, interval_secs: u32) {
        match self.timers.entry(device_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if interval_secs == 0 {
                    entry.remove().abort();
                    debug!(device_id = %device_id, "Telemetry disarmed");
                } else {
                    let handle = self.spawn_timer(device_id, interval_secs);
                    entry.insert(handle).abort();
                    debug!(device_id = %device_id, interval_secs, "Telemetry re-armed");
                }
            }
            Entry::Vacant(entry) => {
                if interval_secs > 0 {
                    entry.insert(self.spawn_timer(device_id, interval_secs));
                    debug!(device_id = %device_id, interval_secs, "Telemetry armed");
                }
            }
        }
    }

    pub fn disarm(&self, device_id: &str) {
        if let Some((_, handle)) = self.timers.remove(device_id) {
            handle.abort();
            debug!(device_id = %device_id, "Telemetry disarmed");
        }
    }

    pub fn is_armed(&self, device_id: &str) -> bool {
        self.timers.contains_key(device_id)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }

    /// Cancel every timer.
    pub fn shutdown(&self) {
        let count = self.timers.len();
        self.timers.retain(|_, handle| {
            handle.abort();
            false
        });
        if count > 0 {
            info!("Stopped {} telemetry timers", count);
        }
    }

    fn spawn_timer(&self, device_id: &str, interval_secs: u32) -> JoinHandle<()> {
        let ctx = self.ctx.clone();
        let device_id = device_id.to_string();
        let period = Duration::from_secs(u64::from(interval_secs));

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut rng = StdRng::from_entropy();
            loop {
                ticker.tick().await;
                if let Err(e) = heartbeat(&ctx, &device_id, &mut rng).await {
                    warn!(device_id = %device_id, "Telemetry tick failed: {}", e);
                }
            }
        })
    }
}

impl Drop for TelemetryScheduler {
    fn drop(&mut self) {
        for entry in self.timers.iter() {
            entry.value().abort();
        }
    }
}

/// One telemetry interval: advance the simulation and republish the state.
///
/// The state is only persisted when the tick changed it, but it is published
/// either way since subscribers use it as a liveness signal.
async fn heartbeat(ctx: &SimContext, device_id: &str, rng: &mut StdRng) -> Result<()> {
    // The device may have been removed while this tick waited for the lock.
    let (_guard, device) = match ctx.lock_device(device_id).await {
        Ok(locked) => locked,
        Err(Error::NotFound(_)) => return Ok(()),
        Err(e) => return Err(e),
    };
    let Some(prev) = ctx.store.get_state(device_id)? else {
        return Ok(());
    };

    let kind = get_kind(&device.device_type)?;
    let next = match kind.tick(&prev, &device.capabilities, rng) {
        Ok(next) => next,
        Err(e) => {
            warn!(device_id = %device_id, "Tick hook failed: {}", e);
            prev.clone()
        }
    };

    if next != prev {
        ctx.store.set_state(device_id, &next)?;
    }
    ctx.publish_state(&device, &next);
    ctx.notify_state(&device, &next);
    Ok(())
}
