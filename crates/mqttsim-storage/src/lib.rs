//! Persistence for mqtt-sim.
//!
//! Devices and their simulated state live in a single redb file.

pub mod device_store;
pub mod error;

pub use device_store::{Device, DeviceFilter, DeviceStore, RedbDeviceStore, SharedDeviceStore};
pub use error::{Error, Result};
