//! Core types for mqtt-sim.
//!
//! Shared error type, configuration and the live-update event bus used by
//! the storage, device engine and CLI crates.

pub mod config;
pub mod error;
pub mod event;
pub mod eventbus;

pub use config::{MqttConfig, SimConfig};
pub use error::{Error, Result};
pub use event::{EventMetadata, SimEvent};
pub use eventbus::{
    DEFAULT_CHANNEL_CAPACITY, DeviceReceiver, EventBus, EventBusReceiver, SharedEventBus,
};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{defaults, env_vars, SimConfig};
    pub use crate::error::{Error, Result};
    pub use crate::event::SimEvent;
    pub use crate::eventbus::{EventBus, SharedEventBus};
}
