//! Simulator engine for mqtt-sim.
//!
//! Device kinds, topic layout, the transport adapter and the
//! [`DeviceService`] that ties the command router, telemetry scheduler and
//! lifecycle operations together.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mqttsim_core::EventBus;
//! use mqttsim_devices::{CreateDevice, DeviceService, EngineOptions, MemoryTransport, StaticTemplateSource};
//! use mqttsim_storage::RedbDeviceStore;
//!
//! # async fn demo() -> mqttsim_core::Result<()> {
//! let service = DeviceService::new(
//!     Arc::new(RedbDeviceStore::in_memory()?),
//!     Arc::new(MemoryTransport::new()),
//!     Arc::new(EventBus::new()),
//!     Arc::new(StaticTemplateSource::empty()),
//!     EngineOptions::default(),
//! );
//! service.start()?;
//! let lamp = service.create_device(CreateDevice::new("light", "Desk lamp")).await?;
//! service.send_command(&lamp.device.id, &serde_json::json!({"state": "ON"})).await?;
//! # Ok(())
//! # }
//! ```

mod context;
pub mod discovery;
pub mod import_export;
pub mod kinds;
pub mod locks;
pub mod router;
pub mod scheduler;
pub mod service;
pub mod slug;
pub mod templates;
pub mod topics;
pub mod transport;

pub use context::DeviceWithState;
pub use discovery::{DiscoveryPayload, SIMULATOR_NAME, SIMULATOR_VERSION};
pub use import_export::{
    ExportSnapshot, ExportedDevice, ImportAction, ImportDetail, ImportPayload, ImportReport,
    SNAPSHOT_VERSION,
};
pub use kinds::{get_kind, has_kind, kind_ids, list_kinds, Capabilities, DeviceKind, KindInfo};
pub use router::CommandRouter;
pub use scheduler::TelemetryScheduler;
pub use service::{
    CreateDevice, CreatedDevice, DeviceList, DevicePatch, DeviceService, EngineOptions, Page,
    Pagination,
};
pub use templates::{
    DeviceTemplate, FileTemplateSource, StaticTemplateSource, TemplateSet, TemplateSource,
};
pub use topics::{DeviceTopics, Topics};
pub use transport::{
    InboundHandler, MemoryTransport, MqttTransport, Payload, PublishOptions, PublishedMessage,
    SharedTransport, Transport,
};
