//! Device lifecycle manager.
//!
//! [`DeviceService`] is the entry point of the simulator engine. It owns the
//! command router and the telemetry scheduler and implements creation,
//! updates, removal and listing of simulated devices on top of the store and
//! transport it is given.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use mqttsim_core::{
    not_found_err, validation_err, Error, Result, SharedEventBus, SimConfig, SimEvent,
};
use mqttsim_storage::{Device, DeviceFilter, SharedDeviceStore};

use crate::context::{DeviceWithState, SimContext};
use crate::kinds::{get_kind, list_kinds, Capabilities, KindInfo};
use crate::locks::DeviceLocks;
use crate::router::{apply_command, CommandRouter};
use crate::scheduler::TelemetryScheduler;
use crate::slug::{is_valid_slug, to_slug, with_suffix};
use crate::templates::{TemplateSet, TemplateSource};
use crate::topics::{DeviceTopics, Topics};
use crate::transport::SharedTransport;

/// Insert attempts for an auto-derived slug before giving up.
const SLUG_INSERT_ATTEMPTS: u32 = 5;
const DEFAULT_PAGE_LIMIT: usize = 50;
const MAX_PAGE_LIMIT: usize = 500;

/// Engine settings taken from [`SimConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub namespace: String,
    pub discovery_enabled: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            namespace: mqttsim_core::config::defaults::NAMESPACE.to_string(),
            discovery_enabled: true,
        }
    }
}

impl From<&SimConfig> for EngineOptions {
    fn from(config: &SimConfig) -> Self {
        Self {
            namespace: config.mqtt.namespace.clone(),
            discovery_enabled: config.discovery_enabled,
        }
    }
}

/// Request to create a device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDevice {
    #[serde(rename = "type")]
    pub device_type: String,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Capabilities>,
    #[serde(default)]
    pub template_id: Option<String>,
}

impl CreateDevice {
    pub fn new(device_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            device_type: device_type.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.capabilities = Some(caps);
        self
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }
}

/// Result of [`DeviceService::create_device`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedDevice {
    pub device: Device,
    pub state: Value,
    pub topics: DeviceTopics,
    /// `true` when a device with the same type and slug already existed.
    pub existed: bool,
}

/// Merge-patch for [`DeviceService::update_device`]. `None` leaves a field alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Capabilities>,
    #[serde(default)]
    pub template_id: Option<String>,
}

/// Page selection for [`DeviceService::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl Page {
    fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            limit: self.limit.clamp(1, MAX_PAGE_LIMIT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub pages: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceList {
    pub data: Vec<DeviceWithState>,
    pub pagination: Pagination,
}

/// Overlay `patch` onto `base` key by key.
pub(crate) fn merge_caps(base: &mut Capabilities, patch: &Capabilities) {
    for (k, v) in patch {
        base.insert(k.clone(), v.clone());
    }
}

pub struct DeviceService {
    pub(crate) ctx: Arc<SimContext>,
    router: Arc<CommandRouter>,
    scheduler: TelemetryScheduler,
    templates: Arc<dyn TemplateSource>,
    started: AtomicBool,
}

impl DeviceService {
    pub fn new(
        store: SharedDeviceStore,
        transport: SharedTransport,
        events: SharedEventBus,
        templates: Arc<dyn TemplateSource>,
        options: EngineOptions,
    ) -> Self {
        let ctx = Arc::new(SimContext {
            store,
            transport,
            events,
            locks: DeviceLocks::new(),
            topics: Topics::new(options.namespace),
            discovery_enabled: options.discovery_enabled,
        });
        Self {
            router: Arc::new(CommandRouter::new(ctx.clone())),
            scheduler: TelemetryScheduler::new(ctx.clone()),
            ctx,
            templates,
            started: AtomicBool::new(false),
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.ctx.topics
    }

    /// Live-update notifications for external consumers.
    pub fn events(&self) -> &SharedEventBus {
        &self.ctx.events
    }

    pub fn scheduler(&self) -> &TelemetryScheduler {
        &self.scheduler
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    /// Subscribe the command wildcard and restore telemetry timers of stored devices.
    ///
    /// Returns the number of armed timers. Calling it again only re-arms.
    pub fn start(&self) -> Result<usize> {
        if !self.started.swap(true, Ordering::SeqCst) {
            let pattern = self.ctx.topics.command_wildcard();
            self.ctx
                .transport
                .subscribe_wildcard(&pattern, self.router.clone());
        }

        let devices = self.ctx.store.find(&DeviceFilter::default())?;
        let mut armed = 0;
        for device in devices.iter().filter(|d| d.telemetry_interval_sec > 0) {
            self.scheduler.arm(&device.id, device.telemetry_interval_sec);
            armed += 1;
        }
        info!(
            "Device service started: {} devices, {} telemetry timers",
            devices.len(),
            armed
        );
        Ok(armed)
    }

    /// Cancel all telemetry timers.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    pub fn list_kinds(&self) -> Vec<KindInfo> {
        list_kinds()
    }

    pub fn list_templates(&self) -> Result<Arc<TemplateSet>> {
        self.templates.snapshot()
    }

    pub fn list(&self, filter: &DeviceFilter, page: Page) -> Result<DeviceList> {
        let page = page.normalized();
        let devices = self.ctx.store.find(filter)?;
        let total = devices.len();

        let mut data = Vec::new();
        for device in devices
            .into_iter()
            .skip((page.page - 1).saturating_mul(page.limit))
            .take(page.limit)
        {
            data.push(self.with_state(device)?);
        }

        Ok(DeviceList {
            data,
            pagination: Pagination {
                page: page.page,
                limit: page.limit,
                total,
                pages: total.div_ceil(page.limit),
            },
        })
    }

    pub fn get(&self, id: &str) -> Result<DeviceWithState> {
        let device = self
            .ctx
            .store
            .find_one(id)?
            .ok_or_else(|| not_found_err!(id))?;
        self.with_state(device)
    }

    fn with_state(&self, device: Device) -> Result<DeviceWithState> {
        let state = self.ctx.store.get_state(&device.id)?.unwrap_or(Value::Null);
        Ok(DeviceWithState { device, state })
    }

    /// Create a device, or return the existing one for a known `(type, slug)`.
    pub async fn create_device(&self, req: CreateDevice) -> Result<CreatedDevice> {
        self.create_inner(req, true).await
    }

    /// Shared create path. Lenient mode stores unknown templates by id without
    /// merging anything, which import relies on.
    pub(crate) async fn create_inner(
        &self,
        req: CreateDevice,
        strict_templates: bool,
    ) -> Result<CreatedDevice> {
        let kind = get_kind(&req.device_type)?;
        let name = req.name.trim();
        if name.is_empty() {
            return Err(validation_err!("name is required"));
        }

        if let Some(slug) = &req.slug {
            if !is_valid_slug(slug) {
                return Err(validation_err!(
                    "slug must match ^[a-z0-9]+(-[a-z0-9]+)*$"
                ));
            }
            if let Some(existing) = self.ctx.store.find_by_slug(kind.id(), slug)? {
                debug!(device_id = %existing.id, "Create is a no-op, slug {} exists", slug);
                return self.existing(existing);
            }
        }

        let mut caps = kind.capabilities();
        if let Some(template_id) = &req.template_id {
            let templates = self.templates.snapshot()?;
            match templates.get(template_id) {
                Some(t) if t.kind == kind.id() => {
                    if let Some(tc) = &t.capabilities {
                        merge_caps(&mut caps, tc);
                    }
                }
                Some(t) if strict_templates => {
                    return Err(validation_err!(
                        "template '{}' is for kind '{}', not '{}'",
                        template_id,
                        t.kind,
                        kind.id()
                    ));
                }
                None if strict_templates => {
                    return Err(validation_err!("unknown template '{}'", template_id));
                }
                _ => warn!("Template '{}' not applied to new {}", template_id, kind.id()),
            }
        }
        if let Some(explicit) = &req.capabilities {
            merge_caps(&mut caps, explicit);
        }
        kind.validate_capabilities(&caps)?;
        let state = kind.default_state(&caps)?;

        let device = match &req.slug {
            Some(slug) => {
                let device = self.new_record(
                    &req,
                    name,
                    slug.clone(),
                    caps,
                    kind.default_telemetry_interval(),
                );
                // A racing create that won the slug surfaces as Conflict.
                self.ctx.store.insert(&device, &state)?;
                device
            }
            None => {
                let base = to_slug(name);
                let mut n = self.first_free_suffix(kind.id(), &base)?;
                let mut attempt = 1;
                loop {
                    let slug = with_suffix(&base, n);
                    let device = self.new_record(
                        &req,
                        name,
                        slug,
                        caps.clone(),
                        kind.default_telemetry_interval(),
                    );
                    match self.ctx.store.insert(&device, &state) {
                        Ok(()) => break device,
                        Err(mqttsim_storage::Error::UniqueViolation(_))
                            if attempt < SLUG_INSERT_ATTEMPTS =>
                        {
                            debug!("Slug {} taken concurrently, retrying", with_suffix(&base, n));
                            attempt += 1;
                            n += 1;
                        }
                        Err(mqttsim_storage::Error::UniqueViolation(_)) => {
                            return Err(Error::Conflict(format!(
                                "could not allocate unique slug for base '{}'",
                                base
                            )));
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        };

        self.announce(&device, &state);
        if device.telemetry_interval_sec > 0 {
            self.scheduler.arm(&device.id, device.telemetry_interval_sec);
        }
        self.ctx.notify(SimEvent::created(serde_json::to_value(&device)?));
        info!(
            device_id = %device.id,
            "Created {} '{}' ({})",
            device.device_type,
            device.name,
            device.slug.as_deref().unwrap_or("-")
        );

        let topics = self.ctx.topics.device(&device.device_type, &device.id);
        Ok(CreatedDevice {
            device,
            state,
            topics,
            existed: false,
        })
    }

    fn new_record(
        &self,
        req: &CreateDevice,
        name: &str,
        slug: String,
        caps: Capabilities,
        telemetry: u32,
    ) -> Device {
        Device::new(&req.device_type, name, Some(slug), caps)
            .with_template(req.template_id.clone())
            .with_telemetry_interval(telemetry)
    }

    /// Smallest `n >= 1` whose suffixed slug is free.
    fn first_free_suffix(&self, device_type: &str, base: &str) -> Result<u32> {
        let mut n = 1;
        while self
            .ctx
            .store
            .find_by_slug(device_type, &with_suffix(base, n))?
            .is_some()
        {
            n += 1;
        }
        Ok(n)
    }

    fn existing(&self, device: Device) -> Result<CreatedDevice> {
        let state = self.ctx.store.get_state(&device.id)?.unwrap_or(Value::Null);
        let topics = self.ctx.topics.device(&device.device_type, &device.id);
        Ok(CreatedDevice {
            device,
            state,
            topics,
            existed: true,
        })
    }

    /// Birth, online status, initial state, then discovery.
    fn announce(&self, device: &Device, state: &Value) {
        self.ctx.publish_birth(device);
        self.ctx.publish_status(device, "online");
        self.ctx.publish_state(device, state);
        self.ctx.publish_discovery(device);
    }

    /// Apply a command synchronously and return the new state.
    pub async fn send_command(&self, id: &str, cmd: &Value) -> Result<Value> {
        let Value::Object(map) = cmd else {
            return Err(validation_err!("command must be a JSON object"));
        };
        apply_command(&self.ctx, id, None, map.clone()).await
    }

    /// Merge-patch name, capabilities and template id. Type and slug never change.
    pub async fn update_device(&self, id: &str, patch: DevicePatch) -> Result<Device> {
        let (_guard, mut device) = self.ctx.lock_device(id).await?;

        if let Some(name) = &patch.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(validation_err!("name must not be empty"));
            }
            device.name = name.to_string();
        }
        if let Some(caps) = &patch.capabilities {
            let mut merged = device.capabilities.clone();
            merge_caps(&mut merged, caps);
            get_kind(&device.device_type)?.validate_capabilities(&merged)?;
            device.capabilities = merged;
        }
        if let Some(template_id) = patch.template_id {
            device.template_id = Some(template_id);
        }

        device.touch();
        self.ctx.store.save(&device)?;
        self.ctx.publish_discovery(&device);
        self.ctx.notify(SimEvent::updated(serde_json::to_value(&device)?));
        Ok(device)
    }

    /// Persist a new telemetry interval and re-arm or disarm before returning.
    pub async fn update_telemetry(&self, id: &str, interval_secs: i64) -> Result<Device> {
        if interval_secs < 0 {
            return Err(validation_err!("telemetryIntervalSec must be >= 0"));
        }
        let interval = u32::try_from(interval_secs)
            .map_err(|_| validation_err!("telemetryIntervalSec too large"))?;

        let (_guard, mut device) = self.ctx.lock_device(id).await?;
        device.telemetry_interval_sec = interval;
        device.touch();
        self.ctx.store.save(&device)?;
        self.scheduler.arm(id, interval);
        self.ctx.notify(SimEvent::updated(serde_json::to_value(&device)?));
        Ok(device)
    }

    /// Overwrite a device's state outside of the kind reducer. Used by import.
    ///
    /// The state must still be readable by the device's kind.
    pub(crate) async fn set_state(&self, id: &str, state: &Value) -> Result<()> {
        let (_guard, device) = self.ctx.lock_device(id).await?;
        get_kind(&device.device_type)?.validate_state(state)?;
        if !self.ctx.store.set_state(id, state)? {
            return Err(not_found_err!(id));
        }
        self.ctx.publish_state(&device, state);
        self.ctx.notify_state(&device, state);
        Ok(())
    }

    /// Republish the discovery payload unconditionally.
    pub fn refresh_discovery(&self, id: &str) -> Result<()> {
        let device = self
            .ctx
            .store
            .find_one(id)?
            .ok_or_else(|| not_found_err!(id))?;
        self.ctx.publish_discovery(&device);
        Ok(())
    }

    /// Stop telemetry, clear the retained topics and delete the device.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let (guard, device) = self.ctx.lock_device(id).await?;

        self.scheduler.disarm(id);
        self.router.close_lane(id);
        self.ctx.retract(&device);
        self.ctx.store.delete(id)?;
        drop(guard);
        self.ctx.locks.forget(id);

        self.ctx
            .notify(SimEvent::deleted(device.id.clone(), device.device_type.clone()));
        info!(device_id = %id, "Removed {} '{}'", device.device_type, device.name);
        Ok(())
    }
}

impl Drop for DeviceService {
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}
