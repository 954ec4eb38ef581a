//! Snapshot export and upsert import.
//!
//! The export format doubles as import input: an [`ExportSnapshot`] read back
//! from disk deserializes into an [`ImportPayload`] (its extra fields are
//! ignored).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use mqttsim_core::{validation_err, Error, Result};
use mqttsim_storage::{Device, DeviceFilter};

use crate::kinds::{get_kind, Capabilities};
use crate::service::{merge_caps, CreateDevice, DevicePatch, DeviceService};
use crate::topics::DeviceTopics;

pub const SNAPSHOT_VERSION: u32 = 1;

/// One device in a snapshot or import payload.
///
/// Every field is optional on input so malformed entries can be reported
/// individually instead of failing the whole payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedDevice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry_interval_sec: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<DeviceTopics>,
}

impl ExportedDevice {
    /// Reason the entry can be neither matched nor created, if any.
    fn rejection(&self) -> Option<&'static str> {
        if self.device_type.as_deref().map_or(true, str::is_empty) {
            return Some("type missing");
        }
        let has_slug = self.slug.as_deref().is_some_and(|s| !s.is_empty());
        let has_id = self.id.as_deref().is_some_and(|s| !s.is_empty());
        if !has_slug && !has_id {
            return Some("slug or id required");
        }
        if self.telemetry_interval_sec.is_some_and(|t| t < 0) {
            return Some("telemetryIntervalSec must be >= 0");
        }
        None
    }

    /// State override, if the entry carries a non-empty object.
    fn state_override(&self) -> Option<&Value> {
        self.state
            .as_ref()
            .filter(|s| s.as_object().is_some_and(|o| !o.is_empty()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSnapshot {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub namespace: String,
    pub count: usize,
    pub devices: Vec<ExportedDevice>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPayload {
    /// Only `upsert` is supported.
    #[serde(default)]
    pub mode: Option<String>,
    /// Delete stored devices whose `(type, slug)` is not in the payload.
    #[serde(default)]
    pub replace_all: bool,
    #[serde(default)]
    pub devices: Vec<ExportedDevice>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportAction {
    Created,
    Updated,
    Unchanged,
    Deleted,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportDetail {
    /// Position in the payload; absent for replace-all deletions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub action: ImportAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub errors: usize,
    pub details: Vec<ImportDetail>,
}

impl ImportReport {
    fn record(&mut self, index: Option<usize>, id: Option<String>, action: ImportAction) {
        match action {
            ImportAction::Created => self.created += 1,
            ImportAction::Updated => self.updated += 1,
            ImportAction::Unchanged => self.unchanged += 1,
            ImportAction::Deleted => self.deleted += 1,
            ImportAction::Error => self.errors += 1,
        }
        self.details.push(ImportDetail {
            index,
            id,
            action,
            error: None,
        });
    }

    fn record_error(&mut self, index: usize, id: Option<String>, error: String) {
        self.errors += 1;
        self.details.push(ImportDetail {
            index: Some(index),
            id,
            action: ImportAction::Error,
            error: Some(error),
        });
    }

    /// `Err(PartialImportFailure)` when any entry failed.
    pub fn check(&self) -> Result<()> {
        if self.errors > 0 {
            Err(Error::PartialImportFailure {
                errors: self.errors,
            })
        } else {
            Ok(())
        }
    }
}

fn slug_key(device_type: &str, slug: &str) -> (String, String) {
    (device_type.to_string(), slug.to_string())
}

impl DeviceService {
    /// Snapshot of every device with its state and topics. No side effects.
    pub fn export_all(&self) -> Result<ExportSnapshot> {
        let devices = self.ctx.store.find(&DeviceFilter::default())?;
        let mut exported = Vec::with_capacity(devices.len());
        for device in devices {
            let state = self
                .ctx
                .store
                .get_state(&device.id)?
                .unwrap_or_else(|| Value::Object(Default::default()));
            let topics = self.topics().device(&device.device_type, &device.id);
            exported.push(ExportedDevice {
                id: Some(device.id),
                device_type: Some(device.device_type),
                name: Some(device.name),
                slug: device.slug,
                template_id: device.template_id,
                capabilities: Some(device.capabilities),
                telemetry_interval_sec: Some(i64::from(device.telemetry_interval_sec)),
                state: Some(state),
                created_at: Some(device.created_at),
                updated_at: Some(device.updated_at),
                topics: Some(topics),
            });
        }

        Ok(ExportSnapshot {
            version: SNAPSHOT_VERSION,
            exported_at: Utc::now(),
            namespace: self.topics().namespace().to_string(),
            count: exported.len(),
            devices: exported,
        })
    }

    /// Upsert every entry of `payload` and report what happened to each.
    ///
    /// A failing entry is recorded in the report and never aborts the batch.
    pub async fn import_all(&self, payload: ImportPayload) -> Result<ImportReport> {
        if let Some(mode) = payload.mode.as_deref() {
            if mode != "upsert" {
                return Err(validation_err!("unsupported import mode '{}'", mode));
            }
        }

        let mut report = ImportReport::default();
        let mut incoming: HashSet<(String, String)> = HashSet::new();
        // Devices this import created or matched are kept by replace-all.
        let mut touched: HashSet<String> = HashSet::new();

        for (index, entry) in payload.devices.iter().enumerate() {
            if let Some(reason) = entry.rejection() {
                report.record_error(index, entry.id.clone(), reason.to_string());
                continue;
            }
            if let (Some(t), Some(s)) = (&entry.device_type, &entry.slug) {
                incoming.insert(slug_key(t, s));
            }

            match self.import_entry(entry).await {
                Ok((device_id, action)) => {
                    touched.insert(device_id.clone());
                    report.record(Some(index), Some(device_id), action);
                }
                Err(e) => {
                    warn!("Import entry {} failed: {}", index, e);
                    report.record_error(index, entry.id.clone(), e.to_string());
                }
            }
        }

        if payload.replace_all {
            for device in self.ctx.store.find(&DeviceFilter::default())? {
                let Some(slug) = &device.slug else { continue };
                if touched.contains(&device.id)
                    || incoming.contains(&slug_key(&device.device_type, slug))
                {
                    continue;
                }
                match self.remove(&device.id).await {
                    Ok(()) => report.record(None, Some(device.id), ImportAction::Deleted),
                    Err(Error::NotFound(_)) => {}
                    Err(e) => warn!(device_id = %device.id, "Replace-all delete failed: {}", e),
                }
            }
        }

        info!(
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            deleted = report.deleted,
            errors = report.errors,
            "Import finished"
        );
        Ok(report)
    }

    async fn import_entry(&self, entry: &ExportedDevice) -> Result<(String, ImportAction)> {
        let device_type = entry.device_type.as_deref().unwrap_or_default();
        let kind = get_kind(device_type)?;
        // Reject a bad state override before anything is written.
        if let Some(state) = entry.state_override() {
            kind.validate_state(state)?;
        }

        let mut existing = None;
        if let Some(slug) = entry.slug.as_deref().filter(|s| !s.is_empty()) {
            existing = self.ctx.store.find_by_slug(kind.id(), slug)?;
        }
        if existing.is_none() {
            if let Some(id) = entry.id.as_deref().filter(|s| !s.is_empty()) {
                existing = self.ctx.store.find_one(id)?;
                if let Some(found) = &existing {
                    if found.device_type != kind.id() {
                        return Err(validation_err!(
                            "device {} is a {}, not a {}",
                            id,
                            found.device_type,
                            kind.id()
                        ));
                    }
                }
            }
        }

        match existing {
            None => self.import_create(entry, device_type).await,
            Some(device) => self.import_update(entry, device).await,
        }
    }

    async fn import_create(
        &self,
        entry: &ExportedDevice,
        device_type: &str,
    ) -> Result<(String, ImportAction)> {
        let req = CreateDevice {
            device_type: device_type.to_string(),
            name: entry.name.clone().unwrap_or_default(),
            slug: entry.slug.clone().filter(|s| !s.is_empty()),
            capabilities: entry.capabilities.clone(),
            template_id: entry.template_id.clone(),
        };
        let created = self.create_inner(req, false).await?;
        let id = created.device.id;
        if created.existed {
            // Only reachable when another writer created the slug meanwhile.
            return Ok((id, ImportAction::Unchanged));
        }

        if let Some(secs) = entry.telemetry_interval_sec {
            if secs != i64::from(created.device.telemetry_interval_sec) {
                self.update_telemetry(&id, secs).await?;
            }
        }
        if let Some(state) = entry.state_override() {
            self.set_state(&id, state).await?;
        }
        Ok((id, ImportAction::Created))
    }

    async fn import_update(
        &self,
        entry: &ExportedDevice,
        existing: Device,
    ) -> Result<(String, ImportAction)> {
        let mut patch = DevicePatch::default();

        if let Some(name) = entry.name.as_deref().map(str::trim) {
            if !name.is_empty() && name != existing.name {
                patch.name = Some(name.to_string());
            }
        }
        if let Some(template_id) = &entry.template_id {
            if existing.template_id.as_ref() != Some(template_id) {
                patch.template_id = Some(template_id.clone());
            }
        }
        if let Some(caps) = &entry.capabilities {
            let mut merged = existing.capabilities.clone();
            merge_caps(&mut merged, caps);
            if merged != existing.capabilities {
                patch.capabilities = Some(caps.clone());
            }
        }

        let mut changed = false;
        if patch.name.is_some() || patch.template_id.is_some() || patch.capabilities.is_some() {
            self.update_device(&existing.id, patch).await?;
            changed = true;
        }

        if let Some(secs) = entry.telemetry_interval_sec {
            if secs != i64::from(existing.telemetry_interval_sec) {
                self.update_telemetry(&existing.id, secs).await?;
                changed = true;
            }
        }

        if let Some(state) = entry.state_override() {
            let current = self.ctx.store.get_state(&existing.id)?;
            if current.as_ref() != Some(state) {
                self.set_state(&existing.id, state).await?;
                changed = true;
            }
        }

        let action = if changed {
            ImportAction::Updated
        } else {
            ImportAction::Unchanged
        };
        Ok((existing.id, action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(v: Value) -> ExportedDevice {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_entry_rejection() {
        assert_eq!(entry(json!({"slug": "a"})).rejection(), Some("type missing"));
        assert_eq!(
            entry(json!({"type": "light", "name": "x"})).rejection(),
            Some("slug or id required")
        );
        assert_eq!(
            entry(json!({"type": "light", "slug": "a", "telemetryIntervalSec": -1})).rejection(),
            Some("telemetryIntervalSec must be >= 0")
        );
        assert_eq!(entry(json!({"type": "light", "id": "abc"})).rejection(), None);
    }

    #[test]
    fn test_empty_state_is_not_an_override() {
        assert!(entry(json!({"state": {}})).state_override().is_none());
        assert!(entry(json!({"state": "ON"})).state_override().is_none());
        assert!(entry(json!({"state": {"state": "ON"}})).state_override().is_some());
    }

    #[test]
    fn test_snapshot_reads_back_as_payload() {
        let snapshot = json!({
            "version": 1,
            "exportedAt": "2024-01-01T00:00:00Z",
            "namespace": "sim",
            "count": 1,
            "devices": [{"id": "d1", "type": "switch", "name": "Plug", "slug": "plug"}]
        });
        let payload: ImportPayload = serde_json::from_value(snapshot).unwrap();
        assert!(!payload.replace_all);
        assert_eq!(payload.devices.len(), 1);
        assert_eq!(payload.devices[0].device_type.as_deref(), Some("switch"));
    }

    #[test]
    fn test_report_check() {
        let mut report = ImportReport::default();
        report.record(Some(0), Some("a".into()), ImportAction::Created);
        assert!(report.check().is_ok());

        report.record_error(1, None, "type missing".into());
        assert!(matches!(
            report.check(),
            Err(Error::PartialImportFailure { errors: 1 })
        ));
        assert_eq!(report.details[1].action, ImportAction::Error);
    }
}
