//! Device store using redb.
//!
//! Holds the device records, their simulated state and a unique index over
//! `(type, slug)`. A device and its initial state are written in one
//! transaction so a device never exists without its state row.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

// Devices table: key = device_id, value = Device (JSON)
const DEVICES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("devices");

// States table: key = device_id, value = state data (JSON)
const STATES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("device_states");

// Slug index: key = "{type}\x1f{slug}", value = device_id
const SLUG_INDEX_TABLE: TableDefinition<&str, &str> = TableDefinition::new("device_slug_index");

/// A simulated device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub name: String,
    /// Unique per type when set. Never changes after creation.
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub capabilities: Map<String, Value>,
    #[serde(default)]
    pub template_id: Option<String>,
    /// `0` disables telemetry.
    #[serde(default)]
    pub telemetry_interval_sec: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    /// Create a new device record with a fresh id.
    pub fn new(
        device_type: impl Into<String>,
        name: impl Into<String>,
        slug: Option<String>,
        capabilities: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            device_type: device_type.into(),
            name: name.into(),
            slug,
            capabilities,
            template_id: None,
            telemetry_interval_sec: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_template(mut self, template_id: Option<String>) -> Self {
        self.template_id = template_id;
        self
    }

    pub fn with_telemetry_interval(mut self, secs: u32) -> Self {
        self.telemetry_interval_sec = secs;
        self
    }

    /// Mark the record as modified now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Query filter for [`DeviceStore::find`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    pub device_type: Option<String>,
    pub slug: Option<String>,
}

impl DeviceFilter {
    pub fn by_type(device_type: impl Into<String>) -> Self {
        Self {
            device_type: Some(device_type.into()),
            slug: None,
        }
    }

    fn matches(&self, device: &Device) -> bool {
        if let Some(t) = &self.device_type {
            if &device.device_type != t {
                return false;
            }
        }
        if let Some(s) = &self.slug {
            if device.slug.as_ref() != Some(s) {
                return false;
            }
        }
        true
    }
}

/// Persistence contract for devices and their simulated state.
pub trait DeviceStore: Send + Sync {
    /// Devices matching `filter`, oldest first.
    fn find(&self, filter: &DeviceFilter) -> Result<Vec<Device>>;

    fn find_one(&self, id: &str) -> Result<Option<Device>>;

    fn find_by_slug(&self, device_type: &str, slug: &str) -> Result<Option<Device>>;

    /// Insert a new device together with its initial state.
    ///
    /// Fails with [`Error::UniqueViolation`] if the id or `(type, slug)` is
    /// already taken; nothing is written in that case.
    fn insert(&self, device: &Device, state: &Value) -> Result<()>;

    /// Overwrite an existing device record. Type and slug are not re-indexed.
    fn save(&self, device: &Device) -> Result<()>;

    /// Delete a device with its state. Returns `false` if it did not exist.
    fn delete(&self, id: &str) -> Result<bool>;

    fn get_state(&self, device_id: &str) -> Result<Option<Value>>;

    /// Replace a device's state. Returns `false` if the device does not exist.
    fn set_state(&self, device_id: &str, data: &Value) -> Result<bool>;
}

/// Shared device store handle.
pub type SharedDeviceStore = Arc<dyn DeviceStore>;

fn slug_key(device_type: &str, slug: &str) -> String {
    format!("{}\u{1f}{}", device_type, slug)
}

/// redb-backed [`DeviceStore`].
pub struct RedbDeviceStore {
    db: Database,
}

impl RedbDeviceStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Create a store that lives only in memory.
    pub fn in_memory() -> Result<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        let write_txn = db.begin_write()?;
        {
            let _devices = write_txn.open_table(DEVICES_TABLE)?;
            let _states = write_txn.open_table(STATES_TABLE)?;
            let _slugs = write_txn.open_table(SLUG_INDEX_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    fn load_device(&self, id: &str) -> Result<Option<Device>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEVICES_TABLE)?;
        match table.get(id)? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }
}

impl DeviceStore for RedbDeviceStore {
    fn find(&self, filter: &DeviceFilter) -> Result<Vec<Device>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEVICES_TABLE)?;

        let mut devices = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            match serde_json::from_str::<Device>(value.value()) {
                Ok(device) if filter.matches(&device) => devices.push(device),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable device record: {}", e),
            }
        }

        devices.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(devices)
    }

    fn find_one(&self, id: &str) -> Result<Option<Device>> {
        self.load_device(id)
    }

    fn find_by_slug(&self, device_type: &str, slug: &str) -> Result<Option<Device>> {
        let id = {
            let read_txn = self.db.begin_read()?;
            let index = read_txn.open_table(SLUG_INDEX_TABLE)?;
            let key = slug_key(device_type, slug);
            let id = index.get(key.as_str())?.map(|v| v.value().to_string());
            id
        };
        match id {
            Some(id) => self.load_device(&id),
            None => Ok(None),
        }
    }

    fn insert(&self, device: &Device, state: &Value) -> Result<()> {
        let device_json = serde_json::to_string(device)?;
        let state_json = serde_json::to_string(state)?;
        let index_key = device
            .slug
            .as_deref()
            .map(|slug| slug_key(&device.device_type, slug));

        let write_txn = self.db.begin_write()?;
        let conflict = {
            let mut devices = write_txn.open_table(DEVICES_TABLE)?;
            let mut states = write_txn.open_table(STATES_TABLE)?;
            let mut slugs = write_txn.open_table(SLUG_INDEX_TABLE)?;

            let id_taken = devices.get(device.id.as_str())?.is_some();
            let slug_taken = match &index_key {
                Some(key) => slugs.get(key.as_str())?.is_some(),
                None => false,
            };

            if id_taken {
                Some(format!("device id {} already exists", device.id))
            } else if slug_taken {
                Some(format!(
                    "slug '{}' already used by another {}",
                    device.slug.as_deref().unwrap_or_default(),
                    device.device_type
                ))
            } else {
                devices.insert(device.id.as_str(), device_json.as_str())?;
                states.insert(device.id.as_str(), state_json.as_str())?;
                if let Some(key) = &index_key {
                    slugs.insert(key.as_str(), device.id.as_str())?;
                }
                None
            }
        };

        if let Some(reason) = conflict {
            write_txn.abort()?;
            return Err(Error::UniqueViolation(reason));
        }
        write_txn.commit()?;
        Ok(())
    }

    fn save(&self, device: &Device) -> Result<()> {
        let json = serde_json::to_string(device)?;
        let write_txn = self.db.begin_write()?;
        let exists = {
            let mut devices = write_txn.open_table(DEVICES_TABLE)?;
            let exists = devices.get(device.id.as_str())?.is_some();
            if exists {
                devices.insert(device.id.as_str(), json.as_str())?;
            }
            exists
        };
        if !exists {
            write_txn.abort()?;
            return Err(Error::NotFound(device.id.clone()));
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut devices = write_txn.open_table(DEVICES_TABLE)?;
            let existing = devices.remove(id)?.map(|v| v.value().to_string());
            match existing {
                Some(json) => {
                    let device: Device = serde_json::from_str(&json)?;

                    let mut states = write_txn.open_table(STATES_TABLE)?;
                    states.remove(id)?;

                    if let Some(slug) = &device.slug {
                        let mut slugs = write_txn.open_table(SLUG_INDEX_TABLE)?;
                        let key = slug_key(&device.device_type, slug);
                        let owner = slugs.get(key.as_str())?.map(|v| v.value().to_string());
                        if owner.as_deref() == Some(id) {
                            slugs.remove(key.as_str())?;
                        }
                    }
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(removed)
    }

    fn get_state(&self, device_id: &str) -> Result<Option<Value>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STATES_TABLE)?;
        match table.get(device_id)? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    fn set_state(&self, device_id: &str, data: &Value) -> Result<bool> {
        let json = serde_json::to_string(data)?;
        let write_txn = self.db.begin_write()?;
        let exists = {
            let devices = write_txn.open_table(DEVICES_TABLE)?;
            let exists = devices.get(device_id)?.is_some();
            if exists {
                let mut states = write_txn.open_table(STATES_TABLE)?;
                states.insert(device_id, json.as_str())?;
            }
            exists
        };
        write_txn.commit()?;
        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_store() -> RedbDeviceStore {
        RedbDeviceStore::in_memory().unwrap()
    }

    fn light(slug: Option<&str>) -> Device {
        let mut caps = Map::new();
        caps.insert("brightness".into(), json!(true));
        Device::new("light", "Kitchen", slug.map(String::from), caps)
    }

    #[test]
    fn test_device_crud() {
        let store = create_store();
        let device = light(Some("kitchen"));

        store.insert(&device, &json!({"state": "OFF"})).unwrap();

        let loaded = store.find_one(&device.id).unwrap().unwrap();
        assert_eq!(loaded, device);
        assert_eq!(
            store.get_state(&device.id).unwrap(),
            Some(json!({"state": "OFF"}))
        );

        let mut renamed = loaded.clone();
        renamed.name = "Kitchen Ceiling".into();
        store.save(&renamed).unwrap();
        assert_eq!(
            store.find_one(&device.id).unwrap().unwrap().name,
            "Kitchen Ceiling"
        );

        assert!(store.delete(&device.id).unwrap());
        assert!(store.find_one(&device.id).unwrap().is_none());
        assert!(!store.delete(&device.id).unwrap());
    }

    #[test]
    fn test_slug_lookup_is_scoped_by_type() {
        let store = create_store();
        let device = light(Some("desk"));
        store.insert(&device, &json!({})).unwrap();

        assert_eq!(
            store.find_by_slug("light", "desk").unwrap().map(|d| d.id),
            Some(device.id)
        );
        assert!(store.find_by_slug("switch", "desk").unwrap().is_none());

        let switch = Device::new("switch", "Desk", Some("desk".into()), Map::new());
        store.insert(&switch, &json!({"state": "OFF"})).unwrap();
    }

    #[test]
    fn test_duplicate_slug_writes_nothing() {
        let store = create_store();
        store.insert(&light(Some("hall")), &json!({})).unwrap();

        let dup = light(Some("hall"));
        let err = store.insert(&dup, &json!({})).unwrap_err();
        assert!(matches!(err, Error::UniqueViolation(_)));
        assert!(store.find_one(&dup.id).unwrap().is_none());
        assert!(store.get_state(&dup.id).unwrap().is_none());
    }

    #[test]
    fn test_devices_without_slug_do_not_collide() {
        let store = create_store();
        store.insert(&light(None), &json!({})).unwrap();
        store.insert(&light(None), &json!({})).unwrap();
        assert_eq!(store.find(&DeviceFilter::default()).unwrap().len(), 2);
    }

    #[test]
    fn test_delete_cascades_state_and_frees_slug() {
        let store = create_store();
        let device = light(Some("porch"));
        store.insert(&device, &json!({"state": "ON"})).unwrap();

        store.delete(&device.id).unwrap();
        assert!(store.get_state(&device.id).unwrap().is_none());
        assert!(store.find_by_slug("light", "porch").unwrap().is_none());

        store.insert(&light(Some("porch")), &json!({})).unwrap();
    }

    #[test]
    fn test_set_state_requires_device() {
        let store = create_store();
        assert!(!store.set_state("missing", &json!({"state": "ON"})).unwrap());
        assert!(store.get_state("missing").unwrap().is_none());
    }

    #[test]
    fn test_save_unknown_device() {
        let store = create_store();
        let err = store.save(&light(None)).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_find_filters() {
        let store = create_store();
        store.insert(&light(Some("a")), &json!({})).unwrap();
        store.insert(&light(Some("b")), &json!({})).unwrap();
        store
            .insert(&Device::new("fan", "Fan", None, Map::new()), &json!({}))
            .unwrap();

        assert_eq!(store.find(&DeviceFilter::by_type("light")).unwrap().len(), 2);
        let filter = DeviceFilter {
            device_type: Some("light".into()),
            slug: Some("b".into()),
        };
        let found = store.find(&filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].slug.as_deref(), Some("b"));
    }

    #[test]
    fn test_device_serializes_camel_case() {
        let device = light(Some("x")).with_telemetry_interval(5);
        let v = serde_json::to_value(&device).unwrap();
        assert_eq!(v["type"], "light");
        assert_eq!(v["telemetryIntervalSec"], 5);
        assert!(v["templateId"].is_null());
        assert!(v.get("createdAt").is_some());
    }
}
