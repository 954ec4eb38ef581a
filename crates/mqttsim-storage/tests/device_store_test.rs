//! Device store behaviour against an on-disk database.

use mqttsim_storage::{Device, DeviceFilter, DeviceStore, Error, RedbDeviceStore};
use serde_json::{json, Map};

#[test]
fn test_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("devices.redb");

    let device = Device::new("cover", "Garage Door", Some("garage-door".into()), Map::new())
        .with_telemetry_interval(2);
    {
        let store = RedbDeviceStore::open(&path).unwrap();
        store
            .insert(&device, &json!({"position": 0, "action": "STOP", "moving": false}))
            .unwrap();
    }

    let store = RedbDeviceStore::open(&path).unwrap();
    let loaded = store.find_by_slug("cover", "garage-door").unwrap().unwrap();
    assert_eq!(loaded.id, device.id);
    assert_eq!(loaded.telemetry_interval_sec, 2);
    assert_eq!(
        store.get_state(&device.id).unwrap().unwrap()["action"],
        "STOP"
    );
}

#[test]
fn test_slug_index_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.redb");

    {
        let store = RedbDeviceStore::open(&path).unwrap();
        store
            .insert(
                &Device::new("switch", "Plug", Some("plug".into()), Map::new()),
                &json!({"state": "OFF"}),
            )
            .unwrap();
    }

    let store = RedbDeviceStore::open(&path).unwrap();
    let err = store
        .insert(
            &Device::new("switch", "Plug", Some("plug".into()), Map::new()),
            &json!({"state": "OFF"}),
        )
        .unwrap_err();
    assert!(matches!(err, Error::UniqueViolation(_)));
    assert_eq!(store.find(&DeviceFilter::by_type("switch")).unwrap().len(), 1);
}

#[test]
fn test_find_returns_oldest_first() {
    let store = RedbDeviceStore::in_memory().unwrap();
    let mut ids = Vec::new();
    for name in ["one", "two", "three"] {
        let device = Device::new("switch", name, Some(name.into()), Map::new());
        store.insert(&device, &json!({"state": "OFF"})).unwrap();
        ids.push(device.id);
        std::thread::sleep(std::time::Duration::from_millis(2));
    }

    let found: Vec<_> = store
        .find(&DeviceFilter::default())
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(found, ids);
}
