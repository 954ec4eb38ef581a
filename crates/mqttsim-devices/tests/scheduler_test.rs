//! Telemetry timers on tokio's paused clock.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;

use mqttsim_core::EventBus;
use mqttsim_devices::{
    CreateDevice, CreatedDevice, DeviceService, EngineOptions, MemoryTransport,
    StaticTemplateSource,
};
use mqttsim_storage::{DeviceStore, RedbDeviceStore};

fn setup(store: Arc<RedbDeviceStore>) -> (DeviceService, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::new());
    let service = DeviceService::new(
        store,
        transport.clone(),
        Arc::new(EventBus::new()),
        Arc::new(StaticTemplateSource::empty()),
        EngineOptions::default(),
    );
    (service, transport)
}

fn state_publishes(transport: &MemoryTransport, device: &CreatedDevice) -> usize {
    transport.published_to(&device.topics.state).len()
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_publishes_every_interval() {
    let (service, transport) = setup(Arc::new(RedbDeviceStore::in_memory().unwrap()));
    let plug = service
        .create_device(CreateDevice::new("switch", "Plug"))
        .await
        .unwrap();
    service.update_telemetry(&plug.device.id, 5).await.unwrap();
    transport.clear();

    sleep(Duration::from_millis(4_900)).await;
    assert_eq!(state_publishes(&transport, &plug), 0);

    sleep(Duration::from_millis(5_200)).await;
    // Unchanged state is still published as a heartbeat.
    let msgs = transport.published_to(&plug.topics.state);
    assert_eq!(msgs.len(), 2);
    assert!(msgs.iter().all(|m| m.retain));
    assert_eq!(msgs[1].payload.as_json(), Some(&json!({"state": "OFF"})));
    service.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_rearm_never_doubles_timers() {
    let (service, transport) = setup(Arc::new(RedbDeviceStore::in_memory().unwrap()));
    let plug = service
        .create_device(CreateDevice::new("switch", "Plug"))
        .await
        .unwrap();
    let id = plug.device.id.clone();

    service.update_telemetry(&id, 5).await.unwrap();
    service.update_telemetry(&id, 0).await.unwrap();
    assert!(!service.scheduler().is_armed(&id));
    transport.clear();
    sleep(Duration::from_secs(20)).await;
    assert_eq!(state_publishes(&transport, &plug), 0);

    service.update_telemetry(&id, 5).await.unwrap();
    service.update_telemetry(&id, 5).await.unwrap();
    assert_eq!(service.scheduler().armed_count(), 1);
    sleep(Duration::from_millis(5_500)).await;
    assert_eq!(state_publishes(&transport, &plug), 1);
    service.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_cover_runs_to_open_and_stops() {
    let store = Arc::new(RedbDeviceStore::in_memory().unwrap());
    let (service, _) = setup(store.clone());
    let cover = service
        .create_device(CreateDevice::new("cover", "Garage"))
        .await
        .unwrap();
    assert_eq!(cover.device.telemetry_interval_sec, 2);

    service
        .send_command(&cover.device.id, &json!({"action": "OPEN"}))
        .await
        .unwrap();

    sleep(Duration::from_millis(20_500)).await;
    let half = store.get_state(&cover.device.id).unwrap().unwrap();
    assert_eq!(half["position"], 50);
    assert_eq!(half["moving"], true);

    sleep(Duration::from_secs(20)).await;
    let done = store.get_state(&cover.device.id).unwrap().unwrap();
    assert_eq!(done["position"], 100);
    assert_eq!(done["moving"], false);
    assert_eq!(done["action"], "STOP");

    sleep(Duration::from_secs(10)).await;
    assert_eq!(store.get_state(&cover.device.id).unwrap().unwrap(), done);
    service.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_sensor_stays_in_range() {
    let store = Arc::new(RedbDeviceStore::in_memory().unwrap());
    let (service, _) = setup(store.clone());
    let mut caps = serde_json::Map::new();
    caps.insert("min".into(), json!(18.0));
    caps.insert("max".into(), json!(24.0));
    caps.insert("start".into(), json!(18.0));
    caps.insert("target".into(), json!(22.0));
    let sensor = service
        .create_device(CreateDevice::new("sensor.temp", "Office").with_capabilities(caps))
        .await
        .unwrap();

    for _ in 0..30 {
        sleep(Duration::from_secs(10)).await;
        let v = store.get_state(&sensor.device.id).unwrap().unwrap()["value"]
            .as_f64()
            .unwrap();
        assert!((18.0..=24.0).contains(&v), "{}", v);
    }
    service.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_removed_device_stops_ticking() {
    let (service, transport) = setup(Arc::new(RedbDeviceStore::in_memory().unwrap()));
    let sensor = service
        .create_device(CreateDevice::new("sensor.temp", "Attic"))
        .await
        .unwrap();
    service.remove(&sensor.device.id).await.unwrap();
    assert_eq!(service.scheduler().armed_count(), 0);

    transport.clear();
    sleep(Duration::from_secs(60)).await;
    assert!(transport.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_start_restores_timers() {
    let store = Arc::new(RedbDeviceStore::in_memory().unwrap());
    {
        let (service, _) = setup(store.clone());
        service
            .create_device(CreateDevice::new("cover", "Blind"))
            .await
            .unwrap();
        service
            .create_device(CreateDevice::new("light", "Lamp"))
            .await
            .unwrap();
        service.shutdown();
    }

    let (service, transport) = setup(store);
    assert_eq!(service.start().unwrap(), 1);
    assert_eq!(transport.subscription_count(), 1);
    // Discovery is retained at the broker and not republished on start.
    assert!(transport.published().is_empty());
    service.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_failing_tick_keeps_timer_and_republishes() {
    let store = Arc::new(RedbDeviceStore::in_memory().unwrap());
    let (service, transport) = setup(store.clone());
    let cover = service
        .create_device(CreateDevice::new("cover", "Jammed"))
        .await
        .unwrap();
    let jammed = json!({"position": "stuck", "action": "OPEN"});
    assert!(store.set_state(&cover.device.id, &jammed).unwrap());
    transport.clear();

    sleep(Duration::from_millis(4_500)).await;

    assert!(service.scheduler().is_armed(&cover.device.id));
    let msgs = transport.published_to(&cover.topics.state);
    assert_eq!(msgs.len(), 2);
    assert!(msgs.iter().all(|m| m.payload.as_json() == Some(&jammed)));
    assert_eq!(store.get_state(&cover.device.id).unwrap().unwrap(), jammed);
    service.shutdown();
}
