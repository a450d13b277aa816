//! End-to-end tests driving the engine through the loopback transport
//! with tokio's paused clock.

use blesim::transport::{self, ReadResponse};
use blesim::{DeviceConfiguration, EngineEvent, Error, Simulator};
use futures::StreamExt;
use uuid::Uuid;

const SERVICE_UUID: &str = "e20a39f4-73f5-4bc4-a12f-17d1ad07a961";
const TELEMETRY_UUID: &str = "08590f7e-db05-467e-8757-72f6faeb13d5";
const LIDAR_UUID: &str = "08590f7e-db05-467e-8757-72f6faeb13d6";
const BATTERY_UUID: &str = "08590f7e-db05-467e-8757-72f6faeb13d7";
const DEVICE_INFO_UUID: &str = "08590f7e-db05-467e-8757-72f6faeb13d4";

fn config_with(
    characteristics: serde_json::Value,
    data_streams: serde_json::Value,
) -> DeviceConfiguration {
    let document = serde_json::json!({
        "device_config": {
            "name": "Bench Sensor",
            "manufacturer": "Acme",
            "model": "BS-1",
            "serial_number": "0001"
        },
        "ble_config": {
            "advertised_name": "BenchSensor",
            "service_uuid": SERVICE_UUID,
            "characteristics": characteristics
        },
        "data_config": {
            "update_interval_seconds": 1.0,
            "data_format": "json",
            "auto_cycle": true,
            "randomize_values": false,
            "randomize_range": 0.1
        },
        "data_streams": data_streams
    });

    DeviceConfiguration::parse(&serde_json::to_vec(&document).unwrap()).unwrap()
}

fn telemetry_config() -> DeviceConfiguration {
    config_with(
        serde_json::json!([{
            "uuid": TELEMETRY_UUID,
            "name": "Telemetry",
            "properties": ["read", "notify"],
            "permissions": ["readable"],
            "data_key": "telemetry"
        }]),
        serde_json::json!({
            "telemetry": { "type": "array", "data": [{"v": 10}, {"v": 20}] }
        }),
    )
}

#[tokio::test(start_paused = true)]
async fn array_stream_cycles_through_payloads() {
    let (adapter, mut central) = transport::loopback();
    let mut simulator = Simulator::new();
    simulator.start(telemetry_config(), adapter).await.unwrap();

    let mut payloads = Vec::new();
    for _ in 0..3 {
        let (_, payload) = central.next_notification().await.unwrap();
        payloads.push(payload);
    }

    assert_eq!(payloads[0], br#"{"v":10}"#);
    assert_eq!(payloads[1], br#"{"v":20}"#);
    assert_eq!(payloads[2], br#"{"v":10}"#);

    simulator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn battery_is_rate_limited_to_one_dispatch_per_window() {
    let config = config_with(
        serde_json::json!([
            {
                "uuid": TELEMETRY_UUID,
                "name": "Telemetry",
                "properties": ["notify"],
                "permissions": ["readable"],
                "data_key": "telemetry"
            },
            {
                "uuid": BATTERY_UUID,
                "name": "Battery",
                "properties": ["notify"],
                "permissions": ["readable"],
                "data_key": "battery_info"
            }
        ]),
        serde_json::json!({
            "telemetry": { "type": "array", "data": [{"v": 1}] },
            "battery_info": { "type": "object", "data": { "level_pct": 87 } }
        }),
    );

    let (adapter, mut central) = transport::loopback();
    let mut simulator = Simulator::new();
    simulator.start(config, adapter).await.unwrap();

    let battery_uuid = Uuid::parse_str(BATTERY_UUID).unwrap();
    let mut telemetry_seen = 0;
    let mut battery_seen = 0;

    // 62 one-second ticks: the battery goes out on the first tick and
    // again on tick 61, once the 60 second window has elapsed.
    while telemetry_seen < 62 {
        let (uuid, _) = central.next_notification().await.unwrap();
        if uuid == battery_uuid {
            battery_seen += 1;
        } else {
            telemetry_seen += 1;
        }
    }

    assert_eq!(battery_seen, 2);

    simulator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn encode_failure_does_not_abort_the_tick() {
    let config = config_with(
        serde_json::json!([
            {
                "uuid": LIDAR_UUID,
                "name": "Lidar",
                "properties": ["notify"],
                "permissions": ["readable"],
                "data_key": "lidar_measurements"
            },
            {
                "uuid": TELEMETRY_UUID,
                "name": "Telemetry",
                "properties": ["notify"],
                "permissions": ["readable"],
                "data_key": "telemetry"
            }
        ]),
        serde_json::json!({
            // Wrong shape: the distances field is missing entirely.
            "lidar_measurements": { "type": "array", "data": [{"bogus": 1}] },
            "telemetry": { "type": "array", "data": [{"v": 1}] }
        }),
    );

    let (adapter, mut central) = transport::loopback();
    let mut simulator = Simulator::new();
    simulator.start(config, adapter).await.unwrap();

    let telemetry_uuid = Uuid::parse_str(TELEMETRY_UUID).unwrap();
    for _ in 0..3 {
        let (uuid, _) = central.next_notification().await.unwrap();
        assert_eq!(uuid, telemetry_uuid);
    }

    simulator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn lidar_frames_are_fixed_width() {
    let config = config_with(
        serde_json::json!([{
            "uuid": LIDAR_UUID,
            "name": "Lidar",
            "properties": ["notify"],
            "permissions": ["readable"],
            "data_key": "lidar_measurements"
        }]),
        serde_json::json!({
            "lidar_measurements": {
                "type": "array",
                "data": [{ "distances_mm": [70000, -5, 300] }]
            }
        }),
    );

    let (adapter, mut central) = transport::loopback();
    let mut simulator = Simulator::new();
    simulator.start(config, adapter).await.unwrap();

    let (_, frame) = central.next_notification().await.unwrap();
    assert_eq!(frame.len(), 40);
    assert_eq!(&frame[..6], &[0xFF, 0xFF, 0x00, 0x00, 0x2C, 0x01]);
    assert!(frame[6..].iter().all(|byte| *byte == 0));

    simulator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn subscriber_count_is_clamped_at_zero() {
    // No data streams, so only subscription events flow.
    let config = config_with(
        serde_json::json!([{
            "uuid": TELEMETRY_UUID,
            "name": "Telemetry",
            "properties": ["notify"],
            "permissions": ["readable"],
            "data_key": "telemetry"
        }]),
        serde_json::json!({}),
    );

    let (adapter, central) = transport::loopback();
    let mut simulator = Simulator::new();
    let mut events = simulator.event_stream();
    simulator.start(config, adapter).await.unwrap();

    let uuid = Uuid::parse_str(TELEMETRY_UUID).unwrap();
    central.subscribe(uuid);
    central.unsubscribe(uuid);
    central.unsubscribe(uuid);
    central.unsubscribe(uuid);
    central.subscribe(uuid);

    let mut counts = Vec::new();
    while counts.len() < 5 {
        match events.next().await.unwrap() {
            EngineEvent::Subscribed { subscribers, .. }
            | EngineEvent::Unsubscribed { subscribers, .. } => counts.push(subscribers),
            _ => {}
        }
    }

    assert_eq!(counts, vec![1, 0, 0, 0, 1]);

    simulator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn read_requests_slice_the_stored_payload() {
    let long_text = "x".repeat(600);
    let config = config_with(
        serde_json::json!([
            {
                "uuid": DEVICE_INFO_UUID,
                "name": "Device Information",
                "properties": ["read"],
                "permissions": ["readable"],
                "data_key": "device_info"
            },
            {
                "uuid": TELEMETRY_UUID,
                "name": "Telemetry",
                "properties": ["read", "notify"],
                "permissions": ["readable"],
                "data_key": "telemetry"
            },
            {
                "uuid": LIDAR_UUID,
                "name": "Orphan",
                "properties": ["read"],
                "permissions": ["readable"],
                "data_key": "no_such_stream"
            }
        ]),
        serde_json::json!({
            "telemetry": { "type": "array", "data": [{ "text": long_text }] }
        }),
    );

    let (adapter, mut central) = transport::loopback();
    let mut simulator = Simulator::new();
    simulator.start(config, adapter).await.unwrap();

    // The device info payload is preloaded and readable before any tick.
    let device_info_uuid = Uuid::parse_str(DEVICE_INFO_UUID).unwrap();
    match central.read(device_info_uuid, 0).await {
        ReadResponse::Value(payload) => {
            let record: serde_json::Value = serde_json::from_slice(&payload).unwrap();
            assert_eq!(record["manufacturer"], "Acme");
            assert_eq!(record["ble_identifier"], "Acme-BS-1");
        }
        other => panic!("unexpected response: {:?}", other),
    }

    // Wait for one telemetry dispatch so a payload is stored.
    let telemetry_uuid = Uuid::parse_str(TELEMETRY_UUID).unwrap();
    let (_, payload) = central.next_notification().await.unwrap();
    assert!(payload.len() > 512);

    match central.read(telemetry_uuid, 0).await {
        ReadResponse::Value(chunk) => assert_eq!(chunk.len(), 512),
        other => panic!("unexpected response: {:?}", other),
    }

    match central.read(telemetry_uuid, 512).await {
        ReadResponse::Value(chunk) => assert_eq!(chunk, payload[512..].to_vec()),
        other => panic!("unexpected response: {:?}", other),
    }

    assert_eq!(
        central.read(telemetry_uuid, payload.len() + 1).await,
        ReadResponse::InvalidOffset
    );

    // A characteristic whose stream never produced anything has no value.
    let orphan_uuid = Uuid::parse_str(LIDAR_UUID).unwrap();
    assert_eq!(central.read(orphan_uuid, 0).await, ReadResponse::NotFound);

    // And an unknown characteristic is not found either.
    assert_eq!(
        central.read(Uuid::new_v4(), 0).await,
        ReadResponse::NotFound
    );

    simulator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn dispatch_failure_is_retried_on_the_next_tick() {
    let (adapter, central) = transport::loopback();
    central.set_notify_success(false);

    let mut simulator = Simulator::new();
    let mut events = simulator.event_stream();
    simulator.start(telemetry_config(), adapter).await.unwrap();

    loop {
        if let EngineEvent::DispatchFailed { data_key } = events.next().await.unwrap() {
            assert_eq!(data_key, "telemetry");
            break;
        }
    }

    central.set_notify_success(true);

    loop {
        if let EngineEvent::Notified { data_key, .. } = events.next().await.unwrap() {
            assert_eq!(data_key, "telemetry");
            break;
        }
    }

    simulator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent_and_acknowledged() {
    let mut simulator = Simulator::new();

    // Stopping an idle simulator is a no-op.
    simulator.stop().await;
    assert!(!simulator.is_running());

    let (adapter, central) = transport::loopback();
    simulator.start(telemetry_config(), adapter).await.unwrap();
    assert!(simulator.is_running());

    simulator.stop().await;
    assert!(!simulator.is_running());
    assert!(central.advertising_stopped());

    // And stopping again stays a no-op.
    simulator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn restart_replaces_the_running_session() {
    let (first_adapter, first_central) = transport::loopback();
    let mut simulator = Simulator::new();
    simulator
        .start(telemetry_config(), first_adapter)
        .await
        .unwrap();

    let mut config = telemetry_config();
    config.ble_config.advertised_name = "BenchSensorMk2".to_string();

    let (second_adapter, second_central) = transport::loopback();
    simulator.start(config, second_adapter).await.unwrap();

    // The previous session was stopped before the new one registered.
    assert!(first_central.advertising_stopped());
    assert_eq!(
        second_central.registered_service().unwrap().advertised_name,
        "BenchSensorMk2"
    );
    assert!(simulator.is_running());

    simulator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn start_rejects_a_mutated_invalid_configuration() {
    // A parsed configuration can be edited before start; bad values must
    // come back as errors instead of killing the session task mid-tick.
    let mut config = telemetry_config();
    config.data_config.randomize_values = true;
    config.data_config.randomize_range = -0.1;

    let (adapter, _central) = transport::loopback();
    let mut simulator = Simulator::new();
    let result = simulator.start(config, adapter).await;

    assert!(matches!(result, Err(Error::Config(_))));
    assert!(!simulator.is_running());

    let mut config = telemetry_config();
    config.data_config.update_interval_seconds = 1e30;

    let (adapter, _central) = transport::loopback();
    let result = simulator.start(config, adapter).await;

    assert!(matches!(result, Err(Error::Config(_))));
    assert!(!simulator.is_running());
}

#[tokio::test(start_paused = true)]
async fn registration_failure_leaves_the_simulator_idle() {
    let (adapter, central) = transport::loopback();
    central.reject_registration("radio unavailable");

    let mut simulator = Simulator::new();
    let result = simulator.start(telemetry_config(), adapter).await;

    assert!(matches!(result, Err(Error::Transport(_))));
    assert!(!simulator.is_running());
}
