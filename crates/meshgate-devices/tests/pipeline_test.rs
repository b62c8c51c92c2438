//! Report ingestion tests: decoding, merging and change events.

use std::sync::Arc;

use meshgate_core::{ChangeSource, GatewayEvent};
use meshgate_devices::builtin_models::EFLORA_PRO;
use meshgate_devices::{
    clusters, AttributeReport, DeviceId, FieldValue, Gateway, GatewayConfig, GatewayError,
    MemoryEndpoint, SchemaRegistry, WireValue,
};

const DEVICE: &str = "0x00124b0001a2b3c4";

async fn joined_gateway() -> (Gateway, Arc<MemoryEndpoint>) {
    let endpoint = Arc::new(MemoryEndpoint::new());
    let registry = SchemaRegistry::with_builtin_models().unwrap();
    let gateway = Gateway::new(registry, endpoint.clone(), GatewayConfig::default());
    gateway.join(DEVICE, EFLORA_PRO).await.unwrap();
    (gateway, endpoint)
}

fn report_delay_report(minutes: u16) -> AttributeReport {
    AttributeReport::new(DEVICE, 1).with_record(
        clusters::GEN_POWER_CFG,
        0x0201,
        WireValue::Unsigned16(minutes),
    )
}

#[tokio::test]
async fn test_report_updates_state() {
    let (gateway, _) = joined_gateway().await;
    let device = DeviceId::from(DEVICE);

    let changed = gateway.ingest(&report_delay_report(30)).unwrap();
    assert_eq!(changed.into_iter().collect::<Vec<_>>(), vec!["report_delay"]);

    let state = gateway.state(&device).unwrap();
    assert_eq!(state.model, EFLORA_PRO);
    assert_eq!(state.get("report_delay"), Some(&FieldValue::Integer(30)));
    assert!(state.last_updated.is_some());
}

#[tokio::test]
async fn test_repeated_report_is_idempotent() {
    let (gateway, _) = joined_gateway().await;
    let mut rx = gateway.events().filter().state_events();

    let report = report_delay_report(30);
    gateway.ingest(&report).unwrap();
    let first = gateway.state(&DeviceId::from(DEVICE)).unwrap();

    let mut repeat = report_delay_report(30);
    repeat.received_at = report.received_at + chrono::Duration::seconds(60);
    let changed = gateway.ingest(&repeat).unwrap();
    let second = gateway.state(&DeviceId::from(DEVICE)).unwrap();

    assert!(changed.is_empty());
    assert_eq!(first.fields, second.fields);
    // The device is still alive even though nothing changed.
    assert_eq!(first.last_updated, Some(report.received_at));
    assert_eq!(second.last_updated, Some(repeat.received_at));

    let mut events = 0;
    while rx.try_recv().is_some() {
        events += 1;
    }
    assert_eq!(events, 1);
}

#[tokio::test]
async fn test_state_changed_event_fields() {
    let (gateway, _) = joined_gateway().await;
    let mut rx = gateway.events().filter().state_events();

    gateway.ingest(&report_delay_report(45)).unwrap();

    let (event, meta) = rx.try_recv().unwrap();
    match event {
        GatewayEvent::StateChanged {
            device_id,
            field,
            value,
            source,
            ..
        } => {
            assert_eq!(device_id.as_str(), DEVICE);
            assert_eq!(field, "report_delay");
            assert_eq!(value, FieldValue::Integer(45));
            assert_eq!(source, ChangeSource::Report);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(meta.source, "ingest");
}

#[tokio::test]
async fn test_scaled_and_unmapped_records() {
    let (gateway, _) = joined_gateway().await;

    let report = AttributeReport::new(DEVICE, 2)
        .with_record(
            clusters::MS_TEMPERATURE_MEASUREMENT,
            0x0000,
            WireValue::Signed16(2345),
        )
        .with_record(clusters::MS_RELATIVE_HUMIDITY, 0x0000, WireValue::Unsigned16(5120))
        .with_record(clusters::GEN_BASIC, 0x7fff, WireValue::Unsigned8(9));

    let changed = gateway.ingest(&report).unwrap();
    assert_eq!(changed.len(), 2);

    let state = gateway.state(&DeviceId::from(DEVICE)).unwrap();
    assert_eq!(state.get("temperature"), Some(&FieldValue::Float(23.45)));
    assert_eq!(state.get("humidity"), Some(&FieldValue::Float(51.2)));
    assert_eq!(state.fields.len(), 2);
}

#[tokio::test]
async fn test_derived_and_converted_power_fields() {
    let (gateway, _) = joined_gateway().await;
    let mut rx = gateway.events().filter().state_events();

    let power = AttributeReport::new(DEVICE, 1)
        .with_record(clusters::GEN_POWER_CFG, 0x0020, WireValue::Unsigned8(30))
        .with_record(clusters::GEN_POWER_CFG, 0x003e, WireValue::Bitmap32(0x0000_0001));
    let light = AttributeReport::new(DEVICE, 2).with_record(
        clusters::MS_ILLUMINANCE_MEASUREMENT,
        0x0000,
        WireValue::Unsigned16(20_001),
    );

    gateway.ingest(&power).unwrap();
    let changed = gateway.ingest(&light).unwrap();
    assert_eq!(
        changed.into_iter().collect::<Vec<_>>(),
        vec!["illuminance", "illuminance_lux"]
    );

    let state = gateway.state(&DeviceId::from(DEVICE)).unwrap();
    assert_eq!(state.get("battery_voltage"), Some(&FieldValue::Float(3000.0)));
    assert_eq!(state.get("battery_alarm_state"), Some(&FieldValue::Integer(1)));
    assert_eq!(state.get("battery_low"), Some(&FieldValue::Boolean(true)));
    assert_eq!(state.get("illuminance"), Some(&FieldValue::Integer(20_001)));
    assert_eq!(state.get("illuminance_lux"), Some(&FieldValue::Float(100.0)));

    let mut events = 0;
    while rx.try_recv().is_some() {
        events += 1;
    }
    assert_eq!(events, 5);

    // Alarm bits outside the battery masks do not raise the flag.
    let cleared = AttributeReport::new(DEVICE, 1).with_record(
        clusters::GEN_POWER_CFG,
        0x003e,
        WireValue::Bitmap32(0x0000_0010),
    );
    gateway.ingest(&cleared).unwrap();
    let state = gateway.state(&DeviceId::from(DEVICE)).unwrap();
    assert_eq!(state.get("battery_low"), Some(&FieldValue::Boolean(false)));
}

#[tokio::test]
async fn test_value_reinterpreted_under_declared_type() {
    let (gateway, _) = joined_gateway().await;

    // Delivered unsigned, declared signed: 0xfff6 is -10 raw.
    let report = AttributeReport::new(DEVICE, 2).with_record(
        clusters::MS_TEMPERATURE_MEASUREMENT,
        0x0000,
        WireValue::Unsigned16(0xfff6),
    );
    gateway.ingest(&report).unwrap();

    let state = gateway.state(&DeviceId::from(DEVICE)).unwrap();
    assert_eq!(state.get("temperature"), Some(&FieldValue::Float(-0.1)));
}

#[tokio::test]
async fn test_oversized_value_dropped() {
    let (gateway, _) = joined_gateway().await;

    // invert is uint8; a 16-bit value above 255 cannot be reinterpreted.
    let report = AttributeReport::new(DEVICE, 1)
        .with_record(clusters::GEN_BASIC, 0xf004, WireValue::Unsigned16(0x0100))
        .with_record(clusters::GEN_BASIC, 0x0500, WireValue::Unsigned16(3012));

    let changed = gateway.ingest(&report).unwrap();
    assert_eq!(changed.into_iter().collect::<Vec<_>>(), vec!["bat_adc"]);
}

#[tokio::test]
async fn test_partial_report_keeps_other_fields() {
    let (gateway, _) = joined_gateway().await;

    gateway.ingest(&report_delay_report(30)).unwrap();
    let soil = AttributeReport::new(DEVICE, 1).with_record(
        clusters::MS_SOIL_MOISTURE,
        0x0000,
        WireValue::Unsigned16(4200),
    );
    gateway.ingest(&soil).unwrap();

    let state = gateway.state(&DeviceId::from(DEVICE)).unwrap();
    assert_eq!(state.get("report_delay"), Some(&FieldValue::Integer(30)));
    assert_eq!(state.get("soil_moisture"), Some(&FieldValue::Float(42.0)));
}

#[tokio::test]
async fn test_local_time_decodes_to_timestamp() {
    let (gateway, _) = joined_gateway().await;

    let report = AttributeReport::new(DEVICE, 1).with_record(
        clusters::GEN_TIME,
        0x0007,
        WireValue::UtcTime(86_400),
    );
    gateway.ingest(&report).unwrap();

    let state = gateway.state(&DeviceId::from(DEVICE)).unwrap();
    let time = state.get("local_time").unwrap().as_timestamp().unwrap();
    assert_eq!(time.to_rfc3339(), "2000-01-02T00:00:00+00:00");
}

#[tokio::test]
async fn test_unjoined_device_rejected() {
    let (gateway, _) = joined_gateway().await;

    let report = AttributeReport::new("0xdeadbeef", 1).with_record(
        clusters::GEN_POWER_CFG,
        0x0201,
        WireValue::Unsigned16(30),
    );
    let result = gateway.ingest(&report);
    assert!(matches!(result, Err(GatewayError::UnknownModel(msg)) if msg.contains("0xdeadbeef")));
    assert!(gateway.state(&DeviceId::from("0xdeadbeef")).is_none());
}

#[tokio::test]
async fn test_join_unknown_model_rejected() {
    let endpoint = Arc::new(MemoryEndpoint::new());
    let gateway = Gateway::new(
        SchemaRegistry::with_builtin_models().unwrap(),
        endpoint.clone(),
        GatewayConfig::default(),
    );

    let result = gateway.join(DEVICE, "NoSuchModel").await;
    assert!(matches!(result, Err(GatewayError::UnknownModel(_))));
    assert!(gateway.devices().is_empty());
    assert_eq!(endpoint.call_count(), 0);
}

#[tokio::test]
async fn test_leave_forgets_state() {
    let (gateway, _) = joined_gateway().await;
    let device = DeviceId::from(DEVICE);
    gateway.ingest(&report_delay_report(30)).unwrap();

    let removed = gateway.leave(&device).unwrap();
    assert_eq!(removed.get("report_delay"), Some(&FieldValue::Integer(30)));
    assert!(gateway.state(&device).is_none());
    assert!(gateway.ingest(&report_delay_report(30)).is_err());
}
