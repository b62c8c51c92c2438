//! Gateway walkthrough against the in-memory endpoint.
//!
//! 1. Join an eFlora Pro (bindings are issued)
//! 2. Start the report loop and push a few reports
//! 3. Set the report interval and the display mode
//! 4. Watch the clock sync answer a time report
//! 5. Reset the device to factory defaults

use std::sync::Arc;
use std::time::Duration;

use meshgate_devices::builtin_models::EFLORA_PRO;
use meshgate_devices::{
    clusters, AttributeReport, DeviceId, Gateway, GatewayConfig, MemoryEndpoint, SchemaRegistry,
    WireValue,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== meshgate device demo ===\n");

    let endpoint = Arc::new(MemoryEndpoint::new());
    let gateway = Gateway::new(
        SchemaRegistry::with_builtin_models()?,
        endpoint.clone(),
        GatewayConfig::from_env(),
    );
    let mut events = gateway.subscribe();

    let device = DeviceId::from("0x00124b0012345678");
    let summary = gateway.join(device.clone(), EFLORA_PRO).await?;
    println!("Joined {} as {} ({} bindings)", device, EFLORA_PRO, summary.bound);

    gateway.start();
    while endpoint.subscribe_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    endpoint.push_report(
        AttributeReport::new(device.clone(), 1)
            .with_record(clusters::GEN_POWER_CFG, 0x0201, WireValue::Unsigned16(30))
            .with_record(clusters::GEN_POWER_CFG, 0x0021, WireValue::Unsigned8(174))
            .with_record(clusters::MS_SOIL_MOISTURE, 0x0000, WireValue::Unsigned16(4210)),
    );
    endpoint.push_report(
        AttributeReport::new(device.clone(), 2)
            .with_record(clusters::MS_TEMPERATURE_MEASUREMENT, 0x0000, WireValue::Signed16(2150))
            .with_record(clusters::MS_RELATIVE_HUMIDITY, 0x0000, WireValue::Unsigned16(5530))
            .with_record(clusters::MS_ILLUMINANCE_MEASUREMENT, 0x0000, WireValue::Unsigned16(25_000)),
    );
    endpoint.push_report(
        AttributeReport::new(device.clone(), 1).with_record(clusters::GEN_TIME, 0x0007, WireValue::UtcTime(0)),
    );

    gateway.dispatch(&device, "report_delay", "45").await?;
    gateway.dispatch(&device, "fastmode", "ON").await?;
    if let Err(e) = gateway.dispatch(&device, "report_delay", "500").await {
        println!("Rejected as expected: {}", e);
    }

    println!("\n--- Events ---");
    while let Ok(Some((event, meta))) =
        tokio::time::timeout(Duration::from_millis(200), events.recv()).await
    {
        println!("[{}] {}", meta.source, serde_json::to_string(&event)?);
    }

    if let Some(state) = gateway.state(&device) {
        println!("\n--- State ---");
        println!("{}", serde_json::to_string_pretty(&state)?);
    }

    gateway.factory_reset(&device).await?;
    let cleared = gateway.state(&device).map_or(0, |s| s.fields.len());
    println!("\nFactory reset acknowledged, {} fields left", cleared);

    gateway.stop().await;
    Ok(())
}
