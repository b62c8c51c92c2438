//! Built-in device models.
//!
//! These use the same definition format as schema files, so a built-in
//! model can be exported, edited and loaded back from disk unchanged.

use serde_json::json;

use crate::error::GatewayResult;
use crate::schema::{DeviceSchema, SchemaDefinition};

/// Model identifier of the EFEKTA eFlora Pro.
pub const EFLORA_PRO: &str = "EFEKTA_eFlora_Pro";

/// Alarm bits 0-3, 10-13 and 20-23 of `batteryAlarmState`: the
/// voltage-low alarms of battery sources 1, 2 and 3.
const BATTERY_LOW_MASK: u32 = 0x00f0_3c0f;

/// Every built-in device model, validated.
pub fn builtin_schemas() -> GatewayResult<Vec<DeviceSchema>> {
    [eflora_pro()]
        .into_iter()
        .map(|definition| definition.and_then(SchemaDefinition::build))
        .collect()
}

/// EFEKTA eFlora Pro: soil moisture sensor with an e-ink display.
///
/// Endpoint 1 carries power, soil and the vendor's configuration
/// attributes on `genBasic`; endpoint 2 carries the climate sensors.
/// The device has no RTC of its own and expects the gateway to push the
/// local time whenever it reports on `genTime`.
fn eflora_pro() -> GatewayResult<SchemaDefinition> {
    Ok(serde_json::from_value(json!({
        "model": EFLORA_PRO,
        "vendor": "Custom devices (DiY)",
        "description": "Plant watering sensor with e-ink display 2.13",
        "fields": [
            {
                "field": "battery",
                "cluster": "genPowerCfg",
                "attribute": "0x0021",
                "wire_type": "uint8",
                "scale": 2.0,
                "unit": "%",
                "description": "Remaining battery"
            },
            {
                "field": "battery_voltage",
                "cluster": "genPowerCfg",
                "attribute": "0x0020",
                "wire_type": "uint8",
                "scale": 0.01,
                "unit": "mV",
                "description": "Battery voltage"
            },
            {
                "field": "battery_alarm_state",
                "cluster": "genPowerCfg",
                "attribute": "0x003E",
                "wire_type": "bitmap32",
                "description": "Battery alarm bits for up to three battery sources",
                "derived": [
                    {
                        "field": "battery_low",
                        "kind": "any_bit",
                        "mask": BATTERY_LOW_MASK,
                        "description": "Any battery source below its minimum threshold"
                    }
                ]
            },
            {
                "field": "report_delay",
                "cluster": "genPowerCfg",
                "attribute": "0x0201",
                "wire_type": "uint16",
                "access": "read_write",
                "bounds": { "min": 1, "max": 360 },
                "unit": "min",
                "description": "Report interval, 30 minutes by default"
            },
            {
                "field": "bat_adc",
                "cluster": "genBasic",
                "attribute": "0x0500",
                "wire_type": "uint16",
                "description": "Raw battery ADC reading"
            },
            {
                "field": "sm_adc_compens",
                "cluster": "genBasic",
                "attribute": "0x0499",
                "wire_type": "uint16",
                "description": "Compensated soil moisture ADC reading"
            },
            {
                "field": "sm_adc",
                "cluster": "genBasic",
                "attribute": "0x0501",
                "wire_type": "uint16",
                "description": "Raw soil moisture ADC reading"
            },
            {
                "field": "lower_level",
                "cluster": "genBasic",
                "attribute": "0x0502",
                "wire_type": "uint16",
                "access": "read_write",
                "bounds": { "min": 0, "max": 99 },
                "unit": "%",
                "description": "Soil moisture calibration: reading taken as 0%"
            },
            {
                "field": "upper_level",
                "cluster": "genBasic",
                "attribute": "0x0503",
                "wire_type": "uint16",
                "access": "read_write",
                "bounds": { "min": 1, "max": 100 },
                "unit": "%",
                "description": "Soil moisture calibration: reading taken as 100%"
            },
            {
                "field": "invert",
                "cluster": "genBasic",
                "attribute": "0xF004",
                "wire_type": "uint8",
                "access": "read_write",
                "bounds": { "min": 0, "max": 1 },
                "labels": { "OFF": 0, "ON": 1 },
                "description": "Invert display colors"
            },
            {
                "field": "fastmode",
                "cluster": "genBasic",
                "attribute": "0xF005",
                "wire_type": "uint8",
                "access": "read_write",
                "bounds": { "min": 0, "max": 1 },
                "labels": { "OFF": 0, "ON": 1 },
                "description": "Display refresh mode (fast or ultra fast)"
            },
            {
                "field": "local_time",
                "cluster": "genTime",
                "attribute": "0x0007",
                "wire_type": "utc_time",
                "description": "Device local time"
            },
            {
                "field": "soil_moisture",
                "cluster": "msSoilMoisture",
                "attribute": "0x0000",
                "wire_type": "uint16",
                "scale": 100.0,
                "unit": "%"
            },
            {
                "field": "temperature",
                "endpoint": 2,
                "cluster": "msTemperatureMeasurement",
                "attribute": "0x0000",
                "wire_type": "int16",
                "scale": 100.0,
                "unit": "°C"
            },
            {
                "field": "humidity",
                "endpoint": 2,
                "cluster": "msRelativeHumidity",
                "attribute": "0x0000",
                "wire_type": "uint16",
                "scale": 100.0,
                "unit": "%"
            },
            {
                "field": "illuminance",
                "endpoint": 2,
                "cluster": "msIlluminanceMeasurement",
                "attribute": "0x0000",
                "wire_type": "uint16",
                "description": "Raw logarithmic illuminance",
                "derived": [
                    { "field": "illuminance_lux", "kind": "log_lux", "unit": "lx" }
                ]
            }
        ],
        "bindings": [
            { "endpoint": 1, "clusters": ["genPowerCfg", "genTime", "msSoilMoisture", "genBasic"] },
            { "endpoint": 2, "clusters": ["msTemperatureMeasurement", "msRelativeHumidity", "msIlluminanceMeasurement"] }
        ],
        "clock_sync": { "endpoint": 1, "cluster": "genTime", "attribute": 0 }
    }))?)
}
