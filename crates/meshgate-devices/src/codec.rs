//! Conversion between wire attribute values and normalized field values.
//!
//! Decoding is lenient: records the schema does not map are skipped and a
//! value that cannot be reinterpreted under the declared type is dropped
//! with a warning. Encoding is strict: every failure is a typed
//! validation error, raised before anything reaches the transport.
//!
//! The codec is a pure value conversion and does not look at access:
//! every mapped field encodes, and deciding which fields a command may
//! set is the dispatcher's job.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use meshgate_core::FieldValue;
use serde::Serialize;

use crate::endpoint::AttributeReport;
use crate::error::{GatewayError, GatewayResult};
use crate::schema::{AttributeMapping, Derivation, DeviceSchema};
use crate::wire::{AttributeId, ClusterId, WireType, WireValue, EPOCH_2000_UNIX_SECS};

/// A validated write, ready for the endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodedWrite {
    pub field: String,
    pub endpoint: u8,
    pub cluster: ClusterId,
    pub attribute: AttributeId,
    pub value: WireValue,
}

impl EncodedWrite {
    pub fn wire_type(&self) -> WireType {
        self.value.wire_type()
    }
}

/// Convert a device `UtcTime` (seconds since 2000-01-01) to a timestamp.
pub fn device_time_to_utc(device_secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(EPOCH_2000_UNIX_SECS + device_secs, 0)
}

/// Decode every mapped record of a report into field values.
pub fn decode(schema: &DeviceSchema, report: &AttributeReport) -> BTreeMap<String, FieldValue> {
    let mut fields = BTreeMap::new();
    for record in &report.records {
        let Some(mapping) = schema.mapping_for(record.cluster, record.attribute) else {
            tracing::debug!(
                device_id = %report.device_id,
                cluster = %record.cluster,
                attribute = %record.attribute,
                "Skipping unmapped attribute"
            );
            continue;
        };
        let decoded = record
            .value
            .reinterpret(mapping.wire_type)
            .and_then(|raw| Some((raw, decode_raw(mapping, raw)?)));
        match decoded {
            Some((raw, value)) => {
                fields.insert(mapping.field.clone(), value);
                for derived in &mapping.derived {
                    fields.insert(derived.field.clone(), derive_value(derived.derivation, raw));
                }
            }
            None => {
                tracing::warn!(
                    device_id = %report.device_id,
                    field = %mapping.field,
                    value = %record.value,
                    expected = %mapping.wire_type,
                    "Dropping attribute value that does not fit its declared type"
                );
            }
        }
    }
    fields
}

/// Decode one raw value under its mapping.
pub fn decode_value(mapping: &AttributeMapping, value: &WireValue) -> Option<FieldValue> {
    decode_raw(mapping, value.reinterpret(mapping.wire_type)?)
}

fn decode_raw(mapping: &AttributeMapping, raw: i64) -> Option<FieldValue> {
    let decoded = match mapping.wire_type {
        WireType::Boolean => FieldValue::Boolean(raw != 0),
        WireType::UtcTime => FieldValue::Timestamp(device_time_to_utc(raw)?),
        _ => match mapping.scale {
            Some(scale) => FieldValue::Float(raw as f64 / scale),
            None => FieldValue::Integer(raw),
        },
    };
    Some(decoded)
}

/// Compute a derived field from its attribute's raw value.
pub fn derive_value(derivation: Derivation, raw: i64) -> FieldValue {
    match derivation {
        Derivation::LogLux if raw <= 0 => FieldValue::Float(0.0),
        Derivation::LogLux => {
            let lux = 10f64.powf((raw - 1) as f64 / 10_000.0);
            FieldValue::Float((lux * 100.0).round() / 100.0)
        }
        Derivation::AnyBit { mask } => FieldValue::Boolean(raw & i64::from(mask) != 0),
    }
}

/// Validate and encode a textual set-request for `field`.
///
/// Accepted forms, tried in order: a declared label (exact, then
/// case-insensitive), an integer, a decimal (scaled fields only),
/// `true`/`false` (boolean fields only) and RFC 3339 (time fields only).
pub fn encode(schema: &DeviceSchema, field: &str, input: &str) -> GatewayResult<EncodedWrite> {
    let mapping = field_mapping(schema, field)?;
    let value = parse_input(mapping, input)?;
    encode_mapped(mapping, &value)
}

/// Validate and encode an already-typed value for `field`.
pub fn encode_value(
    schema: &DeviceSchema,
    field: &str,
    value: &FieldValue,
) -> GatewayResult<EncodedWrite> {
    let mapping = field_mapping(schema, field)?;
    encode_mapped(mapping, value)
}

fn field_mapping<'a>(schema: &'a DeviceSchema, field: &str) -> GatewayResult<&'a AttributeMapping> {
    schema
        .mapping(field)
        .ok_or_else(|| GatewayError::UnknownField(field.to_string()))
}

fn parse_input(mapping: &AttributeMapping, input: &str) -> GatewayResult<FieldValue> {
    let text = input.trim();

    let label = mapping.labels.get(text).or_else(|| {
        mapping
            .labels
            .iter()
            .find(|(label, _)| label.eq_ignore_ascii_case(text))
            .map(|(_, raw)| raw)
    });
    if let Some(&raw) = label {
        return Ok(match mapping.scale {
            Some(scale) => FieldValue::Float(raw as f64 / scale),
            None => FieldValue::Integer(raw),
        });
    }

    if let Ok(n) = text.parse::<i64>() {
        return Ok(FieldValue::Integer(n));
    }

    let parsed = match mapping.wire_type {
        WireType::Boolean => match text.to_ascii_lowercase().as_str() {
            "true" => Some(FieldValue::Boolean(true)),
            "false" => Some(FieldValue::Boolean(false)),
            _ => None,
        },
        WireType::UtcTime => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|t| FieldValue::Timestamp(t.with_timezone(&Utc))),
        _ if mapping.scale.is_some() => text
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(FieldValue::Float),
        _ => None,
    };

    parsed.ok_or_else(|| {
        let mut expected = String::from("expected an integer");
        if !mapping.labels.is_empty() {
            let labels: Vec<&str> = mapping.labels.keys().map(String::as_str).collect();
            expected.push_str(&format!(" or one of {}", labels.join(", ")));
        }
        GatewayError::invalid_value(&mapping.field, text, expected)
    })
}

fn encode_mapped(mapping: &AttributeMapping, value: &FieldValue) -> GatewayResult<EncodedWrite> {
    let field = mapping.field.as_str();

    let app_value = match (mapping.wire_type, value) {
        (WireType::UtcTime, FieldValue::Timestamp(t)) => (t.timestamp() - EPOCH_2000_UNIX_SECS) as f64,
        (_, FieldValue::Timestamp(_)) => {
            return Err(GatewayError::invalid_value(
                field,
                value.to_string(),
                "timestamps are only accepted for time fields",
            ))
        }
        (_, FieldValue::Float(f)) if !f.is_finite() => {
            return Err(GatewayError::invalid_value(field, value.to_string(), "not a finite number"))
        }
        (_, v) => v.as_f64().unwrap_or_default(),
    };

    if mapping.scale.is_none() && app_value.fract() != 0.0 {
        return Err(GatewayError::invalid_value(
            field,
            value.to_string(),
            "expected an integer",
        ));
    }

    if let Some(bounds) = mapping.bounds {
        if !bounds.contains(app_value) {
            return Err(GatewayError::OutOfRange {
                field: field.to_string(),
                value: app_value,
                min: bounds.min,
                max: bounds.max,
            });
        }
    }

    let raw = mapping.to_raw(app_value);
    let wire = WireValue::from_i64(mapping.wire_type, raw as i64)
        .ok_or_else(|| {
            GatewayError::invalid_value(
                field,
                value.to_string(),
                format!("does not fit wire type {}", mapping.wire_type),
            )
        })?;

    Ok(EncodedWrite {
        field: mapping.field.clone(),
        endpoint: mapping.endpoint,
        cluster: mapping.cluster,
        attribute: mapping.attribute,
        value: wire,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaDefinition;
    use crate::wire::clusters;

    fn schema() -> DeviceSchema {
        SchemaDefinition::new("test")
            .with_field(
                AttributeMapping::new("report_delay", clusters::GEN_POWER_CFG, 0x0201, WireType::Unsigned16)
                    .settable()
                    .with_bounds(1.0, 360.0),
            )
            .with_field(
                AttributeMapping::new("fastmode", clusters::GEN_BASIC, 0xF005, WireType::Unsigned8)
                    .settable()
                    .with_label("OFF", 0)
                    .with_label("ON", 1),
            )
            .with_field(
                AttributeMapping::new("temperature", clusters::MS_TEMPERATURE_MEASUREMENT, 0x0000, WireType::Signed16)
                    .on_endpoint(2)
                    .with_scale(100.0),
            )
            .with_field(
                AttributeMapping::new("setpoint", clusters::MS_TEMPERATURE_MEASUREMENT, 0x0010, WireType::Signed16)
                    .on_endpoint(2)
                    .settable()
                    .with_scale(100.0)
                    .with_bounds(-20.0, 50.0),
            )
            .with_field(AttributeMapping::new("local_time", clusters::GEN_TIME, 0x0007, WireType::UtcTime))
            .build()
            .unwrap()
    }

    #[test]
    fn test_decode_skips_unmapped() {
        let schema = schema();
        let report = AttributeReport::new("dev1", 1)
            .with_record(clusters::GEN_POWER_CFG, 0x0201, WireValue::Unsigned16(30))
            .with_record(clusters::GEN_BASIC, 0x7777, WireValue::Unsigned8(9));
        let fields = decode(&schema, &report);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["report_delay"], FieldValue::Integer(30));
    }

    #[test]
    fn test_decode_scaled_signed() {
        let schema = schema();
        let report = AttributeReport::new("dev1", 2).with_record(
            clusters::MS_TEMPERATURE_MEASUREMENT,
            0x0000,
            WireValue::Unsigned16(0xfc18),
        );
        let fields = decode(&schema, &report);
        assert_eq!(fields["temperature"], FieldValue::Float(-10.0));
    }

    #[test]
    fn test_decode_time() {
        let schema = schema();
        let report = AttributeReport::new("dev1", 1).with_record(
            clusters::GEN_TIME,
            0x0007,
            WireValue::UtcTime(86_400),
        );
        let fields = decode(&schema, &report);
        assert_eq!(
            fields["local_time"].as_timestamp().unwrap().to_rfc3339(),
            "2000-01-02T00:00:00+00:00"
        );
    }

    #[test]
    fn test_decode_drops_overflowing_value() {
        let schema = schema();
        let report = AttributeReport::new("dev1", 1).with_record(
            clusters::GEN_BASIC,
            0xF005,
            WireValue::Unsigned16(300),
        );
        assert!(decode(&schema, &report).is_empty());
    }

    #[test]
    fn test_encode_in_range() {
        let write = encode(&schema(), "report_delay", "45").unwrap();
        assert_eq!(write.cluster, clusters::GEN_POWER_CFG);
        assert_eq!(write.attribute, AttributeId(0x0201));
        assert_eq!(write.value, WireValue::Unsigned16(45));
        assert_eq!(write.wire_type().code(), 0x21);
    }

    #[test]
    fn test_encode_out_of_range() {
        let err = encode(&schema(), "report_delay", "500").unwrap_err();
        assert!(matches!(err, GatewayError::OutOfRange { max, .. } if max == 360.0));
        assert!(matches!(encode(&schema(), "report_delay", "0"), Err(GatewayError::OutOfRange { .. })));
    }

    #[test]
    fn test_encode_labels() {
        let schema = schema();
        let by_label = encode(&schema, "fastmode", "ON").unwrap();
        let by_number = encode(&schema, "fastmode", "1").unwrap();
        let lowercase = encode(&schema, "fastmode", "on").unwrap();
        assert_eq!(by_label, by_number);
        assert_eq!(by_label, lowercase);
        assert_eq!(by_label.value, WireValue::Unsigned8(1));

        let err = encode(&schema, "fastmode", "maybe").unwrap_err();
        assert!(matches!(err, GatewayError::InvalidValue { reason, .. } if reason.contains("OFF, ON")));
    }

    #[test]
    fn test_encode_scaled() {
        let write = encode(&schema(), "setpoint", "-12.5").unwrap();
        assert_eq!(write.endpoint, 2);
        assert_eq!(write.value, WireValue::Signed16(-1250));
        assert!(matches!(encode(&schema(), "setpoint", "51"), Err(GatewayError::OutOfRange { .. })));
    }

    #[test]
    fn test_encode_rejects() {
        let schema = schema();
        assert!(matches!(encode(&schema, "nope", "1"), Err(GatewayError::UnknownField(_))));
        assert!(matches!(encode(&schema, "report_delay", "4.5"), Err(GatewayError::InvalidValue { .. })));
        assert!(matches!(
            encode_value(&schema, "report_delay", &FieldValue::Float(4.5)),
            Err(GatewayError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_encode_ignores_access() {
        let schema = schema();
        let write = encode(&schema, "temperature", "-3.25").unwrap();
        assert_eq!(write.endpoint, 2);
        assert_eq!(write.value, WireValue::Signed16(-325));
    }

    #[test]
    fn test_derive_values() {
        assert_eq!(derive_value(Derivation::LogLux, 0), FieldValue::Float(0.0));
        assert_eq!(derive_value(Derivation::LogLux, 1), FieldValue::Float(1.0));
        assert_eq!(derive_value(Derivation::LogLux, 10_001), FieldValue::Float(10.0));
        let mask = Derivation::AnyBit { mask: 0b1010 };
        assert_eq!(derive_value(mask, 0b0010), FieldValue::Boolean(true));
        assert_eq!(derive_value(mask, 0b0101), FieldValue::Boolean(false));
    }

    #[test]
    fn test_decode_includes_derived_fields() {
        let schema = SchemaDefinition::new("light")
            .with_field(
                AttributeMapping::new("illuminance", clusters::MS_ILLUMINANCE_MEASUREMENT, 0x0000, WireType::Unsigned16)
                    .with_derived("illuminance_lux", Derivation::LogLux),
            )
            .build()
            .unwrap();
        let report = AttributeReport::new("dev1", 2).with_record(
            clusters::MS_ILLUMINANCE_MEASUREMENT,
            0x0000,
            WireValue::Unsigned16(10_001),
        );
        let fields = decode(&schema, &report);
        assert_eq!(fields["illuminance"], FieldValue::Integer(10_001));
        assert_eq!(fields["illuminance_lux"], FieldValue::Float(10.0));
        assert!(matches!(encode(&schema, "illuminance_lux", "1"), Err(GatewayError::UnknownField(_))));
    }

    #[test]
    fn test_decode_encode_round_trip() {
        let schema = schema();
        for raw in [1u16, 45, 360] {
            let mapping = schema.mapping("report_delay").unwrap();
            let decoded = decode_value(mapping, &WireValue::Unsigned16(raw)).unwrap();
            let write = encode_value(&schema, "report_delay", &decoded).unwrap();
            assert_eq!(write.value, WireValue::Unsigned16(raw));
        }
        let mapping = schema.mapping("setpoint").unwrap();
        let decoded = decode_value(mapping, &WireValue::Signed16(-1999)).unwrap();
        let write = encode_value(&schema, "setpoint", &decoded).unwrap();
        assert_eq!(write.value, WireValue::Signed16(-1999));
    }
}
