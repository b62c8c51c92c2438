//! Wire-level attribute model.
//!
//! Cluster and attribute identifiers, the cluster-library data type codes
//! this gateway understands, and typed raw values as the mesh stack
//! delivers them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Unix timestamp of 2000-01-01T00:00:00Z, the epoch of `UtcTime` values.
pub const EPOCH_2000_UNIX_SECS: i64 = 946_684_800;

/// 16-bit cluster identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterId(pub u16);

/// 16-bit attribute identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributeId(pub u16);

/// Well-known clusters, by the names device definitions use for them.
pub mod clusters {
    use super::ClusterId;

    pub const GEN_BASIC: ClusterId = ClusterId(0x0000);
    pub const GEN_POWER_CFG: ClusterId = ClusterId(0x0001);
    pub const GEN_TIME: ClusterId = ClusterId(0x000a);
    pub const MS_ILLUMINANCE_MEASUREMENT: ClusterId = ClusterId(0x0400);
    pub const MS_TEMPERATURE_MEASUREMENT: ClusterId = ClusterId(0x0402);
    pub const MS_RELATIVE_HUMIDITY: ClusterId = ClusterId(0x0405);
    pub const MS_SOIL_MOISTURE: ClusterId = ClusterId(0x0408);

    pub(super) const NAMES: &[(ClusterId, &str)] = &[
        (GEN_BASIC, "genBasic"),
        (GEN_POWER_CFG, "genPowerCfg"),
        (GEN_TIME, "genTime"),
        (MS_ILLUMINANCE_MEASUREMENT, "msIlluminanceMeasurement"),
        (MS_TEMPERATURE_MEASUREMENT, "msTemperatureMeasurement"),
        (MS_RELATIVE_HUMIDITY, "msRelativeHumidity"),
        (MS_SOIL_MOISTURE, "msSoilMoisture"),
    ];
}

/// Cluster-specific command identifiers.
pub mod commands {
    /// `genBasic` command that wipes the device back to factory defaults.
    pub const RESET_FACTORY_DEFAULTS: u8 = 0x00;
}

impl ClusterId {
    /// Symbolic name, if this is a well-known cluster.
    pub fn name(self) -> Option<&'static str> {
        clusters::NAMES
            .iter()
            .find(|(id, _)| *id == self)
            .map(|(_, name)| *name)
    }
}

fn parse_u16(s: &str) -> Result<u16, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };
    parsed.map_err(|_| format!("not a 16-bit identifier: '{}'", s))
}

impl FromStr for ClusterId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some((id, _)) = clusters::NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(trimmed))
        {
            return Ok(*id);
        }
        parse_u16(trimmed)
            .map(ClusterId)
            .map_err(|_| format!("unknown cluster: '{}'", trimmed))
    }
}

impl FromStr for AttributeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_u16(s).map(AttributeId)
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:04x}", self.0),
        }
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Identifiers appear in definition files either as JSON numbers or as
/// strings (`"genPowerCfg"`, `"0x0201"`, `"513"`).
#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Number(u16),
    Text(String),
}

impl<'de> Deserialize<'de> for ClusterId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match IdRepr::deserialize(deserializer)? {
            IdRepr::Number(n) => Ok(ClusterId(n)),
            IdRepr::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

impl<'de> Deserialize<'de> for AttributeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match IdRepr::deserialize(deserializer)? {
            IdRepr::Number(n) => Ok(AttributeId(n)),
            IdRepr::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

impl Serialize for ClusterId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl Serialize for AttributeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Attribute data types, with their cluster-library type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireType {
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "uint8")]
    Unsigned8,
    #[serde(rename = "uint16")]
    Unsigned16,
    #[serde(rename = "uint32")]
    Unsigned32,
    #[serde(rename = "int8")]
    Signed8,
    #[serde(rename = "int16")]
    Signed16,
    #[serde(rename = "int32")]
    Signed32,
    #[serde(rename = "enum8")]
    Enumeration8,
    #[serde(rename = "bitmap32")]
    Bitmap32,
    #[serde(rename = "utc_time")]
    UtcTime,
}

impl WireType {
    pub const fn code(self) -> u8 {
        match self {
            Self::Boolean => 0x10,
            Self::Unsigned8 => 0x20,
            Self::Unsigned16 => 0x21,
            Self::Unsigned32 => 0x23,
            Self::Signed8 => 0x28,
            Self::Signed16 => 0x29,
            Self::Signed32 => 0x2b,
            Self::Enumeration8 => 0x30,
            Self::Bitmap32 => 0x1b,
            Self::UtcTime => 0xe2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x10 => Some(Self::Boolean),
            0x20 => Some(Self::Unsigned8),
            0x21 => Some(Self::Unsigned16),
            0x23 => Some(Self::Unsigned32),
            0x28 => Some(Self::Signed8),
            0x29 => Some(Self::Signed16),
            0x2b => Some(Self::Signed32),
            0x30 => Some(Self::Enumeration8),
            0x1b => Some(Self::Bitmap32),
            0xe2 => Some(Self::UtcTime),
            _ => None,
        }
    }

    pub const fn width_bits(self) -> u32 {
        match self {
            Self::Boolean | Self::Unsigned8 | Self::Signed8 | Self::Enumeration8 => 8,
            Self::Unsigned16 | Self::Signed16 => 16,
            Self::Unsigned32 | Self::Signed32 | Self::Bitmap32 | Self::UtcTime => 32,
        }
    }

    pub const fn is_signed(self) -> bool {
        matches!(self, Self::Signed8 | Self::Signed16 | Self::Signed32)
    }

    /// Smallest raw integer this type can carry.
    pub const fn min_raw(self) -> i64 {
        if self.is_signed() {
            -(1i64 << (self.width_bits() - 1))
        } else {
            0
        }
    }

    /// Largest raw integer this type can carry.
    pub const fn max_raw(self) -> i64 {
        match self {
            Self::Boolean => 1,
            _ if self.is_signed() => (1i64 << (self.width_bits() - 1)) - 1,
            _ => (1i64 << self.width_bits()) - 1,
        }
    }

    pub fn fits(self, raw: i64) -> bool {
        (self.min_raw()..=self.max_raw()).contains(&raw)
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "boolean",
            Self::Unsigned8 => "uint8",
            Self::Unsigned16 => "uint16",
            Self::Unsigned32 => "uint32",
            Self::Signed8 => "int8",
            Self::Signed16 => "int16",
            Self::Signed32 => "int32",
            Self::Enumeration8 => "enum8",
            Self::Bitmap32 => "bitmap32",
            Self::UtcTime => "utc_time",
        };
        write!(f, "{} (0x{:02x})", name, self.code())
    }
}

/// Raw attribute value as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum WireValue {
    #[serde(rename = "boolean")]
    Boolean(u8),
    #[serde(rename = "uint8")]
    Unsigned8(u8),
    #[serde(rename = "uint16")]
    Unsigned16(u16),
    #[serde(rename = "uint32")]
    Unsigned32(u32),
    #[serde(rename = "int8")]
    Signed8(i8),
    #[serde(rename = "int16")]
    Signed16(i16),
    #[serde(rename = "int32")]
    Signed32(i32),
    #[serde(rename = "enum8")]
    Enumeration8(u8),
    #[serde(rename = "bitmap32")]
    Bitmap32(u32),
    #[serde(rename = "utc_time")]
    UtcTime(u32),
}

impl WireValue {
    pub fn wire_type(&self) -> WireType {
        match self {
            Self::Boolean(_) => WireType::Boolean,
            Self::Unsigned8(_) => WireType::Unsigned8,
            Self::Unsigned16(_) => WireType::Unsigned16,
            Self::Unsigned32(_) => WireType::Unsigned32,
            Self::Signed8(_) => WireType::Signed8,
            Self::Signed16(_) => WireType::Signed16,
            Self::Signed32(_) => WireType::Signed32,
            Self::Enumeration8(_) => WireType::Enumeration8,
            Self::Bitmap32(_) => WireType::Bitmap32,
            Self::UtcTime(_) => WireType::UtcTime,
        }
    }

    /// Integer value under the value's own type.
    pub fn as_i64(&self) -> i64 {
        match *self {
            Self::Boolean(v) | Self::Unsigned8(v) | Self::Enumeration8(v) => i64::from(v),
            Self::Unsigned16(v) => i64::from(v),
            Self::Unsigned32(v) | Self::Bitmap32(v) | Self::UtcTime(v) => i64::from(v),
            Self::Signed8(v) => i64::from(v),
            Self::Signed16(v) => i64::from(v),
            Self::Signed32(v) => i64::from(v),
        }
    }

    /// Raw bits, zero-extended from the value's own width.
    pub fn to_bits(&self) -> u64 {
        match *self {
            Self::Signed8(v) => u64::from(v as u8),
            Self::Signed16(v) => u64::from(v as u16),
            Self::Signed32(v) => u64::from(v as u32),
            _ => self.as_i64() as u64,
        }
    }

    /// Build a value of `wire_type` from an integer, if it fits.
    pub fn from_i64(wire_type: WireType, raw: i64) -> Option<Self> {
        if !wire_type.fits(raw) {
            return None;
        }
        Some(match wire_type {
            WireType::Boolean => Self::Boolean(raw as u8),
            WireType::Unsigned8 => Self::Unsigned8(raw as u8),
            WireType::Unsigned16 => Self::Unsigned16(raw as u16),
            WireType::Unsigned32 => Self::Unsigned32(raw as u32),
            WireType::Signed8 => Self::Signed8(raw as i8),
            WireType::Signed16 => Self::Signed16(raw as i16),
            WireType::Signed32 => Self::Signed32(raw as i32),
            WireType::Enumeration8 => Self::Enumeration8(raw as u8),
            WireType::Bitmap32 => Self::Bitmap32(raw as u32),
            WireType::UtcTime => Self::UtcTime(raw as u32),
        })
    }

    /// Reinterpret the raw bits as `target`.
    ///
    /// Bits above the target width must be zero; signed targets are
    /// sign-extended. A raw byte declared boolean yields 0 or non-zero.
    pub fn reinterpret(&self, target: WireType) -> Option<i64> {
        let bits = self.to_bits();
        let width = target.width_bits();
        if bits >> width != 0 {
            return None;
        }
        let value = if target.is_signed() && bits & (1u64 << (width - 1)) != 0 {
            bits as i64 - (1i64 << width)
        } else {
            bits as i64
        };
        Some(value)
    }
}

impl fmt::Display for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} as {}", self.as_i64(), self.wire_type())
    }
}
