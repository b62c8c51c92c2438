//! Error types for the device layer.

use crate::endpoint::TransportError;

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors that can occur in the device layer.
///
/// Validation failures (`UnknownField`, `ReadOnlyField`, `OutOfRange`,
/// `InvalidValue`) are always raised before any transport call is made.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No schema registered under this model, or the device was never joined.
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// A schema with this model name is already registered.
    #[error("Duplicate model: {0}")]
    DuplicateModel(String),

    /// The model has no mapping for this field.
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// The field exists but is not settable.
    #[error("Field is read-only: {0}")]
    ReadOnlyField(String),

    /// The requested value violates the field's declared bounds.
    #[error("Value {value} out of range for {field}: expected {min}..={max}")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// The requested value cannot be parsed or encoded for the field.
    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// A device model definition is inconsistent.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Link or radio failure, surfaced verbatim.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl GatewayError {
    /// Whether this is a caller-side validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::UnknownField(_)
                | Self::ReadOnlyField(_)
                | Self::OutOfRange { .. }
                | Self::InvalidValue { .. }
        )
    }

    pub(crate) fn invalid_value(
        field: &str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
