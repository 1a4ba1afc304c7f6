//! Time-method resolution for incoming measurements.

use serde_json::Value;

use crate::models::TimeMethod;

// ---

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    #[error("unsupported time format '{0}'")]
    Unsupported(String),

    #[error("malformed timestamp: {0}")]
    Malformed(String),

    #[error("timevalue is required for custom time method")]
    MissingTimeValue,
}

/// How the legacy `device` time method is interpreted.
///
/// Configured through `LEGACY_DEVICE_TIME`; the default refuses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LegacyDeviceTime {
    #[default]
    Reject,
    Server,
    Custom,
}

impl LegacyDeviceTime {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "reject" => Some(Self::Reject),
            "server" => Some(Self::Server),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reject => "reject",
            Self::Server => "server",
            Self::Custom => "custom",
        }
    }
}

/// Map the wire value of `timemethode` onto a [`TimeMethod`].
pub fn parse_method(raw: &str, legacy: LegacyDeviceTime) -> Result<TimeMethod, TimeError> {
    match (raw, legacy) {
        ("server", _) | ("device", LegacyDeviceTime::Server) => Ok(TimeMethod::Server),
        ("custom", _) | ("device", LegacyDeviceTime::Custom) => Ok(TimeMethod::Custom),
        ("none", _) => Ok(TimeMethod::None),
        _ => Err(TimeError::Unsupported(raw.to_string())),
    }
}

/// Derive the unix timestamp for a measurement.
///
/// `now` is supplied by the caller so resolution stays a pure function.
pub fn resolve(method: TimeMethod, raw: Option<&Value>, now: i64) -> Result<Option<i64>, TimeError> {
    match method {
        TimeMethod::Server => Ok(Some(now)),
        TimeMethod::None => Ok(None),
        TimeMethod::Custom => {
            let raw = raw.ok_or(TimeError::MissingTimeValue)?;
            parse_timestamp(raw).map(Some)
        }
    }
}

fn parse_timestamp(raw: &Value) -> Result<i64, TimeError> {
    let parsed = match raw {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f < i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match parsed {
        Some(t) if t >= 0 => Ok(t),
        _ => Err(TimeError::Malformed(raw.to_string())),
    }
}
