//! Validated record types for the webhook pipeline.
//!
//! A [`MeasurementRecord`] or [`LogRecord`] can only be obtained through its
//! constructor, which either returns a fully valid immutable value or a
//! [`ValidationError`] naming the offending field.

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---

/// Maximum length of location, measurand, sensor and unit labels.
pub const MAX_LABEL_LEN: usize = 40;

/// Maximum length of a string-typed measured value (column width).
pub const MAX_STRING_VALUE_LEN: usize = 20;

/// Maximum length of a device log message.
pub const MAX_LOG_MESSAGE_LEN: usize = 200;

/// A device EUI is exactly this many hexadecimal characters.
pub const DEVICE_EUI_LEN: usize = 16;

/// A field failed its constraints during record construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Datatype discriminant deciding which child table receives the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datatype {
    Integer,
    Float,
    String,
}

impl Datatype {
    /// Case-insensitive parse of the wire name.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        match raw.to_lowercase().as_str() {
            "integer" => Ok(Self::Integer),
            "float" => Ok(Self::Float),
            "string" => Ok(Self::String),
            _ => Err(ValidationError::new(
                "datatype",
                format!("must be one of integer, float, string (got '{raw}')"),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
        }
    }
}

/// How the timestamp of a measurement was obtained.
///
/// The legacy `device` spelling never reaches this type; it is mapped to one
/// of these variants (or rejected) by [`crate::time::parse_method`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeMethod {
    Server,
    Custom,
    None,
}

impl TimeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Custom => "custom",
            Self::None => "none",
        }
    }
}

/// A measured value, typed by its datatype.
#[derive(Debug, Clone, PartialEq)]
pub enum MeasuredValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

// Non-finite floats are rejected at construction and -0.0 is folded into 0.0,
// so bitwise hashing agrees with `PartialEq`.
impl Eq for MeasuredValue {}

impl Hash for MeasuredValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Integer(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Text(v) => v.hash(state),
        }
    }
}

impl MeasuredValue {
    /// Convert a raw JSON value into the representation required by `datatype`.
    ///
    /// Integers go through float-then-truncate, so `"123.0"` yields `123`.
    pub fn convert(datatype: Datatype, raw: &Value) -> Result<Self, ValidationError> {
        match datatype {
            Datatype::Integer => {
                if let Some(v) = raw.as_i64() {
                    return Ok(Self::Integer(v));
                }
                let f = numeric(raw, datatype)?;
                // i64::MAX as f64 rounds up to 2^63, which is already out of range
                if f < i64::MIN as f64 || f >= i64::MAX as f64 {
                    return Err(ValidationError::new(
                        "value",
                        format!("{f} is out of range for integer"),
                    ));
                }
                Ok(Self::Integer(f.trunc() as i64))
            }
            Datatype::Float => {
                let f = numeric(raw, datatype)?;
                Ok(Self::Float(if f == 0.0 { 0.0 } else { f }))
            }
            Datatype::String => {
                let text = match raw {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => {
                        return Err(ValidationError::new(
                            "value",
                            "cannot convert to string",
                        ))
                    }
                };
                let len = text.chars().count();
                if len > MAX_STRING_VALUE_LEN {
                    return Err(ValidationError::new(
                        "value",
                        format!("string value must be at most {MAX_STRING_VALUE_LEN} characters, got {len}"),
                    ));
                }
                Ok(Self::Text(text))
            }
        }
    }

    pub fn datatype(&self) -> Datatype {
        match self {
            Self::Integer(_) => Datatype::Integer,
            Self::Float(_) => Datatype::Float,
            Self::Text(_) => Datatype::String,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Integer(v) => Value::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Text(v) => Value::String(v.clone()),
        }
    }
}

impl fmt::Display for MeasuredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

fn numeric(raw: &Value, datatype: Datatype) -> Result<f64, ValidationError> {
    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(f) if f.is_finite() => Ok(f),
        _ => Err(ValidationError::new(
            "value",
            format!("cannot convert {raw} to {}", datatype.as_str()),
        )),
    }
}

/// Non-empty (after trimming) and at most `max` characters.
fn check_label(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    let len = value.chars().count();
    if len > max {
        return Err(ValidationError::new(
            field,
            format!("must be at most {max} characters, got {len}"),
        ));
    }
    Ok(())
}

/// Exactly [`DEVICE_EUI_LEN`] hex digits, either case.
pub fn check_device_eui(value: &str) -> Result<(), ValidationError> {
    if value.len() != DEVICE_EUI_LEN || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::new(
            "device_eui",
            format!("must be exactly {DEVICE_EUI_LEN} hex characters (got '{value}')"),
        ));
    }
    Ok(())
}

fn timestring(unix_time: Option<i64>) -> Option<String> {
    unix_time
        .and_then(|t| DateTime::from_timestamp(t, 0))
        .map(|dt| dt.to_rfc3339())
}

// ---

/// Unvalidated inputs for [`MeasurementRecord::new`].
#[derive(Debug, Clone)]
pub struct MeasurementInput<'a> {
    pub datatype: &'a str,
    pub location: &'a str,
    pub measurand: &'a str,
    pub sensor: &'a str,
    pub unit: &'a str,
    pub value: &'a Value,
    pub time_method: TimeMethod,
    pub unix_time: Option<i64>,
    pub device_eui: &'a str,
}

/// An immutable, validated sensor measurement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "CanonicalMeasurement", try_from = "CanonicalMeasurement")]
pub struct MeasurementRecord {
    location: String,
    measurand: String,
    sensor: String,
    unit: String,
    value: MeasuredValue,
    time_method: TimeMethod,
    unix_time: Option<i64>,
    device_eui: String,
}

impl MeasurementRecord {
    pub fn new(input: MeasurementInput<'_>) -> Result<Self, ValidationError> {
        // ---
        let datatype = Datatype::parse(input.datatype)?;
        let value = MeasuredValue::convert(datatype, input.value)?;

        check_label("location", input.location, MAX_LABEL_LEN)?;
        check_label("measurand", input.measurand, MAX_LABEL_LEN)?;
        check_label("sensor", input.sensor, MAX_LABEL_LEN)?;
        check_label("unit", input.unit, MAX_LABEL_LEN)?;
        check_device_eui(input.device_eui)?;

        match (input.time_method, input.unix_time) {
            (TimeMethod::None, Some(_)) => {
                return Err(ValidationError::new(
                    "unix_time",
                    "must be absent when time method is 'none'",
                ))
            }
            (TimeMethod::None, None) => {}
            (method, None) => {
                return Err(ValidationError::new(
                    "unix_time",
                    format!("is required when time method is '{}'", method.as_str()),
                ))
            }
            (_, Some(t)) if t < 0 => {
                return Err(ValidationError::new("unix_time", "must not be negative"))
            }
            (_, Some(_)) => {}
        }

        Ok(Self {
            location: input.location.to_string(),
            measurand: input.measurand.to_string(),
            sensor: input.sensor.to_string(),
            unit: input.unit.to_string(),
            value,
            time_method: input.time_method,
            unix_time: input.unix_time,
            device_eui: input.device_eui.to_string(),
        })
    }

    pub fn datatype(&self) -> Datatype {
        self.value.datatype()
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn measurand(&self) -> &str {
        &self.measurand
    }

    pub fn sensor(&self) -> &str {
        &self.sensor
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn value(&self) -> &MeasuredValue {
        &self.value
    }

    pub fn time_method(&self) -> TimeMethod {
        self.time_method
    }

    pub fn unix_time(&self) -> Option<i64> {
        self.unix_time
    }

    pub fn device_eui(&self) -> &str {
        &self.device_eui
    }

    /// Human readable RFC 3339 rendering of `unix_time`, if any.
    pub fn timestring(&self) -> Option<String> {
        timestring(self.unix_time)
    }

    /// Structured map form; inverse of [`MeasurementRecord::from_canonical`].
    pub fn to_canonical(&self) -> Value {
        Value::from(CanonicalMeasurement::from(self.clone()))
    }

    /// Rebuild a record from its map form, re-running every validation.
    pub fn from_canonical(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

impl fmt::Display for MeasurementRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}{} from {} (sensor {}, location {}, {} time",
            self.measurand,
            self.value,
            self.unit,
            self.device_eui,
            self.sensor,
            self.location,
            self.time_method.as_str(),
        )?;
        match self.timestring() {
            Some(ts) => write!(f, " {ts})"),
            None => f.write_str(")"),
        }
    }
}

/// Wire shape of the canonical map. `timestring` is derived and ignored on input.
#[derive(Debug, Serialize, Deserialize)]
struct CanonicalMeasurement {
    device_eui: String,
    datatype: String,
    location: String,
    measurand: String,
    sensor: String,
    unit: String,
    value: Value,
    time_method: TimeMethod,
    unix_time: Option<i64>,
    #[serde(default, skip_deserializing)]
    timestring: Option<String>,
}

impl From<MeasurementRecord> for CanonicalMeasurement {
    fn from(record: MeasurementRecord) -> Self {
        Self {
            datatype: record.datatype().as_str().to_string(),
            value: record.value.to_json(),
            timestring: record.timestring(),
            device_eui: record.device_eui,
            location: record.location,
            measurand: record.measurand,
            sensor: record.sensor,
            unit: record.unit,
            time_method: record.time_method,
            unix_time: record.unix_time,
        }
    }
}

impl From<CanonicalMeasurement> for Value {
    fn from(canonical: CanonicalMeasurement) -> Self {
        serde_json::json!({
            "device_eui": canonical.device_eui,
            "datatype": canonical.datatype,
            "location": canonical.location,
            "measurand": canonical.measurand,
            "sensor": canonical.sensor,
            "unit": canonical.unit,
            "value": canonical.value,
            "time_method": canonical.time_method.as_str(),
            "unix_time": canonical.unix_time,
            "timestring": canonical.timestring,
        })
    }
}

impl TryFrom<CanonicalMeasurement> for MeasurementRecord {
    type Error = ValidationError;

    fn try_from(canonical: CanonicalMeasurement) -> Result<Self, Self::Error> {
        MeasurementRecord::new(MeasurementInput {
            datatype: &canonical.datatype,
            location: &canonical.location,
            measurand: &canonical.measurand,
            sensor: &canonical.sensor,
            unit: &canonical.unit,
            value: &canonical.value,
            time_method: canonical.time_method,
            unix_time: canonical.unix_time,
            device_eui: &canonical.device_eui,
        })
    }
}

// ---

/// A device log message, always stamped with the server receipt time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LogRecord {
    device_eui: String,
    message: String,
    unix_time: i64,
}

impl LogRecord {
    pub fn new(device_eui: &str, message: &str, unix_time: i64) -> Result<Self, ValidationError> {
        check_device_eui(device_eui)?;
        check_label("message", message, MAX_LOG_MESSAGE_LEN)?;
        if unix_time < 0 {
            return Err(ValidationError::new("unix_time", "must not be negative"));
        }
        Ok(Self {
            device_eui: device_eui.to_string(),
            message: message.to_string(),
            unix_time,
        })
    }

    pub fn device_eui(&self) -> &str {
        &self.device_eui
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn unix_time(&self) -> i64 {
        self.unix_time
    }
}
