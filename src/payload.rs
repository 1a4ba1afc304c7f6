//! Authentication and payload extraction for webhook calls.
//!
//! Turns raw headers and body bytes into an [`ExtractedPayload`] or a
//! classified rejection. Nothing here touches the database.

use axum::http::{header, HeaderMap};
use serde_json::{Map, Value};

use crate::error::IngestError;

// ---

/// Shared-secret header set by the network server integration.
pub const API_KEY_HEADER: &str = "x-downlink-apikey";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing X-Downlink-Apikey header")]
    MissingKey,

    #[error("invalid application key")]
    InvalidKey,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("missing Content-Length header")]
    MissingContentLength,

    #[error("non-numeric Content-Length '{0}'")]
    InvalidContentLength(String),

    #[error("empty body")]
    EmptyBody,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    #[error("missing key '{0}'")]
    MissingField(&'static str),

    #[error("'{field}' must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("unknown message type '{message_type}' from device {device_eui}")]
    UnknownMessageType {
        message_type: String,
        device_eui: String,
    },
}

/// The two kinds of uplink the decoder emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// `Messwert`
    Measurement,
    /// `LogEintrag`
    LogEntry,
}

impl MessageType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Messwert" => Some(Self::Measurement),
            "LogEintrag" => Some(Self::LogEntry),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Measurement => "measurement",
            Self::LogEntry => "log entry",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPayload {
    pub message_type: MessageType,
    /// The `decoded_payload` object.
    pub fields: Map<String, Value>,
    pub device_eui: String,
}

impl ExtractedPayload {
    /// A required string field of `decoded_payload`.
    pub fn str_field(&self, key: &'static str) -> Result<&str, ParseError> {
        match self.fields.get(key) {
            None => Err(ParseError::MissingField(key)),
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(ParseError::WrongType {
                field: key,
                expected: "a string",
            }),
        }
    }

    /// A required field of `decoded_payload`, any JSON type.
    pub fn field(&self, key: &'static str) -> Result<&Value, ParseError> {
        self.fields.get(key).ok_or(ParseError::MissingField(key))
    }
}

/// Run every extraction step in order: auth, body, JSON, structure, dispatch.
pub fn extract(headers: &HeaderMap, body: &[u8], app_key: &str) -> Result<ExtractedPayload, IngestError> {
    // ---
    authenticate(headers, app_key)?;

    let len = content_length(headers)?;
    let body = &body[..len.min(body.len())];

    let document: Value = serde_json::from_slice(unwrap_byte_literal(body))
        .map_err(|e| ParseError::MalformedJson(e.to_string()))?;

    Ok(structure(&document)?)
}

/// Compare the presented key with the configured one.
pub fn authenticate(headers: &HeaderMap, app_key: &str) -> Result<(), AuthError> {
    let presented = headers.get(API_KEY_HEADER).ok_or(AuthError::MissingKey)?;
    if constant_time_eq(presented.as_bytes(), app_key.as_bytes()) {
        Ok(())
    } else {
        Err(AuthError::InvalidKey)
    }
}

/// Declared body length; must be present, numeric and positive.
pub fn content_length(headers: &HeaderMap) -> Result<usize, TransportError> {
    let raw = headers
        .get(header::CONTENT_LENGTH)
        .ok_or(TransportError::MissingContentLength)?;
    let text = String::from_utf8_lossy(raw.as_bytes());
    let len = text
        .trim()
        .parse::<usize>()
        .map_err(|_| TransportError::InvalidContentLength(text.to_string()))?;
    if len == 0 {
        return Err(TransportError::EmptyBody);
    }
    Ok(len)
}

/// Strip a `b'...'` / `b"..."` byte-string rendering around the JSON body.
///
/// Bodies without that wrapping are returned unchanged.
pub fn unwrap_byte_literal(body: &[u8]) -> &[u8] {
    match body {
        [b'b', quote @ (b'\'' | b'"'), inner @ .., last] if last == quote => inner,
        _ => body,
    }
}

fn structure(document: &Value) -> Result<ExtractedPayload, ParseError> {
    // ---
    let fields = document
        .pointer("/uplink_message/decoded_payload")
        .ok_or(ParseError::MissingField("uplink_message.decoded_payload"))?
        .as_object()
        .ok_or(ParseError::WrongType {
            field: "uplink_message.decoded_payload",
            expected: "an object",
        })?;

    let device_eui = document
        .pointer("/end_device_ids/dev_eui")
        .ok_or(ParseError::MissingField("end_device_ids.dev_eui"))?
        .as_str()
        .ok_or(ParseError::WrongType {
            field: "end_device_ids.dev_eui",
            expected: "a string",
        })?;

    let raw_type = match fields.get("messagetyp") {
        None => return Err(ParseError::MissingField("messagetyp")),
        Some(Value::String(s)) => s.as_str(),
        Some(_) => {
            return Err(ParseError::WrongType {
                field: "messagetyp",
                expected: "a string",
            })
        }
    };

    let message_type =
        MessageType::parse(raw_type).ok_or_else(|| ParseError::UnknownMessageType {
            message_type: raw_type.to_string(),
            device_eui: device_eui.to_string(),
        })?;

    Ok(ExtractedPayload {
        message_type,
        fields: fields.clone(),
        device_eui: device_eui.to_string(),
    })
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}
