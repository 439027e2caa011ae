//! Value serializers.
//!
//! A serializer turns an application [`Value`] into a wire [`Payload`] and
//! back. Raw values pass through untouched with flags 0; structured values
//! are encoded and marked with the serializer's flag bit. Each serializer
//! only decodes its own bit - a payload written by the other serializer
//! comes back as raw bytes, untouched.

use crate::value::{FLAG_JSON, FLAG_STRUCTURED, Payload, Value};

/// Encode values to payloads and back.
pub trait Serializer: Send + Sync {
    /// Encode a value. `None` means there is nothing to transmit and the
    /// caller should not dispatch the request.
    fn serialize(&self, value: &Value) -> Option<Payload>;

    /// Decode a payload. `None` means the payload claimed this serializer's
    /// encoding but could not be decoded.
    fn deserialize(&self, payload: Payload) -> Option<Value>;
}

/// The traditional structured serializer: MessagePack, flag bit 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredSerializer;

impl Serializer for StructuredSerializer {
    fn serialize(&self, value: &Value) -> Option<Payload> {
        match value {
            Value::Raw(data) => Some(Payload::raw(data.clone())),
            Value::Structured(doc) => match rmp_serde::to_vec(doc) {
                Ok(data) => Some(Payload {
                    data,
                    flags: FLAG_STRUCTURED,
                }),
                Err(err) => {
                    log::warn!("structured serializer failed to encode value: {err}");
                    None
                }
            },
        }
    }

    fn deserialize(&self, payload: Payload) -> Option<Value> {
        if payload.flags & FLAG_STRUCTURED == 0 {
            return Some(Value::Raw(payload.data));
        }
        match rmp_serde::from_slice(&payload.data) {
            Ok(doc) => Some(Value::Structured(doc)),
            Err(err) => {
                log::warn!("structured serializer failed to decode payload: {err}");
                None
            }
        }
    }
}

/// The JSON serializer, flag bit 4.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Option<Payload> {
        match value {
            Value::Raw(data) => Some(Payload::raw(data.clone())),
            Value::Structured(doc) => match serde_json::to_vec(doc) {
                Ok(data) => Some(Payload {
                    data,
                    flags: FLAG_JSON,
                }),
                Err(err) => {
                    log::warn!("json serializer failed to encode value: {err}");
                    None
                }
            },
        }
    }

    fn deserialize(&self, payload: Payload) -> Option<Value> {
        if payload.flags & FLAG_JSON == 0 {
            return Some(Value::Raw(payload.data));
        }
        match serde_json::from_slice(&payload.data) {
            Ok(doc) => Some(Value::Structured(doc)),
            Err(err) => {
                log::warn!("json serializer failed to decode payload: {err}");
                None
            }
        }
    }
}
