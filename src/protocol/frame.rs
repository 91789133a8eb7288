//! Wire frames.
//!
//! Every transport message carries exactly one JSON object discriminated by
//! its `type` field:
//!
//! ```text
//! {"type":"req",   "id":"req-1", "method":"health", "params":{...}}
//! {"type":"res",   "id":"req-1", "ok":true,  "payload":{...}}
//! {"type":"res",   "id":"req-1", "ok":false, "error":{"code":"...","message":"..."}}
//! {"type":"event", "event":"tick", "payload":{...}, "seq":42}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::value::ValueExt;
use crate::error::{GatewayError, Result};

/// Frame types this client understands.
pub const FRAME_TYPES: [&str; 3] = ["req", "res", "event"];

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Request awaiting a response with the same id.
    #[serde(rename = "req")]
    Request(RequestFrame),
    /// Response to a request.
    #[serde(rename = "res")]
    Response(ResponseFrame),
    /// Out-of-band server event.
    #[serde(rename = "event")]
    Event(EventFrame),
}

impl Frame {
    /// Decode a frame from a text message.
    ///
    /// Anything that is not one of the three frame shapes is a protocol error.
    pub fn from_text(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(malformed)
    }

    /// Decode a frame from a binary message holding UTF-8 JSON.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(malformed)
    }

    /// Decode an inbound text message.
    ///
    /// `Ok(None)` means the message is well-formed JSON whose `type` this
    /// client does not know; it is logged and should be skipped. Invalid JSON,
    /// a missing `type` or a bad shape for a known type is a protocol error.
    pub fn decode_text(text: &str) -> Result<Option<Self>> {
        Self::decode_value(serde_json::from_str(text).map_err(malformed)?)
    }

    /// Decode an inbound binary message holding UTF-8 JSON.
    pub fn decode_slice(bytes: &[u8]) -> Result<Option<Self>> {
        Self::decode_value(serde_json::from_slice(bytes).map_err(malformed)?)
    }

    fn decode_value(value: Value) -> Result<Option<Self>> {
        let kind = value.str_field("type")?;
        if !FRAME_TYPES.contains(&kind) {
            tracing::warn!(kind, "ignoring frame of unknown type");
            return Ok(None);
        }
        serde_json::from_value(value).map(Some).map_err(malformed)
    }

    /// Encode as a JSON text message.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Frame type as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "req",
            Self::Response(_) => "res",
            Self::Event(_) => "event",
        }
    }
}

fn malformed(e: serde_json::Error) -> GatewayError {
    GatewayError::Protocol(format!("malformed frame: {e}"))
}

/// Outbound call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Correlation id, unique among requests in flight.
    pub id: String,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestFrame {
    /// Create a request frame.
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Reply to a [`RequestFrame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Id of the request being answered.
    pub id: String,
    /// Whether the call succeeded.
    pub ok: bool,
    /// Result payload when `ok`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Error details when not `ok`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl ResponseFrame {
    /// Successful response.
    pub fn success(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// Failed response.
    pub fn failure(id: impl Into<String>, code: &str, message: &str) -> Self {
        Self {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(ErrorShape {
                code: code.to_string(),
                message: message.to_string(),
                ..ErrorShape::default()
            }),
        }
    }

    /// Payload on success (`null` when absent), [`GatewayError::Request`] otherwise.
    pub fn into_result(self, method: &str) -> Result<Value> {
        if self.ok {
            return Ok(self.payload.unwrap_or(Value::Null));
        }
        let error = self.error.unwrap_or_default();
        Err(GatewayError::Request {
            method: method.to_string(),
            code: error.code,
            message: error.message,
        })
    }
}

/// Structured error carried by a failed response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorShape {
    /// Machine-readable code.
    #[serde(default)]
    pub code: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Extra details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Whether retrying may succeed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    /// Suggested retry delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// Server-pushed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    /// Event name.
    pub event: String,
    /// Event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Server sequence number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Versions of server state this event reflects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_version: Option<StateVersion>,
}

impl EventFrame {
    /// Create an event with a payload.
    pub fn new(event: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            event: event.into(),
            payload,
            seq: None,
            state_version: None,
        }
    }
}

/// Monotonic versions of server-side state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVersion {
    /// Presence list version.
    #[serde(default)]
    pub presence: u64,
    /// Health snapshot version.
    #[serde(default)]
    pub health: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let frame = Frame::Request(RequestFrame::new("req-1", "health", None));
        let v: Value = serde_json::from_str(&frame.to_text().unwrap()).unwrap();
        assert_eq!(v, json!({"type": "req", "id": "req-1", "method": "health"}));
    }

    #[test]
    fn test_decode_response_with_error() {
        let frame = Frame::from_text(
            r#"{"type":"res","id":"x","ok":false,"error":{"code":"UNAVAILABLE","message":"busy","retryable":true,"retryAfterMs":500}}"#,
        )
        .unwrap();
        let Frame::Response(res) = frame else {
            panic!("expected response");
        };
        let error = res.error.clone().unwrap();
        assert_eq!(error.retry_after_ms, Some(500));
        assert_eq!(error.retryable, Some(true));

        let err = res.into_result("agent.run").unwrap_err();
        assert!(matches!(err, GatewayError::Request { ref code, .. } if code == "UNAVAILABLE"));
    }

    #[test]
    fn test_decode_event() {
        let frame = Frame::from_text(
            r#"{"type":"event","event":"presence","payload":{"n":1},"seq":7,"stateVersion":{"presence":3,"health":1}}"#,
        )
        .unwrap();
        assert_eq!(frame.kind(), "event");
        let Frame::Event(event) = frame else {
            panic!("expected event");
        };
        assert_eq!(event.seq, Some(7));
        assert_eq!(
            event.state_version,
            Some(StateVersion {
                presence: 3,
                health: 1
            })
        );
    }

    #[test]
    fn test_ok_response_without_payload_is_null() {
        let frame = Frame::from_slice(br#"{"type":"res","id":"a","ok":true}"#).unwrap();
        let Frame::Response(res) = frame else {
            panic!("expected response");
        };
        assert_eq!(res.into_result("m").unwrap(), Value::Null);
    }

    #[test]
    fn test_malformed_frames_are_protocol_errors() {
        for text in [
            "not json",
            r#"{"type":"bogus","id":"1"}"#,
            r#"{"id":"1","ok":true}"#,
            r#"{"type":"res","ok":true}"#,
            r#"{"type":"event"}"#,
        ] {
            let err = Frame::from_text(text).unwrap_err();
            assert!(matches!(err, GatewayError::Protocol(_)), "{text}");
        }
    }

    #[test]
    fn test_unknown_type_decodes_to_none() {
        assert_eq!(Frame::decode_text(r#"{"type":"hello","x":1}"#).unwrap(), None);
        assert_eq!(Frame::decode_slice(br#"{"type":"snapshot"}"#).unwrap(), None);

        let frame = Frame::decode_text(r#"{"type":"event","event":"tick"}"#).unwrap();
        assert_eq!(frame.map(|f| f.kind()), Some("event"));
    }

    #[test]
    fn test_decode_rejects_bad_json_missing_type_and_bad_shapes() {
        for text in [
            "not json",
            r#"{"id":"1","ok":true}"#,
            r#"{"type":7}"#,
            r#"{"type":"res","ok":true}"#,
            r#"{"type":"req","id":"1"}"#,
        ] {
            let err = Frame::decode_text(text).unwrap_err();
            assert!(matches!(err, GatewayError::Protocol(_)), "{text}");
        }
    }
}
