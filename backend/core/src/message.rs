use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HostError, HostResult};

/// Envelope `type` used for replies to a correlated request.
pub const RESPONSE_TYPE: &str = "response";

/// Envelope `target` addressing every peer.
pub const BROADCAST_TARGET: &str = "*";

/// Wire format exchanged over a cross-context transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageEnvelope {
    pub fn new(
        kind: impl Into<String>,
        data: Value,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            data,
            source: source.into(),
            target: target.into(),
            request_id: None,
            error: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Build the reply to `request`, addressed back at its source.
    pub fn response_to(
        request: &MessageEnvelope,
        source: impl Into<String>,
        result: Result<Value, String>,
    ) -> Self {
        let (data, error) = match result {
            Ok(data) => (data, None),
            Err(error) => (Value::Null, Some(error)),
        };
        Self {
            kind: RESPONSE_TYPE.to_string(),
            data,
            source: source.into(),
            target: request.source.clone(),
            request_id: request.request_id.clone(),
            error,
        }
    }

    /// Parse and structurally validate a raw JSON message.
    ///
    /// Envelopes missing `type`, `source` or `target` (or carrying empty values)
    /// are rejected.
    pub fn parse(raw: &str) -> HostResult<Self> {
        let envelope: MessageEnvelope = serde_json::from_str(raw)
            .map_err(|e| HostError::Validation(format!("malformed envelope: {}", e)))?;
        envelope.validate()?;
        Ok(envelope)
    }

    pub fn validate(&self) -> HostResult<()> {
        if self.kind.is_empty() || self.source.is_empty() || self.target.is_empty() {
            return Err(HostError::Validation(
                "envelope requires non-empty type, source and target".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_response(&self) -> bool {
        self.kind == RESPONSE_TYPE
    }

    /// Whether a peer identified by `peer_id` should process this envelope.
    pub fn is_addressed_to(&self, peer_id: &str) -> bool {
        self.target == peer_id || self.target == BROADCAST_TARGET
    }

    pub fn to_json(&self) -> HostResult<String> {
        serde_json::to_string(self).map_err(|e| HostError::Transport(e.to_string()))
    }
}

/// Payload emitted on `{target}:{action}` for an in-process request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage {
    pub request_id: String,
    #[serde(default)]
    pub payload: Value,
    /// Event name the responder must emit its reply on.
    pub response_channel: String,
}

/// Payload emitted on `response:{requestId}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseMessage {
    pub fn ok(data: Value) -> Self {
        Self { data, error: None }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            data: Value::Null,
            error: Some(error.into()),
        }
    }

    pub fn into_result(self) -> Result<Value, String> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data),
        }
    }
}

/// Event name a response for `request_id` travels on.
pub fn response_channel(request_id: &str) -> String {
    format!("response:{}", request_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_valid_envelope() {
        let raw = r#"{"type":"cart:add","data":{"sku":"A1"},"source":"shop","target":"host","requestId":"r-1"}"#;
        let env = MessageEnvelope::parse(raw).unwrap();
        assert_eq!(env.kind, "cart:add");
        assert_eq!(env.request_id.as_deref(), Some("r-1"));
        assert_eq!(env.data["sku"], "A1");
    }

    #[test]
    fn test_parse_rejects_missing_source() {
        let raw = r#"{"type":"cart:add","data":{},"target":"host"}"#;
        assert!(matches!(
            MessageEnvelope::parse(raw),
            Err(HostError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_rejects_empty_type() {
        let raw = r#"{"type":"","source":"shop","target":"host"}"#;
        assert!(MessageEnvelope::parse(raw).is_err());
        assert!(MessageEnvelope::parse("not json").is_err());
    }

    #[test]
    fn test_response_to_swaps_direction() {
        let req = MessageEnvelope::new("ping", json!({}), "shop", "host").with_request_id("r-9");
        let resp = MessageEnvelope::response_to(&req, "host", Err("boom".into()));
        assert!(resp.is_response());
        assert_eq!(resp.target, "shop");
        assert_eq!(resp.request_id.as_deref(), Some("r-9"));
        assert_eq!(resp.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_addressing() {
        let env = MessageEnvelope::new("x", Value::Null, "a", BROADCAST_TARGET);
        assert!(env.is_addressed_to("anyone"));
        let direct = MessageEnvelope::new("x", Value::Null, "a", "b");
        assert!(direct.is_addressed_to("b"));
        assert!(!direct.is_addressed_to("c"));
    }

    #[test]
    fn test_response_message_result() {
        assert_eq!(ResponseMessage::ok(json!(1)).into_result(), Ok(json!(1)));
        assert_eq!(ResponseMessage::err("no").into_result(), Err("no".to_string()));
        assert_eq!(response_channel("abc"), "response:abc");
    }
}
