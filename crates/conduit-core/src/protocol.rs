//! JSON-RPC 2.0 envelope types
//!
//! Every transport carries exactly these envelopes. Stdio frames them one per
//! line, HTTP carries one per POST body and WebSocket one per text frame.
//!
//! Inbound messages are classified by their members rather than by trial
//! deserialization: `method` plus `id` is a request, `method` alone a
//! notification, and `id` alone a response carrying exactly one of `result`
//! or `error`. Anything else, including a `jsonrpc` other than `"2.0"`, fails
//! to parse with a message naming the problem.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Protocol version announced during the `initialize` handshake
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC version
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC error codes
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// Method names used by the client
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    /// Sent once the handshake response has been processed
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const PING: &str = "ping";
    /// Log message notification; forwarded error events use it by default
    pub const LOG_MESSAGE: &str = "notifications/message";
    pub const CANCELLED: &str = "notifications/cancelled";
}

/// The `jsonrpc` member, which only ever holds `"2.0"`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Version;

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let version = String::deserialize(deserializer)?;
        if version == JSONRPC_VERSION {
            Ok(Version)
        } else {
            Err(de::Error::custom(format!(
                "unsupported jsonrpc version '{}'",
                version
            )))
        }
    }
}

/// Request ID, numeric or textual
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// Call that expects a response with the same id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: Version,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: Version,
            id: id.into(),
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(self, params: Value) -> Self {
        Self {
            params: Some(params),
            ..self
        }
    }
}

/// One-way message; never answered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNotification {
    pub jsonrpc: Version,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcNotification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: Version,
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(self, params: Value) -> Self {
        Self {
            params: Some(params),
            ..self
        }
    }
}

/// What a response carries: serialized as its `result` or `error` member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Value),
    Error(ErrorObject),
}

/// Answer to a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: Version,
    pub id: RequestId,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl RpcResponse {
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: Version,
            id: id.into(),
            outcome: Outcome::Result(result),
        }
    }

    pub fn error(id: impl Into<RequestId>, error: ErrorObject) -> Self {
        Self {
            jsonrpc: Version,
            id: id.into(),
            outcome: Outcome::Error(error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Result(_))
    }

    pub fn into_result(self) -> Result<Value, ErrorObject> {
        match self.outcome {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(error) => Err(error),
        }
    }
}

/// The `error` member of a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(self, data: Value) -> Self {
        Self {
            data: Some(data),
            ..self
        }
    }

    pub fn method_not_found() -> Self {
        Self::new(codes::METHOD_NOT_FOUND, "Method not found")
    }

    pub fn internal_error() -> Self {
        Self::new(codes::INTERNAL_ERROR, "Internal error")
    }

    /// Codes in -32000..=-32099, reserved for implementation-defined server errors
    pub fn is_server_error(&self) -> bool {
        (-32099..=-32000).contains(&self.code)
    }
}

impl std::fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// One JSON-RPC message in either direction
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    Request(RpcRequest),
    Response(RpcResponse),
    Notification(RpcNotification),
}

impl Envelope {
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    pub fn is_notification(&self) -> bool {
        matches!(self, Self::Notification(_))
    }

    /// Correlation id; notifications have none
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Response(res) => Some(&res.id),
            Self::Notification(_) => None,
        }
    }

    /// Method name for requests and notifications
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }
}

impl From<RpcRequest> for Envelope {
    fn from(request: RpcRequest) -> Self {
        Self::Request(request)
    }
}

impl From<RpcResponse> for Envelope {
    fn from(response: RpcResponse) -> Self {
        Self::Response(response)
    }
}

impl From<RpcNotification> for Envelope {
    fn from(notification: RpcNotification) -> Self {
        Self::Notification(notification)
    }
}

/// Every member an inbound message may carry
#[derive(Deserialize)]
struct Members {
    jsonrpc: Version,
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    // `"result": null` is a valid result, so presence is tracked separately
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<Members> for Envelope {
    type Error = String;

    fn try_from(m: Members) -> Result<Self, String> {
        match (m.id, m.method) {
            (Some(id), Some(method)) => Ok(Self::Request(RpcRequest {
                jsonrpc: m.jsonrpc,
                id,
                method,
                params: m.params,
            })),
            (None, Some(method)) => Ok(Self::Notification(RpcNotification {
                jsonrpc: m.jsonrpc,
                method,
                params: m.params,
            })),
            (Some(id), None) => {
                let outcome = match (m.result, m.error) {
                    (Some(result), None) => Outcome::Result(result),
                    (None, Some(error)) => Outcome::Error(error),
                    (Some(_), Some(_)) => {
                        return Err(format!("response {} has both result and error", id));
                    }
                    (None, None) => {
                        return Err(format!("response {} has neither result nor error", id));
                    }
                };
                Ok(Self::Response(RpcResponse {
                    jsonrpc: m.jsonrpc,
                    id,
                    outcome,
                }))
            }
            (None, None) => Err("message has neither method nor id".to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Members::deserialize(deserializer)?
            .try_into()
            .map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(text: &str) -> Result<Envelope, serde_json::Error> {
        serde_json::from_str(text)
    }

    #[test]
    fn test_outbound_shapes() {
        let req = serde_json::to_value(RpcRequest::new(1i64, methods::PING)).unwrap();
        assert_eq!(req, json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}));

        let notif = RpcNotification::new(methods::INITIALIZED).with_params(json!({"a": 1}));
        assert_eq!(
            serde_json::to_value(Envelope::from(notif)).unwrap(),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized", "params": {"a": 1}})
        );

        let res = RpcResponse::error("a-1", ErrorObject::method_not_found());
        assert_eq!(
            serde_json::to_value(res).unwrap(),
            json!({"jsonrpc": "2.0", "id": "a-1", "error": {"code": -32601, "message": "Method not found"}})
        );
    }

    #[test]
    fn test_classified_by_members() {
        let msg = parse(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        assert!(msg.is_request());
        assert_eq!(msg.method(), Some("ping"));

        let msg = parse(r#"{"jsonrpc":"2.0","id":"a-7","result":{"ok":true}}"#).unwrap();
        assert!(msg.is_response());
        assert_eq!(msg.id(), Some(&RequestId::from("a-7")));

        let msg = parse(r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#).unwrap();
        assert!(msg.is_notification());
        assert!(msg.id().is_none());
    }

    #[test]
    fn test_null_result_is_success() {
        let Envelope::Response(res) = parse(r#"{"jsonrpc":"2.0","id":4,"result":null}"#).unwrap() else {
            panic!("expected response");
        };
        assert!(res.is_success());
        assert_eq!(res.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn test_error_response_keeps_data() {
        let Envelope::Response(res) = parse(
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32000,"message":"boom","data":{"x":1}}}"#,
        )
        .unwrap() else {
            panic!("expected response");
        };
        let err = res.into_result().unwrap_err();
        assert!(err.is_server_error());
        assert_eq!(err.data, Some(json!({"x": 1})));
        assert_eq!(err.to_string(), "[-32000] boom");
    }

    #[test]
    fn test_malformed_messages_rejected() {
        let cases = [
            (r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#, "unsupported jsonrpc version"),
            (r#"{"id":1,"method":"ping"}"#, "jsonrpc"),
            (r#"{"jsonrpc":"2.0","id":1,"result":1,"error":{"code":1,"message":"x"}}"#, "both result and error"),
            (r#"{"jsonrpc":"2.0","id":1}"#, "neither result nor error"),
            (r#"{"jsonrpc":"2.0","params":[]}"#, "neither method nor id"),
        ];
        for (text, expected) in cases {
            let err = parse(text).unwrap_err().to_string();
            assert!(err.contains(expected), "{}: {}", text, err);
        }
    }

    #[test]
    fn test_request_id_display() {
        assert_eq!(RequestId::from(42i64).to_string(), "42");
        assert_eq!(RequestId::from("req-1").to_string(), "req-1");
    }
}
