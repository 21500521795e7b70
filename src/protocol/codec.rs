//! JSON codec for Feathers payload frames.
//!
//! Inbound payloads are decoded into [`Message`]s, outbound calls are encoded
//! from [`CallMessage`]. Decoding is pure: dispatch happens in the connection.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Errors that can occur while decoding a payload frame.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame is not valid JSON or lacks required fields.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// The `type` discriminant is outside {0, 1}.
    #[error("Unexpected message type: {0}")]
    UnexpectedMessageType(u64),
}

/// Error object reported by the server in a call result.
///
/// Example: `{"name":"NotAuthenticated","message":"No auth token","code":401}`
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{name}: {message}")]
pub struct ServerError {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default, rename = "className")]
    pub class_name: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub errors: Value,
}

impl ServerError {
    /// Builds an error from whatever the server put in the error slot.
    ///
    /// Objects are read field by field; any other value becomes the message.
    #[must_use]
    /// A field of the wrong type is treated as absent, so a `null` message
    /// or a `"401"` code does not cost the other fields.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(mut fields) => {
                let text = |fields: &Map<String, Value>, key: &str| {
                    fields.get(key).and_then(Value::as_str).map(str::to_string)
                };
                Self {
                    name: text(&fields, "name").unwrap_or_else(|| "Error".to_string()),
                    message: text(&fields, "message").unwrap_or_default(),
                    code: fields.get("code").and_then(error_code),
                    class_name: text(&fields, "className"),
                    data: fields.remove("data").unwrap_or(Value::Null),
                    errors: fields.remove("errors").unwrap_or(Value::Null),
                }
            }
            Value::String(message) => Self::with_message(message),
            other => Self::with_message(other.to_string()),
        }
    }

    /// Numeric error code (e.g. `401`), if the server sent one.
    #[must_use]
    pub fn code(&self) -> Option<i64> {
        self.code
    }

    fn with_message(message: String) -> Self {
        Self {
            name: "Error".to_string(),
            message,
            code: None,
            class_name: None,
            data: Value::Null,
            errors: Value::Null,
        }
    }
}

/// Feathers sends numeric codes, but some servers stringify them.
fn error_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A decoded inbound payload message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Broadcast event, type `0`.
    ///
    /// Wire: `{"type":0,"data":["devices patched",{"status":"online"}]}`
    Event { name: String, payload: Value },

    /// Result of a call issued by this client, type `1`.
    ///
    /// Wire (success): `{"id":3,"type":1,"data":[null,{"_id":"f0001"}]}`
    /// Wire (error):   `{"id":1,"type":1,"data":[{"name":"NotAuthenticated",...}]}`
    CallResult {
        id: u64,
        outcome: Result<Value, ServerError>,
    },
}

/// Outbound call message.
///
/// Serializes as `{"id":<id>,"type":0,"data":[<method>, ...args]}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallMessage {
    pub id: u64,
    #[serde(rename = "type")]
    kind: u64,
    pub data: Vec<Value>,
}

impl CallMessage {
    /// Creates a call of `method` with the given arguments.
    #[must_use]
    pub fn new(id: u64, method: &str, args: Vec<Value>) -> Self {
        let mut data = Vec::with_capacity(args.len() + 1);
        data.push(Value::String(method.to_string()));
        data.extend(args);
        Self {
            id,
            kind: PayloadCodec::EVENT,
            data,
        }
    }
}

/// Codec for Feathers JSON payloads.
pub struct PayloadCodec;

impl PayloadCodec {
    /// Discriminant of events (inbound) and calls (outbound).
    pub const EVENT: u64 = 0;
    /// Discriminant of call results.
    pub const CALL_RESULT: u64 = 1;

    /// Encodes a call into its JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if an argument fails to serialize.
    pub fn encode(call: &CallMessage) -> Result<String, serde_json::Error> {
        serde_json::to_string(call)
    }

    /// Decodes a JSON payload into a [`Message`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] when `type` or `data` is
    /// missing or misshapen and [`ProtocolError::UnexpectedMessageType`] when
    /// `type` is not `0` or `1`.
    pub fn decode(value: Value) -> Result<Message, ProtocolError> {
        let Value::Object(mut object) = value else {
            return Err(malformed("payload is not a JSON object"));
        };

        let kind = object
            .get("type")
            .ok_or_else(|| malformed("missing `type`"))?
            .as_u64()
            .ok_or_else(|| malformed("`type` is not a non-negative integer"))?;

        match kind {
            Self::EVENT => decode_event(&mut object),
            Self::CALL_RESULT => decode_call_result(&mut object),
            other => Err(ProtocolError::UnexpectedMessageType(other)),
        }
    }
}

fn decode_event(object: &mut Map<String, Value>) -> Result<Message, ProtocolError> {
    let mut data = take_data(object)?.into_iter();

    let name = match data.next() {
        Some(Value::String(name)) => name,
        Some(_) => return Err(malformed("event name is not a string")),
        None => return Err(malformed("event is missing its name")),
    };
    let payload = data
        .next()
        .ok_or_else(|| malformed("event is missing its payload"))?;

    Ok(Message::Event { name, payload })
}

fn decode_call_result(object: &mut Map<String, Value>) -> Result<Message, ProtocolError> {
    let id = object
        .get("id")
        .ok_or_else(|| malformed("call result is missing `id`"))?
        .as_u64()
        .ok_or_else(|| malformed("call result `id` is not a non-negative integer"))?;

    let mut data = take_data(object)?.into_iter();

    // Servers may omit the result slot on failure: `[error]`.
    let error = data
        .next()
        .ok_or_else(|| malformed("call result has no error slot"))?;
    let outcome = if error.is_null() {
        Ok(data.next().unwrap_or(Value::Null))
    } else {
        Err(ServerError::from_value(error))
    };

    Ok(Message::CallResult { id, outcome })
}

fn take_data(object: &mut Map<String, Value>) -> Result<Vec<Value>, ProtocolError> {
    match object.remove("data") {
        Some(Value::Array(data)) => Ok(data),
        Some(_) => Err(malformed("`data` is not an array")),
        None => Err(malformed("missing `data`")),
    }
}

fn malformed(reason: &str) -> ProtocolError {
    ProtocolError::MalformedPayload(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_call() {
        let call = CallMessage::new(1, "get", vec![json!("devices"), json!("f0001"), json!({})]);
        let encoded = PayloadCodec::encode(&call).unwrap();
        assert_eq!(
            encoded,
            r#"{"id":1,"type":0,"data":["get","devices","f0001",{}]}"#
        );
    }

    #[test]
    fn test_decode_event() {
        let msg = PayloadCodec::decode(json!({
            "type": 0,
            "data": ["ezdevs patched", {"_id": "JTB4E62DEA32B5", "status": "online"}]
        }))
        .unwrap();

        assert_eq!(
            msg,
            Message::Event {
                name: "ezdevs patched".to_string(),
                payload: json!({"_id": "JTB4E62DEA32B5", "status": "online"}),
            }
        );
    }

    #[test]
    fn test_decode_call_success() {
        let msg = PayloadCodec::decode(json!({
            "id": 3,
            "type": 1,
            "data": [null, {"githubId": "225513"}]
        }))
        .unwrap();

        assert_eq!(
            msg,
            Message::CallResult {
                id: 3,
                outcome: Ok(json!({"githubId": "225513"})),
            }
        );
    }

    #[test]
    fn test_decode_call_error_without_result_slot() {
        let msg = PayloadCodec::decode(json!({
            "id": 1,
            "type": 1,
            "data": [{
                "name": "NotAuthenticated",
                "message": "No auth token",
                "code": 401,
                "className": "not-authenticated",
                "data": {},
                "errors": {}
            }]
        }))
        .unwrap();

        match msg {
            Message::CallResult { id, outcome: Err(err) } => {
                assert_eq!(id, 1);
                assert_eq!(err.name, "NotAuthenticated");
                assert_eq!(err.message, "No auth token");
                assert_eq!(err.code(), Some(401));
                assert_eq!(err.class_name.as_deref(), Some("not-authenticated"));
                assert_eq!(err.to_string(), "NotAuthenticated: No auth token");
            }
            other => panic!("Expected failed CallResult, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_call_string_error() {
        let msg = PayloadCodec::decode(json!({"id": 9, "type": 1, "data": ["boom", null]})).unwrap();
        match msg {
            Message::CallResult { outcome: Err(err), .. } => {
                assert_eq!(err.message, "boom");
                assert_eq!(err.code(), None);
            }
            other => panic!("Expected failed CallResult, got {other:?}"),
        }
    }

    #[test]
    fn test_server_error_keeps_fields_around_odd_types() {
        let err = ServerError::from_value(json!({
            "name": "BadRequest",
            "message": null,
            "code": 400,
            "errors": {"email": "taken"}
        }));
        assert_eq!(err.name, "BadRequest");
        assert_eq!(err.message, "");
        assert_eq!(err.code(), Some(400));
        assert_eq!(err.errors, json!({"email": "taken"}));

        let err = ServerError::from_value(json!({
            "name": "NotAuthenticated",
            "message": "No auth token",
            "code": "401"
        }));
        assert_eq!(err.name, "NotAuthenticated");
        assert_eq!(err.message, "No auth token");
        assert_eq!(err.code(), Some(401));

        let err = ServerError::from_value(json!({"name": null, "message": "boom", "code": 1.5}));
        assert_eq!(err.name, "Error");
        assert_eq!(err.message, "boom");
        assert_eq!(err.code(), None);
        assert_eq!(err.class_name, None);
    }

    #[test]
    fn test_decode_missing_type() {
        let err = PayloadCodec::decode(json!({"data": ["x", 1]})).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedPayload(_)));
    }

    #[test]
    fn test_decode_unexpected_type() {
        let err = PayloadCodec::decode(json!({"type": 7, "data": []})).unwrap_err();
        assert_eq!(err, ProtocolError::UnexpectedMessageType(7));
    }

    #[test]
    fn test_decode_bad_shapes() {
        let cases = [
            json!("primus::ping::"),
            json!({"type": "0", "data": ["x", 1]}),
            json!({"type": 0}),
            json!({"type": 0, "data": {"name": "x"}}),
            json!({"type": 0, "data": []}),
            json!({"type": 0, "data": [42, {}]}),
            json!({"type": 0, "data": ["only name"]}),
            json!({"type": 1, "data": [null, {}]}),
            json!({"id": -1, "type": 1, "data": [null, {}]}),
            json!({"id": 1, "type": 1, "data": []}),
        ];
        for case in cases {
            let err = PayloadCodec::decode(case.clone()).unwrap_err();
            assert!(
                matches!(err, ProtocolError::MalformedPayload(_)),
                "expected malformed for {case}, got {err:?}"
            );
        }
    }
}
