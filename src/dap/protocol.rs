use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum_macros::{Display, EnumString, IntoStaticStr};

#[derive(Copy, Clone, PartialEq, Eq, Debug, EnumString, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum MessageKind {
    Request,
    Response,
    Event,
}

/// DAP request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DapRequest {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub arguments: Value,
}

impl DapRequest {
    pub fn new(seq: i64, command: impl Into<String>, arguments: Value) -> Self {
        Self {
            seq,
            r#type: "request".to_string(),
            command: command.into(),
            arguments,
        }
    }

    pub fn into_value(self) -> Value {
        let mut message = json!({
            "type": self.r#type,
            "seq": self.seq,
            "command": self.command,
        });
        if !self.arguments.is_null() {
            message["arguments"] = self.arguments;
        }
        message
    }
}

/// DAP response envelope.
///
/// Note: the DAP specification allows responses with no `body` field at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DapResponse {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: String,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// DAP event envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DapEvent {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

pub fn kind(message: &Value) -> Option<MessageKind> {
    message.get("type")?.as_str()?.parse().ok()
}

pub fn seq(message: &Value) -> Option<i64> {
    message.get("seq")?.as_i64()
}

pub fn request_seq(message: &Value) -> Option<i64> {
    message.get("request_seq")?.as_i64()
}

pub fn command(message: &Value) -> Option<&str> {
    message.get("command")?.as_str()
}

pub fn event(message: &Value) -> Option<&str> {
    message.get("event")?.as_str()
}

pub fn is_response_to(message: &Value, seq: i64, command: &str) -> bool {
    kind(message) == Some(MessageKind::Response)
        && request_seq(message) == Some(seq)
        && self::command(message) == Some(command)
}

/// Build a response to `request` echoing its `seq` and `command` fields as they are,
/// so a reply can be produced even for a malformed request.
pub fn reply(request: &Value, success: bool, body: Value) -> Value {
    json!({
        "type": "response",
        "request_seq": request.get("seq").cloned().unwrap_or(Value::Null),
        "success": success,
        "command": request.get("command").cloned().unwrap_or(Value::Null),
        "body": body,
    })
}

/// Build a `success: false` response carrying an error text.
pub fn error_reply(request: &Value, error: impl ToString) -> Value {
    let text = error.to_string();
    let mut response = reply(request, false, json!({ "error": { "id": -1, "format": text } }));
    response["message"] = Value::String(text);
    response
}
