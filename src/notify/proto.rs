//! Notify protocol messages.
//!
//! Outbound commands serialize as `{"Cmd", "RequestId", "Body"}` and inbound
//! responses as `{"Command", "RequestId", "Result"}`. The body and result
//! shapes are selected by the command tag, so both are (de)serialized by
//! hand around a tag dispatch.

use serde::de::Error as _;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

pub const SUBSCRIBE_CMD: &str = "subscribe";
pub const WRITE_CMD: &str = "write";
pub const NOTIFY_CMD: &str = "notify";
pub const ACK_CMD: &str = "ack";
pub const HEARTBEAT_CMD: &str = "heartbeat";
pub const ERROR_CMD: &str = "error";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct SubscribeBody {
    pub topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PublishBody {
    pub topic: String,
    pub key: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct AckBody {
    pub group: String,
    pub topic: String,
    #[serde(rename = "Msgid")]
    pub msg_id: i64,
    pub partition: i32,
}

impl AckBody {
    /// Builds the acknowledgement for a delivered message.
    pub fn for_message(message: &MsgData) -> Self {
        Self {
            group: message.group.clone(),
            topic: message.topic.clone(),
            msg_id: message.offset,
            partition: message.partition,
        }
    }
}

/// Command payload. The variant determines the command tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandBody {
    Subscribe(SubscribeBody),
    Publish(PublishBody),
    Acknowledge(AckBody),
    HeartBeat,
}

impl CommandBody {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => SUBSCRIBE_CMD,
            Self::Publish(_) => WRITE_CMD,
            Self::Acknowledge(_) => ACK_CMD,
            Self::HeartBeat => HEARTBEAT_CMD,
        }
    }
}

/// A client command with an optional correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub request_id: Option<String>,
    pub body: CommandBody,
}

impl Command {
    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self {
            request_id: None,
            body: CommandBody::Subscribe(SubscribeBody {
                topic: topic.into(),
            }),
        }
    }

    pub fn publish(
        request_id: String,
        topic: impl Into<String>,
        key: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Some(request_id),
            body: CommandBody::Publish(PublishBody {
                topic: topic.into(),
                key: key.into(),
                data: data.into(),
            }),
        }
    }

    pub fn acknowledge(request_id: String, message: &MsgData) -> Self {
        Self {
            request_id: Some(request_id),
            body: CommandBody::Acknowledge(AckBody::for_message(message)),
        }
    }

    pub fn heartbeat(request_id: String) -> Self {
        Self {
            request_id: Some(request_id),
            body: CommandBody::HeartBeat,
        }
    }

    /// Wire tag (`Cmd`) of this command.
    pub fn name(&self) -> &'static str {
        self.body.tag()
    }

    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Command", 3)?;
        state.serialize_field("Cmd", self.name())?;
        match &self.request_id {
            Some(request_id) => state.serialize_field("RequestId", request_id)?,
            None => state.skip_field("RequestId")?,
        }
        match &self.body {
            CommandBody::Subscribe(body) => state.serialize_field("Body", body)?,
            CommandBody::Publish(body) => state.serialize_field("Body", body)?,
            CommandBody::Acknowledge(body) => state.serialize_field("Body", body)?,
            CommandBody::HeartBeat => state.serialize_field("Body", &())?,
        }
        state.end()
    }
}

#[derive(Deserialize)]
struct RawCommand {
    #[serde(rename = "Cmd")]
    cmd: String,
    #[serde(rename = "RequestId", default)]
    request_id: Option<String>,
    #[serde(rename = "Body", default)]
    body: Value,
}

impl<'de> Deserialize<'de> for Command {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawCommand::deserialize(deserializer)?;
        let body = match raw.cmd.as_str() {
            SUBSCRIBE_CMD => CommandBody::Subscribe(from_body::<_, D::Error>(raw.body)?),
            WRITE_CMD => CommandBody::Publish(from_body::<_, D::Error>(raw.body)?),
            ACK_CMD => CommandBody::Acknowledge(from_body::<_, D::Error>(raw.body)?),
            HEARTBEAT_CMD => CommandBody::HeartBeat,
            other => return Err(D::Error::custom(format!("unknown command {other:?}"))),
        };
        Ok(Self {
            request_id: raw.request_id.filter(|id| !id.is_empty()),
            body,
        })
    }
}

fn from_body<T, E>(body: Value) -> Result<T, E>
where
    T: for<'de> Deserialize<'de>,
    E: serde::de::Error,
{
    serde_json::from_value(body).map_err(E::custom)
}

/// Payload of a message notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct MsgData {
    pub group: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorResult {
    #[serde(default)]
    pub code: Value,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseResult {
    /// Message notification, the only result the read loop delivers.
    Message(MsgData),
    Error(ErrorResult),
    /// Result of any other command, kept as raw JSON.
    Other(Value),
}

/// Inbound frame from the notify server.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub command: String,
    pub request_id: Option<String>,
    pub result: ResponseResult,
}

impl Response {
    pub fn notification(message: MsgData) -> Self {
        Self {
            command: NOTIFY_CMD.to_string(),
            request_id: None,
            result: ResponseResult::Message(message),
        }
    }

    pub fn is_notification(&self) -> bool {
        matches!(self.result, ResponseResult::Message(_))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Response", 3)?;
        state.serialize_field("Command", &self.command)?;
        match &self.request_id {
            Some(request_id) => state.serialize_field("RequestId", request_id)?,
            None => state.skip_field("RequestId")?,
        }
        match &self.result {
            ResponseResult::Message(message) => state.serialize_field("Result", message)?,
            ResponseResult::Error(error) => state.serialize_field("Result", error)?,
            ResponseResult::Other(value) => state.serialize_field("Result", value)?,
        }
        state.end()
    }
}

#[derive(Deserialize)]
struct RawResponse {
    #[serde(rename = "Command")]
    command: String,
    #[serde(rename = "RequestId", default)]
    request_id: Option<String>,
    #[serde(rename = "Result", default)]
    result: Value,
}

impl<'de> Deserialize<'de> for Response {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawResponse::deserialize(deserializer)?;
        let result = match raw.command.as_str() {
            NOTIFY_CMD => ResponseResult::Message(from_body::<_, D::Error>(raw.result)?),
            // Error payloads vary between server versions; keep what does not fit.
            ERROR_CMD => match serde_json::from_value::<ErrorResult>(raw.result.clone()) {
                Ok(error) => ResponseResult::Error(error),
                Err(_) => ResponseResult::Other(raw.result),
            },
            _ => ResponseResult::Other(raw.result),
        };
        Ok(Self {
            command: raw.command,
            request_id: raw.request_id.filter(|id| !id.is_empty()),
            result,
        })
    }
}
