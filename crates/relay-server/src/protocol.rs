use serde::{Deserialize, Serialize};

use relay_core::{ConnectionId, Topic, TopicCatalog};

pub const SUBSCRIBED: &str = "subscription successful";
pub const UNSUBSCRIBED: &str = "unsubscription successful";
pub const DISCONNECTED: &str = "disconnection successful";
pub const CONNECTED: &str = "connection accepted";

/// Subscription command verbs accepted from clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Subscribe,
    Unsubscribe,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "subscribe" => Some(Self::Subscribe),
            "unsubscribe" => Some(Self::Unsubscribe),
            _ => None,
        }
    }
}

/// A validated client command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub action: Action,
    pub topic: Topic,
}

/// Inbound frame as sent by clients: `{"action": ..., "subscription": ...}`.
#[derive(Debug, Deserialize)]
struct RawRequest {
    action: Option<String>,
    #[serde(alias = "topic")]
    subscription: Option<String>,
}

/// A request rejected before touching the registry.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MalformedRequest {
    #[error("invalid request: {0}")]
    InvalidJson(String),
    #[error("missing action")]
    MissingAction,
    #[error("Action: \"{0}\" not supported")]
    UnsupportedAction(String),
    #[error("missing subscription topic")]
    MissingTopic,
    #[error("Subscription: \"{0}\" not supported")]
    UnsupportedTopic(String),
}

/// Parse and validate one inbound text frame against the topic catalog.
pub fn parse_command(raw: &str, catalog: &TopicCatalog) -> Result<Command, MalformedRequest> {
    let frame: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| MalformedRequest::InvalidJson(e.to_string()))?;
    // Struct derives also accept sequences; frames must be objects.
    if !frame.is_object() {
        return Err(MalformedRequest::InvalidJson(
            "frame must be a JSON object".into(),
        ));
    }
    let request: RawRequest = serde_json::from_value(frame)
        .map_err(|e| MalformedRequest::InvalidJson(e.to_string()))?;

    let action = request.action.ok_or(MalformedRequest::MissingAction)?;
    let action =
        Action::parse(&action).ok_or_else(|| MalformedRequest::UnsupportedAction(action.clone()))?;

    let topic = request.subscription.ok_or(MalformedRequest::MissingTopic)?;
    let topic = catalog
        .resolve(&topic)
        .map_err(|_| MalformedRequest::UnsupportedTopic(topic.clone()))?;

    Ok(Command { action, topic })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Success,
    Error,
}

impl CommandStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// `{status, message}` result returned for every control event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: CommandStatus,
    pub message: String,
}

impl CommandResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Error,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }
}

/// Frames pushed from the relay to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Connected { connection_id: ConnectionId },
    Response(CommandResponse),
    Data { topic: Topic, records: Vec<String> },
}

impl Outbound {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
