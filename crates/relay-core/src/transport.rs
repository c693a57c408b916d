use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::ConnectionId;

/// Result of a single push to one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// The transport reports the target no longer exists.
    ConnectionGone,
    /// The push failed for a reason that does not indicate the target is gone.
    TransientError(String),
}

impl PushOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, Self::ConnectionGone)
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::ConnectionGone => "gone",
            Self::TransientError(_) => "transient",
        }
    }
}

impl fmt::Display for PushOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransientError(reason) => write!(f, "transient: {reason}"),
            other => f.write_str(other.kind()),
        }
    }
}

/// Bidirectional push transport the relay delivers through.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn push(&self, connection_id: &ConnectionId, payload: &str) -> PushOutcome;
}

/// Lifecycle of one transport session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionState {
    /// Transitions only move forward; `Disconnected` is terminal.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Connected)
                | (Self::Connecting, Self::Disconnected)
                | (Self::Connected, Self::Disconnected)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}
