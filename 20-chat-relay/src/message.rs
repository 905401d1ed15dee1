use serde::{Deserialize, Serialize};

use crate::error::ProtocolViolation;

/// Frames sent by a client to the relay.
///
/// The wire shape is `{"ctrl": "...", "name": "...", ...}`. A `ctrl` value the
/// relay does not know decodes to [`Inbound::Unrecognized`] instead of failing,
/// so the handler can tell the peer about it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "ctrl", rename_all = "snake_case")]
pub enum Inbound {
    Help {
        #[serde(default)]
        name: String,
    },
    Login {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    Logout {
        name: String,
    },
    Message {
        name: String,
        #[serde(default)]
        text: String,
    },
    #[serde(other)]
    Unrecognized,
}

impl Inbound {
    /// Name the frame claims to originate from, if it carries one.
    pub fn name(&self) -> Option<&str> {
        match self {
            Inbound::Help { name }
            | Inbound::Login { name, .. }
            | Inbound::Logout { name }
            | Inbound::Message { name, .. } => Some(name),
            Inbound::Unrecognized => None,
        }
    }
}

/// Frames sent by the relay to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "ctrl", rename_all = "snake_case")]
pub enum Outbound {
    /// Direct reply to the connection that sent a frame. Carries `error` when
    /// the frame was rejected.
    Answer {
        #[serde(default)]
        name: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ProtocolViolation>,
    },
    LoggedIn {
        name: String,
    },
    LoggedOut {
        name: String,
    },
    /// Event fanned out to every other session, attributed to `name`.
    Broadcast {
        name: String,
        text: String,
    },
}

impl Outbound {
    pub fn answer(name: impl Into<String>, text: impl Into<String>) -> Self {
        Outbound::Answer {
            name: name.into(),
            text: text.into(),
            error: None,
        }
    }

    pub fn rejection(name: impl Into<String>, violation: ProtocolViolation) -> Self {
        Outbound::Answer {
            name: name.into(),
            text: violation.to_string(),
            error: Some(violation),
        }
    }

    /// The violation carried by an error answer, if any.
    pub fn violation(&self) -> Option<ProtocolViolation> {
        match self {
            Outbound::Answer { error, .. } => *error,
            _ => None,
        }
    }
}
