use crate::content::ChatMessage;
use crate::errors::TurnFailure;

/// Events exposed by `TurnStream`.
///
/// Every turn starts with `Started` and ends with exactly one of
/// `Completed`, `Cancelled` or `Failed`.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnEvent {
    /// First event of every turn.
    Started {
        turn_id: uuid::Uuid,
        conversation_id: String,
    },
    /// The tentative assistant message changed; replaces the previous one.
    MessageUpdated {
        turn_id: uuid::Uuid,
        seq: u64,
        message: ChatMessage,
    },
    /// The response body ended cleanly.
    Completed {
        turn_id: uuid::Uuid,
        message: Option<ChatMessage>,
    },
    /// The caller stopped the turn; `message` is whatever had been emitted.
    Cancelled {
        turn_id: uuid::Uuid,
        message: Option<ChatMessage>,
    },
    /// Terminal failure.
    Failed {
        turn_id: uuid::Uuid,
        error: TurnFailure,
    },
}

impl TurnEvent {
    pub fn turn_id(&self) -> uuid::Uuid {
        match self {
            Self::Started { turn_id, .. }
            | Self::MessageUpdated { turn_id, .. }
            | Self::Completed { turn_id, .. }
            | Self::Cancelled { turn_id, .. }
            | Self::Failed { turn_id, .. } => *turn_id,
        }
    }

    /// True for the last event of a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Cancelled { .. } | Self::Failed { .. }
        )
    }
}

/// How a turn that did not fail ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TurnStatus {
    Completed,
    Cancelled,
}

/// Final result of a turn that did not fail.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnOutput {
    /// Last materialized assistant message, if any output produced content.
    pub message: Option<ChatMessage>,
    pub status: TurnStatus,
}
