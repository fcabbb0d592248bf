use std::time::Duration;

use crate::errors::ChatError;
use crate::frame::{DEFAULT_MAX_FRAME_LEN, Framing};

/// Per-turn behavior options.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TurnOptions {
    /// Framing of the chat endpoint's response body.
    pub framing: Framing,
    /// Optional deadline for the whole turn, from request to last byte.
    pub timeout: Option<Duration>,
    /// Bounded event buffer size between the turn task and its consumer.
    pub stream_buffer_capacity: usize,
    /// Largest accepted frame payload in bytes.
    pub max_frame_len: usize,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            framing: Framing::default(),
            timeout: None,
            stream_buffer_capacity: 128,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl TurnOptions {
    pub fn framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = capacity;
        self
    }

    pub fn max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ChatError> {
        if self.stream_buffer_capacity == 0 {
            return Err(ChatError::Validation(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        if self.max_frame_len == 0 {
            return Err(ChatError::Validation(
                "max_frame_len must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
