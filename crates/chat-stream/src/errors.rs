/// Errors raised while splitting a response body into output records.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The stream ended while a frame was still incomplete.
    #[error("stream ended mid-frame: expected {expected} bytes, {buffered} buffered")]
    Truncated { expected: usize, buffered: usize },
    /// A length prefix declared a payload larger than the configured limit.
    #[error("frame length {len} exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },
    /// Frame payload was not valid UTF-8.
    #[error("frame is not valid UTF-8: {message}")]
    InvalidUtf8 { message: String },
    /// Frame payload was not a valid output record.
    #[error("frame is not a valid output record: {message}")]
    InvalidJson { message: String },
}

impl DecodeError {
    pub(crate) fn invalid_utf8(err: impl std::fmt::Display) -> Self {
        Self::InvalidUtf8 {
            message: err.to_string(),
        }
    }

    pub(crate) fn invalid_json(err: impl std::fmt::Display) -> Self {
        Self::InvalidJson {
            message: err.to_string(),
        }
    }
}

/// Errors returned by the external collaborators (chat endpoint, function
/// handler) before they are normalized into a turn failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent.
    #[error("request failed: {message}")]
    Request { message: String },
    /// The endpoint answered with a non-success status.
    #[error("endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    /// Reading the response body failed mid-stream.
    #[error("stream read failed: {message}")]
    Read { message: String },
    /// A function-call handler could not produce a result.
    #[error("function `{name}` failed: {message}")]
    Function { name: String, message: String },
}

impl TransportError {
    /// Creates a request-level error.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    /// Creates a status error from an HTTP status code and response body.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    /// Creates a read error.
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
        }
    }

    /// Creates a function handler error.
    pub fn function(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Function {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Terminal failure of a single turn, sent through `TurnEvent::Failed`.
///
/// Every variant stops the decode loop; none are retried internally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum TurnFailure {
    /// The response body ended in the middle of a frame.
    #[error("response truncated: {message}")]
    Truncated { message: String },
    /// A frame could not be decoded.
    #[error("decode failure: {message}")]
    Decode { message: String },
    /// The remote workflow reported an error output.
    #[error("workflow rejected: {message}")]
    Rejected { message: String },
    /// The chat endpoint could not be reached or the read failed.
    #[error("transport failure: {message}")]
    Transport { message: String },
}

impl TurnFailure {
    /// Returns the human-readable message carried by the failure.
    pub fn message(&self) -> &str {
        match self {
            Self::Truncated { message }
            | Self::Decode { message }
            | Self::Rejected { message }
            | Self::Transport { message } => message,
        }
    }
}

impl From<DecodeError> for TurnFailure {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Truncated { .. } => TurnFailure::Truncated {
                message: err.to_string(),
            },
            other => TurnFailure::Decode {
                message: other.to_string(),
            },
        }
    }
}

impl From<TransportError> for TurnFailure {
    fn from(err: TransportError) -> Self {
        TurnFailure::Transport {
            message: err.to_string(),
        }
    }
}

/// Top-level error type for the public API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input.
    #[error("validation error: {0}")]
    Validation(String),
    /// A collaborator failed outside of a running turn.
    #[error(transparent)]
    Transport(TransportError),
    /// A started turn ended in a terminal failure.
    #[error(transparent)]
    TurnFailed(TurnFailure),
    /// The workflow kept requesting function calls past the configured limit.
    #[error("function call loop exceeded {rounds} rounds")]
    FunctionLoop { rounds: usize },
    /// Internal protocol misuse or invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ChatError {
    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

impl From<TurnFailure> for ChatError {
    fn from(value: TurnFailure) -> Self {
        ChatError::TurnFailed(value)
    }
}

impl From<TransportError> for ChatError {
    fn from(value: TransportError) -> Self {
        ChatError::Transport(value)
    }
}
