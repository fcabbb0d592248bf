//! Common imports for driving a conversation.
pub use crate::{
    AbortHandle, ChatError, ChatMessage, ChatMessageContent, ChatRole, ChatTransport,
    Conversation, ConversationBuilder, Framing, FunctionCall, FunctionCallHandler, StopHandle,
    StreamDecoder, TurnEvent, TurnFailure, TurnOptions, TurnReport, TurnStatus,
};
