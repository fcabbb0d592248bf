//! Streaming decoder and turn controller for chat conversations backed by a
//! workflow API.
//!
//! A turn POSTs the conversation history to a chat endpoint and receives a
//! framed stream of workflow output records. [`StreamDecoder`] turns those
//! bytes into successive snapshots of the assistant's reply;
//! [`Conversation`] owns the history, runs turns, and loops through
//! function calls requested by the workflow.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chat_stream::http::{ChatClientConfig, HttpChatTransport};
//! use chat_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ChatError> {
//! let config = ChatClientConfig::from_env()?;
//! let options = config.turn_options();
//! let mut chat = Conversation::builder(Arc::new(HttpChatTransport::new(config)?))
//!     .workflow_deployment_id("my-deployment")
//!     .options(options)
//!     .build()?;
//!
//! let report = chat.append("What's the weather in Boston?").await?;
//! if let Some(message) = report.message {
//!     println!("{}", message.content.text());
//! }
//! # Ok(())
//! # }
//! ```

/// Per-output content accumulation for one turn.
pub mod accumulator;
/// Chat message and content types.
pub mod content;
/// Conversation state, function-call follow-ups, stop and reload.
pub mod conversation;
/// Bytes-in, snapshots-out decoder for a single turn.
pub mod decoder;
/// Public error types.
pub mod errors;
/// Record framing over the raw response body.
pub mod frame;
/// reqwest-backed transport, function handler and feedback client.
pub mod http;
/// Reduction of accumulated outputs into one assistant message.
pub mod materialize;
/// Process-wide logging setup.
pub mod observability;
/// Per-turn options.
pub mod options;
/// Common imports for typical usage.
pub mod prelude;
/// Workflow output records as they appear on the wire.
pub mod record;
/// Turn events and results.
pub mod stream;
/// Transport and function-call seams.
pub mod transport;
/// Spawned turn task, turn stream, and abort handle.
pub mod turn;

pub use accumulator::OutputAccumulator;
pub use content::{ChatMessage, ChatMessageContent, ChatRole, FunctionCall};
pub use conversation::{Conversation, ConversationBuilder, StopHandle, TurnReport};
pub use decoder::StreamDecoder;
pub use errors::{ChatError, DecodeError, TransportError, TurnFailure};
pub use frame::{FrameSource, Framing, LengthPrefixedDecoder, NewlineDelimitedDecoder};
pub use materialize::materialize;
pub use observability::init_observability;
pub use options::TurnOptions;
pub use record::{OutputRecord, OutputState, OutputType};
pub use stream::{TurnEvent, TurnOutput, TurnStatus};
pub use transport::{ByteStream, ChatTransport, FunctionCallHandler, TurnRequest};
pub use turn::{AbortHandle, TurnStream, start_turn};
