//! HTTP collaborators: the chat endpoint transport, the function-call
//! endpoint handler and the message feedback client, all built on `reqwest`.
//!
//! Endpoint configuration lives here so the decoding core stays free of I/O.
mod config;
mod feedback;
mod function;
mod transport;

pub use config::ChatClientConfig;
pub use feedback::{APPROVE, FeedbackRequest, HttpFeedbackClient, REJECT};
pub use function::HttpFunctionHandler;
pub use transport::HttpChatTransport;
