//! Seams to the external collaborators of a turn: the chat endpoint that
//! streams workflow output records, and the handler that executes function
//! calls requested by the workflow.

use std::pin::Pin;

use crate::content::{ChatMessage, FunctionCall};
use crate::errors::TransportError;

/// Raw response body chunks as delivered by the transport.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, TransportError>> + Send + 'static>>;

/// Body of one turn request.
///
/// Serialized as `{"id", "workflowDeploymentId", "messages"}`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    /// Local id used to correlate logs and events; never sent.
    #[serde(skip)]
    pub turn_id: uuid::Uuid,
    /// Conversation id.
    pub id: String,
    pub workflow_deployment_id: String,
    /// Full history the workflow should answer.
    pub messages: Vec<ChatMessage>,
}

impl TurnRequest {
    pub fn new(
        id: impl Into<String>,
        workflow_deployment_id: impl Into<String>,
        messages: Vec<ChatMessage>,
    ) -> Self {
        Self {
            turn_id: uuid::Uuid::new_v4(),
            id: id.into(),
            workflow_deployment_id: workflow_deployment_id.into(),
            messages,
        }
    }
}

/// Opens the streamed response for a turn.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    /// Sends the request and returns the response body as a byte stream.
    async fn open_stream(&self, request: &TurnRequest) -> Result<ByteStream, TransportError>;
}

/// Executes a function call requested by the workflow.
#[async_trait::async_trait]
pub trait FunctionCallHandler: Send + Sync {
    /// Runs `call` and returns its JSON result.
    async fn call(&self, call: &FunctionCall) -> Result<serde_json::Value, TransportError>;
}
