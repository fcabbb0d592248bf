use std::time::Duration;

use tracing::{debug, info};

use crate::content::ChatMessage;
use crate::errors::{ChatError, TransportError};

use super::config::ChatClientConfig;

/// Quality recorded when the user approves a message.
pub const APPROVE: f64 = 1.0;
/// Quality recorded when the user rejects a message.
pub const REJECT: f64 = 0.0;

/// Feedback on one message, serialized as `{"messageId", "quality"}`.
///
/// `message_id` is the message's `source`, the external id the workflow
/// execution was recorded under.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    pub message_id: String,
    /// Between `REJECT` and `APPROVE` inclusive.
    pub quality: f64,
}

impl FeedbackRequest {
    pub fn new(message_id: impl Into<String>, quality: f64) -> Result<Self, ChatError> {
        let message_id = message_id.into();
        if message_id.trim().is_empty() {
            return Err(ChatError::Validation(
                "feedback message id must not be empty".into(),
            ));
        }
        if !(REJECT..=APPROVE).contains(&quality) {
            return Err(ChatError::Validation(format!(
                "feedback quality must be between {REJECT} and {APPROVE}, got {quality}"
            )));
        }
        Ok(Self {
            message_id,
            quality,
        })
    }

    /// Feedback keyed by `message.source`.
    pub fn for_message(message: &ChatMessage, quality: f64) -> Result<Self, ChatError> {
        let source = message.source.as_deref().ok_or_else(|| {
            ChatError::Validation("message has no source to attach feedback to".into())
        })?;
        Self::new(source, quality)
    }
}

/// Posts message feedback to the feedback endpoint, which records it as
/// execution actuals for the workflow.
pub struct HttpFeedbackClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpFeedbackClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ChatError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(ChatError::Config(
                "feedback endpoint must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            api_key: None,
        })
    }

    /// Uses `feedback_endpoint`, `api_key` and `timeout` from `config`.
    pub fn from_config(config: &ChatClientConfig) -> Result<Self, ChatError> {
        let endpoint = config.feedback_endpoint.clone().ok_or_else(|| {
            ChatError::Config("missing CHAT_STREAM_FEEDBACK_ENDPOINT for feedback client".into())
        })?;
        let mut client = Self::new(endpoint, config.timeout)?;
        client.api_key = config.api_key.clone();
        Ok(client)
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Records `quality` for the execution identified by `message_id`.
    pub async fn submit(
        &self,
        message_id: impl Into<String>,
        quality: f64,
    ) -> Result<(), ChatError> {
        self.send(&FeedbackRequest::new(message_id, quality)?).await
    }

    /// Records `quality` for `message`, which must carry a `source`.
    pub async fn submit_for(&self, message: &ChatMessage, quality: f64) -> Result<(), ChatError> {
        self.send(&FeedbackRequest::for_message(message, quality)?)
            .await
    }

    pub async fn send(&self, request: &FeedbackRequest) -> Result<(), ChatError> {
        debug!(message_id = %request.message_id, quality = request.quality, endpoint = %self.endpoint, "posting message feedback");
        let mut http_req = self.client.post(&self.endpoint).json(request);
        if let Some(api_key) = &self.api_key {
            http_req = http_req.bearer_auth(api_key);
        }
        let response = http_req
            .send()
            .await
            .map_err(|e| TransportError::request(format!("feedback request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::status(status.as_u16(), body).into());
        }
        info!(message_id = %request.message_id, quality = request.quality, "message feedback recorded");
        Ok(())
    }
}
