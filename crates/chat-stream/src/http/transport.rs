use futures::StreamExt as _;
use tracing::debug;

use crate::errors::{ChatError, TransportError};
use crate::transport::{ByteStream, ChatTransport, TurnRequest};

use super::config::ChatClientConfig;

/// Chat transport that POSTs the turn request as JSON and streams the
/// response body.
pub struct HttpChatTransport {
    client: reqwest::Client,
    config: ChatClientConfig,
}

impl HttpChatTransport {
    pub fn new(config: ChatClientConfig) -> Result<Self, ChatError> {
        if config.endpoint.trim().is_empty() {
            return Err(ChatError::Config("chat endpoint must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a transport from `ChatClientConfig::from_env`.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::new(ChatClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ChatClientConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl ChatTransport for HttpChatTransport {
    async fn open_stream(&self, request: &TurnRequest) -> Result<ByteStream, TransportError> {
        debug!(turn_id = %request.turn_id, conversation_id = %request.id, endpoint = %self.config.endpoint, "sending turn request");
        let mut http_req = self.client.post(&self.config.endpoint).json(request);
        if let Some(api_key) = &self.config.api_key {
            http_req = http_req.bearer_auth(api_key);
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| TransportError::request(format!("chat request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::status(status.as_u16(), body));
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::read(e.to_string())));
        Ok(Box::pin(body))
    }
}
