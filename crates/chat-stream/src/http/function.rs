use std::time::Duration;

use tracing::debug;

use crate::content::FunctionCall;
use crate::errors::{ChatError, TransportError};
use crate::transport::FunctionCallHandler;

/// Function-call handler that POSTs `{id, name, arguments}` to an endpoint
/// and uses the response body as the call result.
pub struct HttpFunctionHandler {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpFunctionHandler {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ChatError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(ChatError::Config(
                "function endpoint must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait::async_trait]
impl FunctionCallHandler for HttpFunctionHandler {
    async fn call(&self, call: &FunctionCall) -> Result<serde_json::Value, TransportError> {
        debug!(function = %call.name, call_id = ?call.id, endpoint = %self.endpoint, "posting function call");
        let response = self
            .client
            .post(&self.endpoint)
            .json(call)
            .send()
            .await
            .map_err(|e| TransportError::function(&call.name, format!("request failed: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::function(&call.name, format!("unreadable body: {e}")))?;
        if !status.is_success() {
            return Err(TransportError::function(
                &call.name,
                format!("status {status}: {body}"),
            ));
        }
        Ok(parse_function_result(&body))
    }
}

/// JSON bodies are passed through; anything else becomes a JSON string.
fn parse_function_result(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap_or_else(|_| serde_json::Value::String(body.to_owned()))
}
