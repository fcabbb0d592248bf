use std::time::Duration;

use crate::errors::ChatError;
use crate::frame::Framing;
use crate::options::TurnOptions;

/// Configuration for the HTTP chat client.
#[derive(Clone, Debug)]
pub struct ChatClientConfig {
    /// URL the turn request is POSTed to.
    pub endpoint: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
    /// URL function calls are POSTed to, when function calls are handled
    /// over HTTP.
    pub function_endpoint: Option<String>,
    /// URL message feedback is POSTed to.
    pub feedback_endpoint: Option<String>,
    /// Framing of the chat endpoint's response body.
    pub framing: Framing,
    /// HTTP timeout for requests.
    pub timeout: Duration,
}

impl ChatClientConfig {
    /// Creates a config with defaults for everything but the endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            function_endpoint: None,
            feedback_endpoint: None,
            framing: Framing::default(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Builds a config from the environment.
    ///
    /// - `CHAT_STREAM_ENDPOINT` (required)
    /// - `CHAT_STREAM_API_KEY`
    /// - `CHAT_STREAM_FUNCTION_ENDPOINT`
    /// - `CHAT_STREAM_FEEDBACK_ENDPOINT`
    /// - `CHAT_STREAM_FRAMING` (`length-prefixed` or `newline-delimited`)
    /// - `CHAT_STREAM_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self, ChatError> {
        let endpoint = non_empty_env("CHAT_STREAM_ENDPOINT").ok_or_else(|| {
            ChatError::Config("missing CHAT_STREAM_ENDPOINT for chat client".into())
        })?;
        let mut config = Self::new(endpoint);
        config.api_key = non_empty_env("CHAT_STREAM_API_KEY");
        config.function_endpoint = non_empty_env("CHAT_STREAM_FUNCTION_ENDPOINT");
        config.feedback_endpoint = non_empty_env("CHAT_STREAM_FEEDBACK_ENDPOINT");
        if let Some(framing) = non_empty_env("CHAT_STREAM_FRAMING") {
            config.framing = framing.parse()?;
        }
        if let Some(secs) = non_empty_env("CHAT_STREAM_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|e| {
                ChatError::Config(format!("invalid CHAT_STREAM_TIMEOUT_SECS `{secs}`: {e}"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn function_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.function_endpoint = Some(endpoint.into());
        self
    }

    pub fn feedback_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.feedback_endpoint = Some(endpoint.into());
        self
    }

    pub fn framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Turn options matching this endpoint.
    pub fn turn_options(&self) -> TurnOptions {
        TurnOptions::default().framing(self.framing)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
