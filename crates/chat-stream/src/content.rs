/// Content of one chat message.
///
/// Serialized adjacently tagged, matching the workflow API:
/// `{"type": "STRING", "value": "..."}`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatMessageContent {
    /// Plain text.
    String(String),
    /// A function/tool invocation requested by the workflow.
    FunctionCall(FunctionCall),
    /// Ordered composite of several contents.
    Array(Vec<ChatMessageContent>),
}

impl ChatMessageContent {
    /// Creates text content.
    pub fn text_value(text: impl Into<String>) -> Self {
        Self::String(text.into())
    }

    /// Concatenates all text in order, recursing into composites. Function
    /// calls contribute nothing.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.push_text(&mut out);
        out
    }

    fn push_text(&self, out: &mut String) {
        match self {
            Self::String(text) => out.push_str(text),
            Self::FunctionCall(_) => {}
            Self::Array(items) => {
                for item in items {
                    item.push_text(out);
                }
            }
        }
    }

    /// Returns the function call when this content is a single invocation.
    pub fn as_function_call(&self) -> Option<&FunctionCall> {
        match self {
            Self::FunctionCall(call) => Some(call),
            _ => None,
        }
    }
}

/// A function invocation requested by the workflow.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionCall {
    /// Call id; echoed back as the `source` of the function result message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Function name.
    pub name: String,
    /// Arguments object as produced by the model.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Author of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Function,
}

/// One message of a conversation.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: ChatMessageContent,
    /// For `FUNCTION` messages, the id of the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ChatMessage {
    /// Creates a user message with text content.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: ChatMessageContent::text_value(text),
            source: None,
        }
    }

    /// Creates an assistant message.
    pub fn assistant(content: ChatMessageContent) -> Self {
        Self {
            role: ChatRole::Assistant,
            content,
            source: None,
        }
    }

    /// Creates the message that feeds a function result back to the workflow.
    ///
    /// The result is JSON-encoded into text content and tagged with the call id.
    pub fn function_result(call: &FunctionCall, result: &serde_json::Value) -> Self {
        Self {
            role: ChatRole::Function,
            content: ChatMessageContent::String(result.to_string()),
            source: call.id.clone(),
        }
    }

    /// Returns the function call if this is an assistant message invoking one.
    pub fn function_call(&self) -> Option<&FunctionCall> {
        if self.role != ChatRole::Assistant {
            return None;
        }
        self.content.as_function_call()
    }
}
