use crate::content::FunctionCall;

/// Lifecycle state of one workflow output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputState {
    Initiated,
    Streaming,
    Fulfilled,
    Rejected,
}

/// Payload discriminator of a workflow output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputType {
    String,
    FunctionCall,
    Array,
    Error,
    /// Any output type this client does not render (JSON, NUMBER, ...).
    #[serde(other)]
    Other,
}

/// One update from the remote workflow about one named output.
///
/// Only `state` is required on the wire; everything else may be absent
/// depending on the state and the workflow node that produced the output.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OutputRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub output_type: Option<OutputType>,
    pub state: OutputState,
    /// Incremental text, present on `STREAMING` records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    /// Complete payload, present on `FULFILLED` and `REJECTED` records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// Function call payload of a fulfilled `FUNCTION_CALL` output, still
/// carrying the call's own state.
#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
pub(crate) struct FunctionCallValue {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default)]
    pub state: Option<OutputState>,
}

impl FunctionCallValue {
    /// Drops the inner state.
    pub fn into_call(self) -> FunctionCall {
        FunctionCall {
            id: self.id,
            name: self.name,
            arguments: self.arguments,
        }
    }
}

impl OutputRecord {
    /// Creates a record with only a state and an id; handy for building streams.
    pub fn new(id: impl Into<String>, state: OutputState) -> Self {
        Self {
            id: Some(id.into()),
            name: None,
            output_type: None,
            state,
            delta: None,
            value: None,
        }
    }

    /// Sets the output type.
    pub fn with_type(mut self, output_type: OutputType) -> Self {
        self.output_type = Some(output_type);
        self
    }

    /// Sets the streaming delta.
    pub fn with_delta(mut self, delta: impl Into<String>) -> Self {
        self.delta = Some(delta.into());
        self
    }

    /// Sets the complete value.
    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Output id, treating an empty string as absent.
    pub fn output_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// True for the record that signals the remote workflow failed.
    pub fn is_rejection(&self) -> bool {
        self.state == OutputState::Rejected && self.output_type == Some(OutputType::Error)
    }

    /// Error message embedded in a rejected `ERROR` record.
    pub fn error_message(&self) -> Option<&str> {
        self.value
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(|v| v.as_str())
    }

    /// Complete text of a fulfilled `STRING` record. Non-string values are
    /// rendered as JSON text.
    pub fn string_value(&self) -> Option<String> {
        match self.value.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Parses the value of a `FUNCTION_CALL` record. Returns `None` when the
    /// value is missing or not shaped like a call.
    pub(crate) fn function_call_value(&self) -> Option<FunctionCallValue> {
        let value = self.value.as_ref()?;
        serde_json::from_value(value.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_minimal_record_without_type_or_name() {
        let record: OutputRecord =
            serde_json::from_str(r#"{"id":"x","state":"INITIATED"}"#).expect("parse");
        assert_eq!(record.output_id(), Some("x"));
        assert_eq!(record.state, OutputState::Initiated);
        assert!(record.output_type.is_none());
    }

    #[test]
    fn unknown_output_types_map_to_other() {
        let record: OutputRecord =
            serde_json::from_str(r#"{"id":"n","type":"NUMBER","state":"FULFILLED","value":3}"#)
                .expect("parse");
        assert_eq!(record.output_type, Some(OutputType::Other));
    }

    #[test]
    fn empty_id_counts_as_missing() {
        let record = OutputRecord::new("", OutputState::Streaming);
        assert!(record.output_id().is_none());
    }

    #[test]
    fn extracts_rejection_message() {
        let record: OutputRecord = serde_json::from_value(json!({
            "id": "err",
            "type": "ERROR",
            "state": "REJECTED",
            "value": {"message": "node failed", "code": "INTERNAL"}
        }))
        .expect("parse");
        assert!(record.is_rejection());
        assert_eq!(record.error_message(), Some("node failed"));
    }

    #[test]
    fn function_call_value_keeps_inner_state_until_converted() {
        let record = OutputRecord::new("fc", OutputState::Fulfilled)
            .with_type(OutputType::FunctionCall)
            .with_value(json!({
                "id": "call_1",
                "name": "get_current_weather",
                "arguments": {"location": "Paris"},
                "state": "FULFILLED"
            }));
        let value = record.function_call_value().expect("call value");
        assert_eq!(value.state, Some(OutputState::Fulfilled));
        let call = value.into_call();
        assert_eq!(call.id.as_deref(), Some("call_1"));
        assert_eq!(call.arguments["location"], "Paris");
    }

    #[test]
    fn string_value_renders_non_strings_as_json() {
        let record = OutputRecord::new("s", OutputState::Fulfilled).with_value(json!({"a": 1}));
        assert_eq!(record.string_value().as_deref(), Some(r#"{"a":1}"#));
        let empty = OutputRecord::new("s", OutputState::Fulfilled).with_value(json!(null));
        assert!(empty.string_value().is_none());
    }
}
