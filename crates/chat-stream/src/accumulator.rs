use std::collections::HashMap;

use tracing::{debug, warn};

use crate::content::ChatMessageContent;
use crate::errors::TurnFailure;
use crate::record::{OutputRecord, OutputState, OutputType};

const DEFAULT_REJECTION_MESSAGE: &str = "workflow execution rejected";

/// Per-turn state mapping output ids to their reconstructed content.
///
/// Content lives in a plain map; rendering order is the separate, append-only
/// list of ids in the order they were first seen.
#[derive(Clone, Debug, Default)]
pub struct OutputAccumulator {
    outputs: HashMap<String, Option<ChatMessageContent>>,
    order: Vec<String>,
}

impl OutputAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one record and reports whether accumulated content changed.
    ///
    /// A rejected `ERROR` record is returned as `Err` and must end the turn.
    pub fn apply(&mut self, record: &OutputRecord) -> Result<bool, TurnFailure> {
        if record.is_rejection() {
            let message = record
                .error_message()
                .unwrap_or(DEFAULT_REJECTION_MESSAGE)
                .to_owned();
            return Err(TurnFailure::Rejected { message });
        }

        let Some(id) = record.output_id() else {
            debug!(state = ?record.state, "skipping output record without id");
            return Ok(false);
        };

        let changed = match record.state {
            OutputState::Initiated => self.slot(id).take().is_some(),
            OutputState::Streaming => self.apply_delta(id, record.delta.as_deref().unwrap_or("")),
            OutputState::Fulfilled => self.apply_fulfilled(id, record),
            OutputState::Rejected => {
                warn!(output_id = id, output_type = ?record.output_type, "ignoring rejected non-error output");
                false
            }
        };
        Ok(changed)
    }

    fn apply_delta(&mut self, id: &str, delta: &str) -> bool {
        let slot = self.slot(id);
        if let Some(existing) = slot.as_mut() {
            return match existing {
                ChatMessageContent::String(text) => {
                    text.push_str(delta);
                    !delta.is_empty()
                }
                _ => {
                    debug!(output_id = id, "ignoring delta for non-text output");
                    false
                }
            };
        }
        *slot = Some(ChatMessageContent::String(delta.to_owned()));
        true
    }

    fn apply_fulfilled(&mut self, id: &str, record: &OutputRecord) -> bool {
        match record.output_type {
            Some(OutputType::FunctionCall) => {
                let Some(value) = record.function_call_value() else {
                    warn!(output_id = id, "function call output without a parsable call");
                    return false;
                };
                if value.state != Some(OutputState::Fulfilled) {
                    return false;
                }
                let content = Some(ChatMessageContent::FunctionCall(value.into_call()));
                let slot = self.slot(id);
                let changed = *slot != content;
                *slot = content;
                changed
            }
            Some(OutputType::String) => {
                if self.get(id).is_some() {
                    return false;
                }
                let Some(text) = record.string_value() else {
                    return false;
                };
                *self.slot(id) = Some(ChatMessageContent::String(text));
                true
            }
            _ => false,
        }
    }

    /// Registers `id` on first sight and returns its content slot.
    fn slot(&mut self, id: &str) -> &mut Option<ChatMessageContent> {
        if !self.outputs.contains_key(id) {
            self.order.push(id.to_owned());
        }
        self.outputs.entry(id.to_owned()).or_insert(None)
    }

    /// Current content for `id`, if any has been produced.
    pub fn get(&self, id: &str) -> Option<&ChatMessageContent> {
        self.outputs.get(id).and_then(Option::as_ref)
    }

    /// Output ids in first-seen order, including those without content yet.
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    /// Produced contents in first-seen order.
    pub fn contents(&self) -> impl Iterator<Item = &ChatMessageContent> + '_ {
        self.order.iter().filter_map(|id| self.get(id))
    }

    /// True when no output has produced content yet.
    pub fn is_empty(&self) -> bool {
        self.contents().next().is_none()
    }
}
