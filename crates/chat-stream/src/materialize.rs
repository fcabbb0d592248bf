use crate::accumulator::OutputAccumulator;
use crate::content::{ChatMessage, ChatMessageContent};

/// Projects the accumulator into one assistant message.
///
/// One produced output becomes the message content as-is; several become an
/// `ARRAY` in first-seen order. Returns `None` while nothing has been produced.
pub fn materialize(outputs: &OutputAccumulator) -> Option<ChatMessage> {
    let mut contents: Vec<ChatMessageContent> = outputs.contents().cloned().collect();
    let content = match contents.len() {
        0 => return None,
        1 => contents.pop()?,
        _ => ChatMessageContent::Array(contents),
    };
    Some(ChatMessage::assistant(content))
}
