use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::content::{ChatMessage, ChatRole};
use crate::errors::ChatError;
use crate::options::TurnOptions;
use crate::stream::{TurnEvent, TurnOutput, TurnStatus};
use crate::transport::{ChatTransport, FunctionCallHandler, TurnRequest};
use crate::turn::{AbortHandle, start_turn};

const DEFAULT_MAX_FUNCTION_ROUNDS: usize = 8;

/// Result of one user action (`append`/`reload`), which may span several
/// turns when the workflow calls functions.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnReport {
    /// Final assistant message of the last turn.
    pub message: Option<ChatMessage>,
    pub status: TurnStatus,
    /// Number of turns sent, including function-call follow-ups.
    pub turns: usize,
}

#[derive(Default)]
struct StopState {
    turn: Option<AbortHandle>,
    requested: bool,
}

/// Stops the user action (`append`/`reload`) the conversation is running.
#[derive(Clone)]
pub struct StopHandle {
    state: Arc<Mutex<StopState>>,
}

impl StopHandle {
    /// Aborts the in-flight turn and prevents any further turn of the current
    /// action, including function-call follow-ups.
    ///
    /// Returns `true` when a running turn was aborted. A stop requested
    /// between turns still applies; it is cleared when the next action starts.
    pub fn stop(&self) -> bool {
        let handle = match self.state.lock() {
            Ok(mut state) => {
                state.requested = true;
                state.turn.take()
            }
            Err(_) => None,
        };
        match handle {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

/// Builder for a [`Conversation`].
pub struct ConversationBuilder {
    transport: Arc<dyn ChatTransport>,
    id: Option<String>,
    workflow_deployment_id: Option<String>,
    messages: Vec<ChatMessage>,
    function_handler: Option<Arc<dyn FunctionCallHandler>>,
    options: TurnOptions,
    max_function_rounds: usize,
    event_sink: Option<mpsc::Sender<TurnEvent>>,
}

impl ConversationBuilder {
    /// Sets the conversation id (defaults to a random UUID).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the workflow deployment that answers this conversation.
    pub fn workflow_deployment_id(mut self, id: impl Into<String>) -> Self {
        self.workflow_deployment_id = Some(id.into());
        self
    }

    /// Seeds the history, e.g. from a stored chat.
    pub fn initial_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Handler invoked when a turn ends in a function call.
    ///
    /// Without a handler, function calls are returned to the caller as-is.
    pub fn function_handler(mut self, handler: Arc<dyn FunctionCallHandler>) -> Self {
        self.function_handler = Some(handler);
        self
    }

    pub fn options(mut self, options: TurnOptions) -> Self {
        self.options = options;
        self
    }

    /// Limits consecutive function-call follow-up turns per user action.
    pub fn max_function_rounds(mut self, rounds: usize) -> Self {
        self.max_function_rounds = rounds;
        self
    }

    /// Forwards every turn event to `sink`.
    ///
    /// Sends wait for capacity, so the receiver must be drained while a turn
    /// runs.
    pub fn event_sink(mut self, sink: mpsc::Sender<TurnEvent>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<Conversation, ChatError> {
        let workflow_deployment_id = self
            .workflow_deployment_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                ChatError::Config("workflow deployment id is required".into())
            })?;
        self.options.validate()?;
        Ok(Conversation {
            id: self
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            workflow_deployment_id,
            messages: self.messages,
            transport: self.transport,
            function_handler: self.function_handler,
            options: self.options,
            max_function_rounds: self.max_function_rounds,
            event_sink: self.event_sink,
            stop: Arc::new(Mutex::new(StopState::default())),
        })
    }
}

/// Message history of one chat plus the controller that drives its turns.
///
/// Turn-starting methods take `&mut self`, so a conversation never has more
/// than one turn in flight. Use [`Conversation::stop_handle`] to stop a turn
/// from elsewhere.
pub struct Conversation {
    id: String,
    workflow_deployment_id: String,
    messages: Vec<ChatMessage>,
    transport: Arc<dyn ChatTransport>,
    function_handler: Option<Arc<dyn FunctionCallHandler>>,
    options: TurnOptions,
    max_function_rounds: usize,
    event_sink: Option<mpsc::Sender<TurnEvent>>,
    stop: Arc<Mutex<StopState>>,
}

impl Conversation {
    pub fn builder(transport: Arc<dyn ChatTransport>) -> ConversationBuilder {
        ConversationBuilder {
            transport,
            id: None,
            workflow_deployment_id: None,
            messages: Vec::new(),
            function_handler: None,
            options: TurnOptions::default(),
            max_function_rounds: DEFAULT_MAX_FUNCTION_ROUNDS,
            event_sink: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current history, including the tentative assistant message of the
    /// last turn.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            state: self.stop.clone(),
        }
    }

    /// Appends a user message and runs turns until the workflow answers.
    pub async fn append(&mut self, text: impl Into<String>) -> Result<TurnReport, ChatError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ChatError::Validation("message must not be empty".into()));
        }
        self.messages.push(ChatMessage::user_text(text));
        self.run_turns().await
    }

    /// Regenerates the last answer: drops the last assistant message and
    /// everything after it, then runs turns again.
    pub async fn reload(&mut self) -> Result<TurnReport, ChatError> {
        if let Some(idx) = self
            .messages
            .iter()
            .rposition(|m| m.role == ChatRole::Assistant)
        {
            self.messages.truncate(idx);
        }
        if self.messages.is_empty() {
            return Err(ChatError::Validation("nothing to reload".into()));
        }
        self.run_turns().await
    }

    async fn run_turns(&mut self) -> Result<TurnReport, ChatError> {
        self.reset_stop();
        let mut turns = 0_usize;
        let mut function_rounds = 0_usize;
        let mut last_message = None;
        loop {
            if self.stop_requested() {
                info!(conversation_id = %self.id, turns, "stopped before next turn");
                return Ok(TurnReport {
                    message: last_message,
                    status: TurnStatus::Cancelled,
                    turns,
                });
            }
            let output = self.run_turn().await?;
            turns += 1;

            let follow_up = match (&self.function_handler, output.status) {
                (Some(handler), TurnStatus::Completed) => output
                    .message
                    .as_ref()
                    .and_then(ChatMessage::function_call)
                    .map(|call| (handler.clone(), call.clone())),
                _ => None,
            };
            let Some((handler, call)) = follow_up else {
                return Ok(TurnReport {
                    message: output.message,
                    status: output.status,
                    turns,
                });
            };

            if function_rounds >= self.max_function_rounds {
                return Err(ChatError::FunctionLoop {
                    rounds: self.max_function_rounds,
                });
            }
            function_rounds += 1;
            last_message = output.message;

            info!(conversation_id = %self.id, function = %call.name, call_id = ?call.id, "invoking function call handler");
            let result = handler.call(&call).await?;
            self.messages
                .push(ChatMessage::function_result(&call, &result));
        }
    }

    async fn run_turn(&mut self) -> Result<TurnOutput, ChatError> {
        let history_len = self.messages.len();
        let request = TurnRequest::new(
            self.id.clone(),
            self.workflow_deployment_id.clone(),
            self.messages.clone(),
        );
        let mut stream = start_turn(self.transport.clone(), request, &self.options).await?;
        self.set_current(Some(stream.abort_handle()));

        while let Some(event) = stream.next_event().await {
            match &event {
                TurnEvent::MessageUpdated { message, seq, .. } => {
                    debug!(conversation_id = %self.id, seq, "replacing tentative assistant message");
                    self.replace_tentative(history_len, Some(message));
                }
                TurnEvent::Completed { message, .. } | TurnEvent::Cancelled { message, .. } => {
                    self.replace_tentative(history_len, message.as_ref());
                }
                _ => {}
            }
            let terminal = event.is_terminal();
            if let Some(sink) = &self.event_sink {
                let _ = sink.send(event).await;
            }
            if terminal {
                break;
            }
        }

        self.set_current(None);
        stream.finish().await
    }

    /// History is the request messages plus at most one tentative answer.
    fn replace_tentative(&mut self, history_len: usize, message: Option<&ChatMessage>) {
        self.messages.truncate(history_len);
        if let Some(message) = message {
            self.messages.push(message.clone());
        }
    }

    fn reset_stop(&self) {
        if let Ok(mut state) = self.stop.lock() {
            *state = StopState::default();
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop.lock().map(|state| state.requested).unwrap_or(false)
    }

    /// Registers the running turn; aborts it at once if a stop is pending.
    fn set_current(&self, handle: Option<AbortHandle>) {
        if let Ok(mut state) = self.stop.lock() {
            if let Some(handle) = &handle
                && state.requested
            {
                handle.abort();
            }
            state.turn = handle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ChatMessageContent, FunctionCall};
    use crate::errors::{TransportError, TurnFailure};
    use crate::frame::encode_length_prefixed;
    use crate::transport::ByteStream;
    use futures::StreamExt as _;
    use futures::stream;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves one scripted body per turn and records every request.
    struct ScriptedTransport {
        bodies: Mutex<VecDeque<Vec<serde_json::Value>>>,
        hang_after_body: bool,
        requests: Mutex<Vec<TurnRequest>>,
    }

    impl ScriptedTransport {
        fn new(bodies: Vec<Vec<serde_json::Value>>) -> Arc<Self> {
            Arc::new(Self {
                bodies: Mutex::new(bodies.into()),
                hang_after_body: false,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn hanging(body: Vec<serde_json::Value>) -> Arc<Self> {
            Arc::new(Self {
                bodies: Mutex::new(vec![body].into()),
                hang_after_body: true,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<TurnRequest> {
            self.requests.lock().expect("lock").clone()
        }
    }

    #[async_trait::async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn open_stream(
            &self,
            request: &TurnRequest,
        ) -> Result<ByteStream, TransportError> {
            self.requests.lock().expect("lock").push(request.clone());
            let records = self
                .bodies
                .lock()
                .expect("lock")
                .pop_front()
                .ok_or_else(|| TransportError::status(500, "no scripted body"))?;
            let chunks = records
                .into_iter()
                .map(|r| {
                    encode_length_prefixed(r.to_string().as_bytes())
                        .map_err(|e| TransportError::read(e.to_string()))
                });
            let body: ByteStream = if self.hang_after_body {
                Box::pin(stream::iter(chunks).chain(stream::pending()))
            } else {
                Box::pin(stream::iter(chunks))
            };
            Ok(body)
        }
    }

    struct WeatherHandler {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl FunctionCallHandler for WeatherHandler {
        async fn call(&self, call: &FunctionCall) -> Result<serde_json::Value, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match call.name.as_str() {
                "get_current_weather" => Ok(json!({"temperature": 75, "unit": "F"})),
                other => Err(TransportError::function(other, "not found")),
            }
        }
    }

    fn text_body(id: &str, deltas: &[&str]) -> Vec<serde_json::Value> {
        let mut body = vec![json!({"id": id, "state": "INITIATED", "type": "STRING"})];
        for delta in deltas {
            body.push(json!({"id": id, "state": "STREAMING", "type": "STRING", "delta": delta}));
        }
        body
    }

    fn function_call_body() -> Vec<serde_json::Value> {
        vec![
            json!({"id": "fc", "state": "INITIATED", "type": "FUNCTION_CALL"}),
            json!({"id": "fc", "state": "FULFILLED", "type": "FUNCTION_CALL", "value": {
                "id": "call_1",
                "name": "get_current_weather",
                "arguments": {"location": "Boston"},
                "state": "FULFILLED"
            }}),
        ]
    }

    fn conversation(transport: Arc<ScriptedTransport>) -> ConversationBuilder {
        Conversation::builder(transport)
            .id("chat-1")
            .workflow_deployment_id("deploy-1")
    }

    #[tokio::test]
    async fn append_streams_answer_into_history() {
        let transport = ScriptedTransport::new(vec![text_body("out", &["Hello", ", world"])]);
        let (tx, mut rx) = mpsc::channel(64);
        let mut chat = conversation(transport.clone())
            .event_sink(tx)
            .build()
            .expect("build");

        let report = chat.append("hi").await.expect("append");
        assert_eq!(report.status, TurnStatus::Completed);
        assert_eq!(report.turns, 1);
        assert_eq!(chat.messages().len(), 2);
        assert_eq!(chat.messages()[0], ChatMessage::user_text("hi"));
        assert_eq!(chat.messages()[1].content.text(), "Hello, world");

        let mut updates = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, TurnEvent::MessageUpdated { .. }) {
                updates += 1;
            }
        }
        assert_eq!(updates, 2);

        let requests = transport.requests();
        assert_eq!(requests[0].id, "chat-1");
        assert_eq!(requests[0].messages, vec![ChatMessage::user_text("hi")]);
    }

    #[tokio::test]
    async fn function_call_result_feeds_a_follow_up_turn() {
        let transport = ScriptedTransport::new(vec![
            function_call_body(),
            text_body("out", &["It is 75F in Boston."]),
        ]);
        let handler = Arc::new(WeatherHandler {
            calls: AtomicUsize::new(0),
        });
        let mut chat = conversation(transport.clone())
            .function_handler(handler.clone())
            .build()
            .expect("build");

        let report = chat.append("weather in Boston?").await.expect("append");
        assert_eq!(report.turns, 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            report.message.map(|m| m.content.text()).as_deref(),
            Some("It is 75F in Boston.")
        );

        let roles: Vec<ChatRole> = chat.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            [
                ChatRole::User,
                ChatRole::Assistant,
                ChatRole::Function,
                ChatRole::Assistant
            ]
        );
        let function_message = &chat.messages()[2];
        assert_eq!(function_message.source.as_deref(), Some("call_1"));
        assert_eq!(
            function_message.content,
            ChatMessageContent::String(r#"{"temperature":75,"unit":"F"}"#.into())
        );

        let second = &transport.requests()[1];
        assert_eq!(second.messages.len(), 3);
        assert_eq!(second.messages[2].role, ChatRole::Function);
    }

    #[tokio::test]
    async fn function_call_without_handler_is_returned_to_caller() {
        let transport = ScriptedTransport::new(vec![function_call_body()]);
        let mut chat = conversation(transport).build().expect("build");
        let report = chat.append("weather?").await.expect("append");
        assert_eq!(report.turns, 1);
        let message = report.message.expect("message");
        assert_eq!(
            message.function_call().map(|c| c.name.as_str()),
            Some("get_current_weather")
        );
    }

    #[tokio::test]
    async fn endless_function_calls_hit_the_round_limit() {
        let transport = ScriptedTransport::new(vec![
            function_call_body(),
            function_call_body(),
            function_call_body(),
        ]);
        let mut chat = conversation(transport)
            .function_handler(Arc::new(WeatherHandler {
                calls: AtomicUsize::new(0),
            }))
            .max_function_rounds(2)
            .build()
            .expect("build");
        let err = chat.append("loop").await.expect_err("loop");
        assert_eq!(err, ChatError::FunctionLoop { rounds: 2 });
    }

    #[tokio::test]
    async fn reload_replaces_the_last_answer() {
        let transport = ScriptedTransport::new(vec![
            text_body("out", &["first"]),
            text_body("out", &["second"]),
        ]);
        let mut chat = conversation(transport.clone()).build().expect("build");
        chat.append("question").await.expect("append");
        let report = chat.reload().await.expect("reload");

        assert_eq!(report.message.map(|m| m.content.text()).as_deref(), Some("second"));
        assert_eq!(chat.messages().len(), 2);
        assert_eq!(
            transport.requests()[1].messages,
            vec![ChatMessage::user_text("question")]
        );
    }

    #[tokio::test]
    async fn reinitiated_output_is_removed_from_history() {
        let mut body = text_body("out", &["draft"]);
        body.push(json!({"id": "out", "state": "INITIATED", "type": "STRING"}));
        let transport = ScriptedTransport::new(vec![body]);
        let mut chat = conversation(transport).build().expect("build");

        let report = chat.append("hi").await.expect("append");
        assert_eq!(report.status, TurnStatus::Completed);
        assert!(report.message.is_none());
        assert_eq!(chat.messages(), [ChatMessage::user_text("hi")]);
    }

    #[tokio::test]
    async fn rejection_surfaces_as_turn_failure_and_keeps_partial_answer() {
        let mut body = text_body("out", &["partial"]);
        body.push(json!({"id": "err", "state": "REJECTED", "type": "ERROR", "value": {"message": "quota exceeded"}}));
        let transport = ScriptedTransport::new(vec![body]);
        let mut chat = conversation(transport).build().expect("build");

        let err = chat.append("hi").await.expect_err("rejected");
        assert_eq!(
            err,
            ChatError::TurnFailed(TurnFailure::Rejected {
                message: "quota exceeded".into()
            })
        );
        assert_eq!(chat.messages().last().map(|m| m.content.text()).as_deref(), Some("partial"));
    }

    #[tokio::test]
    async fn stop_handle_cancels_the_running_turn_cleanly() {
        let transport = ScriptedTransport::hanging(text_body("out", &["so far"]));
        let (tx, mut rx) = mpsc::channel(64);
        let mut chat = conversation(transport)
            .event_sink(tx)
            .build()
            .expect("build");
        let stop = chat.stop_handle();
        assert!(!stop.stop());

        let watcher = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if matches!(event, TurnEvent::MessageUpdated { .. }) {
                    while !stop.stop() {
                        tokio::task::yield_now().await;
                    }
                }
                if event.is_terminal() {
                    return event;
                }
            }
            panic!("event sink closed without terminal event");
        });

        let report = chat.append("hi").await.expect("cancel is not an error");
        assert_eq!(report.status, TurnStatus::Cancelled);
        assert_eq!(report.message.map(|m| m.content.text()).as_deref(), Some("so far"));
        assert_eq!(chat.messages().len(), 2);
        assert!(matches!(
            watcher.await.expect("watcher"),
            TurnEvent::Cancelled { .. }
        ));
    }

    /// Presses stop while its call is in flight, when no turn is running.
    struct StoppingHandler {
        stop: Mutex<Option<StopHandle>>,
    }

    #[async_trait::async_trait]
    impl FunctionCallHandler for StoppingHandler {
        async fn call(&self, _call: &FunctionCall) -> Result<serde_json::Value, TransportError> {
            if let Some(stop) = self.stop.lock().expect("lock").as_ref() {
                assert!(!stop.stop(), "no turn runs during a function call");
            }
            Ok(json!({"temperature": 75}))
        }
    }

    #[tokio::test]
    async fn stop_between_function_rounds_skips_the_follow_up() {
        let transport = ScriptedTransport::new(vec![
            function_call_body(),
            text_body("out", &["never sent"]),
        ]);
        let handler = Arc::new(StoppingHandler {
            stop: Mutex::new(None),
        });
        let mut chat = conversation(transport.clone())
            .function_handler(handler.clone())
            .build()
            .expect("build");
        *handler.stop.lock().expect("lock") = Some(chat.stop_handle());

        let report = chat.append("weather?").await.expect("stop is not an error");
        assert_eq!(report.status, TurnStatus::Cancelled);
        assert_eq!(report.turns, 1);
        assert!(report.message.and_then(|m| m.function_call().cloned()).is_some());
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(chat.messages().last().map(|m| m.role), Some(ChatRole::Function));
    }

    #[tokio::test]
    async fn stop_is_cleared_when_the_next_action_starts() {
        let transport = ScriptedTransport::new(vec![text_body("out", &["fresh"])]);
        let mut chat = conversation(transport).build().expect("build");
        assert!(!chat.stop_handle().stop());

        let report = chat.append("hi").await.expect("append");
        assert_eq!(report.status, TurnStatus::Completed);
    }

    #[tokio::test]
    async fn function_handler_error_ends_the_action() {
        let transport = ScriptedTransport::new(vec![vec![
            json!({"id": "fc", "state": "FULFILLED", "type": "FUNCTION_CALL", "value": {
                "id": "call_9",
                "name": "book_flight",
                "arguments": {},
                "state": "FULFILLED"
            }}),
        ]]);
        let handler = Arc::new(WeatherHandler {
            calls: AtomicUsize::new(0),
        });
        let mut chat = conversation(transport.clone())
            .function_handler(handler.clone())
            .build()
            .expect("build");

        let err = chat.append("book it").await.expect_err("handler failed");
        assert_eq!(
            err,
            ChatError::Transport(TransportError::function("book_flight", "not found"))
        );
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(chat.messages().last().map(|m| m.role), Some(ChatRole::Assistant));
    }

    #[tokio::test]
    async fn blank_messages_and_missing_deployment_are_rejected() {
        let transport = ScriptedTransport::new(Vec::new());
        assert!(matches!(
            Conversation::builder(transport.clone()).build(),
            Err(ChatError::Config(_))
        ));
        let mut chat = conversation(transport).build().expect("build");
        assert!(matches!(
            chat.append("   ").await,
            Err(ChatError::Validation(_))
        ));
        assert!(matches!(chat.reload().await, Err(ChatError::Validation(_))));
    }
}
