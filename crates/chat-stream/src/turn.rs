use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::content::ChatMessage;
use crate::decoder::StreamDecoder;
use crate::errors::{ChatError, TurnFailure};
use crate::options::TurnOptions;
use crate::stream::{TurnEvent, TurnOutput, TurnStatus};
use crate::transport::{ChatTransport, TurnRequest};

/// Handle used to stop a running turn.
#[derive(Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// The in-flight read is dropped, any partial frame is discarded and the
    /// turn ends with `TurnEvent::Cancelled` carrying the last emitted message.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Starts a turn: sends `request` through `transport` and decodes the
/// streamed response on a background task.
pub async fn start_turn(
    transport: Arc<dyn ChatTransport>,
    request: TurnRequest,
    options: &TurnOptions,
) -> Result<TurnStream, ChatError> {
    options.validate()?;
    if request.workflow_deployment_id.trim().is_empty() {
        return Err(ChatError::Validation(
            "workflow deployment id must not be empty".into(),
        ));
    }

    let (tx, rx) = mpsc::channel(options.stream_buffer_capacity);
    let (final_tx, final_rx) = oneshot::channel();
    let (abort_tx, abort_rx) = watch::channel(false);

    let turn_id = request.turn_id;
    let conversation_id = request.id.clone();
    tokio::spawn(turn_task(
        transport,
        request,
        options.clone(),
        tx,
        final_tx,
        abort_rx,
    ));

    Ok(TurnStream {
        turn_id,
        conversation_id,
        rx,
        final_rx,
        abort_handle: AbortHandle {
            tx: Arc::new(abort_tx),
        },
        saw_terminal: false,
    })
}

/// Streaming handle returned by `start_turn`.
///
/// Use `next_event()` to follow the assistant message as it grows and
/// `finish()` to obtain the terminal result.
pub struct TurnStream {
    turn_id: uuid::Uuid,
    conversation_id: String,
    rx: mpsc::Receiver<TurnEvent>,
    final_rx: oneshot::Receiver<Result<TurnOutput, ChatError>>,
    abort_handle: AbortHandle,
    saw_terminal: bool,
}

impl TurnStream {
    pub fn turn_id(&self) -> uuid::Uuid {
        self.turn_id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Returns a handle that can stop the turn.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Waits for the next event. Returns `None` once the turn task is gone.
    pub async fn next_event(&mut self) -> Option<TurnEvent> {
        let event = self.rx.recv().await;
        if event.as_ref().is_some_and(TurnEvent::is_terminal) {
            self.saw_terminal = true;
        }
        event
    }

    /// Drains remaining events (if any) and returns the terminal result.
    ///
    /// Cancellation is not an error: it yields `TurnStatus::Cancelled`.
    pub async fn finish(mut self) -> Result<TurnOutput, ChatError> {
        while !self.saw_terminal {
            match self.rx.recv().await {
                Some(event) if event.is_terminal() => self.saw_terminal = true,
                Some(_) => {}
                None => break,
            }
        }

        match self.final_rx.await {
            Ok(result) => result,
            Err(_) => Err(ChatError::protocol_msg(format!(
                "turn task ended without final result (turn={})",
                self.turn_id
            ))),
        }
    }
}

type FinalSender = oneshot::Sender<Result<TurnOutput, ChatError>>;

async fn turn_task(
    transport: Arc<dyn ChatTransport>,
    request: TurnRequest,
    options: TurnOptions,
    tx: mpsc::Sender<TurnEvent>,
    final_tx: FinalSender,
    mut abort_rx: watch::Receiver<bool>,
) {
    let turn_id = request.turn_id;

    if !send_event(
        &tx,
        TurnEvent::Started {
            turn_id,
            conversation_id: request.id.clone(),
        },
    )
    .await
    {
        let _ = final_tx.send(Err(ChatError::protocol_msg(
            "turn stream receiver dropped before Started",
        )));
        return;
    }
    info!(turn_id = %turn_id, conversation_id = %request.id, framing = %options.framing, messages = request.messages.len(), "turn started");

    let deadline = async {
        match options.timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut decoder = StreamDecoder::with_max_frame_len(options.framing, options.max_frame_len);

    let opened = tokio::select! {
        biased;
        _ = abort_requested(&mut abort_rx) => {
            cancel_turn(&tx, final_tx, turn_id, None).await;
            return;
        }
        _ = &mut deadline => Err(timeout_failure(&options)),
        opened = transport.open_stream(&request) => opened.map_err(TurnFailure::from),
    };
    let mut body = match opened {
        Ok(body) => body,
        Err(failure) => {
            fail_turn(&tx, final_tx, turn_id, failure).await;
            return;
        }
    };

    let mut seq = 0_u64;
    let mut snapshots: Vec<ChatMessage> = Vec::new();
    loop {
        tokio::select! {
            biased;
            _ = abort_requested(&mut abort_rx) => {
                let message = decoder.abort();
                cancel_turn(&tx, final_tx, turn_id, message).await;
                return;
            }
            _ = &mut deadline => {
                fail_turn(&tx, final_tx, turn_id, timeout_failure(&options)).await;
                return;
            }
            next = body.next() => {
                let (result, end_of_stream) = match next {
                    Some(Ok(chunk)) => {
                        debug!(turn_id = %turn_id, bytes = chunk.len(), "response chunk");
                        (decoder.feed_into(&chunk, &mut snapshots), false)
                    }
                    Some(Err(err)) => {
                        fail_turn(&tx, final_tx, turn_id, err.into()).await;
                        return;
                    }
                    None => (decoder.finish().map(|tail| snapshots.extend(tail)), true),
                };

                for message in snapshots.drain(..) {
                    if !send_event(&tx, TurnEvent::MessageUpdated { turn_id, seq, message }).await {
                        let _ = final_tx.send(Err(ChatError::protocol_msg("turn stream receiver dropped during output")));
                        return;
                    }
                    seq = seq.saturating_add(1);
                }

                if let Err(failure) = result {
                    fail_turn(&tx, final_tx, turn_id, failure).await;
                    return;
                }
                if end_of_stream {
                    let message = decoder.message();
                    info!(turn_id = %turn_id, updates = seq, has_message = message.is_some(), "turn completed");
                    let output = TurnOutput { message: message.clone(), status: TurnStatus::Completed };
                    let sent = send_event(&tx, TurnEvent::Completed { turn_id, message }).await;
                    let _ = final_tx.send(if sent {
                        Ok(output)
                    } else {
                        Err(ChatError::protocol_msg("turn stream receiver dropped before completion"))
                    });
                    return;
                }
            }
        }
    }
}

/// Resolves once an abort was requested. Pends forever if the handle is gone.
async fn abort_requested(rx: &mut watch::Receiver<bool>) {
    let requested = rx.wait_for(|aborted| *aborted).await.is_ok();
    if !requested {
        std::future::pending::<()>().await;
    }
}

fn timeout_failure(options: &TurnOptions) -> TurnFailure {
    let timeout = options.timeout.unwrap_or_default();
    TurnFailure::Transport {
        message: format!("turn timed out after {}ms", timeout.as_millis()),
    }
}

async fn cancel_turn(
    tx: &mpsc::Sender<TurnEvent>,
    final_tx: FinalSender,
    turn_id: uuid::Uuid,
    message: Option<ChatMessage>,
) {
    info!(turn_id = %turn_id, has_message = message.is_some(), "turn cancelled");
    let output = TurnOutput {
        message: message.clone(),
        status: TurnStatus::Cancelled,
    };
    let _ = send_event(tx, TurnEvent::Cancelled { turn_id, message }).await;
    let _ = final_tx.send(Ok(output));
}

async fn fail_turn(
    tx: &mpsc::Sender<TurnEvent>,
    final_tx: FinalSender,
    turn_id: uuid::Uuid,
    failure: TurnFailure,
) {
    warn!(turn_id = %turn_id, error = %failure, "turn failed");
    let _ = send_event(
        tx,
        TurnEvent::Failed {
            turn_id,
            error: failure.clone(),
        },
    )
    .await;
    let _ = final_tx.send(Err(ChatError::TurnFailed(failure)));
}

async fn send_event(tx: &mpsc::Sender<TurnEvent>, event: TurnEvent) -> bool {
    tx.send(event).await.is_ok()
}
