use tracing::debug;

use crate::accumulator::OutputAccumulator;
use crate::content::ChatMessage;
use crate::errors::TurnFailure;
use crate::frame::{DEFAULT_MAX_FRAME_LEN, FrameSource, Framing};
use crate::materialize::materialize;
use crate::record::OutputRecord;

/// Streaming event decoder for one turn.
///
/// Feeds raw body chunks through a frame source, applies every decoded record
/// to the turn's accumulator and yields an assistant message snapshot after
/// each record that changed accumulated content. The first failure is sticky:
/// later calls return it again without touching state.
pub struct StreamDecoder {
    frames: Box<dyn FrameSource>,
    outputs: OutputAccumulator,
    failure: Option<TurnFailure>,
}

impl StreamDecoder {
    /// Creates a decoder for `framing` with the default frame size limit.
    pub fn new(framing: Framing) -> Self {
        Self::with_max_frame_len(framing, DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(framing: Framing, max_frame_len: usize) -> Self {
        Self::from_source(framing.decoder(max_frame_len))
    }

    /// Wraps an arbitrary frame source.
    pub fn from_source(frames: Box<dyn FrameSource>) -> Self {
        Self {
            frames,
            outputs: OutputAccumulator::new(),
            failure: None,
        }
    }

    /// Decodes one chunk and returns the snapshots it produced.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<ChatMessage>, TurnFailure> {
        let mut snapshots = Vec::new();
        self.feed_into(chunk, &mut snapshots)?;
        Ok(snapshots)
    }

    /// Decodes one chunk, pushing snapshots into `snapshots` as records are
    /// applied.
    ///
    /// On failure, snapshots from records applied before the failing one are
    /// already in `snapshots`; records after it are never decoded.
    pub fn feed_into(
        &mut self,
        chunk: &[u8],
        snapshots: &mut Vec<ChatMessage>,
    ) -> Result<(), TurnFailure> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        self.frames.push_chunk(chunk);
        loop {
            let record = match self.frames.next_record() {
                Ok(Some(record)) => record,
                Ok(None) => return Ok(()),
                Err(err) => return Err(self.fail(err.into())),
            };
            self.apply(&record, snapshots)?;
        }
    }

    /// Flushes the frame source at end of stream.
    ///
    /// A partially received length-prefixed frame surfaces here as a
    /// truncation failure.
    pub fn finish(&mut self) -> Result<Vec<ChatMessage>, TurnFailure> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        let mut snapshots = Vec::new();
        match self.frames.finish() {
            Ok(Some(record)) => self.apply(&record, &mut snapshots)?,
            Ok(None) => {}
            Err(err) => return Err(self.fail(err.into())),
        }
        Ok(snapshots)
    }

    /// Stops decoding without error: discards any partial frame and returns
    /// the message materialized so far.
    pub fn abort(&mut self) -> Option<ChatMessage> {
        let dropped = self.frames.buffered_len();
        if dropped > 0 {
            debug!(dropped_bytes = dropped, "discarding partial frame on abort");
        }
        self.frames.reset();
        self.message()
    }

    /// Message materialized from everything applied so far.
    pub fn message(&self) -> Option<ChatMessage> {
        materialize(&self.outputs)
    }

    /// Accumulated outputs of this turn.
    pub fn outputs(&self) -> &OutputAccumulator {
        &self.outputs
    }

    fn apply(
        &mut self,
        record: &OutputRecord,
        snapshots: &mut Vec<ChatMessage>,
    ) -> Result<(), TurnFailure> {
        debug!(output_id = ?record.id, state = ?record.state, output_type = ?record.output_type, "applying output record");
        match self.outputs.apply(record) {
            Ok(true) => {
                if let Some(message) = materialize(&self.outputs) {
                    snapshots.push(message);
                }
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(failure) => Err(self.fail(failure)),
        }
    }

    fn fail(&mut self, failure: TurnFailure) -> TurnFailure {
        self.frames.reset();
        self.failure = Some(failure.clone());
        failure
    }
}
