//! Streaming decode loop
//!
//! Turns a tokenized prompt into visible text increments and an
//! end-of-turn result, applying `<think>` segment filtering. Runs on a
//! blocking worker; every observable result leaves through the event
//! sink in generation order.

use log::{error, warn};

use crate::backend::{InferenceBackend, Token};
use crate::events::{EventSink, SessionEvent};
use crate::util::errors::{QuillError, QuillResult};

use super::LoadedSession;

const PIECE_BUF_SIZE: usize = 256;

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Routes generated pieces between the thinking channel and the visible
/// accumulation.
pub(crate) struct ThinkFilter {
    inside: bool,
    show_thinking: bool,
    visible: String,
}

pub(crate) struct FilterStep {
    /// Piece for the thinking channel, when inside a think segment.
    pub thinking: Option<String>,
    /// Cumulative visible text after this piece, when not suppressed.
    pub visible: Option<String>,
}

impl ThinkFilter {
    pub fn new(show_thinking: bool) -> Self {
        Self {
            inside: false,
            show_thinking,
            visible: String::new(),
        }
    }

    pub fn push(&mut self, piece: &str) -> FilterStep {
        let mut piece = piece;
        if piece.contains(THINK_OPEN) {
            self.inside = true;
        } else if piece.contains(THINK_CLOSE) {
            self.inside = false;
            if !self.show_thinking {
                // The closing marker itself stays hidden.
                piece = "";
            }
        }

        let thinking = self.inside.then(|| piece.to_string());
        if self.inside && !self.show_thinking {
            return FilterStep {
                thinking,
                visible: None,
            };
        }

        self.visible.push_str(piece);
        FilterStep {
            thinking,
            visible: Some(self.visible.clone()),
        }
    }

    pub fn into_text(self) -> String {
        self.visible
    }
}

/// Runs the decode loop to one of its terminations: end-of-generation
/// (returns the accumulated visible text), context overflow, decode
/// failure, or a fatal vocabulary fault. Increments are emitted as the
/// loop runs; the caller owns transcript commit and the completion
/// signal.
pub(crate) fn run_decode_loop<B: InferenceBackend>(
    backend: &B,
    session: &mut LoadedSession<B>,
    prompt_tokens: Vec<Token>,
    show_thinking: bool,
    events: &EventSink,
) -> QuillResult<String> {
    let mut filter = ThinkFilter::new(show_thinking);
    let mut batch = prompt_tokens;

    loop {
        let capacity = backend.context_capacity(&session.context);
        let used = backend.context_used_cells(&session.context);
        if used + batch.len() > capacity {
            warn!(
                "Context window exhausted: used={}, incoming={}, capacity={}",
                used,
                batch.len(),
                capacity
            );
            return Err(QuillError::ContextOverflow {
                used,
                incoming: batch.len(),
                capacity,
            });
        }

        let status = backend.decode(&mut session.context, &batch);
        if status != 0 {
            warn!("Failed to decode token batch: status={}", status);
            return Err(QuillError::Decode(status));
        }

        let token = backend.sample(&mut session.sampler, &mut session.context);
        if backend.is_end_of_generation(&session.model, token) {
            break;
        }

        let mut piece_buf = [0u8; PIECE_BUF_SIZE];
        let written = backend.token_to_piece(&session.model, token, &mut piece_buf);
        if written < 0 {
            error!(
                "Failed to convert token to piece: token={}, status={}",
                token, written
            );
            return Err(QuillError::VocabCorruption(token));
        }
        let piece = String::from_utf8_lossy(&piece_buf[..written as usize]).into_owned();

        // The sampled token becomes the next one-token batch.
        batch = vec![token];

        let step = filter.push(&piece);
        if let Some(text) = step.thinking {
            events.emit(SessionEvent::Thinking { text });
        }
        if let Some(text) = step.visible {
            events.emit(SessionEvent::Message { text });
        }
    }

    Ok(filter.into_text())
}
