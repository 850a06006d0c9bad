//! Deterministic in-process backend
//!
//! Scripted stand-in for a real inference engine: replies are queued as
//! token pieces, failures are injectable at every collaborator call
//! site. Used by the integration tests and by `quill-cli`'s offline
//! mode, so the whole session pipeline can run without model weights.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Condvar, Mutex};

use crate::config::ModelParams;
use crate::conversation::Message;
use crate::util::errors::{QuillError, QuillResult};

use super::{InferenceBackend, Token};

/// Reserved token id signalling end of generation.
const TOKEN_EOG: Token = 0;
/// First id handed out for scripted pieces.
const TOKEN_PIECE_BASE: Token = 1;
/// Synthetic beginning-of-sequence marker.
const TOKEN_BOS: Token = 3;
/// Offset for prompt-byte tokens so they never collide with piece ids.
const TOKEN_BYTE_BASE: Token = 1000;

pub struct MockModel {
    template: Option<String>,
}

pub struct MockContext {
    used_cells: usize,
    capacity: usize,
}

pub struct MockSampler;

#[derive(Default)]
struct MockState {
    /// Scripted replies, one piece list per upcoming turn.
    replies: VecDeque<Vec<String>>,
    /// Pieces still pending in the active turn.
    current: VecDeque<String>,
    /// Token id registry: piece id -> text.
    pieces: Vec<String>,
    fail_decode: bool,
    fail_render: bool,
    fail_tokenize: bool,
    corrupt_piece: bool,
    /// While set, `sample` blocks. Lets tests hold a generation open.
    hold_sampling: bool,
}

#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
    hold_cv: Condvar,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the pieces the sampler will emit for the next turn.
    pub fn push_reply<I, S>(&self, pieces: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock().expect("mock state lock poisoned");
        state
            .replies
            .push_back(pieces.into_iter().map(Into::into).collect());
    }

    pub fn set_fail_decode(&self, fail: bool) {
        self.state.lock().expect("mock state lock poisoned").fail_decode = fail;
    }

    pub fn set_fail_render(&self, fail: bool) {
        self.state.lock().expect("mock state lock poisoned").fail_render = fail;
    }

    pub fn set_fail_tokenize(&self, fail: bool) {
        self.state.lock().expect("mock state lock poisoned").fail_tokenize = fail;
    }

    pub fn set_corrupt_piece(&self, corrupt: bool) {
        self.state.lock().expect("mock state lock poisoned").corrupt_piece = corrupt;
    }

    /// Blocks every subsequent `sample` call until [`release_sampling`].
    ///
    /// [`release_sampling`]: MockBackend::release_sampling
    pub fn hold_sampling(&self) {
        self.state.lock().expect("mock state lock poisoned").hold_sampling = true;
    }

    pub fn release_sampling(&self) {
        self.state.lock().expect("mock state lock poisoned").hold_sampling = false;
        self.hold_cv.notify_all();
    }
}

impl InferenceBackend for MockBackend {
    type Model = MockModel;
    type Context = MockContext;
    type Sampler = MockSampler;

    fn load_model(&self, path: &Path, _params: &ModelParams) -> QuillResult<Self::Model> {
        if !path.exists() {
            return Err(QuillError::LoadFailed(format!(
                "no model file at {}",
                path.display()
            )));
        }
        Ok(MockModel {
            template: Some("chatml".to_string()),
        })
    }

    fn create_context(
        &self,
        _model: &Self::Model,
        params: &ModelParams,
    ) -> QuillResult<Self::Context> {
        Ok(MockContext {
            used_cells: 0,
            capacity: params.context_size as usize,
        })
    }

    fn create_sampler(
        &self,
        _model: &Self::Model,
        _params: &ModelParams,
    ) -> QuillResult<Self::Sampler> {
        Ok(MockSampler)
    }

    fn embedded_chat_template(&self, model: &Self::Model) -> Option<String> {
        model.template.clone()
    }

    fn render_chat_template(
        &self,
        template: &str,
        messages: &[Message],
        append_assistant_opening: bool,
        out: &mut [u8],
    ) -> i32 {
        {
            let state = self.state.lock().expect("mock state lock poisoned");
            if state.fail_render || template.trim() == "#invalid" {
                return -1;
            }
        }

        let mut text = format!("<<{}>>\n", template);
        for message in messages {
            text.push_str(&format!("<|{}|>{}\n", message.role, message.content));
        }
        if append_assistant_opening {
            text.push_str("<|assistant|>");
        }

        let bytes = text.as_bytes();
        let n = bytes.len().min(out.len());
        out[..n].copy_from_slice(&bytes[..n]);
        bytes.len() as i32
    }

    fn tokenize(
        &self,
        _model: &Self::Model,
        text: &str,
        add_bos: bool,
        out: &mut [Token],
    ) -> i32 {
        if self.state.lock().expect("mock state lock poisoned").fail_tokenize {
            return -1;
        }

        let needed = text.len() + usize::from(add_bos);
        if out.len() < needed {
            return -(needed as i32);
        }

        let mut i = 0;
        if add_bos {
            out[i] = TOKEN_BOS;
            i += 1;
        }
        for byte in text.bytes() {
            out[i] = TOKEN_BYTE_BASE + Token::from(byte);
            i += 1;
        }
        needed as i32
    }

    fn context_capacity(&self, context: &Self::Context) -> usize {
        context.capacity
    }

    fn context_used_cells(&self, context: &Self::Context) -> usize {
        context.used_cells
    }

    fn decode(&self, context: &mut Self::Context, batch: &[Token]) -> i32 {
        let mut state = self.state.lock().expect("mock state lock poisoned");
        if state.fail_decode {
            return 1;
        }
        // A multi-token batch is a freshly rendered prompt, which starts the
        // next scripted turn. Single-token batches continue the current one.
        if batch.len() > 1 {
            state.current = state
                .replies
                .pop_front()
                .unwrap_or_default()
                .into();
        }
        context.used_cells += batch.len();
        0
    }

    fn sample(&self, _sampler: &mut Self::Sampler, _context: &mut Self::Context) -> Token {
        let mut state = self.state.lock().expect("mock state lock poisoned");
        while state.hold_sampling {
            state = self
                .hold_cv
                .wait(state)
                .expect("mock state lock poisoned");
        }
        match state.current.pop_front() {
            Some(piece) => {
                state.pieces.push(piece);
                TOKEN_PIECE_BASE + (state.pieces.len() as Token - 1)
            }
            None => TOKEN_EOG,
        }
    }

    fn is_end_of_generation(&self, _model: &Self::Model, token: Token) -> bool {
        token == TOKEN_EOG
    }

    fn token_to_piece(&self, _model: &Self::Model, token: Token, out: &mut [u8]) -> i32 {
        let state = self.state.lock().expect("mock state lock poisoned");
        if state.corrupt_piece {
            return -1;
        }
        let Some(piece) = state.pieces.get((token - TOKEN_PIECE_BASE) as usize) else {
            return -1;
        };
        let bytes = piece.as_bytes();
        let n = bytes.len().min(out.len());
        out[..n].copy_from_slice(&bytes[..n]);
        n as i32
    }
}
