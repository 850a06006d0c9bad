//! Inference backend collaborator contract
//!
//! The native tensor/inference engine is consumed as an opaque
//! capability behind [`InferenceBackend`]: tokenize, decode one step,
//! sample, detokenize, render a chat template. All calls are
//! synchronous and report failure through distinguishable
//! negative/empty results, which the session layer translates into
//! [`QuillError`] variants before anything crosses the public surface.
//!
//! Process-wide backend init/teardown is owned by whichever host
//! constructs the backend value; the session never assumes it owns that
//! lifecycle.

pub mod mock;

use std::path::Path;

use crate::config::ModelParams;
use crate::conversation::Message;
use crate::util::errors::{QuillError, QuillResult};

/// Token id in the backend vocabulary.
pub type Token = i32;

pub trait InferenceBackend: Send + Sync + 'static {
    /// Loaded model weights plus vocabulary.
    type Model: Send + 'static;
    /// Rolling decode context bound to one model. May internally share
    /// ownership of the model; the session still drops it before the model.
    type Context: Send + 'static;
    /// Sampler chain.
    type Sampler: Send + 'static;

    fn load_model(&self, path: &Path, params: &ModelParams) -> QuillResult<Self::Model>;

    fn create_context(&self, model: &Self::Model, params: &ModelParams)
        -> QuillResult<Self::Context>;

    /// Builds the sampler chain: min-p filter, temperature scaling, then a
    /// distribution sampler seeded from [`ModelParams::sampler_seed`].
    fn create_sampler(&self, model: &Self::Model, params: &ModelParams)
        -> QuillResult<Self::Sampler>;

    /// The chat template embedded in the model weights, if any.
    fn embedded_chat_template(&self, model: &Self::Model) -> Option<String>;

    /// Renders `messages` through `template` into `out`.
    ///
    /// Two-pass sizing protocol: the return value is the required size in
    /// bytes and may exceed `out.len()`, in which case the caller regrows
    /// the buffer and calls again; the call after resizing is
    /// authoritative. Negative means the template is invalid.
    fn render_chat_template(
        &self,
        template: &str,
        messages: &[Message],
        append_assistant_opening: bool,
        out: &mut [u8],
    ) -> i32;

    /// Tokenizes `text` into `out`.
    ///
    /// Two-pass sizing protocol in the llama convention: returns the number
    /// of tokens written, or the negated required count when `out` is too
    /// small. `add_bos` is set when this is the first prompt since the
    /// context was reset.
    fn tokenize(&self, model: &Self::Model, text: &str, add_bos: bool, out: &mut [Token]) -> i32;

    /// Total context capacity in cells.
    fn context_capacity(&self, context: &Self::Context) -> usize;

    /// Cells already consumed by previously decoded tokens.
    fn context_used_cells(&self, context: &Self::Context) -> usize;

    /// Runs one decode step over `batch`. Non-zero status means failure.
    fn decode(&self, context: &mut Self::Context, batch: &[Token]) -> i32;

    /// Samples the next token from the chain against the current context state.
    fn sample(&self, sampler: &mut Self::Sampler, context: &mut Self::Context) -> Token;

    fn is_end_of_generation(&self, model: &Self::Model, token: Token) -> bool;

    /// Converts one token to a UTF-8 piece, returning the bytes written.
    /// Negative indicates a corrupted vocabulary and is session-fatal.
    fn token_to_piece(&self, model: &Self::Model, token: Token, out: &mut [u8]) -> i32;

    /// Whether process-wide backend init has completed. Constructing the
    /// backend value normally implies it.
    fn is_initialized(&self) -> bool {
        true
    }
}

/// Renders the transcript with the two-pass sizing protocol of
/// [`InferenceBackend::render_chat_template`].
pub fn render_transcript<B: InferenceBackend>(
    backend: &B,
    template: &str,
    messages: &[Message],
    append_assistant_opening: bool,
) -> QuillResult<String> {
    let mut buf: Vec<u8> = Vec::new();
    let mut size = backend.render_chat_template(template, messages, append_assistant_opening, &mut buf);
    if size > buf.len() as i32 {
        buf.resize(size as usize, 0);
        size = backend.render_chat_template(template, messages, append_assistant_opening, &mut buf);
    }
    if size < 0 {
        return Err(QuillError::Template(
            "template is invalid or unsupported".into(),
        ));
    }
    let end = (size as usize).min(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

/// Tokenizes a rendered prompt with the two-pass sizing protocol of
/// [`InferenceBackend::tokenize`].
pub fn tokenize_prompt<B: InferenceBackend>(
    backend: &B,
    model: &B::Model,
    text: &str,
    add_bos: bool,
) -> QuillResult<Vec<Token>> {
    let needed = backend.tokenize(model, text, add_bos, &mut []);
    let needed = if needed < 0 { -needed } else { needed } as usize;
    let mut tokens = vec![0 as Token; needed];
    let written = backend.tokenize(model, text, add_bos, &mut tokens);
    if written < 0 {
        return Err(QuillError::Tokenize(format!(
            "backend rejected a {} byte prompt",
            text.len()
        )));
    }
    tokens.truncate(written as usize);
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::mock::MockBackend;
    use super::*;
    use crate::conversation::Role;

    #[test]
    fn render_two_pass_growth() {
        let backend = MockBackend::new();
        let messages = vec![
            Message::new(Role::System, "be brief"),
            Message::new(Role::User, "hi"),
        ];

        let rendered =
            render_transcript(&backend, "chatml", &messages, true).expect("render");
        assert!(rendered.starts_with("<<chatml>>"));
        assert!(rendered.contains("<|system|>be brief"));
        assert!(rendered.contains("<|user|>hi"));
        assert!(rendered.ends_with("<|assistant|>"));
    }

    #[test]
    fn render_finalize_mode_omits_assistant_opening() {
        let backend = MockBackend::new();
        let messages = vec![Message::new(Role::User, "hi")];
        let rendered =
            render_transcript(&backend, "chatml", &messages, false).expect("render");
        assert!(!rendered.ends_with("<|assistant|>"));
    }

    #[test]
    fn render_is_deterministic_for_unchanged_transcript() {
        let backend = MockBackend::new();
        let messages = vec![
            Message::new(Role::User, "same input"),
            Message::new(Role::Assistant, "same output"),
        ];
        let first = render_transcript(&backend, "chatml", &messages, true).expect("render");
        let second = render_transcript(&backend, "chatml", &messages, true).expect("render");
        assert_eq!(first, second);
    }

    #[test]
    fn invalid_template_is_a_template_error() {
        let backend = MockBackend::new();
        let messages = vec![Message::new(Role::User, "hi")];
        let err = render_transcript(&backend, "#invalid", &messages, true).unwrap_err();
        assert!(matches!(err, QuillError::Template(_)));
    }

    #[test]
    fn tokenize_two_pass_counts_bytes() {
        let backend = MockBackend::new();
        let params = ModelParams::default();
        let model = backend
            .load_model(std::path::Path::new("/dev/null"), &params)
            .expect("model");

        let tokens = tokenize_prompt(&backend, &model, "abc", false).expect("tokenize");
        assert_eq!(tokens.len(), 3);

        let with_bos = tokenize_prompt(&backend, &model, "abc", true).expect("tokenize");
        assert_eq!(with_bos.len(), 4);
    }
}
