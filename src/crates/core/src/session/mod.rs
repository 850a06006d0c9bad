//! Model session
//!
//! [`SessionManager`] owns the loaded model, context, sampler chain and
//! chat template, and is the synchronization boundary: at most one load
//! or one generation is ever in flight. Public operations never block
//! the caller; background work runs on the blocking pool and every
//! observable result is marshaled back through the single event
//! channel, in the order it was produced.

mod decode;
mod state;

pub use state::SessionState;

use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::{self, InferenceBackend};
use crate::config::ModelParams;
use crate::conversation::{ConversationStore, Message, Role};
use crate::events::{EventSink, SessionEvent, SessionEventReceiver};
use crate::util::errors::{QuillError, QuillResult};

use self::state::StateMachine;

/// Model, context, sampler and template of one loaded session.
pub(crate) struct LoadedSession<B: InferenceBackend> {
    // Field order is drop order: the sampler must never outlive the
    // context, the context never the model.
    pub(crate) sampler: B::Sampler,
    pub(crate) context: B::Context,
    pub(crate) model: B::Model,
    pub(crate) template: String,
}

struct SessionInner<B: InferenceBackend> {
    backend: Arc<B>,
    state: StateMachine,
    /// Touched only by the single active background task, or by `close`
    /// when nothing is in flight.
    slot: Mutex<Option<LoadedSession<B>>>,
    transcript: Mutex<ConversationStore>,
    show_thinking: AtomicBool,
    events: EventSink,
}

/// Handle to one local chat session. Cheap to clone; all clones share
/// the same session.
pub struct SessionManager<B: InferenceBackend> {
    inner: Arc<SessionInner<B>>,
}

impl<B: InferenceBackend> Clone for SessionManager<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: InferenceBackend> SessionManager<B> {
    /// Creates the manager and the receiving half of its event channel.
    /// The consumer of the receiver is the session's "main" execution
    /// context: events arrive in production order.
    pub fn new(backend: Arc<B>) -> (Self, SessionEventReceiver) {
        let (events, rx) = EventSink::channel();
        let manager = Self {
            inner: Arc::new(SessionInner {
                backend,
                state: StateMachine::new(),
                slot: Mutex::new(None),
                transcript: Mutex::new(ConversationStore::new()),
                show_thinking: AtomicBool::new(false),
                events,
            }),
        };
        (manager, rx)
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.current()
    }

    pub fn is_loading(&self) -> bool {
        self.state() == SessionState::Loading
    }

    pub fn is_generating(&self) -> bool {
        self.state() == SessionState::Generating
    }

    /// Whether a model is currently loaded. Instantaneous state read; the
    /// resource slot itself may be busy on a background worker.
    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            SessionState::Ready | SessionState::Generating
        )
    }

    /// Whether process-wide backend init has completed (owned by the host
    /// that constructed the backend).
    pub fn is_initialized(&self) -> bool {
        self.inner.backend.is_initialized()
    }

    pub fn show_thinking(&self) -> bool {
        self.inner.show_thinking.load(Ordering::Relaxed)
    }

    /// Routes think-segment text into the visible reply as well as the
    /// thinking channel. May be toggled between turns.
    pub fn set_show_thinking(&self, show: bool) {
        self.inner.show_thinking.store(show, Ordering::Relaxed);
    }

    /// Snapshot of the transcript in conversation order.
    pub fn transcript(&self) -> Vec<Message> {
        self.inner
            .transcript
            .lock()
            .expect("transcript lock poisoned")
            .messages()
            .to_vec()
    }

    /// Schedules a model load and returns immediately. Any previously
    /// loaded model is released first and the transcript cleared. The
    /// outcome arrives as [`SessionEvent::LoadFinished`].
    ///
    /// Rejected while a load or generation is in flight.
    pub fn load(&self, path: impl Into<PathBuf>, params: ModelParams) -> QuillResult<()> {
        self.inner.state.begin_load()?;
        // A reload always starts from a clean session.
        self.inner.release_resources();

        let inner = self.inner.clone();
        let path = path.into();
        tokio::task::spawn_blocking(move || inner.run_load(path, params));
        Ok(())
    }

    /// Releases sampler, context and model (in that order), clears the
    /// transcript and resets transient buffers. Idempotent; rejected only
    /// while background work owns the resources.
    pub fn close(&self) -> QuillResult<()> {
        self.inner.state.begin_close()?;
        self.inner.release_resources();
        Ok(())
    }

    /// Appends a user message and schedules a generation, returning
    /// immediately. Progress arrives as [`SessionEvent::Thinking`] /
    /// [`SessionEvent::Message`] increments and one
    /// [`SessionEvent::MessageComplete`], or [`SessionEvent::SendError`].
    ///
    /// Rejected when no model is ready, while generating, or for empty
    /// content.
    pub fn send_message(&self, content: &str) -> QuillResult<()> {
        if content.is_empty() {
            return Err(QuillError::EmptyMessage);
        }
        self.inner.state.begin_generation()?;

        let inner = self.inner.clone();
        let content = content.to_string();
        tokio::task::spawn_blocking(move || inner.run_generation(Role::User, content));
        Ok(())
    }
}

impl<B: InferenceBackend> SessionInner<B> {
    fn run_load(&self, path: PathBuf, params: ModelParams) {
        match self.build_session(&path, &params) {
            Ok(loaded) => {
                *self.slot.lock().expect("model slot lock poisoned") = Some(loaded);
                if let Some(prompt_path) = params.prompt_path.as_deref() {
                    self.submit_system_prompt(prompt_path);
                }
                self.state.finish_load(true);
                info!("Model loaded: path={}", path.display());
                self.events.emit(SessionEvent::LoadFinished { success: true });
            }
            Err(e) => {
                error!("Model load failed: path={}, error={}", path.display(), e);
                // Partially built resources were dropped on the error path;
                // make sure nothing else lingers either.
                self.release_resources();
                self.state.finish_load(false);
                self.events.emit(SessionEvent::LoadFinished { success: false });
            }
        }
    }

    fn build_session(&self, path: &Path, params: &ModelParams) -> QuillResult<LoadedSession<B>> {
        let model = self.backend.load_model(path, params)?;
        let context = self.backend.create_context(&model, params)?;
        let template = self.resolve_template(&model, params)?;
        let sampler = self.backend.create_sampler(&model, params)?;
        Ok(LoadedSession {
            sampler,
            context,
            model,
            template,
        })
    }

    /// Template file first; the model's embedded template is the fallback.
    fn resolve_template(&self, model: &B::Model, params: &ModelParams) -> QuillResult<String> {
        if let Some(template_path) = params.template_path.as_deref() {
            match std::fs::read_to_string(template_path) {
                Ok(template) => return Ok(template),
                Err(e) => debug!(
                    "Template file unreadable, falling back to embedded template: path={}, error={}",
                    template_path.display(),
                    e
                ),
            }
        }
        self.backend
            .embedded_chat_template(model)
            .ok_or_else(|| QuillError::LoadFailed("model carries no embedded chat template".into()))
    }

    /// Submits the configured system prompt render-only. A missing file is
    /// skipped silently; a rejected render surfaces as a send error but
    /// does not fail the load.
    fn submit_system_prompt(&self, path: &Path) {
        let prompt = match std::fs::read_to_string(path) {
            Ok(prompt) => prompt,
            Err(e) => {
                debug!(
                    "System prompt file unreadable, skipping: path={}, error={}",
                    path.display(),
                    e
                );
                return;
            }
        };
        if let Err(e) = self.submit_render_only(Role::System, &prompt) {
            warn!("System prompt rejected: {}", e);
            self.events.emit(SessionEvent::SendError {
                reason: e.to_string(),
            });
        }
    }

    /// Appends a message and renders it through the template purely to
    /// advance the renderer's continuity bookkeeping; no tokens are
    /// generated.
    fn submit_render_only(&self, role: Role, content: &str) -> QuillResult<()> {
        if content.is_empty() {
            return Err(QuillError::EmptyMessage);
        }
        let slot = self.slot.lock().expect("model slot lock poisoned");
        let session = slot
            .as_ref()
            .ok_or_else(|| QuillError::InvalidState("no model loaded".into()))?;

        let messages = {
            let mut transcript = self.transcript.lock().expect("transcript lock poisoned");
            transcript.append(role, content);
            transcript.messages().to_vec()
        };
        backend::render_transcript(&*self.backend, &session.template, &messages, false)?;
        Ok(())
    }

    fn run_generation(&self, role: Role, content: String) {
        match self.generate_turn(role, &content) {
            Ok(()) => self.state.finish_generation(),
            Err(e) if e.is_fatal() => {
                error!("Fatal backend fault, closing session: {}", e);
                self.release_resources();
                self.state.mark_closed();
                self.events.emit(SessionEvent::Fatal {
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                warn!("Turn aborted: {}", e);
                self.state.finish_generation();
                self.events.emit(SessionEvent::SendError {
                    reason: e.to_string(),
                });
            }
        }
    }

    /// One full turn: append, render, tokenize, decode loop, commit.
    /// Failure past the render stage rolls the transcript back to its
    /// pre-turn length, so an aborted turn leaves the store untouched.
    fn generate_turn(&self, role: Role, content: &str) -> QuillResult<()> {
        let mut slot = self.slot.lock().expect("model slot lock poisoned");
        let session = slot
            .as_mut()
            .ok_or_else(|| QuillError::InvalidState("no model loaded".into()))?;

        let (len_before, messages) = {
            let mut transcript = self.transcript.lock().expect("transcript lock poisoned");
            let len_before = transcript.len();
            transcript.append(role, content);
            (len_before, transcript.messages().to_vec())
        };

        // A render failure mutates the transcript no further; the message
        // just appended stays.
        let rendered =
            backend::render_transcript(&*self.backend, &session.template, &messages, true)?;

        // Beginning-of-sequence marker only on the first prompt since the
        // context was reset.
        let fresh_context = self.backend.context_used_cells(&session.context) == 0;
        let prompt_tokens = match backend::tokenize_prompt(
            &*self.backend,
            &session.model,
            &rendered,
            fresh_context,
        ) {
            Ok(tokens) => tokens,
            Err(e) => {
                self.truncate_transcript(len_before);
                return Err(e);
            }
        };

        let show_thinking = self.show_thinking.load(Ordering::Relaxed);
        let reply = match decode::run_decode_loop(
            &*self.backend,
            session,
            prompt_tokens,
            show_thinking,
            &self.events,
        ) {
            Ok(reply) => reply,
            Err(e) => {
                self.truncate_transcript(len_before);
                return Err(e);
            }
        };

        self.events.emit(SessionEvent::MessageComplete {
            text: reply.clone(),
        });

        let messages = {
            let mut transcript = self.transcript.lock().expect("transcript lock poisoned");
            transcript.append(Role::Assistant, reply);
            transcript.messages().to_vec()
        };

        // Finalize-mode render keeps the template's continuity bookkeeping
        // consistent; its output is discarded.
        if let Err(e) =
            backend::render_transcript(&*self.backend, &session.template, &messages, false)
        {
            error!("Finalize render failed after assistant turn: {}", e);
        }
        Ok(())
    }

    fn truncate_transcript(&self, len: usize) {
        self.transcript
            .lock()
            .expect("transcript lock poisoned")
            .truncate(len);
    }

    /// Dropping the slot releases sampler, then context, then model
    /// (field order). The transcript and its backing text go with it.
    fn release_resources(&self) {
        *self.slot.lock().expect("model slot lock poisoned") = None;
        self.transcript
            .lock()
            .expect("transcript lock poisoned")
            .clear();
    }
}
