// Quill Core Library - local LLM chat session engine
// Layers: Util -> Config/Conversation/Backend/Events -> Session

pub mod backend; // Inference backend collaborator contract + mock
pub mod config; // Load-time session configuration
pub mod conversation; // Role-tagged transcript
pub mod events; // Typed session event channel
pub mod session; // Session manager, state machine, decode loop
pub mod util; // Error types

// Export main types
pub use util::errors::{QuillError, QuillResult};

pub use backend::{InferenceBackend, Token};
pub use config::ModelParams;
pub use conversation::{ConversationStore, Message, Role};
pub use events::{SessionEvent, SessionEventReceiver};
pub use session::{SessionManager, SessionState};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const CORE_NAME: &str = "Quill Core";
