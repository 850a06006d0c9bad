//! Session event channel
//!
//! One typed enum over one unbounded mpsc channel: a single producer
//! task at a time and a single consuming loop make ordering and
//! at-most-once delivery structural rather than convention-based.
//! Events serialize as camelCase-tagged JSON so hosts can forward them
//! as-is.

use log::trace;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// Terminal result of a `load` request.
    LoadFinished { success: bool },
    /// One piece of think-segment text, in generation order.
    Thinking { text: String },
    /// Cumulative visible text so far. Consumers replace, never concatenate.
    Message { text: String },
    /// The full reply, delivered once after the last increment.
    MessageComplete { text: String },
    /// The current turn failed; the transcript was rolled back.
    SendError { reason: String },
    /// Unrecoverable backend fault; the session has been closed.
    Fatal { reason: String },
}

pub type SessionEventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Sending half of the session event channel.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, SessionEventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            trace!("Session event dropped: no consumer attached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_tagged_camel_case() {
        let json = serde_json::to_string(&SessionEvent::LoadFinished { success: true })
            .expect("serialize");
        assert_eq!(json, r#"{"type":"loadFinished","success":true}"#);

        let json = serde_json::to_string(&SessionEvent::MessageComplete {
            text: "done".into(),
        })
        .expect("serialize");
        assert_eq!(json, r#"{"type":"messageComplete","text":"done"}"#);
    }

    #[test]
    fn channel_preserves_emit_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(SessionEvent::Message { text: "a".into() });
        sink.emit(SessionEvent::Message { text: "ab".into() });
        sink.emit(SessionEvent::MessageComplete { text: "ab".into() });

        assert_eq!(
            rx.try_recv().expect("first"),
            SessionEvent::Message { text: "a".into() }
        );
        assert_eq!(
            rx.try_recv().expect("second"),
            SessionEvent::Message { text: "ab".into() }
        );
        assert_eq!(
            rx.try_recv().expect("third"),
            SessionEvent::MessageComplete { text: "ab".into() }
        );
    }

    #[test]
    fn emit_without_consumer_is_silent() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(SessionEvent::SendError {
            reason: "nobody listening".into(),
        });
    }
}
