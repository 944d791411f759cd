//! Client-side conversation state.
//!
//! `ConversationView` holds no I/O. The caller feeds it user input and relay
//! events and renders whatever it reports back.

use crate::models::{RelayEvent, Role, Turn};

/// Shown locally when the view opens. Never sent to the server.
pub const REASSURANCE: &str = "Hi, I'm here to listen. This space is anonymous, \
and everything you share disappears when you close the chat.";

/// Shown in place of a reply that failed.
pub const FALLBACK: &str =
    "I'm having trouble responding right now. Please try again in a moment.";

/// Conversation starters offered until the first message is sent.
pub const SUGGESTIONS: [&str; 3] = [
    "I'm feeling overwhelmed and don't know where to start.",
    "Something happened and I'd like advice.",
    "I just need someone to talk to.",
];

/// What the renderer should do after an event was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewUpdate {
    /// First delta of a new reply; the typing indicator goes away.
    Started(String),
    /// Further delta of the reply in progress.
    Delta(String),
    /// The reply is complete.
    Finished,
    /// The reply failed and was replaced by [`FALLBACK`].
    Failed,
    /// Nothing to render.
    Ignored,
}

#[derive(Debug, Default)]
pub struct ConversationView {
    transcript: Vec<Turn>,
    /// Index of the assistant turn currently being streamed into.
    reply: Option<usize>,
    /// Replies requested but not yet finished.
    awaiting: usize,
    suggestions: bool,
    open: bool,
}

impl ConversationView {
    pub fn open() -> Self {
        Self {
            transcript: vec![Turn::assistant(REASSURANCE)],
            reply: None,
            awaiting: 0,
            suggestions: true,
            open: true,
        }
    }

    /// Record a user message. Returns the text to submit, or `None` if there
    /// is nothing to send.
    pub fn send(&mut self, text: &str) -> Option<String> {
        let text = text.trim();
        if !self.open || text.is_empty() {
            return None;
        }

        self.transcript.push(Turn::user(text));
        self.awaiting += 1;
        self.suggestions = false;
        Some(text.to_string())
    }

    /// Send suggestion `index` (0-based), if suggestions are still offered.
    pub fn suggestion(&mut self, index: usize) -> Option<String> {
        if !self.suggestions {
            return None;
        }
        let text = SUGGESTIONS.get(index)?;
        self.send(text)
    }

    pub fn apply(&mut self, event: &RelayEvent) -> ViewUpdate {
        if !self.open || self.awaiting == 0 {
            return ViewUpdate::Ignored;
        }

        match event {
            RelayEvent::Chunk(delta) => {
                if let Some(index) = self.reply {
                    self.transcript[index].content.push_str(delta);
                    ViewUpdate::Delta(delta.clone())
                } else {
                    self.reply = Some(self.transcript.len());
                    self.transcript.push(Turn::assistant(delta.as_str()));
                    ViewUpdate::Started(delta.clone())
                }
            }
            RelayEvent::Done => {
                if self.reply.take().is_none() {
                    // An empty reply still occupies its slot.
                    self.transcript.push(Turn::assistant(""));
                }
                self.awaiting -= 1;
                ViewUpdate::Finished
            }
            RelayEvent::Error(_) => {
                self.fail();
                ViewUpdate::Failed
            }
        }
    }

    /// The message could not be submitted at all.
    pub fn submit_failed(&mut self) {
        if self.awaiting > 0 {
            self.fail();
        }
    }

    fn fail(&mut self) {
        if let Some(index) = self.reply.take() {
            self.transcript.remove(index);
        }
        self.transcript.push(Turn::assistant(FALLBACK));
        self.awaiting -= 1;
    }

    /// Discard the local transcript. The caller is responsible for clearing
    /// the server-side session.
    pub fn close(&mut self) {
        self.transcript.clear();
        self.reply = None;
        self.awaiting = 0;
        self.suggestions = false;
        self.open = false;
    }

    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    /// Whether a reply was requested and nothing of it has arrived yet.
    pub const fn is_typing(&self) -> bool {
        self.awaiting > 0 && self.reply.is_none()
    }

    pub const fn is_open(&self) -> bool {
        self.open
    }

    pub fn suggestions(&self) -> &[&'static str] {
        if self.suggestions {
            &SUGGESTIONS
        } else {
            &[]
        }
    }

    /// Number of assistant turns, the reassurance included.
    pub fn replies(&self) -> usize {
        self.transcript
            .iter()
            .filter(|turn| turn.role == Role::Assistant)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_with_reassurance_and_suggestions() {
        let view = ConversationView::open();
        assert_eq!(view.transcript(), &[Turn::assistant(REASSURANCE)]);
        assert_eq!(view.suggestions().len(), SUGGESTIONS.len());
        assert!(!view.is_typing());
    }

    #[test]
    fn streamed_reply_is_assembled() {
        let mut view = ConversationView::open();
        assert_eq!(view.send(" hello "), Some("hello".to_string()));
        assert!(view.is_typing());
        assert!(view.suggestions().is_empty());

        assert_eq!(
            view.apply(&RelayEvent::Chunk("Hi".into())),
            ViewUpdate::Started("Hi".into())
        );
        assert!(!view.is_typing());
        assert_eq!(
            view.apply(&RelayEvent::Chunk(" there!".into())),
            ViewUpdate::Delta(" there!".into())
        );
        assert_eq!(view.apply(&RelayEvent::Done), ViewUpdate::Finished);

        assert_eq!(
            view.transcript(),
            &[
                Turn::assistant(REASSURANCE),
                Turn::user("hello"),
                Turn::assistant("Hi there!"),
            ]
        );
    }

    #[test]
    fn error_replaces_partial_reply_with_fallback() {
        let mut view = ConversationView::open();
        view.send("hello");
        view.apply(&RelayEvent::Chunk("I underst".into()));
        assert_eq!(
            view.apply(&RelayEvent::Error("Something went wrong".into())),
            ViewUpdate::Failed
        );

        assert_eq!(view.transcript().last(), Some(&Turn::assistant(FALLBACK)));
        assert!(view.transcript().iter().all(|t| t.content != "I underst"));
        assert!(!view.is_typing());
    }

    #[test]
    fn blank_input_is_not_sent() {
        let mut view = ConversationView::open();
        assert_eq!(view.send("   "), None);
        assert_eq!(view.transcript().len(), 1);
    }

    #[test]
    fn suggestion_sends_its_text_once() {
        let mut view = ConversationView::open();
        assert_eq!(view.suggestion(2), Some(SUGGESTIONS[2].to_string()));
        assert_eq!(view.suggestion(0), None);
        assert_eq!(ConversationView::open().suggestion(9), None);
    }

    #[test]
    fn events_without_pending_reply_are_ignored() {
        let mut view = ConversationView::open();
        assert_eq!(view.apply(&RelayEvent::Chunk("stray".into())), ViewUpdate::Ignored);
        assert_eq!(view.transcript().len(), 1);
    }

    #[test]
    fn close_discards_transcript() {
        let mut view = ConversationView::open();
        view.send("private");
        view.close();

        assert!(view.transcript().is_empty());
        assert!(!view.is_open());
        assert_eq!(view.send("again"), None);
        assert_eq!(view.apply(&RelayEvent::Done), ViewUpdate::Ignored);
    }

    #[test]
    fn submit_failure_shows_fallback() {
        let mut view = ConversationView::open();
        view.send("hello");
        view.submit_failed();
        assert_eq!(view.transcript().last(), Some(&Turn::assistant(FALLBACK)));
        assert!(!view.is_typing());
    }

    #[test]
    fn queued_messages_get_separate_replies() {
        let mut view = ConversationView::open();
        view.send("first");
        view.send("second");

        view.apply(&RelayEvent::Chunk("one".into()));
        view.apply(&RelayEvent::Done);
        assert!(view.is_typing());
        view.apply(&RelayEvent::Chunk("two".into()));
        view.apply(&RelayEvent::Done);

        assert_eq!(view.replies(), 3);
        assert!(!view.is_typing());
    }
}
