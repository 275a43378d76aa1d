//! In-memory chat transcript.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub speaker: Speaker,
    pub text: String,
    pub is_error: bool,
}

/// Transcript plus a generation counter. Clearing starts a new generation, so
/// replies to requests issued before the clear can be recognised and dropped.
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    generation: u64,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.messages.push(Message {
            speaker,
            text: text.into(),
            is_error: false,
        });
    }

    pub fn push_error(&mut self, text: impl Into<String>) {
        self.messages.push(Message {
            speaker: Speaker::Assistant,
            text: text.into(),
            is_error: true,
        });
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
