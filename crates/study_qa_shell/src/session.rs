//! Chat session: turns input lines into worker requests and worker replies into transcript lines.

use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::commands::{self, Command};
use crate::conversation::{Conversation, Speaker};
use crate::worker::{Reply, ReplyKind, Request, RequestKind, WorkerGone, WorkerHandle};

pub const CLEARED_NOTICE: &str = "Conversation cleared.";

/// What the UI should do after [`ChatSession::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitted {
    /// Request sent to the worker; wait for a reply with this id.
    Pending(u64),
    /// Handled locally; show this text.
    Local(String),
    /// Nothing to do (blank line).
    Nothing,
    /// Conversation cleared.
    Cleared,
    Quit,
}

/// A reply that belongs to the current conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub id: u64,
    pub text: String,
    pub is_error: bool,
}

pub struct ChatSession {
    worker: WorkerHandle,
    conversation: Conversation,
    settings: String,
    next_id: u64,
    /// Request id -> conversation generation it was issued in.
    pending: HashMap<u64, u64>,
}

impl ChatSession {
    /// `settings` is the pre-rendered text shown for `/settings`.
    pub fn new(worker: WorkerHandle, settings: String) -> Self {
        Self {
            worker,
            conversation: Conversation::new(),
            settings,
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn submit(&mut self, line: &str) -> Result<Submitted, WorkerGone> {
        let command = match commands::parse_command(line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => return Ok(Submitted::Nothing),
            Err(msg) => {
                self.conversation.push(Speaker::System, msg.clone());
                return Ok(Submitted::Local(msg));
            }
        };

        let kind = match command {
            Command::Ask(question) => {
                self.conversation.push(Speaker::User, question.clone());
                RequestKind::Ask(question)
            }
            Command::Stats => RequestKind::Stats,
            Command::ClearCache => RequestKind::ClearCache,
            Command::Status => RequestKind::CheckStatus,
            Command::ClearConversation => {
                self.conversation.clear();
                self.conversation.push(Speaker::System, CLEARED_NOTICE);
                return Ok(Submitted::Cleared);
            }
            Command::Settings => return Ok(Submitted::Local(self.settings.clone())),
            Command::Help => return Ok(Submitted::Local(commands::HELP.to_string())),
            Command::Quit => return Ok(Submitted::Quit),
        };

        let id = self.next_id;
        self.next_id += 1;
        self.worker.send(Request { id, kind })?;
        self.pending.insert(id, self.conversation.generation());
        Ok(Submitted::Pending(id))
    }

    /// Wait up to `timeout` for a reply. Stale replies are consumed and yield `Ok(None)`.
    pub fn next_reply(&mut self, timeout: Duration) -> Result<Option<Delivered>, WorkerGone> {
        let Some(reply) = self.worker.recv_timeout(timeout)? else {
            return Ok(None);
        };
        Ok(self.accept(reply))
    }

    /// Stop waiting for `id`; its reply will be dropped when it arrives.
    pub fn abandon(&mut self, id: u64) {
        self.pending.remove(&id);
    }

    fn accept(&mut self, reply: Reply) -> Option<Delivered> {
        let issued_in = self.pending.remove(&reply.id);
        if issued_in != Some(self.conversation.generation()) {
            debug!("Ignoring late reply {}", reply.id);
            return None;
        }

        let (text, is_error) = match reply.kind {
            ReplyKind::Answer(Ok(answer)) => (commands::render_answer(&answer), false),
            ReplyKind::Stats(Ok(stats)) => (commands::render_stats(&stats), false),
            ReplyKind::Cleared(Ok(removed)) => (commands::render_cleared(removed), false),
            ReplyKind::Status(Ok(status)) => (commands::render_status(&status), false),
            ReplyKind::Answer(Err(e))
            | ReplyKind::Stats(Err(e))
            | ReplyKind::Cleared(Err(e))
            | ReplyKind::Status(Err(e)) => (commands::render_error(&e), true),
        };

        if is_error {
            self.conversation.push_error(text.clone());
        } else {
            self.conversation.push(Speaker::Assistant, text.clone());
        }
        Some(Delivered {
            id: reply.id,
            text,
            is_error,
        })
    }
}
