//! Terminal chat shell for the study Q&A client.
//! The query service runs on a worker thread; this crate owns input, rendering and the transcript.

pub mod commands;
pub mod conversation;
pub mod session;
pub mod worker;

pub use session::{ChatSession, Delivered, Submitted};
