//! Chat session against a real worker thread, a scripted answerer and an
//! in-memory cache. Covers reply delivery, cache marking, and late replies.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use study_qa_client::{Answerer, CacheStore, GenerateError, QueryService};
use study_qa_shell::commands::{CACHE_SUFFIX, HELP};
use study_qa_shell::conversation::{Message, Speaker};
use study_qa_shell::session::CLEARED_NOTICE;
use study_qa_shell::worker::{Request, RequestKind};
use study_qa_shell::{worker, ChatSession, Delivered, Submitted};

const QUESTION: &str = "What is photosynthesis?";
const ANSWER: &str = "Process by which plants convert light to energy.";

struct FixedAnswerer(Result<String, GenerateError>);

#[async_trait]
impl Answerer for FixedAnswerer {
    async fn generate(&self, _question: &str) -> Result<String, GenerateError> {
        self.0.clone()
    }
}

/// Blocks each call until the test releases it.
struct GatedAnswerer {
    gate: Mutex<Receiver<()>>,
}

#[async_trait]
impl Answerer for GatedAnswerer {
    async fn generate(&self, question: &str) -> Result<String, GenerateError> {
        let _ = self.gate.lock().unwrap().recv();
        Ok(format!("answer to {}", question))
    }
}

fn session_with(answerer: Box<dyn Answerer>) -> ChatSession {
    let service = QueryService::new(Some(CacheStore::in_memory().unwrap()), answerer);
    let handle = worker::spawn(service).unwrap();
    ChatSession::new(handle, "Settings (test)".to_string())
}

fn system(text: &str) -> Message {
    Message {
        speaker: Speaker::System,
        text: text.to_string(),
        is_error: false,
    }
}

fn gated_session() -> (ChatSession, Sender<()>) {
    let (release, gate) = mpsc::channel();
    let answerer = GatedAnswerer {
        gate: Mutex::new(gate),
    };
    (session_with(Box::new(answerer)), release)
}

fn submit_request(session: &mut ChatSession, line: &str) -> u64 {
    match session.submit(line).unwrap() {
        Submitted::Pending(id) => id,
        other => panic!("expected a pending request, got {:?}", other),
    }
}

/// Poll until a reply is delivered or five seconds pass.
fn wait_delivered(session: &mut ChatSession) -> Option<Delivered> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Some(d) = session.next_reply(Duration::from_millis(100)).unwrap() {
            return Some(d);
        }
    }
    None
}

#[test]
fn question_is_answered_then_served_from_cache() {
    let mut session = session_with(Box::new(FixedAnswerer(Ok(ANSWER.into()))));

    let id = submit_request(&mut session, &format!("{}\n", QUESTION));
    let first = wait_delivered(&mut session).expect("reply");
    assert_eq!(first.id, id);
    assert_eq!(first.text, ANSWER);
    assert!(!first.is_error);
    assert!(!session.has_pending());

    submit_request(&mut session, QUESTION);
    let second = wait_delivered(&mut session).expect("reply");
    assert!(second.text.starts_with(ANSWER));
    assert!(second.text.ends_with(CACHE_SUFFIX));

    let speakers: Vec<Speaker> = session
        .conversation()
        .messages()
        .iter()
        .map(|m| m.speaker)
        .collect();
    assert_eq!(
        speakers,
        vec![Speaker::User, Speaker::Assistant, Speaker::User, Speaker::Assistant]
    );
    assert_eq!(session.conversation().messages()[0].text, QUESTION);
}

#[test]
fn service_failure_is_shown_as_an_error() {
    let mut session = session_with(Box::new(FixedAnswerer(Err(GenerateError::Network(
        "connection refused".into(),
    )))));

    submit_request(&mut session, QUESTION);
    let reply = wait_delivered(&mut session).expect("reply");
    assert!(reply.is_error);
    assert!(reply.text.starts_with("Error:"), "got {}", reply.text);
    assert!(reply.text.contains("connection refused"));
    assert!(reply.text.ends_with("You can try again."));

    let last = session.conversation().messages().last().unwrap();
    assert!(last.is_error);
}

#[test]
fn blank_question_is_rejected_without_calling_the_service() {
    let mut session = session_with(Box::new(FixedAnswerer(Ok(ANSWER.into()))));

    assert_eq!(session.submit("   \n").unwrap(), Submitted::Nothing);
    assert!(session.conversation().is_empty());

    let long = "x".repeat(501);
    submit_request(&mut session, &long);
    let reply = wait_delivered(&mut session).expect("reply");
    assert!(reply.is_error);
    assert!(reply.text.contains("too long"));
}

#[test]
fn cache_commands_go_through_the_worker() {
    let mut session = session_with(Box::new(FixedAnswerer(Ok(ANSWER.into()))));
    submit_request(&mut session, QUESTION);
    wait_delivered(&mut session).expect("answer");

    submit_request(&mut session, "/stats");
    let stats = wait_delivered(&mut session).expect("stats");
    assert!(stats.text.contains("Total entries: 1"), "got {}", stats.text);
    assert!(stats.text.contains(QUESTION));

    submit_request(&mut session, "/CLEAR-CACHE");
    let cleared = wait_delivered(&mut session).expect("cleared");
    assert_eq!(cleared.text, "Removed 1 entries from the answer cache.");

    submit_request(&mut session, "/status");
    let status = wait_delivered(&mut session).expect("status");
    assert_eq!(status.text, "The answer service is online.");
}

#[test]
fn local_commands_do_not_reach_the_worker() {
    let mut session = session_with(Box::new(FixedAnswerer(Ok(ANSWER.into()))));

    assert_eq!(session.submit("/help").unwrap(), Submitted::Local(HELP.to_string()));
    assert_eq!(
        session.submit("/settings").unwrap(),
        Submitted::Local("Settings (test)".to_string())
    );
    assert_eq!(
        session.submit("/bogus").unwrap(),
        Submitted::Local("Unknown command: /bogus (try /help)".to_string())
    );
    assert_eq!(session.submit("/quit").unwrap(), Submitted::Quit);
    assert!(!session.has_pending());
    assert_eq!(
        session.conversation().messages(),
        &[system("Unknown command: /bogus (try /help)")]
    );
}

#[test]
fn slash_path_question_is_sent_to_the_service() {
    let mut session = session_with(Box::new(FixedAnswerer(Ok(ANSWER.into()))));

    submit_request(&mut session, "/etc/hosts format?");
    let reply = wait_delivered(&mut session).expect("reply");
    assert_eq!(reply.text, ANSWER);
    assert_eq!(session.conversation().messages()[0].text, "/etc/hosts format?");
}

#[test]
fn reply_arriving_after_clear_is_ignored() {
    let (mut session, release) = gated_session();

    submit_request(&mut session, "first question");
    assert_eq!(session.submit("/clear").unwrap(), Submitted::Cleared);
    assert_eq!(session.conversation().messages(), &[system(CLEARED_NOTICE)]);

    release.send(()).unwrap();
    assert_eq!(wait_delivered(&mut session), None);
    assert_eq!(session.conversation().messages(), &[system(CLEARED_NOTICE)]);
    assert!(!session.has_pending());

    let id = submit_request(&mut session, "second question");
    release.send(()).unwrap();
    let reply = wait_delivered(&mut session).expect("reply");
    assert_eq!(reply.id, id);
    assert_eq!(reply.text, "answer to second question");
    assert_eq!(session.conversation().messages().len(), 3);
}

#[test]
fn abandoned_request_is_dropped_when_it_completes() {
    let (mut session, release) = gated_session();

    let id = submit_request(&mut session, "slow question");
    assert_eq!(session.next_reply(Duration::from_millis(50)).unwrap(), None);
    session.abandon(id);
    assert!(!session.has_pending());

    release.send(()).unwrap();
    assert_eq!(wait_delivered(&mut session), None);
    // Only the user's question is in the transcript.
    assert_eq!(session.conversation().messages().len(), 1);
}

#[test]
fn worker_shuts_down_cleanly() {
    let service = QueryService::new(None, Box::new(FixedAnswerer(Ok(ANSWER.into()))));
    let handle = worker::spawn(service).unwrap();
    handle.shutdown();
}

/// Signals when a call starts, then blocks until released. Counts calls.
struct CountingGate {
    started: Mutex<Sender<()>>,
    gate: Mutex<Receiver<()>>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Answerer for CountingGate {
    async fn generate(&self, _question: &str) -> Result<String, GenerateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.started.lock().unwrap().send(());
        let _ = self.gate.lock().unwrap().recv();
        Ok(ANSWER.into())
    }
}

#[test]
fn shutdown_skips_queued_requests() {
    let (started_tx, started_rx) = mpsc::channel();
    let (release, gate) = mpsc::channel();
    let calls = Arc::new(AtomicUsize::new(0));
    let answerer = CountingGate {
        started: Mutex::new(started_tx),
        gate: Mutex::new(gate),
        calls: calls.clone(),
    };
    let handle = worker::spawn(QueryService::new(None, Box::new(answerer))).unwrap();

    for id in 1..=3 {
        handle
            .send(Request {
                id,
                kind: RequestKind::Ask(format!("question {}", id)),
            })
            .unwrap();
    }
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("first request should start");

    let releaser = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        let _ = release.send(());
    });
    handle.shutdown();
    releaser.join().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1, "queued requests must not run");
}
