//! Background worker that owns the [`QueryService`].
//!
//! The UI thread sends [`Request`]s and receives [`Reply`]s over channels; the
//! network call and cache access happen on the worker thread only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use study_qa_client::{Answer, CacheStats, QueryError, QueryService, ServiceStatus};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Ask(String),
    Stats,
    ClearCache,
    CheckStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: u64,
    pub kind: RequestKind,
}

#[derive(Debug)]
pub enum ReplyKind {
    Answer(Result<Answer, QueryError>),
    Stats(Result<CacheStats, QueryError>),
    Cleared(Result<usize, QueryError>),
    Status(Result<ServiceStatus, QueryError>),
}

#[derive(Debug)]
pub struct Reply {
    pub id: u64,
    pub kind: ReplyKind,
}

/// The worker thread has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("the query worker has stopped")]
pub struct WorkerGone;

enum Envelope {
    Work(Request),
    Shutdown,
}

/// UI-side end of the worker. Dropping it stops the worker.
pub struct WorkerHandle {
    requests: Sender<Envelope>,
    replies: Receiver<Reply>,
    stopping: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Start the worker thread with its own single-threaded runtime.
pub fn spawn(service: QueryService) -> std::io::Result<WorkerHandle> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let (req_tx, req_rx) = mpsc::channel::<Envelope>();
    let (reply_tx, reply_rx) = mpsc::channel::<Reply>();
    let stopping = Arc::new(AtomicBool::new(false));
    let stop_flag = stopping.clone();

    let thread = std::thread::Builder::new()
        .name("study-qa-worker".into())
        .spawn(move || {
            while let Ok(Envelope::Work(request)) = req_rx.recv() {
                // Requests still queued at shutdown are dropped unanswered.
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                debug!("Worker handling request {}", request.id);
                let kind = runtime.block_on(handle(&service, request.kind));
                if reply_tx.send(Reply { id: request.id, kind }).is_err() {
                    break;
                }
            }
            debug!("Worker stopped");
        })?;

    Ok(WorkerHandle {
        requests: req_tx,
        replies: reply_rx,
        stopping,
        thread: Some(thread),
    })
}

async fn handle(service: &QueryService, kind: RequestKind) -> ReplyKind {
    match kind {
        RequestKind::Ask(question) => ReplyKind::Answer(service.answer(&question).await),
        RequestKind::Stats => ReplyKind::Stats(service.stats()),
        RequestKind::ClearCache => ReplyKind::Cleared(service.clear()),
        RequestKind::CheckStatus => ReplyKind::Status(service.check_service().await),
    }
}

impl WorkerHandle {
    pub fn send(&self, request: Request) -> Result<(), WorkerGone> {
        self.requests
            .send(Envelope::Work(request))
            .map_err(|_| WorkerGone)
    }

    /// Wait up to `timeout` for the next reply. `Ok(None)` means nothing arrived yet.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Reply>, WorkerGone> {
        match self.replies.recv_timeout(timeout) {
            Ok(reply) => Ok(Some(reply)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(WorkerGone),
        }
    }

    /// Stop the worker after it finishes the request in flight. Queued requests are skipped.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.requests.send(Envelope::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Query worker panicked");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
