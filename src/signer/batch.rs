//! Sequential batch signing
//!
//! [`sign_all`] returns immediately. A worker signs one file at a time in
//! input order and posts [`BatchEvent`]s on a channel; a dispatcher turns
//! those into callback invocations, so callbacks run in event order and never
//! on the caller's thread. Without an ambient Tokio runtime the batch runs on a
//! dedicated thread with its own runtime.
//!
//! Per-file failures are data: the worker always moves on to the next file and
//! always finishes with exactly one [`BatchEvent::Complete`].

use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use super::drain::LineSink;
use super::{SignOutcome, SignRunner, SigningCommand, display_name};

type ProgressFn = Box<dyn Fn(usize, usize, &str) + Send>;
type LineFn = Box<dyn Fn(&str) + Send>;
type OutcomeFn = Box<dyn Fn(&SignOutcome) + Send>;
type CompleteFn = Box<dyn FnOnce(Vec<SignOutcome>) + Send>;

/// Notifications produced by a running batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    /// About to sign file `index` (1-based) of `total`.
    Progress {
        index: usize,
        total: usize,
        filename: String,
    },
    Line(String),
    Outcome(SignOutcome),
    Complete(Vec<SignOutcome>),
}

/// Optional observers for [`sign_all`].
#[derive(Default)]
pub struct BatchCallbacks {
    on_progress: Option<ProgressFn>,
    on_line: Option<LineFn>,
    on_outcome: Option<OutcomeFn>,
    on_complete: Option<CompleteFn>,
}

impl BatchCallbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_progress(mut self, f: impl Fn(usize, usize, &str) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_line(mut self, f: impl Fn(&str) + Send + 'static) -> Self {
        self.on_line = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_outcome(mut self, f: impl Fn(&SignOutcome) + Send + 'static) -> Self {
        self.on_outcome = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_complete(mut self, f: impl FnOnce(Vec<SignOutcome>) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    fn dispatch(&mut self, event: BatchEvent) {
        match event {
            BatchEvent::Progress {
                index,
                total,
                filename,
            } => {
                if let Some(f) = &self.on_progress {
                    f(index, total, &filename);
                }
            }
            BatchEvent::Line(line) => {
                if let Some(f) = &self.on_line {
                    f(&line);
                }
            }
            BatchEvent::Outcome(outcome) => {
                if let Some(f) = &self.on_outcome {
                    f(&outcome);
                }
            }
            BatchEvent::Complete(outcomes) => {
                if let Some(f) = self.on_complete.take() {
                    f(outcomes);
                }
            }
        }
    }
}

/// A running batch.
///
/// Dropping the handle detaches the batch; it still runs to completion.
pub struct BatchHandle {
    cancelled: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    done: oneshot::Receiver<()>,
}

/// Marks the batch finished when dropped, including on panic or when the
/// batch future is dropped without ever running.
struct Completion {
    finished: Arc<AtomicBool>,
    done: Option<oneshot::Sender<()>>,
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.finished.store(true, Ordering::SeqCst);
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

impl BatchHandle {
    fn pending() -> (Self, Completion) {
        let finished = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel();
        let handle = Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            finished: Arc::clone(&finished),
            done: rx,
        };
        (
            handle,
            Completion {
                finished,
                done: Some(tx),
            },
        )
    }

    /// Skip every file not yet started. `on_complete` still fires with the
    /// outcomes produced so far; a file already being signed is not interrupted.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Wait until every event has been delivered. Works from any runtime.
    pub async fn wait(self) {
        let _ = self.done.await;
    }

    /// Blocking form of [`BatchHandle::wait`] for callers without a runtime.
    ///
    /// Must not be called from inside an async task.
    pub fn wait_blocking(self) {
        let _ = self.done.blocking_recv();
    }
}

/// Run `future` on the current Tokio runtime, or on a dedicated thread with
/// its own runtime when the caller has none.
fn launch<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(runtime) = Handle::try_current() {
        runtime.spawn(future);
        return;
    }

    let spawned = std::thread::Builder::new()
        .name("signit-batch".to_string())
        .spawn(move || {
            match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(future),
                Err(e) => error!(error = %e, "failed to start batch runtime"),
            }
        });
    if let Err(e) = spawned {
        error!(error = %e, "failed to start batch thread");
    }
}

/// Sign `files` in order, reporting through `callbacks`.
///
/// Returns at once and never panics for lack of a runtime: inside one the
/// batch is spawned on it, otherwise it gets a dedicated thread.
pub fn sign_all<R: SignRunner>(
    runner: Arc<R>,
    files: Vec<PathBuf>,
    fingerprint: String,
    timestamp_url: String,
    mut callbacks: BatchCallbacks,
) -> BatchHandle {
    let (tx, mut events) = mpsc::unbounded_channel();
    let (handle, completion) = BatchHandle::pending();
    let cancelled = Arc::clone(&handle.cancelled);

    launch(async move {
        let dispatch = async {
            while let Some(event) = events.recv().await {
                callbacks.dispatch(event);
            }
        };
        tokio::join!(
            run_batch(runner, files, fingerprint, timestamp_url, tx, cancelled),
            dispatch
        );
        drop(completion);
    });

    handle
}

/// Like [`sign_all`] but hands back the raw event stream.
///
/// The handle tracks the worker; the stream ends after [`BatchEvent::Complete`].
pub fn spawn_batch<R: SignRunner>(
    runner: Arc<R>,
    files: Vec<PathBuf>,
    fingerprint: String,
    timestamp_url: String,
) -> (BatchHandle, mpsc::UnboundedReceiver<BatchEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (handle, completion) = BatchHandle::pending();
    let cancelled = Arc::clone(&handle.cancelled);

    launch(async move {
        run_batch(runner, files, fingerprint, timestamp_url, tx, cancelled).await;
        drop(completion);
    });

    (handle, rx)
}

async fn run_batch<R: SignRunner>(
    runner: Arc<R>,
    files: Vec<PathBuf>,
    fingerprint: String,
    timestamp_url: String,
    events: mpsc::UnboundedSender<BatchEvent>,
    cancelled: Arc<AtomicBool>,
) {
    // A closed receiver only means nobody is listening any more.
    let emit = |event: BatchEvent| {
        let _ = events.send(event);
    };
    let line_events = events.clone();
    let on_line: LineSink = Arc::new(move |line| {
        let _ = line_events.send(BatchEvent::Line(line));
    });

    let total = files.len();
    let mut outcomes = Vec::with_capacity(total);
    info!(total, "batch signing started");

    for (index, file_path) in files.into_iter().enumerate() {
        if cancelled.load(Ordering::SeqCst) {
            emit(BatchEvent::Line(format!(
                "Cancelled: {} file(s) not signed",
                total - index
            )));
            break;
        }

        let index = index + 1;
        let filename = display_name(&file_path);
        emit(BatchEvent::Progress {
            index,
            total,
            filename: filename.clone(),
        });
        emit(BatchEvent::Line(format!("[{index}/{total}] Signing: {filename}")));

        let command = SigningCommand::new(file_path, fingerprint.as_str(), timestamp_url.as_str());
        let outcome = runner.sign(&command, &on_line).await;

        outcomes.push(outcome.clone());
        let summary = if outcome.succeeded {
            "  -> Signed successfully".to_string()
        } else {
            format!("  -> FAILED (exit code: {})", outcome.exit_code)
        };
        emit(BatchEvent::Outcome(outcome));
        emit(BatchEvent::Line(summary));
    }

    info!(
        total,
        succeeded = outcomes.iter().filter(|o| o.succeeded).count(),
        "batch signing finished"
    );
    emit(BatchEvent::Complete(outcomes));
}

/// A file that failed to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    pub file_name: String,
    pub exit_code: i32,
    pub error: String,
}

/// Totals over a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<FailedFile>,
}

impl BatchSummary {
    #[must_use]
    pub fn from_outcomes(outcomes: &[SignOutcome]) -> Self {
        let failures: Vec<FailedFile> = outcomes
            .iter()
            .filter(|o| !o.succeeded)
            .map(|o| FailedFile {
                file_name: o.file_name(),
                exit_code: o.exit_code,
                error: o.captured_error.clone(),
            })
            .collect();

        Self {
            total: outcomes.len(),
            succeeded: outcomes.len() - failures.len(),
            failed: failures.len(),
            failures,
        }
    }

    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}
