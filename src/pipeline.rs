//! Analysis pipeline: drives the session across the one suspending call.
//!
//! submit → session enters Analyzing → spawn analyzer call (with deadline)
//! → commit outcome under the generation check → publish snapshot.
//!
//! Policy for a second submission while one is in flight: supersede. The old
//! task is aborted and, if its outcome still arrives, the generation check
//! throws it away.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};

use crate::analysis::error::{InferenceError, TransportError};
use crate::analysis::provider::Analyzer;
use crate::analysis::types::{AnalysisHistoryRecord, ImageData, Language};
use crate::session::{Commit, Session, SessionError, SessionSnapshot};

/// Owns the session and schedules analyses against an [`Analyzer`].
pub struct SessionController<A: Analyzer> {
    analyzer: Arc<A>,
    session: Arc<Mutex<Session>>,
    updates: Arc<watch::Sender<SessionSnapshot>>,
    in_flight: Mutex<Option<AbortHandle>>,
    timeout: Duration,
}

/// Handle on a scheduled analysis.
pub struct PendingAnalysis {
    generation: u64,
    state: PendingState,
}

enum PendingState {
    Settled(Commit),
    Running(JoinHandle<Commit>),
}

impl PendingAnalysis {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait for the outcome to be applied. An aborted (superseded) task
    /// reports `Commit::Stale`.
    pub async fn wait(self) -> Commit {
        match self.state {
            PendingState::Settled(commit) => commit,
            PendingState::Running(handle) => match handle.await {
                Ok(commit) => commit,
                Err(e) if e.is_cancelled() => Commit::Stale,
                Err(e) => {
                    log::error!("[PIPELINE] Analysis task panicked: {}", e);
                    Commit::Stale
                }
            },
        }
    }
}

impl<A: Analyzer> SessionController<A> {
    pub fn new(analyzer: A, timeout: Duration) -> Self {
        let session = Session::new();
        let (updates, _) = watch::channel(session.snapshot());
        Self {
            analyzer: Arc::new(analyzer),
            session: Arc::new(Mutex::new(session)),
            updates: Arc::new(updates),
            in_flight: Mutex::new(None),
            timeout,
        }
    }

    /// Current state.
    pub fn snapshot(&self) -> SessionSnapshot {
        lock(&self.session).snapshot()
    }

    /// Receive a fresh snapshot after every transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.updates.subscribe()
    }

    /// Select an image for analysis.
    ///
    /// An unsupported language tag, or a call made outside a Tokio runtime,
    /// is rejected here and no call is made. Abort, transition and handle
    /// bookkeeping all happen under the session lock.
    pub fn submit_image(&self, image: impl Into<ImageData>, language_tag: &str) -> PendingAnalysis {
        let image = image.into();
        let mut session = lock(&self.session);
        self.abort_in_flight();

        let language = match Language::from_tag(language_tag) {
            Ok(language) => language,
            Err(e) => return self.reject(&mut session, image, e),
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::error!("[PIPELINE] Submission outside a Tokio runtime");
            return self.reject(&mut session, image, TransportError::NoRuntime.into());
        };

        let ticket = session.begin_analysis(image, language);
        self.publish(&session);

        let generation = ticket.generation;
        let analyzer = Arc::clone(&self.analyzer);
        let shared = Arc::clone(&self.session);
        let updates = Arc::clone(&self.updates);
        let timeout = self.timeout;

        let handle = runtime.spawn(async move {
            let start = std::time::Instant::now();
            log::info!(
                "[PIPELINE] Generation {} → {} ({} bytes, {})",
                generation,
                analyzer.name(),
                ticket.image.len(),
                ticket.language
            );

            let outcome = match tokio::time::timeout(
                timeout,
                analyzer.analyze(ticket.image.as_bytes(), ticket.language),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    log::error!("[PIPELINE] Generation {} timed out after {:?}", generation, timeout);
                    Err(InferenceError::TransportFailure(TransportError::Timeout(timeout)))
                }
            };

            let commit = {
                let mut session = lock(&shared);
                let commit = session.complete(generation, outcome);
                if commit != Commit::Stale {
                    updates.send_replace(session.snapshot());
                }
                commit
            };
            log::info!(
                "[PIPELINE] Generation {} done in {}ms: {:?}",
                generation,
                start.elapsed().as_millis(),
                commit
            );
            commit
        });

        *lock(&self.in_flight) = Some(handle.abort_handle());
        PendingAnalysis {
            generation,
            state: PendingState::Running(handle),
        }
    }

    fn reject(&self, session: &mut Session, image: ImageData, error: InferenceError) -> PendingAnalysis {
        session.reject_submission(image, &error);
        self.publish(session);
        PendingAnalysis {
            generation: session.generation(),
            state: PendingState::Settled(Commit::Failed),
        }
    }

    /// Back to Idle; an in-flight analysis is cancelled and its result discarded.
    pub fn reset(&self) {
        let mut session = lock(&self.session);
        self.abort_in_flight();
        session.reset();
        self.publish(&session);
    }

    pub fn select_history_item(&self, id: &str) -> Result<(), SessionError> {
        let mut session = lock(&self.session);
        session.select_history_item(id)?;
        self.publish(&session);
        Ok(())
    }

    pub fn toggle_history_view(&self) -> bool {
        let mut session = lock(&self.session);
        let browsing = session.toggle_history_view();
        self.publish(&session);
        browsing
    }

    pub fn history(&self) -> Vec<AnalysisHistoryRecord> {
        lock(&self.session).history().to_vec()
    }

    pub fn append_history_record(&self, record: AnalysisHistoryRecord) {
        let mut session = lock(&self.session);
        session.append_history_record(record);
        self.publish(&session);
    }

    /// Lock order: session, then in-flight handle.
    fn abort_in_flight(&self) {
        if let Some(handle) = lock(&self.in_flight).take() {
            handle.abort();
        }
    }

    /// Called with the session lock held so snapshots go out in commit order.
    fn publish(&self, session: &Session) {
        self.updates.send_replace(session.snapshot());
    }
}

/// A poisoned lock only means another task panicked mid-transition; the
/// session itself is still consistent between transitions.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
