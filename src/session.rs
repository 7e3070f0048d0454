//! Session state machine: current image, current result, history.
//!
//! Pure and synchronous: every mutation goes through a named transition, and
//! the asynchronous side (see `pipeline.rs`) only ever calls `begin_analysis`
//! and `complete`. Each analysis is tagged with a generation; a completion
//! whose generation is no longer current is discarded.
//!
//! Transition table:
//!
//! | from                     | trigger               | to        |
//! |--------------------------|-----------------------|-----------|
//! | any                      | `begin_analysis`      | Analyzing |
//! | Analyzing (current gen)  | `complete(Ok)`        | Result    |
//! | Analyzing (current gen)  | `complete(Err)`       | Error     |
//! | any                      | `reset`               | Idle      |
//! | Idle / Result / Error    | `select_history_item` | Result    |
//! | any                      | `toggle_history_view` | unchanged |
//!
//! A new image while `Analyzing` supersedes the in-flight analysis.

use serde::Serialize;

use crate::analysis::error::{ErrorKind, InferenceError};
use crate::analysis::types::{AnalysisHistoryRecord, AnalysisResult, ImageData, Language};

/// Analysis phase. Browsing is tracked separately and never changes this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Idle,
    Analyzing,
    Result,
    Error,
}

/// What the session keeps of a failed analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&InferenceError> for SessionFailure {
    fn from(e: &InferenceError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Inbound triggers the session refuses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("no history record with id `{0}`")]
    UnknownHistoryItem(String),
    #[error("an analysis is in flight")]
    AnalysisInFlight,
}

/// Handed out by `begin_analysis`; carries what the async side needs.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub generation: u64,
    pub image: ImageData,
    pub language: Language,
}

/// Outcome of handing a completion back to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// Result stored and recorded in history.
    Recorded,
    /// Failure stored.
    Failed,
    /// Generation was superseded or reset; nothing changed.
    Stale,
}

/// Read-only copy of the session for the presentation side.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub browsing: bool,
    pub image: Option<ImageData>,
    pub result: Option<AnalysisResult>,
    pub failure: Option<SessionFailure>,
    pub history: Vec<AnalysisHistoryRecord>,
    pub generation: u64,
}

impl SessionSnapshot {
    /// The image/result pair to display, only when both belong together.
    pub fn displayed(&self) -> Option<(&ImageData, &AnalysisResult)> {
        match (self.phase, &self.image, &self.result) {
            (Phase::Result, Some(image), Some(result)) => Some((image, result)),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Session {
    phase: PhaseState,
    browsing: bool,
    image: Option<ImageData>,
    result: Option<AnalysisResult>,
    failure: Option<SessionFailure>,
    /// Newest first.
    history: Vec<AnalysisHistoryRecord>,
    generation: u64,
}

#[derive(Debug, Default)]
enum PhaseState {
    #[default]
    Idle,
    Analyzing {
        generation: u64,
        language: Language,
    },
    Result,
    Error,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        match self.phase {
            PhaseState::Idle => Phase::Idle,
            PhaseState::Analyzing { .. } => Phase::Analyzing,
            PhaseState::Result => Phase::Result,
            PhaseState::Error => Phase::Error,
        }
    }

    pub fn is_browsing(&self) -> bool {
        self.browsing
    }

    pub fn current_image(&self) -> Option<&ImageData> {
        self.image.as_ref()
    }

    pub fn current_result(&self) -> Option<&AnalysisResult> {
        self.result.as_ref()
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        self.failure.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Generation of the analysis currently in flight, if any.
    pub fn in_flight(&self) -> Option<u64> {
        match self.phase {
            PhaseState::Analyzing { generation, .. } => Some(generation),
            _ => None,
        }
    }

    /// Record a newly selected image and enter `Analyzing`.
    ///
    /// Any analysis already in flight is superseded: its generation stops
    /// being current, so its completion will come back `Stale`.
    pub fn begin_analysis(&mut self, image: ImageData, language: Language) -> Ticket {
        if let Some(old) = self.in_flight() {
            log::info!("[SESSION] Generation {} superseded", old);
        }
        let generation = self.next_generation();
        self.image = Some(image.clone());
        self.result = None;
        self.failure = None;
        self.phase = PhaseState::Analyzing {
            generation,
            language,
        };
        log::info!(
            "[SESSION] Analyzing generation {} ({} bytes)",
            generation,
            image.len()
        );
        Ticket {
            generation,
            image,
            language,
        }
    }

    /// Record a selected image that is rejected before any call is scheduled
    /// (for example an unsupported language tag). Goes straight to `Error`.
    pub fn reject_submission(&mut self, image: ImageData, error: &InferenceError) {
        self.next_generation();
        self.image = Some(image);
        self.result = None;
        self.failure = Some(error.into());
        self.phase = PhaseState::Error;
        log::warn!("[SESSION] Submission rejected: {}", error);
    }

    /// Apply the outcome of the analysis tagged `generation`.
    pub fn complete(
        &mut self,
        generation: u64,
        outcome: Result<AnalysisResult, InferenceError>,
    ) -> Commit {
        let language = match self.phase {
            PhaseState::Analyzing {
                generation: current,
                language,
            } if current == generation => language,
            _ => {
                log::info!(
                    "[SESSION] Discarding stale completion for generation {} (current {})",
                    generation,
                    self.generation
                );
                return Commit::Stale;
            }
        };

        match outcome {
            Ok(result) => {
                let Some(image) = self.image.clone() else {
                    // begin_analysis always sets the image.
                    return Commit::Stale;
                };
                self.append_history_record(AnalysisHistoryRecord::new(
                    image,
                    result.clone(),
                    language,
                ));
                self.result = Some(result);
                self.failure = None;
                self.phase = PhaseState::Result;
                log::info!(
                    "[SESSION] Generation {} committed, history: {}",
                    generation,
                    self.history.len()
                );
                Commit::Recorded
            }
            Err(e) => {
                log::warn!("[SESSION] Generation {} failed: {}", generation, e);
                self.result = None;
                self.failure = Some((&e).into());
                self.phase = PhaseState::Error;
                Commit::Failed
            }
        }
    }

    /// Back to `Idle`. History is untouched; an in-flight analysis becomes stale.
    pub fn reset(&mut self) {
        if self.in_flight().is_some() {
            self.next_generation();
        }
        self.image = None;
        self.result = None;
        self.failure = None;
        self.phase = PhaseState::Idle;
        log::info!("[SESSION] Reset");
    }

    /// Redisplay a stored record without re-running inference.
    pub fn select_history_item(&mut self, id: &str) -> Result<(), SessionError> {
        if self.in_flight().is_some() {
            return Err(SessionError::AnalysisInFlight);
        }
        let record = self
            .history
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| SessionError::UnknownHistoryItem(id.to_string()))?;
        self.image = Some(record.image.clone());
        self.result = Some(record.result.clone());
        self.failure = None;
        self.phase = PhaseState::Result;
        self.browsing = false;
        Ok(())
    }

    pub fn toggle_history_view(&mut self) -> bool {
        self.browsing = !self.browsing;
        self.browsing
    }

    /// History, newest first.
    pub fn history(&self) -> &[AnalysisHistoryRecord] {
        &self.history
    }

    /// Insert a record at the head of history. The single write path for
    /// history, so a persistence layer can hook in here.
    pub fn append_history_record(&mut self, record: AnalysisHistoryRecord) {
        self.history.insert(0, record);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase(),
            browsing: self.browsing,
            image: self.image.clone(),
            result: self.result.clone(),
            failure: self.failure.clone(),
            history: self.history.clone(),
            generation: self.generation,
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}
