//! Lesion Scan: skin-lesion screening client.
//!
//! Sends a lesion photo to a multimodal inference service, validates the
//! structured report it returns, and tracks a session (current image,
//! current result, newest-first history).
//!
//! Modules:
//!   - analysis  : result schema + inference client
//!   - session   : synchronous state machine
//!   - pipeline  : async driver (scheduling, timeout, stale-result suppression)
//!   - settings  : configuration + API key storage

pub mod analysis;
pub mod pipeline;
pub mod session;
pub mod settings;

pub use analysis::{
    AnalysisHistoryRecord, AnalysisResult, Analyzer, DiagnosisLabel, ErrorKind, InferenceClient,
    InferenceError, Language,
};
pub use pipeline::{PendingAnalysis, SessionController};
pub use session::{Commit, Phase, Session, SessionError, SessionSnapshot};
pub use settings::Settings;

/// Process setup: load `.env.local` → `.env` from the working directory,
/// then start the logger. Call once, before `Settings::load()`.
pub fn init() {
    'env_load: for env_file in [".env.local", ".env"] {
        let path = std::path::Path::new(env_file);
        if path.exists() {
            match dotenvy::from_path(path) {
                Ok(_) => eprintln!("[STARTUP] Loaded {}", path.display()),
                Err(e) => eprintln!("[STARTUP] Failed to load {}: {}", path.display(), e),
            }
            break 'env_load;
        }
    }

    // try_init: tests and embedders may have installed a logger already.
    let _ = env_logger::try_init();
}
