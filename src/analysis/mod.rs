//! Analysis domain: result schema and inference client.
//!
//! Public API for turning a lesion photo into a validated report.
//! External code should only use the items exported here.
//!
//!   - types.rs    : result, history record, language, image data
//!   - schema.rs   : declared output schema + local validation
//!   - error.rs    : failure taxonomy
//!   - prompts.rs  : clinical instruction
//!   - provider.rs : `Analyzer` trait
//!   - gemini.rs   : Gemini implementation

pub mod error;
pub mod gemini;
pub mod prompts;
pub mod provider;
pub mod schema;
pub mod types;

pub use error::{ErrorKind, InferenceError, SchemaError, TransportError};
pub use gemini::InferenceClient;
pub use provider::Analyzer;
pub use schema::validate;
pub use types::{
    AbcdeAnalysis, AnalysisHistoryRecord, AnalysisResult, DiagnosisLabel, ImageData, Language,
};
