//! Inference provider trait: common interface for anything that can turn a
//! lesion image into a validated report.
//!
//! The session pipeline only talks to this trait. `InferenceClient` is the
//! production implementation; tests substitute scripted analyzers.

use std::future::Future;

use super::error::InferenceError;
use super::types::{AnalysisResult, Language};

pub trait Analyzer: Send + Sync + 'static {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Analyze one image. One call, one outcome: no retries, no caching.
    fn analyze(
        &self,
        image: &[u8],
        language: Language,
    ) -> impl Future<Output = Result<AnalysisResult, InferenceError>> + Send;
}
