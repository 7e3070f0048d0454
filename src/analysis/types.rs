//! Analysis result types: the report a single inference produces and the
//! history record a session keeps for it.
//!
//! Field names serialize in camelCase so a result can be written back out in
//! the same shape the inference service emits.

use chrono::{DateTime, Datelike, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::error::InferenceError;

/// Binary classification emitted by the model.
///
/// The vocabulary is fixed: the model must return exactly `Benign` or
/// `Malignant` whatever language the narrative fields are written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosisLabel {
    Benign,
    Malignant,
}

impl DiagnosisLabel {
    pub const ALL: [DiagnosisLabel; 2] = [DiagnosisLabel::Benign, DiagnosisLabel::Malignant];

    /// The wire token. Case-sensitive.
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosisLabel::Benign => "Benign",
            DiagnosisLabel::Malignant => "Malignant",
        }
    }

    /// Exact match against the wire vocabulary; no case folding, no translation.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.as_str() == token)
    }
}

impl fmt::Display for DiagnosisLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Narrative for each of the five ABCDE criteria. All five are required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbcdeAnalysis {
    pub asymmetry: String,
    pub border: String,
    pub color: String,
    pub diameter: String,
    pub evolving: String,
}

impl AbcdeAnalysis {
    /// Criteria in mnemonic order, paired with their key.
    pub fn entries(&self) -> [(&'static str, &str); 5] {
        [
            ("asymmetry", &self.asymmetry),
            ("border", &self.border),
            ("color", &self.color),
            ("diameter", &self.diameter),
            ("evolving", &self.evolving),
        ]
    }
}

/// A validated diagnostic report.
///
/// Only `schema::validate` builds these from service output, so every value
/// in circulation has passed the local checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub label: DiagnosisLabel,
    /// Percentage in `[0, 100]`.
    pub confidence: f64,
    pub description: String,
    pub recommendations: Vec<String>,
    pub abcde_analysis: AbcdeAnalysis,
}

impl AnalysisResult {
    /// Remaining share of the confidence scale.
    pub fn uncertainty(&self) -> f64 {
        100.0 - self.confidence
    }

    pub fn is_malignant(&self) -> bool {
        self.label == DiagnosisLabel::Malignant
    }
}

/// Raw image payload, shared between the current slot and history without copying.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageData(Arc<[u8]>);

impl ImageData {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for ImageData {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }
}

impl From<&[u8]> for ImageData {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.into())
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageData({} bytes)", self.0.len())
    }
}

/// One completed analysis, kept for redisplay. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct AnalysisHistoryRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// `created_at` formatted for the language the analysis was requested in.
    pub date: String,
    pub image: ImageData,
    pub result: AnalysisResult,
}

impl AnalysisHistoryRecord {
    /// Build a record stamped with the current time.
    pub fn new(image: ImageData, result: AnalysisResult, language: Language) -> Self {
        let created_at = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            created_at,
            date: language.format_date(&created_at.with_timezone(&Local)),
            image,
            result,
        }
    }
}

/// Languages the narrative fields can be requested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ar,
}

impl Language {
    pub const SUPPORTED: [Language; 2] = [Language::En, Language::Ar];

    /// Parse a language tag. Anything outside the supported set fails here,
    /// before any request is built.
    pub fn from_tag(tag: &str) -> Result<Self, InferenceError> {
        let normalized = tag.trim().to_ascii_lowercase();
        // Accept regional variants such as "en-US" or "ar_EG".
        let primary = normalized
            .split(['-', '_'])
            .next()
            .unwrap_or_default();
        Self::SUPPORTED
            .into_iter()
            .find(|l| l.tag() == primary)
            .ok_or_else(|| InferenceError::UnsupportedLanguage(tag.to_string()))
    }

    pub fn tag(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ar => "ar",
        }
    }

    /// Name used inside the model instruction.
    pub fn prompt_name(self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Ar => "Arabic",
        }
    }

    /// Locale the history dates are rendered for.
    pub fn locale(self) -> &'static str {
        match self {
            Language::En => "en-US",
            Language::Ar => "ar-EG",
        }
    }

    /// Short numeric date: `M/D/YYYY` for English, `D/M/YYYY` in
    /// Arabic-Indic digits for Arabic.
    pub fn format_date<Tz: chrono::TimeZone>(self, at: &DateTime<Tz>) -> String {
        match self {
            Language::En => format!("{}/{}/{}", at.month(), at.day(), at.year()),
            Language::Ar => {
                let plain = format!("{}/{}/{}", at.day(), at.month(), at.year());
                plain.chars().map(to_arabic_indic).collect()
            }
        }
    }

    pub fn label_text(self, label: DiagnosisLabel) -> &'static str {
        match (self, label) {
            (Language::En, DiagnosisLabel::Benign) => "Benign",
            (Language::En, DiagnosisLabel::Malignant) => "Malignant",
            (Language::Ar, DiagnosisLabel::Benign) => "حميد",
            (Language::Ar, DiagnosisLabel::Malignant) => "خبيث",
        }
    }

    /// User-facing message shown when an analysis fails.
    pub fn failure_notice(self) -> &'static str {
        match self {
            Language::En => "System encountered an error during analysis. Please check your connection and try again.",
            Language::Ar => "فشل التحليل. يرجى التحقق من اتصالك والمحاولة مرة أخرى.",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

fn to_arabic_indic(c: char) -> char {
    match c.to_digit(10) {
        Some(d) => char::from_u32(0x0660 + d).unwrap_or(c),
        None => c,
    }
}
