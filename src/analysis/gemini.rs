//! Gemini ANALYZE call: one non-streaming `generateContent` request per image.
//!
//! Request shape:
//! - one user turn with two parts: the clinical instruction and the image as
//!   base64 `inlineData`
//! - `responseMimeType: "application/json"` plus `responseSchema`, so the
//!   service is asked for schema-conformant JSON (no fence stripping)
//! - API key in the `x-goog-api-key` header, never in the URL
//! - no `maxOutputTokens` cap: thinking tokens count against it
//!
//! Reply handling: text lives in `candidates[0].content.parts[*].text`. It is
//! parsed as JSON, then re-validated locally by `schema::validate`.

use base64::Engine;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

use super::error::{InferenceError, TransportError};
use super::prompts::{self, TEMPERATURE};
use super::provider::Analyzer;
use super::schema;
use super::types::{AnalysisResult, Language};
use crate::settings::Settings;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini Flash pricing, used for the cost estimate in logs only.
const INPUT_COST_PER_MILLION: f64 = 0.10;
const OUTPUT_COST_PER_MILLION: f64 = 0.40;

/// Bytes of an error body kept for diagnostics.
const ERROR_BODY_LIMIT: usize = 500;

/// Stateless client for the inference service. Cheap to clone.
#[derive(Clone)]
pub struct InferenceClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl InferenceClient {
    pub fn new(settings: &Settings) -> Result<Self, InferenceError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(TransportError::Http)?;
        Ok(Self {
            http,
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            timeout: settings.timeout,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Analyze with a language tag straight from the caller. An unsupported
    /// tag fails here, before anything is sent.
    pub async fn analyze_tagged(
        &self,
        image: &[u8],
        language_tag: &str,
    ) -> Result<AnalysisResult, InferenceError> {
        let language = Language::from_tag(language_tag)?;
        self.analyze_image(image, language).await
    }

    pub async fn analyze_image(
        &self,
        image: &[u8],
        language: Language,
    ) -> Result<AnalysisResult, InferenceError> {
        let payload = prepare_image(image)?;
        let api_key = match self.api_key.as_deref() {
            Some(key) if !key.is_empty() => key,
            _ => {
                log::warn!("[INFER] No GEMINI_API_KEY set, refusing to call the service");
                return Err(TransportError::MissingApiKey.into());
            }
        };

        log::info!("[INFER] Model: {}", self.model);
        log::info!(
            "[INFER] Image: {} ({} bytes), language: {}",
            payload.mime_type,
            payload.len,
            language
        );

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = build_request_body(&payload, language);
        let start = Instant::now();

        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = truncate(&body, ERROR_BODY_LIMIT);
            log::error!("[INFER] Gemini API returned {}: {}", status, body);
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        log::info!("[INFER] API latency: {}ms", start.elapsed().as_millis());

        let envelope: Value = serde_json::from_str(&text).map_err(|e| {
            log::warn!("[INFER] Response envelope is not JSON: {}", e);
            InferenceError::MalformedResponse(format!("envelope is not JSON: {}", e))
        })?;
        log_usage(&envelope);

        let answer = extract_gemini_text(&envelope).ok_or_else(|| {
            let reason = block_reason(&envelope).unwrap_or("no text in first candidate");
            log::warn!("[INFER] Empty answer: {}", reason);
            InferenceError::MalformedResponse(reason.to_string())
        })?;

        if finish_reason(&envelope) == Some("MAX_TOKENS") {
            log::warn!("[INFER] Answer hit MAX_TOKENS and is likely truncated");
            return parse_answer(&answer).map_err(|e| match e {
                InferenceError::MalformedResponse(m) => {
                    InferenceError::MalformedResponse(format!("truncated at MAX_TOKENS: {}", m))
                }
                other => other,
            });
        }

        parse_answer(&answer)
    }

    fn transport_error(&self, e: reqwest::Error) -> InferenceError {
        let e = e.without_url();
        log::error!("[INFER] HTTP request failed: {}", e);
        if e.is_timeout() {
            TransportError::Timeout(self.timeout).into()
        } else {
            TransportError::Http(e).into()
        }
    }
}

impl Analyzer for InferenceClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn analyze(
        &self,
        image: &[u8],
        language: Language,
    ) -> Result<AnalysisResult, InferenceError> {
        self.analyze_image(image, language).await
    }
}

/// Image bytes ready for the `inlineData` part.
#[derive(Debug)]
pub struct ImagePayload {
    pub mime_type: &'static str,
    pub base64: String,
    pub len: usize,
}

/// Check the payload and encode it. Accepts raw bytes or a
/// `data:<mime>;base64,<...>` URL.
pub fn prepare_image(image: &[u8]) -> Result<ImagePayload, InferenceError> {
    let decoded;
    let bytes = match strip_data_url(image) {
        Some(encoded) => {
            decoded = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| InferenceError::InvalidInput(format!("bad data URL: {}", e)))?;
            decoded.as_slice()
        }
        None => image,
    };

    if bytes.is_empty() {
        return Err(InferenceError::InvalidInput("image payload is empty".to_string()));
    }

    let format = image::guess_format(bytes).map_err(|_| {
        InferenceError::InvalidInput("payload is not a recognised image format".to_string())
    })?;
    if format != image::ImageFormat::Jpeg {
        log::info!("[INFER] {:?} is forwarded best-effort; only JPEG is guaranteed", format);
    }

    Ok(ImagePayload {
        mime_type: format.to_mime_type(),
        base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        len: bytes.len(),
    })
}

fn strip_data_url(image: &[u8]) -> Option<&[u8]> {
    if !image.starts_with(b"data:") {
        return None;
    }
    let comma = image.iter().position(|&b| b == b',')?;
    let header = &image[..comma];
    header.ends_with(b";base64").then(|| &image[comma + 1..])
}

/// The full `generateContent` body.
pub fn build_request_body(payload: &ImagePayload, language: Language) -> Value {
    json!({
        "contents": [
            {
                "role": "user",
                "parts": [
                    { "text": prompts::build_instruction(language) },
                    {
                        "inlineData": {
                            "mimeType": payload.mime_type,
                            "data": payload.base64
                        }
                    }
                ]
            }
        ],
        "generationConfig": {
            "temperature": TEMPERATURE,
            "responseMimeType": "application/json",
            "responseSchema": schema::response_schema()
        }
    })
}

/// Parse the model's answer text and run the local schema check.
pub fn parse_answer(answer: &str) -> Result<AnalysisResult, InferenceError> {
    let value: Value = serde_json::from_str(answer.trim()).map_err(|e| {
        log::warn!("[INFER] Answer is not JSON: {} (raw: {})", e, truncate(answer, 200));
        InferenceError::MalformedResponse(e.to_string())
    })?;

    let result = schema::validate(&value).map_err(|e| {
        log::warn!("[INFER] Schema violation: {}", e);
        InferenceError::SchemaViolation(e)
    })?;

    log::info!(
        "[INFER] Parse result: {} ({}%), {} recommendations",
        result.label,
        result.confidence,
        result.recommendations.len()
    );
    Ok(result)
}

/// Concatenated text parts of the first candidate.
///
/// Gemini format: candidates[0].content.parts[*].text
fn extract_gemini_text(envelope: &Value) -> Option<String> {
    let parts = envelope
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    (!text.trim().is_empty()).then_some(text)
}

fn block_reason(envelope: &Value) -> Option<&str> {
    envelope
        .get("promptFeedback")
        .and_then(|f| f.get("blockReason"))
        .and_then(Value::as_str)
        .or_else(|| finish_reason(envelope))
}

fn finish_reason(envelope: &Value) -> Option<&str> {
    envelope.get("candidates")?.get(0)?.get("finishReason")?.as_str()
}

fn log_usage(envelope: &Value) {
    let Some(usage) = envelope.get("usageMetadata") else {
        return;
    };
    let input_tokens = usage["promptTokenCount"].as_u64().unwrap_or(0);
    let output_tokens = usage["candidatesTokenCount"].as_u64().unwrap_or(0);
    log::info!("[INFER] Input tokens: {}", input_tokens);
    log::info!("[INFER] Output tokens: {}", output_tokens);
    let cost = (input_tokens as f64 * INPUT_COST_PER_MILLION
        + output_tokens as f64 * OUTPUT_COST_PER_MILLION)
        / 1_000_000.0;
    log::info!("[INFER] Estimated cost: ${:.6}", cost);
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
