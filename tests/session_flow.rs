//! Session pipeline tests: submit, analyze and commit driven through the
//! `SessionController` with a scripted analyzer and, for the full path, the
//! real Gemini client against a wiremock server.

use lesion_scan_lib::analysis::types::{AbcdeAnalysis, ImageData};
use lesion_scan_lib::analysis::{
    AnalysisResult, Analyzer, DiagnosisLabel, ErrorKind, InferenceClient, InferenceError,
    Language, TransportError,
};
use lesion_scan_lib::{Commit, Phase, SessionController, SessionError, Settings};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const IMAGE_X: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, b'X'];
const IMAGE_Y: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, b'Y'];

fn report(confidence: f64) -> AnalysisResult {
    AnalysisResult {
        label: DiagnosisLabel::Malignant,
        confidence,
        description: "Irregular pigmented lesion".to_string(),
        recommendations: vec!["A".to_string(), "B".to_string()],
        abcde_analysis: AbcdeAnalysis {
            asymmetry: "asymmetric".to_string(),
            border: "irregular".to_string(),
            color: "variegated".to_string(),
            diameter: "7mm".to_string(),
            evolving: "growing".to_string(),
        },
    }
}

/// Analyzer with a scripted delay and outcome per image. The last byte of
/// the image picks the script entry.
#[derive(Clone)]
struct ScriptedAnalyzer {
    calls: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
    delay_for: fn(u8) -> Duration,
    outcome_for: fn(u8) -> Result<AnalysisResult, InferenceError>,
}

impl ScriptedAnalyzer {
    fn new(
        delay_for: fn(u8) -> Duration,
        outcome_for: fn(u8) -> Result<AnalysisResult, InferenceError>,
    ) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(AtomicUsize::new(0)),
            delay_for,
            outcome_for,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls that ran to completion, i.e. were not aborted mid-flight.
    fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

impl Analyzer for ScriptedAnalyzer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn analyze(
        &self,
        image: &[u8],
        _language: Language,
    ) -> Result<AnalysisResult, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tag = image.last().copied().unwrap_or_default();
        tokio::time::sleep((self.delay_for)(tag)).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        (self.outcome_for)(tag)
    }
}

fn instant(_: u8) -> Duration {
    Duration::from_millis(10)
}

fn confident(_: u8) -> Result<AnalysisResult, InferenceError> {
    Ok(report(87.0))
}

/// X scores 10, Y scores 20.
fn by_image(tag: u8) -> Result<AnalysisResult, InferenceError> {
    Ok(report(if tag == b'X' { 10.0 } else { 20.0 }))
}

#[tokio::test]
async fn successful_analysis_lands_in_result_and_history() {
    let analyzer = ScriptedAnalyzer::new(instant, confident);
    let controller = SessionController::new(analyzer.clone(), Duration::from_secs(5));

    let pending = controller.submit_image(IMAGE_X.to_vec(), "en");
    assert_eq!(controller.snapshot().phase, Phase::Analyzing);
    assert_eq!(pending.wait().await, Commit::Recorded);

    let snap = controller.snapshot();
    assert_eq!(snap.phase, Phase::Result);
    assert_eq!(snap.history.len(), 1);
    assert_eq!(snap.history[0].result.confidence, 87.0);
    assert_eq!(snap.history[0].image.as_bytes(), IMAGE_X);
    let (image, result) = snap.displayed().unwrap();
    assert_eq!(image.as_bytes(), IMAGE_X);
    assert_eq!(result.confidence, 87.0);
    assert_eq!(analyzer.calls(), 1);
}

#[tokio::test]
async fn timeout_becomes_transport_failure_without_history() {
    fn slow(_: u8) -> Duration {
        Duration::from_secs(30)
    }
    let controller = SessionController::new(
        ScriptedAnalyzer::new(slow, confident),
        Duration::from_millis(50),
    );

    assert_eq!(controller.submit_image(IMAGE_X.to_vec(), "en").wait().await, Commit::Failed);

    let snap = controller.snapshot();
    assert_eq!(snap.phase, Phase::Error);
    assert_eq!(snap.failure.unwrap().kind, ErrorKind::TransportFailure);
    assert!(snap.result.is_none());
    assert!(snap.history.is_empty());
}

#[tokio::test]
async fn analyzer_errors_map_to_error_state() {
    fn schema_failure(_: u8) -> Result<AnalysisResult, InferenceError> {
        Err(lesion_scan_lib::analysis::SchemaError::MissingField("abcdeAnalysis.border").into())
    }
    let controller =
        SessionController::new(ScriptedAnalyzer::new(instant, schema_failure), Duration::from_secs(5));

    controller.submit_image(IMAGE_X.to_vec(), "en").wait().await;

    let snap = controller.snapshot();
    assert_eq!(snap.phase, Phase::Error);
    let failure = snap.failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::SchemaViolation);
    assert!(failure.message.contains("abcdeAnalysis.border"));
    assert!(snap.history.is_empty());
}

#[tokio::test]
async fn newer_submission_supersedes_in_flight_one() {
    // X is slow, Y is fast: without supersession X would land last.
    fn x_slow(tag: u8) -> Duration {
        if tag == b'X' {
            Duration::from_millis(300)
        } else {
            Duration::from_millis(20)
        }
    }
    let analyzer = ScriptedAnalyzer::new(x_slow, by_image);
    let controller = SessionController::new(analyzer.clone(), Duration::from_secs(5));

    let x = controller.submit_image(IMAGE_X.to_vec(), "en");
    tokio::time::sleep(Duration::from_millis(20)).await;
    let y = controller.submit_image(IMAGE_Y.to_vec(), "en");
    assert!(y.generation() > x.generation());

    assert_eq!(y.wait().await, Commit::Recorded);
    assert_eq!(x.wait().await, Commit::Stale);
    tokio::time::sleep(Duration::from_millis(400)).await;

    let snap = controller.snapshot();
    assert_eq!(snap.phase, Phase::Result);
    assert_eq!(snap.history.len(), 1);
    assert_eq!(snap.history[0].image.as_bytes(), IMAGE_Y);
    assert_eq!(snap.result.unwrap().confidence, 20.0);
    assert_eq!(snap.image.unwrap().as_bytes(), IMAGE_Y);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_abort_every_superseded_task() {
    fn medium(_: u8) -> Duration {
        Duration::from_millis(200)
    }
    let analyzer = ScriptedAnalyzer::new(medium, confident);
    let controller = Arc::new(SessionController::new(analyzer.clone(), Duration::from_secs(5)));
    let runtime = tokio::runtime::Handle::current();
    let submitters = 8;
    let barrier = std::sync::Barrier::new(submitters);

    let pending: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..submitters)
            .map(|_| {
                scope.spawn(|| {
                    let _guard = runtime.enter();
                    barrier.wait();
                    controller.submit_image(IMAGE_X.to_vec(), "en")
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut commits = Vec::new();
    for p in pending {
        commits.push(p.wait().await);
    }
    assert_eq!(commits.iter().filter(|c| **c == Commit::Recorded).count(), 1);
    assert_eq!(commits.iter().filter(|c| **c == Commit::Stale).count(), submitters - 1);
    assert_eq!(analyzer.finished(), 1);
    assert_eq!(controller.snapshot().history.len(), 1);
}

#[test]
fn submission_outside_runtime_fails_instead_of_hanging() {
    let analyzer = ScriptedAnalyzer::new(instant, confident);
    let controller = SessionController::new(analyzer.clone(), Duration::from_secs(5));

    let pending = controller.submit_image(IMAGE_X.to_vec(), "en");

    let snap = controller.snapshot();
    assert_eq!(snap.phase, Phase::Error);
    assert_eq!(snap.failure.unwrap().kind, ErrorKind::TransportFailure);
    assert_eq!(snap.image.unwrap().as_bytes(), IMAGE_X);
    assert_eq!(analyzer.calls(), 0);

    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    assert_eq!(runtime.block_on(pending.wait()), Commit::Failed);
}

#[tokio::test]
async fn reset_while_analyzing_discards_late_result() {
    fn medium(_: u8) -> Duration {
        Duration::from_millis(100)
    }
    let controller =
        SessionController::new(ScriptedAnalyzer::new(medium, confident), Duration::from_secs(5));

    let pending = controller.submit_image(IMAGE_X.to_vec(), "en");
    controller.reset();
    assert_eq!(pending.wait().await, Commit::Stale);
    tokio::time::sleep(Duration::from_millis(150)).await;

    let snap = controller.snapshot();
    assert_eq!(snap.phase, Phase::Idle);
    assert!(snap.image.is_none());
    assert!(snap.result.is_none());
    assert!(snap.history.is_empty());
}

#[tokio::test]
async fn reset_keeps_history() {
    let controller =
        SessionController::new(ScriptedAnalyzer::new(instant, confident), Duration::from_secs(5));
    controller.submit_image(IMAGE_X.to_vec(), "en").wait().await;
    controller.reset();

    let snap = controller.snapshot();
    assert_eq!(snap.phase, Phase::Idle);
    assert!(snap.image.is_none() && snap.result.is_none());
    assert_eq!(snap.history.len(), 1);
}

#[tokio::test]
async fn history_selection_does_not_reinvoke_inference() {
    let analyzer = ScriptedAnalyzer::new(instant, by_image);
    let controller = SessionController::new(analyzer.clone(), Duration::from_secs(5));

    controller.submit_image(IMAGE_X.to_vec(), "en").wait().await;
    controller.submit_image(IMAGE_Y.to_vec(), "en").wait().await;
    assert_eq!(analyzer.calls(), 2);

    let history = controller.history();
    assert_eq!(history.len(), 2);
    let x_record = &history[1];
    assert_eq!(x_record.image.as_bytes(), IMAGE_X);

    assert!(controller.toggle_history_view());
    controller.select_history_item(&x_record.id).unwrap();

    let snap = controller.snapshot();
    assert_eq!(snap.phase, Phase::Result);
    assert!(!snap.browsing);
    let (image, result) = snap.displayed().unwrap();
    assert_eq!(image, &x_record.image);
    assert_eq!(result, &x_record.result);
    assert_eq!(analyzer.calls(), 2);

    assert_eq!(
        controller.select_history_item("missing"),
        Err(SessionError::UnknownHistoryItem("missing".to_string()))
    );
}

#[tokio::test]
async fn unsupported_language_fails_without_calling_analyzer() {
    let analyzer = ScriptedAnalyzer::new(instant, confident);
    let controller = SessionController::new(analyzer.clone(), Duration::from_secs(5));

    assert_eq!(controller.submit_image(IMAGE_X.to_vec(), "de").wait().await, Commit::Failed);

    let snap = controller.snapshot();
    assert_eq!(snap.phase, Phase::Error);
    assert_eq!(snap.failure.unwrap().kind, ErrorKind::UnsupportedLanguage);
    assert_eq!(analyzer.calls(), 0);
}

#[tokio::test]
async fn subscribers_see_each_transition() {
    let controller =
        SessionController::new(ScriptedAnalyzer::new(instant, confident), Duration::from_secs(5));
    let mut updates = controller.subscribe();
    assert_eq!(updates.borrow_and_update().phase, Phase::Idle);

    let pending = controller.submit_image(IMAGE_X.to_vec(), "en");
    pending.wait().await;

    updates.changed().await.unwrap();
    assert_eq!(updates.borrow_and_update().phase, Phase::Result);

    controller.toggle_history_view();
    updates.changed().await.unwrap();
    let snap = updates.borrow_and_update().clone();
    assert!(snap.browsing);
    assert_eq!(snap.phase, Phase::Result);
}

#[tokio::test]
async fn appended_records_go_to_the_head() {
    let controller =
        SessionController::new(ScriptedAnalyzer::new(instant, confident), Duration::from_secs(5));
    controller.submit_image(IMAGE_X.to_vec(), "en").wait().await;

    let imported = lesion_scan_lib::AnalysisHistoryRecord::new(
        ImageData::from(IMAGE_Y),
        report(33.0),
        Language::Ar,
    );
    let id = imported.id.clone();
    controller.append_history_record(imported);

    let history = controller.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, id);
}

// ── Full path through the Gemini client ──────────────────────────────

const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01];

fn gemini_settings(server: &MockServer) -> Settings {
    Settings {
        api_key: Some("test-key".to_string()),
        model: "test-model".to_string(),
        base_url: server.uri(),
        timeout: Duration::from_secs(5),
        ..Settings::default()
    }
}

#[tokio::test]
async fn end_to_end_malignant_report() {
    let server = MockServer::start().await;
    let answer = json!({
        "label": "Malignant",
        "confidence": 87,
        "description": "...",
        "recommendations": ["A", "B"],
        "abcdeAnalysis": {
            "asymmetry": "a", "border": "b", "color": "c", "diameter": "d", "evolving": "e"
        }
    });
    Mock::given(method("POST"))
        .and(path("/models/test-model:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [{ "text": answer.to_string() }] } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let settings = gemini_settings(&server);
    let controller =
        SessionController::new(InferenceClient::new(&settings).unwrap(), settings.timeout);

    assert_eq!(controller.submit_image(JPEG.to_vec(), "en").wait().await, Commit::Recorded);

    let snap = controller.snapshot();
    assert_eq!(snap.phase, Phase::Result);
    assert_eq!(snap.history.len(), 1);
    assert_eq!(snap.history[0].result.confidence, 87.0);
    assert_eq!(snap.history[0].result.label, DiagnosisLabel::Malignant);
    assert_eq!(snap.history[0].image.as_bytes(), JPEG);
}

#[tokio::test]
async fn end_to_end_network_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let mut settings = gemini_settings(&server);
    settings.timeout = Duration::from_millis(200);
    let controller =
        SessionController::new(InferenceClient::new(&settings).unwrap(), settings.timeout);

    assert_eq!(controller.submit_image(JPEG.to_vec(), "en").wait().await, Commit::Failed);

    let snap = controller.snapshot();
    assert_eq!(snap.phase, Phase::Error);
    assert_eq!(snap.failure.unwrap().kind, ErrorKind::TransportFailure);
    assert!(snap.history.is_empty());
}

#[test]
fn transport_error_kind_is_preserved() {
    let err: InferenceError = TransportError::Timeout(Duration::from_secs(1)).into();
    assert_eq!(err.kind(), ErrorKind::TransportFailure);
}

#[tokio::test]
async fn end_to_end_connection_failure_keeps_api_key_out_of_session() {
    let secret = "SUPER-SECRET-KEY";
    let settings = Settings {
        api_key: Some(secret.to_string()),
        model: "m".to_string(),
        base_url: "http://127.0.0.1:1".to_string(),
        timeout: Duration::from_secs(5),
        ..Settings::default()
    };
    let controller =
        SessionController::new(InferenceClient::new(&settings).unwrap(), settings.timeout);

    assert_eq!(controller.submit_image(JPEG.to_vec(), "en").wait().await, Commit::Failed);

    let failure = controller.snapshot().failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::TransportFailure);
    assert!(!failure.message.contains(secret), "{}", failure.message);
}
