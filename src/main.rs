//! Command-line front end for Lesion Scan.
//!
//! Usage:
//!   lesion-scan <image>                  Analyze, report in the default language
//!   lesion-scan <image> --lang ar        Narrative in Arabic
//!   lesion-scan <image> --json           Print the validated result as JSON
//!   lesion-scan --save-key <KEY>         Store the Gemini API key in the OS keychain

use std::path::PathBuf;
use std::process::ExitCode;

use lesion_scan_lib::analysis::types::{AnalysisResult, Language};
use lesion_scan_lib::{settings, InferenceClient, Phase, SessionController, Settings};

struct Args {
    image: PathBuf,
    lang: Option<String>,
    json: bool,
}

enum Command {
    Analyze(Args),
    SaveKey(String),
}

fn parse_args() -> Result<Command, String> {
    let mut args = std::env::args().skip(1);
    let mut image = None;
    let mut lang = None;
    let mut json = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--save-key" => {
                let key = args.next().ok_or("--save-key needs a value")?;
                return Ok(Command::SaveKey(key));
            }
            "--lang" => lang = Some(args.next().ok_or("--lang needs a value")?),
            "--json" => json = true,
            "-h" | "--help" => return Err(usage()),
            other if other.starts_with("--") => {
                return Err(format!("Unknown flag: {}\n\n{}", other, usage()))
            }
            other => image = Some(PathBuf::from(other)),
        }
    }

    let image = image.ok_or_else(usage)?;
    Ok(Command::Analyze(Args { image, lang, json }))
}

fn usage() -> String {
    "Usage: lesion-scan <image> [--lang en|ar] [--json]\n       lesion-scan --save-key <KEY>"
        .to_string()
}

#[tokio::main]
async fn main() -> ExitCode {
    lesion_scan_lib::init();

    let command = match parse_args() {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{}", msg);
            return ExitCode::from(2);
        }
    };

    let args = match command {
        Command::SaveKey(key) => {
            return match settings::save_api_key(&key) {
                Ok(()) => {
                    println!("API key saved.");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{}", e);
                    ExitCode::FAILURE
                }
            };
        }
        Command::Analyze(args) => args,
    };

    let settings = Settings::load();
    let lang_tag = args
        .lang
        .clone()
        .unwrap_or_else(|| settings.default_language.tag().to_string());
    // Fall back to the default only for rendering; the session still sees the raw tag.
    let display_lang = Language::from_tag(&lang_tag).unwrap_or(settings.default_language);

    let bytes = match tokio::fs::read(&args.image).await {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Failed to read {}: {}", args.image.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let client = match InferenceClient::new(&settings) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let controller = SessionController::new(client, settings.timeout);

    eprintln!("Analyzing {} ...", args.image.display());
    controller.submit_image(bytes, &lang_tag).wait().await;

    let snapshot = controller.snapshot();
    match (snapshot.phase, snapshot.displayed(), &snapshot.failure) {
        (Phase::Result, Some((_, result)), _) => {
            if args.json {
                match serde_json::to_string_pretty(result) {
                    Ok(out) => println!("{}", out),
                    Err(e) => {
                        eprintln!("Failed to serialize result: {}", e);
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                let date = snapshot.history.first().map(|r| r.date.as_str()).unwrap_or_default();
                print!("{}", render_report(result, display_lang, date));
            }
            ExitCode::SUCCESS
        }
        (_, _, Some(failure)) => {
            eprintln!("{}", display_lang.failure_notice());
            eprintln!("[{}] {}", failure.kind, failure.message);
            ExitCode::FAILURE
        }
        _ => {
            eprintln!("Analysis did not complete");
            ExitCode::FAILURE
        }
    }
}

fn render_report(result: &AnalysisResult, lang: Language, date: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{}  |  {:.0}% confidence ({:.0}% uncertainty)  {}\n\n",
        lang.label_text(result.label),
        result.confidence,
        result.uncertainty(),
        date
    ));
    out.push_str(&format!("{}\n\n", result.description));
    for (key, text) in result.abcde_analysis.entries() {
        out.push_str(&format!("  {:<10} {}\n", key, text));
    }
    out.push('\n');
    for (i, rec) in result.recommendations.iter().enumerate() {
        out.push_str(&format!("  {}. {}\n", i + 1, rec));
    }
    out
}
