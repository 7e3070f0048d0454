//! Response schema: declared to the service and re-checked locally.
//!
//! The service is asked to follow `response_schema()`, but nothing it sends
//! is trusted: `validate` walks the parsed JSON field by field and rejects
//! anything that does not fit. Extra fields are ignored.

use serde_json::{json, Map, Value};

use super::error::SchemaError;
use super::types::{AbcdeAnalysis, AnalysisResult, DiagnosisLabel};

/// Output schema sent in `generationConfig.responseSchema`.
pub fn response_schema() -> Value {
    let labels: Vec<&str> = DiagnosisLabel::ALL.iter().map(|l| l.as_str()).collect();
    json!({
        "type": "OBJECT",
        "properties": {
            "label": { "type": "STRING", "enum": labels },
            "confidence": { "type": "NUMBER" },
            "description": { "type": "STRING" },
            "recommendations": {
                "type": "ARRAY",
                "items": { "type": "STRING" }
            },
            "abcdeAnalysis": {
                "type": "OBJECT",
                "properties": {
                    "asymmetry": { "type": "STRING" },
                    "border": { "type": "STRING" },
                    "color": { "type": "STRING" },
                    "diameter": { "type": "STRING" },
                    "evolving": { "type": "STRING" }
                },
                "required": ["asymmetry", "border", "color", "diameter", "evolving"]
            }
        },
        "required": ["label", "confidence", "description", "recommendations", "abcdeAnalysis"]
    })
}

/// Validate a parsed response and build the typed result.
pub fn validate(raw: &Value) -> Result<AnalysisResult, SchemaError> {
    let obj = raw.as_object().ok_or(SchemaError::NotAnObject)?;

    let label_token = required_str(obj, "label", "label")?;
    let label = DiagnosisLabel::from_token(label_token)
        .ok_or_else(|| SchemaError::UnknownLabel(label_token.to_string()))?;

    let confidence = required(obj, "confidence", "confidence")?
        .as_f64()
        .filter(|c| c.is_finite())
        .ok_or(SchemaError::WrongType {
            field: "confidence",
            expected: "a finite number",
        })?;
    if !(0.0..=100.0).contains(&confidence) {
        return Err(SchemaError::ConfidenceOutOfRange(confidence));
    }

    let description = required_str(obj, "description", "description")?.to_string();

    let recommendations = required(obj, "recommendations", "recommendations")?
        .as_array()
        .ok_or(SchemaError::WrongType {
            field: "recommendations",
            expected: "an array of strings",
        })?
        .iter()
        .map(|item| {
            item.as_str().map(str::to_string).ok_or(SchemaError::WrongType {
                field: "recommendations",
                expected: "an array of strings",
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if recommendations.is_empty() {
        return Err(SchemaError::EmptyRecommendations);
    }

    let abcde = required(obj, "abcdeAnalysis", "abcdeAnalysis")?
        .as_object()
        .ok_or(SchemaError::WrongType {
            field: "abcdeAnalysis",
            expected: "an object",
        })?;
    let abcde_analysis = AbcdeAnalysis {
        asymmetry: required_str(abcde, "asymmetry", "abcdeAnalysis.asymmetry")?.to_string(),
        border: required_str(abcde, "border", "abcdeAnalysis.border")?.to_string(),
        color: required_str(abcde, "color", "abcdeAnalysis.color")?.to_string(),
        diameter: required_str(abcde, "diameter", "abcdeAnalysis.diameter")?.to_string(),
        evolving: required_str(abcde, "evolving", "abcdeAnalysis.evolving")?.to_string(),
    };

    Ok(AnalysisResult {
        label,
        confidence,
        description,
        recommendations,
        abcde_analysis,
    })
}

/// `null` counts as missing.
fn required<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    path: &'static str,
) -> Result<&'a Value, SchemaError> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(SchemaError::MissingField(path)),
        Some(v) => Ok(v),
    }
}

fn required_str<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    path: &'static str,
) -> Result<&'a str, SchemaError> {
    required(obj, key, path)?.as_str().ok_or(SchemaError::WrongType {
        field: path,
        expected: "a string",
    })
}
