//! Instruction text sent alongside the lesion image.
//!
//! The instruction and `schema::response_schema()` together form the contract
//! with the model. Keep them in step.

use super::types::{DiagnosisLabel, Language};

pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

/// Low temperature keeps the label and score stable across reruns.
pub const TEMPERATURE: f32 = 0.2;

/// Builds the clinical instruction for the requested narrative language.
pub fn build_instruction(language: Language) -> String {
    let [benign, malignant] = DiagnosisLabel::ALL.map(DiagnosisLabel::as_str);
    format!(
        r#"Analyze this skin lesion image for clinical patterns.
Focus on the ABCDE criteria: Asymmetry, Border, Color, Diameter, and Evolving features.
Classify it as either '{benign}' or '{malignant}'.
Provide a confidence score between 0 and 100.
Give a clinical description and 3-4 professional recommendations.

IMPORTANT: Provide the response content (description, recommendations, abcdeAnalysis) in the following language: {lang}.
The label must be exactly '{benign}' or '{malignant}' even in JSON, but the other text fields should be in the requested language."#,
        lang = language.prompt_name(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_names_language_and_fixed_labels() {
        let en = build_instruction(Language::En);
        let ar = build_instruction(Language::Ar);

        assert!(en.contains("language: English."));
        assert!(ar.contains("language: Arabic."));
        for text in [&en, &ar] {
            assert!(text.contains("exactly 'Benign' or 'Malignant'"));
            assert!(text.contains("ABCDE"));
            assert!(text.contains("between 0 and 100"));
        }
    }
}
