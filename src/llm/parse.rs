//! Strict decoding of the JSON documents the LLM returns.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{FlywheelError, Result};
use crate::paper::{AnalysisResult, TokenUsage};

/// Fields an analysis document must carry, non-null.
pub const REQUIRED_ANALYSIS_FIELDS: [&str; 7] = [
    "taxa",
    "evolutionary_scale",
    "research_method",
    "key_findings",
    "evolutionary_mechanism",
    "importance_score",
    "innovation_summary",
];

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"```[A-Za-z]*").expect("valid fence regex");
    // Greedy: first `{` through last `}`.
    static ref JSON_OBJECT: Regex = Regex::new(r"(?s)\{.*\}").expect("valid object regex");
}

pub fn strip_code_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text, "").trim().to_string()
}

/// Extracts and parses the JSON object embedded in an LLM reply, tolerating fences and
/// narrative before or after it.
pub fn extract_json_object(text: &str) -> Result<Map<String, Value>> {
    let stripped = strip_code_fences(text);
    let span = JSON_OBJECT
        .find(&stripped)
        .ok_or_else(|| FlywheelError::Parse("no JSON object in response".to_string()))?;

    match serde_json::from_str::<Value>(span.as_str()) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => Err(FlywheelError::Parse("response JSON is not an object".to_string())),
        Err(e) => Err(FlywheelError::Parse(format!("invalid JSON: {}", e))),
    }
}

fn required<'a>(object: &'a Map<String, Value>, field: &str) -> Result<&'a Value> {
    match object.get(field) {
        None | Some(Value::Null) => Err(FlywheelError::MissingField(field.to_string())),
        Some(value) => Ok(value),
    }
}

fn required_string(object: &Map<String, Value>, field: &str) -> Result<String> {
    match required(object, field)? {
        Value::String(s) => Ok(s.trim().to_string()),
        other => Err(FlywheelError::InvalidType(format!(
            "{} must be a string, got {}",
            field, other
        ))),
    }
}

/// Integer scores pass; whole floats and numeric strings are coerced. Clamped to 0..=100.
pub fn coerce_score(value: &Value) -> Result<i64> {
    let score = match value {
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Some(i),
            (None, Some(f)) if f.fract() == 0.0 => Some(f as i64),
            _ => None,
        },
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    };

    score.map(|s| s.clamp(0, 100)).ok_or_else(|| {
        FlywheelError::InvalidType(format!("importance_score is not an integer: {}", value))
    })
}

/// Decodes an analysis reply into an `AnalysisResult`.
pub fn parse_analysis(text: &str, token_usage: Option<TokenUsage>) -> Result<AnalysisResult> {
    let object = extract_json_object(text)?;

    for field in REQUIRED_ANALYSIS_FIELDS {
        required(&object, field)?;
    }

    let key_findings = match required(&object, "key_findings")? {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        other => {
            return Err(FlywheelError::InvalidType(format!(
                "key_findings must be a list, got {}",
                other
            )))
        }
    };

    Ok(AnalysisResult {
        taxa: required_string(&object, "taxa")?,
        evolutionary_scale: required_string(&object, "evolutionary_scale")?.into(),
        research_method: required_string(&object, "research_method")?.into(),
        key_findings,
        evolutionary_mechanism: required_string(&object, "evolutionary_mechanism")?.into(),
        importance_score: coerce_score(required(&object, "importance_score")?)?,
        innovation_summary: required_string(&object, "innovation_summary")?,
        token_usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::{EvolutionaryMechanism, EvolutionaryScale, ResearchMethod};
    use serde_json::json;

    fn analysis_json() -> Value {
        json!({
            "taxa": "Drosophila melanogaster",
            "evolutionary_scale": "population",
            "research_method": "experimental",
            "key_findings": ["f1", "f2", "f3"],
            "evolutionary_mechanism": "natural-selection",
            "importance_score": 85,
            "innovation_summary": "New evolve-and-resequence design."
        })
    }

    #[test]
    fn test_parses_fenced_reply_with_narrative() {
        let reply = format!(
            "Here is the analysis:\n```json\n{}\n```\nLet me know if you need more.",
            analysis_json()
        );
        let usage = TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        };
        let result = parse_analysis(&reply, Some(usage)).unwrap();
        assert_eq!(result.taxa, "Drosophila melanogaster");
        assert_eq!(result.evolutionary_scale, EvolutionaryScale::Population);
        assert_eq!(result.research_method, ResearchMethod::Experimental);
        assert_eq!(result.evolutionary_mechanism, EvolutionaryMechanism::NaturalSelection);
        assert_eq!(result.key_findings.len(), 3);
        assert_eq!(result.importance_score, 85);
        assert_eq!(result.token_usage, Some(usage));
    }

    #[test]
    fn test_not_json_is_parse_error() {
        assert!(matches!(
            parse_analysis("I cannot analyze this paper.", None),
            Err(FlywheelError::Parse(_))
        ));
        assert!(matches!(
            parse_analysis("{ taxa: broken", None),
            Err(FlywheelError::Parse(_))
        ));
    }

    #[test]
    fn test_each_missing_field_is_reported() {
        for field in REQUIRED_ANALYSIS_FIELDS {
            let mut value = analysis_json();
            value.as_object_mut().unwrap().remove(field);
            match parse_analysis(&value.to_string(), None) {
                Err(FlywheelError::MissingField(name)) => assert_eq!(name, field),
                other => panic!("expected MissingField({}), got {:?}", field, other),
            }
        }
    }

    #[test]
    fn test_score_coercion() {
        assert_eq!(coerce_score(&json!(72)).unwrap(), 72);
        assert_eq!(coerce_score(&json!("64")).unwrap(), 64);
        assert_eq!(coerce_score(&json!(" 90 ")).unwrap(), 90);
        assert_eq!(coerce_score(&json!(80.0)).unwrap(), 80);
        assert_eq!(coerce_score(&json!(150)).unwrap(), 100);
        assert!(matches!(coerce_score(&json!("high")), Err(FlywheelError::InvalidType(_))));
        assert!(matches!(coerce_score(&json!(72.5)), Err(FlywheelError::InvalidType(_))));
        assert!(matches!(coerce_score(&json!([1])), Err(FlywheelError::InvalidType(_))));
    }

    #[test]
    fn test_key_findings_must_be_list() {
        let mut value = analysis_json();
        value["key_findings"] = json!("one finding");
        assert!(matches!(
            parse_analysis(&value.to_string(), None),
            Err(FlywheelError::InvalidType(_))
        ));
    }

    #[test]
    fn test_unknown_vocabulary_is_kept() {
        let mut value = analysis_json();
        value["research_method"] = json!("metagenomic");
        let result = parse_analysis(&value.to_string(), None).unwrap();
        assert!(!result.research_method.is_recognized());
        assert_eq!(result.research_method.as_str(), "metagenomic");
    }

    #[test]
    fn test_cjk_content_survives() {
        let mut value = analysis_json();
        value["innovation_summary"] = json!("揭示了果蝇种群的快速适应。");
        let result = parse_analysis(&value.to_string(), None).unwrap();
        assert_eq!(result.innovation_summary, "揭示了果蝇种群的快速适应。");
    }
}
