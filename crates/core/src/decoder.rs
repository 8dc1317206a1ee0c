//! Recovers a structured claim answer from free-form model output.
//!
//! Decoding never fails: output that is not a JSON object comes back as
//! [`DecodedAnswer::Unparsed`] carrying the raw text.

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::fmt;
use std::sync::OnceLock;
use tracing::{debug, warn};

const FENCE: &str = "```";
const RAW_DECISION_KEY: &str = "raw_decision";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Decision {
    Approval,
    Denial,
    Conditional,
    #[serde(rename = "Not specified")]
    NotSpecified,
}

impl Decision {
    /// Lenient match against the labels models actually emit ("Approved", "denied", ...).
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().trim_end_matches('.').to_lowercase();
        match normalized.as_str() {
            "approval" | "approved" | "approve" => Some(Self::Approval),
            "denial" | "denied" | "deny" | "rejected" | "rejection" => Some(Self::Denial),
            "conditional" | "conditionally approved" | "conditional approval" => {
                Some(Self::Conditional)
            }
            "not specified" | "not specified in the document" | "unspecified" | "none" | "" => {
                Some(Self::NotSpecified)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Approval => "Approval",
            Self::Denial => "Denial",
            Self::Conditional => "Conditional",
            Self::NotSpecified => "Not specified",
        })
    }
}

/// Amount as the model stated it. Numbers keep their JSON representation (`500` stays an
/// integer) and strings such as `"$500"` or `"Rs. 50,000 - 1,00,000"` are kept verbatim; only
/// shapes that cannot be an amount are dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Amount {
    Number(Number),
    Range(Number, Number),
    Text(String),
}

fn number(value: &Value) -> Option<Number> {
    match value {
        Value::Number(number) => Some(number.clone()),
        _ => None,
    }
}

impl Amount {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(amount) => Some(Self::Number(amount.clone())),
            Value::String(text) => {
                let trimmed = text.trim();
                match trimmed.to_lowercase().as_str() {
                    "" | "null" | "none" | "n/a" | "not specified" => None,
                    _ => Some(Self::Text(trimmed.to_string())),
                }
            }
            Value::Array(bounds) => match bounds.as_slice() {
                [low, high] => Some(Self::Range(number(low)?, number(high)?)),
                _ => None,
            },
            Value::Object(bounds) => {
                let low = number(bounds.get("min").or_else(|| bounds.get("from"))?)?;
                let high = number(bounds.get("max").or_else(|| bounds.get("to"))?)?;
                Some(Self::Range(low, high))
            }
            Value::Null | Value::Bool(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredAnswer {
    #[serde(rename = "Decision")]
    pub decision: Decision,
    #[serde(rename = "Amount")]
    pub amount: Option<Amount>,
    #[serde(rename = "Justification")]
    pub justification: Option<String>,
    /// Fields the model added beyond the three requested ones.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StructuredAnswer {
    fn from_object(object: Map<String, Value>) -> Self {
        let mut decision = None;
        let mut amount = None;
        let mut justification = None;
        let mut unrecognised_decision = None;
        let mut extra = Map::new();

        for (key, value) in object {
            match key.to_ascii_lowercase().as_str() {
                "decision" => match value.as_str().and_then(Decision::parse) {
                    Some(parsed) => decision = Some(parsed),
                    None => {
                        debug!(%value, "decision outside the known set");
                        unrecognised_decision = Some(value);
                    }
                },
                "amount" => amount = Amount::from_value(&value),
                "justification" => {
                    justification = match value {
                        Value::Null => None,
                        Value::String(text) => Some(text),
                        other => Some(other.to_string()),
                    }
                }
                _ => {
                    extra.insert(key, value);
                }
            }
        }

        // Model-supplied keys keep their names; the preserved decision takes the first free slot.
        if let Some(value) = unrecognised_decision {
            let key = std::iter::once(RAW_DECISION_KEY.to_string())
                .chain((2..).map(|n| format!("{RAW_DECISION_KEY}_{n}")))
                .find(|candidate| !extra.contains_key(candidate))
                .unwrap_or_else(|| RAW_DECISION_KEY.to_string());
            extra.insert(key, value);
        }

        Self {
            decision: decision.unwrap_or(Decision::NotSpecified),
            amount,
            justification,
            extra,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DecodedAnswer {
    Parsed(StructuredAnswer),
    Unparsed { raw_response: String },
}

impl DecodedAnswer {
    pub fn structured(&self) -> Option<&StructuredAnswer> {
        match self {
            Self::Parsed(answer) => Some(answer),
            Self::Unparsed { .. } => None,
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }
}

/// Parses the text before the first code fence. When nothing precedes the fence, the body of
/// the fenced block is tried instead.
pub fn decode(raw_output: &str) -> DecodedAnswer {
    let trimmed = raw_output.trim();

    let candidate = match trimmed.split_once(FENCE) {
        None => Some(trimmed),
        Some((before, _)) if !before.trim().is_empty() => Some(before.trim()),
        Some(_) => fenced_body(trimmed),
    };

    if let Some(answer) = candidate.and_then(parse_object) {
        return DecodedAnswer::Parsed(answer);
    }

    warn!(
        output_chars = raw_output.len(),
        "model output is not a JSON object, returning raw text"
    );
    DecodedAnswer::Unparsed {
        raw_response: raw_output.to_string(),
    }
}

fn fenced_body(text: &str) -> Option<&str> {
    static FENCED: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = FENCED
        .get_or_init(|| Regex::new(r"(?s)^```(?:[A-Za-z]+)?\s*(.*?)\s*(?:```|$)").ok())
        .as_ref()?;

    pattern
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|body| body.as_str())
}

fn parse_object(candidate: &str) -> Option<StructuredAnswer> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(object)) => Some(StructuredAnswer::from_object(object)),
        Ok(_) | Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_after_first_fence_is_ignored() {
        let raw = "{\"Decision\":\"Approval\",\"Amount\":100,\"Justification\":\"x\"}\n```trailing```";

        let decoded = decode(raw);
        let answer = decoded.structured().expect("structured answer");
        assert_eq!(answer.decision, Decision::Approval);
        assert_eq!(answer.amount, Some(Amount::Number(100.into())));
        assert_eq!(answer.justification.as_deref(), Some("x"));
        assert!(answer.extra.is_empty());
    }

    #[test]
    fn non_json_falls_back_to_raw_text() {
        let decoded = decode("not json at all");
        assert_eq!(
            decoded,
            DecodedAnswer::Unparsed {
                raw_response: "not json at all".to_string()
            }
        );
        assert_eq!(
            serde_json::to_value(&decoded).expect("serializes"),
            json!({ "raw_response": "not json at all" })
        );
    }

    #[test]
    fn fully_fenced_json_is_recovered() {
        let raw = "```json\n{\"Decision\": \"Denial\", \"Amount\": null, \"Justification\": \"Clause 7 excludes cosmetic surgery.\"}\n```";

        let answer = decode(raw).structured().cloned().expect("structured answer");
        assert_eq!(answer.decision, Decision::Denial);
        assert_eq!(answer.amount, None);
    }

    #[test]
    fn invalid_json_before_fence_is_not_rescued_by_fenced_block() {
        let raw = "Here you go:\n```json\n{\"Decision\":\"Approval\"}\n```";
        assert!(!decode(raw).is_parsed());
    }

    #[test]
    fn non_object_json_is_unparsed() {
        assert!(!decode("[1, 2, 3]").is_parsed());
        assert!(!decode("\"Approval\"").is_parsed());
    }

    #[test]
    fn keys_are_case_insensitive_and_decisions_are_normalised() {
        let answer = decode(r#"{"decision":"approved","amount":"$500","justification":"clause 4.2"}"#)
            .structured()
            .cloned()
            .expect("structured answer");

        assert_eq!(answer.decision, Decision::Approval);
        assert_eq!(answer.amount, Some(Amount::Text("$500".to_string())));

        let not_specified =
            decode(r#"{"Decision":"Not specified in the document","Amount":null}"#);
        assert_eq!(
            not_specified.structured().map(|answer| answer.decision),
            Some(Decision::NotSpecified)
        );
    }

    #[test]
    fn unknown_decision_is_kept_aside_and_garbage_amount_is_nulled() {
        let answer = decode(
            r#"{"Decision":"Maybe later","Amount":true,"Justification":["a"],"Clause":"4.2"}"#,
        )
        .structured()
        .cloned()
        .expect("structured answer");

        assert_eq!(answer.decision, Decision::NotSpecified);
        assert_eq!(answer.amount, None);
        assert_eq!(answer.justification.as_deref(), Some(r#"["a"]"#));
        assert_eq!(answer.extra.get(RAW_DECISION_KEY), Some(&json!("Maybe later")));
        assert_eq!(answer.extra.get("Clause"), Some(&json!("4.2")));
    }

    #[test]
    fn ranges_are_preserved_in_either_shape() {
        assert_eq!(
            Amount::from_value(&json!([1000, 5000])),
            Some(Amount::Range(1000.into(), 5000.into()))
        );
        let half = Number::from_f64(20.5).expect("finite");
        assert_eq!(
            Amount::from_value(&json!({"min": 10, "max": 20.5})),
            Some(Amount::Range(10.into(), half))
        );
        assert_eq!(Amount::from_value(&json!([1, "x"])), None);
        assert_eq!(Amount::from_value(&json!("  ")), None);
    }

    #[test]
    fn integer_amounts_are_emitted_unchanged() {
        let decoded = decode(r#"{"Decision":"Approval","Amount":500,"Justification":"clause 4.2"}"#);
        let rendered = serde_json::to_string(&decoded).expect("serializes");
        assert!(rendered.contains(r#""Amount":500,"#));
        assert!(!rendered.contains("500.0"));

        let large = decode(r#"{"Decision":"Approval","Amount":12345678901234567}"#);
        let value = serde_json::to_value(&large).expect("serializes");
        assert_eq!(value["Amount"].as_u64(), Some(12_345_678_901_234_567));

        let fractional = decode(r#"{"Decision":"Approval","Amount":99.5}"#);
        let value = serde_json::to_value(&fractional).expect("serializes");
        assert_eq!(value["Amount"], json!(99.5));
    }

    #[test]
    fn model_supplied_raw_decision_is_not_overwritten() {
        let answer = decode(r#"{"raw_decision":"from model","Decision":"Perhaps"}"#)
            .structured()
            .cloned()
            .expect("structured answer");
        assert_eq!(answer.decision, Decision::NotSpecified);
        assert_eq!(answer.extra.get("raw_decision"), Some(&json!("from model")));
        assert_eq!(answer.extra.get("raw_decision_2"), Some(&json!("Perhaps")));

        let reordered = decode(r#"{"Decision":"Perhaps","raw_decision":"from model"}"#)
            .structured()
            .cloned()
            .expect("structured answer");
        assert_eq!(reordered.extra, answer.extra);
    }

    #[test]
    fn structured_answer_serialises_with_original_field_names() {
        let answer = decode(r#"{"Decision":"Conditional","Amount":[100,200],"Justification":"j"}"#);
        assert_eq!(
            serde_json::to_value(&answer).expect("serializes"),
            json!({
                "Decision": "Conditional",
                "Amount": [100, 200],
                "Justification": "j"
            })
        );
    }
}
