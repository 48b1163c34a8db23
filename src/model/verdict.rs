//! Oracle verdicts and their validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OracleError;

/// The five classification outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerdictKind {
    Malicious,
    Spam,
    Graymail,
    Benign,
    Unknown,
}

impl VerdictKind {
    /// All accepted values, in the order the prompt lists them.
    pub const ALL: [Self; 5] = [
        Self::Malicious,
        Self::Spam,
        Self::Graymail,
        Self::Benign,
        Self::Unknown,
    ];

    /// Wire name, identical to the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Malicious => "Malicious",
            Self::Spam => "Spam",
            Self::Graymail => "Graymail",
            Self::Benign => "Benign",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A simple detection rule proposed by the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRule {
    #[serde(rename = "type")]
    pub rule_type: String,
    /// A JSON scalar: string, number, bool or null.
    pub value: Value,
}

/// Validated oracle output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub verdict: VerdictKind,
    pub category: String,
    pub reason: String,
    pub rules: Vec<DetectionRule>,
}

impl Verdict {
    /// Parse the oracle's reply content.
    ///
    /// The content must be a single JSON object with all four keys, a verdict
    /// from [`VerdictKind::ALL`] and scalar rule values. Anything else is a
    /// [`OracleError::MalformedResponse`].
    pub fn from_content(content: &str) -> Result<Self, OracleError> {
        let value: Value = serde_json::from_str(content).map_err(|e| {
            OracleError::MalformedResponse(format!("reply content is not valid JSON: {e}"))
        })?;
        Self::from_value(value)
    }

    /// Validate an already-parsed JSON value against the verdict shape.
    pub fn from_value(value: Value) -> Result<Self, OracleError> {
        if !value.is_object() {
            return Err(OracleError::MalformedResponse(format!(
                "reply content is not a JSON object: {}",
                json_kind(&value)
            )));
        }

        let verdict: Self = serde_json::from_value(value).map_err(|e| {
            OracleError::MalformedResponse(format!("reply does not match the verdict shape: {e}"))
        })?;

        if let Some((idx, rule)) = verdict
            .rules
            .iter()
            .enumerate()
            .find(|(_, r)| r.value.is_array() || r.value.is_object())
        {
            return Err(OracleError::MalformedResponse(format!(
                "rule {idx} ('{}') has a non-scalar value: {}",
                rule.rule_type,
                json_kind(&rule.value)
            )));
        }

        Ok(verdict)
    }
}

/// Outcome recorded in a `ParsedMessage`: a verdict, or the degraded-mode error payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Analysis {
    Verdict(Verdict),
    Failed { error: String, details: String },
}

impl Analysis {
    /// Build the error payload for an oracle failure.
    pub fn failed(err: &OracleError) -> Self {
        Self::Failed {
            error: err.kind().to_string(),
            details: err.to_string(),
        }
    }

    /// The verdict, if classification succeeded.
    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            Self::Verdict(v) => Some(v),
            Self::Failed { .. } => None,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BENIGN: &str = r#"{"verdict": "Benign", "category": "Newsletter", "reason": "Known sender", "rules": []}"#;

    #[test]
    fn test_parse_valid_verdict() {
        let v = Verdict::from_content(BENIGN).unwrap();
        assert_eq!(v.verdict, VerdictKind::Benign);
        assert_eq!(v.category, "Newsletter");
        assert!(v.rules.is_empty());
    }

    #[test]
    fn test_parse_rules_with_scalar_values() {
        let content = r#"{
            "verdict": "Malicious",
            "category": "Credential Harvesting (Phishing)",
            "reason": "Lookalike domain",
            "rules": [
                {"type": "subject_keyword", "value": "urgent payment"},
                {"type": "attachment_count", "value": 3},
                {"type": "has_html", "value": true}
            ]
        }"#;
        let v = Verdict::from_content(content).unwrap();
        assert_eq!(v.verdict, VerdictKind::Malicious);
        assert_eq!(v.rules.len(), 3);
        assert_eq!(v.rules[0].rule_type, "subject_keyword");
        assert_eq!(v.rules[1].value, serde_json::json!(3));
    }

    #[test]
    fn test_not_json_is_malformed() {
        let err = Verdict::from_content("not json").unwrap_err();
        assert!(matches!(err, OracleError::MalformedResponse(_)));
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn test_verdict_outside_enum_is_malformed() {
        for bad in ["Phishing", "benign", "BENIGN", ""] {
            let content = format!(
                r#"{{"verdict": "{bad}", "category": "c", "reason": "r", "rules": []}}"#
            );
            let err = Verdict::from_content(&content).unwrap_err();
            assert!(
                matches!(err, OracleError::MalformedResponse(_)),
                "verdict '{bad}' should be rejected"
            );
        }
    }

    #[test]
    fn test_every_enum_value_is_accepted() {
        for kind in VerdictKind::ALL {
            let content = format!(
                r#"{{"verdict": "{kind}", "category": "c", "reason": "r", "rules": []}}"#
            );
            assert_eq!(Verdict::from_content(&content).unwrap().verdict, kind);
        }
    }

    #[test]
    fn test_missing_key_is_malformed() {
        let err =
            Verdict::from_content(r#"{"verdict": "Spam", "category": "Bulk"}"#).unwrap_err();
        assert!(err.to_string().contains("verdict shape"));
    }

    #[test]
    fn test_array_content_is_malformed() {
        let err = Verdict::from_content("[1, 2]").unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn test_composite_rule_value_is_malformed() {
        let content = r#"{"verdict": "Spam", "category": "c", "reason": "r",
            "rules": [{"type": "domains", "value": ["a.com", "b.com"]}]}"#;
        let err = Verdict::from_content(content).unwrap_err();
        assert!(err.to_string().contains("non-scalar"));
    }

    #[test]
    fn test_analysis_serializes_untagged() {
        let ok = Analysis::Verdict(Verdict::from_content(BENIGN).unwrap());
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["verdict"], "Benign");

        let failed = Analysis::failed(&OracleError::Unavailable("connection refused".into()));
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["error"], "OracleUnavailable");
        assert!(json["details"].as_str().unwrap().contains("connection refused"));

        let back: Analysis = serde_json::from_value(json).unwrap();
        assert_eq!(back, failed);
    }
}
