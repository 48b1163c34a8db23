//! The analyst system prompt, built once from the labeling guideline.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use tracing::info;

use crate::error::PromptError;

/// Process-wide prompt; set by the first successful [`SystemPrompt::install`].
static INSTALLED: OnceLock<SystemPrompt> = OnceLock::new();

/// Immutable system instruction sent with every classification request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPrompt(Arc<str>);

impl SystemPrompt {
    /// Load the guideline file and install the process-wide prompt.
    ///
    /// The file is read at most once per process; later calls return the
    /// cached prompt regardless of `path`. A missing guideline is an error the
    /// binary treats as fatal at startup.
    pub fn install(path: impl AsRef<Path>) -> Result<Self, PromptError> {
        if let Some(prompt) = INSTALLED.get() {
            return Ok(prompt.clone());
        }

        let path = path.as_ref();
        info!(path = %path.display(), "Loading labeling guideline for system prompt");
        let guideline =
            std::fs::read_to_string(path).map_err(|source| PromptError::GuidelineMissing {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(INSTALLED.get_or_init(|| Self::from_guideline(&guideline)).clone())
    }

    /// The installed prompt, if [`SystemPrompt::install`] has succeeded.
    pub fn installed() -> Option<Self> {
        INSTALLED.get().cloned()
    }

    /// Build a prompt around guideline text without touching the process-wide cache.
    pub fn from_guideline(guideline: &str) -> Self {
        let prompt = format!(
            r#"You are a senior cybersecurity analyst specializing in email threat detection.
Your task is to analyze a JSON representation of an email and determine its category based on the detailed guidelines provided below.
You must return your analysis in a structured JSON format.

The JSON output MUST contain the following keys:
- "verdict": One of "Malicious", "Spam", "Graymail", "Benign", or "Unknown".
- "category": The specific subcategory from the guidelines (e.g., "Credential Harvesting (Phishing)", "Lead Generation/Contact List Solicitation").
- "reason": A brief, clear explanation for your verdict, referencing specific evidence from the email JSON.
- "rules": A list of simple, actionable detection rules based on your analysis. Each rule should be a JSON object with "type" and "value" keys, where "value" is a string, number or boolean. Examples: {{"type": "subject_keyword", "value": "urgent payment"}}, {{"type": "domain_reputation", "value": "suspicious-site.com"}}.

--- START OF GUIDELINES ---
{}
--- END OF GUIDELINES ---

Now, analyze the following email JSON and provide your response in the specified JSON format only. Do not add any extra text or explanations outside of the JSON structure.
"#,
            guideline.trim()
        );
        Self(Arc::from(prompt))
    }

    /// Prompt text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guideline_is_embedded() {
        let prompt = SystemPrompt::from_guideline("## Graymail\nBulk marketing the user opted into.\n");
        assert!(prompt.as_str().contains("--- START OF GUIDELINES ---\n## Graymail"));
        assert!(prompt.as_str().contains("\"Malicious\", \"Spam\", \"Graymail\""));
        assert!(prompt.as_str().contains("{\"type\": \"subject_keyword\""));
    }

    #[test]
    fn test_install_missing_guideline_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("labeling_guide.md");
        // Only meaningful when nothing installed a prompt earlier in this process.
        if SystemPrompt::installed().is_none() {
            let err = SystemPrompt::install(&missing).unwrap_err();
            assert!(matches!(err, PromptError::GuidelineMissing { .. }));
            assert!(err.to_string().contains("labeling_guide.md"));
        }
    }
}
