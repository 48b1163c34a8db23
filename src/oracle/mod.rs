//! Classification oracle client (Ollama chat API).
//!
//! One request per document: a system message carrying the analyst prompt
//! and a user message carrying the document as pretty JSON, with the reply
//! constrained to JSON. The client never retries and imposes no timeout;
//! callers own both decisions.

pub mod prompt;

use std::future::Future;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::OracleConfig;
use crate::error::OracleError;
use crate::model::document::StructuredDocument;
use crate::model::verdict::Verdict;

pub use prompt::SystemPrompt;

/// Longest slice of a reply body quoted back in an error.
const ERROR_SNIPPET_BYTES: usize = 200;

/// Anything that can turn a document into a verdict.
///
/// [`OracleClient`] is the production implementation; the ingestion
/// coordinator only depends on this trait.
pub trait Classifier {
    fn classify(
        &self,
        doc: &StructuredDocument,
    ) -> impl Future<Output = Result<Verdict, OracleError>> + Send;
}

/// HTTP client for the classification service.
#[derive(Debug, Clone)]
pub struct OracleClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    prompt: SystemPrompt,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    format: &'static str,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl OracleClient {
    /// Create a client for the configured host and model.
    pub fn new(config: &OracleConfig, prompt: SystemPrompt) -> Result<Self, OracleError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("mailverdict/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/api/chat", config.host.trim_end_matches('/')),
            model: config.model.clone(),
            prompt,
        })
    }

    /// Full URL of the chat endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one document and validate the reply.
    pub async fn classify_document(
        &self,
        doc: &StructuredDocument,
    ) -> Result<Verdict, OracleError> {
        let user_prompt = doc.to_pretty_json().map_err(encode_failed)?;

        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: self.prompt.as_str(),
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            format: "json",
            stream: false,
        };

        debug!(endpoint = %self.endpoint, model = %self.model, "Sending document to oracle");
        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Oracle transport failure");
                OracleError::from(e)
            })?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(%status, "Oracle returned an error status");
            return Err(OracleError::Unavailable(format!(
                "HTTP {status}: {}",
                snippet(&body)
            )));
        }

        let content = extract_content(&body)?;
        let verdict = Verdict::from_content(&content).inspect_err(|e| {
            warn!(error = %e, content = %snippet(&content), "Oracle reply rejected");
        })?;

        info!(verdict = %verdict.verdict, category = %verdict.category, "Oracle verdict received");
        Ok(verdict)
    }
}

impl Classifier for OracleClient {
    async fn classify(&self, doc: &StructuredDocument) -> Result<Verdict, OracleError> {
        self.classify_document(doc).await
    }
}

/// Pull `message.content` out of a chat reply envelope.
fn extract_content(body: &str) -> Result<String, OracleError> {
    let envelope: Value = serde_json::from_str(body).map_err(|e| {
        OracleError::MalformedResponse(format!("reply envelope is not valid JSON: {e}"))
    })?;

    envelope
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            OracleError::MalformedResponse(format!(
                "reply envelope has no message.content string: {}",
                snippet(body)
            ))
        })
}

/// A document that will not encode fails the same way on every retry.
fn encode_failed(e: serde_json::Error) -> OracleError {
    OracleError::MalformedResponse(format!("request could not be encoded: {e}"))
}

fn snippet(text: &str) -> &str {
    if text.len() <= ERROR_SNIPPET_BYTES {
        return text;
    }
    let mut end = ERROR_SNIPPET_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
