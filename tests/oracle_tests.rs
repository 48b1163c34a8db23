//! Oracle client and system prompt tests.

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mailverdict::config::OracleConfig;
use mailverdict::error::{OracleError, PromptError};
use mailverdict::model::document::StructuredDocument;
use mailverdict::model::verdict::VerdictKind;
use mailverdict::oracle::{Classifier, OracleClient, SystemPrompt};

async fn classify_with_body(body: serde_json::Value) -> Result<mailverdict::model::verdict::Verdict, OracleError> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;

    let config = OracleConfig {
        host: server.uri(),
        model: "mistral".to_string(),
        ..OracleConfig::default()
    };
    let client = OracleClient::new(&config, SystemPrompt::from_guideline("g")).unwrap();
    let mut doc = StructuredDocument::default();
    doc.push_header("Subject", "hello");
    client.classify(&doc).await
}

fn chat_reply(content: &str) -> serde_json::Value {
    json!({ "model": "mistral", "message": { "role": "assistant", "content": content }, "done": true })
}

#[tokio::test]
async fn test_every_verdict_kind_is_accepted() {
    for kind in VerdictKind::ALL {
        let content = json!({
            "verdict": kind.as_str(),
            "category": "c",
            "reason": "r",
            "rules": [{ "type": "subject_keyword", "value": "urgent payment" }],
        })
        .to_string();
        let verdict = classify_with_body(chat_reply(&content)).await.unwrap();
        assert_eq!(verdict.verdict, kind);
        assert_eq!(verdict.rules[0].rule_type, "subject_keyword");
    }
}

#[tokio::test]
async fn test_reply_shape_violations_are_malformed() {
    let bad_contents = [
        "not json",
        "[1, 2, 3]",
        r#"{"verdict": "Benign"}"#,
        r#"{"verdict": "benign", "category": "c", "reason": "r", "rules": []}"#,
        r#"{"verdict": "Spam", "category": "c", "reason": "r", "rules": [{"type": "t", "value": ["a"]}]}"#,
    ];
    for content in bad_contents {
        let err = classify_with_body(chat_reply(content)).await.unwrap_err();
        assert!(
            matches!(err, OracleError::MalformedResponse(_)),
            "{content}: {err:?}"
        );
        assert_eq!(err.kind(), "OracleMalformedResponse");
    }
}

#[tokio::test]
async fn test_envelope_without_content_is_malformed() {
    let err = classify_with_body(json!({ "done": true })).await.unwrap_err();
    assert!(matches!(err, OracleError::MalformedResponse(_)));

    let err = classify_with_body(json!({ "message": { "content": 42 } }))
        .await
        .unwrap_err();
    assert!(matches!(err, OracleError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_client_does_not_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let config = OracleConfig {
        host: server.uri(),
        ..OracleConfig::default()
    };
    let client = OracleClient::new(&config, SystemPrompt::from_guideline("g")).unwrap();
    let err = client
        .classify(&StructuredDocument::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "OracleUnavailable");
    // `expect(1)` is verified when the server drops.
}

#[test]
fn test_prompt_is_installed_once() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.md");
    let guideline = dir.path().join("labeling_guide.md");
    std::fs::write(&guideline, "## Malicious\nCredential harvesting pages.\n").unwrap();

    let err = SystemPrompt::install(&missing).unwrap_err();
    assert!(matches!(err, PromptError::GuidelineMissing { .. }));
    assert!(SystemPrompt::installed().is_none());

    let prompt = SystemPrompt::install(&guideline).unwrap();
    assert!(prompt.as_str().contains("Credential harvesting pages."));

    // Later calls return the cached prompt without touching the filesystem.
    std::fs::remove_file(&guideline).unwrap();
    let again = SystemPrompt::install(&missing).unwrap();
    assert_eq!(again, prompt);
    assert_eq!(SystemPrompt::installed(), Some(prompt));
}
