//! Analysis provider client.
//!
//! Uploads the clip as `multipart/form-data` to `POST {base}/analyze` together
//! with the classification instruction and the JSON schema the answer must
//! follow. The provider may return the answer directly or wrapped in a
//! `result` string that holds JSON; see `parse_analysis_payload`.

use anyhow::{bail, Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use serde_json::{json, Value};
use std::time::Duration;

use super::{AnalysisClient, AnalysisResult};
use crate::clip::ClipArtifact;

const ANALYZE_PROMPT: &str = "You are watching a city street security camera.

Answer with STRICT JSON only:
{
  \"title\": string,
  \"description\": string,
  \"severity\": \"informational\" | \"emergency\"
}

Use \"emergency\" only when the clip shows one of:
- a person falling or collapsing who does not get back up
- a person lying still on the ground
- visible serious injury or bleeding
- a violent assault
- a person in obvious medical distress needing urgent help
Normal traffic and moving cars are never an emergency.

Anything else is \"informational\".
Title: at most 6 words. Description: at most 25 words.
No extra keys, no text outside the JSON object.";

#[derive(Clone, Debug)]
pub struct RemoteAnalysisConfig {
    /// Provider base URL; `/analyze` is appended.
    pub base_url: String,
    /// Bearer credential.
    pub api_key: String,
    /// Bound on the whole request, upload included.
    pub timeout: Duration,
}

pub struct RemoteAnalysisClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
}

impl RemoteAnalysisClient {
    pub fn new(config: RemoteAnalysisConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            bail!("analysis provider credential is empty");
        }
        let http = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("build analysis http client")?;
        Ok(Self {
            http,
            endpoint: format!("{}/analyze", config.base_url.trim_end_matches('/')),
            api_key: config.api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl AnalysisClient for RemoteAnalysisClient {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn analyze(&mut self, clip: &ClipArtifact) -> Result<AnalysisResult> {
        let clip_bytes = std::fs::read(&clip.path)
            .with_context(|| format!("read clip {}", clip.path.display()))?;
        log::info!(
            "analysis upload: {} ({:.2} MB) -> {}",
            clip.path.display(),
            clip_bytes.len() as f64 / (1024.0 * 1024.0),
            self.endpoint
        );

        let form = Form::new()
            .part(
                "file",
                Part::bytes(clip_bytes)
                    .file_name("clip.mp4")
                    .mime_str("video/mp4")?,
            )
            .text("prompt", ANALYZE_PROMPT)
            .text("outputSchema", output_schema().to_string());

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .context("analysis request failed")?;
        let status = response.status();
        let text = response.text().context("read analysis response body")?;
        if !status.is_success() {
            bail!("analysis provider returned {}: {}", status.as_u16(), text.trim());
        }
        log::debug!("analysis raw response: {}", text);

        parse_analysis_payload(&text)
    }
}

/// Parse a provider response into a result.
///
/// Shapes are tried in a fixed order and nothing else is guessed:
/// 1. an object carrying `title`, `description`, `severity`
/// 2. an object whose `result` field is a string holding such an object
/// 3. a top-level string holding such an object
pub fn parse_analysis_payload(text: &str) -> Result<AnalysisResult> {
    let value: Value = serde_json::from_str(text).context("analysis response is not JSON")?;

    if let Ok(result) = serde_json::from_value::<AnalysisResult>(value.clone()) {
        return Ok(result);
    }
    if let Some(Value::String(nested)) = value.get("result") {
        return serde_json::from_str(nested)
            .context("analysis `result` field does not match the output schema");
    }
    if let Value::String(nested) = &value {
        return serde_json::from_str(nested)
            .context("analysis string payload does not match the output schema");
    }
    bail!("analysis response does not match the output schema")
}

fn output_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": { "type": "string" },
            "description": { "type": "string" },
            "severity": { "type": "string", "enum": ["informational", "emergency"] }
        },
        "required": ["title", "description", "severity"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Severity;

    #[test]
    fn parses_top_level_object() {
        let result = parse_analysis_payload(
            r#"{"title":"Person down","description":"Someone fell","severity":"emergency","extra":1}"#,
        )
        .unwrap();
        assert_eq!(
            result,
            AnalysisResult::new("Person down", "Someone fell", Severity::Emergency)
        );
    }

    #[test]
    fn parses_nested_result_string() {
        let result = parse_analysis_payload(
            r#"{"id":"abc","result":"{\"title\":\"Traffic\",\"description\":\"Cars moving\",\"severity\":\"informational\"}"}"#,
        )
        .unwrap();
        assert_eq!(result.title, "Traffic");
        assert_eq!(result.severity, Severity::Informational);
    }

    #[test]
    fn parses_top_level_string() {
        let result = parse_analysis_payload(
            r#""{\"title\":\"Quiet\",\"description\":\"Empty street\",\"severity\":\"informational\"}""#,
        )
        .unwrap();
        assert_eq!(result.description, "Empty street");
    }

    #[test]
    fn rejects_unknown_severity() {
        let err = parse_analysis_payload(
            r#"{"title":"x","description":"y","severity":"critical"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("output schema"));
    }

    #[test]
    fn rejects_non_json_and_other_shapes() {
        assert!(parse_analysis_payload("<html>bad gateway</html>").is_err());
        assert!(parse_analysis_payload(r#"{"result":{"title":"x"}}"#).is_err());
        assert!(parse_analysis_payload(r#"{"result":"not json"}"#).is_err());
    }

    #[test]
    fn empty_credential_is_rejected() {
        let cfg = RemoteAnalysisConfig {
            base_url: "http://localhost:8700".to_string(),
            api_key: "  ".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert!(RemoteAnalysisClient::new(cfg).is_err());
    }

    #[test]
    fn endpoint_appends_analyze() {
        let cfg = RemoteAnalysisConfig {
            base_url: "https://provider.example/api/v0.2/".to_string(),
            api_key: "key".to_string(),
            timeout: Duration::from_secs(1),
        };
        let client = RemoteAnalysisClient::new(cfg).unwrap();
        assert_eq!(client.endpoint(), "https://provider.example/api/v0.2/analyze");
    }
}
