//! HTTP client for the Gemini `generateContent` API.

use std::time::Duration;

use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::input::AudioInput;
use crate::prompt::Prompt;
use crate::retry::Retryable;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model service busy or rate-limited: {0}")]
    Transient(String),
    #[error("Model {0} is not available")]
    ModelUnavailable(String),
    #[error("Model request failed: {0}")]
    Fatal(String),
}

impl Retryable for ModelError {
    fn is_transient(&self) -> bool {
        matches!(self, ModelError::Transient(_))
    }
}

/// One request: the prompt plus the audio it is about.
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub prompt: &'a Prompt,
    pub audio: &'a AudioInput,
}

/// An external text-generation service. Returns the raw response text.
pub trait GenerativeModel {
    fn generate(&self, model: &str, request: &GenerateRequest<'_>) -> Result<String, ModelError>;
}

/// Client for the Gemini `generateContent` REST endpoint.
pub struct GeminiClient {
    agent: ureq::Agent,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

/// JSON body for `generateContent`.
pub fn request_body(request: &GenerateRequest<'_>) -> Value {
    let mut parts = Vec::new();
    if let AudioInput::Inline { bytes, mime_type } = request.audio {
        parts.push(json!({
            "inlineData": {
                "mimeType": mime_type,
                "data": base64::engine::general_purpose::STANDARD.encode(bytes),
            }
        }));
    }
    parts.push(json!({ "text": request.prompt.user }));

    let mut generation = json!({ "temperature": 0.2 });
    if request.prompt.json_mode {
        generation["responseMimeType"] = json!("application/json");
    }

    json!({
        "systemInstruction": { "parts": [{ "text": request.prompt.system }] },
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": generation,
    })
}

/// Map an HTTP status to retry semantics.
pub fn classify_status(status: u16, model: &str, body: &str) -> ModelError {
    let detail: String = body.chars().take(200).collect();
    match status {
        404 => ModelError::ModelUnavailable(model.to_string()),
        408 | 429 | 500 | 502 | 503 | 504 => {
            ModelError::Transient(format!("HTTP {status}: {detail}"))
        }
        _ => ModelError::Fatal(format!("HTTP {status}: {detail}")),
    }
}

fn response_text(response: GenerateResponse) -> Result<String, ModelError> {
    let candidate = response
        .candidates
        .and_then(|c| c.into_iter().next());

    let Some(candidate) = candidate else {
        // A blocked prompt comes back with feedback and no candidates
        return match response.prompt_feedback {
            Some(feedback) => Err(ModelError::Fatal(format!("request blocked: {feedback}"))),
            None => Err(ModelError::Transient("empty response".into())),
        };
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
        return Err(ModelError::Transient(format!("empty response (finish reason: {reason})")));
    }
    Ok(text)
}

impl GenerativeModel for GeminiClient {
    fn generate(&self, model: &str, request: &GenerateRequest<'_>) -> Result<String, ModelError> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, model);
        log::debug!("POST {url}");

        let mut response = self
            .agent
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .send_json(request_body(request))
            .map_err(|e| match e {
                ureq::Error::Timeout(_) | ureq::Error::Io(_) | ureq::Error::ConnectionFailed => {
                    ModelError::Transient(e.to_string())
                }
                other => ModelError::Fatal(other.to_string()),
            })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(classify_status(status, model, &body));
        }

        let parsed: GenerateResponse = response
            .body_mut()
            .read_json()
            .map_err(|e| ModelError::Transient(format!("unreadable response: {e}")))?;
        response_text(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(json_mode: bool) -> Prompt {
        Prompt {
            system: "sys".into(),
            user: "analyze".into(),
            json_mode,
        }
    }

    #[test]
    fn test_body_with_inline_audio() {
        let p = prompt(true);
        let audio = AudioInput::Inline { bytes: b"abc".as_slice().into(), mime_type: "audio/wav".into() };
        let body = request_body(&GenerateRequest { prompt: &p, audio: &audio });

        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["inlineData"]["mimeType"], "audio/wav");
        assert_eq!(parts[0]["inlineData"]["data"], "YWJj");
        assert_eq!(parts[1]["text"], "analyze");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn test_body_with_url() {
        let p = prompt(false);
        let audio = AudioInput::Url("https://example.com/a.mp3".into());
        let body = request_body(&GenerateRequest { prompt: &p, audio: &audio });
        assert_eq!(body["contents"][0]["parts"].as_array().unwrap().len(), 1);
        assert!(body["generationConfig"].get("responseMimeType").is_none());
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(429, "m", "").is_transient());
        assert!(classify_status(503, "m", "overloaded").is_transient());
        assert!(matches!(classify_status(404, "m", ""), ModelError::ModelUnavailable(_)));
        assert!(matches!(classify_status(400, "m", "bad"), ModelError::Fatal(_)));
    }

    #[test]
    fn test_response_text() {
        let r: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"key\":"},{"text":"\"C\"}"}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(response_text(r).unwrap(), r#"{"key":"C"}"#);

        let empty: GenerateResponse =
            serde_json::from_str(r#"{"candidates":[{"content":{"parts":[]},"finishReason":"MAX_TOKENS"}]}"#)
                .unwrap();
        assert!(response_text(empty).unwrap_err().is_transient());

        let blocked: GenerateResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"OTHER"}}"#).unwrap();
        assert!(matches!(response_text(blocked), Err(ModelError::Fatal(_))));
    }
}
