use super::{InferenceFault, InferenceService, Message};
use crate::config::InferenceConfig;
use crate::error::{GeoMapError, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request structure for an OpenAI-compatible chat completions API
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Response structure from the chat completions API
#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Chat completions client for the vision-language model
///
/// Each call tries the candidate models in turn, starting from a random one.
/// Transient faults move on to the next candidate after a fixed delay;
/// permanent faults abandon the call.
pub struct ChatCompletionClient {
    client: Client,
    base_url: String,
    api_key: String,
    models: Vec<String>,
    max_tokens: u32,
    temperature: f32,
    retry_delay: Duration,
}

impl ChatCompletionClient {
    /// Create a new client from the inference configuration
    pub fn new(config: &InferenceConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GeoMapError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let models: Vec<String> = config
            .models
            .iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if models.is_empty() {
            return Err(GeoMapError::Config("No inference models configured".to_string()));
        }

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            models,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Make a single API request against one model
    async fn request(
        &self,
        model: &str,
        messages: &[Message],
        structured: bool,
    ) -> std::result::Result<String, InferenceFault> {
        let request = ChatRequest {
            model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                kind: if structured { "json_object" } else { "text" },
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(classify_status(status.as_u16(), &body));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| InferenceFault::Malformed(format!("Failed to parse response: {}", e)))?;

        extract_answer(result)
    }
}

fn classify_transport_error(e: reqwest::Error) -> InferenceFault {
    if e.is_timeout() {
        InferenceFault::Timeout(e.to_string())
    } else if e.is_connect() || e.is_request() {
        InferenceFault::Connection(e.to_string())
    } else {
        InferenceFault::Malformed(e.to_string())
    }
}

/// Map a non-success HTTP status (and its error body) to a fault
fn classify_status(status: u16, body: &str) -> InferenceFault {
    let (code, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (
            envelope.error.code.unwrap_or_default(),
            envelope.error.message.unwrap_or_else(|| body.to_string()),
        ),
        Err(_) => (String::new(), body.to_string()),
    };

    match status {
        429 => InferenceFault::RateLimited(message),
        408 | 504 => InferenceFault::Timeout(message),
        400..=499 => match code.as_str() {
            "content_filter" => InferenceFault::ContentFiltered(message),
            "context_length_exceeded" => InferenceFault::ContextTooLong(message),
            _ => InferenceFault::BadRequest(format!("{} {}", status, message)),
        },
        _ => InferenceFault::Server {
            status,
            body: message,
        },
    }
}

fn extract_answer(response: ChatResponse) -> std::result::Result<String, InferenceFault> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| InferenceFault::Malformed("response has no choices".to_string()))?;

    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(InferenceFault::ContentFiltered(
            "completion stopped by content filter".to_string(),
        ));
    }

    choice
        .message
        .content
        .ok_or_else(|| InferenceFault::Malformed("response has no content".to_string()))
}

#[async_trait]
impl InferenceService for ChatCompletionClient {
    async fn complete(&self, messages: &[Message], structured: bool) -> Option<String> {
        let start = std::time::Instant::now();
        let trials = self.models.len();
        let first = rand::thread_rng().gen_range(0..trials);

        for trial in 0..trials {
            let model = &self.models[(first + trial) % trials];
            match self.request(model, messages, structured).await {
                Ok(answer) => {
                    log::debug!(
                        "Inference call to {} took {:?} (attempt {})",
                        model,
                        start.elapsed(),
                        trial + 1
                    );
                    return Some(answer);
                }
                Err(fault) if fault.is_transient() => {
                    log::warn!("{} on {}. Retrying ({}/{})...", fault, model, trial + 1, trials);
                    if trial + 1 < trials {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
                Err(fault) => {
                    log::warn!("{} on {}. Skipping...", fault, model);
                    return None;
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(models: &[&str]) -> InferenceConfig {
        InferenceConfig {
            models: models.iter().map(|m| m.to_string()).collect(),
            base_url: "http://localhost:1/v1/".to_string(),
            ..InferenceConfig::default()
        }
    }

    #[test]
    fn test_client_new() {
        let client = ChatCompletionClient::new(&config(&["gpt-4o", " ", "qwen-vl"]), "k".into()).unwrap();
        assert_eq!(client.models(), &["gpt-4o".to_string(), "qwen-vl".to_string()]);
        assert_eq!(client.base_url, "http://localhost:1/v1");
    }

    #[test]
    fn test_client_requires_model() {
        assert!(ChatCompletionClient::new(&config(&[""]), "k".into()).is_err());
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(429, "slow down"), InferenceFault::RateLimited(_)));
        assert!(matches!(
            classify_status(400, r#"{"error": {"code": "content_filter", "message": "blocked"}}"#),
            InferenceFault::ContentFiltered(_)
        ));
        assert!(matches!(
            classify_status(400, r#"{"error": {"code": "context_length_exceeded"}}"#),
            InferenceFault::ContextTooLong(_)
        ));
        assert!(matches!(classify_status(401, "nope"), InferenceFault::BadRequest(_)));
        assert!(matches!(classify_status(503, "down"), InferenceFault::Server { status: 503, .. }));
    }

    #[test]
    fn test_extract_answer() {
        let ok: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"content": "{\"answer\": \"C\"}"}, "finish_reason": "stop"}]}"#,
        )
        .unwrap();
        assert_eq!(extract_answer(ok).unwrap(), r#"{"answer": "C"}"#);

        let filtered: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"content": null}, "finish_reason": "content_filter"}]}"#,
        )
        .unwrap();
        assert!(matches!(extract_answer(filtered), Err(InferenceFault::ContentFiltered(_))));

        let empty: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(extract_answer(empty), Err(InferenceFault::Malformed(_))));
    }

    #[tokio::test]
    async fn test_unreachable_service_gives_no_answer() {
        let mut cfg = config(&["a", "b"]);
        cfg.retry_delay_ms = 1;
        cfg.timeout_secs = 2;
        let client = ChatCompletionClient::new(&cfg, "k".into()).unwrap();
        let answer = client.complete(&[Message::system("hi")], false).await;
        assert!(answer.is_none());
    }
}
