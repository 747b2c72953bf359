//! Vision-language inference service: message model, service trait and
//! strict structured-output parsing.

pub mod client;

pub use client::ChatCompletionClient;

use crate::error::{GeoMapError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One part of a multi-part user message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image(data_url: impl Into<String>) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: data_url.into(),
            },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            ContentPart::ImageUrl { .. } => None,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ContentPart::ImageUrl { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// Chat message sent to the inference service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }

    /// Parts of a multi-part message (empty for plain text)
    pub fn parts(&self) -> &[ContentPart] {
        match &self.content {
            MessageContent::Parts(parts) => parts,
            MessageContent::Text(_) => &[],
        }
    }
}

/// Why an inference call failed
#[derive(Debug, Error)]
pub enum InferenceFault {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("content filtered: {0}")]
    ContentFiltered(String),
    #[error("context length exceeded: {0}")]
    ContextTooLong(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl InferenceFault {
    /// Transient faults are retried against the next candidate model.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InferenceFault::RateLimited(_)
                | InferenceFault::Timeout(_)
                | InferenceFault::Connection(_)
                | InferenceFault::Server { .. }
                | InferenceFault::Malformed(_)
        )
    }
}

/// Vision-language inference service
///
/// Returns `None` when no answer could be obtained; retry policy and fault
/// classification live in the implementation.
#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn complete(&self, messages: &[Message], structured: bool) -> Option<String>;
}

/// Strip a surrounding markdown code fence, if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse structured inference output into `T`.
///
/// The text must be JSON of the expected shape (optionally inside a code
/// fence); anything else is a [`GeoMapError::Parse`].
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let body = strip_code_fence(raw);
    serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(120).collect();
        GeoMapError::Parse(format!("{} in structured output: {}", e, preview))
    })
}

/// Run a structured call and parse its answer; `None` answers are an error.
pub async fn complete_structured<T: DeserializeOwned>(
    service: &dyn InferenceService,
    messages: &[Message],
) -> Result<T> {
    let answer = service
        .complete(messages, true)
        .await
        .ok_or_else(|| GeoMapError::Inference("no answer from inference service".to_string()))?;
    parse_structured(&answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Title {
        title_name: String,
    }

    #[test]
    fn test_message_wire_shape() {
        let msg = Message::user(vec![
            ContentPart::image("data:image/png;base64,AAAA"),
            ContentPart::text("Only output the OCR result of the given image."),
        ]);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"][0]["type"], "image_url");
        assert_eq!(value["content"][0]["image_url"]["url"], "data:image/png;base64,AAAA");
        assert_eq!(value["content"][1]["type"], "text");

        let sys = serde_json::to_value(Message::system("hi")).unwrap();
        assert_eq!(sys["content"], "hi");
    }

    #[test]
    fn test_parse_structured_plain_and_fenced() {
        let t: Title = parse_structured(r#"{"title_name": "Valle"}"#).unwrap();
        assert_eq!(t.title_name, "Valle");

        let fenced = "```json\n{\"title_name\": \"Valle\"}\n```";
        let t: Title = parse_structured(fenced).unwrap();
        assert_eq!(t.title_name, "Valle");
    }

    #[test]
    fn test_parse_structured_rejects_single_quotes() {
        let err = parse_structured::<serde_json::Value>("{'answer': True}").unwrap_err();
        assert!(matches!(err, GeoMapError::Parse(_)));
    }

    #[test]
    fn test_parse_structured_rejects_wrong_shape() {
        let err = parse_structured::<Title>(r#"{"scale": "1:100"}"#).unwrap_err();
        assert!(matches!(err, GeoMapError::Parse(_)));
    }

    #[test]
    fn test_fault_classification() {
        assert!(InferenceFault::RateLimited("429".into()).is_transient());
        assert!(InferenceFault::Timeout("t".into()).is_transient());
        assert!(!InferenceFault::ContentFiltered("x".into()).is_transient());
        assert!(!InferenceFault::ContextTooLong("x".into()).is_transient());
        assert!(!InferenceFault::BadRequest("x".into()).is_transient());
    }

    #[tokio::test]
    async fn test_complete_structured() {
        use crate::test_support::ScriptedInference;

        let service = ScriptedInference::new().on("title", "```json\n{\"title_name\": \"Valle\"}\n```");
        let found: Title = complete_structured(&service, &[Message::system("title please")])
            .await
            .unwrap();
        assert_eq!(found.title_name, "Valle");

        let err = complete_structured::<Title>(&service, &[Message::system("scale please")])
            .await
            .unwrap_err();
        assert!(matches!(err, GeoMapError::Inference(_)));
    }
}
