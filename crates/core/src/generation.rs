use crate::error::QueryError;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::pin::Pin;
use std::time::Duration;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::warn;
use url::Url;

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, QueryError>> + Send>>;

/// Opaque generation capability: prompt in, stream of text fragments out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<FragmentStream, QueryError>;

    /// Cheap reachability check, used by the startup wait.
    async fn probe(&self) -> Result<(), QueryError>;
}

/// Streams chat completions from an Ollama instance.
pub struct OllamaGenerator {
    endpoint: Url,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatLine {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Decodes one NDJSON line of a streamed chat response. Returns `None` for
/// empty content and for the final `done` marker.
fn parse_chat_line(line: &str) -> Result<Option<String>, QueryError> {
    if line.is_empty() {
        return Ok(None);
    }

    let parsed: ChatLine =
        serde_json::from_str(line).map_err(|error| QueryError::Streaming(error.to_string()))?;

    if let Some(error) = parsed.error {
        return Err(QueryError::Streaming(error));
    }

    if parsed.done {
        return Ok(None);
    }

    match parsed.message {
        Some(message) if !message.content.is_empty() => Ok(Some(message.content)),
        _ => Ok(None),
    }
}

impl OllamaGenerator {
    pub fn new(endpoint: &str, model: &str) -> Result<Self, QueryError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)
                .map_err(|error| QueryError::GenerationUnreachable(error.to_string()))?,
            model: model.to_string(),
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<FragmentStream, QueryError> {
        let url = self
            .endpoint
            .join("api/chat")
            .map_err(|error| QueryError::GenerationUnreachable(error.to_string()))?;

        let response = self
            .client
            .post(url)
            .json(&json!({
                "model": self.model,
                "messages": [{ "role": "user", "content": prompt }],
                "stream": true,
            }))
            .send()
            .await
            .map_err(|error| QueryError::GenerationUnreachable(error.to_string()))?;

        if !response.status().is_success() {
            return Err(QueryError::GenerationUnreachable(format!(
                "chat request returned {}",
                response.status()
            )));
        }

        let mut bytes = response.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut buffer = String::new();
            while let Some(piece) = bytes.next().await {
                let piece = piece.map_err(|error| QueryError::Streaming(error.to_string()))?;
                buffer.push_str(&String::from_utf8_lossy(&piece));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);
                    if let Some(fragment) = parse_chat_line(&line)? {
                        yield fragment;
                    }
                }
            }

            if let Some(fragment) = parse_chat_line(buffer.trim())? {
                yield fragment;
            }
        };

        Ok(Box::pin(stream))
    }

    async fn probe(&self) -> Result<(), QueryError> {
        let url = self
            .endpoint
            .join("api/tags")
            .map_err(|error| QueryError::GenerationUnreachable(error.to_string()))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| QueryError::GenerationUnreachable(error.to_string()))?;

        if !response.status().is_success() {
            return Err(QueryError::GenerationUnreachable(format!(
                "generation service returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Waits for the generation service to become reachable: `attempts` probes
/// with a fixed delay between them. The error after the final attempt is
/// returned to the caller, which is expected to log it and keep running
/// degraded rather than crash.
pub async fn wait_until_ready(
    generator: &dyn TextGenerator,
    attempts: usize,
    delay: Duration,
) -> Result<(), QueryError> {
    let retries = attempts.saturating_sub(1);
    let strategy = FixedInterval::new(delay).take(retries);

    Retry::spawn(strategy, || async {
        if let Err(error) = generator.probe().await {
            warn!(error = %error, "generation service not reachable yet");
            return Err(error);
        }
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_lines_yield_fragments() {
        let fragment =
            parse_chat_line(r#"{"message":{"content":"Hello"},"done":false}"#).unwrap();
        assert_eq!(fragment.as_deref(), Some("Hello"));
    }

    #[test]
    fn done_marker_yields_nothing() {
        let fragment = parse_chat_line(r#"{"message":{"content":""},"done":true}"#).unwrap();
        assert!(fragment.is_none());

        let fragment = parse_chat_line("").unwrap();
        assert!(fragment.is_none());
    }

    #[test]
    fn inline_error_becomes_a_streaming_failure() {
        let result = parse_chat_line(r#"{"error":"model not found"}"#);
        assert!(matches!(result, Err(QueryError::Streaming(_))));
    }

    #[test]
    fn garbage_lines_are_streaming_failures() {
        let result = parse_chat_line("not json at all");
        assert!(matches!(result, Err(QueryError::Streaming(_))));
    }
}
