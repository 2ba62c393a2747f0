//! services/api/src/adapters/ollama.rs
//!
//! The LLM gateway backed by a local Ollama server. It implements the `LlmService`
//! port over Ollama's native `/api/chat` endpoint, which streams newline-delimited
//! JSON objects and accepts the sampler knobs (`top_k`, `repeat_penalty`, `num_ctx`)
//! that OpenAI-compatible endpoints drop.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use sprachwelt_core::ports::{
    ChatMessage, ChatOptions, ChatRole, LlmService, PortError, PortResult, TextStream,
};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `LlmService` port against Ollama.
#[derive(Clone)]
pub struct OllamaAdapter {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaAdapter {
    /// Creates a new `OllamaAdapter`. `base_url` carries no trailing slash.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self, PortError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| PortError::Unexpected(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a ChatMessage> for OllamaMessage<'a> {
    fn from(msg: &'a ChatMessage) -> Self {
        let role = match msg.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        Self {
            role,
            content: &msg.content,
        }
    }
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    repeat_penalty: f32,
    num_predict: u32,
    num_ctx: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

impl From<&ChatOptions> for OllamaOptions {
    fn from(options: &ChatOptions) -> Self {
        Self {
            temperature: options.temperature,
            top_p: options.top_p,
            top_k: options.top_k,
            repeat_penalty: options.repeat_penalty,
            num_predict: options.max_output_tokens,
            num_ctx: options.context_window,
            stop: options.stop.iter().cloned().collect(),
        }
    }
}

/// One line of the streamed response.
#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<OllamaChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaChunkMessage {
    #[serde(default)]
    content: String,
}

//=========================================================================================
// NDJSON decoding
//=========================================================================================

/// Turns a body of newline-delimited chunks into text deltas.
///
/// Lines may be split across network reads; a partial line is buffered until its
/// newline arrives. The stream ends at the first `done` chunk.
fn decode_ndjson<S>(body: S) -> impl Stream<Item = PortResult<String>> + Send
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    async_stream::stream! {
        let mut body = Box::pin(body);
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let (line, at_eof) = match buffer.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    (line, false)
                }
                None => match body.next().await {
                    Some(Ok(bytes)) => {
                        buffer.extend_from_slice(&bytes);
                        continue;
                    }
                    Some(Err(e)) => {
                        error!("Error reading Ollama stream: {}", e);
                        yield Err(map_transport_error(&e));
                        return;
                    }
                    None => (std::mem::take(&mut buffer), true),
                },
            };

            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if !text.is_empty() {
                match serde_json::from_str::<OllamaChunk>(text) {
                    Ok(OllamaChunk { error: Some(message), .. }) => {
                        yield Err(PortError::Unavailable(message));
                        return;
                    }
                    Ok(chunk) => {
                        if let Some(message) = chunk.message {
                            if !message.content.is_empty() {
                                yield Ok(message.content);
                            }
                        }
                        if chunk.done {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to parse Ollama chunk: {}", e);
                        yield Err(PortError::InvalidResponse(format!("Malformed chunk: {e}")));
                        return;
                    }
                }
            }

            if at_eof {
                yield Err(PortError::InvalidResponse("Stream ended before done".to_string()));
                return;
            }
        }
    }
}

fn map_transport_error(e: &reqwest::Error) -> PortError {
    if e.is_timeout() {
        PortError::Timeout(e.to_string())
    } else if e.is_decode() {
        PortError::InvalidResponse(e.to_string())
    } else {
        PortError::Unavailable(e.to_string())
    }
}

//=========================================================================================
// `LlmService` Trait Implementation
//=========================================================================================

#[async_trait]
impl LlmService for OllamaAdapter {
    #[instrument(skip(self, messages, options), fields(model = %self.model, messages = messages.len()))]
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> PortResult<TextStream> {
        let request = OllamaRequest {
            model: &self.model,
            messages: messages.iter().map(OllamaMessage::from).collect(),
            stream: true,
            options: OllamaOptions::from(options),
        };
        debug!("Sending streaming chat request to Ollama");

        let response = self
            .client
            .post(self.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to reach Ollama at {}: {}", self.base_url, e);
                if e.is_connect() {
                    PortError::Unavailable(format!(
                        "Cannot connect to Ollama. Is the server running at {}?",
                        self.base_url
                    ))
                } else {
                    map_transport_error(&e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Ollama returned {}: {}", status, body);
            return Err(PortError::Unavailable(format!("Ollama returned {status}: {body}")));
        }

        Ok(Box::pin(decode_ndjson(response.bytes_stream())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn body(parts: &[&str]) -> impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static {
        let parts: Vec<reqwest::Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        stream::iter(parts)
    }

    async fn collect(parts: &[&str]) -> Vec<PortResult<String>> {
        decode_ndjson(body(parts)).collect().await
    }

    #[tokio::test]
    async fn joins_lines_split_across_reads() {
        let deltas = collect(&[
            "{\"message\":{\"content\":\"Guten\"},\"done\":false}\n{\"mess",
            "age\":{\"content\":\" Tag\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"\"},\"done\":true}\n",
            "{\"message\":{\"content\":\"ignored\"},\"done\":false}\n",
        ])
        .await;
        let text: Vec<String> = deltas.into_iter().map(Result::unwrap).collect();
        assert_eq!(text, vec!["Guten", " Tag"]);
    }

    #[tokio::test]
    async fn error_lines_and_garbage_fail_the_stream() {
        let deltas = collect(&["{\"error\":\"model not found\"}\n"]).await;
        assert_eq!(
            deltas,
            vec![Err(PortError::Unavailable("model not found".into()))]
        );

        let deltas = collect(&["not json\n"]).await;
        assert!(matches!(deltas[..], [Err(PortError::InvalidResponse(_))]));
    }

    #[tokio::test]
    async fn truncated_stream_is_invalid() {
        let deltas = collect(&["{\"message\":{\"content\":\"Hallo\"},\"done\":false}"]).await;
        assert_eq!(deltas[0], Ok("Hallo".to_string()));
        assert!(matches!(deltas[1], Err(PortError::InvalidResponse(_))));
    }

    #[test]
    fn options_map_onto_ollama_names() {
        let mut options = ChatOptions::default();
        options.stop.insert("Gast:".into());
        let json = serde_json::to_value(OllamaOptions::from(&options)).unwrap();
        assert_eq!(json["num_predict"], 256);
        assert_eq!(json["num_ctx"], 2048);
        assert_eq!(json["top_k"], 40);
        assert_eq!(json["stop"][0], "Gast:");
    }
}
