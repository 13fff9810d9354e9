//! Streaming chat-completion client.
//!
//! Talks to an OpenAI-compatible `/chat/completions` endpoint with
//! `stream: true` and forwards the content deltas through a channel as
//! they arrive, so synthesis can start long before the reply is complete.

use std::env;

use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::{SpeechError, SpeechResult};

/// Default endpoint; any OpenAI-compatible gateway works.
pub const CHAT_ENDPOINT: &str = "https://api-inference.modelscope.cn/v1/chat/completions";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful voice assistant. Answer briefly and \
conversationally; your reply will be spoken aloud.";

/// Configuration for the chat client.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub system_prompt: String,
}

impl ChatConfig {
    /// Reads `VOXLOOP_CHAT_API_KEY` and `VOXLOOP_CHAT_MODEL` (both
    /// required), plus optional `VOXLOOP_CHAT_URL` and
    /// `VOXLOOP_CHAT_SYSTEM_PROMPT`.
    pub fn from_env() -> SpeechResult<Self> {
        let api_key = env::var("VOXLOOP_CHAT_API_KEY").map_err(|_| {
            SpeechError::Configuration("environment variable VOXLOOP_CHAT_API_KEY is not set".to_string())
        })?;
        let model = env::var("VOXLOOP_CHAT_MODEL").map_err(|_| {
            SpeechError::Configuration("environment variable VOXLOOP_CHAT_MODEL is not set".to_string())
        })?;
        Ok(Self {
            endpoint: env::var("VOXLOOP_CHAT_URL").unwrap_or_else(|_| CHAT_ENDPOINT.to_string()),
            api_key,
            model,
            system_prompt: env::var("VOXLOOP_CHAT_SYSTEM_PROMPT")
                .unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string()),
        })
    }
}

/// Streaming chat client.
pub struct ChatClient {
    client: reqwest::Client,
    config: ChatConfig,
}

impl ChatClient {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Sends `user_prompt` and returns a channel of content deltas.
    ///
    /// The channel closes when the model signals `[DONE]` or the stream
    /// ends. A non-success HTTP status is a [`SpeechError::Protocol`]
    /// with the response body preserved.
    pub async fn stream_reply(
        &self,
        user_prompt: &str,
    ) -> SpeechResult<mpsc::UnboundedReceiver<String>> {
        let body = json!({
            "model": self.config.model,
            "stream": true,
            "messages": [
                {"role": "system", "content": self.config.system_prompt},
                {"role": "user", "content": format!("'''{user_prompt}'''")},
            ],
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SpeechError::Transport(format!("chat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SpeechError::Protocol {
                code: i64::from(status.as_u16()),
                message: detail,
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_deltas(response, tx));
        Ok(rx)
    }
}

/// One server-sent chunk of a streamed completion.
#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

async fn forward_deltas(response: reqwest::Response, deltas: mpsc::UnboundedSender<String>) {
    let mut stream = response.bytes_stream();
    let mut pending = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "chat stream interrupted");
                return;
            }
        };
        pending.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(newline) = pending.find('\n') {
            let line = pending[..newline].trim().to_string();
            pending.drain(..=newline);
            match parse_sse_line(&line) {
                SseEvent::Delta(content) => {
                    if deltas.send(content).is_err() {
                        return; // receiver gone, stop reading
                    }
                }
                SseEvent::Done => return,
                SseEvent::Skip => {}
            }
        }
    }
}

enum SseEvent {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseEvent {
    let Some(data) = line.strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseEvent::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            let content = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content)
                .unwrap_or_default();
            if content.is_empty() {
                SseEvent::Skip
            } else {
                SseEvent::Delta(content)
            }
        }
        Err(e) => {
            debug!(error = %e, line, "skipping unparseable stream line");
            SseEvent::Skip
        }
    }
}
