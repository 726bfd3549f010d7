//! OpenAI-compatible chat completions client
//!
//! Talks to `{base_url}/v1/chat/completions`, relays streamed deltas as they
//! arrive and asks the backend to append a usage frame so token accounting is
//! available once the stream ends.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ChatError;
use crate::model_runtime::runtime_trait::*;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<ChatDelta>,
}

#[derive(Debug, Deserialize)]
struct ChatDelta {
    content: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct ApiUsage {
    prompt_tokens: i64,
    completion_tokens: i64,
    total_tokens: i64,
}

impl ApiUsage {
    fn priced(self, pricing: &ModelPricing) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
            cost_usd: pricing.cost_usd(self.prompt_tokens, self.completion_tokens),
        }
    }
}

/// What one line of the event stream amounts to.
#[derive(Debug, PartialEq)]
pub(crate) enum SseLine {
    Skip,
    Done,
    Events(Vec<CompletionEvent>),
}

pub(crate) fn parse_sse_line(line: &str, pricing: &ModelPricing) -> Result<SseLine, ChatError> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        // blank keep-alives, comments, `event:` fields
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| ChatError::Model(format!("malformed stream chunk: {}", e)))?;
    let mut events: Vec<CompletionEvent> = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.and_then(|d| d.content))
        .filter(|text| !text.is_empty())
        .map(CompletionEvent::Delta)
        .collect();
    if let Some(usage) = chunk.usage {
        events.push(CompletionEvent::Usage(usage.priced(pricing)));
    }
    Ok(SseLine::Events(events))
}

/// Split a byte stream into lines and turn them into completion events.
fn sse_events<S, B>(
    byte_stream: S,
    pricing: ModelPricing,
) -> impl Stream<Item = Result<CompletionEvent, ChatError>> + Send
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    async_stream::try_stream! {
        // Raw bytes: a UTF-8 sequence may straddle two network chunks.
        let mut buffer: Vec<u8> = Vec::new();
        let mut done = false;
        futures_util::pin_mut!(byte_stream);
        'read: while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(ChatError::from)?;
            buffer.extend_from_slice(chunk.as_ref());
            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                let parsed = parse_sse_line(&String::from_utf8_lossy(&line), &pricing)?;
                match parsed {
                    SseLine::Skip => {}
                    SseLine::Done => {
                        done = true;
                        break 'read;
                    }
                    SseLine::Events(events) => {
                        for event in events {
                            yield event;
                        }
                    }
                }
            }
        }

        // A final `[DONE]` without a trailing newline still counts.
        if !done && parse_sse_line(&String::from_utf8_lossy(&buffer), &pricing)? == SseLine::Done {
            done = true;
        }
        if !done {
            Err::<(), ChatError>(ChatError::Model("model stream ended before [DONE]".to_string()))?;
        }
    }
}

pub struct OpenAiRuntime {
    base_url: String,
    api_key: Option<String>,
    pricing: ModelPricing,
    http_client: reqwest::Client,
}

impl OpenAiRuntime {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        pricing: ModelPricing,
        timeout: Duration,
    ) -> Result<Self, ChatError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {}", e)))?;
        info!("Model client initialized with backend: {}", base_url);
        Ok(Self {
            base_url,
            api_key,
            pricing,
            http_client,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    async fn post(&self, body: &ChatCompletionRequest<'_>) -> Result<reqwest::Response, ChatError> {
        let mut request = self.http_client.post(self.completions_url()).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Model(format!("model backend returned {}: {}", status, body)));
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiRuntime {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        options: &CompletionOptions,
    ) -> Result<CompletionStream, ChatError> {
        debug!(model = %options.model, turns = messages.len(), "starting streamed completion");
        let request = ChatCompletionRequest {
            model: &options.model,
            messages: &messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream: true,
            stream_options: Some(StreamOptions { include_usage: true }),
        };
        let response = self.post(&request).await?;
        Ok(Box::pin(sse_events(response.bytes_stream(), self.pricing)))
    }

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        options: &CompletionOptions,
    ) -> Result<Completion, ChatError> {
        debug!(model = %options.model, turns = messages.len(), "requesting completion");
        let request = ChatCompletionRequest {
            model: &options.model,
            messages: &messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream: false,
            stream_options: None,
        };
        let response = self.post(&request).await?;
        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ChatError::Model(format!("failed to parse model response: {}", e)))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();
        let usage = completion
            .usage
            .map(|u| u.priced(&self.pricing))
            .unwrap_or_default();
        Ok(Completion { content, usage })
    }
}
