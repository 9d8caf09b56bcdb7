//! OpenAI-compatible chat completions provider with SSE streaming

use crate::provider::{LlmError, LlmProvider, LlmResult, LlmStream};
use crate::types::{ContentBlock, LlmContent, LlmRequest, StreamDelta, Usage};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use libro_core::Secret;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiProvider {
    client: Client,
    api_key: Secret,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: Secret) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: OPENAI_API_URL.to_string(),
        }
    }

    /// Point at another OpenAI-compatible endpoint (full chat completions URL).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete_stream(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream> {
        let body = build_body(&request);
        debug!("OpenAI request: model={}", request.model);

        let send = self
            .client
            .post(&self.base_url)
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send();

        let response = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(LlmError::Cancelled),
                r = send => r?,
            },
            None => send.await?,
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs * 1000);
            let error_text = response.text().await.unwrap_or_default();
            error!("OpenAI error {}: {}", status, error_text);

            return Err(match status.as_u16() {
                401 | 403 => LlmError::AuthFailed(error_text),
                429 => LlmError::RateLimited {
                    retry_after_ms: retry_after_ms.unwrap_or(60_000),
                },
                _ => LlmError::RequestFailed(format!("{}: {}", status, error_text)),
            });
        }

        let mut events = response.bytes_stream().eventsource();
        let stream = async_stream::stream! {
            let mut parser = ChunkParser::default();
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(e) => e,
                    Err(e) => {
                        yield Err(LlmError::StreamError(e.to_string()));
                        return;
                    }
                };
                if event.data.trim() == "[DONE]" {
                    break;
                }
                match parser.feed(&event.data) {
                    Ok(deltas) => {
                        for delta in deltas {
                            yield Ok(delta);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
            for delta in parser.finish() {
                yield Ok(delta);
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Translate the provider-neutral request into the chat completions body.
pub(crate) fn build_body(request: &LlmRequest) -> Value {
    let mut messages: Vec<Value> = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system {
        messages.push(json!({ "role": "system", "content": system }));
    }

    for message in &request.messages {
        match &message.content {
            LlmContent::Text(text) => {
                messages.push(json!({ "role": message.role, "content": text }));
            }
            LlmContent::Blocks(blocks) => {
                let mut text = String::new();
                let mut tool_calls = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlock::Text { text: t } => text.push_str(t),
                        ContentBlock::ToolUse { id, name, input, raw_input } => {
                            let arguments = raw_input.clone().unwrap_or_else(|| input.to_string());
                            tool_calls.push(json!({
                                "id": id,
                                "type": "function",
                                "function": { "name": name, "arguments": arguments },
                            }));
                        }
                        ContentBlock::ToolResult { tool_use_id, content, .. } => {
                            messages.push(json!({
                                "role": "tool",
                                "tool_call_id": tool_use_id,
                                "content": content,
                            }));
                        }
                    }
                }
                if !tool_calls.is_empty() {
                    let content = if text.is_empty() { Value::Null } else { Value::String(text) };
                    messages.push(json!({
                        "role": "assistant",
                        "content": content,
                        "tool_calls": tool_calls,
                    }));
                } else if !text.is_empty() {
                    messages.push(json!({ "role": message.role, "content": text }));
                }
            }
        }
    }

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "stream": true,
        "stream_options": { "include_usage": true },
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
        body["tools"] = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect();
    }
    body
}

/// Turns streamed chat completion chunks into provider-neutral deltas.
/// Tool call fragments are keyed by their `index` in the chunk stream.
#[derive(Default)]
pub(crate) struct ChunkParser {
    ids_by_index: HashMap<u32, String>,
    open: Vec<String>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

impl ChunkParser {
    pub(crate) fn feed(&mut self, data: &str) -> LlmResult<Vec<StreamDelta>> {
        let chunk: ChatChunk = serde_json::from_str(data)
            .map_err(|e| LlmError::InvalidResponse(format!("bad chunk: {}", e)))?;

        if let Some(err) = chunk.error {
            return Err(LlmError::StreamError(err.message));
        }
        if let Some(u) = chunk.usage {
            self.usage = Some(Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            });
        }

        let mut deltas = Vec::new();
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                deltas.push(StreamDelta::Text(content));
            }
            for call in choice.delta.tool_calls.unwrap_or_default() {
                let function = call.function.unwrap_or_default();
                if let Some(id) = call.id {
                    self.ids_by_index.insert(call.index, id.clone());
                    self.open.push(id.clone());
                    deltas.push(StreamDelta::ToolCallStart {
                        id,
                        name: function.name.clone().unwrap_or_default(),
                    });
                }
                if let Some(arguments) = function.arguments.filter(|a| !a.is_empty()) {
                    match self.ids_by_index.get(&call.index) {
                        Some(id) => deltas.push(StreamDelta::ToolCallDelta {
                            id: id.clone(),
                            arguments,
                        }),
                        None => debug!("arguments for tool call index {} before its id", call.index),
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.stop_reason = Some(reason);
            }
        }
        Ok(deltas)
    }

    /// Close any open tool calls and emit the terminal delta.
    pub(crate) fn finish(&mut self) -> Vec<StreamDelta> {
        let mut deltas: Vec<StreamDelta> = self
            .open
            .drain(..)
            .map(|id| StreamDelta::ToolCallEnd { id })
            .collect();
        deltas.push(StreamDelta::Done {
            stop_reason: self.stop_reason.take(),
            usage: self.usage.take(),
        });
        deltas
    }
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<ChunkUsage>,
    error: Option<ChunkError>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<ChunkFunction>,
}

#[derive(Default, Deserialize)]
struct ChunkFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct ChunkUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct ChunkError {
    message: String,
}
