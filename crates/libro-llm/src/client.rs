//! Completion client - one reasoning call over a session transcript
//!
//! Providers stream loosely shaped deltas. The client folds a stream into
//! exactly one `Completion`: either a final answer or a non-empty batch of
//! tool calls, never both and never neither. Retries are not its business.

use crate::provider::{LlmError, LlmProvider, LlmResult};
use crate::types::{AccumulatedToolCall, ContentBlock, LlmContent, LlmMessage, LlmRequest, LlmTool, StreamDelta};
use futures::StreamExt;
use libro_core::{Turn, TurnContent, ToolCallRequest};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outcome of one reasoning call.
#[derive(Clone, Debug, PartialEq)]
pub enum Completion {
    FinalAnswer(String),
    ToolCalls(Vec<ToolCallRequest>),
}

pub struct LlmClient {
    provider: Arc<dyn LlmProvider>,
    model: String,
    system_prompt: Option<String>,
    max_tokens: u32,
    temperature: Option<f32>,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            system_prompt: None,
            max_tokens: 1024,
            temperature: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn build_request(&self, transcript: &[Turn], tools: &[LlmTool]) -> LlmRequest {
        LlmRequest {
            model: self.model.clone(),
            messages: transcript_to_messages(transcript),
            tools: if tools.is_empty() { None } else { Some(tools.to_vec()) },
            max_tokens: Some(self.max_tokens),
            temperature: self.temperature,
            system: self.system_prompt.clone(),
        }
    }

    /// `build_request` with `note` appended to the system prompt.
    pub fn build_request_with_note(
        &self,
        transcript: &[Turn],
        tools: &[LlmTool],
        note: Option<&str>,
    ) -> LlmRequest {
        let mut request = self.build_request(transcript, tools);
        if let Some(note) = note.filter(|n| !n.trim().is_empty()) {
            request.system = Some(match request.system.take() {
                Some(base) => format!("{}\n\n{}", base, note),
                None => note.to_string(),
            });
        }
        request
    }

    /// Run one reasoning call. Cancellation drops the provider stream and
    /// yields `LlmError::Cancelled`.
    pub async fn complete(
        &self,
        transcript: &[Turn],
        tools: &[LlmTool],
        cancel: CancellationToken,
    ) -> LlmResult<Completion> {
        self.complete_with_note(transcript, tools, None, cancel).await
    }

    /// `complete` with per-call context appended to the system prompt.
    pub async fn complete_with_note(
        &self,
        transcript: &[Turn],
        tools: &[LlmTool],
        note: Option<&str>,
        cancel: CancellationToken,
    ) -> LlmResult<Completion> {
        let request = self.build_request_with_note(transcript, tools, note);
        debug!(
            "llm request: provider={} model={} messages={}",
            self.provider.name(),
            request.model,
            request.messages.len()
        );

        let stream = self.provider.complete_stream(request, Some(cancel.clone())).await?;
        tokio::pin!(stream);

        let mut text = String::new();
        let mut calls: Vec<AccumulatedToolCall> = Vec::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                delta = stream.next() => match delta {
                    Some(Ok(StreamDelta::Text(t))) => text.push_str(&t),
                    Some(Ok(StreamDelta::ToolCallStart { id, name })) => {
                        calls.push(AccumulatedToolCall { id, name, arguments: String::new() });
                    }
                    Some(Ok(StreamDelta::ToolCallDelta { id, arguments })) => {
                        match calls.iter_mut().rev().find(|c| c.id == id) {
                            Some(call) => call.arguments.push_str(&arguments),
                            None => debug!("argument delta for unknown tool call {}", id),
                        }
                    }
                    Some(Ok(StreamDelta::ToolCallEnd { .. })) => {}
                    Some(Ok(StreamDelta::Done { stop_reason, .. })) => {
                        debug!("llm stream done: stop_reason={:?}", stop_reason);
                        break;
                    }
                    Some(Ok(StreamDelta::Error(e))) => return Err(LlmError::StreamError(e)),
                    Some(Err(e)) => return Err(e),
                    None => break,
                },
            }
        }

        into_completion(text, calls)
    }
}

/// Enforce the completion shape on whatever the provider produced.
pub(crate) fn into_completion(text: String, calls: Vec<AccumulatedToolCall>) -> LlmResult<Completion> {
    if !calls.is_empty() {
        if !text.trim().is_empty() {
            debug!("dropping {} chars of text that accompanied tool calls", text.len());
        }
        let mut seen = HashSet::new();
        let requests = calls
            .into_iter()
            .map(|call| {
                let id = if call.id.is_empty() || !seen.insert(call.id.clone()) {
                    let fresh = format!("call_{}", uuid::Uuid::new_v4().simple());
                    seen.insert(fresh.clone());
                    fresh
                } else {
                    call.id.clone()
                };
                // Unparseable arguments keep their raw text; validation reports them.
                match call.parse_arguments() {
                    Ok(arguments) => ToolCallRequest::new(id, call.name, arguments),
                    Err(_) => ToolCallRequest::unparsed(id, call.name, call.arguments),
                }
            })
            .collect();
        return Ok(Completion::ToolCalls(requests));
    }

    let answer = text.trim();
    if answer.is_empty() {
        return Err(LlmError::InvalidResponse(
            "completion had neither text nor tool calls".into(),
        ));
    }
    Ok(Completion::FinalAnswer(answer.to_string()))
}

/// Convert a transcript into provider messages. Consecutive tool results
/// are grouped into a single message after the call batch they answer.
pub fn transcript_to_messages(turns: &[Turn]) -> Vec<LlmMessage> {
    let mut messages: Vec<LlmMessage> = Vec::with_capacity(turns.len());

    for turn in turns {
        match &turn.content {
            TurnContent::Text { text } => messages.push(LlmMessage {
                role: turn.role.as_str().to_string(),
                content: LlmContent::Text(text.clone()),
            }),
            TurnContent::ToolCalls { calls } => messages.push(LlmMessage {
                role: "assistant".to_string(),
                content: LlmContent::Blocks(
                    calls
                        .iter()
                        .map(|c| ContentBlock::ToolUse {
                            id: c.id.clone(),
                            name: c.name.clone(),
                            input: c.arguments.clone(),
                            raw_input: c.raw_arguments.clone(),
                        })
                        .collect(),
                ),
            }),
            TurnContent::ToolResult { result } => {
                let block = ContentBlock::ToolResult {
                    tool_use_id: result.tool_call_id.clone(),
                    content: result.outcome.to_content_string(),
                    is_error: if result.is_error() { Some(true) } else { None },
                };
                let appended = match messages.last_mut() {
                    Some(LlmMessage { role, content: LlmContent::Blocks(blocks) })
                        if role.as_str() == "user"
                            && blocks.iter().any(|b| matches!(b, ContentBlock::ToolResult { .. })) =>
                    {
                        blocks.push(block.clone());
                        true
                    }
                    _ => false,
                };
                if !appended {
                    messages.push(LlmMessage {
                        role: "user".to_string(),
                        content: LlmContent::Blocks(vec![block]),
                    });
                }
            }
        }
    }

    messages
}
