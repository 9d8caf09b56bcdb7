//! Turn state machine
//!
//! One `TurnMachine` drives one user turn through the reasoning/tool loop:
//!
//! ```text
//! AwaitingUserInput -> CallingLlm -> ExecutingTool -> CallingLlm -> ...
//!                                 -> EmittingResponse -> Done
//!                       (any failure)              -> Failed
//! Done | Failed -> AwaitingUserInput
//! ```
//!
//! The transcript only ever grows by whole units: the user message when the
//! turn starts, a tool-call batch together with all of its results, and the
//! final answer. Anything in flight when the turn fails or is cancelled is
//! dropped.
//!
//! Preferences the model records with `remember_preferences` are merged into
//! the session together with the batch that recorded them, and every
//! reasoning call sees the current set in its system prompt.

use crate::runtime::{AgentConfig, AgentEvent};
use crate::session::SessionEntry;
use futures::future::join_all;
use libro_core::{
    Error, FailureKind, ReaderPreferences, Result, ToolCallRequest, ToolOutcome, ToolResult, Turn,
};
use libro_llm::{Completion, LlmClient, LlmError, LlmTool};
use libro_tools::{ToolName, ToolRegistry};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    AwaitingUserInput,
    CallingLlm,
    ExecutingTool,
    EmittingResponse,
    Done,
    Failed,
}

impl AgentState {
    pub fn can_transition_to(self, next: AgentState) -> bool {
        use AgentState::*;
        matches!(
            (self, next),
            (AwaitingUserInput, CallingLlm)
                | (CallingLlm, ExecutingTool)
                | (CallingLlm, EmittingResponse)
                | (CallingLlm, Failed)
                | (ExecutingTool, CallingLlm)
                | (ExecutingTool, Failed)
                | (EmittingResponse, Done)
                | (EmittingResponse, Failed)
                | (Done, AwaitingUserInput)
                | (Failed, AwaitingUserInput)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AgentState::Done | AgentState::Failed)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AwaitingUserInput => "AWAITING_USER_INPUT",
            Self::CallingLlm => "CALLING_LLM",
            Self::ExecutingTool => "EXECUTING_TOOL",
            Self::EmittingResponse => "EMITTING_RESPONSE",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

pub struct TurnMachine<'a> {
    client: &'a LlmClient,
    tools: Arc<ToolRegistry>,
    config: &'a AgentConfig,
    entry: Arc<SessionEntry>,
    generation: u64,
    cancel: CancellationToken,
    events: Option<mpsc::Sender<AgentEvent>>,
    definitions: Vec<LlmTool>,
    /// Whether the model can record preferences, and so should see them.
    tracks_preferences: bool,
    state: AgentState,
    llm_calls: usize,
    pending: Vec<ToolCallRequest>,
    answer: Option<String>,
}

impl<'a> TurnMachine<'a> {
    /// `generation` is the transcript generation the user turn was appended in.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: &'a LlmClient,
        tools: Arc<ToolRegistry>,
        config: &'a AgentConfig,
        entry: Arc<SessionEntry>,
        generation: u64,
        cancel: CancellationToken,
        events: Option<mpsc::Sender<AgentEvent>>,
    ) -> Self {
        let definitions = tools.definitions();
        let tracks_preferences = tools.get(ToolName::RememberPreferences.as_str()).is_some();
        Self {
            client,
            tools,
            config,
            entry,
            generation,
            cancel,
            events,
            definitions,
            tracks_preferences,
            state: AgentState::AwaitingUserInput,
            llm_calls: 0,
            pending: Vec::new(),
            answer: None,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Provider calls made so far, retries included.
    pub fn llm_calls(&self) -> usize {
        self.llm_calls
    }

    /// Drive the turn to completion. The machine always ends back in
    /// `AwaitingUserInput`.
    pub async fn run(&mut self) -> Result<String> {
        let outcome = self.drive().await;
        if self.state.can_transition_to(AgentState::Failed) {
            self.transition(AgentState::Failed).await?;
        }
        if self.state.is_terminal() {
            self.transition(AgentState::AwaitingUserInput).await?;
        }
        outcome
    }

    async fn drive(&mut self) -> Result<String> {
        self.transition(AgentState::CallingLlm).await?;
        loop {
            match self.state {
                AgentState::CallingLlm => match self.call_llm().await {
                    Ok(Completion::ToolCalls(calls)) => {
                        self.pending = calls;
                        self.transition(AgentState::ExecutingTool).await?;
                    }
                    Ok(Completion::FinalAnswer(text)) => {
                        self.answer = Some(text);
                        self.transition(AgentState::EmittingResponse).await?;
                    }
                    Err(e) => return self.fail(e).await,
                },
                AgentState::ExecutingTool => match self.execute_tools().await {
                    Ok(()) => self.transition(AgentState::CallingLlm).await?,
                    Err(e) => return self.fail(e).await,
                },
                AgentState::EmittingResponse => {
                    let text = self.answer.take().unwrap_or_default();
                    if !self.entry.commit(self.generation, vec![Turn::assistant(text.clone())]).await {
                        return self.fail(Error::Cancelled).await;
                    }
                    self.transition(AgentState::Done).await?;
                    self.emit(AgentEvent::Done { reply: text.clone() }).await;
                    return Ok(text);
                }
                other => {
                    return Err(Error::Internal(format!("turn loop entered {}", other)));
                }
            }
        }
    }

    async fn fail(&mut self, err: Error) -> Result<String> {
        self.transition(AgentState::Failed).await?;
        let message = if err.is_user_visible() {
            err.user_message()
        } else {
            err.to_string()
        };
        self.emit(AgentEvent::Error(message)).await;
        Err(err)
    }

    async fn transition(&mut self, next: AgentState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::Internal(format!(
                "illegal transition {} -> {}",
                self.state, next
            )));
        }
        debug!("session {}: {} -> {}", self.entry.key(), self.state, next);
        let from = self.state;
        self.state = next;
        self.entry.set_state(next);
        self.emit(AgentEvent::StateChanged { from, to: next }).await;
        Ok(())
    }

    async fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    /// One reasoning call with a single retry. Every attempt counts against
    /// `max_iterations`.
    async fn call_llm(&mut self) -> Result<Completion> {
        let mut last_error = String::new();

        for attempt in 0..2 {
            if self.llm_calls >= self.config.max_iterations {
                warn!(
                    "session {}: iteration budget of {} exhausted",
                    self.entry.key(),
                    self.config.max_iterations
                );
                return Err(Error::BudgetExceeded {
                    limit: self.config.max_iterations,
                });
            }
            if attempt > 0 {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(self.config.llm_retry_backoff) => {}
                }
            }
            if self.cancel.is_cancelled() || self.entry.generation().await != self.generation {
                return Err(Error::Cancelled);
            }

            self.llm_calls += 1;
            let transcript = self.entry.history().await;
            let note = if self.tracks_preferences {
                Some(self.entry.preferences().await.prompt_note())
            } else {
                None
            };
            let call = self.client.complete_with_note(
                &transcript,
                &self.definitions,
                note.as_deref(),
                self.cancel.child_token(),
            );

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                r = tokio::time::timeout(self.config.llm_timeout, call) => r,
            };

            match result {
                Ok(Ok(completion)) => return Ok(completion),
                Ok(Err(LlmError::Cancelled)) => return Err(Error::Cancelled),
                Ok(Err(e)) => {
                    warn!("LLM call {} failed: {}", self.llm_calls, e);
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(
                        "LLM call {} timed out after {:?}",
                        self.llm_calls, self.config.llm_timeout
                    );
                    last_error = format!("timed out after {:?}", self.config.llm_timeout);
                }
            }
        }

        Err(Error::llm_error(self.client.provider_name(), last_error))
    }

    /// Run the pending batch, one task per call, and commit it with its
    /// results once every result exists.
    async fn execute_tools(&mut self) -> Result<()> {
        let calls = std::mem::take(&mut self.pending);
        let mut handles = Vec::with_capacity(calls.len());

        for call in &calls {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.emit(AgentEvent::ToolExecuting {
                id: call.id.clone(),
                name: call.name.clone(),
            })
            .await;

            let tools = Arc::clone(&self.tools);
            let request = call.clone();
            let limit = self.config.tool_timeout;
            handles.push(tokio::spawn(async move {
                match tokio::time::timeout(limit, tools.dispatch(&request)).await {
                    Ok(result) => result,
                    Err(_) => ToolResult::new(
                        &request,
                        ToolOutcome::failed(
                            FailureKind::Timeout,
                            format!("{} timed out after {}ms", request.name, limit.as_millis()),
                        ),
                    ),
                }
            }));
        }

        // Dropping the handles on cancel detaches the tasks; their results are discarded.
        let joined = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            joined = join_all(handles) => joined,
        };

        let mut results = Vec::with_capacity(calls.len());
        for (call, joined) in calls.iter().zip(joined) {
            let result = joined.unwrap_or_else(|e| {
                warn!("tool task for {} ended abnormally: {}", call.name, e);
                ToolResult::new(
                    call,
                    ToolOutcome::failed(FailureKind::Tool, format!("tool task failed: {}", e)),
                )
            });
            self.emit(AgentEvent::ToolResult {
                id: result.tool_call_id.clone(),
                name: result.name.clone(),
                result: result.outcome.to_content_string(),
                is_error: result.is_error(),
            })
            .await;
            results.push(result);
        }

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let learned = learned_preferences(&results);
        let mut batch = Vec::with_capacity(results.len() + 1);
        batch.push(Turn::tool_calls(calls));
        batch.extend(results.into_iter().map(Turn::tool_result));
        if !self
            .entry
            .commit_with(self.generation, batch, learned.as_ref())
            .await
        {
            return Err(Error::Cancelled);
        }
        if let Some(learned) = learned {
            info!("session {}: reader stated {:?}", self.entry.key(), learned);
        }
        Ok(())
    }
}

/// Preferences recorded by successful `remember_preferences` calls in a batch.
fn learned_preferences(results: &[ToolResult]) -> Option<ReaderPreferences> {
    let mut learned = ReaderPreferences::default();
    for result in results {
        if result.name != ToolName::RememberPreferences.as_str() {
            continue;
        }
        if let ToolOutcome::Success { data } = &result.outcome {
            match serde_json::from_value::<ReaderPreferences>(data.clone()) {
                Ok(prefs) => {
                    learned.merge(&prefs);
                }
                Err(e) => warn!("unreadable preferences from {}: {}", result.tool_call_id, e),
            }
        }
    }
    (!learned.is_empty()).then_some(learned)
}
