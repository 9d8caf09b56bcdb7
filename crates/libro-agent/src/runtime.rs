//! Agent runtime - session-scoped turns over the state machine

use crate::machine::{AgentState, TurnMachine};
use crate::session::{SessionKey, SessionStore};
use libro_core::{AgentSettings, BusyPolicy, Error, Result, Turn};
use libro_llm::{LlmClient, LlmTool};
use libro_tools::ToolRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone, Debug)]
pub enum AgentEvent {
    StateChanged {
        from: AgentState,
        to: AgentState,
    },
    ToolExecuting {
        id: String,
        name: String,
    },
    ToolResult {
        id: String,
        name: String,
        result: String,
        is_error: bool,
    },
    Done {
        reply: String,
    },
    Error(String),
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub max_iterations: usize,
    pub llm_timeout: Duration,
    pub tool_timeout: Duration,
    pub llm_retry_backoff: Duration,
    pub busy_policy: BusyPolicy,
    pub session_idle_ttl: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from(&AgentSettings::default())
    }
}

impl From<&AgentSettings> for AgentConfig {
    fn from(s: &AgentSettings) -> Self {
        Self {
            max_iterations: s.max_iterations,
            llm_timeout: Duration::from_millis(s.llm_timeout_ms),
            tool_timeout: Duration::from_millis(s.tool_timeout_ms),
            llm_retry_backoff: Duration::from_millis(s.llm_retry_backoff_ms),
            busy_policy: s.busy_policy,
            session_idle_ttl: Duration::from_secs(s.session_idle_ttl_secs),
        }
    }
}

pub struct AgentRuntime {
    client: LlmClient,
    tools: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    config: AgentConfig,
}

impl AgentRuntime {
    pub fn new(client: LlmClient, tools: ToolRegistry, config: AgentConfig) -> Self {
        Self::with_sessions(client, tools, Arc::new(SessionStore::new()), config)
    }

    pub fn with_sessions(
        client: LlmClient,
        tools: ToolRegistry,
        sessions: Arc<SessionStore>,
        config: AgentConfig,
    ) -> Self {
        Self {
            client,
            tools: Arc::new(tools),
            sessions,
            config,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }
    pub fn tool_definitions(&self) -> Vec<LlmTool> {
        self.tools.definitions()
    }
    pub fn client(&self) -> &LlmClient {
        &self.client
    }
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run one user turn and return the assistant's answer.
    pub async fn submit(&self, session_key: &SessionKey, text: &str) -> Result<String> {
        self.run_turn(session_key, text, None, CancellationToken::new())
            .await
    }

    pub async fn submit_cancellable(
        &self,
        session_key: &SessionKey,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<String> {
        self.run_turn(session_key, text, None, cancel).await
    }

    /// Run a turn with cancellation support and optional progress events.
    ///
    /// When `cancel` is triggered:
    /// - The in-flight LLM call is dropped
    /// - No further tools are scheduled; running ones finish detached
    /// - Nothing uncommitted reaches the transcript
    /// - The turn returns `Error::Cancelled`
    pub async fn run_turn(
        &self,
        session_key: &SessionKey,
        text: &str,
        events: Option<mpsc::Sender<AgentEvent>>,
        cancel: CancellationToken,
    ) -> Result<String> {
        let entry = self.sessions.get_or_create(session_key);

        let _guard = match self.config.busy_policy {
            BusyPolicy::Reject => entry
                .try_begin_turn()
                .ok_or_else(|| Error::Busy(session_key.clone()))?,
            BusyPolicy::Queue => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                guard = entry.begin_turn() => guard,
            },
        };

        let generation = entry.append(Turn::user(text)).await;
        info!("Turn started: session={}", session_key);

        let mut machine = TurnMachine::new(
            &self.client,
            Arc::clone(&self.tools),
            &self.config,
            Arc::clone(&entry),
            generation,
            cancel,
            events,
        );
        let result = machine.run().await;

        match &result {
            Ok(_) => info!(
                "Turn complete: session={}, llm_calls={}, turns={}",
                session_key,
                machine.llm_calls(),
                entry.turn_count().await
            ),
            Err(e) => info!(
                "Turn ended: session={}, llm_calls={}, error={}",
                session_key,
                machine.llm_calls(),
                e
            ),
        }
        result
    }
}
