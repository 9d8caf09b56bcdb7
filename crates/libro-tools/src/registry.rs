//! Tool registry and trait definitions
//!
//! The set of tools is closed: every tool has a `ToolName`. Arguments are
//! validated against the tool's `ParamSchema` before `execute` ever runs, so
//! handlers only see normalized input.

use crate::schema::ParamSchema;
use libro_core::{Error, FailureKind, ToolCallRequest, ToolOutcome, ToolResult};
use libro_llm::LlmTool;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Names of the tools the agent may call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ToolName {
    SearchBooks,
    GetBookDetails,
    RecommendBooks,
    RememberPreferences,
}

impl ToolName {
    pub const ALL: [ToolName; 4] = [
        ToolName::SearchBooks,
        ToolName::GetBookDetails,
        ToolName::RecommendBooks,
        ToolName::RememberPreferences,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SearchBooks => "search_books",
            Self::GetBookDetails => "get_book_details",
            Self::RecommendBooks => "recommend_books",
            Self::RememberPreferences => "remember_preferences",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|n| n.as_str() == s)
            .ok_or_else(|| Error::UnknownTool(s.to_string()))
    }
}

/// The Tool trait: one catalog capability exposed to the model.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> ToolName;

    /// Human-readable description sent to the LLM.
    fn description(&self) -> &str;

    fn schema(&self) -> &ParamSchema;

    /// Run with arguments already validated by `schema()`.
    async fn execute(&self, args: Value) -> ToolOutcome;

    /// Convert to the LLM tool definition format.
    fn to_llm_tool(&self) -> LlmTool {
        LlmTool {
            name: self.name().as_str().to_string(),
            description: self.description().to_string(),
            input_schema: self.schema().to_json_schema(),
        }
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<ToolName, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let name = ToolName::from_str(name).ok()?;
        self.tools.get(&name).cloned()
    }

    /// Resolve the tool and validate `args` against its schema. Returns the
    /// normalized arguments.
    pub fn validate(&self, name: &str, args: &Value) -> Result<Value, Error> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::UnknownTool(name.to_string()))?;
        Ok(tool.schema().validate(name, args)?)
    }

    /// Validate then execute. Never fails: every outcome is a `ToolResult`.
    pub async fn dispatch(&self, request: &ToolCallRequest) -> ToolResult {
        let outcome = match self.validate(&request.name, &request.arguments) {
            Ok(args) => match self.get(&request.name) {
                Some(tool) => {
                    debug!("Executing tool: {} ({})", request.name, request.id);
                    tool.execute(args).await
                }
                None => unknown(&request.name),
            },
            Err(Error::Validation(err)) => {
                warn!("Rejected arguments for {}: {}", request.name, err);
                ToolOutcome::from(err)
            }
            Err(Error::UnknownTool(name)) => {
                warn!("Model requested unknown tool: {}", name);
                unknown(&name)
            }
            Err(other) => ToolOutcome::failed(FailureKind::Tool, other.to_string()),
        };
        ToolResult::new(request, outcome)
    }

    /// Get LLM tool definitions, in stable name order.
    pub fn definitions(&self) -> Vec<LlmTool> {
        self.tools.values().map(|t| t.to_llm_tool()).collect()
    }

    pub fn list(&self) -> Vec<&'static str> {
        self.tools.keys().map(|n| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn unknown(name: &str) -> ToolOutcome {
    ToolOutcome::failed(FailureKind::UnknownTool, format!("unknown tool: {}", name))
}
