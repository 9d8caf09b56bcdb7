//! Error types for LibroRecomienda

use crate::types::SessionKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("llm error: {provider} - {message}")]
    LlmError { provider: String, message: String },

    #[error("iteration budget exceeded after {limit} llm calls")]
    BudgetExceeded { limit: usize },

    #[error("session busy: {0}")]
    Busy(SessionKey),

    #[error("turn cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn llm_error(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmError {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Failures that end a turn with a fallback message shown to the user.
    /// Everything else is either absorbed by the loop or a caller concern.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Self::LlmError { .. } | Self::BudgetExceeded { .. })
    }

    /// Text handed back to the chat surface in place of an answer.
    pub fn user_message(&self) -> String {
        match self {
            Self::BudgetExceeded { .. } => "Sorry, I couldn't finish looking into that. \
                Could you rephrase the request or narrow it down a little?"
                .to_string(),
            Self::LlmError { .. } => "Sorry, I had a problem processing your request. \
                Please try again in a moment."
                .to_string(),
            Self::Busy(_) => "I'm still working on your previous message. \
                Please wait for it to finish."
                .to_string(),
            Self::Cancelled => "The request was cancelled.".to_string(),
            other => format!("Something went wrong: {}", other),
        }
    }
}

/// Tool arguments that do not satisfy the tool's declared parameters.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("invalid arguments for {tool}: {}", join_problems(.problems))]
pub struct ValidationError {
    pub tool: String,
    pub problems: Vec<FieldProblem>,
}

impl ValidationError {
    pub fn new(tool: impl Into<String>, problems: Vec<FieldProblem>) -> Self {
        Self {
            tool: tool.into(),
            problems,
        }
    }

    /// Names of the fields involved, in the order they were reported.
    pub fn fields(&self) -> Vec<&str> {
        self.problems.iter().filter_map(FieldProblem::field).collect()
    }
}

/// A single reason a set of arguments was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "problem", rename_all = "snake_case")]
pub enum FieldProblem {
    NotAnObject { found: String },
    Missing { field: String },
    WrongType { field: String, expected: String, found: String },
    OutOfRange { field: String, value: i64, min: Option<i64>, max: Option<i64> },
}

impl FieldProblem {
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::NotAnObject { .. } => None,
            Self::Missing { field }
            | Self::WrongType { field, .. }
            | Self::OutOfRange { field, .. } => Some(field),
        }
    }
}

impl std::fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject { found } => write!(f, "arguments must be a JSON object, got {}", found),
            Self::Missing { field } => write!(f, "missing required field `{}`", field),
            Self::WrongType { field, expected, found } => {
                write!(f, "field `{}` must be {}, got {}", field, expected, found)
            }
            Self::OutOfRange { field, value, min, max } => {
                write!(f, "field `{}` is {}", field, value)?;
                match (min, max) {
                    (Some(lo), Some(hi)) => write!(f, ", expected {}..={}", lo, hi),
                    (Some(lo), None) => write!(f, ", expected at least {}", lo),
                    (None, Some(hi)) => write!(f, ", expected at most {}", hi),
                    (None, None) => Ok(()),
                }
            }
        }
    }
}

fn join_problems(problems: &[FieldProblem]) -> String {
    problems
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
