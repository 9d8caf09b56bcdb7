//! Core types for LibroRecomienda

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Session identifier - cheaply cloneable
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct SessionKey(Arc<str>);

impl SessionKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    /// A fresh random key, for callers that do not bring their own id.
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<SessionKey> for String {
    fn from(key: SessionKey) -> Self {
        key.0.to_string()
    }
}

/// Who produced a turn
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Arguments as produced by the model. Not guaranteed to be an object
    /// until the registry has validated them.
    pub arguments: Value,
    /// The model's argument text when it was not valid JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_arguments: Option<String>,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            raw_arguments: None,
        }
    }

    /// A call whose argument text could not be parsed. The text is kept
    /// verbatim so it can be replayed to the provider unchanged.
    pub fn unparsed(id: impl Into<String>, name: impl Into<String>, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self {
            id: id.into(),
            name: name.into(),
            arguments: Value::String(raw.clone()),
            raw_arguments: Some(raw),
        }
    }

    /// Argument text as the provider originally sent it.
    pub fn arguments_text(&self) -> String {
        self.raw_arguments
            .clone()
            .unwrap_or_else(|| self.arguments.to_string())
    }
}

/// Why a tool call produced no data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    UnknownTool,
    Tool,
    Timeout,
}

/// What a tool call produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { data: Value },
    /// The lookup ran fine but the thing asked for does not exist.
    NotFound { message: String },
    Failed { kind: FailureKind, message: String },
}

impl ToolOutcome {
    pub fn success(data: Value) -> Self {
        Self::Success { data }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Payload shown to the model for this outcome.
    pub fn to_payload(&self) -> Value {
        match self {
            Self::Success { data } => data.clone(),
            Self::NotFound { message } => json!({ "not_found": message }),
            Self::Failed { kind, message } => json!({ "error": message, "kind": kind }),
        }
    }

    pub fn to_content_string(&self) -> String {
        serde_json::to_string(&self.to_payload()).unwrap_or_default()
    }
}

impl From<ValidationError> for ToolOutcome {
    fn from(err: ValidationError) -> Self {
        Self::failed(FailureKind::Validation, err.to_string())
    }
}

/// The answer to exactly one ToolCallRequest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn new(request: &ToolCallRequest, outcome: ToolOutcome) -> Self {
        Self {
            tool_call_id: request.id.clone(),
            name: request.name.clone(),
            outcome,
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_error()
    }
}

/// Content of a single transcript turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnContent {
    Text { text: String },
    ToolCalls { calls: Vec<ToolCallRequest> },
    ToolResult { result: ToolResult },
}

/// One unit of a session transcript.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: TurnContent,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self::now(Role::User, TurnContent::Text { text: text.into() }, None)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::now(Role::Assistant, TurnContent::Text { text: text.into() }, None)
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self::now(Role::Assistant, TurnContent::ToolCalls { calls }, None)
    }

    pub fn tool_result(result: ToolResult) -> Self {
        let id = result.tool_call_id.clone();
        Self::now(Role::Tool, TurnContent::ToolResult { result }, Some(id))
    }

    fn now(role: Role, content: TurnContent, tool_call_id: Option<String>) -> Self {
        Self {
            role,
            content,
            timestamp: Utc::now(),
            tool_call_id,
        }
    }

    /// Plain text of a user or assistant message, if this is one.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            TurnContent::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_calls(&self) -> Option<&[ToolCallRequest]> {
        match &self.content {
            TurnContent::ToolCalls { calls } => Some(calls),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResult> {
        match &self.content {
            TurnContent::ToolResult { result } => Some(result),
            _ => None,
        }
    }

    pub fn to_record(&self) -> TranscriptRecord {
        TranscriptRecord::from(self)
    }
}

/// Flat export shape of a turn, for diagnostics and UI replay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub role: Role,
    pub content: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl From<&Turn> for TranscriptRecord {
    fn from(turn: &Turn) -> Self {
        let content = match &turn.content {
            TurnContent::Text { text } => Value::String(text.clone()),
            TurnContent::ToolCalls { calls } => serde_json::to_value(calls).unwrap_or_default(),
            TurnContent::ToolResult { result } => json!({
                "name": result.name,
                "is_error": result.is_error(),
                "payload": result.outcome.to_payload(),
            }),
        };
        Self {
            role: turn.role,
            content,
            timestamp: turn.timestamp,
            tool_call_id: turn.tool_call_id.clone(),
        }
    }
}

/// Ids of tool calls in `turns` that have no matching result, in request order.
pub fn orphan_tool_calls(turns: &[Turn]) -> Vec<String> {
    let answered: HashSet<&str> = turns
        .iter()
        .filter_map(|t| t.as_tool_result())
        .map(|r| r.tool_call_id.as_str())
        .collect();
    turns
        .iter()
        .filter_map(|t| t.as_tool_calls())
        .flatten()
        .filter(|c| !answered.contains(c.id.as_str()))
        .map(|c| c.id.clone())
        .collect()
}

/// Read-only search projection of a catalog book.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookSummary {
    pub id: i64,
    pub title: String,
    pub author: Option<String>,
    pub genre: Option<String>,
    pub average_rating: Option<f64>,
}

/// Full catalog record of a book.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookDetail {
    pub id: i64,
    pub title: String,
    pub author: Option<String>,
    pub genre: Option<String>,
    pub average_rating: Option<f64>,
    pub description: Option<String>,
    pub cover_image_url: Option<String>,
    pub isbn: Option<String>,
}

impl BookDetail {
    pub fn summary(&self) -> BookSummary {
        BookSummary {
            id: self.id,
            title: self.title.clone(),
            author: self.author.clone(),
            genre: self.genre.clone(),
            average_rating: self.average_rating,
        }
    }
}

/// What a reader has told us they like. Lives for the session only.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderPreferences {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred_genres: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub liked_authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentioned_books: Vec<String>,
}

impl ReaderPreferences {
    /// Build from comma-separated lists, as a tool receives them.
    pub fn from_lists(genres: &str, authors: &str, books: &str) -> Self {
        let mut prefs = Self::default();
        prefs.merge(&Self {
            preferred_genres: split_list(genres),
            liked_authors: split_list(authors),
            mentioned_books: split_list(books),
        });
        prefs
    }

    pub fn is_empty(&self) -> bool {
        self.preferred_genres.is_empty()
            && self.liked_authors.is_empty()
            && self.mentioned_books.is_empty()
    }

    /// Add everything in `other` not already known. Values are trimmed,
    /// blanks dropped, and duplicates compared ignoring case. Returns whether
    /// anything was added.
    pub fn merge(&mut self, other: &ReaderPreferences) -> bool {
        let mut changed = false;
        for (mine, theirs) in [
            (&mut self.preferred_genres, &other.preferred_genres),
            (&mut self.liked_authors, &other.liked_authors),
            (&mut self.mentioned_books, &other.mentioned_books),
        ] {
            for value in theirs {
                let value = value.trim();
                let folded = value.to_lowercase();
                if value.is_empty() || mine.iter().any(|m| m.to_lowercase() == folded) {
                    continue;
                }
                mine.push(value.to_string());
                changed = true;
            }
        }
        changed
    }

    /// The question to ask next while preferences are still thin: genres
    /// first, then authors. `None` once both are known.
    pub fn next_question(&self) -> Option<&'static str> {
        if self.preferred_genres.is_empty() {
            Some("Which genres of books do you enjoy most?")
        } else if self.liked_authors.is_empty() {
            Some("Do you have any favourite authors?")
        } else {
            None
        }
    }

    /// Context appended to the system prompt for every reasoning call.
    pub fn prompt_note(&self) -> String {
        let mut note = String::from("Reader preferences known so far:");
        if self.is_empty() {
            note.push_str(" none.");
        }
        for (label, values) in [
            ("genres", &self.preferred_genres),
            ("authors", &self.liked_authors),
            ("books mentioned", &self.mentioned_books),
        ] {
            if !values.is_empty() {
                note.push_str(&format!("\n- {}: {}", label, values.join(", ")));
            }
        }
        if let Some(question) = self.next_question() {
            note.push_str(&format!(
                "\nIf the reader has not said what they like, ask before recommending, e.g. \"{}\"",
                question
            ));
        }
        note
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
