//! remember_preferences - record what the reader likes
//!
//! The tool itself only normalizes what the model extracted from the
//! conversation. The agent merges a successful result into the session's
//! preferences.

use crate::registry::{Tool, ToolName};
use crate::schema::{ParamSchema, ParamSpec};
use libro_core::{FailureKind, ReaderPreferences, ToolOutcome};
use serde_json::{json, Value};

pub struct RememberPreferencesTool {
    schema: ParamSchema,
}

impl RememberPreferencesTool {
    pub fn new() -> Self {
        let schema = ParamSchema::new()
            .param(ParamSpec::string("genres", "Comma-separated genres the reader enjoys"))
            .param(ParamSpec::string("authors", "Comma-separated authors the reader likes"))
            .param(ParamSpec::string("books", "Comma-separated titles the reader mentioned"));
        Self { schema }
    }
}

impl Default for RememberPreferencesTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Tool for RememberPreferencesTool {
    fn name(&self) -> ToolName {
        ToolName::RememberPreferences
    }

    fn description(&self) -> &str {
        "Remember reading preferences the reader just stated (genres, authors, books). \
         Call it whenever they reveal what they like; known preferences are shown to you \
         on every later turn."
    }

    fn schema(&self) -> &ParamSchema {
        &self.schema
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let list = |field: &str| args[field].as_str().unwrap_or_default().to_string();
        let prefs = ReaderPreferences::from_lists(&list("genres"), &list("authors"), &list("books"));
        if prefs.is_empty() {
            return ToolOutcome::failed(
                FailureKind::Validation,
                "nothing to remember: give at least one of genres, authors or books",
            );
        }
        ToolOutcome::success(json!(prefs))
    }
}
