//! search_books - keyword search over the catalog

use crate::catalog::{CatalogBridge, SearchQuery};
use crate::registry::{Tool, ToolName};
use crate::schema::{ParamSchema, ParamSpec};
use libro_core::ToolOutcome;
use serde_json::{json, Value};

pub const DEFAULT_LIMIT: i64 = 5;
pub const MAX_LIMIT: i64 = 50;

pub struct SearchBooksTool {
    bridge: CatalogBridge,
    schema: ParamSchema,
}

impl SearchBooksTool {
    pub fn new(bridge: CatalogBridge) -> Self {
        let schema = ParamSchema::new()
            .param(
                ParamSpec::string("query", "Keywords matched against title, author or genre")
                    .required(),
            )
            .param(
                ParamSpec::integer("limit", "Maximum number of books to return")
                    .default_value(json!(DEFAULT_LIMIT))
                    .range(Some(1), Some(MAX_LIMIT)),
            )
            .param(ParamSpec::string("genre", "Only books whose genre contains this"))
            .param(ParamSpec::string("author", "Only books whose author contains this"));
        Self { bridge, schema }
    }
}

#[async_trait::async_trait]
impl Tool for SearchBooksTool {
    fn name(&self) -> ToolName {
        ToolName::SearchBooks
    }

    fn description(&self) -> &str {
        "Search the book catalog. Returns up to `limit` books (id, title, author, genre, \
         average_rating), best rated first. An empty list means nothing matched."
    }

    fn schema(&self) -> &ParamSchema {
        &self.schema
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let text = args["query"].as_str().unwrap_or_default();
        let limit = args["limit"].as_i64().unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let query = SearchQuery {
            text: text.to_string(),
            genre: args["genre"].as_str().map(str::to_string),
            author: args["author"].as_str().map(str::to_string),
            limit: limit as usize,
        };
        self.bridge.search(query).await
    }
}
