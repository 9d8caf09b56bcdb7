//! get_book_details - full record for one book id

use crate::catalog::CatalogBridge;
use crate::registry::{Tool, ToolName};
use crate::schema::{ParamSchema, ParamSpec};
use libro_core::{FailureKind, ToolOutcome};
use serde_json::Value;

pub struct GetBookDetailsTool {
    bridge: CatalogBridge,
    schema: ParamSchema,
}

impl GetBookDetailsTool {
    pub fn new(bridge: CatalogBridge) -> Self {
        let schema = ParamSchema::new().param(
            ParamSpec::integer("book_id", "Catalog id of the book")
                .required()
                .range(Some(1), None),
        );
        Self { bridge, schema }
    }
}

#[async_trait::async_trait]
impl Tool for GetBookDetailsTool {
    fn name(&self) -> ToolName {
        ToolName::GetBookDetails
    }

    fn description(&self) -> &str {
        "Get the full details of one book by id: title, author, genre, description, \
         average_rating, cover_image_url and isbn."
    }

    fn schema(&self) -> &ParamSchema {
        &self.schema
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        match args["book_id"].as_i64() {
            Some(id) => self.bridge.detail(id).await,
            None => ToolOutcome::failed(FailureKind::Validation, "book_id must be a positive integer"),
        }
    }
}
