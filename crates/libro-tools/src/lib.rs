//! Libro Tools - catalog and preference tools exposed to the agent
//!
//! Each tool is a self-contained file in src/tools/.
//! To add a tool: add a `ToolName` variant, create the file, register below.

pub mod catalog;
pub mod registry;
pub mod schema;
pub mod tools;

pub use catalog::{Catalog, CatalogBridge, CatalogError, InMemoryCatalog, SearchQuery};
pub use registry::{Tool, ToolName, ToolRegistry};
pub use schema::{ParamKind, ParamSchema, ParamSpec};
pub use tools::get_book_details::GetBookDetailsTool;
pub use tools::recommend_books::RecommendBooksTool;
pub use tools::remember_preferences::RememberPreferencesTool;
pub use tools::search_books::SearchBooksTool;

use std::sync::Arc;

/// Create the default tool registry over the given catalog.
pub fn create_default_registry(catalog: Arc<dyn Catalog>) -> ToolRegistry {
    let bridge = CatalogBridge::new(catalog);
    let mut registry = ToolRegistry::new();

    registry.register(SearchBooksTool::new(bridge.clone()));
    registry.register(GetBookDetailsTool::new(bridge.clone()));
    registry.register(RecommendBooksTool::new(bridge));
    registry.register(RememberPreferencesTool::new());

    registry
}
