//! Individual tool implementations.
//!
//! Each tool is a self-contained module. To add a new tool:
//! 1. Add a variant to `ToolName`
//! 2. Create a new file in this directory implementing the Tool trait
//! 3. Register it in create_default_registry() in ../lib.rs

pub mod get_book_details;
pub mod recommend_books;
pub mod remember_preferences;
pub mod search_books;
