//! Catalog bridge - read-only lookups behind the catalog tools
//!
//! `Catalog` is the collaborator that owns the books. `CatalogBridge` adapts
//! it to tool semantics: ordering, limits, rating rounding, and turning any
//! catalog fault into a failed `ToolOutcome` instead of an error.

use libro_core::{BookDetail, BookSummary, FailureKind, ToolOutcome};
use serde_json::json;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    #[error("catalog query failed: {0}")]
    Query(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid catalog data: {0}")]
    Json(#[from] serde_json::Error),
}

/// Search criteria. `text` matches title, author or genre; `genre` and
/// `author` further narrow the match.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub genre: Option<String>,
    pub author: Option<String>,
    /// Upper bound the caller will keep. Implementations may return more.
    pub limit: usize,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, limit: usize) -> Self {
        Self {
            text: text.into(),
            limit,
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
pub trait Catalog: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<BookSummary>, CatalogError>;

    async fn detail(&self, id: i64) -> Result<Option<BookDetail>, CatalogError>;
}

/// Catalog held in memory, typically loaded from a JSON array of books.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCatalog {
    books: Vec<BookDetail>,
}

impl InMemoryCatalog {
    pub fn new(books: Vec<BookDetail>) -> Self {
        Self { books }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let books: Vec<BookDetail> = serde_json::from_str(&text)?;
        info!("Loaded {} books from {}", books.len(), path.display());
        Ok(Self::new(books))
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(needle))
}

impl InMemoryCatalog {
    fn matches(book: &BookDetail, query: &SearchQuery) -> bool {
        let text = query.text.trim().to_lowercase();
        let text_ok = text.is_empty()
            || contains_ci(Some(&book.title), &text)
            || contains_ci(book.author.as_deref(), &text)
            || contains_ci(book.genre.as_deref(), &text);
        let genre_ok = query
            .genre
            .as_deref()
            .map_or(true, |g| contains_ci(book.genre.as_deref(), &g.to_lowercase()));
        let author_ok = query
            .author
            .as_deref()
            .map_or(true, |a| contains_ci(book.author.as_deref(), &a.to_lowercase()));
        text_ok && genre_ok && author_ok
    }
}

#[async_trait::async_trait]
impl Catalog for InMemoryCatalog {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<BookSummary>, CatalogError> {
        Ok(self
            .books
            .iter()
            .filter(|b| Self::matches(b, query))
            .map(BookDetail::summary)
            .collect())
    }

    async fn detail(&self, id: i64) -> Result<Option<BookDetail>, CatalogError> {
        Ok(self.books.iter().find(|b| b.id == id).cloned())
    }
}

/// Descending rating, unrated last, then title ascending ignoring case.
/// A NaN rating counts as unrated, so this is a total order.
pub fn rank(a: &BookSummary, b: &BookSummary) -> Ordering {
    let rated = |s: &BookSummary| s.average_rating.filter(|r| !r.is_nan());
    match (rated(a), rated(b)) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
    .then_with(|| a.title.cmp(&b.title))
}

fn round_rating(rating: Option<f64>) -> Option<f64> {
    rating
        .filter(|r| r.is_finite())
        .map(|r| (r * 10.0).round() / 10.0)
}

#[derive(Clone)]
pub struct CatalogBridge {
    catalog: Arc<dyn Catalog>,
}

impl CatalogBridge {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// Matching books with ratings rounded, in `rank` order, at most
    /// `query.limit` of them.
    pub async fn ranked(&self, query: &SearchQuery) -> Result<Vec<BookSummary>, CatalogError> {
        let mut books = self.catalog.search(query).await?;
        for book in &mut books {
            book.average_rating = round_rating(book.average_rating);
        }
        books.sort_by(rank);
        books.truncate(query.limit);
        Ok(books)
    }

    pub async fn search(&self, query: SearchQuery) -> ToolOutcome {
        info!(
            "search_books: text='{}' genre={:?} author={:?} limit={}",
            query.text, query.genre, query.author, query.limit
        );
        match self.ranked(&query).await {
            Ok(books) => {
                info!("search_books found {} results", books.len());
                ToolOutcome::success(json!(books))
            }
            Err(e) => {
                error!("search_books failed: {}", e);
                ToolOutcome::failed(FailureKind::Tool, format!("Database search failed: {}", e))
            }
        }
    }

    pub async fn detail(&self, id: i64) -> ToolOutcome {
        match self.catalog.detail(id).await {
            Ok(Some(mut book)) => {
                book.average_rating = round_rating(book.average_rating);
                ToolOutcome::success(json!(book))
            }
            Ok(None) => {
                warn!("Book with id {} not found.", id);
                ToolOutcome::not_found(format!("Book with id {} not found.", id))
            }
            Err(e) => {
                error!("get_book_details failed for book_id={}: {}", id, e);
                ToolOutcome::failed(
                    FailureKind::Tool,
                    format!("Failed to get details for book {}: {}", id, e),
                )
            }
        }
    }
}
