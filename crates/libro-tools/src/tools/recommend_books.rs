//! recommend_books - a short list of picks for the reader's taste
//!
//! Candidates come from a catalog search. Books whose genre matches one of
//! the reader's preferred genres go first; remaining slots are filled from
//! the search order. Each pick carries a one-line reason the model can
//! expand on.

use crate::catalog::{CatalogBridge, SearchQuery};
use crate::registry::{Tool, ToolName};
use crate::schema::{ParamSchema, ParamSpec};
use libro_core::{BookSummary, FailureKind, ReaderPreferences, ToolOutcome};
use serde_json::{json, Value};
use tracing::{error, info};

pub const RECOMMENDATION_COUNT: usize = 3;
/// How many search results are considered before picking.
pub const CANDIDATE_POOL: usize = 20;

pub struct RecommendBooksTool {
    bridge: CatalogBridge,
    schema: ParamSchema,
}

impl RecommendBooksTool {
    pub fn new(bridge: CatalogBridge) -> Self {
        let schema = ParamSchema::new()
            .param(
                ParamSpec::string("query", "Keywords describing what the reader wants")
                    .required(),
            )
            .param(ParamSpec::string(
                "genres",
                "Comma-separated genres the reader prefers; matching books go first",
            ));
        Self { bridge, schema }
    }
}

#[async_trait::async_trait]
impl Tool for RecommendBooksTool {
    fn name(&self) -> ToolName {
        ToolName::RecommendBooks
    }

    fn description(&self) -> &str {
        "Pick up to 3 catalog books for the reader. Books in the preferred genres come \
         first, the rest are filled from the best search matches. Each pick has a `reason`."
    }

    fn schema(&self) -> &ParamSchema {
        &self.schema
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let text = args["query"].as_str().unwrap_or_default();
        let genres = ReaderPreferences::from_lists(args["genres"].as_str().unwrap_or_default(), "", "")
            .preferred_genres;

        let candidates = match self.bridge.ranked(&SearchQuery::new(text, CANDIDATE_POOL)).await {
            Ok(books) => books,
            Err(e) => {
                error!("recommend_books failed: {}", e);
                return ToolOutcome::failed(FailureKind::Tool, format!("Database search failed: {}", e));
            }
        };
        if candidates.is_empty() {
            return ToolOutcome::not_found(format!(
                "No books matched \"{}\". Try other keywords or broader preferences.",
                text
            ));
        }

        let picks = pick(candidates, &genres, RECOMMENDATION_COUNT);
        info!("recommend_books picked {} for '{}' genres={:?}", picks.len(), text, genres);
        let data: Vec<Value> = picks
            .into_iter()
            .map(|(book, matched)| {
                let reason = reason(&book, matched.as_deref(), text);
                let mut value = json!(book);
                value["reason"] = json!(reason);
                value
            })
            .collect();
        ToolOutcome::success(json!(data))
    }
}

/// Genre matches first, in candidate order, then the rest of the candidates.
/// Each pick comes with the preferred genre it matched, if any.
pub fn pick(
    candidates: Vec<BookSummary>,
    genres: &[String],
    count: usize,
) -> Vec<(BookSummary, Option<String>)> {
    let wanted: Vec<String> = genres.iter().map(|g| g.to_lowercase()).collect();
    let (matched, rest): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .map(|book| {
            let genre = book.genre.as_deref().unwrap_or_default().to_lowercase();
            let hit = wanted
                .iter()
                .position(|w| genre.contains(w.as_str()))
                .map(|i| genres[i].clone());
            (book, hit)
        })
        .partition(|(_, hit)| hit.is_some());

    matched
        .into_iter()
        .chain(rest)
        .take(count)
        .collect()
}

fn reason(book: &BookSummary, matched: Option<&str>, query: &str) -> String {
    let mut reason = match matched {
        Some(genre) => format!("Matches your taste for {}.", genre),
        None => format!("One of the best-rated catalog matches for \"{}\".", query),
    };
    if let Some(rating) = book.average_rating {
        reason.push_str(&format!(" Rated {:.1}/5.", rating));
    }
    reason
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: i64, genre: &str) -> BookSummary {
        BookSummary {
            id,
            title: format!("Book {}", id),
            author: None,
            genre: Some(genre.into()),
            average_rating: None,
        }
    }

    fn ids(picks: &[(BookSummary, Option<String>)]) -> Vec<i64> {
        picks.iter().map(|(b, _)| b.id).collect()
    }

    #[test]
    fn genre_matches_first_then_fill_from_search_order() {
        let candidates = vec![
            summary(1, "Romance"),
            summary(2, "Epic Fantasy"),
            summary(3, "Horror"),
            summary(4, "Fantasy"),
        ];
        let picks = pick(candidates, &["fantasy".into()], 3);
        assert_eq!(ids(&picks), vec![2, 4, 1]);
        assert_eq!(picks[0].1.as_deref(), Some("fantasy"));
        assert_eq!(picks[2].1, None);
    }

    #[test]
    fn without_genres_takes_top_of_search() {
        let candidates = (1..=5).map(|i| summary(i, "Anything")).collect();
        assert_eq!(ids(&pick(candidates, &[], 3)), vec![1, 2, 3]);
    }

    #[test]
    fn fewer_candidates_than_slots() {
        let picks = pick(vec![summary(9, "Poetry")], &["Fantasy".into()], 3);
        assert_eq!(ids(&picks), vec![9]);
    }

    #[test]
    fn reason_names_genre_and_rating() {
        let mut book = summary(1, "Fantasy");
        book.average_rating = Some(4.3);
        assert_eq!(reason(&book, Some("Fantasy"), "dragons"), "Matches your taste for Fantasy. Rated 4.3/5.");
        book.average_rating = None;
        assert_eq!(
            reason(&book, None, "dragons"),
            "One of the best-rated catalog matches for \"dragons\"."
        );
    }
}
