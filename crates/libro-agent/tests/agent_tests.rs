//! Tests for libro-agent: SessionStore, the turn state machine and AgentRuntime

use libro_agent::*;
use libro_core::{
    orphan_tool_calls, BookDetail, BookSummary, BusyPolicy, Error, FailureKind, ReaderPreferences,
    Role, ToolOutcome, Turn,
};
use libro_llm::{ContentBlock, LlmClient, LlmContent, MockBehavior, MockProvider};
use libro_tools::{create_default_registry, Catalog, CatalogError, InMemoryCatalog, SearchQuery};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn book(id: i64, title: &str, rating: f64) -> BookDetail {
    BookDetail {
        id,
        title: title.into(),
        author: Some("Someone".into()),
        genre: Some("Science Fiction".into()),
        average_rating: Some(rating),
        description: None,
        cover_image_url: None,
        isbn: None,
    }
}

fn catalog() -> InMemoryCatalog {
    InMemoryCatalog::new(vec![
        book(1, "Dune", 4.6),
        book(2, "Foundation", 4.2),
        book(3, "Hyperion", 4.3),
    ])
}

/// Catalog whose searches take `delay`; details answer immediately.
struct SlowCatalog {
    inner: InMemoryCatalog,
    delay: Duration,
}

#[async_trait::async_trait]
impl Catalog for SlowCatalog {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<BookSummary>, CatalogError> {
        tokio::time::sleep(self.delay).await;
        self.inner.search(query).await
    }

    async fn detail(&self, id: i64) -> Result<Option<BookDetail>, CatalogError> {
        self.inner.detail(id).await
    }
}

fn slow(delay_ms: u64) -> Arc<SlowCatalog> {
    Arc::new(SlowCatalog {
        inner: catalog(),
        delay: Duration::from_millis(delay_ms),
    })
}

fn fast_config() -> AgentConfig {
    AgentConfig {
        llm_timeout: Duration::from_millis(500),
        tool_timeout: Duration::from_millis(500),
        llm_retry_backoff: Duration::from_millis(10),
        ..Default::default()
    }
}

fn runtime_with(
    mock: Arc<MockProvider>,
    catalog: Arc<dyn Catalog>,
    config: AgentConfig,
) -> AgentRuntime {
    let client = LlmClient::new(mock, "gpt-4o-mini");
    AgentRuntime::new(client, create_default_registry(catalog), config)
}

fn runtime(mock: Arc<MockProvider>) -> AgentRuntime {
    runtime_with(mock, Arc::new(catalog()), fast_config())
}

fn search(query: &str) -> MockBehavior {
    MockProvider::tool_call("search_books", json!({ "query": query }))
}

fn assert_strictly_ordered(turns: &[Turn]) {
    for pair in turns.windows(2) {
        assert!(
            pair[0].timestamp < pair[1].timestamp,
            "timestamps not strictly increasing"
        );
    }
}

// ===========================================================================
// AgentConfig
// ===========================================================================

#[test]
fn config_from_settings() {
    let settings = libro_core::AgentSettings {
        max_iterations: 7,
        llm_timeout_ms: 1_500,
        busy_policy: BusyPolicy::Queue,
        ..Default::default()
    };
    let c = AgentConfig::from(&settings);
    assert_eq!(c.max_iterations, 7);
    assert_eq!(c.llm_timeout, Duration::from_millis(1_500));
    assert_eq!(c.busy_policy, BusyPolicy::Queue);

    let d = AgentConfig::default();
    assert_eq!(d.max_iterations, 5);
    assert_eq!(d.tool_timeout, Duration::from_millis(5_000));
}

// ===========================================================================
// SessionStore
// ===========================================================================

#[tokio::test]
async fn store_unknown_session_is_empty() {
    let store = SessionStore::new();
    let key = SessionKey::new("nobody");
    assert!(store.get_history(&key).await.is_empty());
    store.clear(&key).await;
    assert!(store.state(&key).is_none());
    assert!(store.is_empty());
}

#[tokio::test]
async fn store_bumps_colliding_timestamps() {
    let store = SessionStore::new();
    let key = SessionKey::new("s");
    let first = Turn::user("a");
    let mut second = Turn::assistant("b");
    second.timestamp = first.timestamp;
    let mut third = Turn::user("c");
    third.timestamp = first.timestamp - chrono::Duration::seconds(1);

    store.append_turn(&key, first).await;
    store.append_turn(&key, second).await;
    store.append_turn(&key, third).await;

    let history = store.get_history(&key).await;
    assert_eq!(history.len(), 3);
    assert_strictly_ordered(&history);
    assert_eq!(history[2].text(), Some("c"));
}

#[tokio::test]
async fn store_sessions_are_isolated() {
    let store = SessionStore::new();
    let a = SessionKey::new("a");
    let b = SessionKey::new("b");
    store.append_turn(&a, Turn::user("for a")).await;
    store.append_turn(&b, Turn::user("for b")).await;
    store.clear(&a).await;

    assert!(store.get_history(&a).await.is_empty());
    assert_eq!(store.get_history(&b).await.len(), 1);

    let listed = store.list().await;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].key.as_str(), "a");
    assert_eq!(listed[0].turns, 0);
    assert_eq!(listed[1].turns, 1);
    assert_eq!(listed[1].state, AgentState::AwaitingUserInput);
}

#[tokio::test]
async fn store_commit_after_clear_is_dropped() {
    let store = SessionStore::new();
    let key = SessionKey::new("s");
    let entry = store.get_or_create(&key);
    let generation = entry.append(Turn::user("hi")).await;
    entry.clear().await;
    assert!(!entry.commit(generation, vec![Turn::assistant("late")]).await);
    assert!(store.get_history(&key).await.is_empty());
    let fresh = entry.generation().await;
    assert!(entry.commit(fresh, vec![Turn::assistant("ok")]).await);
}

#[tokio::test]
async fn store_preferences_follow_commits_and_clear() {
    let store = SessionStore::new();
    let key = SessionKey::new("s");
    let entry = store.get_or_create(&key);
    let generation = entry.append(Turn::user("I love fantasy")).await;
    let learned = ReaderPreferences::from_lists("Fantasy", "", "");

    assert!(entry.commit_with(generation, vec![], Some(&learned)).await);
    assert_eq!(store.get_preferences(&key).await, learned);
    assert!(store.get_preferences(&SessionKey::new("other")).await.is_empty());

    entry.clear().await;
    assert!(entry.preferences().await.is_empty());
    // A batch from before the clear brings nothing back.
    assert!(!entry.commit_with(generation, vec![], Some(&learned)).await);
    assert!(entry.preferences().await.is_empty());
}

#[tokio::test]
async fn store_export_and_remove() {
    let store = SessionStore::new();
    let key = SessionKey::new("s");
    store.append_turn(&key, Turn::user("hello")).await;
    let records = store.export(&key).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].role, Role::User);
    assert_eq!(records[0].content, json!("hello"));

    assert!(store.remove(&key));
    assert!(!store.remove(&key));
    assert!(store.export(&key).await.is_empty());
}

#[tokio::test]
async fn store_evicts_idle_sessions() {
    let store = SessionStore::new();
    store.append_turn(&SessionKey::new("old"), Turn::user("x")).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    store.append_turn(&SessionKey::new("new"), Turn::user("y")).await;

    assert_eq!(store.evict_idle(Duration::from_millis(10)), 1);
    assert!(store.get(&SessionKey::new("old")).is_none());
    assert!(store.get(&SessionKey::new("new")).is_some());
}

#[tokio::test]
async fn idle_sweeper_runs_until_cancelled() {
    let store = Arc::new(SessionStore::new());
    store.append_turn(&SessionKey::new("s"), Turn::user("x")).await;
    let cancel = CancellationToken::new();
    let handle = store.spawn_idle_sweeper(
        Duration::from_millis(5),
        Duration::from_millis(10),
        cancel.clone(),
    );
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(store.is_empty());
    cancel.cancel();
    handle.await.unwrap();
}

// ===========================================================================
// AgentRuntime - normal turns
// ===========================================================================

#[tokio::test]
async fn final_answer_turn() {
    let mock = Arc::new(MockProvider::text("Read Dune."));
    let rt = runtime(mock.clone());
    let key = SessionKey::new("s1");

    let reply = rt.submit(&key, "Recommend a classic").await.unwrap();
    assert_eq!(reply, "Read Dune.");

    let history = rt.sessions().get_history(&key).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].text(), Some("Read Dune."));
    assert_eq!(rt.sessions().state(&key), Some(AgentState::AwaitingUserInput));

    let request = &mock.requests().await[0];
    assert_eq!(request.tools.as_ref().unwrap().len(), 4);
}

#[tokio::test]
async fn tool_turn_commits_batch_with_results() {
    let mock = Arc::new(MockProvider::sequence(vec![
        search("science fiction"),
        MockBehavior::Text("Try Dune, it's the best rated.".into()),
    ]));
    let rt = runtime(mock.clone());
    let key = SessionKey::new("s1");

    rt.submit(&key, "sci-fi please").await.unwrap();

    let history = rt.sessions().get_history(&key).await;
    assert_eq!(history.len(), 4);
    assert_eq!(history[1].as_tool_calls().unwrap().len(), 1);
    let result = history[2].as_tool_result().unwrap();
    assert_eq!(result.tool_call_id, history[1].as_tool_calls().unwrap()[0].id);
    assert!(orphan_tool_calls(&history).is_empty());
    assert_strictly_ordered(&history);

    // The second reasoning call sees the tool result.
    let second = &mock.requests().await[1];
    let last = second.messages.last().unwrap();
    match &last.content.tool_results()[0] {
        ContentBlock::ToolResult { content, .. } => assert!(content.contains("Dune")),
        other => panic!("expected tool result, got {:?}", other),
    }
}

#[tokio::test]
async fn remembered_preferences_reach_later_calls() {
    let mock = Arc::new(MockProvider::sequence(vec![
        MockBehavior::Text("Which genres of books do you enjoy most?".into()),
        MockProvider::tool_call(
            "remember_preferences",
            json!({"genres": "Science Fiction", "authors": "Frank Herbert"}),
        ),
        MockProvider::tool_call("recommend_books", json!({"query": "", "genres": "Science Fiction"})),
        MockBehavior::Text("Dune, Hyperion and Foundation.".into()),
    ]));
    let rt = runtime(mock.clone());
    let key = SessionKey::new("s1");

    rt.submit(&key, "recommend me something").await.unwrap();
    rt.submit(&key, "I like science fiction and Frank Herbert").await.unwrap();

    let prefs = rt.sessions().get_preferences(&key).await;
    assert_eq!(prefs.preferred_genres, vec!["Science Fiction"]);
    assert_eq!(prefs.liked_authors, vec!["Frank Herbert"]);

    let requests = mock.requests().await;
    let first = requests[0].system.as_deref().unwrap();
    assert!(first.contains("Reader preferences known so far: none."));
    assert!(first.contains("Which genres"));
    let third = requests[2].system.as_deref().unwrap();
    assert!(third.contains("- genres: Science Fiction"));
    assert!(third.contains("- authors: Frank Herbert"));

    // recommend_books answered with three picks, genre matches first.
    let history = rt.sessions().get_history(&key).await;
    let picks = match &history[history.len() - 2].as_tool_result().unwrap().outcome {
        ToolOutcome::Success { data } => data.as_array().unwrap().clone(),
        other => panic!("expected picks, got {:?}", other),
    };
    assert_eq!(picks.len(), 3);
    assert_eq!(picks[0]["title"], "Dune");
    assert!(picks[0]["reason"].as_str().unwrap().contains("Science Fiction"));
}

#[tokio::test]
async fn parallel_tool_results_keep_request_order() {
    let mock = Arc::new(MockProvider::sequence(vec![
        MockBehavior::MultiToolCall(vec![
            ("search_books".into(), json!({"query": "dune"})),
            ("get_book_details".into(), json!({"book_id": 2})),
        ]),
        MockBehavior::Text("done".into()),
    ]));
    // The search finishes after the lookup.
    let rt = runtime_with(mock, slow(100), fast_config());
    let key = SessionKey::new("s");

    rt.submit(&key, "compare").await.unwrap();

    let history = rt.sessions().get_history(&key).await;
    let calls = history[1].as_tool_calls().unwrap();
    assert_eq!(history[2].tool_call_id.as_deref(), Some(calls[0].id.as_str()));
    assert_eq!(history[3].tool_call_id.as_deref(), Some(calls[1].id.as_str()));
    assert_eq!(history[2].as_tool_result().unwrap().name, "search_books");
}

#[tokio::test]
async fn not_found_is_fed_back_and_loop_continues() {
    let mock = Arc::new(MockProvider::sequence(vec![
        MockProvider::tool_call("get_book_details", json!({"book_id": 9999999})),
        MockBehavior::Text("That book is not in the catalog.".into()),
    ]));
    let rt = runtime(mock.clone());
    let key = SessionKey::new("s");

    let reply = rt.submit(&key, "details of 9999999").await.unwrap();
    assert_eq!(reply, "That book is not in the catalog.");

    let history = rt.sessions().get_history(&key).await;
    assert_eq!(
        history[2].as_tool_result().unwrap().outcome,
        ToolOutcome::not_found("Book with id 9999999 not found.")
    );
    assert_eq!(mock.call_count().await, 2);
}

#[tokio::test]
async fn malformed_arguments_reach_the_next_call() {
    let mock = Arc::new(MockProvider::sequence(vec![
        MockBehavior::MalformedArguments {
            name: "search_books".into(),
            raw: "{\"query\": ".into(),
        },
        MockBehavior::Text("Let me try again later.".into()),
    ]));
    let rt = runtime(mock.clone());
    let key = SessionKey::new("s");

    rt.submit(&key, "find dune").await.unwrap();

    let history = rt.sessions().get_history(&key).await;
    let result = history[2].as_tool_result().unwrap();
    assert_eq!(result.outcome.failure_kind(), Some(FailureKind::Validation));

    let second = &mock.requests().await[1];
    match &second.messages.last().unwrap().content.tool_results()[0] {
        ContentBlock::ToolResult { content, is_error, .. } => {
            assert_eq!(*is_error, Some(true));
            assert!(content.contains("must be a JSON object"));
        }
        other => panic!("expected tool result, got {:?}", other),
    }

    // The broken call is replayed exactly as the model sent it.
    let replayed = &second.messages[second.messages.len() - 2];
    match &replayed.content {
        LlmContent::Blocks(blocks) => assert!(matches!(
            &blocks[0],
            ContentBlock::ToolUse { raw_input: Some(raw), .. } if raw == "{\"query\": "
        )),
        other => panic!("expected tool use, got {:?}", other),
    }
}

#[tokio::test]
async fn unknown_tool_is_fed_back() {
    let mock = Arc::new(MockProvider::sequence(vec![
        MockProvider::tool_call("delete_everything", json!({})),
        MockBehavior::Text("I can only search books.".into()),
    ]));
    let rt = runtime(mock);
    let key = SessionKey::new("s");
    rt.submit(&key, "hi").await.unwrap();
    let history = rt.sessions().get_history(&key).await;
    assert_eq!(
        history[2].as_tool_result().unwrap().outcome.failure_kind(),
        Some(FailureKind::UnknownTool)
    );
}

#[tokio::test]
async fn tool_timeout_becomes_error_result() {
    let mock = Arc::new(MockProvider::sequence(vec![
        search("dune"),
        MockBehavior::Text("The catalog is slow right now.".into()),
    ]));
    let config = AgentConfig {
        tool_timeout: Duration::from_millis(30),
        ..fast_config()
    };
    let rt = runtime_with(mock, slow(300), config);
    let key = SessionKey::new("s");

    rt.submit(&key, "dune?").await.unwrap();
    let history = rt.sessions().get_history(&key).await;
    assert_eq!(
        history[2].as_tool_result().unwrap().outcome.failure_kind(),
        Some(FailureKind::Timeout)
    );
}

// ===========================================================================
// AgentRuntime - failures
// ===========================================================================

#[tokio::test]
async fn budget_exceeded_after_max_iterations() {
    let mock = Arc::new(MockProvider::constant(search("anything")));
    let rt = runtime(mock.clone());
    let key = SessionKey::new("loop");

    let err = rt.submit(&key, "keep searching").await.unwrap_err();
    assert!(matches!(err, Error::BudgetExceeded { limit: 5 }));
    assert!(err.user_message().starts_with("Sorry"));
    assert_eq!(mock.call_count().await, 5);

    // User turn plus five committed batches; the fallback is not stored.
    let history = rt.sessions().get_history(&key).await;
    assert_eq!(history.len(), 11);
    assert_eq!(history.last().unwrap().role, Role::Tool);
    assert!(orphan_tool_calls(&history).is_empty());
    assert_eq!(rt.sessions().state(&key), Some(AgentState::AwaitingUserInput));
}

#[tokio::test]
async fn llm_timeout_retries_once_then_fails() {
    let mock = Arc::new(MockProvider::constant(MockBehavior::Hang));
    let config = AgentConfig {
        llm_timeout: Duration::from_millis(50),
        ..fast_config()
    };
    let rt = runtime_with(mock.clone(), Arc::new(catalog()), config);
    let key = SessionKey::new("s");

    let err = rt.submit(&key, "hello").await.unwrap_err();
    assert!(matches!(err, Error::LlmError { .. }));
    assert!(err.is_user_visible());
    assert_eq!(mock.call_count().await, 2);
    assert_eq!(rt.sessions().get_history(&key).await.len(), 1);
}

#[tokio::test]
async fn llm_failure_recovers_on_retry() {
    let mock = Arc::new(MockProvider::sequence(vec![
        MockBehavior::Fail("503 service unavailable".into()),
        MockBehavior::Text("Here you go.".into()),
    ]));
    let rt = runtime(mock.clone());
    let reply = rt.submit(&SessionKey::new("s"), "hi").await.unwrap();
    assert_eq!(reply, "Here you go.");
    assert_eq!(mock.call_count().await, 2);
}

#[tokio::test]
async fn retries_count_against_the_budget() {
    let mock = Arc::new(MockProvider::sequence(vec![
        MockBehavior::Empty,
        MockBehavior::Text("late answer".into()),
    ]));
    let config = AgentConfig {
        max_iterations: 1,
        ..fast_config()
    };
    let rt = runtime_with(mock.clone(), Arc::new(catalog()), config);
    let err = rt.submit(&SessionKey::new("s"), "hi").await.unwrap_err();
    assert!(matches!(err, Error::BudgetExceeded { limit: 1 }));
    assert_eq!(mock.call_count().await, 1);
}

// ===========================================================================
// Concurrency
// ===========================================================================

fn delayed_text(ms: u64, text: &str) -> MockBehavior {
    MockBehavior::Delayed {
        ms,
        then: Box::new(MockBehavior::Text(text.into())),
    }
}

#[tokio::test]
async fn same_session_second_submit_is_rejected() {
    let mock = Arc::new(MockProvider::constant(delayed_text(100, "ok")));
    let rt = runtime(mock);
    let key = SessionKey::new("shared");

    let (a, b) = tokio::join!(rt.submit(&key, "first"), rt.submit(&key, "second"));
    assert_eq!(a.unwrap(), "ok");
    assert!(matches!(b, Err(Error::Busy(k)) if k == key));

    let history = rt.sessions().get_history(&key).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].text(), Some("first"));
}

#[tokio::test]
async fn same_session_queue_policy_serializes() {
    let mock = Arc::new(MockProvider::sequence(vec![
        delayed_text(50, "one"),
        delayed_text(10, "two"),
    ]));
    let config = AgentConfig {
        busy_policy: BusyPolicy::Queue,
        ..fast_config()
    };
    let rt = runtime_with(mock, Arc::new(catalog()), config);
    let key = SessionKey::new("shared");

    let (a, b) = tokio::join!(rt.submit(&key, "first"), rt.submit(&key, "second"));
    assert_eq!(a.unwrap(), "one");
    assert_eq!(b.unwrap(), "two");

    let texts: Vec<_> = rt
        .sessions()
        .get_history(&key)
        .await
        .iter()
        .map(|t| t.text().unwrap_or_default().to_string())
        .collect();
    assert_eq!(texts, vec!["first", "one", "second", "two"]);
}

#[tokio::test]
async fn different_sessions_run_independently() {
    let mock = Arc::new(MockProvider::constant(delayed_text(50, "ok")));
    let rt = runtime(mock);
    let a = SessionKey::new("a");
    let b = SessionKey::new("b");

    let (ra, rb) = tokio::join!(rt.submit(&a, "hi from a"), rt.submit(&b, "hi from b"));
    assert!(ra.is_ok());
    assert!(rb.is_ok());
    assert_eq!(
        rt.sessions().get_history(&a).await[0].text(),
        Some("hi from a")
    );
    assert_eq!(
        rt.sessions().get_history(&b).await[0].text(),
        Some("hi from b")
    );
}

// ===========================================================================
// Cancellation
// ===========================================================================

#[tokio::test]
async fn cancel_mid_tool_leaves_committed_boundary() {
    let mock = Arc::new(MockProvider::sequence(vec![
        search("dune"),
        MockBehavior::Text("after cancel".into()),
    ]));
    let rt = runtime_with(mock.clone(), slow(300), fast_config());
    let key = SessionKey::new("s");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = rt
        .submit_cancellable(&key, "find dune", cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    let history = rt.sessions().get_history(&key).await;
    assert_eq!(history.len(), 1);
    assert!(orphan_tool_calls(&history).is_empty());
    assert_eq!(rt.sessions().state(&key), Some(AgentState::AwaitingUserInput));

    // The session is free for the next message.
    let reply = rt.submit(&key, "anything else?").await.unwrap();
    assert_eq!(reply, "after cancel");
}

#[tokio::test]
async fn cancel_during_llm_call() {
    let mock = Arc::new(MockProvider::constant(MockBehavior::Hang));
    let rt = runtime(mock);
    let key = SessionKey::new("s");
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let err = rt.submit_cancellable(&key, "hi", cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(rt.sessions().get_history(&key).await.len(), 1);
}

#[tokio::test]
async fn clear_mid_turn_discards_the_turn() {
    let mock = Arc::new(MockProvider::constant(delayed_text(100, "too late")));
    let rt = Arc::new(runtime(mock));
    let key = SessionKey::new("s");

    let turn = {
        let rt = Arc::clone(&rt);
        let key = key.clone();
        tokio::spawn(async move { rt.submit(&key, "hi").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    rt.sessions().clear(&key).await;

    let result = turn.await.unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(rt.sessions().get_history(&key).await.is_empty());
}

#[tokio::test]
async fn busy_sessions_survive_eviction() {
    let mock = Arc::new(MockProvider::constant(delayed_text(100, "ok")));
    let rt = Arc::new(runtime(mock));
    let key = SessionKey::new("busy");

    let turn = {
        let rt = Arc::clone(&rt);
        let key = key.clone();
        tokio::spawn(async move { rt.submit(&key, "hi").await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(rt.sessions().evict_idle(Duration::ZERO), 0);
    assert!(turn.await.unwrap().is_ok());
}

// ===========================================================================
// Events
// ===========================================================================

#[tokio::test]
async fn events_follow_the_state_machine() {
    let mock = Arc::new(MockProvider::sequence(vec![
        search("dune"),
        MockBehavior::Text("Dune it is.".into()),
    ]));
    let rt = runtime(mock);
    let (tx, mut rx) = mpsc::channel(64);

    let reply = rt
        .run_turn(&SessionKey::new("s"), "hi", Some(tx), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(reply, "Dune it is.");

    let mut states = vec![AgentState::AwaitingUserInput];
    let mut saw_tool = false;
    let mut done = None;
    while let Ok(event) = rx.try_recv() {
        match event {
            AgentEvent::StateChanged { from, to } => {
                assert_eq!(Some(&from), states.last());
                assert!(from.can_transition_to(to));
                states.push(to);
            }
            AgentEvent::ToolResult { name, is_error, .. } => {
                assert_eq!(name, "search_books");
                assert!(!is_error);
                saw_tool = true;
            }
            AgentEvent::Done { reply } => done = Some(reply),
            _ => {}
        }
    }
    assert!(saw_tool);
    assert_eq!(done.as_deref(), Some("Dune it is."));
    assert_eq!(
        states,
        vec![
            AgentState::AwaitingUserInput,
            AgentState::CallingLlm,
            AgentState::ExecutingTool,
            AgentState::CallingLlm,
            AgentState::EmittingResponse,
            AgentState::Done,
            AgentState::AwaitingUserInput,
        ]
    );
}
