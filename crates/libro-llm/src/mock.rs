//! MockProvider - deterministic completions for tests and offline runs
//!
//! Each call to `complete_stream` pops the next scripted behavior. When the
//! script runs out, the default behavior answers.

use crate::provider::{LlmError, LlmProvider, LlmResult, LlmStream};
use crate::types::{LlmRequest, StreamDelta};
use async_stream::stream;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Mock behavior configuration
#[derive(Clone, Debug)]
pub enum MockBehavior {
    /// Return a text-only response
    Text(String),
    /// Return one tool call with given name and args
    ToolCall { name: String, args: Value },
    /// Return several tool calls in one batch
    MultiToolCall(Vec<(String, Value)>),
    /// Return text followed by a tool call
    TextThenTool {
        text: String,
        tool_name: String,
        tool_args: Value,
    },
    /// Tool call whose argument text is not valid JSON
    MalformedArguments { name: String, raw: String },
    /// A stream that finishes without text or tool calls
    Empty,
    /// The stream yields an error after it starts
    Error(String),
    /// `complete_stream` itself fails
    Fail(String),
    /// Never answers
    Hang,
    /// Wait, then behave as `then`
    Delayed { ms: u64, then: Box<MockBehavior> },
}

pub struct MockProvider {
    behaviors: Mutex<Vec<MockBehavior>>,
    default_behavior: MockBehavior,
    call_count: Mutex<usize>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockProvider {
    /// Create a mock that always returns the same behavior
    pub fn constant(behavior: MockBehavior) -> Self {
        Self {
            behaviors: Mutex::new(Vec::new()),
            default_behavior: behavior,
            call_count: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock with a sequence of behaviors (consumed in order)
    pub fn sequence(behaviors: Vec<MockBehavior>) -> Self {
        Self {
            behaviors: Mutex::new(behaviors),
            default_behavior: MockBehavior::Text("(mock: sequence exhausted)".into()),
            call_count: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::constant(MockBehavior::Text(text.into()))
    }

    pub fn tool_call(name: impl Into<String>, args: Value) -> MockBehavior {
        MockBehavior::ToolCall {
            name: name.into(),
            args,
        }
    }

    /// Number of `complete_stream` calls made so far
    pub async fn call_count(&self) -> usize {
        *self.call_count.lock().await
    }

    /// Every request received, in order
    pub async fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().await.clone()
    }

    async fn next_behavior(&self) -> MockBehavior {
        let mut count = self.call_count.lock().await;
        *count += 1;

        let mut behaviors = self.behaviors.lock().await;
        if behaviors.is_empty() {
            self.default_behavior.clone()
        } else {
            behaviors.remove(0)
        }
    }
}

fn mock_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("toolu_mock_{}", &id[..8])
}

fn tool_deltas(name: String, arguments: String) -> Vec<StreamDelta> {
    let id = mock_id();
    vec![
        StreamDelta::ToolCallStart { id: id.clone(), name },
        StreamDelta::ToolCallDelta { id: id.clone(), arguments },
        StreamDelta::ToolCallEnd { id },
    ]
}

fn done(reason: &str) -> StreamDelta {
    StreamDelta::Done {
        stop_reason: Some(reason.into()),
        usage: None,
    }
}

/// Flatten a behavior into the deltas it produces, or the error it streams.
fn script(behavior: MockBehavior) -> Result<Vec<StreamDelta>, String> {
    let deltas = match behavior {
        MockBehavior::Text(text) => {
            // Chunk like a real stream, on char boundaries
            let chars: Vec<char> = text.chars().collect();
            let mut out: Vec<StreamDelta> = chars
                .chunks(20)
                .map(|c| StreamDelta::Text(c.iter().collect()))
                .collect();
            out.push(done("end_turn"));
            out
        }
        MockBehavior::ToolCall { name, args } => {
            let mut out = tool_deltas(name, args.to_string());
            out.push(done("tool_use"));
            out
        }
        MockBehavior::MultiToolCall(tools) => {
            let mut out: Vec<StreamDelta> = tools
                .into_iter()
                .flat_map(|(name, args)| tool_deltas(name, args.to_string()))
                .collect();
            out.push(done("tool_use"));
            out
        }
        MockBehavior::TextThenTool {
            text,
            tool_name,
            tool_args,
        } => {
            let mut out = vec![StreamDelta::Text(text)];
            out.extend(tool_deltas(tool_name, tool_args.to_string()));
            out.push(done("tool_use"));
            out
        }
        MockBehavior::MalformedArguments { name, raw } => {
            let mut out = tool_deltas(name, raw);
            out.push(done("tool_use"));
            out
        }
        MockBehavior::Empty => vec![done("end_turn")],
        MockBehavior::Error(msg) => return Err(msg),
        // Handled before streaming starts
        MockBehavior::Fail(_) | MockBehavior::Hang | MockBehavior::Delayed { .. } => Vec::new(),
    };
    Ok(deltas)
}

#[async_trait::async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete_stream(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream> {
        self.requests.lock().await.push(request);
        let mut behavior = self.next_behavior().await;
        let cancel = cancel.unwrap_or_default();

        loop {
            match behavior {
                MockBehavior::Delayed { ms, then } => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                        _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                    }
                    behavior = *then;
                }
                MockBehavior::Hang => {
                    cancel.cancelled().await;
                    return Err(LlmError::Cancelled);
                }
                MockBehavior::Fail(msg) => return Err(LlmError::RequestFailed(msg)),
                other => {
                    behavior = other;
                    break;
                }
            }
        }

        let scripted = script(behavior);
        Ok(Box::pin(stream! {
            match scripted {
                Ok(deltas) => {
                    for delta in deltas {
                        yield Ok(delta);
                    }
                }
                Err(msg) => yield Err(LlmError::StreamError(msg)),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    async fn collect(mock: &MockProvider) -> Vec<StreamDelta> {
        let mut stream = mock
            .complete_stream(LlmRequest::default(), None)
            .await
            .unwrap();
        let mut out = Vec::new();
        while let Some(Ok(delta)) = stream.next().await {
            out.push(delta);
        }
        out
    }

    fn text_of(deltas: &[StreamDelta]) -> String {
        deltas
            .iter()
            .filter_map(|d| match d {
                StreamDelta::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn mock_text_response() {
        let mock = MockProvider::text("a fairly long answer about dune and foundation");
        let deltas = collect(&mock).await;
        assert_eq!(text_of(&deltas), "a fairly long answer about dune and foundation");
        assert!(matches!(deltas.last(), Some(StreamDelta::Done { .. })));
        assert_eq!(mock.call_count().await, 1);
    }

    #[tokio::test]
    async fn mock_tool_call() {
        let mock = MockProvider::constant(MockProvider::tool_call(
            "search_books",
            json!({"query": "dune"}),
        ));
        let deltas = collect(&mock).await;
        let name = deltas.iter().find_map(|d| match d {
            StreamDelta::ToolCallStart { id, name } => {
                assert!(id.starts_with("toolu_mock_"));
                Some(name.clone())
            }
            _ => None,
        });
        assert_eq!(name.as_deref(), Some("search_books"));
    }

    #[tokio::test]
    async fn mock_sequence_exhaustion() {
        let mock = MockProvider::sequence(vec![
            MockBehavior::Text("first".into()),
            MockBehavior::Text("second".into()),
        ]);
        assert_eq!(text_of(&collect(&mock).await), "first");
        assert_eq!(text_of(&collect(&mock).await), "second");
        assert!(text_of(&collect(&mock).await).contains("sequence exhausted"));
        assert_eq!(mock.call_count().await, 3);
    }

    #[tokio::test]
    async fn mock_error_and_fail() {
        let mock = MockProvider::constant(MockBehavior::Error("API down".into()));
        let mut stream = mock.complete_stream(LlmRequest::default(), None).await.unwrap();
        assert!(stream.next().await.unwrap().is_err());

        let mock = MockProvider::constant(MockBehavior::Fail("refused".into()));
        assert!(matches!(
            mock.complete_stream(LlmRequest::default(), None).await,
            Err(LlmError::RequestFailed(_))
        ));
    }

    #[tokio::test]
    async fn hang_ends_on_cancel() {
        let mock = MockProvider::constant(MockBehavior::Hang);
        let token = CancellationToken::new();
        let t = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            t.cancel();
        });
        let res = mock.complete_stream(LlmRequest::default(), Some(token)).await;
        assert!(matches!(res, Err(LlmError::Cancelled)));
    }

    #[tokio::test]
    async fn requests_are_recorded() {
        let mock = MockProvider::text("ok");
        let request = LlmRequest {
            system: Some("be brief".into()),
            ..Default::default()
        };
        mock.complete_stream(request, None).await.unwrap();
        let seen = mock.requests().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].system.as_deref(), Some("be brief"));
    }
}
