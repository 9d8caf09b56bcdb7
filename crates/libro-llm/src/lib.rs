//! LibroRecomienda LLM - provider adapters and the completion client

pub mod client;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod types;

pub use client::{transcript_to_messages, Completion, LlmClient};
pub use mock::{MockBehavior, MockProvider};
pub use openai::OpenAiProvider;
pub use provider::{LlmError, LlmProvider, LlmResult, LlmStream};
pub use tokio_util::sync::CancellationToken;
pub use types::*;
