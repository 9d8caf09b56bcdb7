//! LibroRecomienda Gateway - HTTP JSON-RPC server, terminal chat, and runtime wiring

pub mod chat;
pub mod rpc;
pub mod server;

pub use rpc::{route_rpc, RpcContext};
pub use server::{build_router, serve, start_gateway, GatewayState};

use anyhow::Context;
use libro_agent::{AgentConfig, AgentRuntime};
use libro_core::{LibroConfig, ProviderKind};
use libro_llm::{LlmClient, LlmProvider, MockProvider, OpenAiProvider};
use libro_tools::{create_default_registry, Catalog, InMemoryCatalog};
use std::sync::Arc;
use tracing::{info, warn};

/// Used when `agent.system_prompt` is not configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly book recommendation assistant for LibroRecomienda. \
Whenever the reader mentions genres, authors or books they like, record them with remember_preferences. \
If you do not know what they like yet, ask about genres first and then favourite authors before recommending. \
To recommend, call recommend_books with the reader's preferred genres and present up to three books, \
each with its title, author and rating followed by a one or two sentence explanation of why it fits. \
Use search_books for open searches and get_book_details when the reader asks about a specific book. \
Only recommend books the tools returned. If nothing matches, say so and suggest a broader search. \
Answer in the language the reader writes in.";

/// Wire catalog, tools, provider and session store from configuration.
pub fn build_runtime(config: &LibroConfig) -> anyhow::Result<AgentRuntime> {
    let catalog: Arc<dyn Catalog> = match &config.catalog.path {
        Some(path) => {
            let catalog = InMemoryCatalog::from_json_file(path)
                .with_context(|| format!("loading catalog {}", path.display()))?;
            info!("Loaded {} books from {}", catalog.len(), path.display());
            Arc::new(catalog)
        }
        None => {
            warn!("No catalog.path configured; searches will return nothing");
            Arc::new(InMemoryCatalog::new(Vec::new()))
        }
    };

    let tools = create_default_registry(catalog);
    info!("Registered tools: {:?}", tools.list());

    let provider: Arc<dyn LlmProvider> = match config.llm.provider {
        ProviderKind::OpenAi => {
            let key = config.api_key().ok_or_else(|| {
                anyhow::anyhow!("{} not set", config.llm.api_key_env)
            })?;
            let mut provider = OpenAiProvider::new(key);
            if let Some(url) = &config.llm.base_url {
                let url = completions_url(url);
                info!("Using custom API URL: {}", url);
                provider = provider.with_base_url(url);
            }
            Arc::new(provider)
        }
        ProviderKind::Mock => {
            warn!("Using the offline mock provider");
            Arc::new(MockProvider::text(
                "(offline) The catalog assistant is running without a language model.",
            ))
        }
    };

    let system_prompt = config
        .agent
        .system_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

    let client = LlmClient::new(provider, config.llm.model.clone())
        .with_system_prompt(Some(system_prompt))
        .with_max_tokens(config.llm.max_tokens)
        .with_temperature(config.llm.temperature);

    Ok(AgentRuntime::new(
        client,
        tools,
        AgentConfig::from(&config.agent),
    ))
}

/// `base_url` may name the API root (`.../v1`) or the full endpoint.
fn completions_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{}/chat/completions", base)
    }
}

#[cfg(test)]
mod tests {
    use super::completions_url;

    #[test]
    fn completions_url_accepts_root_or_endpoint() {
        assert_eq!(
            completions_url("http://localhost:8080/v1/"),
            "http://localhost:8080/v1/chat/completions"
        );
        assert_eq!(
            completions_url("https://api.openai.com/v1/chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
    }
}
