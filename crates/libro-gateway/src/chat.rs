//! Terminal chat - line-oriented REPL over the same runtime the gateway uses
//!
//! Commands: `/history`, `/prefs`, `/clear`, `/quit`. Ctrl-C while a turn runs cancels
//! that turn; the session keeps its last committed state.

use libro_agent::{AgentEvent, AgentRuntime, SessionKey};
use libro_core::{Error, Role};
use serde_json::Value;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub async fn run_chat(agent: Arc<AgentRuntime>, session: Option<String>) -> anyhow::Result<()> {
    let session_key = session.map(SessionKey::new).unwrap_or_else(SessionKey::generate);

    println!("LibroRecomienda v{} - session {}", env!("CARGO_PKG_VERSION"), session_key);
    println!("Ask for a book recommendation. /history, /prefs, /clear, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                agent.sessions().clear(&session_key).await;
                println!("(session cleared)");
                continue;
            }
            "/history" => {
                print_history(&agent, &session_key).await;
                continue;
            }
            "/prefs" => {
                let prefs = agent.sessions().get_preferences(&session_key).await;
                println!("{}", prefs.prompt_note());
                continue;
            }
            _ => {}
        }

        run_one(&agent, &session_key, line).await;
    }

    Ok(())
}

async fn run_one(agent: &AgentRuntime, session_key: &SessionKey, text: &str) {
    let cancel = CancellationToken::new();
    let (event_tx, mut event_rx) = mpsc::channel::<AgentEvent>(64);

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                AgentEvent::ToolExecuting { name, .. } => println!("  [{}]", name),
                AgentEvent::ToolResult {
                    name,
                    is_error: true,
                    result,
                    ..
                } => println!("  [{} failed: {}]", name, result),
                _ => {}
            }
        }
    });

    let turn = agent.run_turn(session_key, text, Some(event_tx), cancel.clone());
    tokio::pin!(turn);
    let result = tokio::select! {
        r = &mut turn => r,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            turn.await
        }
    };
    let _ = printer.await;

    match result {
        Ok(reply) => println!("\n{}\n", reply),
        Err(Error::Cancelled) => println!("(cancelled)"),
        Err(e) if e.is_user_visible() => println!("\n{}\n", e.user_message()),
        Err(e) => eprintln!("error: {}", e),
    }
}

async fn print_history(agent: &AgentRuntime, session_key: &SessionKey) {
    let records = agent.sessions().export(session_key).await;
    if records.is_empty() {
        println!("(empty)");
        return;
    }
    for record in records {
        let who = match record.role {
            Role::User => "you",
            Role::Assistant => "libro",
            Role::Tool => "tool",
        };
        let text = match &record.content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        println!("{} {:>5}: {}", record.timestamp.format("%H:%M:%S"), who, text);
    }
}
