//! Libro Agent - session memory and the turn state machine

pub mod machine;
pub mod runtime;
pub mod session;

pub use machine::{AgentState, TurnMachine};
pub use runtime::{AgentConfig, AgentEvent, AgentRuntime};
pub use session::{SessionEntry, SessionInfo, SessionKey, SessionStore};
