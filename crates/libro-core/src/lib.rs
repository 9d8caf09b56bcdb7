//! LibroRecomienda Core - shared types, configuration, and error handling

pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

pub use config::{
    AgentSettings, BindMode, BusyPolicy, CatalogSettings, GatewaySettings, LibroConfig,
    LlmSettings, LoggingSettings, ProviderKind, Secret,
};
pub use error::{Error, FieldProblem, Result, ValidationError};
pub use protocol::*;
pub use types::*;
