//! LibroRecomienda - book recommendation gateway and terminal chat

use clap::{Parser, Subcommand, ValueEnum};
use libro_core::{BindMode, LibroConfig};
use libro_gateway::{build_runtime, chat, start_gateway};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "libro", about = "LibroRecomienda - book recommendation agent")]
struct Cli {
    /// Config file (default: ./libro.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP JSON-RPC gateway
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(short, long, value_enum)]
        bind: Option<BindArg>,
    },
    /// Chat with the agent in the terminal
    Chat {
        /// Session id (default: auto-generated)
        #[arg(short, long)]
        session: Option<String>,
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Print the effective configuration as TOML
    Config,
    /// Show version
    Version,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BindArg {
    /// 127.0.0.1 only
    #[value(alias = "localhost", alias = "127.0.0.1")]
    Loopback,
    /// All interfaces
    #[value(alias = "0.0.0.0")]
    Lan,
}

impl From<BindArg> for BindMode {
    fn from(arg: BindArg) -> Self {
        match arg {
            BindArg::Loopback => BindMode::Loopback,
            BindArg::Lan => BindMode::Lan,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = LibroConfig::load(path)?;
            config.apply_env(|k| std::env::var(k).ok());
            config.validate()?;
            config
        }
        None => LibroConfig::discover()?,
    };

    match cli.command {
        Some(Commands::Serve { port, bind }) => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(bind) = bind {
                config.gateway.bind = bind.into();
            }
            let _guard = init_tracing(&config, true);
            start_gateway(config).await?;
        }

        Some(Commands::Chat { session, model }) => {
            if let Some(model) = model {
                config.llm.model = model;
            }
            // Keep the terminal clean: logs go to the file sink only, if any.
            let _guard = init_tracing(&config, false);
            let agent = Arc::new(build_runtime(&config)?);
            chat::run_chat(agent, session).await?;
        }

        Some(Commands::Config) => {
            print!("{}", config.to_toml());
        }

        Some(Commands::Version) => {
            println!("libro v{}", env!("CARGO_PKG_VERSION"));
        }

        None => {
            let _guard = init_tracing(&config, false);
            let agent = Arc::new(build_runtime(&config)?);
            chat::run_chat(agent, None).await?;
        }
    }

    Ok(())
}

/// Console and optional daily-rolling file output. The returned guard must
/// live until exit or buffered file lines are lost.
fn init_tracing(config: &LibroConfig, console: bool) -> Option<WorkerGuard> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            config
                .logging
                .filter
                .clone()
                .unwrap_or_else(|| "libro=info,tower_http=info".to_string())
                .into()
        })
    };

    let (file_layer, guard) = match &config.logging.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "libro.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = console.then(|| fmt::layer().with_filter(filter()));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}
