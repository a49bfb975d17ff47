mod repl;
mod terminal;


pub use terminal::TerminalUi;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::bot::{ChatRelay, RelaySettings, SessionStore};
use crate::core::session::UserId;
use crate::core::ui::ChatId;
use repl::Speaker;

#[derive(Parser, Debug)]
#[command(name = "octo-chat", version, about = "Streaming chat relay for the terminal")]
struct Cli {
    /// Send a single message and exit
    #[arg(short, long)]
    prompt: Option<String>,

    /// Working directory
    #[arg(short = 'c', long = "cwd")]
    working_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Model to use (overrides config)
    #[arg(short, long)]
    model: Option<String>,

    /// Name shown for the local user
    #[arg(long, env = "USER", default_value = "user")]
    name: String,

    /// Numeric id of the local user
    #[arg(long, default_value_t = 1)]
    user_id: i64,
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    let mut config = crate::core::config::load_config(cli.working_dir.clone())
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    if let Some(model) = cli.model {
        config.model.name = model;
    }

    let filter = if cli.debug || config.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if !config.has_api_key() {
        anyhow::bail!("No API key found. Set OPENROUTER_API_KEY or add api_key to octo-chat.json.");
    }

    let db = crate::storage::Database::open(&config)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    db.run_migrations()
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let backend = crate::providers::create_backend(&config).map_err(|e| anyhow::anyhow!("{e}"))?;
    let ui = Arc::new(TerminalUi::new(config.data_path().join("images")));
    let sessions = Arc::new(SessionStore::new(config.system_prompt.clone()));
    let relay = ChatRelay::new(backend, ui, sessions, RelaySettings::from(&config))
        .with_usage_store(Arc::new(db.usage()));

    let speaker = Speaker {
        user_id: UserId(cli.user_id),
        name: cli.name,
        chat: ChatId(cli.user_id),
    };

    match cli.prompt {
        Some(prompt) => {
            repl::send(&relay, &speaker, prompt, Vec::new()).await;
            Ok(())
        }
        None => repl::run(&relay, &speaker, &config.model.name).await,
    }
}
