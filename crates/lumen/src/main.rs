use clap::Parser;
use eyre::Result;

use lumen::cli::{Cli, Commands};
use lumen::commands::{
    Command, chat::ChatCommand, models::ModelsCommand, select::SelectCommand,
    serve::ServeCommand,
};
use lumen_core::utils::tracing::{LogTarget, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    // Install color-eyre for better error reports
    color_eyre::install()?;

    // Load .env before parsing so PORT / OLLAMA_HOST / LUMEN_RELAY can come from it
    lumen::cli::config::load_env()?;

    let cli = Cli::parse();

    // The relay logs to stdout; client commands keep stdout for replies.
    let log_target = match cli.command {
        Commands::Serve { .. } => LogTarget::Stdout,
        _ => LogTarget::default_file(),
    };
    init_tracing(log_target)?;

    let relay = cli.relay.clone();
    let command: Box<dyn Command + Send + Sync> = match cli.command {
        Commands::Serve {
            config,
            port,
            bind,
            upstream,
            ollama_bin,
        } => Box::new(ServeCommand {
            config,
            port,
            bind,
            upstream,
            ollama_bin,
        }),
        Commands::Models => Box::new(ModelsCommand { relay }),
        Commands::Select { model } => Box::new(SelectCommand { relay, model }),
        Commands::Chat {
            model,
            min_update_interval_ms,
            prompt,
        } => Box::new(ChatCommand {
            relay,
            model,
            min_update_interval_ms,
            prompt: (!prompt.is_empty()).then(|| prompt.join(" ")),
        }),
    };

    command.execute().await
}
