use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Chat with locally hosted models through the lumen relay.
#[derive(Parser)]
#[command(version, about, long_about = None, author)]
pub struct Cli {
    /// Base URL of the relay (defaults to the preferences file, then http://127.0.0.1:3000)
    #[arg(long, global = true, env = "LUMEN_RELAY")]
    pub relay: Option<String>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Run the relay in front of the local Ollama server
    Serve {
        /// Relay config file (TOML); defaults to <config dir>/lumen/relay.toml
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on
        #[arg(long, env = "PORT")]
        port: Option<u16>,

        /// Bind address
        #[arg(long)]
        bind: Option<String>,

        /// Ollama server URL or host:port
        #[arg(long, env = "OLLAMA_HOST")]
        upstream: Option<String>,

        /// Path to the ollama executable
        #[arg(long)]
        ollama_bin: Option<String>,
    },
    /// List installed models, marking the selected and loaded ones
    Models,
    /// Select a model and load it, unloading the previous one
    Select {
        /// Model name as reported by `lumen models`
        model: String,
    },
    /// Chat with the selected model. Without a prompt, starts an interactive session.
    Chat {
        /// Select and load this model first
        #[arg(short, long)]
        model: Option<String>,

        /// Recompute the token rate at most this often (milliseconds)
        #[arg(long)]
        min_update_interval_ms: Option<u64>,

        /// Prompt to send; reads prompts from stdin when omitted
        prompt: Vec<String>,
    },
}
