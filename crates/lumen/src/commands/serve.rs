use async_trait::async_trait;
use eyre::Result;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

use super::Command;
use lumen_relay::RelayConfig;
use lumen_relay::config::normalize_upstream_url;

pub struct ServeCommand {
    pub config: Option<PathBuf>,
    pub port: Option<u16>,
    pub bind: Option<String>,
    pub upstream: Option<String>,
    pub ollama_bin: Option<String>,
}

impl ServeCommand {
    /// File settings with command-line and environment overrides applied.
    pub fn resolve_config(&self) -> Result<RelayConfig> {
        let mut config = RelayConfig::load(self.config.as_deref())?;
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = &self.bind {
            config.bind.clone_from(bind);
        }
        if let Some(upstream) = &self.upstream {
            config.upstream_url = normalize_upstream_url(upstream);
        }
        if let Some(bin) = &self.ollama_bin {
            config.ollama_bin.clone_from(bin);
        }
        Ok(config)
    }
}

#[async_trait]
impl Command for ServeCommand {
    async fn execute(&self) -> Result<()> {
        let config = self.resolve_config()?;
        let addr = config.socket_addr()?;

        let mut stdout = std::io::stdout();
        writeln!(stdout, "Relay running... http://{addr}")?;
        writeln!(stdout, "Press Ctrl+C to shutdown")?;

        lumen_relay::serve(&config).await?;
        info!(target: "lumen::relay", "Relay shutdown complete");
        Ok(())
    }
}
