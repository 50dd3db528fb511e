//! Control of upstream model processes through the `ollama` executable.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{RelayError, Result};

/// Result of asking the upstream server to stop a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// The stop command reported failure, most likely because the model was
    /// not running. Callers treat this as success.
    NotRunning,
}

#[async_trait]
pub trait ProcessControl: Send + Sync + 'static {
    /// Names of the models currently resident, most recent first.
    async fn running_models(&self) -> Result<Vec<String>>;

    async fn stop(&self, model: &str) -> Result<StopOutcome>;
}

/// [`ProcessControl`] backed by `ollama ps` / `ollama stop`.
#[derive(Debug, Clone)]
pub struct OllamaCli {
    binary: String,
}

impl OllamaCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn process_error(&self, subcommand: &str, e: &std::io::Error) -> RelayError {
        RelayError::Process {
            command: format!("{} {subcommand}", self.binary),
            details: e.to_string(),
        }
    }
}

#[async_trait]
impl ProcessControl for OllamaCli {
    async fn running_models(&self) -> Result<Vec<String>> {
        let output = Command::new(&self.binary)
            .arg("ps")
            .output()
            .await
            .map_err(|e| self.process_error("ps", &e))?;

        if !output.status.success() {
            return Err(RelayError::Process {
                command: format!("{} ps", self.binary),
                details: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn stop(&self, model: &str) -> Result<StopOutcome> {
        let output = Command::new(&self.binary)
            .arg("stop")
            .arg(model)
            .output()
            .await
            .map_err(|e| self.process_error("stop", &e))?;

        if output.status.success() {
            info!(target: "lumen::relay::process", model, "Model stopped");
            Ok(StopOutcome::Stopped)
        } else {
            debug!(
                target: "lumen::relay::process",
                model,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Stop reported failure, treating model as not running"
            );
            Ok(StopOutcome::NotRunning)
        }
    }
}

/// Model names from `ollama ps` output: the first column of every row after
/// the header.
pub fn parse_ps_output(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}
