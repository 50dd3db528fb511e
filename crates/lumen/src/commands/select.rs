use async_trait::async_trait;
use eyre::{Result, bail};
use std::io::Write;

use super::{ClientContext, Command};
use lumen_core::lifecycle::SelectionOutcome;

pub struct SelectCommand {
    pub relay: Option<String>,
    pub model: String,
}

#[async_trait]
impl Command for SelectCommand {
    async fn execute(&self) -> Result<()> {
        let context = ClientContext::connect(self.relay.as_deref(), None).await?;
        let known = context
            .store
            .get_state()
            .models
            .iter()
            .any(|model| model.name == self.model);
        if !known {
            bail!("Model '{}' is not installed", self.model);
        }

        let mut stdout = std::io::stdout();
        writeln!(stdout, "Loading {}...", self.model)?;
        report(&self.model, context.lifecycle.select_model(&self.model).await)?;
        writeln!(stdout, "{} is ready", self.model)?;
        Ok(())
    }
}

/// Turn a selection outcome into a command result.
pub fn report(model: &str, outcome: SelectionOutcome) -> Result<()> {
    match outcome {
        SelectionOutcome::Loaded | SelectionOutcome::AlreadyLoaded => Ok(()),
        SelectionOutcome::Skipped { status } => {
            bail!("Model '{}' is busy ({})", model, status)
        }
        SelectionOutcome::Failed { reason } => {
            bail!("Failed to load '{}': {}", model, reason)
        }
    }
}
