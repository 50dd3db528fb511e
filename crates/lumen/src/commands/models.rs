use async_trait::async_trait;
use eyre::Result;
use std::io::Write;

use super::{ClientContext, Command};
use lumen_core::state::{ModelStatus, StateSnapshot};

pub struct ModelsCommand {
    pub relay: Option<String>,
}

#[async_trait]
impl Command for ModelsCommand {
    async fn execute(&self) -> Result<()> {
        let context = ClientContext::connect(self.relay.as_deref(), None).await?;
        let state = context.store.get_state();

        let mut stdout = std::io::stdout();
        if state.models.is_empty() {
            writeln!(stdout, "No models installed")?;
            return Ok(());
        }
        for line in model_lines(&state) {
            writeln!(stdout, "{line}")?;
        }
        Ok(())
    }
}

/// One line per model: a `*` for the selection, then the name and its status.
pub fn model_lines(state: &StateSnapshot) -> Vec<String> {
    state
        .models
        .iter()
        .map(|model| {
            let marker = if state.selected_model.as_deref() == Some(model.name.as_str()) {
                '*'
            } else {
                ' '
            };
            match state.status_of(&model.name) {
                ModelStatus::Available => format!("{marker} {}", model.name),
                status => format!("{marker} {} ({status})", model.name),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::state::{ModelInfo, ModelStatusMap};

    #[test]
    fn marks_selected_and_loaded_models() {
        let state = StateSnapshot {
            models: vec![ModelInfo::new("a"), ModelInfo::new("b")],
            selected_model: Some("b".to_string()),
            loaded_model: Some("a".to_string()),
            model_status: ModelStatusMap::with_loaded("a"),
            ..Default::default()
        };
        assert_eq!(model_lines(&state), vec!["  a (loaded)", "* b"]);
    }
}
