//! Per-model lifecycle tags and the transition table that guards them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::Display;
use thiserror::Error;

/// Lifecycle tag for a single model.
///
/// `available -> loading -> loaded -> closing -> available`, with `error`
/// reachable from `loading` or `closing`. `error` is not sticky: the next
/// attempt may move the model to `loading` again.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModelStatus {
    #[default]
    Available,
    Loading,
    Loaded,
    Closing,
    Error,
}

impl ModelStatus {
    /// A load or unload is in flight for this model.
    pub fn is_transitioning(self) -> bool {
        matches!(self, ModelStatus::Loading | ModelStatus::Closing)
    }

    pub fn can_transition_to(self, next: ModelStatus) -> bool {
        use ModelStatus::{Available, Closing, Error, Loaded, Loading};
        matches!(
            (self, next),
            (Available, Loading)
                | (Loading, Loaded)
                | (Loading, Error)
                | (Loaded, Closing)
                | (Closing, Available)
                | (Closing, Error)
                | (Error, Loading)
                | (Error, Available)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal status transition for model '{model}': {from} -> {to}")]
pub struct IllegalTransition {
    pub model: String,
    pub from: ModelStatus,
    pub to: ModelStatus,
}

/// Status of every model that is not in the default `available` state.
///
/// A missing key means `available`; moving a model back to `available`
/// removes its entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelStatusMap(BTreeMap<String, ModelStatus>);

impl ModelStatusMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a map in which `model` is already resident upstream.
    pub fn with_loaded(model: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(model.into(), ModelStatus::Loaded);
        Self(map)
    }

    pub fn get(&self, model: &str) -> ModelStatus {
        self.0.get(model).copied().unwrap_or_default()
    }

    /// Move `model` to `next`, rejecting moves outside the lifecycle table.
    ///
    /// Clearing a model that is already `available` is accepted as a no-op.
    pub fn transition(&mut self, model: &str, next: ModelStatus) -> Result<(), IllegalTransition> {
        let current = self.get(model);
        if current == ModelStatus::Available && next == ModelStatus::Available {
            return Ok(());
        }
        if !current.can_transition_to(next) {
            return Err(IllegalTransition {
                model: model.to_string(),
                from: current,
                to: next,
            });
        }

        if next == ModelStatus::Available {
            self.0.remove(model);
        } else {
            self.0.insert(model.to_string(), next);
        }
        Ok(())
    }

    /// Mark the resident `model` as `closing` whatever its settled status.
    ///
    /// The tag of a resident model can be out of date (a failed unload clears
    /// it while the model stays up), so only an in-flight load or unload
    /// refuses.
    pub fn begin_close(&mut self, model: &str) -> Result<(), IllegalTransition> {
        let current = self.get(model);
        if current.is_transitioning() {
            return Err(IllegalTransition {
                model: model.to_string(),
                from: current,
                to: ModelStatus::Closing,
            });
        }
        self.0.insert(model.to_string(), ModelStatus::Closing);
        Ok(())
    }

    pub fn loaded_models(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(|(_, status)| **status == ModelStatus::Loaded)
            .map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ModelStatus)> {
        self.0.iter().map(|(name, status)| (name.as_str(), *status))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
