//! Selecting, loading and unloading models.
//!
//! At most one model is resident upstream at a time. Selecting a model
//! unloads the previous one first, then loads the new one with a priming
//! request. Transitions are not serialized: two overlapping selections of
//! different models may interleave. The per-model guard (a selection of a
//! model that is already loading or closing is skipped) together with
//! last-write-wins on `selected_model` is the only protection.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::RelayApi;
use crate::error::Result;
use crate::preferences::PreferenceStore;
use crate::state::{IllegalTransition, ModelStatus, ModelStatusMap, StatePatch, StateStore};

/// How a call to [`ModelLifecycleController::select_model`] settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// A load or unload of this model was already in flight; nothing changed.
    Skipped { status: ModelStatus },
    /// The model was already resident; only the selection changed.
    AlreadyLoaded,
    /// The model is now resident.
    Loaded,
    /// The load failed and the model is marked `error`.
    Failed { reason: String },
}

#[derive(Clone)]
pub struct ModelLifecycleController {
    store: StateStore,
    api: Arc<dyn RelayApi>,
    preferences: Arc<dyn PreferenceStore>,
}

impl std::fmt::Debug for ModelLifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelLifecycleController")
            .finish_non_exhaustive()
    }
}

impl ModelLifecycleController {
    pub fn new(
        store: StateStore,
        api: Arc<dyn RelayApi>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self {
            store,
            api,
            preferences,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Fetch the catalog and the resident model from the relay.
    ///
    /// The selection becomes the persisted choice, else the resident model,
    /// else the first catalog entry.
    pub async fn initialize(&self) -> Result<()> {
        let loaded = self.api.loaded_model().await?;
        let models = self.api.list_models().await?;
        let persisted = self.preferences.load().models.selected_model;

        let selected = persisted
            .or_else(|| loaded.clone())
            .or_else(|| models.first().map(|model| model.name.clone()));
        let status = match &loaded {
            Some(name) => ModelStatusMap::with_loaded(name.clone()),
            None => ModelStatusMap::new(),
        };

        info!(
            target: "lumen::lifecycle",
            models = models.len(),
            loaded = ?loaded,
            selected = ?selected,
            "Models initialized"
        );

        self.store.set_state(
            StatePatch::new()
                .models(models)
                .loaded_model(loaded)
                .model_status(status)
                .selected_model(selected),
        );
        Ok(())
    }

    /// Make `name` the selected and resident model.
    ///
    /// Unload failures of the previous model are logged and do not stop the
    /// selection. Load failures mark `name` as `error` and leave
    /// `loaded_model` as it was.
    pub async fn select_model(&self, name: &str) -> SelectionOutcome {
        let mut previous = None;
        let mut already_loaded = false;
        let guard = self.store.try_update(|state| {
            let status = state.status_of(name);
            if status.is_transitioning() {
                return Err(status);
            }
            already_loaded = status == ModelStatus::Loaded
                && state.loaded_model.as_deref() == Some(name);
            previous = state.loaded_model.clone().filter(|loaded| loaded != name);
            Ok(StatePatch::new().selected_model(Some(name.to_string())))
        });
        if let Err(status) = guard {
            debug!(
                target: "lumen::lifecycle",
                model = name,
                %status,
                "Transition already in flight, skipping selection"
            );
            return SelectionOutcome::Skipped { status };
        }
        self.preferences.remember_selected_model(name);

        if already_loaded {
            debug!(target: "lumen::lifecycle", model = name, "Model already loaded");
            return SelectionOutcome::AlreadyLoaded;
        }

        if let Some(previous) = previous {
            self.unload(&previous).await;
        }

        self.load(name).await
    }

    async fn unload(&self, model: &str) {
        let closing = self.store.try_update(|state| {
            let mut status = state.model_status.clone();
            status.begin_close(model)?;
            Ok::<_, IllegalTransition>(StatePatch::new().model_status(status))
        });
        if let Err(e) = closing {
            // Another selection is already loading or unloading it.
            debug!(target: "lumen::lifecycle", "Not unloading: {}", e);
            return;
        }

        info!(target: "lumen::lifecycle", model, "Unloading model");
        let result = self.api.close_model(model).await;
        if let Err(e) = &result {
            warn!(target: "lumen::lifecycle", model, "Failed to unload model: {}", e);
        }

        self.store.update(|state| {
            let mut status = state.model_status.clone();
            if let Err(e) = status.transition(model, ModelStatus::Available) {
                debug!(target: "lumen::lifecycle", "Status changed during unload: {}", e);
            }
            let mut patch = StatePatch::new().model_status(status);
            if result.is_ok() && state.loaded_model.as_deref() == Some(model) {
                patch = patch.loaded_model(None);
            }
            patch
        });
    }

    async fn load(&self, name: &str) -> SelectionOutcome {
        if let Err(e) = self
            .store
            .transition_model(name, ModelStatus::Loading, StatePatch::new())
        {
            debug!(target: "lumen::lifecycle", "Not loading: {}", e);
            return SelectionOutcome::Skipped { status: e.from };
        }

        info!(target: "lumen::lifecycle", model = name, "Loading model");
        match self.api.load_model(name).await {
            Ok(()) => {
                let settled = self.store.transition_model(
                    name,
                    ModelStatus::Loaded,
                    StatePatch::new().loaded_model(Some(name.to_string())),
                );
                if let Err(e) = settled {
                    debug!(target: "lumen::lifecycle", "Status changed during load: {}", e);
                }
                self.preferences.remember_loaded_model(name);
                info!(target: "lumen::lifecycle", model = name, "Model loaded");
                SelectionOutcome::Loaded
            }
            Err(e) => {
                warn!(target: "lumen::lifecycle", model = name, "Failed to load model: {}", e);
                if let Err(e) = self
                    .store
                    .transition_model(name, ModelStatus::Error, StatePatch::new())
                {
                    debug!(target: "lumen::lifecycle", "Status changed during load: {}", e);
                }
                SelectionOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
