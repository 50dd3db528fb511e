use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};

pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:3000";

/// Last selected/loaded model, remembered across restarts for continuity only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPreferences {
    pub selected_model: Option<String>,
    pub loaded_model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Base URL of the relay, e.g. `http://127.0.0.1:3000`
    pub relay_url: Option<String>,

    /// Minimum interval between throughput recomputations while streaming
    pub min_update_interval_ms: Option<u64>,

    #[serde(default)]
    pub models: ModelPreferences,
}

impl Preferences {
    pub fn relay_url(&self) -> &str {
        self.relay_url.as_deref().unwrap_or(DEFAULT_RELAY_URL)
    }

    pub fn min_update_interval(&self) -> Option<Duration> {
        self.min_update_interval_ms.map(Duration::from_millis)
    }
}

/// Durable key/value store backing [`Preferences`].
///
/// Persisted values are never relied upon for correctness, so the
/// `remember_*` helpers log write failures instead of returning them.
pub trait PreferenceStore: Send + Sync {
    fn load(&self) -> Preferences;

    fn save(&self, preferences: &Preferences) -> Result<()>;

    fn remember_selected_model(&self, model: &str) {
        let mut preferences = self.load();
        preferences.models.selected_model = Some(model.to_string());
        if let Err(e) = self.save(&preferences) {
            warn!(target: "lumen::preferences", model, "Failed to persist selected model: {}", e);
        }
    }

    fn remember_loaded_model(&self, model: &str) {
        let mut preferences = self.load();
        preferences.models.loaded_model = Some(model.to_string());
        if let Err(e) = self.save(&preferences) {
            warn!(target: "lumen::preferences", model, "Failed to persist loaded model: {}", e);
        }
    }
}

/// TOML file under the user's config directory.
#[derive(Debug, Clone)]
pub struct FilePreferenceStore {
    path: PathBuf,
}

impl FilePreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the path to the default preferences file
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            Error::Configuration("Could not determine config directory".to_string())
        })?;
        Ok(config_dir.join("lumen").join("client.toml"))
    }

    pub fn open_default() -> Result<Self> {
        Ok(Self::new(Self::default_path()?))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn load(&self) -> Preferences {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Preferences::default(),
            Err(e) => {
                warn!(
                    target: "lumen::preferences",
                    "Failed to read preferences at {:?}: {}. Using defaults.",
                    self.path,
                    e
                );
                return Preferences::default();
            }
        };

        match toml::from_str(&contents) {
            Ok(preferences) => preferences,
            Err(e) => {
                warn!(
                    target: "lumen::preferences",
                    "Failed to parse preferences file at {:?}: {}. Using defaults.",
                    self.path,
                    e
                );
                Preferences::default()
            }
        }
    }

    fn save(&self, preferences: &Preferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(preferences)
            .map_err(|e| Error::Configuration(format!("Failed to serialize preferences: {e}")))?;

        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

/// Process-local store, used when nothing should touch the filesystem.
#[derive(Debug, Default)]
pub struct InMemoryPreferenceStore {
    preferences: Mutex<Preferences>,
}

impl InMemoryPreferenceStore {
    pub fn new(preferences: Preferences) -> Self {
        Self {
            preferences: Mutex::new(preferences),
        }
    }
}

impl PreferenceStore for InMemoryPreferenceStore {
    fn load(&self) -> Preferences {
        self.preferences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn save(&self, preferences: &Preferences) -> Result<()> {
        *self
            .preferences
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = preferences.clone();
        Ok(())
    }
}
