//! Observable state container.
//!
//! `StateStore` owns a single `StateSnapshot`. Every update builds a new
//! snapshot (shallow merge of a `StatePatch` into a clone of the current one)
//! and swaps it in wholesale, so readers only ever observe complete snapshots.
//! Subscribers are notified synchronously, in subscription order, once per
//! update.
//!
//! A listener may call back into the store. The nested update is applied
//! immediately, but its notification is queued and delivered after the current
//! pass finishes, so every listener sees snapshots in the order they were
//! produced.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};

use super::message::{Message, ModelInfo};
use super::model_status::{IllegalTransition, ModelStatus, ModelStatusMap};
use crate::preferences::ModelPreferences;

/// The store's content at any instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    pub models: Vec<ModelInfo>,
    pub selected_model: Option<String>,
    pub loaded_model: Option<String>,
    pub model_status: ModelStatusMap,
    pub message_history: Vec<Message>,
    pub is_responding: bool,
}

impl StateSnapshot {
    pub fn status_of(&self, model: &str) -> ModelStatus {
        self.model_status.get(model)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.message_history.last()
    }
}

/// A partial update. Fields left unset keep their current value.
#[derive(Debug, Clone, Default, PartialEq)]
#[must_use]
pub struct StatePatch {
    models: Option<Vec<ModelInfo>>,
    selected_model: Option<Option<String>>,
    loaded_model: Option<Option<String>>,
    model_status: Option<ModelStatusMap>,
    message_history: Option<Vec<Message>>,
    is_responding: Option<bool>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn models(mut self, models: Vec<ModelInfo>) -> Self {
        self.models = Some(models);
        self
    }

    pub fn selected_model(mut self, model: Option<String>) -> Self {
        self.selected_model = Some(model);
        self
    }

    pub fn loaded_model(mut self, model: Option<String>) -> Self {
        self.loaded_model = Some(model);
        self
    }

    pub fn model_status(mut self, status: ModelStatusMap) -> Self {
        self.model_status = Some(status);
        self
    }

    pub fn message_history(mut self, history: Vec<Message>) -> Self {
        self.message_history = Some(history);
        self
    }

    pub fn is_responding(mut self, responding: bool) -> Self {
        self.is_responding = Some(responding);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn apply(self, state: &mut StateSnapshot) {
        if let Some(models) = self.models {
            state.models = models;
        }
        if let Some(selected) = self.selected_model {
            state.selected_model = selected;
        }
        if let Some(loaded) = self.loaded_model {
            state.loaded_model = loaded;
        }
        if let Some(status) = self.model_status {
            state.model_status = status;
        }
        if let Some(history) = self.message_history {
            state.message_history = history;
        }
        if let Some(responding) = self.is_responding {
            state.is_responding = responding;
        }
    }
}

type Listener = Arc<dyn Fn(&StateSnapshot) + Send + Sync>;

struct Snapshots {
    current: Arc<StateSnapshot>,
    pending: VecDeque<Arc<StateSnapshot>>,
}

struct Inner {
    snapshots: Mutex<Snapshots>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    dispatch: Mutex<()>,
    dispatcher: Mutex<Option<ThreadId>>,
    next_listener_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-wide source of truth for the model lifecycle and the transcript.
///
/// Cloning is cheap; clones share the same underlying state.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Inner>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(StateSnapshot::default())
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("state", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl StateStore {
    pub fn new(initial: StateSnapshot) -> Self {
        Self {
            inner: Arc::new(Inner {
                snapshots: Mutex::new(Snapshots {
                    current: Arc::new(initial),
                    pending: VecDeque::new(),
                }),
                listeners: Mutex::new(Vec::new()),
                dispatch: Mutex::new(()),
                dispatcher: Mutex::new(None),
                next_listener_id: AtomicU64::new(0),
            }),
        }
    }

    /// Owned copy of the current snapshot.
    pub fn get_state(&self) -> StateSnapshot {
        (*self.snapshot()).clone()
    }

    /// Shared handle to the current snapshot, without copying it.
    pub fn snapshot(&self) -> Arc<StateSnapshot> {
        lock(&self.inner.snapshots).current.clone()
    }

    /// Shallow-merge `patch` into the current snapshot and notify subscribers.
    pub fn set_state(&self, patch: StatePatch) {
        self.update(|_| patch);
    }

    /// Read-modify-write against the current snapshot.
    ///
    /// `build` runs while the store is locked and must not call back into it.
    pub fn update<F>(&self, build: F)
    where
        F: FnOnce(&StateSnapshot) -> StatePatch,
    {
        let Ok(()) = self.try_update(|state| Ok::<_, Infallible>(build(state)));
    }

    /// Like [`StateStore::update`], but `build` may refuse the update. A
    /// refused update changes nothing and notifies nobody.
    pub fn try_update<F, E>(&self, build: F) -> Result<(), E>
    where
        F: FnOnce(&StateSnapshot) -> Result<StatePatch, E>,
    {
        {
            let mut snapshots = lock(&self.inner.snapshots);
            let patch = build(&snapshots.current)?;
            let mut next = (*snapshots.current).clone();
            patch.apply(&mut next);
            let next = Arc::new(next);
            snapshots.current = next.clone();
            snapshots.pending.push_back(next);
        }
        self.dispatch();
        Ok(())
    }

    /// Move `model` to `next` through the lifecycle table, merging `patch` in
    /// the same update. Nothing changes if the transition is illegal.
    ///
    /// Any `model_status` carried by `patch` is overridden by the transition.
    pub fn transition_model(
        &self,
        model: &str,
        next: ModelStatus,
        patch: StatePatch,
    ) -> Result<(), IllegalTransition> {
        self.try_update(|state| {
            let mut status = state.model_status.clone();
            status.transition(model, next)?;
            Ok(patch.model_status(status))
        })
    }

    /// Seed the selected and loaded model from persisted preferences.
    pub fn hydrate(&self, preferences: &ModelPreferences) {
        let mut patch = StatePatch::new();
        if let Some(selected) = &preferences.selected_model {
            patch = patch.selected_model(Some(selected.clone()));
        }
        if let Some(loaded) = &preferences.loaded_model {
            patch = patch
                .loaded_model(Some(loaded.clone()))
                .model_status(ModelStatusMap::with_loaded(loaded.clone()));
        }
        if !patch.is_empty() {
            self.set_state(patch);
        }
    }

    /// Register `listener`; it is called with every new snapshot until the
    /// returned subscription is dropped or unsubscribed.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StateSnapshot) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners).push((id, Arc::new(listener)));
        Subscription {
            id,
            store: Arc::downgrade(&self.inner),
        }
    }

    fn dispatch(&self) {
        let me = thread::current().id();
        if *lock(&self.inner.dispatcher) == Some(me) {
            // Re-entrant update from inside a listener; the running pass drains it.
            return;
        }

        let _dispatch = lock(&self.inner.dispatch);
        *lock(&self.inner.dispatcher) = Some(me);
        let _reset = DispatcherReset(&self.inner);

        loop {
            let Some(snapshot) = lock(&self.inner.snapshots).pending.pop_front() else {
                break;
            };
            let listeners: Vec<Listener> = lock(&self.inner.listeners)
                .iter()
                .map(|(_, listener)| listener.clone())
                .collect();
            for listener in listeners {
                listener(&snapshot);
            }
        }
    }
}

struct DispatcherReset<'a>(&'a Inner);

impl Drop for DispatcherReset<'_> {
    fn drop(&mut self) {
        *lock(&self.0.dispatcher) = None;
    }
}

/// Handle returned by [`StateStore::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping a subscription immediately unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    store: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            lock(&inner.listeners).retain(|(id, _)| *id != self.id);
        }
    }
}
