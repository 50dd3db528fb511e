use std::sync::{Arc, Mutex};

use lumen_core::lifecycle::{ModelLifecycleController, SelectionOutcome};
use lumen_core::preferences::{InMemoryPreferenceStore, PreferenceStore, Preferences};
use lumen_core::state::{ModelInfo, ModelStatus, StateSnapshot, StateStore, Subscription};
use lumen_core::test_utils::FakeRelay;
use proptest::prelude::*;

fn catalog(names: &[&str]) -> StateStore {
    StateStore::new(StateSnapshot {
        models: names.iter().map(|name| ModelInfo::new(*name)).collect(),
        ..Default::default()
    })
}

fn controller(
    store: &StateStore,
    relay: Arc<FakeRelay>,
) -> (ModelLifecycleController, Arc<InMemoryPreferenceStore>) {
    let preferences = Arc::new(InMemoryPreferenceStore::default());
    let controller = ModelLifecycleController::new(store.clone(), relay, preferences.clone());
    (controller, preferences)
}

fn record_statuses(store: &StateStore) -> (Arc<Mutex<Vec<Vec<(String, ModelStatus)>>>>, Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let subscription = store.subscribe(move |state| {
        let statuses = state
            .model_status
            .iter()
            .map(|(name, status)| (name.to_string(), status))
            .collect();
        sink.lock().unwrap().push(statuses);
    });
    (seen, subscription)
}

fn statuses(pairs: &[(&str, ModelStatus)]) -> Vec<(String, ModelStatus)> {
    pairs
        .iter()
        .map(|(name, status)| (name.to_string(), *status))
        .collect()
}

async fn wait_for_status(store: &StateStore, model: &str, status: ModelStatus) {
    while store.get_state().status_of(model) != status {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn switching_models_unloads_then_loads() {
    let store = catalog(&["a", "b"]);
    let relay = Arc::new(FakeRelay::new(&["a", "b"]));
    let (controller, _preferences) = controller(&store, relay.clone());

    assert_eq!(controller.select_model("a").await, SelectionOutcome::Loaded);
    let state = store.get_state();
    assert_eq!(state.status_of("a"), ModelStatus::Loaded);
    assert_eq!(state.model_status.len(), 1);
    assert_eq!(state.loaded_model.as_deref(), Some("a"));

    let (seen, _subscription) = record_statuses(&store);
    assert_eq!(controller.select_model("b").await, SelectionOutcome::Loaded);

    use ModelStatus::{Closing, Loaded, Loading};
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            statuses(&[("a", Loaded)]),
            statuses(&[("a", Closing)]),
            statuses(&[]),
            statuses(&[("b", Loading)]),
            statuses(&[("b", Loaded)]),
        ]
    );

    let state = store.get_state();
    assert_eq!(state.selected_model.as_deref(), Some("b"));
    assert_eq!(state.loaded_model.as_deref(), Some("b"));
    assert_eq!(state.status_of("a"), ModelStatus::Available);
    assert_eq!(state.model_status.len(), 1);
    assert_eq!(relay.loads(), vec!["a", "b"]);
    assert_eq!(relay.closes(), vec!["a"]);
}

#[tokio::test]
async fn selecting_a_model_mid_load_is_a_no_op() {
    let store = catalog(&["a"]);
    let (relay, gate) = FakeRelay::new(&["a"]).with_load_gate();
    let relay = Arc::new(relay);
    let (controller, _preferences) = controller(&store, relay.clone());

    let first = tokio::spawn({
        let controller = controller.clone();
        async move { controller.select_model("a").await }
    });
    wait_for_status(&store, "a", ModelStatus::Loading).await;

    let before = store.get_state();
    let (seen, subscription) = record_statuses(&store);
    assert_eq!(
        controller.select_model("a").await,
        SelectionOutcome::Skipped {
            status: ModelStatus::Loading
        }
    );
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(store.get_state(), before);
    assert_eq!(relay.loads(), vec!["a"]);
    drop(subscription);

    gate.add_permits(1);
    assert_eq!(first.await.unwrap(), SelectionOutcome::Loaded);
    assert_eq!(relay.loads(), vec!["a"]);
    assert_eq!(store.get_state().status_of("a"), ModelStatus::Loaded);
}

#[tokio::test]
async fn selecting_a_model_mid_unload_is_a_no_op() {
    let store = catalog(&["a", "b"]);
    let (relay, gate) = FakeRelay::new(&["a", "b"]).with_close_gate();
    let relay = Arc::new(relay);
    let (controller, _preferences) = controller(&store, relay.clone());
    assert_eq!(controller.select_model("a").await, SelectionOutcome::Loaded);

    let switch = tokio::spawn({
        let controller = controller.clone();
        async move { controller.select_model("b").await }
    });
    wait_for_status(&store, "a", ModelStatus::Closing).await;

    let before = store.get_state();
    let calls = relay.calls();
    let (seen, subscription) = record_statuses(&store);
    assert_eq!(
        controller.select_model("a").await,
        SelectionOutcome::Skipped {
            status: ModelStatus::Closing
        }
    );
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(store.get_state(), before);
    assert_eq!(relay.calls(), calls);
    drop(subscription);

    gate.add_permits(1);
    assert_eq!(switch.await.unwrap(), SelectionOutcome::Loaded);
    assert_eq!(relay.closes(), vec!["a"]);
    assert_eq!(relay.loads(), vec!["a", "b"]);
    assert_eq!(store.get_state().loaded_model.as_deref(), Some("b"));
}

#[tokio::test]
async fn failed_unload_is_retried_on_the_next_switch() {
    let store = catalog(&["a", "b", "c"]);
    let relay = Arc::new(FakeRelay::new(&["a", "b", "c"]));
    let (controller, _preferences) = controller(&store, relay.clone());
    assert_eq!(controller.select_model("a").await, SelectionOutcome::Loaded);

    relay.fail_close("a");
    relay.fail_load("b");
    let outcome = controller.select_model("b").await;
    assert!(matches!(outcome, SelectionOutcome::Failed { .. }));

    let state = store.get_state();
    assert_eq!(state.loaded_model.as_deref(), Some("a"));
    assert_eq!(state.status_of("a"), ModelStatus::Available);
    assert_eq!(state.status_of("b"), ModelStatus::Error);

    relay.clear_failures();
    assert_eq!(controller.select_model("c").await, SelectionOutcome::Loaded);

    assert_eq!(relay.closes(), vec!["a", "a"]);
    let state = store.get_state();
    assert_eq!(state.loaded_model.as_deref(), Some("c"));
    assert_eq!(state.model_status.loaded_models().collect::<Vec<_>>(), vec!["c"]);
}

#[tokio::test]
async fn failed_load_marks_error_and_keeps_loaded_model() {
    let store = catalog(&["a", "b"]);
    let relay = Arc::new(FakeRelay::new(&["a", "b"]));
    let (controller, preferences) = controller(&store, relay.clone());

    relay.fail_load("a");
    let outcome = controller.select_model("a").await;
    assert!(matches!(outcome, SelectionOutcome::Failed { .. }));

    let state = store.get_state();
    assert_eq!(state.status_of("a"), ModelStatus::Error);
    assert_eq!(state.loaded_model, None);
    assert_eq!(state.selected_model.as_deref(), Some("a"));
    assert_eq!(preferences.load().models.loaded_model, None);

    // Error is not sticky.
    relay.clear_failures();
    assert_eq!(controller.select_model("a").await, SelectionOutcome::Loaded);
    assert_eq!(store.get_state().status_of("a"), ModelStatus::Loaded);
}

#[tokio::test]
async fn failed_unload_does_not_block_selection() {
    let store = catalog(&["a", "b"]);
    let relay = Arc::new(FakeRelay::new(&["a", "b"]));
    let (controller, _preferences) = controller(&store, relay.clone());

    controller.select_model("a").await;
    relay.fail_close("a");
    assert_eq!(controller.select_model("b").await, SelectionOutcome::Loaded);

    let state = store.get_state();
    assert_eq!(state.status_of("a"), ModelStatus::Available);
    assert_eq!(state.status_of("b"), ModelStatus::Loaded);
    assert_eq!(state.loaded_model.as_deref(), Some("b"));
    assert_eq!(relay.closes(), vec!["a"]);
}

#[tokio::test]
async fn reselecting_the_loaded_model_does_not_reload() {
    let store = catalog(&["a"]);
    let relay = Arc::new(FakeRelay::new(&["a"]));
    let (controller, _preferences) = controller(&store, relay.clone());

    controller.select_model("a").await;
    assert_eq!(
        controller.select_model("a").await,
        SelectionOutcome::AlreadyLoaded
    );
    assert_eq!(relay.loads(), vec!["a"]);
    assert!(relay.closes().is_empty());
}

#[tokio::test]
async fn selections_are_persisted() {
    let store = catalog(&["a", "b"]);
    let relay = Arc::new(FakeRelay::new(&["a", "b"]));
    let (controller, preferences) = controller(&store, relay.clone());

    relay.fail_load("b");
    controller.select_model("a").await;
    controller.select_model("b").await;

    let persisted = preferences.load().models;
    assert_eq!(persisted.selected_model.as_deref(), Some("b"));
    assert_eq!(persisted.loaded_model.as_deref(), Some("a"));
}

#[tokio::test]
async fn initialize_prefers_persisted_then_loaded_then_first() {
    let relay = Arc::new(FakeRelay::new(&["a", "b", "c"]).with_loaded("b"));

    let store = StateStore::default();
    let preferences = Arc::new(InMemoryPreferenceStore::default());
    let controller = ModelLifecycleController::new(store.clone(), relay.clone(), preferences.clone());
    controller.initialize().await.unwrap();

    let state = store.get_state();
    assert_eq!(state.models.len(), 3);
    assert_eq!(state.loaded_model.as_deref(), Some("b"));
    assert_eq!(state.selected_model.as_deref(), Some("b"));
    assert_eq!(state.status_of("b"), ModelStatus::Loaded);

    let mut remembered = Preferences::default();
    remembered.models.selected_model = Some("c".to_string());
    preferences.save(&remembered).unwrap();
    controller.initialize().await.unwrap();
    assert_eq!(store.get_state().selected_model.as_deref(), Some("c"));

    let idle = Arc::new(FakeRelay::new(&["a", "b"]));
    let store = StateStore::default();
    ModelLifecycleController::new(store.clone(), idle, Arc::new(InMemoryPreferenceStore::default()))
        .initialize()
        .await
        .unwrap();
    let state = store.get_state();
    assert_eq!(state.selected_model.as_deref(), Some("a"));
    assert_eq!(state.loaded_model, None);
    assert!(state.model_status.is_empty());
}

#[tokio::test]
async fn initialized_loaded_model_is_unloaded_on_switch() {
    let relay = Arc::new(FakeRelay::new(&["a", "b"]).with_loaded("a"));
    let store = StateStore::default();
    let (controller, _preferences) = controller(&store, relay.clone());
    controller.initialize().await.unwrap();

    assert_eq!(
        controller.select_model("a").await,
        SelectionOutcome::AlreadyLoaded
    );
    assert_eq!(controller.select_model("b").await, SelectionOutcome::Loaded);
    assert_eq!(relay.closes(), vec!["a"]);
    assert_eq!(relay.resident().as_deref(), Some("b"));
}

#[derive(Debug, Clone)]
struct Step {
    model: usize,
    fail_load: bool,
    fail_close: bool,
}

fn arb_step() -> impl Strategy<Value = Step> {
    (0usize..3, any::<bool>(), any::<bool>()).prop_map(|(model, fail_load, fail_close)| Step {
        model,
        fail_load,
        fail_close,
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_at_most_one_model_is_loaded(steps in prop::collection::vec(arb_step(), 1..12)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let names = ["a", "b", "c"];

        runtime.block_on(async {
            let store = catalog(&names);
            let relay = Arc::new(FakeRelay::new(&names));
            let (controller, _preferences) = controller(&store, relay.clone());

            for step in &steps {
                let name = names[step.model];
                relay.clear_failures();
                if step.fail_load {
                    relay.fail_load(name);
                }
                if step.fail_close {
                    for other in names.iter().filter(|other| **other != name) {
                        relay.fail_close(other);
                    }
                }

                let previous = store.get_state().loaded_model.filter(|loaded| loaded != name);
                let closes_before = relay.closes().len();

                controller.select_model(name).await;

                // Switching away always asks the relay to unload the previous model.
                if let Some(previous) = previous {
                    let closes = relay.closes();
                    prop_assert!(closes[closes_before..].contains(&previous));
                }

                let state = store.get_state();
                let loaded: Vec<&str> = state.model_status.loaded_models().collect();
                prop_assert!(loaded.len() <= 1, "several loaded models: {:?}", loaded);
                if let Some(only) = loaded.first() {
                    prop_assert_eq!(state.loaded_model.as_deref(), Some(*only));
                }
                prop_assert!(!state.model_status.iter().any(|(_, status)| status.is_transitioning()));
                prop_assert_eq!(state.selected_model.as_deref(), Some(name));
            }
            Ok(())
        })?;
    }
}
