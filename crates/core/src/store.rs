//! # Concept state store
//!
//! The keyed store of each concept's current value and derived activation state, with
//! change listeners.
//!
//! A process creates one store at boot and shares it as `Arc<ConceptStateStore>` with the
//! concept manager and anything that renders from it. Tests construct their own isolated
//! instances.
//!
//! ## State derivation
//!
//! When no state is given explicitly, it is derived from the value (see
//! [`derive_state`]): booleans map to themselves, undefined/`null` to `None`, anything else
//! to `Some(true)`.
//!
//! ## Notifications
//!
//! Every write notifies every listener synchronously before returning, even when the new
//! entry equals the old one. A listener that returns an error or panics is logged and
//! skipped; the remaining listeners still run and the write stands. [`ConceptStateStore::clear_all`]
//! notifies with the [`CLEAR_ALL_SENTINEL`] name and no value or state.

use crate::concept::{derive_state, ConceptInstance, ConceptMap};
use crate::constants::CLEAR_ALL_SENTINEL;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// A concept as held by the store.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StoredConcept {
    /// `None` is undefined; `Some(Value::Null)` is an explicit null.
    pub value: Option<Value>,
    pub state: Option<bool>,
}

/// What listeners receive on every write.
#[derive(Clone, Debug, PartialEq)]
pub struct ConceptEvent {
    pub name: String,
    pub value: Option<Value>,
    pub state: Option<bool>,
}

impl ConceptEvent {
    pub fn is_clear_all(&self) -> bool {
        self.name == CLEAR_ALL_SENTINEL
    }
}

/// `{name, value}` pair produced by [`ConceptStateStore::export_for_test_case`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExportedConcept {
    pub name: String,
    pub value: Value,
}

pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;
pub type ListenerResult = Result<(), ListenerError>;

type Listener = Arc<dyn Fn(&ConceptEvent) -> ListenerResult + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct ConceptStateStore {
    concepts: RwLock<BTreeMap<String, StoredConcept>>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener_id: AtomicU64,
}

impl std::fmt::Debug for ConceptStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConceptStateStore")
            .field("concepts", &self.len())
            .finish_non_exhaustive()
    }
}

impl ConceptStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `value` and the state derived from it, then notifies listeners.
    pub fn set_concept_state(&self, name: &str, value: Option<Value>) {
        let state = derive_state(value.as_ref());
        self.set_concept_state_with(name, value, state);
    }

    /// Writes `value` with an explicit `state`, then notifies listeners.
    pub fn set_concept_state_with(&self, name: &str, value: Option<Value>, state: Option<bool>) {
        {
            let mut concepts = self
                .concepts
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            concepts.insert(
                name.to_string(),
                StoredConcept {
                    value: value.clone(),
                    state,
                },
            );
        }

        self.notify(&ConceptEvent {
            name: name.to_string(),
            value,
            state,
        });
    }

    pub fn get_concept(&self, name: &str) -> Option<StoredConcept> {
        self.concepts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn get_concept_state(&self, name: &str) -> Option<bool> {
        self.get_concept(name).and_then(|c| c.state)
    }

    pub fn get_concept_value(&self, name: &str) -> Option<Value> {
        self.get_concept(name).and_then(|c| c.value)
    }

    /// Sets the concept back to undefined. The key stays present.
    pub fn reset_concept(&self, name: &str) {
        self.set_concept_state_with(name, None, None);
    }

    /// A snapshot copy; later writes do not show up in it.
    pub fn get_all_concepts(&self) -> BTreeMap<String, StoredConcept> {
        self.concepts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn concept_names(&self) -> Vec<String> {
        self.concepts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.concepts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear_all(&self) {
        self.concepts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        self.notify(&ConceptEvent {
            name: CLEAR_ALL_SENTINEL.to_string(),
            value: None,
            state: None,
        });
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConceptEvent) -> ListenerResult + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Returns `false` if no listener had this id.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Copies each concept's value (not its activation flag) from a test case map into the
    /// store, deriving state as usual.
    pub fn import_from_test_case(&self, concepts: &ConceptMap) {
        for (name, instance) in concepts.iter() {
            self.set_concept_state(name, Some(instance.value.clone()));
        }
    }

    /// Every concept whose value is neither undefined nor null, ordered by name.
    pub fn export_for_test_case(&self) -> Vec<ExportedConcept> {
        self.concepts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|(name, concept)| match &concept.value {
                None | Some(Value::Null) => None,
                Some(value) => Some(ExportedConcept {
                    name: name.clone(),
                    value: value.clone(),
                }),
            })
            .collect()
    }

    fn notify(&self, event: &ConceptEvent) {
        // Listeners run without the lock held so they may read or write the store.
        let listeners: Vec<(ListenerId, Listener)> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(
                    listener = ?id,
                    concept = %event.name,
                    "concept listener failed: {}",
                    e
                ),
                Err(_) => tracing::error!(
                    listener = ?id,
                    concept = %event.name,
                    "concept listener panicked"
                ),
            }
        }
    }
}

/// Builds a test case concept map from exported pairs. Activation flags start `false`.
pub fn exported_to_concept_map(exported: &[ExportedConcept]) -> ConceptMap {
    exported
        .iter()
        .map(|e| (e.name.clone(), ConceptInstance::new(e.value.clone(), false)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn recording_listener(
        store: &ConceptStateStore,
    ) -> (ListenerId, Arc<StdMutex<Vec<ConceptEvent>>>) {
        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = events.clone();
        let id = store.add_listener(move |event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });
        (id, events)
    }

    #[test]
    fn test_boolean_values_set_matching_state() {
        let store = ConceptStateStore::new();

        store.set_concept_state("A", Some(json!(true)));
        assert_eq!(store.get_concept_state("A"), Some(true));
        assert_eq!(store.get_concept_value("A"), Some(json!(true)));

        store.set_concept_state("A", Some(json!(false)));
        assert_eq!(store.get_concept_state("A"), Some(false));
        assert_eq!(store.get_concept_value("A"), Some(json!(false)));
    }

    #[test]
    fn test_state_derivation_for_other_values() {
        let store = ConceptStateStore::new();

        store.set_concept_state("N", Some(json!(0)));
        store.set_concept_state("S", Some(json!("")));
        store.set_concept_state("Z", Some(Value::Null));

        assert_eq!(store.get_concept_state("N"), Some(true));
        assert_eq!(store.get_concept_state("S"), Some(true));
        assert_eq!(store.get_concept_state("Z"), None);
        assert_eq!(store.get_concept_value("Z"), Some(Value::Null));
    }

    #[test]
    fn test_explicit_state_overrides_derivation() {
        let store = ConceptStateStore::new();

        store.set_concept_state_with("A", Some(json!(12)), Some(false));

        assert_eq!(
            store.get_concept("A"),
            Some(StoredConcept {
                value: Some(json!(12)),
                state: Some(false)
            })
        );
    }

    #[test]
    fn test_reset_concept_always_undefined() {
        let store = ConceptStateStore::new();
        store.set_concept_state("A", Some(json!(true)));

        store.reset_concept("A");
        store.reset_concept("NEVER_SET");

        for name in ["A", "NEVER_SET"] {
            assert_eq!(store.get_concept_state(name), None);
            assert_eq!(store.get_concept_value(name), None);
            assert!(store.get_concept(name).is_some());
        }
    }

    #[test]
    fn test_unknown_reads_are_none() {
        let store = ConceptStateStore::new();

        assert_eq!(store.get_concept("X"), None);
        assert_eq!(store.get_concept_state("X"), None);
        assert_eq!(store.get_concept_value("X"), None);
    }

    #[test]
    fn test_get_all_concepts_is_a_snapshot() {
        let store = ConceptStateStore::new();
        store.set_concept_state("A", Some(json!(1)));

        let snapshot = store.get_all_concepts();
        store.set_concept_state("A", Some(json!(2)));
        store.set_concept_state("B", Some(json!(3)));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["A"].value, Some(json!(1)));
    }

    #[test]
    fn test_listeners_receive_every_write_without_dedup() {
        let store = ConceptStateStore::new();
        let (_, events) = recording_listener(&store);

        store.set_concept_state("A", Some(json!(true)));
        store.set_concept_state("A", Some(json!(true)));

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], events[1]);
        assert_eq!(events[0].state, Some(true));
    }

    #[test]
    fn test_failing_listeners_are_isolated() {
        let store = ConceptStateStore::new();
        store.add_listener(|_| Err("listener exploded".into()));
        store.add_listener(|_| panic!("listener panicked"));
        let (_, events) = recording_listener(&store);

        store.set_concept_state("A", Some(json!(5)));

        assert_eq!(events.lock().unwrap().len(), 1);
        assert_eq!(store.get_concept_value("A"), Some(json!(5)));
    }

    #[test]
    fn test_remove_listener() {
        let store = ConceptStateStore::new();
        let (id, events) = recording_listener(&store);

        assert!(store.remove_listener(id));
        assert!(!store.remove_listener(id));
        store.set_concept_state("A", Some(json!(1)));

        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_listener_may_read_the_store() {
        let store = Arc::new(ConceptStateStore::new());
        let seen = Arc::new(StdMutex::new(None));
        let (reader, sink) = (store.clone(), seen.clone());
        store.add_listener(move |event| {
            *sink.lock().unwrap() = reader.get_concept_value(&event.name);
            Ok(())
        });

        store.set_concept_state("A", Some(json!("x")));

        assert_eq!(*seen.lock().unwrap(), Some(json!("x")));
    }

    #[test]
    fn test_clear_all_fires_sentinel() {
        let store = ConceptStateStore::new();
        store.set_concept_state("A", Some(json!(1)));
        let (_, events) = recording_listener(&store);

        store.clear_all();

        assert!(store.is_empty());
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_clear_all());
        assert_eq!(events[0].value, None);
        assert_eq!(events[0].state, None);
    }

    #[test]
    fn test_export_skips_null_and_undefined() {
        let store = ConceptStateStore::new();
        store.set_concept_state("A", Some(json!(70)));
        store.set_concept_state("B", Some(Value::Null));
        store.reset_concept("C");
        store.set_concept_state("D", Some(json!(false)));

        let exported = store.export_for_test_case();

        assert_eq!(
            exported,
            vec![
                ExportedConcept {
                    name: "A".into(),
                    value: json!(70)
                },
                ExportedConcept {
                    name: "D".into(),
                    value: json!(false)
                },
            ]
        );
    }

    #[test]
    fn test_export_import_round_trip() {
        let source = ConceptStateStore::new();
        source.set_concept_state("Weight", Some(json!(70)));
        source.set_concept_state("Sex", Some(json!("F")));
        source.set_concept_state("Pregnant", Some(json!(false)));

        let exported = source.export_for_test_case();
        let fresh = ConceptStateStore::new();
        fresh.import_from_test_case(&exported_to_concept_map(&exported));

        for item in &exported {
            assert_eq!(fresh.get_concept_value(&item.name), Some(item.value.clone()));
        }
    }

    #[test]
    fn test_import_copies_values_not_active_flags() {
        let store = ConceptStateStore::new();
        let concepts: ConceptMap = [("A", ConceptInstance::new(json!(false), true))]
            .into_iter()
            .collect();

        store.import_from_test_case(&concepts);

        assert_eq!(store.get_concept_state("A"), Some(false));
    }
}
