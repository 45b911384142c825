//! Concept maps: the name → `{value, isActive}` instantiations that expressions are
//! evaluated against.
//!
//! A map is owned by exactly one entity. The concept manager owns the live instantiation;
//! every test patient and test case owns its own deep copy. `Clone` is a deep copy, so a
//! cloned map never shares state with its source.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single concept entry in an instantiation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptInstance {
    /// The raw datum: string, number, boolean or null.
    #[serde(default)]
    pub value: Value,
    /// Activation flag consumed by the evaluator. Independent of the store's tri-state.
    #[serde(default)]
    pub is_active: bool,
}

impl ConceptInstance {
    pub fn new(value: Value, is_active: bool) -> Self {
        Self { value, is_active }
    }
}

/// Mapping from concept name to its instance.
///
/// Keys are case-sensitive and never removed individually; "deleting" a concept means
/// resetting it to the default instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConceptMap(BTreeMap<String, ConceptInstance>);

impl ConceptMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the initial instantiation: one default entry (`value = null`,
    /// `isActive = false`) per distinct concept name.
    pub fn instantiate<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            names
                .into_iter()
                .map(|name| (name.into(), ConceptInstance::default()))
                .collect(),
        )
    }

    pub fn get(&self, name: &str) -> Option<&ConceptInstance> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, instance: ConceptInstance) {
        self.0.insert(name.into(), instance);
    }

    /// Sets a concept's value, creating the entry if needed. `isActive` is left untouched.
    pub fn set_value(&mut self, name: &str, value: Value) {
        self.0.entry(name.to_string()).or_default().value = value;
    }

    /// Sets a concept's activation flag, creating the entry if needed.
    pub fn set_active(&mut self, name: &str, is_active: bool) {
        self.0.entry(name.to_string()).or_default().is_active = is_active;
    }

    /// Resets a concept to the default instance while keeping its key.
    pub fn reset(&mut self, name: &str) {
        self.0.insert(name.to_string(), ConceptInstance::default());
    }

    /// Resets every concept while keeping all keys.
    pub fn reset_all(&mut self) {
        for instance in self.0.values_mut() {
            *instance = ConceptInstance::default();
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConceptInstance)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, ConceptInstance)> for ConceptMap {
    fn from_iter<T: IntoIterator<Item = (S, ConceptInstance)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Derives the store's activation state from a raw value.
///
/// - `true`/`false` → that boolean
/// - undefined or `null` → `None`
/// - any other value → `Some(true)`
pub fn derive_state(value: Option<&Value>) -> Option<bool> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::Bool(b)) => Some(*b),
        Some(_) => Some(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_instantiate_defaults() {
        let map = ConceptMap::instantiate(["A", "B"]);

        assert_eq!(map.len(), 2);
        let a = map.get("A").unwrap();
        assert_eq!(a.value, Value::Null);
        assert!(!a.is_active);
    }

    #[test]
    fn test_clone_is_independent() {
        let original = ConceptMap::instantiate(["A"]);
        let mut copy = original.clone();

        copy.set_value("A", json!(12));
        copy.set_active("A", true);

        assert_eq!(original.get("A").unwrap(), &ConceptInstance::default());
        assert_eq!(copy.get("A").unwrap(), &ConceptInstance::new(json!(12), true));
    }

    #[test]
    fn test_reset_keeps_key() {
        let mut map = ConceptMap::new();
        map.insert("A", ConceptInstance::new(json!("x"), true));

        map.reset("A");

        assert!(map.contains("A"));
        assert_eq!(map.get("A").unwrap(), &ConceptInstance::default());
    }

    #[test]
    fn test_serde_shape_uses_is_active() {
        let mut map = ConceptMap::new();
        map.insert("W", ConceptInstance::new(json!(70), true));

        let value = serde_json::to_value(&map).unwrap();
        assert_eq!(value, json!({"W": {"value": 70, "isActive": true}}));

        let back: ConceptMap = serde_json::from_value(json!({"W": {}})).unwrap();
        assert_eq!(back.get("W").unwrap(), &ConceptInstance::default());
    }

    #[test]
    fn test_derive_state() {
        assert_eq!(derive_state(None), None);
        assert_eq!(derive_state(Some(&Value::Null)), None);
        assert_eq!(derive_state(Some(&json!(true))), Some(true));
        assert_eq!(derive_state(Some(&json!(false))), Some(false));
        assert_eq!(derive_state(Some(&json!(0))), Some(true));
        assert_eq!(derive_state(Some(&json!(""))), Some(true));
    }
}
