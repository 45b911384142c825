//! # Test patients and test cases
//!
//! A test patient is a named concept map snapshot that owns zero or more test cases, each
//! with its own snapshot. Both start as a deep copy of the concept manager's live
//! instantiation and are only changed through the setters here.
//!
//! [`TestPatientManager::create_test_patient_from`] and
//! [`TestPatientManager::create_test_case_from`] take that copy from a [`ConceptManager`]
//! themselves. The lower-level `create_test_patient` / `create_test_case` take ownership of
//! a map instead; callers seeding from live state must pass
//! [`ConceptManager::clone_concept_instantiation`], never a map shared with anything else.
//!
//! ## Persistence
//!
//! The whole collection is the unit of storage. It is read once by [`TestPatientManager::load`]
//! and written back in full after every mutation (write-through). Storage problems never reach
//! callers:
//!
//! - missing or corrupt data loads as an empty collection,
//! - a failed write is logged and the in-memory change stands.
//!
//! Reads never touch storage.

use crate::concept::ConceptMap;
use crate::expression;
use crate::extractor::ExpressionSite;
use crate::manager::{evaluate_sites, ConceptManager, SiteEvaluation};
use crate::storage::KeyValueStore;
use crate::{ConceptError, ConceptResult};
use concept_ids::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub concepts: ConceptMap,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPatient {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub concepts: ConceptMap,
}

impl TestPatient {
    pub fn test_case(&self, case_id: &str) -> Option<&TestCase> {
        self.test_cases.iter().find(|c| c.id == case_id)
    }

    fn test_case_mut(&mut self, case_id: &str) -> Option<&mut TestCase> {
        self.test_cases.iter_mut().find(|c| c.id == case_id)
    }
}

pub struct TestPatientManager {
    storage: Arc<dyn KeyValueStore>,
    storage_key: String,
    patients: Vec<TestPatient>,
    last_id: Option<RecordId>,
}

impl std::fmt::Debug for TestPatientManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestPatientManager")
            .field("storage_key", &self.storage_key)
            .field("patients", &self.patients.len())
            .finish_non_exhaustive()
    }
}

impl TestPatientManager {
    /// Creates an empty manager. Call [`TestPatientManager::load`] to read stored patients.
    pub fn new(storage: Arc<dyn KeyValueStore>, storage_key: impl Into<String>) -> Self {
        Self {
            storage,
            storage_key: storage_key.into(),
            patients: Vec::new(),
            last_id: None,
        }
    }

    /// Replaces the in-memory collection with what storage holds and returns the patient count.
    pub fn load(&mut self) -> usize {
        self.patients = match self.storage.get(&self.storage_key) {
            Ok(Some(text)) => match serde_json::from_str::<Vec<TestPatient>>(&text) {
                Ok(patients) => patients,
                Err(e) => {
                    tracing::warn!(
                        key = %self.storage_key,
                        "stored test patients are corrupt, starting empty: {}",
                        e
                    );
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(
                    key = %self.storage_key,
                    "failed to read test patients, starting empty: {}",
                    e
                );
                Vec::new()
            }
        };

        tracing::info!(patients = self.patients.len(), "test patients loaded");
        self.patients.len()
    }

    pub fn test_patients(&self) -> &[TestPatient] {
        &self.patients
    }

    pub fn get_test_patient(&self, patient_id: &str) -> Option<&TestPatient> {
        self.patients.iter().find(|p| p.id == patient_id)
    }

    pub fn get_test_case(&self, patient_id: &str, case_id: &str) -> Option<&TestCase> {
        self.get_test_patient(patient_id)?.test_case(case_id)
    }

    /// The map an expression is evaluated against: the case's when `case_id` is given,
    /// otherwise the patient's.
    pub fn concepts_for(&self, patient_id: &str, case_id: Option<&str>) -> Option<&ConceptMap> {
        match case_id {
            Some(case_id) => self
                .get_test_case(patient_id, case_id)
                .map(|c| &c.concepts),
            None => self.get_test_patient(patient_id).map(|p| &p.concepts),
        }
    }

    /// Creates a test patient seeded with a fresh clone of `source`'s live instantiation.
    pub fn create_test_patient_from(
        &mut self,
        source: &ConceptManager,
        name: &str,
        details: &str,
    ) -> &TestPatient {
        self.create_test_patient(source.clone_concept_instantiation(), name, details)
    }

    /// Creates a test patient that owns `instantiation` as its starting concept map.
    pub fn create_test_patient(
        &mut self,
        instantiation: ConceptMap,
        name: &str,
        details: &str,
    ) -> &TestPatient {
        let patient = TestPatient {
            id: self.next_id(),
            name: name.to_string(),
            details: details.to_string(),
            test_cases: Vec::new(),
            concepts: instantiation,
        };
        tracing::debug!(patient = %patient.id, "created test patient");

        self.patients.push(patient);
        self.persist();
        &self.patients[self.patients.len() - 1]
    }

    /// Returns `false` if the patient does not exist.
    pub fn update_test_patient(&mut self, patient_id: &str, name: &str, details: &str) -> bool {
        let Some(patient) = self.patient_mut(patient_id) else {
            return false;
        };
        patient.name = name.to_string();
        patient.details = details.to_string();
        self.persist();
        true
    }

    /// Removes the patient together with all of its test cases.
    pub fn delete_test_patient(&mut self, patient_id: &str) -> bool {
        let before = self.patients.len();
        self.patients.retain(|p| p.id != patient_id);
        if self.patients.len() == before {
            return false;
        }
        self.persist();
        true
    }

    /// Creates a test case seeded with a fresh clone of `source`'s live instantiation.
    /// Returns `None` if the patient does not exist.
    pub fn create_test_case_from(
        &mut self,
        patient_id: &str,
        source: &ConceptManager,
        name: &str,
        details: &str,
    ) -> Option<&TestCase> {
        self.create_test_case(patient_id, source.clone_concept_instantiation(), name, details)
    }

    /// Creates a test case that owns `instantiation`. Returns `None` if the patient does not
    /// exist.
    pub fn create_test_case(
        &mut self,
        patient_id: &str,
        instantiation: ConceptMap,
        name: &str,
        details: &str,
    ) -> Option<&TestCase> {
        let id = self.next_id();
        let index = self.patients.iter().position(|p| p.id == patient_id)?;

        self.patients[index].test_cases.push(TestCase {
            id,
            name: name.to_string(),
            details: details.to_string(),
            concepts: instantiation,
        });
        tracing::debug!(patient = %patient_id, "created test case");
        self.persist();
        self.patients[index].test_cases.last()
    }

    pub fn update_test_case(
        &mut self,
        patient_id: &str,
        case_id: &str,
        name: &str,
        details: &str,
    ) -> bool {
        let Some(case) = self.case_mut(patient_id, case_id) else {
            return false;
        };
        case.name = name.to_string();
        case.details = details.to_string();
        self.persist();
        true
    }

    /// Returns `false` when the case does not exist or belongs to a different patient.
    pub fn delete_test_case(&mut self, patient_id: &str, case_id: &str) -> bool {
        let Some(patient) = self.patient_mut(patient_id) else {
            return false;
        };
        let before = patient.test_cases.len();
        patient.test_cases.retain(|c| c.id != case_id);
        if patient.test_cases.len() == before {
            return false;
        }
        self.persist();
        true
    }

    pub fn set_patient_concept_value(&mut self, patient_id: &str, name: &str, value: Value) -> bool {
        let Some(patient) = self.patient_mut(patient_id) else {
            return false;
        };
        patient.concepts.set_value(name, value);
        self.persist();
        true
    }

    pub fn set_patient_concept_active(
        &mut self,
        patient_id: &str,
        name: &str,
        is_active: bool,
    ) -> bool {
        let Some(patient) = self.patient_mut(patient_id) else {
            return false;
        };
        patient.concepts.set_active(name, is_active);
        self.persist();
        true
    }

    pub fn set_case_concept_value(
        &mut self,
        patient_id: &str,
        case_id: &str,
        name: &str,
        value: Value,
    ) -> bool {
        let Some(case) = self.case_mut(patient_id, case_id) else {
            return false;
        };
        case.concepts.set_value(name, value);
        self.persist();
        true
    }

    pub fn set_case_concept_active(
        &mut self,
        patient_id: &str,
        case_id: &str,
        name: &str,
        is_active: bool,
    ) -> bool {
        let Some(case) = self.case_mut(patient_id, case_id) else {
            return false;
        };
        case.concepts.set_active(name, is_active);
        self.persist();
        true
    }

    pub fn evaluate_patient_expression(&self, patient_id: &str, text: &str) -> bool {
        self.evaluate_expression(patient_id, None, text)
    }

    pub fn evaluate_case_expression(&self, patient_id: &str, case_id: &str, text: &str) -> bool {
        self.evaluate_expression(patient_id, Some(case_id), text)
    }

    /// Evaluates against the case's map when `case_id` is given, else the patient's.
    /// An unknown patient or case evaluates to `false`.
    pub fn evaluate_expression(&self, patient_id: &str, case_id: Option<&str>, text: &str) -> bool {
        match self.concepts_for(patient_id, case_id) {
            Some(concepts) => expression::evaluate(text, concepts),
            None => {
                tracing::warn!(
                    patient = %patient_id,
                    case = ?case_id,
                    "no such test patient or test case"
                );
                false
            }
        }
    }

    /// Evaluates each site against one stored snapshot without touching live state.
    pub fn evaluate_all_sites(
        &self,
        patient_id: &str,
        case_id: Option<&str>,
        sites: &[ExpressionSite],
    ) -> Option<Vec<SiteEvaluation>> {
        self.concepts_for(patient_id, case_id)
            .map(|concepts| evaluate_sites(sites, concepts))
    }

    /// The collection as pretty-printed JSON, in the stored shape.
    pub fn export_json(&self) -> ConceptResult<String> {
        serde_json::to_string_pretty(&self.patients).map_err(ConceptError::Serialization)
    }

    /// Replaces the collection with `text` and persists it. Nothing changes on error.
    pub fn import_json(&mut self, text: &str) -> ConceptResult<usize> {
        let patients: Vec<TestPatient> =
            serde_json::from_str(text).map_err(ConceptError::Deserialization)?;
        self.patients = patients;
        self.persist();
        Ok(self.patients.len())
    }

    fn next_id(&mut self) -> String {
        let id = RecordId::generate_after(self.last_id.as_ref());
        let text = id.to_string();
        self.last_id = Some(id);
        text
    }

    fn patient_mut(&mut self, patient_id: &str) -> Option<&mut TestPatient> {
        self.patients.iter_mut().find(|p| p.id == patient_id)
    }

    fn case_mut(&mut self, patient_id: &str, case_id: &str) -> Option<&mut TestCase> {
        self.patient_mut(patient_id)?.test_case_mut(case_id)
    }

    fn persist(&self) {
        let text = match serde_json::to_string(&self.patients) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("failed to serialise test patients: {}", e);
                return;
            }
        };

        if let Err(e) = self.storage.set(&self.storage_key, &text) {
            tracing::error!(key = %self.storage_key, "failed to persist test patients: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::ConceptInstance;
    use crate::extractor::SiteKind;
    use crate::storage::{FileKeyValueStore, MemoryKeyValueStore};
    use serde_json::json;
    use tempfile::TempDir;

    const KEY: &str = "testPatients";

    fn instantiation() -> ConceptMap {
        ConceptMap::instantiate(["A", "B", "W"])
    }

    fn memory_manager() -> (Arc<MemoryKeyValueStore>, TestPatientManager) {
        let storage = Arc::new(MemoryKeyValueStore::new());
        let manager = TestPatientManager::new(storage.clone(), KEY);
        (storage, manager)
    }

    fn stored_patients(storage: &MemoryKeyValueStore) -> Vec<TestPatient> {
        let text = storage.get(KEY).unwrap().unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn test_create_patient_clones_instantiation_and_persists() {
        let (storage, mut manager) = memory_manager();

        let patient = manager.create_test_patient(instantiation(), "Alice", "post-op");

        assert_eq!(patient.name, "Alice");
        assert_eq!(patient.concepts, instantiation());
        assert!(patient.test_cases.is_empty());
        assert_eq!(stored_patients(&storage).len(), 1);
    }

    #[test]
    fn test_ids_are_unique() {
        let (_, mut manager) = memory_manager();

        let first = manager.create_test_patient(ConceptMap::new(), "a", "").id.clone();
        let second = manager.create_test_patient(ConceptMap::new(), "b", "").id.clone();
        let case = manager
            .create_test_case(&first, ConceptMap::new(), "c", "")
            .unwrap()
            .id
            .clone();

        assert_ne!(first, second);
        assert_ne!(case, first);
        assert_ne!(case, second);
    }

    #[test]
    fn test_create_case_for_unknown_patient_is_none() {
        let (storage, mut manager) = memory_manager();

        assert!(manager
            .create_test_case("missing", ConceptMap::new(), "c", "")
            .is_none());
        assert!(storage.get(KEY).unwrap().is_none());
    }

    #[test]
    fn test_cases_have_independent_concept_maps() {
        let (_, mut manager) = memory_manager();
        let patient = manager.create_test_patient(instantiation(), "p", "").id.clone();
        let first = manager
            .create_test_case(&patient, instantiation(), "one", "")
            .unwrap()
            .id
            .clone();
        let second = manager
            .create_test_case(&patient, instantiation(), "two", "")
            .unwrap()
            .id
            .clone();

        assert!(manager.set_case_concept_active(&patient, &first, "A", true));
        assert!(manager.set_case_concept_value(&patient, &first, "W", json!(70)));

        let untouched = manager.get_test_case(&patient, &second).unwrap();
        assert_eq!(untouched.concepts, instantiation());
        assert_eq!(manager.get_test_patient(&patient).unwrap().concepts, instantiation());
    }

    #[test]
    fn test_delete_patient_cascades() {
        let (storage, mut manager) = memory_manager();
        let patient = manager.create_test_patient(instantiation(), "p", "").id.clone();
        let case = manager
            .create_test_case(&patient, instantiation(), "c", "")
            .unwrap()
            .id
            .clone();

        assert!(manager.delete_test_patient(&patient));

        assert!(manager.get_test_patient(&patient).is_none());
        assert!(manager.get_test_case(&patient, &case).is_none());
        assert!(stored_patients(&storage).is_empty());
        assert!(!manager.delete_test_patient(&patient));
    }

    #[test]
    fn test_delete_case_of_other_patient_fails() {
        let (_, mut manager) = memory_manager();
        let owner = manager.create_test_patient(ConceptMap::new(), "owner", "").id.clone();
        let other = manager.create_test_patient(ConceptMap::new(), "other", "").id.clone();
        let case = manager
            .create_test_case(&owner, ConceptMap::new(), "c", "")
            .unwrap()
            .id
            .clone();

        assert!(!manager.delete_test_case(&other, &case));
        assert!(!manager.delete_test_case("missing", &case));
        assert!(manager.get_test_case(&owner, &case).is_some());

        assert!(manager.delete_test_case(&owner, &case));
        assert!(manager.get_test_case(&owner, &case).is_none());
    }

    #[test]
    fn test_update_patient_and_case() {
        let (storage, mut manager) = memory_manager();
        let patient = manager.create_test_patient(ConceptMap::new(), "p", "").id.clone();
        let case = manager
            .create_test_case(&patient, ConceptMap::new(), "c", "")
            .unwrap()
            .id
            .clone();

        assert!(manager.update_test_patient(&patient, "Patient", "renal impairment"));
        assert!(manager.update_test_case(&patient, &case, "Case", "eGFR 25"));
        assert!(!manager.update_test_patient("missing", "x", "y"));
        assert!(!manager.update_test_case(&patient, "missing", "x", "y"));

        let stored = stored_patients(&storage);
        assert_eq!(stored[0].name, "Patient");
        assert_eq!(stored[0].details, "renal impairment");
        assert_eq!(stored[0].test_cases[0].name, "Case");
        assert_eq!(stored[0].test_cases[0].details, "eGFR 25");
    }

    #[test]
    fn test_evaluate_against_patient_or_case() {
        let (_, mut manager) = memory_manager();
        let patient = manager.create_test_patient(instantiation(), "p", "").id.clone();
        let case = manager
            .create_test_case(&patient, instantiation(), "c", "")
            .unwrap()
            .id
            .clone();

        manager.set_patient_concept_active(&patient, "A", true);
        manager.set_case_concept_active(&patient, &case, "B", true);

        assert!(manager.evaluate_patient_expression(&patient, "[%{A} AND NOT {B}%]"));
        assert!(!manager.evaluate_case_expression(&patient, &case, "[%{A} AND NOT {B}%]"));
        assert!(manager.evaluate_expression(&patient, Some(&case), "[%{B}%]"));
        assert!(!manager.evaluate_expression("missing", None, "[%true%]"));
    }

    #[test]
    fn test_setters_on_unknown_targets_fail() {
        let (storage, mut manager) = memory_manager();

        assert!(!manager.set_patient_concept_value("missing", "A", json!(1)));
        assert!(!manager.set_patient_concept_active("missing", "A", true));
        assert!(!manager.set_case_concept_value("missing", "c", "A", json!(1)));
        assert!(!manager.set_case_concept_active("missing", "c", "A", true));
        assert!(storage.get(KEY).unwrap().is_none());
    }

    #[test]
    fn test_evaluate_all_sites() {
        let (_, mut manager) = memory_manager();
        let patient = manager.create_test_patient(instantiation(), "p", "").id.clone();
        manager.set_patient_concept_value(&patient, "W", json!(70));

        let sites = vec![
            ExpressionSite {
                path: "RCONFIG.TABS[0].CRITERIA[0].CONCEPT_EXPRESSION".to_string(),
                expression: "[%{W.value} = 70%]".to_string(),
                concepts: vec!["W".to_string()],
                kind: SiteKind::ConceptExpression,
            },
            ExpressionSite {
                path: "RCONFIG.TABS[0].CRITERIA[1].FIELD".to_string(),
                expression: String::new(),
                concepts: Vec::new(),
                kind: SiteKind::ExpressionField,
            },
        ];

        let report = manager.evaluate_all_sites(&patient, None, &sites).unwrap();
        assert_eq!(report.len(), 1);
        assert!(report[0].result);
        assert!(manager.evaluate_all_sites("missing", None, &sites).is_none());
    }

    #[test]
    fn test_load_round_trip_through_files() {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(FileKeyValueStore::new(temp.path()));

        let mut manager = TestPatientManager::new(storage.clone(), KEY);
        let patient = manager.create_test_patient(instantiation(), "p", "").id.clone();
        manager.set_patient_concept_value(&patient, "W", json!("high"));
        manager.create_test_case(&patient, instantiation(), "c", "");

        let mut reloaded = TestPatientManager::new(storage, KEY);
        assert_eq!(reloaded.load(), 1);
        assert_eq!(reloaded.test_patients(), manager.test_patients());
    }

    #[test]
    fn test_load_missing_or_corrupt_storage_is_empty() {
        let (storage, mut manager) = memory_manager();
        assert_eq!(manager.load(), 0);

        storage.set(KEY, "{ definitely not patients").unwrap();
        assert_eq!(manager.load(), 0);
        assert!(manager.test_patients().is_empty());
    }

    #[test]
    fn test_stored_shape_uses_camel_case() {
        let (storage, mut manager) = memory_manager();
        let patient = manager.create_test_patient(instantiation(), "p", "").id.clone();
        manager.set_patient_concept_active(&patient, "A", true);

        let raw: Value = serde_json::from_str(&storage.get(KEY).unwrap().unwrap()).unwrap();
        assert!(raw[0]["testCases"].is_array());
        assert_eq!(raw[0]["concepts"]["A"]["isActive"], json!(true));
        assert_eq!(raw[0]["concepts"]["A"]["value"], Value::Null);
    }

    #[test]
    fn test_export_then_import() {
        let (_, mut manager) = memory_manager();
        manager.create_test_patient(instantiation(), "p", "d");
        let exported = manager.export_json().unwrap();

        let (storage, mut other) = memory_manager();
        assert_eq!(other.import_json(&exported).unwrap(), 1);
        assert_eq!(other.test_patients(), manager.test_patients());
        assert_eq!(stored_patients(&storage).len(), 1);

        assert!(matches!(
            other.import_json("[{"),
            Err(ConceptError::Deserialization(_))
        ));
        assert_eq!(other.test_patients().len(), 1);
    }

    #[test]
    fn test_write_failure_keeps_in_memory_change() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, "file").unwrap();
        let storage = Arc::new(FileKeyValueStore::new(blocker.join("data")));
        let mut manager = TestPatientManager::new(storage, KEY);

        let id = manager.create_test_patient(ConceptMap::new(), "p", "").id.clone();

        assert!(manager.get_test_patient(&id).is_some());
    }

    #[test]
    fn test_records_seeded_from_manager_are_independent() {
        use crate::config::EngineConfig;
        use crate::store::ConceptStateStore;

        let mut live = ConceptManager::new(
            Arc::new(EngineConfig::default()),
            Arc::new(ConceptStateStore::new()),
        );
        live.load_document(json!({ "CONCEPT_EXPRESSION": "[%{A} OR {B}%]" }));
        live.set_concept_active("A", true);

        let (_, mut harness) = memory_manager();
        let patient = harness
            .create_test_patient_from(&live, "p", "")
            .id
            .clone();
        let first = harness
            .create_test_case_from(&patient, &live, "one", "")
            .unwrap()
            .id
            .clone();
        let second = harness
            .create_test_case_from(&patient, &live, "two", "")
            .unwrap()
            .id
            .clone();
        assert!(harness
            .create_test_case_from("missing", &live, "x", "")
            .is_none());

        harness.set_case_concept_active(&patient, &first, "B", true);
        live.set_concept_active("A", false);

        assert_eq!(live.instantiation().get("B"), Some(&ConceptInstance::default()));
        assert!(harness.get_test_patient(&patient).unwrap().concepts.get("A").unwrap().is_active);
        assert!(!harness.get_test_case(&patient, &second).unwrap().concepts.get("B").unwrap().is_active);
        assert!(harness.get_test_case(&patient, &first).unwrap().concepts.get("B").unwrap().is_active);
    }

    #[test]
    fn test_patient_snapshot_applies_to_live_manager() {
        use crate::config::EngineConfig;
        use crate::store::ConceptStateStore;

        let mut live = ConceptManager::new(
            Arc::new(EngineConfig::default()),
            Arc::new(ConceptStateStore::new()),
        );
        live.load_document(json!({ "CONCEPT_EXPRESSION": "[%{A} AND {W.value} > 50%]" }));

        let (_, mut harness) = memory_manager();
        let patient = harness
            .create_test_patient(live.clone_concept_instantiation(), "p", "")
            .id
            .clone();
        harness.set_patient_concept_active(&patient, "A", true);
        harness.set_patient_concept_value(&patient, "W", json!(80));

        assert!(!live.evaluate_expression("[%{A} AND {W.value} > 50%]"));

        let snapshot = harness.concepts_for(&patient, None).unwrap().clone();
        live.apply_test_case(&snapshot);

        assert!(live.evaluate_expression("[%{A} AND {W.value} > 50%]"));
        assert_eq!(
            live.instantiation().get("A"),
            Some(&ConceptInstance::new(Value::Null, true))
        );
    }
}
