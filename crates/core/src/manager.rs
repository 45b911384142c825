//! # Concept manager
//!
//! Orchestrates the engine for one loaded configuration document:
//!
//! - loads the document (asynchronously, from [`EngineConfig::config_path`] or any path),
//! - runs the extractor and keeps the resulting site catalogue,
//! - owns the **live** concept instantiation (one default entry per distinct concept),
//! - mirrors value changes into the shared [`ConceptStateStore`],
//! - fires the refresh hook after every mutation or test case application.
//!
//! ## Two activation representations
//!
//! The live instantiation carries `isActive`, which is what expressions read. The store
//! carries a tri-state `state` derived from the value. The manager updates each only through
//! its own rules: a value write goes to both (the store derives its state), an `isActive`
//! write touches only the instantiation.

use crate::concept::ConceptMap;
use crate::config::EngineConfig;
use crate::display::render_display_text;
use crate::expression;
use crate::extractor::{extract, ExpressionSite, ExtractionResult};
use crate::store::{ConceptStateStore, StoredConcept};
use crate::{ConceptError, ConceptResult};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Redraw callback for whatever renders from the engine.
pub type RefreshHook = Box<dyn Fn() + Send + Sync>;

/// Outcome of evaluating one expression site.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteEvaluation {
    pub path: String,
    pub expression: String,
    pub result: bool,
}

/// Evaluates every site against `concepts`. Sites with empty expression text are skipped.
pub fn evaluate_sites<'a, I>(sites: I, concepts: &ConceptMap) -> Vec<SiteEvaluation>
where
    I: IntoIterator<Item = &'a ExpressionSite>,
{
    sites
        .into_iter()
        .filter(|site| !site.expression.trim().is_empty())
        .map(|site| SiteEvaluation {
            path: site.path.clone(),
            expression: site.expression.clone(),
            result: expression::evaluate(&site.expression, concepts),
        })
        .collect()
}

pub struct ConceptManager {
    cfg: Arc<EngineConfig>,
    store: Arc<ConceptStateStore>,
    document: Option<Value>,
    extraction: ExtractionResult,
    instantiation: ConceptMap,
    refresh: Option<RefreshHook>,
}

impl std::fmt::Debug for ConceptManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConceptManager")
            .field("cfg", &self.cfg)
            .field("extraction", &self.extraction)
            .field("instantiation", &self.instantiation)
            .field("refresh", &self.refresh.is_some())
            .finish_non_exhaustive()
    }
}

impl ConceptManager {
    /// Creates a manager with no document loaded.
    ///
    /// # Arguments
    ///
    /// * `cfg` - Engine configuration resolved at startup
    /// * `store` - The shared state store value changes are mirrored into
    pub fn new(cfg: Arc<EngineConfig>, store: Arc<ConceptStateStore>) -> Self {
        Self {
            cfg,
            store,
            document: None,
            extraction: ExtractionResult::default(),
            instantiation: ConceptMap::new(),
            refresh: None,
        }
    }

    /// Loads the document at the configured path.
    ///
    /// # Errors
    ///
    /// Returns `ConceptError::ConfigRead` or `ConceptError::ConfigParse`; nothing is extracted
    /// and the previous state is left untouched in that case.
    pub async fn load_configuration(&mut self) -> ConceptResult<&ExtractionResult> {
        let path = self.cfg.config_path().to_path_buf();
        self.load_configuration_from(&path).await
    }

    /// Loads the document at `path`. See [`ConceptManager::load_configuration`].
    pub async fn load_configuration_from(
        &mut self,
        path: &Path,
    ) -> ConceptResult<&ExtractionResult> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConceptError::ConfigRead {
                    path: path.to_path_buf(),
                    source,
                })?;

        let document: Value =
            serde_json::from_str(&contents).map_err(|source| ConceptError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;

        tracing::info!("loaded configuration from {}", path.display());
        Ok(self.load_document(document))
    }

    /// Extracts concepts from an already-parsed document and rebuilds the live instantiation.
    ///
    /// Re-loading fully replaces the previous catalogue and instantiation. Concepts the store
    /// has never seen are created there with a `null` value.
    pub fn load_document(&mut self, document: Value) -> &ExtractionResult {
        let extraction = extract(&document, self.cfg.field_conventions());

        self.instantiation = ConceptMap::instantiate(extraction.distinct_concepts.iter().cloned());
        for name in &extraction.distinct_concepts {
            if self.store.get_concept(name).is_none() {
                self.store.set_concept_state(name, Some(Value::Null));
            }
        }

        tracing::info!(
            sites = extraction.concept_expressions.len(),
            concepts = extraction.distinct_concepts.len(),
            "concept instantiation rebuilt"
        );

        self.extraction = extraction;
        self.document = Some(document);
        self.refresh();
        &self.extraction
    }

    pub fn document(&self) -> Option<&Value> {
        self.document.as_ref()
    }

    pub fn extraction(&self) -> &ExtractionResult {
        &self.extraction
    }

    pub fn distinct_concepts(&self) -> &[String] {
        &self.extraction.distinct_concepts
    }

    pub fn concept_expressions(&self) -> &[ExpressionSite] {
        &self.extraction.concept_expressions
    }

    pub fn instantiation(&self) -> &ConceptMap {
        &self.instantiation
    }

    /// A deep copy of the live instantiation, for seeding test patients and test cases.
    pub fn clone_concept_instantiation(&self) -> ConceptMap {
        self.instantiation.clone()
    }

    pub fn store(&self) -> &Arc<ConceptStateStore> {
        &self.store
    }

    /// Snapshot of the shared store.
    pub fn get_all_concepts(&self) -> BTreeMap<String, StoredConcept> {
        self.store.get_all_concepts()
    }

    pub fn set_concept_value(&mut self, name: &str, value: Value) {
        self.instantiation.set_value(name, value.clone());
        self.store.set_concept_state(name, Some(value));
        self.refresh();
    }

    pub fn set_concept_active(&mut self, name: &str, is_active: bool) {
        self.instantiation.set_active(name, is_active);
        self.refresh();
    }

    /// Resets one concept to its default in both representations.
    pub fn reset_concept(&mut self, name: &str) {
        self.instantiation.reset(name);
        self.store.reset_concept(name);
        self.refresh();
    }

    /// Resets every live concept and empties the store.
    pub fn clear_all(&mut self) {
        self.instantiation.reset_all();
        self.store.clear_all();
        self.refresh();
    }

    /// Copies a test patient's or test case's concept map into live state.
    ///
    /// Every entry overwrites the live instance (value and `isActive`); the store receives
    /// each value through [`ConceptStateStore::import_from_test_case`]. Live concepts the
    /// snapshot does not mention are left as they are.
    pub fn apply_test_case(&mut self, snapshot: &ConceptMap) {
        for (name, instance) in snapshot.iter() {
            self.instantiation.insert(name, instance.clone());
        }
        self.store.import_from_test_case(snapshot);
        tracing::debug!(concepts = snapshot.len(), "applied test case to live state");
        self.refresh();
    }

    /// Evaluates `text` against the live instantiation.
    pub fn evaluate_expression(&self, text: &str) -> bool {
        expression::evaluate(text, &self.instantiation)
    }

    /// Like [`ConceptManager::evaluate_expression`] but reports why an expression failed.
    pub fn try_evaluate_expression(&self, text: &str) -> ConceptResult<bool> {
        Ok(expression::try_evaluate(text, &self.instantiation)?)
    }

    /// Evaluates every extracted site against the live instantiation.
    pub fn evaluate_all_sites(&self) -> Vec<SiteEvaluation> {
        evaluate_sites(&self.extraction.concept_expressions, &self.instantiation)
    }

    pub fn render_display_text(&self, text: &str) -> String {
        render_display_text(text, &self.instantiation)
    }

    pub fn set_refresh_hook<F>(&mut self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.refresh = Some(Box::new(hook));
    }

    pub fn clear_refresh_hook(&mut self) {
        self.refresh = None;
    }

    fn refresh(&self) {
        if let Some(hook) = &self.refresh {
            hook();
        }
    }
}
