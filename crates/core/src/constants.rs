//! Constants used throughout the concepts core crate.
//!
//! This module collects the expression syntax markers, configuration field names and
//! storage defaults so that the extractor, evaluator and harness agree on them.

/// Opening delimiter of a bracket-wrapped boolean expression.
pub const EXPRESSION_PREFIX: &str = "[%";

/// Closing delimiter of a bracket-wrapped boolean expression.
pub const EXPRESSION_SUFFIX: &str = "%]";

/// Marker that introduces an inline display placeholder, e.g. `@concept{Name.value}`.
pub const DISPLAY_PLACEHOLDER_MARKER: &str = "@concept";

/// Property suffix selecting a concept's raw value.
pub const VALUE_PROPERTY: &str = "value";

/// Property suffix selecting a concept's 0/1 count.
pub const COUNT_PROPERTY: &str = "COUNT";

/// Field of an expression-field object that carries its UI type.
pub const UI_TYPE_FIELD: &str = "UI_TYPE";

/// `UI_TYPE` value identifying an expression field.
pub const EXPRESSION_UI_TYPE: &str = "CONCEPT_EXPRESSION";

/// Field of an expression-field object that may carry its expression text.
pub const EXPRESSION_TEXT_FIELD: &str = "EXPRESSION";

/// String field holding a bracket-wrapped boolean expression.
pub const CONCEPT_EXPRESSION_FIELD: &str = "CONCEPT_EXPRESSION";

/// String field holding display text with `@concept{...}` placeholders.
pub const DISPLAY_TEXT_FIELD: &str = "DISPLAY";

/// String field holding a flag condition expression.
pub const FLAG_EXPRESSION_FIELD: &str = "FLAG_EXPRESSION";

/// Concept name reported to store listeners when every concept is cleared.
pub const CLEAR_ALL_SENTINEL: &str = "__ALL_CONCEPTS_CLEARED__";

/// Default relative path of the configuration document.
pub const DEFAULT_CONFIG_PATH: &str = "config/rconfig.json";

/// Default directory for the durable key/value store.
pub const DEFAULT_STORAGE_DIR: &str = "concept_data";

/// Storage key under which the test patient collection is persisted.
pub const TEST_PATIENTS_STORAGE_KEY: &str = "testPatients";
