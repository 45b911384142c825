//! Engine runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the concept
//! manager and the test harness. Services never read environment variables themselves, which
//! keeps tests free to build isolated instances side by side.

use crate::constants::{
    CONCEPT_EXPRESSION_FIELD, DEFAULT_CONFIG_PATH, DEFAULT_STORAGE_DIR, DISPLAY_TEXT_FIELD,
    EXPRESSION_TEXT_FIELD, EXPRESSION_UI_TYPE, FLAG_EXPRESSION_FIELD,
    TEST_PATIENTS_STORAGE_KEY, UI_TYPE_FIELD,
};
use crate::{ConceptError, ConceptResult};
use std::path::{Path, PathBuf};

/// Field names the extractor recognises while walking a configuration document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldConventions {
    /// Field inside an object that marks it as an expression field.
    pub ui_type_field: String,
    /// Value of `ui_type_field` that identifies an expression field.
    pub expression_ui_type: String,
    /// Optional text field inside an expression-field object.
    pub expression_text_field: String,
    /// String field holding a bracket-wrapped boolean expression.
    pub concept_expression_field: String,
    /// String field holding display text with inline placeholders.
    pub display_text_field: String,
    /// String field holding a flag condition.
    pub flag_expression_field: String,
}

impl Default for FieldConventions {
    fn default() -> Self {
        Self {
            ui_type_field: UI_TYPE_FIELD.into(),
            expression_ui_type: EXPRESSION_UI_TYPE.into(),
            expression_text_field: EXPRESSION_TEXT_FIELD.into(),
            concept_expression_field: CONCEPT_EXPRESSION_FIELD.into(),
            display_text_field: DISPLAY_TEXT_FIELD.into(),
            flag_expression_field: FLAG_EXPRESSION_FIELD.into(),
        }
    }
}

/// Engine configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    config_path: PathBuf,
    storage_dir: PathBuf,
    storage_key: String,
    field_conventions: FieldConventions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            storage_key: TEST_PATIENTS_STORAGE_KEY.into(),
            field_conventions: FieldConventions::default(),
        }
    }
}

impl EngineConfig {
    /// Create a new `EngineConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`ConceptError::InvalidInput`] if `storage_key` is not a file-safe token.
    pub fn new(
        config_path: PathBuf,
        storage_dir: PathBuf,
        storage_key: String,
        field_conventions: FieldConventions,
    ) -> ConceptResult<Self> {
        validate_storage_key(&storage_key)?;

        Ok(Self {
            config_path,
            storage_dir,
            storage_key,
            field_conventions,
        })
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    pub fn field_conventions(&self) -> &FieldConventions {
        &self.field_conventions
    }
}

/// Checks that a storage key can be used directly as a file stem.
///
/// Keys may contain ASCII letters, digits, `-` and `_` only.
pub fn validate_storage_key(key: &str) -> ConceptResult<()> {
    if key.trim().is_empty() {
        return Err(ConceptError::InvalidInput("storage key cannot be empty".into()));
    }

    if !key
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(ConceptError::InvalidInput(format!(
            "storage key '{}' may only contain ASCII letters, digits, '-' and '_'",
            key
        )));
    }

    Ok(())
}

/// Resolve a path from an optional environment value, falling back to `default`.
///
/// Empty or whitespace-only values count as unset.
pub fn path_from_env_value(value: Option<String>, default: &str) -> PathBuf {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

/// Resolve the storage key from an optional environment value.
///
/// If `value` is `None` or empty/whitespace, returns the default test patient key.
pub fn storage_key_from_env_value(value: Option<String>) -> ConceptResult<String> {
    let key = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| TEST_PATIENTS_STORAGE_KEY.to_string());

    validate_storage_key(&key)?;
    Ok(key)
}
