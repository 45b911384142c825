//! Inline `@concept{...}` substitution for display text.

use crate::concept::ConceptMap;
use crate::constants::VALUE_PROPERTY;
use crate::extractor::placeholder_spans;
use serde_json::Value;

/// Replaces every `@concept{Name}` with `true`/`false` from the concept's `isActive` flag and
/// every `@concept{Name.value}` with the concept's value. Strings render unquoted, `null` and
/// unknown concepts render as the empty string.
pub fn render_display_text(text: &str, concepts: &ConceptMap) -> String {
    let mut rendered = String::with_capacity(text.len());
    let mut cursor = 0;

    for span in placeholder_spans(text) {
        rendered.push_str(&text[cursor..span.start]);
        if let Some(instance) = concepts.get(span.name) {
            if span.property == Some(VALUE_PROPERTY) {
                match &instance.value {
                    Value::Null => {}
                    Value::String(s) => rendered.push_str(s),
                    other => rendered.push_str(&other.to_string()),
                }
            } else {
                rendered.push_str(if instance.is_active { "true" } else { "false" });
            }
        }
        cursor = span.end;
    }

    rendered.push_str(&text[cursor..]);
    rendered
}
