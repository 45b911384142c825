//! Concept discovery over configuration documents.
//!
//! The extractor walks every object and array reachable from the document root and applies
//! four independent field conventions at each object (see [`FieldConventions`]):
//!
//! 1. an object-valued field whose object carries the expression-field UI type → a site with
//!    no concepts;
//! 2. a concept expression string field → a site, plus every `{...}` reference;
//! 3. a display text string field → every `@concept{...}` placeholder, no site;
//! 4. a flag expression string field → a site, plus every `{...}` reference.
//!
//! Extraction never fails. Malformed text simply yields whatever references can be found and
//! is left for evaluation to reject.

use crate::config::FieldConventions;
use crate::constants::DISPLAY_PLACEHOLDER_MARKER;
use crate::expression::split_concept_ref;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

/// Which convention produced a site.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SiteKind {
    ExpressionField,
    ConceptExpression,
    FlagExpression,
}

/// One location in the configuration where a boolean expression lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionSite {
    /// Dotted/indexed path, e.g. `RCONFIG.TABS[0].CRITERIA[2].CONCEPT_EXPRESSION`.
    pub path: String,
    pub expression: String,
    /// Distinct concept names referenced at this site, in order of appearance.
    pub concepts: Vec<String>,
    pub kind: SiteKind,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub concept_expressions: Vec<ExpressionSite>,
    pub distinct_concepts: Vec<String>,
}

impl ExtractionResult {
    /// Sites whose expression references `name`.
    pub fn sites_referencing<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ExpressionSite> {
        self.concept_expressions
            .iter()
            .filter(move |site| site.concepts.iter().any(|c| c == name))
    }
}

/// Walks `root` and collects every expression site and distinct concept name.
pub fn extract(root: &Value, conventions: &FieldConventions) -> ExtractionResult {
    let mut walker = Walker {
        conventions,
        sites: Vec::new(),
        distinct: Vec::new(),
        seen: HashSet::new(),
    };
    walker.visit(root, "");

    tracing::debug!(
        sites = walker.sites.len(),
        concepts = walker.distinct.len(),
        "extracted concepts from configuration"
    );

    ExtractionResult {
        concept_expressions: walker.sites,
        distinct_concepts: walker.distinct,
    }
}

struct Walker<'c> {
    conventions: &'c FieldConventions,
    sites: Vec<ExpressionSite>,
    distinct: Vec<String>,
    seen: HashSet<String>,
}

impl Walker<'_> {
    fn visit(&mut self, value: &Value, path: &str) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let child_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", path, key)
                    };
                    self.check_field(key, child, &child_path);
                    self.visit(child, &child_path);
                }
            }
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    self.visit(item, &format!("{}[{}]", path, index));
                }
            }
            _ => {}
        }
    }

    fn check_field(&mut self, key: &str, child: &Value, path: &str) {
        let conventions = self.conventions;

        if let Value::Object(inner) = child {
            let is_expression_field = inner
                .get(&conventions.ui_type_field)
                .and_then(Value::as_str)
                == Some(conventions.expression_ui_type.as_str());
            if is_expression_field {
                let expression = inner
                    .get(&conventions.expression_text_field)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.sites.push(ExpressionSite {
                    path: path.to_string(),
                    expression,
                    concepts: Vec::new(),
                    kind: SiteKind::ExpressionField,
                });
            }
            return;
        }

        let Some(text) = child.as_str() else {
            return;
        };

        if key == conventions.concept_expression_field {
            self.record_expression(path, text, SiteKind::ConceptExpression);
        } else if key == conventions.flag_expression_field {
            self.record_expression(path, text, SiteKind::FlagExpression);
        }

        if key == conventions.display_text_field {
            for name in placeholder_references(text) {
                self.note_concept(&name);
            }
        }
    }

    fn record_expression(&mut self, path: &str, text: &str, kind: SiteKind) {
        let concepts = brace_references(text);
        for name in &concepts {
            self.note_concept(name);
        }
        self.sites.push(ExpressionSite {
            path: path.to_string(),
            expression: text.to_string(),
            concepts,
            kind,
        });
    }

    fn note_concept(&mut self, name: &str) {
        if self.seen.insert(name.to_string()) {
            self.distinct.push(name.to_string());
        }
    }
}

/// Distinct concept names from every `{...}` in `text`, in order of appearance.
/// Unterminated or empty references are skipped.
pub fn brace_references(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            break;
        };
        let (name, _) = split_concept_ref(&after[..close]);
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        rest = &after[close + 1..];
    }

    names
}

/// Distinct concept names from every `@concept{...}` placeholder in `text`.
pub fn placeholder_references(text: &str) -> Vec<String> {
    placeholder_spans(text)
        .into_iter()
        .map(|span| span.name.to_string())
        .fold(Vec::new(), |mut names, name| {
            if !names.contains(&name) {
                names.push(name);
            }
            names
        })
}

/// A `@concept{Name[.property]}` occurrence located in display text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PlaceholderSpan<'t> {
    /// Byte range of the whole placeholder, marker included.
    pub start: usize,
    pub end: usize,
    pub name: &'t str,
    pub property: Option<&'t str>,
}

pub(crate) fn placeholder_spans(text: &str) -> Vec<PlaceholderSpan<'_>> {
    let opener = format!("{}{{", DISPLAY_PLACEHOLDER_MARKER);
    let mut spans = Vec::new();
    let mut cursor = 0;

    while let Some(found) = text[cursor..].find(&opener) {
        let start = cursor + found;
        let inner_start = start + opener.len();
        let Some(close) = text[inner_start..].find('}') else {
            break;
        };
        let end = inner_start + close + 1;
        let (name, property) = split_concept_ref(&text[inner_start..inner_start + close]);
        if !name.is_empty() {
            spans.push(PlaceholderSpan {
                start,
                end,
                name,
                property,
            });
        }
        cursor = end;
    }

    spans
}
