//! # Concept expressions
//!
//! Compiles and evaluates the small boolean expression language embedded in configuration
//! documents.
//!
//! ## Syntax
//!
//! - Literal wrappers: `[%true%]`, `[%false%]`
//! - Concept references: `{Name}`, `{Name.value}`, `{Name.COUNT}`
//! - Logical keywords: `AND`, `OR`, `NOT` (also `&&`, `||`, `!`)
//! - Comparison: `=` (same as `==`), `==`, `!=`, `<`, `<=`, `>`, `>=`
//! - Number literals (`70`, `2.5`, `1e3`), quoted strings, `null`, `+ - * /`, parentheses
//!
//! Concept names are opaque to the parser. They are resolved only at evaluation time against
//! whichever [`ConceptMap`] is supplied, so one compiled expression can be run against the
//! live instantiation, a test patient or a test case.
//!
//! ## Failure policy
//!
//! [`evaluate`] never fails: any tokenizer, parser or evaluation error is logged together
//! with the original text, the substituted text and the concept map, and the result is
//! `false`. Use [`try_evaluate`] to see the error.

mod evaluator;
mod parser;
mod tokenizer;

pub use evaluator::EvalValue;
pub use parser::{
    BinaryOp, ConceptAccess, Expr, Literal, UnaryOp, MAX_NESTING_DEPTH, MAX_TREE_DEPTH,
};
pub use tokenizer::{tokenize, Spanned, Token};

use crate::concept::ConceptMap;
use crate::constants::{EXPRESSION_PREFIX, EXPRESSION_SUFFIX};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression is empty")]
    Empty,
    #[error("unterminated {what} starting at offset {offset}")]
    Unterminated { what: &'static str, offset: usize },
    #[error("empty concept reference at offset {offset}")]
    EmptyConceptReference { offset: usize },
    #[error("unexpected character '{found}' at offset {offset}")]
    UnexpectedCharacter { found: char, offset: usize },
    #[error("invalid number '{text}' at offset {offset}")]
    InvalidNumber { text: String, offset: usize },
    #[error("unexpected token '{found}' at offset {offset}")]
    UnexpectedToken { found: String, offset: usize },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unknown identifier '{word}' at offset {offset}")]
    UnknownIdentifier { word: String, offset: usize },
    #[error("expression nests too deeply at offset {offset}")]
    TooDeep { offset: usize },
    #[error("value of concept {concept} cannot be used in an expression")]
    UnsupportedValue { concept: String },
}

pub type ExpressionResult<T> = Result<T, ExpressionError>;

/// Splits the text inside `{...}` into the concept name and an optional property.
///
/// The split happens at the first `.`, so `{Hb.value}` names `Hb` and `{A.b.c}` names `A`
/// with property `b.c`.
pub fn split_concept_ref(inner: &str) -> (&str, Option<&str>) {
    match inner.split_once('.') {
        Some((name, property)) => (name.trim(), Some(property.trim())),
        None => (inner.trim(), None),
    }
}

/// Removes the `[%`/`%]` wrapper when present.
pub fn strip_wrapper(text: &str) -> &str {
    let text = text.trim();
    let text = text.strip_prefix(EXPRESSION_PREFIX).unwrap_or(text);
    text.strip_suffix(EXPRESSION_SUFFIX).unwrap_or(text).trim()
}

#[derive(Clone, Debug, PartialEq)]
enum Body {
    Literal(bool),
    Tree { tokens: Vec<Spanned>, expr: Expr },
}

/// A compiled expression, reusable against any number of concept maps.
#[derive(Clone, Debug, PartialEq)]
pub struct ConceptExpression {
    source: String,
    body: Body,
}

impl ConceptExpression {
    pub fn compile(text: &str) -> ExpressionResult<Self> {
        let source = text.to_string();

        let body = match text.trim() {
            "[%true%]" => Body::Literal(true),
            "[%false%]" => Body::Literal(false),
            _ => match strip_wrapper(text) {
                "true" => Body::Literal(true),
                "false" => Body::Literal(false),
                inner => {
                    let tokens = tokenize(inner)?;
                    let expr = parser::parse(&tokens)?;
                    Body::Tree { tokens, expr }
                }
            },
        };

        Ok(Self { source, body })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Distinct concept names in order of first appearance.
    pub fn referenced_concepts(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        if let Body::Tree { tokens, .. } = &self.body {
            for spanned in tokens {
                if let Token::Concept { name, .. } = &spanned.token {
                    if !names.contains(&name.as_str()) {
                        names.push(name);
                    }
                }
            }
        }
        names
    }

    pub fn evaluate(&self, concepts: &ConceptMap) -> ExpressionResult<bool> {
        match &self.body {
            Body::Literal(b) => Ok(*b),
            Body::Tree { expr, .. } => evaluator::evaluate(expr, concepts).map(|v| v.truthy()),
        }
    }

    /// Renders the expression with every concept reference replaced by the literal it
    /// resolves to and word operators normalised. Used for diagnostics.
    pub fn substituted(&self, concepts: &ConceptMap) -> String {
        match &self.body {
            Body::Literal(b) => b.to_string(),
            Body::Tree { tokens, .. } => tokens
                .iter()
                .map(|spanned| match &spanned.token {
                    Token::Concept { name, property } => {
                        substitute_reference(name, property.as_deref(), concepts)
                    }
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

fn substitute_reference(name: &str, property: Option<&str>, concepts: &ConceptMap) -> String {
    let Some(instance) = concepts.get(name) else {
        return "false".into();
    };

    match property {
        Some(crate::constants::VALUE_PROPERTY) => {
            serde_json::to_string(&instance.value).unwrap_or_else(|_| "null".into())
        }
        Some(crate::constants::COUNT_PROPERTY) => u8::from(instance.is_active).to_string(),
        _ => instance.is_active.to_string(),
    }
}

/// Compiles and evaluates `text`, surfacing any error.
pub fn try_evaluate(text: &str, concepts: &ConceptMap) -> ExpressionResult<bool> {
    ConceptExpression::compile(text)?.evaluate(concepts)
}

/// Compiles and evaluates `text` against `concepts`, degrading to `false` on any failure.
pub fn evaluate(text: &str, concepts: &ConceptMap) -> bool {
    let compiled = match ConceptExpression::compile(text) {
        Ok(compiled) => compiled,
        Err(e) => {
            log_failure(text, strip_wrapper(text), concepts, &e);
            return false;
        }
    };

    match compiled.evaluate(concepts) {
        Ok(result) => result,
        Err(e) => {
            log_failure(text, &compiled.substituted(concepts), concepts, &e);
            false
        }
    }
}

fn log_failure(original: &str, processed: &str, concepts: &ConceptMap, error: &ExpressionError) {
    let concept_json = serde_json::to_string(concepts).unwrap_or_default();
    tracing::error!(
        original = original,
        processed = processed,
        concepts = %concept_json,
        "failed to evaluate expression: {}",
        error
    );
}
