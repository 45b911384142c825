//! Direct evaluation of an [`Expr`] tree against a [`ConceptMap`].
//!
//! Values follow loose, script-like coercion rules: equality between a number and a string
//! compares numerically, relational operators on two strings compare lexically, `+` with a
//! string operand concatenates, and `&&`/`||` yield one of their operands. The final result
//! is coerced to a boolean by truthiness.

use super::parser::{BinaryOp, ConceptAccess, Expr, Literal, UnaryOp};
use super::tokenizer::format_number;
use super::{ExpressionError, ExpressionResult};
use crate::concept::ConceptMap;
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Clone, Debug, PartialEq)]
pub enum EvalValue {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
}

impl EvalValue {
    pub fn truthy(&self) -> bool {
        match self {
            EvalValue::Null => false,
            EvalValue::Bool(b) => *b,
            EvalValue::Number(n) => *n != 0.0 && !n.is_nan(),
            EvalValue::Str(s) => !s.is_empty(),
        }
    }

    fn to_number(&self) -> f64 {
        match self {
            EvalValue::Null => 0.0,
            EvalValue::Bool(b) => f64::from(u8::from(*b)),
            EvalValue::Number(n) => *n,
            EvalValue::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
        }
    }

    fn to_text(&self) -> String {
        match self {
            EvalValue::Null => "null".into(),
            EvalValue::Bool(b) => b.to_string(),
            EvalValue::Number(n) => format_number(*n),
            EvalValue::Str(s) => s.clone(),
        }
    }

    /// Converts a concept's raw JSON value. Arrays and objects have no expression form.
    pub fn from_json(concept: &str, value: &Value) -> ExpressionResult<Self> {
        match value {
            Value::Null => Ok(EvalValue::Null),
            Value::Bool(b) => Ok(EvalValue::Bool(*b)),
            Value::Number(n) => n
                .as_f64()
                .map(EvalValue::Number)
                .ok_or_else(|| ExpressionError::UnsupportedValue {
                    concept: concept.to_string(),
                }),
            Value::String(s) => Ok(EvalValue::Str(s.clone())),
            Value::Array(_) | Value::Object(_) => Err(ExpressionError::UnsupportedValue {
                concept: concept.to_string(),
            }),
        }
    }
}

pub fn evaluate(expr: &Expr, concepts: &ConceptMap) -> ExpressionResult<EvalValue> {
    match expr {
        Expr::Literal(literal) => Ok(match literal {
            Literal::Bool(b) => EvalValue::Bool(*b),
            Literal::Number(n) => EvalValue::Number(*n),
            Literal::Str(s) => EvalValue::Str(s.clone()),
            Literal::Null => EvalValue::Null,
        }),
        Expr::Concept { name, access } => resolve_concept(name, access, concepts),
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, concepts)?;
            Ok(match op {
                UnaryOp::Not => EvalValue::Bool(!value.truthy()),
                UnaryOp::Negate => EvalValue::Number(-value.to_number()),
            })
        }
        Expr::Binary { op, lhs, rhs } => {
            let left = evaluate(lhs, concepts)?;
            match op {
                BinaryOp::And if !left.truthy() => return Ok(left),
                BinaryOp::Or if left.truthy() => return Ok(left),
                BinaryOp::And | BinaryOp::Or => return evaluate(rhs, concepts),
                _ => {}
            }
            let right = evaluate(rhs, concepts)?;
            Ok(apply_binary(*op, &left, &right))
        }
    }
}

/// Unknown concepts read as `false` regardless of the requested property.
fn resolve_concept(
    name: &str,
    access: &ConceptAccess,
    concepts: &ConceptMap,
) -> ExpressionResult<EvalValue> {
    let Some(instance) = concepts.get(name) else {
        return Ok(EvalValue::Bool(false));
    };

    match access {
        ConceptAccess::Active => Ok(EvalValue::Bool(instance.is_active)),
        ConceptAccess::Count => Ok(EvalValue::Number(if instance.is_active {
            1.0
        } else {
            0.0
        })),
        ConceptAccess::Value => EvalValue::from_json(name, &instance.value),
    }
}

fn apply_binary(op: BinaryOp, left: &EvalValue, right: &EvalValue) -> EvalValue {
    match op {
        BinaryOp::Eq => EvalValue::Bool(loose_eq(left, right)),
        BinaryOp::NotEq => EvalValue::Bool(!loose_eq(left, right)),
        BinaryOp::Lt => EvalValue::Bool(compare(left, right) == Some(Ordering::Less)),
        BinaryOp::LtEq => EvalValue::Bool(matches!(
            compare(left, right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Gt => EvalValue::Bool(compare(left, right) == Some(Ordering::Greater)),
        BinaryOp::GtEq => EvalValue::Bool(matches!(
            compare(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::Add => match (left, right) {
            (EvalValue::Str(_), _) | (_, EvalValue::Str(_)) => {
                EvalValue::Str(format!("{}{}", left.to_text(), right.to_text()))
            }
            _ => EvalValue::Number(left.to_number() + right.to_number()),
        },
        BinaryOp::Sub => EvalValue::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => EvalValue::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => EvalValue::Number(left.to_number() / right.to_number()),
        // Short-circuited in `evaluate`.
        BinaryOp::And | BinaryOp::Or => EvalValue::Null,
    }
}

fn loose_eq(left: &EvalValue, right: &EvalValue) -> bool {
    match (left, right) {
        (EvalValue::Null, EvalValue::Null) => true,
        (EvalValue::Null, _) | (_, EvalValue::Null) => false,
        (EvalValue::Str(a), EvalValue::Str(b)) => a == b,
        (EvalValue::Bool(a), EvalValue::Bool(b)) => a == b,
        _ => left.to_number() == right.to_number(),
    }
}

/// `None` when the operands are incomparable (a NaN is involved).
fn compare(left: &EvalValue, right: &EvalValue) -> Option<Ordering> {
    match (left, right) {
        (EvalValue::Str(a), EvalValue::Str(b)) => Some(a.cmp(b)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    }
}
