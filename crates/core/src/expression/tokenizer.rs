//! Tokenizer for concept expressions.
//!
//! Concept references (`{Name}`, `{Name.value}`, `{Name.COUNT}`) are kept as single opaque
//! tokens; they are only resolved against a concept map at evaluation time. The word
//! operators `AND`, `OR` and `NOT` are normalised here to the same tokens as `&&`, `||` and
//! `!`, and a lone `=` becomes [`Token::Eq`]. Number literals accept an optional exponent
//! (`1e3`, `2.5E-1`).

use super::{split_concept_ref, ExpressionError, ExpressionResult};
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Concept {
        name: String,
        property: Option<String>,
    },
    Number(f64),
    Str(String),
    True,
    False,
    Null,
    /// A bare word that is not a keyword. Always rejected by the parser.
    Ident(String),
    And,
    Or,
    Not,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Star,
    Slash,
    LeftParen,
    RightParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Concept { name, property } => match property {
                Some(p) => write!(f, "{{{}.{}}}", name, p),
                None => write!(f, "{{{}}}", name),
            },
            Token::Number(n) => write!(f, "{}", format_number(*n)),
            Token::Str(s) => write!(f, "{:?}", s),
            Token::True => f.write_str("true"),
            Token::False => f.write_str("false"),
            Token::Null => f.write_str("null"),
            Token::Ident(word) => f.write_str(word),
            Token::And => f.write_str("&&"),
            Token::Or => f.write_str("||"),
            Token::Not => f.write_str("!"),
            Token::Eq => f.write_str("=="),
            Token::NotEq => f.write_str("!="),
            Token::Lt => f.write_str("<"),
            Token::LtEq => f.write_str("<="),
            Token::Gt => f.write_str(">"),
            Token::GtEq => f.write_str(">="),
            Token::Plus => f.write_str("+"),
            Token::Minus => f.write_str("-"),
            Token::Star => f.write_str("*"),
            Token::Slash => f.write_str("/"),
            Token::LeftParen => f.write_str("("),
            Token::RightParen => f.write_str(")"),
        }
    }
}

/// Renders a number the way the expression language prints it: integral values carry no
/// fractional part.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// A token and the byte offset it starts at.
#[derive(Clone, Debug, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub fn tokenize(input: &str) -> ExpressionResult<Vec<Spanned>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let token = match c {
            '{' => {
                chars.next();
                let mut inner = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    inner.push(c);
                }
                if !closed {
                    return Err(ExpressionError::Unterminated {
                        what: "concept reference",
                        offset,
                    });
                }
                let (name, property) = split_concept_ref(&inner);
                if name.is_empty() {
                    return Err(ExpressionError::EmptyConceptReference { offset });
                }
                Token::Concept {
                    name: name.to_string(),
                    property: property.map(str::to_string),
                }
            }
            '\'' | '"' => {
                chars.next();
                let quote = c;
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some((_, 'n')) => text.push('\n'),
                            Some((_, 't')) => text.push('\t'),
                            Some((_, escaped)) => text.push(escaped),
                            None => break,
                        },
                        c if c == quote => {
                            closed = true;
                            break;
                        }
                        c => text.push(c),
                    }
                }
                if !closed {
                    return Err(ExpressionError::Unterminated {
                        what: "string literal",
                        offset,
                    });
                }
                Token::Str(text)
            }
            '0'..='9' | '.' => {
                let mut text = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        text.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if let Some(&(_, marker @ ('e' | 'E'))) = chars.peek() {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    let mut exponent = String::from(marker);
                    if let Some(&(_, sign @ ('+' | '-'))) = lookahead.peek() {
                        exponent.push(sign);
                        lookahead.next();
                    }
                    // Without digits the `e` starts a separate word.
                    if lookahead.peek().is_some_and(|&(_, c)| c.is_ascii_digit()) {
                        while let Some(&(_, c)) = lookahead.peek() {
                            if !c.is_ascii_digit() {
                                break;
                            }
                            exponent.push(c);
                            lookahead.next();
                        }
                        text.push_str(&exponent);
                        chars = lookahead;
                    }
                }
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::InvalidNumber { text, offset })?;
                Token::Number(n)
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match word.as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                }
            }
            _ => {
                chars.next();
                let next = chars.peek().map(|&(_, c)| c);
                let (token, pair) = match (c, next) {
                    ('&', Some('&')) => (Token::And, true),
                    ('|', Some('|')) => (Token::Or, true),
                    ('=', Some('=')) => (Token::Eq, true),
                    ('!', Some('=')) => (Token::NotEq, true),
                    ('<', Some('=')) => (Token::LtEq, true),
                    ('>', Some('=')) => (Token::GtEq, true),
                    ('=', _) => (Token::Eq, false),
                    ('!', _) => (Token::Not, false),
                    ('<', _) => (Token::Lt, false),
                    ('>', _) => (Token::Gt, false),
                    ('+', _) => (Token::Plus, false),
                    ('-', _) => (Token::Minus, false),
                    ('*', _) => (Token::Star, false),
                    ('/', _) => (Token::Slash, false),
                    ('(', _) => (Token::LeftParen, false),
                    (')', _) => (Token::RightParen, false),
                    _ => return Err(ExpressionError::UnexpectedCharacter { found: c, offset }),
                };
                if pair {
                    chars.next();
                }
                token
            }
        };

        tokens.push(Spanned { token, offset });
    }

    Ok(tokens)
}
