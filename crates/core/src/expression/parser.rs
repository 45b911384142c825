//! Recursive-descent parser producing an [`Expr`] tree.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! or         := and ( "||" and )*
//! and        := equality ( "&&" equality )*
//! equality   := relational ( ( "==" | "!=" ) relational )*
//! relational := additive ( ( "<" | "<=" | ">" | ">=" ) additive )*
//! additive   := term ( ( "+" | "-" ) term )*
//! term       := unary ( ( "*" | "/" ) unary )*
//! unary      := ( "!" | "-" ) unary | primary
//! primary    := literal | concept | "(" or ")"
//! ```
//!
//! Nesting of parentheses and prefix operators is capped at [`MAX_NESTING_DEPTH`] and the
//! height of the resulting tree at [`MAX_TREE_DEPTH`]; anything deeper is rejected with
//! [`ExpressionError::TooDeep`] so that neither parsing nor evaluation can exhaust the stack.

use super::tokenizer::{Spanned, Token};
use super::{ExpressionError, ExpressionResult};

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Bool(bool),
    Number(f64),
    Str(String),
    Null,
}

/// How a concept reference is read out of the concept map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConceptAccess {
    /// `{Name}` or an unrecognised property: the `isActive` flag.
    Active,
    /// `{Name.value}`: the raw value.
    Value,
    /// `{Name.COUNT}`: `1` when active, else `0`.
    Count,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Concept { name: String, access: ConceptAccess },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

/// Deepest nesting of parentheses and prefix operators accepted.
pub const MAX_NESTING_DEPTH: usize = 128;

/// Deepest expression tree accepted, counting chained binary operators.
pub const MAX_TREE_DEPTH: usize = 1024;

pub fn parse(tokens: &[Spanned]) -> ExpressionResult<Expr> {
    if tokens.is_empty() {
        return Err(ExpressionError::Empty);
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        nesting: 0,
    };
    let node = parser.or()?;

    match parser.tokens.get(parser.pos) {
        None => Ok(node.expr),
        Some(extra) => Err(ExpressionError::UnexpectedToken {
            found: extra.token.to_string(),
            offset: extra.offset,
        }),
    }
}

/// A parsed subtree and its height.
struct Node {
    expr: Expr,
    depth: usize,
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    nesting: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<&'a Spanned> {
        let spanned = self.tokens.get(self.pos);
        if spanned.is_some() {
            self.pos += 1;
        }
        spanned
    }

    fn current_offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or(self.tokens.last())
            .map_or(0, |s| s.offset)
    }

    fn enter(&mut self, offset: usize) -> ExpressionResult<()> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING_DEPTH {
            return Err(ExpressionError::TooDeep { offset });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    fn node(expr: Expr, depth: usize, offset: usize) -> ExpressionResult<Node> {
        if depth > MAX_TREE_DEPTH {
            return Err(ExpressionError::TooDeep { offset });
        }
        Ok(Node { expr, depth })
    }

    /// Parses one left-associative precedence level.
    fn binary_level(
        &mut self,
        operand: fn(&mut Self) -> ExpressionResult<Node>,
        op_for: fn(&Token) -> Option<BinaryOp>,
    ) -> ExpressionResult<Node> {
        let mut lhs = operand(self)?;
        while let Some(op) = self.peek().and_then(op_for) {
            let offset = self.current_offset();
            self.pos += 1;
            let rhs = operand(self)?;
            let depth = lhs.depth.max(rhs.depth) + 1;
            lhs = Self::node(
                Expr::Binary {
                    op,
                    lhs: Box::new(lhs.expr),
                    rhs: Box::new(rhs.expr),
                },
                depth,
                offset,
            )?;
        }
        Ok(lhs)
    }

    fn or(&mut self) -> ExpressionResult<Node> {
        self.binary_level(Self::and, |t| matches!(t, Token::Or).then_some(BinaryOp::Or))
    }

    fn and(&mut self) -> ExpressionResult<Node> {
        self.binary_level(Self::equality, |t| {
            matches!(t, Token::And).then_some(BinaryOp::And)
        })
    }

    fn equality(&mut self) -> ExpressionResult<Node> {
        self.binary_level(Self::relational, |t| match t {
            Token::Eq => Some(BinaryOp::Eq),
            Token::NotEq => Some(BinaryOp::NotEq),
            _ => None,
        })
    }

    fn relational(&mut self) -> ExpressionResult<Node> {
        self.binary_level(Self::additive, |t| match t {
            Token::Lt => Some(BinaryOp::Lt),
            Token::LtEq => Some(BinaryOp::LtEq),
            Token::Gt => Some(BinaryOp::Gt),
            Token::GtEq => Some(BinaryOp::GtEq),
            _ => None,
        })
    }

    fn additive(&mut self) -> ExpressionResult<Node> {
        self.binary_level(Self::term, |t| match t {
            Token::Plus => Some(BinaryOp::Add),
            Token::Minus => Some(BinaryOp::Sub),
            _ => None,
        })
    }

    fn term(&mut self) -> ExpressionResult<Node> {
        self.binary_level(Self::unary, |t| match t {
            Token::Star => Some(BinaryOp::Mul),
            Token::Slash => Some(BinaryOp::Div),
            _ => None,
        })
    }

    fn unary(&mut self) -> ExpressionResult<Node> {
        let op = match self.peek() {
            Some(Token::Not) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Negate,
            _ => return self.primary(),
        };
        let offset = self.current_offset();
        self.pos += 1;

        self.enter(offset)?;
        let operand = self.unary()?;
        self.leave();

        Self::node(
            Expr::Unary {
                op,
                operand: Box::new(operand.expr),
            },
            operand.depth + 1,
            offset,
        )
    }

    fn primary(&mut self) -> ExpressionResult<Node> {
        let Some(spanned) = self.advance() else {
            return Err(ExpressionError::UnexpectedEnd);
        };
        let offset = spanned.offset;

        let expr = match &spanned.token {
            Token::True => Expr::Literal(Literal::Bool(true)),
            Token::False => Expr::Literal(Literal::Bool(false)),
            Token::Null => Expr::Literal(Literal::Null),
            Token::Number(n) => Expr::Literal(Literal::Number(*n)),
            Token::Str(s) => Expr::Literal(Literal::Str(s.clone())),
            Token::Concept { name, property } => Expr::Concept {
                name: name.clone(),
                access: match property.as_deref() {
                    Some(crate::constants::VALUE_PROPERTY) => ConceptAccess::Value,
                    Some(crate::constants::COUNT_PROPERTY) => ConceptAccess::Count,
                    _ => ConceptAccess::Active,
                },
            },
            Token::Ident(word) => {
                return Err(ExpressionError::UnknownIdentifier {
                    word: word.clone(),
                    offset,
                })
            }
            Token::LeftParen => {
                self.enter(offset)?;
                let inner = self.or()?;
                self.leave();
                return match self.advance() {
                    Some(Spanned {
                        token: Token::RightParen,
                        ..
                    }) => Ok(inner),
                    Some(other) => Err(ExpressionError::UnexpectedToken {
                        found: other.token.to_string(),
                        offset: other.offset,
                    }),
                    None => Err(ExpressionError::UnexpectedEnd),
                };
            }
            other => {
                return Err(ExpressionError::UnexpectedToken {
                    found: other.to_string(),
                    offset,
                })
            }
        };

        Ok(Node { expr, depth: 1 })
    }
}
