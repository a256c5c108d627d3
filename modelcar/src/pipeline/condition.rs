//! Run-condition expressions.
//!
//! ```text
//! expr  := or
//! or    := and ('||' and)*
//! and   := unary ('&&' unary)*
//! unary := '!' unary | cmp
//! cmp   := atom (('==' | '!=') atom)?
//! atom  := 'true' | 'false' | 'null' | number | string | reference | '(' expr ')'
//! ```
//!
//! A reference is a parameter name or `stage.output`. References with no
//! value evaluate to `null`.

use super::InputSource;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Error raised when a condition does not parse.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid condition at offset {position}: {message}")]
pub struct ConditionError {
    /// Description of the problem.
    pub message: String,
    /// Byte offset into the expression.
    pub position: usize,
}

impl ConditionError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal value.
    Literal(Value),
    /// A parameter or stage output.
    Reference(InputSource),
    /// Logical negation.
    Not(Box<Expr>),
    /// Short-circuit conjunction.
    And(Box<Expr>, Box<Expr>),
    /// Short-circuit disjunction.
    Or(Box<Expr>, Box<Expr>),
    /// Equality.
    Eq(Box<Expr>, Box<Expr>),
    /// Inequality.
    Ne(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Not,
    And,
    Or,
    EqEq,
    NotEq,
    Str(String),
    Num(serde_json::Number),
    Ident(String),
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

fn tokenize(src: &str) -> Result<Vec<(Token, usize)>, ConditionError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push((Token::LParen, pos));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, pos));
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push((Token::And, pos));
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push((Token::Or, pos));
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push((Token::EqEq, pos));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push((Token::NotEq, pos));
                i += 2;
            }
            '!' => {
                tokens.push((Token::Not, pos));
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(ConditionError::new("unterminated string", pos)),
                        Some((_, '\\')) => {
                            let (_, escaped) = chars
                                .get(i + 1)
                                .copied()
                                .ok_or_else(|| ConditionError::new("unterminated string", pos))?;
                            value.push(escaped);
                            i += 2;
                        }
                        Some((_, ch)) if *ch == quote => {
                            i += 1;
                            break;
                        }
                        Some((_, ch)) => {
                            value.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push((Token::Str(value), pos));
            }
            c if is_word_char(c) => {
                let start = i;
                i += 1;
                while chars.get(i).is_some_and(|(_, c)| is_word_char(*c)) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().map(|(_, c)| c).collect();
                tokens.push((classify_word(&word, pos)?, pos));
            }
            other => {
                return Err(ConditionError::new(format!("unexpected character '{other}'"), pos));
            }
        }
    }
    Ok(tokens)
}

fn classify_word(word: &str, pos: usize) -> Result<Token, ConditionError> {
    let first = word.chars().next().unwrap_or(' ');
    if first == '-' || first.is_ascii_digit() {
        if let Ok(n) = word.parse::<i64>() {
            return Ok(Token::Num(n.into()));
        }
        if let Some(n) = word.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            return Ok(Token::Num(n));
        }
        if first == '-' {
            return Err(ConditionError::new(format!("invalid number '{word}'"), pos));
        }
    }
    Ok(Token::Ident(word.to_string()))
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    index: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index).map(|(t, _)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.index).map_or(self.end, |(_, p)| *p)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).map(|(t, _)| t.clone());
        self.index += 1;
        token
    }

    fn or(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            left = Expr::Or(Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            left = Expr::And(Box::new(left), Box::new(self.unary()?));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ConditionError> {
        let left = self.atom()?;
        match self.peek() {
            Some(Token::EqEq) => {
                self.advance();
                Ok(Expr::Eq(Box::new(left), Box::new(self.atom()?)))
            }
            Some(Token::NotEq) => {
                self.advance();
                Ok(Expr::Ne(Box::new(left), Box::new(self.atom()?)))
            }
            _ => Ok(left),
        }
    }

    fn atom(&mut self) -> Result<Expr, ConditionError> {
        let position = self.position();
        match self.advance() {
            Some(Token::LParen) => {
                let inner = self.or()?;
                if self.advance() == Some(Token::RParen) {
                    Ok(inner)
                } else {
                    Err(ConditionError::new("expected ')'", self.position()))
                }
            }
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(Value::Number(n))),
            Some(Token::Ident(word)) => Ok(match word.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" => Expr::Literal(Value::Null),
                _ => Expr::Reference(InputSource::parse(&word)),
            }),
            Some(other) => Err(ConditionError::new(format!("unexpected token {other:?}"), position)),
            None => Err(ConditionError::new("unexpected end of expression", position)),
        }
    }
}

/// Returns the truthiness of a value.
///
/// `true`, non-zero numbers and non-empty strings, arrays and objects are
/// truthy; `null` and everything else is falsy.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// A parsed run condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    /// Parses an expression.
    ///
    /// # Errors
    ///
    /// Returns a `ConditionError` describing the first syntax error.
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ConditionError::new("empty expression", 0));
        }
        let mut parser = Parser {
            tokens,
            index: 0,
            end: source.len(),
        };
        let expr = parser.or()?;
        if parser.index < parser.tokens.len() {
            return Err(ConditionError::new("unexpected trailing input", parser.position()));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// Returns the original expression text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the parsed tree.
    #[must_use]
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Returns every reference in the expression, in order of appearance.
    #[must_use]
    pub fn references(&self) -> Vec<&InputSource> {
        fn walk<'a>(expr: &'a Expr, out: &mut Vec<&'a InputSource>) {
            match expr {
                Expr::Literal(_) => {}
                Expr::Reference(source) => out.push(source),
                Expr::Not(inner) => walk(inner, out),
                Expr::And(a, b) | Expr::Or(a, b) | Expr::Eq(a, b) | Expr::Ne(a, b) => {
                    walk(a, out);
                    walk(b, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.expr, &mut out);
        out
    }

    /// Evaluates the condition, resolving references through `lookup`.
    pub fn evaluate<F>(&self, lookup: F) -> bool
    where
        F: Fn(&InputSource) -> Option<Value>,
    {
        is_truthy(&eval(&self.expr, &lookup))
    }
}

fn eval<F>(expr: &Expr, lookup: &F) -> Value
where
    F: Fn(&InputSource) -> Option<Value>,
{
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Reference(source) => lookup(source).unwrap_or(Value::Null),
        Expr::Not(inner) => Value::Bool(!is_truthy(&eval(inner, lookup))),
        Expr::And(a, b) => Value::Bool(is_truthy(&eval(a, lookup)) && is_truthy(&eval(b, lookup))),
        Expr::Or(a, b) => Value::Bool(is_truthy(&eval(a, lookup)) || is_truthy(&eval(b, lookup))),
        Expr::Eq(a, b) => Value::Bool(values_equal(&eval(a, lookup), &eval(b, lookup))),
        Expr::Ne(a, b) => Value::Bool(!values_equal(&eval(a, lookup), &eval(b, lookup))),
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
