//! Restricted predicate language for step and check conditions.
//!
//! Conditions compare variables and literals, nothing more:
//!
//! ```text
//! inputs.ready == true && (mode == 'fast' or !legacy)
//! ```
//!
//! Supported: dotted paths, single- or double-quoted strings, numbers,
//! `true` / `false` / `null`, `==`, `!=`, unary `!`, `&&` / `and`,
//! `||` / `or`, parentheses. A bare operand is true when it is truthy.
//! Unknown paths evaluate to `null`. There are no function calls and no
//! arithmetic; nothing in a condition can execute code.

use cadence_types::error::ErrorCategory;
use cadence_types::variables::Variables;
use serde_json::Value;

use crate::error::Classified;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConditionError {
    #[error("invalid condition '{source_text}' at offset {offset}: {message}")]
    Parse {
        source_text: String,
        offset: usize,
        message: String,
    },

    #[error("empty condition")]
    Empty,
}

impl Classified for ConditionError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Validation
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(String),
    Str(String),
    Num(f64),
    True,
    False,
    Null,
    Eq,
    Ne,
    Not,
    And,
    Or,
    LParen,
    RParen,
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, ConditionError> {
    let err = |offset: usize, message: &str| ConditionError::Parse {
        source_text: source.to_string(),
        offset,
        message: message.to_string(),
    };

    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push((offset, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((offset, Token::RParen));
                i += 1;
            }
            '=' => {
                if matches!(chars.get(i + 1), Some((_, '='))) {
                    tokens.push((offset, Token::Eq));
                    i += 2;
                } else {
                    return Err(err(offset, "expected '=='"));
                }
            }
            '!' => {
                if matches!(chars.get(i + 1), Some((_, '='))) {
                    tokens.push((offset, Token::Ne));
                    i += 2;
                } else {
                    tokens.push((offset, Token::Not));
                    i += 1;
                }
            }
            '&' => {
                if matches!(chars.get(i + 1), Some((_, '&'))) {
                    tokens.push((offset, Token::And));
                    i += 2;
                } else {
                    return Err(err(offset, "expected '&&'"));
                }
            }
            '|' => {
                if matches!(chars.get(i + 1), Some((_, '|'))) {
                    tokens.push((offset, Token::Or));
                    i += 2;
                } else {
                    return Err(err(offset, "expected '||'"));
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => return Err(err(offset, "unterminated string literal")),
                        Some((_, '\\')) => {
                            if let Some((_, escaped)) = chars.get(j + 1) {
                                text.push(*escaped);
                                j += 2;
                            } else {
                                return Err(err(offset, "unterminated string literal"));
                            }
                        }
                        Some((_, ch)) if *ch == quote => break,
                        Some((_, ch)) => {
                            text.push(*ch);
                            j += 1;
                        }
                    }
                }
                tokens.push((offset, Token::Str(text)));
                i = j + 1;
            }
            c if c.is_ascii_digit() || (c == '-' && next_is_digit(&chars, i)) => {
                let mut j = i + 1;
                while let Some((_, ch)) = chars.get(j) {
                    if ch.is_ascii_digit() || *ch == '.' {
                        j += 1;
                    } else {
                        break;
                    }
                }
                let end = chars.get(j).map_or(source.len(), |(o, _)| *o);
                let literal = &source[offset..end];
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| err(offset, "invalid number literal"))?;
                tokens.push((offset, Token::Num(number)));
                i = j;
            }
            c if is_path_start(c) => {
                let mut j = i + 1;
                while let Some((_, ch)) = chars.get(j) {
                    if is_path_char(*ch) {
                        j += 1;
                    } else {
                        break;
                    }
                }
                let end = chars.get(j).map_or(source.len(), |(o, _)| *o);
                let word = &source[offset..end];
                let token = match word {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "and" => Token::And,
                    "or" => Token::Or,
                    _ => {
                        if word.ends_with('.') || word.contains("..") {
                            return Err(err(offset, "malformed variable path"));
                        }
                        Token::Path(word.to_string())
                    }
                };
                tokens.push((offset, token));
                i = j;
            }
            _ => return Err(err(offset, &format!("unexpected character '{c}'"))),
        }
    }

    Ok(tokens)
}

fn next_is_digit(chars: &[(usize, char)], i: usize) -> bool {
    matches!(chars.get(i + 1), Some((_, ch)) if ch.is_ascii_digit())
}

fn is_path_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_path_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Path(String),
    Not(Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> ConditionError {
        let offset = self
            .tokens
            .get(self.pos)
            .map_or(self.source.len(), |(o, _)| *o);
        ConditionError::Parse {
            source_text: self.source.to_string(),
            offset,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ConditionError> {
        let left = self.parse_primary()?;
        match self.peek() {
            Some(Token::Eq) => {
                self.advance();
                let right = self.parse_primary()?;
                Ok(Expr::Eq(Box::new(left), Box::new(right)))
            }
            Some(Token::Ne) => {
                self.advance();
                let right = self.parse_primary()?;
                Ok(Expr::Ne(Box::new(left), Box::new(right)))
            }
            _ => Ok(left),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        match self.advance() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                if self.advance() != Some(Token::RParen) {
                    self.pos -= 1;
                    return Err(self.error("expected ')'"));
                }
                Ok(inner)
            }
            Some(Token::Path(path)) => Ok(Expr::Path(path)),
            Some(Token::Str(text)) => Ok(Expr::Literal(Value::String(text))),
            Some(Token::Num(n)) => Ok(Expr::Literal(number_value(n))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(_) => {
                self.pos -= 1;
                Err(self.error("expected a value, path or '('"))
            }
            None => Err(self.error("unexpected end of condition")),
        }
    }
}

fn number_value(n: f64) -> Value {
    serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// A parsed, reusable condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    /// Parse a condition string.
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ConditionError::Empty);
        }
        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
        };
        let expr = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a variable bag.
    pub fn evaluate(&self, variables: &Variables) -> bool {
        is_truthy(&eval(&self.expr, variables))
    }
}

/// Parse and evaluate `source` in one call.
pub fn evaluate_condition(source: &str, variables: &Variables) -> Result<bool, ConditionError> {
    Ok(Condition::parse(source)?.evaluate(variables))
}

fn eval(expr: &Expr, variables: &Variables) -> Value {
    match expr {
        Expr::Literal(value) => value.clone(),
        Expr::Path(path) => variables.get_path(path).cloned().unwrap_or(Value::Null),
        Expr::Not(inner) => Value::Bool(!is_truthy(&eval(inner, variables))),
        Expr::Eq(a, b) => Value::Bool(values_equal(&eval(a, variables), &eval(b, variables))),
        Expr::Ne(a, b) => Value::Bool(!values_equal(&eval(a, variables), &eval(b, variables))),
        Expr::And(a, b) => {
            Value::Bool(is_truthy(&eval(a, variables)) && is_truthy(&eval(b, variables)))
        }
        Expr::Or(a, b) => {
            Value::Bool(is_truthy(&eval(a, variables)) || is_truthy(&eval(b, variables)))
        }
    }
}

/// Equality with numeric normalization (`1 == 1.0`).
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// `null`, `false`, `0`, `""`, `[]` and `{}` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
