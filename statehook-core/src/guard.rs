//! Guard expressions for definition files.
//!
//! A guard is a boolean expression over the JSON view of a dispatch context
//! (see [`Context::to_value`]), whose top-level keys are `event`, `payload`,
//! `result`, `error`, `state` and `data`.
//!
//! - `ctx.payload.ready` - path is truthy
//! - `ctx.payload.items.0.sku` - numeric segments index arrays
//! - `ctx.event == "retry"` - `==` and `!=` on any JSON value
//! - `ctx.payload.qty >= ctx.data.limit` - `>`, `>=`, `<`, `<=` on numbers or strings
//! - `!expr`, `a && b`, `a || b`, `(expr)` - `&&` binds tighter than `||`
//!
//! Literals are double-quoted strings, numbers, `true`, `false` and `null`.
//! A missing path reads as `null`. Ordering comparisons between values of
//! different kinds are false.

use crate::context::Context;
use crate::error::EngineError;
use crate::handler::Condition;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;

/// A parsed guard.
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    Truthy(Operand),
    Compare(Operand, CmpOp, Operand),
    Not(Box<Guard>),
    All(Vec<Guard>),
    Any(Vec<Guard>),
}

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Segments after `ctx.`.
    Path(Vec<String>),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Guard {
    pub fn parse(source: &str) -> Result<Guard, EngineError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(invalid("empty expression"));
        }

        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let guard = parser.parse_or()?;
        match parser.peek() {
            None => Ok(guard),
            Some(token) => Err(invalid(format!("unexpected {} after expression", token.describe()))),
        }
    }

    pub fn evaluate(&self, ctx: &Value) -> bool {
        match self {
            Guard::Truthy(operand) => is_truthy(&operand.read(ctx)),
            Guard::Compare(left, op, right) => op.apply(&left.read(ctx), &right.read(ctx)),
            Guard::Not(inner) => !inner.evaluate(ctx),
            Guard::All(parts) => parts.iter().all(|g| g.evaluate(ctx)),
            Guard::Any(parts) => parts.iter().any(|g| g.evaluate(ctx)),
        }
    }

    /// Wraps the guard as a transition condition.
    pub fn into_condition(self) -> Condition {
        let guard = Arc::new(self);
        Condition::from_fn(move |ctx: &Context| guard.evaluate(&ctx.to_value()))
    }
}

/// Parses `source` straight into a condition.
pub fn condition(source: &str) -> Result<Condition, EngineError> {
    Guard::parse(source).map(Guard::into_condition)
}

impl Operand {
    fn read(&self, ctx: &Value) -> Value {
        match self {
            Operand::Literal(value) => value.clone(),
            Operand::Path(segments) => segments
                .iter()
                .try_fold(ctx, |node, segment| match node {
                    Value::Object(map) => map.get(segment),
                    Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                    _ => None,
                })
                .cloned()
                .unwrap_or(Value::Null),
        }
    }
}

impl CmpOp {
    fn apply(self, left: &Value, right: &Value) -> bool {
        match self {
            CmpOp::Eq => loosely_equal(left, right),
            CmpOp::Ne => !loosely_equal(left, right),
            CmpOp::Gt => order(left, right) == Some(Ordering::Greater),
            CmpOp::Ge => matches!(order(left, right), Some(Ordering::Greater | Ordering::Equal)),
            CmpOp::Lt => order(left, right) == Some(Ordering::Less),
            CmpOp::Le => matches!(order(left, right), Some(Ordering::Less | Ordering::Equal)),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

// 1 and 1.0 are equal.
fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn invalid(reason: impl Into<String>) -> EngineError {
    EngineError::InvalidGuard {
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(Vec<String>),
    Literal(Value),
    Cmp(CmpOp),
    Not,
    And,
    Or,
    Open,
    Close,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Path(segments) => format!("path 'ctx.{}'", segments.join(".")),
            Token::Literal(value) => format!("literal {}", value),
            Token::Cmp(op) => format!("operator {:?}", op),
            Token::Not => "'!'".to_string(),
            Token::And => "'&&'".to_string(),
            Token::Or => "'||'".to_string(),
            Token::Open => "'('".to_string(),
            Token::Close => "')'".to_string(),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, EngineError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        let (token, width) = match (c, next) {
            (c, _) if c.is_whitespace() => {
                i += 1;
                continue;
            }
            ('(', _) => (Token::Open, 1),
            (')', _) => (Token::Close, 1),
            ('&', Some('&')) => (Token::And, 2),
            ('|', Some('|')) => (Token::Or, 2),
            ('=', Some('=')) => (Token::Cmp(CmpOp::Eq), 2),
            ('!', Some('=')) => (Token::Cmp(CmpOp::Ne), 2),
            ('>', Some('=')) => (Token::Cmp(CmpOp::Ge), 2),
            ('<', Some('=')) => (Token::Cmp(CmpOp::Le), 2),
            ('!', _) => (Token::Not, 1),
            ('>', _) => (Token::Cmp(CmpOp::Gt), 1),
            ('<', _) => (Token::Cmp(CmpOp::Lt), 1),
            ('"', _) => {
                let (text, width) = lex_string(&chars[i..])?;
                (Token::Literal(Value::String(text)), width)
            }
            (c, _) if c.is_ascii_digit() || c == '-' => lex_number(&chars[i..])?,
            (c, _) if is_word_char(c) => lex_word(&chars[i..])?,
            (c, _) => return Err(invalid(format!("unexpected character '{}' at {}", c, i))),
        };

        tokens.push(token);
        i += width;
    }

    Ok(tokens)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

fn lex_string(chars: &[char]) -> Result<(String, usize), EngineError> {
    let mut text = String::new();
    let mut i = 1;
    while let Some(&c) = chars.get(i) {
        match c {
            '"' => return Ok((text, i + 1)),
            '\\' => {
                let escaped = chars.get(i + 1).ok_or_else(|| invalid("unterminated string"))?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => *other,
                });
                i += 2;
            }
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    Err(invalid("unterminated string"))
}

fn lex_number(chars: &[char]) -> Result<(Token, usize), EngineError> {
    let width = chars
        .iter()
        .enumerate()
        .take_while(|(i, c)| c.is_ascii_digit() || **c == '.' || (*i == 0 && **c == '-'))
        .count();
    let text: String = chars[..width].iter().collect();

    let number = match text.parse::<i64>() {
        Ok(n) => serde_json::Number::from(n),
        Err(_) => text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .ok_or_else(|| invalid(format!("invalid number '{}'", text)))?,
    };
    Ok((Token::Literal(Value::Number(number)), width))
}

fn lex_word(chars: &[char]) -> Result<(Token, usize), EngineError> {
    let width = chars.iter().take_while(|c| is_word_char(**c)).count();
    let word: String = chars[..width].iter().collect();

    let token = match word.as_str() {
        "true" => Token::Literal(Value::Bool(true)),
        "false" => Token::Literal(Value::Bool(false)),
        "null" => Token::Literal(Value::Null),
        _ => {
            let path = word
                .strip_prefix("ctx.")
                .ok_or_else(|| invalid(format!("expected 'ctx.' path, found '{}'", word)))?;
            let segments: Vec<String> = path.split('.').map(str::to_string).collect();
            if segments.iter().any(|s| s.is_empty()) {
                return Err(invalid(format!("empty segment in path '{}'", word)));
            }
            Token::Path(segments)
        }
    };
    Ok((token, width))
}

/// Recursive descent over the token stream.
/// Deepest nesting of `!` and parentheses accepted by the parser.
const MAX_DEPTH: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Guard, EngineError> {
        let mut parts = vec![self.parse_and()?];
        while self.eat(&Token::Or) {
            parts.push(self.parse_and()?);
        }
        Ok(flatten(parts, Guard::Any))
    }

    fn parse_and(&mut self) -> Result<Guard, EngineError> {
        let mut parts = vec![self.parse_unary()?];
        while self.eat(&Token::And) {
            parts.push(self.parse_unary()?);
        }
        Ok(flatten(parts, Guard::All))
    }

    fn parse_unary(&mut self) -> Result<Guard, EngineError> {
        if self.eat(&Token::Not) {
            self.descend()?;
            let inner = self.parse_unary();
            self.depth -= 1;
            return Ok(Guard::Not(Box::new(inner?)));
        }
        if self.eat(&Token::Open) {
            self.descend()?;
            let inner = self.parse_or();
            self.depth -= 1;
            let inner = inner?;
            if !self.eat(&Token::Close) {
                return Err(invalid("missing ')'"));
            }
            return Ok(inner);
        }
        self.parse_comparison()
    }

    fn descend(&mut self) -> Result<(), EngineError> {
        if self.depth >= MAX_DEPTH {
            return Err(invalid(format!("nesting deeper than {}", MAX_DEPTH)));
        }
        self.depth += 1;
        Ok(())
    }

    fn parse_comparison(&mut self) -> Result<Guard, EngineError> {
        let left = self.parse_operand()?;
        match self.peek() {
            Some(Token::Cmp(op)) => {
                let op = *op;
                self.pos += 1;
                let right = self.parse_operand()?;
                Ok(Guard::Compare(left, op, right))
            }
            _ => Ok(Guard::Truthy(left)),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, EngineError> {
        match self.bump() {
            Some(Token::Path(segments)) => Ok(Operand::Path(segments)),
            Some(Token::Literal(value)) => Ok(Operand::Literal(value)),
            Some(other) => Err(invalid(format!("expected a path or literal, found {}", other.describe()))),
            None => Err(invalid("unexpected end of expression")),
        }
    }
}

fn flatten(mut parts: Vec<Guard>, join: fn(Vec<Guard>) -> Guard) -> Guard {
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        join(parts)
    }
}
