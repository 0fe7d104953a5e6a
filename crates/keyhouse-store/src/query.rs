//! Set-Algebra Query Engine
//!
//! This module implements `runQuery`: UDFs submit a boolean expression
//! over set-valued keys and get the computed set back, letting one
//! callback answer questions that would otherwise take many round trips.
//!
//! ## Grammar
//!
//! ```text
//! E := T ('|' T)*      union (lowest precedence)
//! T := F ('&' F)*      intersection
//! F := G ('-' G)*      difference (highest precedence)
//! G := KEY | '(' E ')'
//! ```
//!
//! Operators are left-associative, so `a - b - c` is `(a - b) - c`, and
//! `a | b & c - d` parses as `a | (b & (c - d))`. Parentheses override as
//! usual. Keys are bare tokens (no quoting); any run of characters other
//! than whitespace, operators, and parentheses is a key.
//!
//! ## Evaluation
//!
//! Atoms resolve through a caller-supplied lookup function, which is how
//! the same engine serves both the local cache and the sharded fan-out
//! (the sharded path gathers every referenced set first, then evaluates).
//! Missing keys evaluate to the empty set rather than failing; only parse
//! errors are errors.
//!
//! ## Example
//!
//! ```ignore
//! // bikes = {"b1", "b2"}, red = {"b2", "c3"}
//! let result = eval_query("bikes & red", |key| sets.get(key).cloned().unwrap_or_default())?;
//! assert_eq!(result, vec!["b2"]);
//! ```

use std::collections::HashSet;

use keyhouse_core::{KvError, Result};

/// Parsed query expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Key(String),
    Union(Box<Node>, Box<Node>),
    Intersection(Box<Node>, Box<Node>),
    Difference(Box<Node>, Box<Node>),
}

impl Node {
    /// Evaluate against `lookup`, which returns the set for a key (empty
    /// for missing keys).
    pub fn eval<F>(&self, lookup: &F) -> HashSet<String>
    where
        F: Fn(&str) -> HashSet<String>,
    {
        match self {
            Node::Key(key) => lookup(key),
            Node::Union(left, right) => {
                let mut result = left.eval(lookup);
                result.extend(right.eval(lookup));
                result
            }
            Node::Intersection(left, right) => {
                let right_set = right.eval(lookup);
                left.eval(lookup)
                    .into_iter()
                    .filter(|v| right_set.contains(v))
                    .collect()
            }
            Node::Difference(left, right) => {
                let right_set = right.eval(lookup);
                left.eval(lookup)
                    .into_iter()
                    .filter(|v| !right_set.contains(v))
                    .collect()
            }
        }
    }

    /// Keys referenced anywhere in the expression.
    pub fn keys(&self) -> HashSet<&str> {
        let mut out = HashSet::new();
        self.collect_keys(&mut out);
        out
    }

    fn collect_keys<'a>(&'a self, out: &mut HashSet<&'a str>) {
        match self {
            Node::Key(key) => {
                out.insert(key.as_str());
            }
            Node::Union(l, r) | Node::Intersection(l, r) | Node::Difference(l, r) => {
                l.collect_keys(out);
                r.collect_keys(out);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Key(String),
    Union,
    Intersection,
    Difference,
    Open,
    Close,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '|' => {
                chars.next();
                tokens.push(Token::Union);
            }
            '&' => {
                chars.next();
                tokens.push(Token::Intersection);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Difference);
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            _ => {
                let mut key = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '|' | '&' | '-' | '(' | ')') {
                        break;
                    }
                    key.push(c);
                    chars.next();
                }
                tokens.push(Token::Key(key));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    // E := T ('|' T)*
    fn expression(&mut self) -> Result<Node> {
        let mut node = self.term()?;
        while self.peek() == Some(&Token::Union) {
            self.next();
            node = Node::Union(Box::new(node), Box::new(self.term()?));
        }
        Ok(node)
    }

    // T := F ('&' F)*
    fn term(&mut self) -> Result<Node> {
        let mut node = self.factor()?;
        while self.peek() == Some(&Token::Intersection) {
            self.next();
            node = Node::Intersection(Box::new(node), Box::new(self.factor()?));
        }
        Ok(node)
    }

    // F := G ('-' G)*
    fn factor(&mut self) -> Result<Node> {
        let mut node = self.group()?;
        while self.peek() == Some(&Token::Difference) {
            self.next();
            node = Node::Difference(Box::new(node), Box::new(self.group()?));
        }
        Ok(node)
    }

    // G := KEY | '(' E ')'
    fn group(&mut self) -> Result<Node> {
        match self.next() {
            Some(Token::Key(key)) => Ok(Node::Key(key)),
            Some(Token::Open) => {
                let node = self.expression()?;
                match self.next() {
                    Some(Token::Close) => Ok(node),
                    _ => Err(KvError::invalid_argument("Query missing closing parenthesis")),
                }
            }
            other => Err(KvError::invalid_argument(format!(
                "Query expected key or group, found {other:?}"
            ))),
        }
    }
}

/// Parse a query expression into its AST.
pub fn parse(input: &str) -> Result<Node> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(KvError::invalid_argument("Empty query"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let node = parser.expression()?;
    if parser.pos != parser.tokens.len() {
        return Err(KvError::invalid_argument(format!(
            "Unexpected trailing tokens in query at position {}",
            parser.pos
        )));
    }
    Ok(node)
}

/// Parse and evaluate a query, returning the result as a sorted list.
pub fn eval_query<F>(input: &str, lookup: F) -> Result<Vec<String>>
where
    F: Fn(&str) -> HashSet<String>,
{
    let node = parse(input)?;
    let mut result: Vec<String> = node.eval(&lookup).into_iter().collect();
    result.sort();
    Ok(result)
}
