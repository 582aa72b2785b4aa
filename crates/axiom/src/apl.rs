// Copyright 2024-Present Axiom, Inc. https://axiom.co/
// SPDX-License-Identifier: Apache-2.0

//! Helpers for composing APL query text.
//!
//! Dataset and column names containing `.`, `-`, `_` or whitespace must be
//! written in bracket form, `['name']`, to be valid APL identifiers.

use std::fmt;

fn needs_brackets(name: &str) -> bool {
    name.is_empty()
        || name
            .chars()
            .any(|c| matches!(c, '.' | '-' | '_') || c.is_whitespace())
}

fn bracket(name: &str) -> String {
    let escaped = name.replace('\\', "\\\\").replace('\'', "\\'");
    format!("['{escaped}']")
}

pub fn quote_dataset(name: &str) -> String {
    if needs_brackets(name) {
        bracket(name)
    } else {
        name.to_string()
    }
}

pub fn quote_column(name: &str) -> String {
    quote_dataset(name)
}

/// A literal value on the right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    match c {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        c => write!(f, "{c}")?,
                    }
                }
                f.write_str("\"")
            }
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Literal {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

/// A conjunction of column comparisons, rendered as an APL predicate.
///
/// ```
/// use axiom::apl::Filter;
///
/// let filter = Filter::new().and_gte("status", 500).and_eq("service.name", "api");
/// assert_eq!(filter.to_string(), "status >= 500 and ['service.name'] == \"api\"");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Operator, Literal)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn and(mut self, column: &str, op: Operator, value: impl Into<Literal>) -> Self {
        self.clauses.push((column.to_string(), op, value.into()));
        self
    }

    #[must_use]
    pub fn and_eq(self, column: &str, value: impl Into<Literal>) -> Self {
        self.and(column, Operator::Eq, value)
    }

    #[must_use]
    pub fn and_ne(self, column: &str, value: impl Into<Literal>) -> Self {
        self.and(column, Operator::Ne, value)
    }

    #[must_use]
    pub fn and_gt(self, column: &str, value: impl Into<Literal>) -> Self {
        self.and(column, Operator::Gt, value)
    }

    #[must_use]
    pub fn and_gte(self, column: &str, value: impl Into<Literal>) -> Self {
        self.and(column, Operator::Gte, value)
    }

    #[must_use]
    pub fn and_lt(self, column: &str, value: impl Into<Literal>) -> Self {
        self.and(column, Operator::Lt, value)
    }

    #[must_use]
    pub fn and_lte(self, column: &str, value: impl Into<Literal>) -> Self {
        self.and(column, Operator::Lte, value)
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (column, op, value)) in self.clauses.iter().enumerate() {
            if i > 0 {
                f.write_str(" and ")?;
            }
            write!(f, "{} {} {value}", quote_column(column), op.as_str())?;
        }
        Ok(())
    }
}

/// `<dataset> | where <filter>`, or just the dataset for an empty filter.
pub fn where_query(dataset: &str, filter: &Filter) -> String {
    if filter.is_empty() {
        quote_dataset(dataset)
    } else {
        format!("{} | where {filter}", quote_dataset(dataset))
    }
}
