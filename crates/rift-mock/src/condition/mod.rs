//! Declarative rule conditions.
//!
//! A condition is a small boolean expression evaluated against the single
//! "current request" (see [`NormalizedRequest::lookup`] for the references it
//! may use). It is parsed once when the rule is loaded and evaluated per
//! request without side effects.
//!
//! # Example
//!
//! ```text
//! query.flag == true and (header.x-env = 'prod' or ip like '10.%')
//! ```
//!
//! Evaluation is total: a reference to an attribute the request does not
//! have is *absent*. Absent values are unequal to every literal (so `!=`
//! holds), fail every ordering and `like` comparison, and are false when
//! used as a bare boolean.

mod parser;

use crate::error::ConfigError;
use crate::request::NormalizedRequest;
pub use parser::{CompareOp, Expr};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

/// A parsed, reusable condition.
#[derive(Debug, Clone)]
pub struct Condition {
    source: String,
    expr: Expr,
    /// Literal `like` patterns, compiled at load time
    patterns: HashMap<String, Regex>,
}

impl Condition {
    /// Parse a condition, failing with [`ConfigError::InvalidCondition`].
    pub fn compile(source: &str) -> Result<Self, ConfigError> {
        let expr = parser::parse(source).map_err(|reason| ConfigError::InvalidCondition {
            condition: source.to_string(),
            reason,
        })?;
        let mut patterns = HashMap::new();
        collect_like_patterns(&expr, &mut patterns).map_err(|e| {
            ConfigError::InvalidCondition {
                condition: source.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            source: source.to_string(),
            expr,
            patterns,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Does the request satisfy this condition?
    pub fn matches(&self, request: &NormalizedRequest) -> bool {
        truthy(self.eval(&self.expr, request).as_ref())
    }

    fn eval(&self, expr: &Expr, request: &NormalizedRequest) -> Option<Value> {
        match expr {
            Expr::Literal(value) => Some(value.clone()),
            Expr::Reference(name) => request.lookup(name),
            Expr::Not(inner) => Some(Value::Bool(!truthy(self.eval(inner, request).as_ref()))),
            Expr::And(left, right) => Some(Value::Bool(
                truthy(self.eval(left, request).as_ref())
                    && truthy(self.eval(right, request).as_ref()),
            )),
            Expr::Or(left, right) => Some(Value::Bool(
                truthy(self.eval(left, request).as_ref())
                    || truthy(self.eval(right, request).as_ref()),
            )),
            Expr::Compare(left, op, right) => {
                let left = self.eval(left, request);
                let right = self.eval(right, request);
                Some(Value::Bool(self.compare(left.as_ref(), *op, right.as_ref())))
            }
        }
    }

    fn compare(&self, left: Option<&Value>, op: CompareOp, right: Option<&Value>) -> bool {
        let (Some(left), Some(right)) = (left, right) else {
            return op == CompareOp::Ne;
        };

        match op {
            CompareOp::Eq => loose_eq(left, right),
            CompareOp::Ne => !loose_eq(left, right),
            CompareOp::Like => {
                let pattern = as_text(right);
                match self.patterns.get(&pattern) {
                    Some(regex) => regex.is_match(&as_text(left)),
                    None => like(&as_text(left), &pattern),
                }
            }
            CompareOp::Lt => ordering(left, right) == Some(Ordering::Less),
            CompareOp::Le => {
                matches!(ordering(left, right), Some(Ordering::Less | Ordering::Equal))
            }
            CompareOp::Gt => ordering(left, right) == Some(Ordering::Greater),
            CompareOp::Ge => matches!(
                ordering(left, right),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

fn collect_like_patterns(
    expr: &Expr,
    patterns: &mut HashMap<String, Regex>,
) -> Result<(), regex::Error> {
    match expr {
        Expr::Compare(left, op, right) => {
            if let (CompareOp::Like, Expr::Literal(value)) = (op, right.as_ref()) {
                let pattern = as_text(value);
                if !patterns.contains_key(&pattern) {
                    let regex = like_regex(&pattern)?;
                    patterns.insert(pattern, regex);
                }
            }
            collect_like_patterns(left, patterns)?;
            collect_like_patterns(right, patterns)
        }
        Expr::And(left, right) | Expr::Or(left, right) => {
            collect_like_patterns(left, patterns)?;
            collect_like_patterns(right, patterns)
        }
        Expr::Not(inner) => collect_like_patterns(inner, patterns),
        Expr::Literal(_) | Expr::Reference(_) => Ok(()),
    }
}

/// Absence of a condition always matches.
pub fn condition_matches(condition: Option<&Condition>, request: &NormalizedRequest) -> bool {
    condition.is_none_or(|c| c.matches(request))
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty() && !s.eq_ignore_ascii_case("false"),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::String(s), Value::Bool(b)) | (Value::Bool(b), Value::String(s)) => {
            s.eq_ignore_ascii_case(if *b { "true" } else { "false" })
        }
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            match (s.trim().parse::<f64>(), n.as_f64()) {
                (Ok(a), Some(b)) => a == b,
                _ => false,
            }
        }
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (as_number(left), as_number(right)) {
        return a.partial_cmp(&b);
    }
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// SQL `LIKE` as an anchored regex: `%` matches any run of characters, `_`
/// exactly one, everything else literally. Case-insensitive.
fn like_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut source = String::from("(?is)^");
    let mut buf = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            c => source.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    source.push('$');
    Regex::new(&source)
}

/// `like` against a pattern only known per request.
fn like(text: &str, pattern: &str) -> bool {
    like_regex(pattern).is_ok_and(|regex| regex.is_match(text))
}
