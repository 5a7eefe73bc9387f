//! This module provides the (external, per the design's scope) value-validator collaborator:
//! the trait a [`crate::engine::field::FieldDecl`] chains custom checks onto, plus a small,
//! deliberately shallow set of built-in validators. A full validator library's internals are out
//! of scope; this module exists so node-type authors have something to chain.

use crate::engine::value::Value;
use regex::Regex;
use std::fmt::Debug;

/// A single named validation rule over a field's already-shape-checked value.
///
/// # Examples
///
/// ```rust
/// use vertexdb::engine::validators::{NonEmptyString, Validator};
/// use vertexdb::engine::value::Value;
///
/// let v = NonEmptyString;
/// assert!(v.validate(&Value::String("Ceres".to_string())).is_ok());
/// assert!(v.validate(&Value::String("".to_string())).is_err());
/// ```
pub trait Validator: Debug + Send + Sync {
    /// Runs the rule, returning a human-readable rejection reason on failure. The reason becomes
    /// the `reason` field of the surfaced `Error::ValidationError`.
    fn validate(&self, value: &Value) -> Result<(), String>;
}

/// Rejects the empty string. A no-op for every non-string value (shape checking already rejected
/// those before a validator chain runs).
#[derive(Debug, Clone, Copy)]
pub struct NonEmptyString;

impl Validator for NonEmptyString {
    fn validate(&self, value: &Value) -> Result<(), String> {
        match value {
            Value::String(s) if s.is_empty() => Err("must not be empty".to_string()),
            _ => Ok(()),
        }
    }
}

/// Rejects a numeric value outside `[min, max]`.
#[derive(Debug, Clone, Copy)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
}

impl Validator for NumericRange {
    fn validate(&self, value: &Value) -> Result<(), String> {
        let n = match value {
            Value::Int64(i) => *i as f64,
            Value::Float64(f) => *f,
            _ => return Ok(()),
        };
        if n < self.min || n > self.max {
            Err(format!("must be between {} and {}", self.min, self.max))
        } else {
            Ok(())
        }
    }
}

/// Rejects a string value that does not match a regular expression.
#[derive(Debug, Clone)]
pub struct MatchesPattern {
    pattern: Regex,
    description: String,
}

impl MatchesPattern {
    pub fn new(pattern: &str, description: &str) -> Result<MatchesPattern, regex::Error> {
        Ok(MatchesPattern {
            pattern: Regex::new(pattern)?,
            description: description.to_string(),
        })
    }
}

impl Validator for MatchesPattern {
    fn validate(&self, value: &Value) -> Result<(), String> {
        match value {
            Value::String(s) if !self.pattern.is_match(s) => Err(self.description.clone()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_range_rejects_out_of_bounds() {
        let v = NumericRange { min: 0.0, max: 10.0 };
        assert!(v.validate(&Value::Int64(11)).is_err());
        assert!(v.validate(&Value::Int64(5)).is_ok());
    }

    #[test]
    fn matches_pattern_checks_strings_only() {
        let v = MatchesPattern::new("^[a-z-]+$", "must be a lowercase slug").unwrap();
        assert!(v.validate(&Value::String("robert-downey-jr".to_string())).is_ok());
        assert!(v.validate(&Value::String("Robert".to_string())).is_err());
        assert!(v.validate(&Value::Bool(true)).is_ok());
    }
}
