//! The field system (component A): the value-typed palette node types use to describe
//! properties and relationship properties, and the `validateValue` contract every raw value
//! passes through before it is allowed to reach the store.
//!
//! No implicit coercion is ever performed: strings are never parsed into numbers or dates,
//! `DateTime` is never substituted for `Date` (that would reintroduce the timezone hazard a
//! calendar date is meant to avoid), and a wide integer outside the supported range fails rather
//! than silently truncating.

use crate::engine::validators::Validator;
use crate::engine::value::Value;
use crate::Error;
use num_bigint::BigInt;
use std::sync::Arc;

/// The 128-bit-class window a [`FieldKind::BigInt`] value is checked against. vertexdb does not
/// attempt to track the exact signed 128-bit range of the eventual store value; it checks
/// against the same window `i128` would allow, which is the union of every backend this engine
/// is expected to target.
fn big_int_in_range(i: &BigInt) -> bool {
    let min = BigInt::from(i128::min_value());
    let max = BigInt::from(i128::max_value());
    *i >= min && *i <= max
}

/// The shape a single field (a raw property, or a relationship property) may take.
#[derive(Clone, Debug)]
pub enum FieldKind {
    /// The node identifier scalar: a structural, base-62-rendered string.
    Id,
    Int,
    /// A wide integer, range-checked at validation time against a 128-bit window.
    BigInt,
    Float,
    String,
    /// A human-readable secondary key. Distinct from `String` only in that it participates in
    /// `HAS KEY` lookups and slug-history tracking; it has no extra validation of its own.
    Slug,
    Boolean,
    /// A calendar date with no time-of-day component.
    Date,
    /// An instant in time.
    DateTime,
    /// A record of named sub-fields, e.g. a relationship's property schema embedded as a value.
    Record(Vec<(String, FieldDecl)>),
    /// A homogeneous list of another field kind.
    List(Box<FieldDecl>),
    /// The escape hatch: any value is accepted as-is.
    Any,
    /// A raw node returned by a graph-response virtual property.
    RawNode,
    /// A raw relationship returned by a graph-response virtual property.
    RawRelationship,
    /// A raw path returned by a graph-response virtual property.
    RawPath,
}

/// A field declaration: `{kind, nullable, schema}`, where `schema` is the chain of custom
/// validators layered on top of the kind's own shape check.
///
/// Nullability is expressed only via [`FieldDecl::nullable`]; whether it is applied before or
/// after chaining validators does not change the result; `nullable` simply permits `Value::Null`
/// in addition to whatever the chain already accepts.
#[derive(Clone)]
pub struct FieldDecl {
    kind: FieldKind,
    is_nullable: bool,
    validators: Vec<Arc<dyn Validator>>,
}

impl FieldDecl {
    /// Creates a non-nullable field declaration of the given kind with no custom validators.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use vertexdb::engine::field::{FieldDecl, FieldKind};
    ///
    /// let f = FieldDecl::new(FieldKind::String);
    /// assert!(!f.is_nullable());
    /// ```
    pub fn new(kind: FieldKind) -> FieldDecl {
        FieldDecl {
            kind,
            is_nullable: false,
            validators: Vec::new(),
        }
    }

    /// Returns a copy of this declaration that additionally accepts `Value::Null`.
    pub fn nullable(mut self) -> FieldDecl {
        self.is_nullable = true;
        self
    }

    /// Returns a copy of this declaration with a custom validator chained onto it. Validators
    /// run in the order they were added, after the kind's own shape check passes.
    pub fn validated_by(mut self, validator: Arc<dyn Validator>) -> FieldDecl {
        self.validators.push(validator);
        self
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_nullable(&self) -> bool {
        self.is_nullable
    }

    /// Validates `value` against this declaration, returning the (possibly canonicalized —
    /// e.g. a `BigInt` is canonicalized to its minimal representation) value if it is valid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] if the value's shape does not match `kind`, or a
    /// custom validator rejects it. Returns [`Error::BigIntRangeError`] if a [`FieldKind::BigInt`]
    /// value overflows the supported range.
    pub fn validate_value(&self, field_name: &str, value: Value) -> Result<Value, Error> {
        if let Value::Null = value {
            return if self.is_nullable {
                Ok(Value::Null)
            } else {
                Err(Error::ValidationError {
                    field: Some(field_name.to_string()),
                    reason: "value is required".to_string(),
                })
            };
        }

        let shaped = self.validate_shape(field_name, value)?;

        for validator in &self.validators {
            validator.validate(&shaped).map_err(|reason| Error::ValidationError {
                field: Some(field_name.to_string()),
                reason,
            })?;
        }

        Ok(shaped)
    }

    fn validate_shape(&self, field_name: &str, value: Value) -> Result<Value, Error> {
        let type_error = || Error::ValidationError {
            field: Some(field_name.to_string()),
            reason: format!("value does not match declared type {:?}", self.kind),
        };

        match (&self.kind, value) {
            (FieldKind::Id, v @ Value::String(_)) => Ok(v),
            (FieldKind::Slug, v @ Value::String(_)) => Ok(v),
            (FieldKind::String, v @ Value::String(_)) => Ok(v),
            (FieldKind::Int, v @ Value::Int64(_)) => Ok(v),
            (FieldKind::Float, v @ Value::Float64(_)) => Ok(v),
            (FieldKind::Float, Value::Int64(i)) => Ok(Value::Float64(i as f64)),
            (FieldKind::Boolean, v @ Value::Bool(_)) => Ok(v),
            (FieldKind::Date, v @ Value::Date(_)) => Ok(v),
            (FieldKind::DateTime, v @ Value::Timestamp(_)) => Ok(v),
            (FieldKind::BigInt, Value::BigInt(i)) => {
                if big_int_in_range(&i) {
                    Ok(Value::BigInt(i))
                } else {
                    Err(Error::BigIntRangeError {
                        field: field_name.to_string(),
                    })
                }
            }
            (FieldKind::BigInt, Value::Int64(i)) => Ok(Value::BigInt(BigInt::from(i))),
            (FieldKind::RawNode, v @ Value::Node(_)) => Ok(v),
            (FieldKind::RawRelationship, v @ Value::Relationship(_)) => Ok(v),
            (FieldKind::RawPath, v @ Value::Path(_)) => Ok(v),
            (FieldKind::Any, v) => Ok(v),
            (FieldKind::List(inner), Value::List(items)) => Ok(Value::List(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| inner.validate_value(&format!("{}[{}]", field_name, i), item))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            (FieldKind::Record(fields), Value::Map(mut map)) => {
                let mut out = std::collections::HashMap::new();
                for (name, decl) in fields {
                    let v = map.remove(name).unwrap_or(Value::Null);
                    out.insert(name.clone(), decl.validate_value(name, v)?);
                }
                Ok(Value::Map(out))
            }
            (_, _) => Err(type_error()),
        }
    }
}

impl std::fmt::Debug for FieldDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("FieldDecl")
            .field("kind", &self.kind)
            .field("is_nullable", &self.is_nullable)
            .field("validators", &self.validators.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldDecl, FieldKind};
    use crate::engine::value::Value;
    use crate::Error;
    use num_bigint::BigInt;

    #[test]
    fn required_field_rejects_null() {
        let f = FieldDecl::new(FieldKind::String);
        let err = f.validate_value("name", Value::Null).unwrap_err();
        assert!(matches!(err, Error::ValidationError { .. }));
    }

    #[test]
    fn nullable_field_accepts_null() {
        let f = FieldDecl::new(FieldKind::String).nullable();
        assert_eq!(f.validate_value("name", Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn no_coercion_from_string_to_int() {
        let f = FieldDecl::new(FieldKind::Int);
        let err = f
            .validate_value("age", Value::String("42".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::ValidationError { .. }));
    }

    #[test]
    fn big_int_overflow_is_rejected() {
        let f = FieldDecl::new(FieldKind::BigInt);
        let huge = BigInt::from(i128::max_value()) * BigInt::from(10);
        let err = f.validate_value("mass", Value::BigInt(huge)).unwrap_err();
        assert!(matches!(err, Error::BigIntRangeError { .. }));
    }

    #[test]
    fn list_validates_each_element() {
        let f = FieldDecl::new(FieldKind::List(Box::new(FieldDecl::new(FieldKind::Int))));
        let ok = f
            .validate_value("scores", Value::List(vec![Value::Int64(1), Value::Int64(2)]))
            .unwrap();
        assert_eq!(ok, Value::List(vec![Value::Int64(1), Value::Int64(2)]));

        let bad = f.validate_value(
            "scores",
            Value::List(vec![Value::String("x".to_string())]),
        );
        assert!(bad.is_err());
    }
}
