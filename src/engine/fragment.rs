//! The query-string composer (component C): immutable, composable fragments with lazy label
//! interpolation, auto-parameterization, sub-fragment embedding, and the `HAS KEY` rewriter.
//!
//! A [`Fragment`] is built either with the [`cypher!`] tagged-template-style macro or with
//! [`Fragment::raw`] plus [`Fragment::with_params`]. Compilation is lazy and memoized: nothing is
//! rendered to a query string until [`Fragment::query_string`] or [`Fragment::params`] is first
//! read.

use crate::engine::identifier;
use crate::engine::schema::{NodeType, NodeTypeRef, RelationshipSchema, ROOT_LABEL};
use crate::engine::value::Value;
use crate::Error;
use chrono::{DateTime, NaiveDate, Utc};
use num_bigint::BigInt;
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

/// A unit pushed onto a fragment's token list, one per literal segment or interpolation. Not
/// part of the public query-composition API; public only because it appears in
/// [`Interpolate`]'s signature.
#[derive(Clone)]
pub enum Token {
    Literal(String),
    Param(Value),
    LabelChain(Vec<String>),
    LabelRef(NodeTypeRef),
    RelName(String),
    Sub(Fragment),
}

#[derive(Clone)]
struct CompiledFragment {
    query_string: String,
    auto_params: HashMap<String, Value>,
    explicit_params: HashMap<String, Value>,
}

impl CompiledFragment {
    fn all_params(&self) -> HashMap<String, Value> {
        let mut out = self.explicit_params.clone();
        out.extend(self.auto_params.clone());
        out
    }
}

/// An immutable composable query value: a string template, its auto- and explicit parameters, and
/// an optional recorded return shape.
///
/// # Examples
///
/// ```rust
/// use vertexdb::cypher;
/// use vertexdb::engine::fragment::Fragment;
///
/// let frag: Fragment = cypher!["RETURN ", 1i64, ""];
/// assert_eq!(frag.query_string().unwrap(), "RETURN $p1");
/// ```
pub struct Fragment {
    tokens: Vec<Token>,
    explicit_params: HashMap<String, Value>,
    return_shape: Option<Vec<String>>,
    compiled: OnceCell<CompiledFragment>,
}

impl Clone for Fragment {
    fn clone(&self) -> Fragment {
        Fragment {
            tokens: self.tokens.clone(),
            explicit_params: self.explicit_params.clone(),
            return_shape: self.return_shape.clone(),
            compiled: self.compiled.clone(),
        }
    }
}

impl Fragment {
    /// Starts a fragment from a single literal string, with no parameters and no return shape.
    pub fn raw(s: &str) -> Fragment {
        Fragment {
            tokens: vec![Token::Literal(s.to_string())],
            explicit_params: HashMap::new(),
            return_shape: None,
            compiled: OnceCell::new(),
        }
    }

    /// Returns a new, uncompiled fragment with `params` added to the explicit-parameter set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateParamError`] if any key in `params` is already bound.
    pub fn with_params(&self, params: HashMap<String, Value>) -> Result<Fragment, Error> {
        let mut merged = self.explicit_params.clone();
        for (k, v) in params {
            if merged.contains_key(&k) {
                return Err(Error::DuplicateParamError { name: k });
            }
            merged.insert(k, v);
        }
        Ok(Fragment {
            tokens: self.tokens.clone(),
            explicit_params: merged,
            return_shape: self.return_shape.clone(),
            compiled: OnceCell::new(),
        })
    }

    /// Appends a `RETURN` clause generated from `shape`'s entries (each a full return expression,
    /// e.g. `"p.id AS id"`) and records the shape for the caller to consult when decoding rows.
    pub fn returning(&self, shape: &[&str]) -> Fragment {
        let clause = format!(" RETURN {}", shape.join(", "));
        let mut tokens = self.tokens.clone();
        tokens.push(Token::Literal(clause));
        Fragment {
            tokens,
            explicit_params: self.explicit_params.clone(),
            return_shape: Some(shape.iter().map(|s| s.to_string()).collect()),
            compiled: OnceCell::new(),
        }
    }

    pub fn return_shape(&self) -> Option<&[String]> {
        self.return_shape.as_deref()
    }

    #[doc(hidden)]
    pub fn push_literal(mut self, s: &str) -> Fragment {
        self.tokens.push(Token::Literal(s.to_string()));
        self.compiled = OnceCell::new();
        self
    }

    #[doc(hidden)]
    pub fn push_interp<T: Interpolate>(mut self, v: T) -> Fragment {
        self.tokens.push(v.interpolate());
        self.compiled = OnceCell::new();
        self
    }

    fn compile(&self) -> Result<&CompiledFragment, Error> {
        self.compiled.get_or_try_init(|| self.do_compile())
    }

    fn do_compile(&self) -> Result<CompiledFragment, Error> {
        let mut out = String::new();
        let mut auto_params: HashMap<String, Value> = HashMap::new();
        let mut counter: usize = 1;
        let mut clause_counter: usize = 0;

        for token in &self.tokens {
            match token {
                Token::Literal(s) => out.push_str(s),
                Token::LabelChain(chain) => out.push_str(&chain.join(":")),
                Token::LabelRef(r) => {
                    let nt = r.resolve()?;
                    out.push_str(&nt.label_chain().join(":"));
                }
                Token::RelName(name) => out.push_str(name),
                Token::Param(v) => {
                    let name = format!("p{}", counter);
                    counter += 1;
                    out.push('$');
                    out.push_str(&name);
                    auto_params.insert(name, v.clone());
                }
                Token::Sub(sub) => {
                    clause_counter += 1;
                    let compiled_sub = sub.compile()?;
                    let prefix = format!("clause{}_", clause_counter);

                    let renamed = AUTO_PARAM_RE
                        .replace_all(&compiled_sub.query_string, |caps: &regex::Captures| {
                            format!("${}{}", prefix, &caps[1])
                        })
                        .into_owned();
                    out.push_str(&renamed);

                    for (k, v) in &compiled_sub.auto_params {
                        auto_params.insert(format!("{}{}", prefix, k), v.clone());
                    }
                    for (k, v) in &compiled_sub.explicit_params {
                        if self.explicit_params.contains_key(k) || auto_params.contains_key(k) {
                            return Err(Error::DuplicateParamError { name: k.clone() });
                        }
                        auto_params.insert(k.clone(), v.clone());
                    }
                }
            }
        }

        let mut lookup = self.explicit_params.clone();
        lookup.extend(auto_params.clone());
        let out = rewrite_has_key(&out, &lookup)?;

        Ok(CompiledFragment {
            query_string: out,
            auto_params,
            explicit_params: self.explicit_params.clone(),
        })
    }

    /// Renders this fragment's query string, running compilation if it has not already happened.
    pub fn query_string(&self) -> Result<String, Error> {
        Ok(self.compile()?.query_string.clone())
    }

    /// Returns this fragment's merged auto- and explicit parameters, running compilation if it
    /// has not already happened.
    pub fn params(&self) -> Result<HashMap<String, Value>, Error> {
        Ok(self.compile()?.all_params())
    }
}

static AUTO_PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$p(\d+)\b").unwrap());
static HAS_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\w+)\s+HAS KEY\s+\$(\w+)").unwrap());

/// Wraps `i` so that its eventual query parameter is tagged to the driver as an integer. The
/// engine's [`Value`] already distinguishes `Int64` from `Float64`, so this exists purely to make
/// call sites self-documenting when a literal could otherwise be misread as floating.
pub fn forced_int(i: i64) -> Value {
    Value::Int64(i)
}

fn rewrite_has_key(input: &str, params: &HashMap<String, Value>) -> Result<String, Error> {
    for caps in HAS_KEY_RE.captures_iter(input) {
        let name = &caps[2];
        if !params.contains_key(name) {
            return Err(Error::MissingKeyParamError {
                name: name.to_string(),
            });
        }
    }
    Ok(HAS_KEY_RE
        .replace_all(input, |caps: &regex::Captures| {
            let var = &caps[1];
            let name = &caps[2];
            let value = &params[name];
            let looks_id = matches!(value, Value::String(s) if identifier::looks_like_id(s));
            if looks_id {
                format!("({}:{} {{id: ${}}})", var, ROOT_LABEL, name)
            } else {
                format!(
                    "({}:{})<-[:IDENTIFIES]-(:SlugId {{slugId: ${}}})",
                    var, ROOT_LABEL, name
                )
            }
        })
        .into_owned())
}

mod private {
    pub trait Sealed {}
}

/// The sealed trait that decides how a `cypher!` interpolation renders. Implemented for
/// references to node-type and relationship descriptors, for other fragments, and for every
/// plain value type the engine's [`Value`] can represent.
pub trait Interpolate: private::Sealed {
    fn interpolate(self) -> Token;
}

impl private::Sealed for &NodeType {}
impl Interpolate for &NodeType {
    fn interpolate(self) -> Token {
        Token::LabelChain(self.label_chain())
    }
}

impl private::Sealed for &Arc<NodeType> {}
impl Interpolate for &Arc<NodeType> {
    fn interpolate(self) -> Token {
        Token::LabelChain(self.label_chain())
    }
}

impl private::Sealed for &NodeTypeRef {}
impl Interpolate for &NodeTypeRef {
    fn interpolate(self) -> Token {
        Token::LabelRef(self.clone())
    }
}

impl private::Sealed for &RelationshipSchema {}
impl Interpolate for &RelationshipSchema {
    fn interpolate(self) -> Token {
        Token::RelName(self.name().to_string())
    }
}

impl private::Sealed for &Fragment {}
impl Interpolate for &Fragment {
    fn interpolate(self) -> Token {
        Token::Sub(self.clone())
    }
}

impl private::Sealed for &str {}
impl Interpolate for &str {
    fn interpolate(self) -> Token {
        Token::Param(Value::from(self))
    }
}

impl private::Sealed for String {}
impl Interpolate for String {
    fn interpolate(self) -> Token {
        Token::Param(Value::from(self))
    }
}

impl private::Sealed for i64 {}
impl Interpolate for i64 {
    fn interpolate(self) -> Token {
        Token::Param(Value::from(self))
    }
}

impl private::Sealed for i32 {}
impl Interpolate for i32 {
    fn interpolate(self) -> Token {
        Token::Param(Value::from(self))
    }
}

impl private::Sealed for f64 {}
impl Interpolate for f64 {
    fn interpolate(self) -> Token {
        Token::Param(Value::from(self))
    }
}

impl private::Sealed for bool {}
impl Interpolate for bool {
    fn interpolate(self) -> Token {
        Token::Param(Value::from(self))
    }
}

impl private::Sealed for BigInt {}
impl Interpolate for BigInt {
    fn interpolate(self) -> Token {
        Token::Param(Value::from(self))
    }
}

impl private::Sealed for NaiveDate {}
impl Interpolate for NaiveDate {
    fn interpolate(self) -> Token {
        Token::Param(Value::from(self))
    }
}

impl private::Sealed for DateTime<Utc> {}
impl Interpolate for DateTime<Utc> {
    fn interpolate(self) -> Token {
        Token::Param(Value::from(self))
    }
}

impl private::Sealed for Value {}
impl Interpolate for Value {
    fn interpolate(self) -> Token {
        Token::Param(self)
    }
}

/// Composes a [`Fragment`] from alternating string literals and interpolated expressions, e.g.
/// `cypher!["MATCH (p:", &person_type, " {id: ", id_value, "}) RETURN p"]`. Each interpolation's
/// own type, via the sealed [`Interpolate`] trait, decides whether it renders as a label chain, a
/// relationship name, an inlined sub-fragment, or a fresh auto-parameter. The macro's input must
/// always end on a string literal.
#[macro_export]
macro_rules! cypher {
    ($lit:literal $(, $expr:expr, $rest:literal)* $(,)?) => {{
        #[allow(unused_mut)]
        let mut frag = $crate::engine::fragment::Fragment::raw($lit);
        $(
            frag = $crate::engine::fragment::Fragment::push_interp(frag, $expr);
            frag = $crate::engine::fragment::Fragment::push_literal(frag, $rest);
        )*
        frag
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::schema::{register, NodeType};
    use maplit::hashmap;

    #[test]
    fn label_chain_interpolation() {
        let person = register(NodeType::new("FragTestPerson1").build()).unwrap();
        let frag = cypher!["MATCH (p:", &person, ") RETURN p.id"];
        assert_eq!(
            frag.query_string().unwrap(),
            "MATCH (p:FragTestPerson1:VNode) RETURN p.id"
        );
        assert!(frag.params().unwrap().is_empty());
    }

    #[test]
    fn plain_values_become_auto_params() {
        let person = register(NodeType::new("FragTestPerson2").build()).unwrap();
        let frag = cypher![
            "MATCH (p:",
            &person,
            " {id: ",
            "_52D",
            "}) SET p.name = ",
            "J",
            ""
        ];
        assert_eq!(
            frag.query_string().unwrap(),
            "MATCH (p:FragTestPerson2:VNode {id: $p1}) SET p.name = $p2"
        );
        let params = frag.params().unwrap();
        assert_eq!(params.get("p1"), Some(&Value::String("_52D".to_string())));
        assert_eq!(params.get("p2"), Some(&Value::String("J".to_string())));
    }

    #[test]
    fn has_key_rewrites_identifier_lookup() {
        let frag = cypher!["MATCH (n) WHERE p HAS KEY ", "_1abc", " RETURN p"];
        assert_eq!(
            frag.query_string().unwrap(),
            "MATCH (n) WHERE (p:VNode {id: $p1}) RETURN p"
        );
    }

    #[test]
    fn has_key_rewrites_slug_lookup() {
        let frag = cypher!["MATCH (n) WHERE p HAS KEY ", "rdj", " RETURN p"];
        assert_eq!(
            frag.query_string().unwrap(),
            "MATCH (n) WHERE (p:VNode)<-[:IDENTIFIES]-(:SlugId {slugId: $p1}) RETURN p"
        );
    }

    #[test]
    fn has_key_without_bound_param_fails() {
        let frag = Fragment::raw("MATCH (n) WHERE p HAS KEY $missing RETURN p");
        let err = frag.query_string().unwrap_err();
        assert!(matches!(err, Error::MissingKeyParamError { name } if name == "missing"));
    }

    #[test]
    fn with_params_rejects_duplicate_keys() {
        let frag = Fragment::raw("x")
            .with_params(hashmap! {"a".to_string() => Value::Int64(1)})
            .unwrap();
        let err = frag
            .with_params(hashmap! {"a".to_string() => Value::Int64(2)})
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateParamError { name } if name == "a"));
    }

    #[test]
    fn nested_fragment_auto_params_are_renamed() {
        let inner = cypher!["n.age > ", 30i64, ""];
        let outer = cypher!["MATCH (n) WHERE ", &inner, " RETURN n"];
        let qs = outer.query_string().unwrap();
        assert_eq!(qs, "MATCH (n) WHERE n.age > $clause1_p1 RETURN n");
        let params = outer.params().unwrap();
        assert_eq!(params.get("clause1_p1"), Some(&Value::Int64(30)));
    }

    #[test]
    fn nested_fragment_explicit_param_collision_fails() {
        let inner = Fragment::raw("n.id = $key")
            .with_params(hashmap! {"key".to_string() => Value::String("x".to_string())})
            .unwrap();
        let outer = cypher!["MATCH (n) WHERE ", &inner, " RETURN n"]
            .with_params(hashmap! {"key".to_string() => Value::String("y".to_string())})
            .unwrap();
        let err = outer.query_string().unwrap_err();
        assert!(matches!(err, Error::DuplicateParamError { name } if name == "key"));
    }

    #[test]
    fn compilation_is_memoized() {
        let frag = cypher!["RETURN ", 1i64, ""];
        let first = frag.query_string().unwrap();
        let second = frag.query_string().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn returning_appends_return_clause_and_records_shape() {
        let frag = Fragment::raw("MATCH (p)").returning(&["p.id AS id", "p.name AS name"]);
        assert_eq!(
            frag.query_string().unwrap(),
            "MATCH (p) RETURN p.id AS id, p.name AS name"
        );
        assert_eq!(
            frag.return_shape().unwrap(),
            &["p.id AS id".to_string(), "p.name AS name".to_string()]
        );
    }
}
