//! The data-request tree (component D): a declarative, tree-shaped description of what a pull
//! should fetch, plus the outer-pull-site [`PullFilter`]. A [`PullRequest`] is built with
//! chainable builder methods against a [`NodeTypeRef`], matching the schema registry's own
//! forward-reference story (section 4.B): a request tree may be built before its target type is
//! registered, as long as every validating builder call happens after registration.
//!
//! Requesting a property twice is a no-op (first mention wins, see `allProps`'s `P4` ordering
//! guarantee); requesting a name the target type does not declare fails immediately with
//! [`Error::UnknownPropertyError`], so a malformed request never reaches the compiler.

use crate::engine::schema::NodeTypeRef;
use crate::engine::value::Value;
use crate::Error;
use std::collections::HashSet;

/// A single raw (or relationship) property inclusion, optionally gated by a flag.
#[derive(Clone, Debug)]
pub struct NamedInclude {
    pub name: String,
    pub if_flag: Option<String>,
}

/// What a named virtual property's sub-request looks like, per its declared kind.
#[derive(Clone)]
pub enum VirtualSub {
    Many(Box<PullRequest>),
    One(Box<PullRequest>),
    Cypher,
}

/// One included virtual property, optionally gated by a flag.
#[derive(Clone)]
pub struct VirtualInclude {
    pub name: String,
    pub if_flag: Option<String>,
    pub sub: VirtualSub,
}

/// One included derived property, optionally gated by a flag.
#[derive(Clone, Debug)]
pub struct DerivedInclude {
    pub name: String,
    pub if_flag: Option<String>,
}

/// A whole sub-tree of additional includes that only apply when `flag` is present in the
/// pull's active flag set (section 4.D's `conditionalBranches`).
#[derive(Clone)]
pub struct ConditionalBranch {
    pub flag: String,
    pub sub: Box<PullRequest>,
}

/// A tree describing what to pull against `target`. Construct with [`PullRequest::new`], then
/// chain `.property(...)`, `.all_props()`, `.virtual_many(...)`, `.derived(...)`, etc. Each
/// validating call resolves `target` against the schema registry, so it fails with
/// [`Error::UnregisteredTypeError`] if called before the type is registered.
#[derive(Clone)]
pub struct PullRequest {
    target: NodeTypeRef,
    raw: Vec<NamedInclude>,
    /// Properties captured off the traversed relationship, not the target node. Only meaningful
    /// when this request is embedded as a virtual property's sub-request; ignored at the root.
    rel: Vec<NamedInclude>,
    virtuals: Vec<VirtualInclude>,
    derived: Vec<DerivedInclude>,
    conditional: Vec<ConditionalBranch>,
}

impl PullRequest {
    pub fn new(target: NodeTypeRef) -> PullRequest {
        PullRequest {
            target,
            raw: Vec::new(),
            rel: Vec::new(),
            virtuals: Vec::new(),
            derived: Vec::new(),
            conditional: Vec::new(),
        }
    }

    pub fn node_type(&self) -> &NodeTypeRef {
        &self.target
    }

    fn has_raw(&self, name: &str) -> bool {
        self.raw.iter().any(|i| i.name == name)
    }

    /// Includes a single declared raw property. A no-op if already included (`P4`); fails if
    /// `name` is not declared on the target type, or the target type is not yet registered.
    pub fn property(mut self, name: &str) -> Result<PullRequest, Error> {
        let nt = self.target.resolve()?;
        if nt.property(name).is_none() {
            return Err(Error::UnknownPropertyError {
                prop: name.to_string(),
            });
        }
        if !self.has_raw(name) {
            self.raw.push(NamedInclude {
                name: name.to_string(),
                if_flag: None,
            });
        }
        Ok(self)
    }

    /// As [`PullRequest::property`], but only pulled when `flag` is in the active flag set.
    pub fn property_if_flag(mut self, name: &str, flag: &str) -> Result<PullRequest, Error> {
        let nt = self.target.resolve()?;
        if nt.property(name).is_none() {
            return Err(Error::UnknownPropertyError {
                prop: name.to_string(),
            });
        }
        if !self.has_raw(name) {
            self.raw.push(NamedInclude {
                name: name.to_string(),
                if_flag: Some(flag.to_string()),
            });
        }
        Ok(self)
    }

    /// Includes a property captured off the traversed relationship edge rather than the target
    /// node. Only meaningful inside a virtual property's sub-request; unvalidated against the
    /// schema, since a relationship's property schema is attached to the declaring type's
    /// `RelationshipSchema`, not to the traversal target.
    pub fn rel_property(mut self, name: &str) -> PullRequest {
        if !self.rel.iter().any(|i| i.name == name) {
            self.rel.push(NamedInclude {
                name: name.to_string(),
                if_flag: None,
            });
        }
        self
    }

    /// Includes every declared raw property, in declaration order, skipping any already
    /// included (so a prior single-property include still wins that property's position).
    pub fn all_props(mut self) -> Result<PullRequest, Error> {
        let nt = self.target.resolve()?;
        let names: Vec<String> = nt.properties().map(|(n, _)| n.to_string()).collect();
        for name in names {
            if !self.has_raw(&name) {
                self.raw.push(NamedInclude {
                    name,
                    if_flag: None,
                });
            }
        }
        Ok(self)
    }

    fn check_virtual(&self, name: &str) -> Result<(), Error> {
        let nt = self.target.resolve()?;
        if nt.virtual_property(name).is_none() {
            return Err(Error::UnknownPropertyError {
                prop: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn virtual_many(self, name: &str, sub: PullRequest) -> Result<PullRequest, Error> {
        self.virtual_many_inner(name, sub, None)
    }

    pub fn virtual_many_if_flag(
        self,
        name: &str,
        sub: PullRequest,
        flag: &str,
    ) -> Result<PullRequest, Error> {
        self.virtual_many_inner(name, sub, Some(flag.to_string()))
    }

    fn virtual_many_inner(
        mut self,
        name: &str,
        sub: PullRequest,
        if_flag: Option<String>,
    ) -> Result<PullRequest, Error> {
        self.check_virtual(name)?;
        if !self.virtuals.iter().any(|v| v.name == name) {
            self.virtuals.push(VirtualInclude {
                name: name.to_string(),
                if_flag,
                sub: VirtualSub::Many(Box::new(sub)),
            });
        }
        Ok(self)
    }

    pub fn virtual_one(self, name: &str, sub: PullRequest) -> Result<PullRequest, Error> {
        self.virtual_one_inner(name, sub, None)
    }

    pub fn virtual_one_if_flag(
        self,
        name: &str,
        sub: PullRequest,
        flag: &str,
    ) -> Result<PullRequest, Error> {
        self.virtual_one_inner(name, sub, Some(flag.to_string()))
    }

    fn virtual_one_inner(
        mut self,
        name: &str,
        sub: PullRequest,
        if_flag: Option<String>,
    ) -> Result<PullRequest, Error> {
        self.check_virtual(name)?;
        if !self.virtuals.iter().any(|v| v.name == name) {
            self.virtuals.push(VirtualInclude {
                name: name.to_string(),
                if_flag,
                sub: VirtualSub::One(Box::new(sub)),
            });
        }
        Ok(self)
    }

    pub fn virtual_cypher(self, name: &str) -> Result<PullRequest, Error> {
        self.virtual_cypher_inner(name, None)
    }

    pub fn virtual_cypher_if_flag(self, name: &str, flag: &str) -> Result<PullRequest, Error> {
        self.virtual_cypher_inner(name, Some(flag.to_string()))
    }

    fn virtual_cypher_inner(
        mut self,
        name: &str,
        if_flag: Option<String>,
    ) -> Result<PullRequest, Error> {
        self.check_virtual(name)?;
        if !self.virtuals.iter().any(|v| v.name == name) {
            self.virtuals.push(VirtualInclude {
                name: name.to_string(),
                if_flag,
                sub: VirtualSub::Cypher,
            });
        }
        Ok(self)
    }

    pub fn derived(mut self, name: &str) -> Result<PullRequest, Error> {
        let nt = self.target.resolve()?;
        if nt.derived_property(name).is_none() {
            return Err(Error::UnknownPropertyError {
                prop: name.to_string(),
            });
        }
        if !self.derived.iter().any(|d| d.name == name) {
            self.derived.push(DerivedInclude {
                name: name.to_string(),
                if_flag: None,
            });
        }
        Ok(self)
    }

    pub fn derived_if_flag(mut self, name: &str, flag: &str) -> Result<PullRequest, Error> {
        let nt = self.target.resolve()?;
        if nt.derived_property(name).is_none() {
            return Err(Error::UnknownPropertyError {
                prop: name.to_string(),
            });
        }
        if !self.derived.iter().any(|d| d.name == name) {
            self.derived.push(DerivedInclude {
                name: name.to_string(),
                if_flag: Some(flag.to_string()),
            });
        }
        Ok(self)
    }

    /// Bundles an entire additional sub-request that only takes effect when `flag` is active.
    /// Every property it includes targets this same node type.
    pub fn if_branch(mut self, flag: &str, sub: PullRequest) -> PullRequest {
        self.conditional.push(ConditionalBranch {
            flag: flag.to_string(),
            sub: Box::new(sub),
        });
        self
    }

    /// Flattens this tree's includes against `flags`: resolves every conditional branch and
    /// per-field `ifFlag`, deduplicating by first mention. The pull compiler (component E) walks
    /// the result, never the raw tree.
    pub fn flatten(&self, flags: &HashSet<String>) -> Flattened<'_> {
        let mut out = Flattened::default();
        self.flatten_into(flags, &mut out);
        out
    }

    fn flatten_into<'a>(&'a self, flags: &HashSet<String>, out: &mut Flattened<'a>) {
        for inc in &self.raw {
            let active = inc.if_flag.as_deref().map_or(true, |f| flags.contains(f));
            if active && !out.raw.iter().any(|n| *n == inc.name) {
                out.raw.push(&inc.name);
            }
        }
        for inc in &self.rel {
            if !out.rel.iter().any(|n| *n == inc.name) {
                out.rel.push(&inc.name);
            }
        }
        for v in &self.virtuals {
            let active = v.if_flag.as_deref().map_or(true, |f| flags.contains(f));
            if active && !out.virtuals.iter().any(|x| x.name == v.name) {
                out.virtuals.push(v);
            }
        }
        for d in &self.derived {
            let active = d.if_flag.as_deref().map_or(true, |f| flags.contains(f));
            if active && !out.derived.iter().any(|x| x.name == d.name) {
                out.derived.push(d);
            }
        }
        for branch in &self.conditional {
            if flags.contains(&branch.flag) {
                branch.sub.flatten_into(flags, out);
            }
        }
    }
}

/// The flattened, flag-resolved view of a [`PullRequest`] the compiler consumes.
#[derive(Default)]
pub struct Flattened<'a> {
    pub raw: Vec<&'a str>,
    pub rel: Vec<&'a str>,
    pub virtuals: Vec<&'a VirtualInclude>,
    pub derived: Vec<&'a DerivedInclude>,
}

pub(crate) enum Filter {
    Key(Value),
    Where(crate::engine::fragment::Fragment),
    None,
}

/// The filter, ordering, and flag set for one pull call (section 4.D: "a filter at the outer
/// pull site").
pub struct PullFilter {
    pub(crate) filter: Filter,
    pub(crate) order_by: Option<String>,
    pub(crate) flags: HashSet<String>,
}

impl Default for PullFilter {
    fn default() -> PullFilter {
        PullFilter {
            filter: Filter::None,
            order_by: None,
            flags: HashSet::new(),
        }
    }
}

impl PullFilter {
    pub fn none() -> PullFilter {
        PullFilter::default()
    }

    /// Matches via `HAS KEY`: an `id` or a (possibly historical) `slugId`.
    pub fn by_key(key: &str) -> PullFilter {
        PullFilter {
            filter: Filter::Key(Value::String(key.to_string())),
            ..PullFilter::default()
        }
    }

    /// Matches via an inlined `WHERE` clause. `fragment`'s query string may reference `@this`,
    /// substituted at compile time with the root-level bound variable.
    pub fn by_where(fragment: crate::engine::fragment::Fragment) -> PullFilter {
        PullFilter {
            filter: Filter::Where(fragment),
            ..PullFilter::default()
        }
    }

    pub fn with_order_by(mut self, expr: &str) -> PullFilter {
        self.order_by = Some(expr.to_string());
        self
    }

    pub fn with_flag(mut self, flag: &str) -> PullFilter {
        self.flags.insert(flag.to_string());
        self
    }
}
