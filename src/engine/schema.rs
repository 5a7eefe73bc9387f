//! The schema registry (component B) and node-type descriptors built on top of the field system
//! (component A).
//!
//! Node types are registered once, process-wide, into a label-keyed registry that is read-only
//! for the remainder of the process's life: the registry is written once during startup, then
//! read concurrently by every pull and action. A node type may reference another node type that
//! has not been registered yet, via [`NodeTypeRef`]; the reference resolves lazily, the first
//! time a fragment referencing it is compiled.

use crate::engine::field::FieldDecl;
use crate::engine::value::Value;
use crate::Error;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// The label every persisted node carries, regardless of its declared type (invariant I1).
pub const ROOT_LABEL: &str = "VNode";

/// The label a node carries once it has been deleted but is retained for audit history.
pub const DELETED_ROOT_LABEL: &str = "DeletedVNode";

static REGISTRY: Lazy<RwLock<HashMap<&'static str, Arc<NodeType>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers `node_type` into the process-wide schema registry.
///
/// # Errors
///
/// Returns [`Error::ConfigItemDuplicated`] if a node type is already registered under the same
/// label.
///
/// # Examples
///
/// ```rust
/// use vertexdb::engine::schema::{register, NodeType};
///
/// register(NodeType::new("ExampleType").build()).unwrap();
/// ```
pub fn register(node_type: NodeType) -> Result<Arc<NodeType>, Error> {
    let mut registry = REGISTRY.write().expect("schema registry lock poisoned");
    if registry.contains_key(node_type.label()) {
        return Err(Error::ConfigItemDuplicated {
            type_name: node_type.label().to_string(),
        });
    }
    let arc = Arc::new(node_type);
    registry.insert(arc.label(), Arc::clone(&arc));
    Ok(arc)
}

/// Looks up a previously registered node type by label.
pub fn lookup(label: &str) -> Option<Arc<NodeType>> {
    REGISTRY
        .read()
        .expect("schema registry lock poisoned")
        .get(label)
        .cloned()
}

/// Builds an unresolved reference to a node type that may not be registered yet. Reads of the
/// label through this reference always work; [`NodeTypeRef::resolve`] only succeeds once the
/// label has actually been registered.
pub fn forward_ref(label: &'static str) -> NodeTypeRef {
    NodeTypeRef::Label(label)
}

/// A reference to a node type, used inside relationship and virtual-property declarations so
/// that node types may refer to each other regardless of registration order.
///
/// Before resolution, reading the referenced label works identically to reading a resolved
/// type's label. Only *compiling* a fragment that still holds an unresolved reference to a label
/// that was never registered fails, with [`Error::UnregisteredTypeError`].
#[derive(Clone)]
pub enum NodeTypeRef {
    Resolved(Arc<NodeType>),
    Label(&'static str),
}

impl NodeTypeRef {
    pub fn label(&self) -> &str {
        match self {
            NodeTypeRef::Resolved(nt) => nt.label(),
            NodeTypeRef::Label(l) => l,
        }
    }

    /// Resolves this reference against the registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnregisteredTypeError`] if the referenced label has not been registered.
    pub fn resolve(&self) -> Result<Arc<NodeType>, Error> {
        match self {
            NodeTypeRef::Resolved(nt) => Ok(Arc::clone(nt)),
            NodeTypeRef::Label(l) => lookup(l).ok_or_else(|| Error::UnregisteredTypeError {
                label: l.to_string(),
            }),
        }
    }
}

impl From<&Arc<NodeType>> for NodeTypeRef {
    fn from(nt: &Arc<NodeType>) -> Self {
        NodeTypeRef::Resolved(Arc::clone(nt))
    }
}

impl fmt::Debug for NodeTypeRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "NodeTypeRef({})", self.label())
    }
}

/// The cardinality a relationship schema declares for its edges (invariant I3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    /// Exactly one edge must exist.
    ToOneRequired,
    /// At most one edge may exist.
    ToOneOrNone,
    /// Any number of edges, but no two parallel edges to the same target.
    ToManyUnique,
    /// Any number of edges, parallel edges allowed.
    ToMany,
}

/// The declaration for one outgoing relationship name on a node type.
#[derive(Clone)]
pub struct RelationshipSchema {
    name: String,
    target_types: Vec<NodeTypeRef>,
    cardinality: Cardinality,
    property_schema: Vec<(String, FieldDecl)>,
}

impl RelationshipSchema {
    pub fn new(
        name: &str,
        target_types: Vec<NodeTypeRef>,
        cardinality: Cardinality,
    ) -> RelationshipSchema {
        RelationshipSchema {
            name: name.to_string(),
            target_types,
            cardinality,
            property_schema: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: &str, decl: FieldDecl) -> RelationshipSchema {
        self.property_schema.push((name.to_string(), decl));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_types(&self) -> &[NodeTypeRef] {
        &self.target_types
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn property(&self, name: &str) -> Option<&FieldDecl> {
        self.property_schema
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d)
    }

    /// True if any label in `label_chain` names one of this relationship's declared target
    /// types (invariant I3's target-type check).
    pub fn allows_target(&self, label_chain: &[String]) -> bool {
        self.target_types
            .iter()
            .any(|t| label_chain.iter().any(|l| l == t.label()))
    }
}

impl fmt::Debug for RelationshipSchema {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RelationshipSchema")
            .field("name", &self.name)
            .field("cardinality", &self.cardinality)
            .finish()
    }
}

/// What a named virtual property resolves to when pulled.
#[derive(Clone)]
pub enum VirtualKind {
    /// A traversal yielding zero or more related nodes, collected as an ordered list.
    ManyRelationship {
        /// The graph pattern to `OPTIONAL MATCH`, written with the placeholders `@this`,
        /// `@target`, and `@rel`.
        pattern: String,
        /// An optional ordering expression for the collected list; if absent, the target type's
        /// default ordering is used.
        ordering: Option<String>,
    },
    /// A traversal yielding at most one related node.
    OneRelationship { pattern: String },
    /// A scalar expression evaluated by the store, written with the placeholder `@this`.
    CypherExpression { expression: String },
}

/// A named traversal or scalar expression declared on a node type.
#[derive(Clone)]
pub struct VirtualProperty {
    name: String,
    kind: VirtualKind,
    target: Option<NodeTypeRef>,
}

impl VirtualProperty {
    pub fn many_relationship(
        name: &str,
        pattern: &str,
        target: NodeTypeRef,
        ordering: Option<&str>,
    ) -> VirtualProperty {
        VirtualProperty {
            name: name.to_string(),
            kind: VirtualKind::ManyRelationship {
                pattern: pattern.to_string(),
                ordering: ordering.map(|s| s.to_string()),
            },
            target: Some(target),
        }
    }

    pub fn one_relationship(name: &str, pattern: &str, target: NodeTypeRef) -> VirtualProperty {
        VirtualProperty {
            name: name.to_string(),
            kind: VirtualKind::OneRelationship {
                pattern: pattern.to_string(),
            },
            target: Some(target),
        }
    }

    pub fn cypher_expression(name: &str, expression: &str) -> VirtualProperty {
        VirtualProperty {
            name: name.to_string(),
            kind: VirtualKind::CypherExpression {
                expression: expression.to_string(),
            },
            target: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &VirtualKind {
        &self.kind
    }

    pub fn target(&self) -> Option<&NodeTypeRef> {
        self.target.as_ref()
    }
}

impl fmt::Debug for VirtualProperty {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VirtualProperty")
            .field("name", &self.name)
            .finish()
    }
}

/// A pure client-side function over raw and virtual properties, evaluated after a pull decodes
/// its dependencies. `dependencies` names the raw/virtual properties it needs; the pull compiler
/// ensures those are pulled even when the caller did not separately request them.
#[derive(Clone)]
pub struct DerivedProperty {
    name: String,
    dependencies: Vec<String>,
    compute: Arc<dyn Fn(&HashMap<String, Value>) -> Value + Send + Sync>,
}

impl DerivedProperty {
    pub fn new(
        name: &str,
        dependencies: Vec<String>,
        compute: Arc<dyn Fn(&HashMap<String, Value>) -> Value + Send + Sync>,
    ) -> DerivedProperty {
        DerivedProperty {
            name: name.to_string(),
            dependencies,
            compute,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn compute(&self, values: &HashMap<String, Value>) -> Value {
        (self.compute)(values)
    }
}

impl fmt::Debug for DerivedProperty {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DerivedProperty")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// A process-wide registered descriptor of a class of graph nodes: a label, the chain of labels
/// it inherits, a typed property schema, a typed relationship schema, virtual properties, derived
/// properties, and a default ordering expression.
#[derive(Debug)]
pub struct NodeType {
    label: &'static str,
    inherits: Vec<&'static str>,
    properties: Vec<(String, FieldDecl)>,
    relationships: HashMap<String, RelationshipSchema>,
    virtuals: HashMap<String, VirtualProperty>,
    derived: HashMap<String, DerivedProperty>,
    default_ordering: Option<String>,
}

impl NodeType {
    /// Starts building a node type that will be registered under `label`.
    pub fn new(label: &'static str) -> NodeTypeBuilder {
        NodeTypeBuilder {
            label,
            inherits: Vec::new(),
            properties: Vec::new(),
            relationships: HashMap::new(),
            virtuals: HashMap::new(),
            derived: HashMap::new(),
            default_ordering: None,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Returns this type's full inherited-label chain, own label first, root label last
    /// (invariant I1).
    pub fn label_chain(&self) -> Vec<String> {
        let mut chain: Vec<String> = Vec::with_capacity(self.inherits.len() + 2);
        chain.push(self.label.to_string());
        for l in &self.inherits {
            if !chain.iter().any(|c| c == l) {
                chain.push(l.to_string());
            }
        }
        if !chain.iter().any(|c| c == ROOT_LABEL) {
            chain.push(ROOT_LABEL.to_string());
        }
        chain
    }

    pub fn property(&self, name: &str) -> Option<&FieldDecl> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d)
    }

    /// Declared raw properties, in declaration order (used by `allProps`, section D).
    pub fn properties(&self) -> impl Iterator<Item = (&str, &FieldDecl)> {
        self.properties.iter().map(|(n, d)| (n.as_str(), d))
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipSchema> {
        self.relationships.get(name)
    }

    pub fn relationships(&self) -> impl Iterator<Item = &RelationshipSchema> {
        self.relationships.values()
    }

    pub fn virtual_property(&self, name: &str) -> Option<&VirtualProperty> {
        self.virtuals.get(name)
    }

    pub fn derived_property(&self, name: &str) -> Option<&DerivedProperty> {
        self.derived.get(name)
    }

    pub fn default_ordering(&self) -> Option<&str> {
        self.default_ordering.as_deref()
    }
}

/// Chainable builder for [`NodeType`]. Construct one with [`NodeType::new`], then register the
/// result with [`register`].
///
/// # Examples
///
/// ```rust
/// use vertexdb::engine::field::{FieldDecl, FieldKind};
/// use vertexdb::engine::schema::{register, NodeType};
///
/// let person = NodeType::new("TestPerson")
///     .property("name", FieldDecl::new(FieldKind::String))
///     .build();
/// register(person).unwrap();
/// ```
pub struct NodeTypeBuilder {
    label: &'static str,
    inherits: Vec<&'static str>,
    properties: Vec<(String, FieldDecl)>,
    relationships: HashMap<String, RelationshipSchema>,
    virtuals: HashMap<String, VirtualProperty>,
    derived: HashMap<String, DerivedProperty>,
    default_ordering: Option<String>,
}

impl NodeTypeBuilder {
    /// Declares ancestor labels, inserted into the label chain between this type's own label and
    /// the root label.
    pub fn inherits(mut self, labels: &[&'static str]) -> Self {
        self.inherits.extend_from_slice(labels);
        self
    }

    pub fn property(mut self, name: &str, decl: FieldDecl) -> Self {
        self.properties.push((name.to_string(), decl));
        self
    }

    pub fn relationship(mut self, rel: RelationshipSchema) -> Self {
        self.relationships.insert(rel.name().to_string(), rel);
        self
    }

    pub fn virtual_property(mut self, vp: VirtualProperty) -> Self {
        self.virtuals.insert(vp.name().to_string(), vp);
        self
    }

    pub fn derived_property(mut self, dp: DerivedProperty) -> Self {
        self.derived.insert(dp.name().to_string(), dp);
        self
    }

    pub fn default_ordering(mut self, expr: &str) -> Self {
        self.default_ordering = Some(expr.to_string());
        self
    }

    /// Finishes the builder without registering it. Most callers want [`register`] instead.
    pub fn build(self) -> NodeType {
        NodeType {
            label: self.label,
            inherits: self.inherits,
            properties: self.properties,
            relationships: self.relationships,
            virtuals: self.virtuals,
            derived: self.derived,
            default_ordering: self.default_ordering,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::field::FieldKind;

    fn register_person(label: &'static str) -> Arc<NodeType> {
        register(
            NodeType::new(label)
                .property("name", FieldDecl::new(FieldKind::String))
                .build(),
        )
        .unwrap()
    }

    #[test]
    fn label_chain_ends_at_root() {
        let nt = register_person("SchemaTestPerson");
        assert_eq!(nt.label_chain(), vec!["SchemaTestPerson", ROOT_LABEL]);
    }

    #[test]
    fn duplicate_registration_fails() {
        register_person("SchemaTestDup");
        let err = register(NodeType::new("SchemaTestDup").build()).unwrap_err();
        assert!(matches!(err, Error::ConfigItemDuplicated { .. }));
    }

    #[test]
    fn forward_ref_resolves_after_registration() {
        let r = forward_ref("SchemaTestForward");
        assert_eq!(r.label(), "SchemaTestForward");
        assert!(r.resolve().is_err());
        register(NodeType::new("SchemaTestForward").build()).unwrap();
        assert!(r.resolve().is_ok());
    }

    #[test]
    fn properties_preserve_declaration_order() {
        let nt = NodeType::new("SchemaTestOrder")
            .property("b", FieldDecl::new(FieldKind::String))
            .property("a", FieldDecl::new(FieldKind::String))
            .build();
        let names: Vec<&str> = nt.properties().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn relationship_allows_target_checks_label_chain() {
        let target = register_person("SchemaTestTarget");
        let rel = RelationshipSchema::new(
            "KNOWS",
            vec![NodeTypeRef::from(&target)],
            Cardinality::ToMany,
        );
        assert!(rel.allows_target(&["SchemaTestTarget".to_string(), ROOT_LABEL.to_string()]));
        assert!(!rel.allows_target(&["SomethingElse".to_string()]));
    }
}
