//! Validation triggers (component G): the checks an action's write must pass before its
//! transaction is allowed to commit (invariants I1-I3).
//!
//! [`validate_modified_node`] is the single entry point the action runner calls once per node an
//! action declares as modified. It never talks to the store itself -- it is handed the node's
//! post-write shape (labels, properties, relationship edges) and checks it purely against the
//! node type's schema.

use crate::engine::schema::{Cardinality, NodeType};
use crate::engine::value::Value;
use crate::Error;
use std::collections::HashMap;

/// One relationship edge observed on a modified node, as needed to check invariant I3.
#[derive(Clone, Debug)]
pub struct RelationshipEdge {
    pub target_id: String,
    pub target_labels: Vec<String>,
}

/// The post-write shape of one node an action declared as modified.
pub struct ModifiedNode<'a> {
    pub node_type: &'a NodeType,
    pub labels: &'a [String],
    pub properties: &'a HashMap<String, Value>,
    pub relationships: &'a HashMap<String, Vec<RelationshipEdge>>,
}

/// Runs every validation trigger (I1-I3) against `modified`.
///
/// # Errors
///
/// Returns [`Error::ValidationError`] if a required label is missing or a property fails its
/// field declaration, [`Error::RelationshipRequiredError`]/[`Error::RelationshipCardinalityError`]
/// if a relationship's cardinality is violated, or [`Error::RelationshipTargetInvalid`] if an edge
/// targets a node type outside the relationship's declared allowed set.
pub fn validate_modified_node(modified: &ModifiedNode) -> Result<(), Error> {
    validate_label_chain(modified.node_type, modified.labels)?;
    validate_properties(modified.node_type, modified.properties)?;
    validate_relationships(modified.node_type, modified.relationships)?;
    Ok(())
}

/// I1: every label in the node type's declared inheritance chain (own label, inherited labels,
/// and the root label) must be present on the node.
fn validate_label_chain(node_type: &NodeType, labels: &[String]) -> Result<(), Error> {
    for expected in node_type.label_chain() {
        if !labels.iter().any(|l| *l == expected) {
            return Err(Error::ValidationError {
                field: None,
                reason: format!(
                    "node is missing label {} from its declared label chain",
                    expected
                ),
            });
        }
    }
    Ok(())
}

/// I2: every declared raw property must validate against its field declaration. A property the
/// write omitted is treated as `Value::Null`, so a non-nullable omission fails the same way an
/// explicit null would.
fn validate_properties(node_type: &NodeType, properties: &HashMap<String, Value>) -> Result<(), Error> {
    for (name, decl) in node_type.properties() {
        let value = properties.get(name).cloned().unwrap_or(Value::Null);
        decl.validate_value(name, value)?;
    }
    Ok(())
}

/// I3: every declared relationship's cardinality is respected, and every edge targets a node type
/// within that relationship's declared allowed set.
fn validate_relationships(
    node_type: &NodeType,
    relationships: &HashMap<String, Vec<RelationshipEdge>>,
) -> Result<(), Error> {
    for rel in node_type.relationships() {
        let empty = Vec::new();
        let edges = relationships.get(rel.name()).unwrap_or(&empty);

        match rel.cardinality() {
            Cardinality::ToOneRequired => {
                if edges.len() != 1 {
                    return Err(Error::RelationshipRequiredError {
                        rel_name: rel.name().to_string(),
                    });
                }
            }
            Cardinality::ToOneOrNone => {
                if edges.len() > 1 {
                    return Err(Error::RelationshipCardinalityError {
                        rel_name: rel.name().to_string(),
                    });
                }
            }
            Cardinality::ToManyUnique => {
                let mut seen_targets: Vec<&str> = Vec::with_capacity(edges.len());
                for edge in edges {
                    if seen_targets.contains(&edge.target_id.as_str()) {
                        return Err(Error::RelationshipCardinalityError {
                            rel_name: rel.name().to_string(),
                        });
                    }
                    seen_targets.push(&edge.target_id);
                }
            }
            Cardinality::ToMany => {}
        }

        for edge in edges {
            if !rel.allows_target(&edge.target_labels) {
                return Err(Error::RelationshipTargetInvalid {
                    rel_name: rel.name().to_string(),
                    label: edge.target_labels.first().cloned().unwrap_or_default(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::field::{FieldDecl, FieldKind};
    use crate::engine::schema::{register, NodeTypeRef, RelationshipSchema, ROOT_LABEL};
    use maplit::hashmap;

    fn person_with_required_friend(label: &'static str, friend_label: &'static str) -> NodeType {
        let target = register(NodeType::new(friend_label).build()).unwrap();
        NodeType::new(label)
            .property("name", FieldDecl::new(FieldKind::String))
            .relationship(RelationshipSchema::new(
                "BEST_FRIEND",
                vec![NodeTypeRef::from(&target)],
                Cardinality::ToOneRequired,
            ))
            .build()
    }

    #[test]
    fn missing_root_label_fails() {
        let nt = NodeType::new("ValidationTestPerson1").build();
        let modified = ModifiedNode {
            node_type: &nt,
            labels: &["ValidationTestPerson1".to_string()],
            properties: &HashMap::new(),
            relationships: &HashMap::new(),
        };
        let err = validate_modified_node(&modified).unwrap_err();
        assert!(matches!(err, Error::ValidationError { .. }));
    }

    #[test]
    fn complete_label_chain_and_properties_pass() {
        let nt = NodeType::new("ValidationTestPerson2")
            .property("name", FieldDecl::new(FieldKind::String))
            .build();
        let modified = ModifiedNode {
            node_type: &nt,
            labels: &["ValidationTestPerson2".to_string(), ROOT_LABEL.to_string()],
            properties: &hashmap! {"name".to_string() => Value::String("Ada".to_string())},
            relationships: &HashMap::new(),
        };
        assert!(validate_modified_node(&modified).is_ok());
    }

    #[test]
    fn missing_required_property_fails() {
        let nt = NodeType::new("ValidationTestPerson3")
            .property("name", FieldDecl::new(FieldKind::String))
            .build();
        let modified = ModifiedNode {
            node_type: &nt,
            labels: &["ValidationTestPerson3".to_string(), ROOT_LABEL.to_string()],
            properties: &HashMap::new(),
            relationships: &HashMap::new(),
        };
        let err = validate_modified_node(&modified).unwrap_err();
        assert!(matches!(err, Error::ValidationError { field: Some(f), .. } if f == "name"));
    }

    #[test]
    fn required_relationship_with_no_edge_fails() {
        let nt = person_with_required_friend("ValidationTestPerson4", "ValidationTestPerson4Friend");
        let modified = ModifiedNode {
            node_type: &nt,
            labels: &["ValidationTestPerson4".to_string(), ROOT_LABEL.to_string()],
            properties: &hashmap! {"name".to_string() => Value::String("Ada".to_string())},
            relationships: &HashMap::new(),
        };
        let err = validate_modified_node(&modified).unwrap_err();
        assert!(matches!(err, Error::RelationshipRequiredError { .. }));
    }

    #[test]
    fn relationship_targeting_disallowed_type_fails() {
        let other = register(NodeType::new("ValidationTestOther1").build()).unwrap();
        let nt = NodeType::new("ValidationTestPerson5")
            .relationship(RelationshipSchema::new(
                "KNOWS",
                vec![NodeTypeRef::from(&other)],
                Cardinality::ToMany,
            ))
            .build();
        let modified = ModifiedNode {
            node_type: &nt,
            labels: &["ValidationTestPerson5".to_string(), ROOT_LABEL.to_string()],
            properties: &HashMap::new(),
            relationships: &hashmap! {
                "KNOWS".to_string() => vec![RelationshipEdge {
                    target_id: "_x".to_string(),
                    target_labels: vec!["SomethingElse".to_string()],
                }],
            },
        };
        let err = validate_modified_node(&modified).unwrap_err();
        assert!(matches!(err, Error::RelationshipTargetInvalid { .. }));
    }

    #[test]
    fn to_many_unique_rejects_parallel_edges_to_the_same_target() {
        let target = register(NodeType::new("ValidationTestOther2").build()).unwrap();
        let nt = NodeType::new("ValidationTestPerson6")
            .relationship(RelationshipSchema::new(
                "TAGGED",
                vec![NodeTypeRef::from(&target)],
                Cardinality::ToManyUnique,
            ))
            .build();
        let edge = RelationshipEdge {
            target_id: "_dup".to_string(),
            target_labels: vec!["ValidationTestOther2".to_string()],
        };
        let modified = ModifiedNode {
            node_type: &nt,
            labels: &["ValidationTestPerson6".to_string(), ROOT_LABEL.to_string()],
            properties: &HashMap::new(),
            relationships: &hashmap! {"TAGGED".to_string() => vec![edge.clone(), edge]},
        };
        let err = validate_modified_node(&modified).unwrap_err();
        assert!(matches!(err, Error::RelationshipCardinalityError { .. }));
    }
}
