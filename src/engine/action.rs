//! The action runner (component F): the only path by which a write transaction is opened against
//! the store. An action's `apply` declares what it changed; the runner cross-checks that
//! declaration against what was actually recorded through its [`ActionContext`], runs every
//! validation trigger (component G) against the surviving changes, and only then writes an
//! auditable `Action` node before committing. Any failure along the way rolls the transaction
//! back, so a write is never left half-applied and never committed without an `Action` node.

use crate::engine::database::{DatabasePool, GraphDriver, Row, WriteTransaction};
use crate::engine::fragment::Fragment;
use crate::engine::identifier;
use crate::engine::schema::{self, NodeTypeRef};
use crate::engine::validation::{self, ModifiedNode, RelationshipEdge};
use crate::engine::value::Value;
use crate::Error;
use async_trait::async_trait;
use maplit::hashmap;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::convert::TryFrom;
use std::sync::{Arc, RwLock};

/// The user id that is always considered valid, for actions the embedding application runs on its
/// own behalf rather than a signed-in user's.
pub const SYSTEM_USER_ID: &str = "_system";

/// What kind of change an action made to one node, as recorded through an [`ActionContext`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// One node's post-write shape, as an action's `apply` recorded it through [`ActionContext`].
/// `node_type` is `None` for a deleted node -- there is nothing left to validate against I1-I3.
pub struct RecordedChange {
    pub node_id: String,
    pub kind: ChangeKind,
    pub node_type: Option<NodeTypeRef>,
    pub labels: Vec<String>,
    pub properties: HashMap<String, Value>,
    pub relationships: HashMap<String, Vec<RelationshipEdge>>,
}

/// What `apply` hands back to the runner: the data returned to the caller, the set of node ids it
/// declares as modified (checked against what was actually recorded through the context), and a
/// human-readable description stored on the `Action` node.
pub struct ActionOutcome {
    pub result_data: serde_json::Value,
    pub modified_nodes: HashSet<String>,
    pub description: String,
}

/// Handed to an action's `apply` in place of the raw write transaction. Action authors issue
/// queries through [`ActionContext::run`] exactly as they would against the transaction directly,
/// and must additionally call [`ActionContext::record_change`] once per node they touch -- this is
/// how the runner independently learns what changed, to cross-check against `apply`'s declared
/// `modifiedNodes` set.
pub struct ActionContext<'a> {
    tx: &'a mut dyn WriteTransaction,
    recorded: Vec<RecordedChange>,
}

impl<'a> ActionContext<'a> {
    fn new(tx: &'a mut dyn WriteTransaction) -> ActionContext<'a> {
        ActionContext {
            tx,
            recorded: Vec::new(),
        }
    }

    pub async fn run(&mut self, fragment: &Fragment) -> Result<Vec<Row>, Error> {
        self.tx.run(fragment).await
    }

    pub fn record_change(&mut self, change: RecordedChange) {
        self.recorded.push(change);
    }
}

/// The behavior a registered action type implements: apply the change, and optionally describe
/// how to invert it. Mirrors the teacher's hook-trait shape (`engine/events.rs`'s
/// `EventHandlerBag`), generalized from a fixed set of lifecycle hooks to a named, registered
/// action; `async_trait` does the lifetime plumbing a hand-written `fn(..) -> BoxFuture<..>` alias
/// would otherwise need for a borrowed `&mut ActionContext`.
#[async_trait]
pub trait ActionImpl: Send + Sync {
    async fn apply(
        &self,
        ctx: &mut ActionContext<'_>,
        input: serde_json::Value,
    ) -> Result<ActionOutcome, Error>;

    /// Describes how to undo one invocation of this action, given the params it was called with
    /// and the `resultData` it returned. Returns the input for a compensating action run through
    /// this same definition, or `None` if this particular invocation cannot be undone. The default
    /// declares the action non-invertible.
    async fn invert(
        &self,
        _params: &serde_json::Value,
        _result_data: &serde_json::Value,
    ) -> Option<serde_json::Value> {
        None
    }
}

/// A registered action: a type name plus the behavior it runs. Cloning an `ActionDefinition` is
/// cheap -- it shares the underlying `ActionImpl` through an `Arc`.
pub struct ActionDefinition {
    action_type: String,
    implementation: Arc<dyn ActionImpl>,
}

impl ActionDefinition {
    pub fn new(action_type: &str, implementation: Arc<dyn ActionImpl>) -> ActionDefinition {
        ActionDefinition {
            action_type: action_type.to_string(),
            implementation,
        }
    }

    pub fn action_type(&self) -> &str {
        &self.action_type
    }
}

impl Clone for ActionDefinition {
    fn clone(&self) -> Self {
        ActionDefinition {
            action_type: self.action_type.clone(),
            implementation: Arc::clone(&self.implementation),
        }
    }
}

static REGISTRY: Lazy<RwLock<HashMap<String, ActionDefinition>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers `definition` into the process-wide action registry.
///
/// # Errors
///
/// Returns [`Error::ConfigItemDuplicated`] if an action is already registered under the same type
/// name (the same variant the schema registry uses for a duplicate node-type label; there is no
/// separate "action already registered" error kind).
pub fn register(definition: ActionDefinition) -> Result<(), Error> {
    let mut registry = REGISTRY.write().expect("action registry lock poisoned");
    if registry.contains_key(definition.action_type()) {
        return Err(Error::ConfigItemDuplicated {
            type_name: definition.action_type().to_string(),
        });
    }
    registry.insert(definition.action_type().to_string(), definition);
    Ok(())
}

fn lookup(action_type: &str) -> Option<ActionDefinition> {
    REGISTRY
        .read()
        .expect("action registry lock poisoned")
        .get(action_type)
        .cloned()
}

/// Exposes [`lookup`] to integration tests, which compile against this crate's public surface
/// only. Not part of the supported API.
#[doc(hidden)]
pub fn lookup_for_test(action_type: &str) -> Option<ActionDefinition> {
    lookup(action_type)
}

/// Exposes [`execute`] to integration tests exercising the apply/cross-check/validate pipeline
/// directly against a transaction, without going through `Action::run_as`'s own commit/rollback.
/// Not part of the supported API.
#[doc(hidden)]
pub async fn execute_for_test(
    tx: &mut dyn WriteTransaction,
    definition: &ActionDefinition,
    user_id: &str,
    input: serde_json::Value,
    reverts: Option<&str>,
) -> Result<serde_json::Value, Error> {
    execute(tx, definition, user_id, input, reverts).await
}

/// Exposes [`undo_inner`] to integration tests. Not part of the supported API.
#[doc(hidden)]
pub async fn undo_action_for_test(
    tx: &mut dyn WriteTransaction,
    action_id: &str,
) -> Result<serde_json::Value, Error> {
    undo_inner(tx, action_id).await
}

/// Namespace for the action runner's two entry points. `Engine` delegates `run_as` to
/// [`Action::run_as`] directly; there is no instance state of its own.
pub struct Action;

impl Action {
    /// Runs the action registered under `action_type`, as `user_id`, inside one write transaction.
    ///
    /// # Errors
    ///
    /// [`Error::ActionNotRegistered`] if no action is registered under `action_type`. Any error
    /// `apply`, the `modifiedNodes` cross-check, validation, or user resolution produce rolls the
    /// transaction back and is returned unchanged.
    pub async fn run_as(
        db_pool: &DatabasePool,
        action_type: &str,
        user_id: &str,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, Error> {
        let definition = lookup(action_type).ok_or_else(|| Error::ActionNotRegistered {
            action_type: action_type.to_string(),
        })?;
        let mut tx = db_pool.write_transaction().await?;
        match execute(tx.as_mut(), &definition, user_id, input, None).await {
            Ok(result) => {
                tx.commit().await?;
                Ok(result)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    /// Reverts a previously committed action, by looking up its recorded type and params and
    /// asking its `ActionImpl` for a compensating input, which is then run as a new action (with a
    /// `REVERTED` edge back to the action being undone) inside its own write transaction.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyResultError`] if `action_id` does not name a recorded action.
    /// [`Error::ActionNotUndoableError`] if the action deleted nodes, or its implementation
    /// declines to invert this invocation.
    pub async fn undo_action(
        db_pool: &DatabasePool,
        action_id: &str,
    ) -> Result<serde_json::Value, Error> {
        let mut tx = db_pool.write_transaction().await?;
        match undo_inner(tx.as_mut(), action_id).await {
            Ok(result) => {
                tx.commit().await?;
                Ok(result)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }
}

async fn execute(
    tx: &mut dyn WriteTransaction,
    definition: &ActionDefinition,
    user_id: &str,
    input: serde_json::Value,
    reverts: Option<&str>,
) -> Result<serde_json::Value, Error> {
    let (outcome, recorded) = {
        let mut ctx = ActionContext::new(tx);
        let outcome = definition.implementation.apply(&mut ctx, input.clone()).await?;
        (outcome, ctx.recorded)
    };

    let declared: HashSet<&str> = outcome.modified_nodes.iter().map(String::as_str).collect();
    let actual: HashSet<&str> = recorded.iter().map(|r| r.node_id.as_str()).collect();

    if let Some(id) = actual.iter().find(|id| !declared.contains(*id)) {
        return Err(Error::UndeclaredModificationError {
            kind: "unspecified".to_string(),
            node_id: id.to_string(),
        });
    }
    if let Some(id) = declared.iter().find(|id| !actual.contains(*id)) {
        return Err(Error::UndeclaredModificationError {
            kind: "undetected".to_string(),
            node_id: id.to_string(),
        });
    }

    for change in &recorded {
        if change.kind == ChangeKind::Deleted {
            continue;
        }
        let node_type_ref = change.node_type.as_ref().ok_or_else(|| Error::SchemaItemNotFound {
            name: change.node_id.clone(),
        })?;
        let node_type = node_type_ref.resolve()?;
        validation::validate_modified_node(&ModifiedNode {
            node_type: &node_type,
            labels: &change.labels,
            properties: &change.properties,
            relationships: &change.relationships,
        })?;
    }

    verify_user(tx, user_id).await?;
    write_action_record(tx, definition.action_type(), user_id, &input, &recorded, &outcome, reverts)
        .await?;

    Ok(outcome.result_data)
}

async fn verify_user(tx: &mut dyn WriteTransaction, user_id: &str) -> Result<(), Error> {
    if user_id == SYSTEM_USER_ID {
        return Ok(());
    }
    let fragment = Fragment::raw("MATCH (u:User:VNode {id: $uid}) RETURN u.id AS id").with_params(
        hashmap! {"uid".to_string() => Value::String(user_id.to_string())},
    )?;
    let rows = tx.run(&fragment).await?;
    if rows.is_empty() {
        return Err(Error::InvalidUserError {
            user_id: user_id.to_string(),
        });
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn write_action_record(
    tx: &mut dyn WriteTransaction,
    action_type: &str,
    user_id: &str,
    input: &serde_json::Value,
    recorded: &[RecordedChange],
    outcome: &ActionOutcome,
    reverts: Option<&str>,
) -> Result<(), Error> {
    let action_id = identifier::new_id();
    let deleted_count = recorded.iter().filter(|r| r.kind == ChangeKind::Deleted).count() as i64;
    let modified_ids: Vec<Value> = recorded.iter().map(|r| Value::String(r.node_id.clone())).collect();

    let mut params = hashmap! {
        "actionId".to_string() => Value::String(action_id),
        "actionType".to_string() => Value::String(action_type.to_string()),
        "description".to_string() => Value::String(outcome.description.clone()),
        "deletedCount".to_string() => Value::Int64(deleted_count),
        "paramsJson".to_string() => Value::String(input.to_string()),
        "resultDataJson".to_string() => Value::String(outcome.result_data.to_string()),
        "modifiedIds".to_string() => Value::List(modified_ids),
        "userId".to_string() => Value::String(user_id.to_string()),
    };

    let mut query = String::from(
        "CREATE (a:Action:VNode {id: $actionId, type: $actionType, description: $description, \
         deletedNodesCount: $deletedCount, paramsJson: $paramsJson, resultDataJson: $resultDataJson}) \
         WITH a \
         UNWIND $modifiedIds AS mid \
         MATCH (n:VNode {id: mid}) \
         CREATE (a)-[:MODIFIED]->(n) \
         WITH a \
         OPTIONAL MATCH (u:VNode {id: $userId}) \
         FOREACH (_ignored IN CASE WHEN u IS NOT NULL THEN [1] ELSE [] END | CREATE (u)-[:PERFORMED]->(a))",
    );

    if let Some(reverted_id) = reverts {
        params.insert("revertedId".to_string(), Value::String(reverted_id.to_string()));
        query.push_str(
            " WITH a \
             OPTIONAL MATCH (prev:Action:VNode {id: $revertedId}) \
             FOREACH (_ignored IN CASE WHEN prev IS NOT NULL THEN [1] ELSE [] END | CREATE (a)-[:REVERTED]->(prev))",
        );
    }

    query.push_str(" RETURN a.id AS id");

    let fragment = Fragment::raw(&query).with_params(params)?;
    tx.run(&fragment).await?;
    Ok(())
}

async fn undo_inner(tx: &mut dyn WriteTransaction, action_id: &str) -> Result<serde_json::Value, Error> {
    let fragment = Fragment::raw(
        "MATCH (a:Action:VNode {id: $id}) RETURN a.type AS actionType, \
         a.deletedNodesCount AS deletedNodesCount, a.paramsJson AS paramsJson, \
         a.resultDataJson AS resultDataJson",
    )
    .with_params(hashmap! {"id".to_string() => Value::String(action_id.to_string())})?;

    let mut rows = tx.run(&fragment).await?;
    if rows.is_empty() {
        return Err(Error::EmptyResultError);
    }
    let row = rows.remove(0);

    let deleted_count = match row.columns.get("deletedNodesCount") {
        Some(Value::Int64(n)) => *n,
        _ => 0,
    };
    if deleted_count > 0 {
        return Err(Error::ActionNotUndoableError {
            action_id: action_id.to_string(),
        });
    }

    let action_type = match row.columns.get("actionType") {
        Some(Value::String(s)) => s.clone(),
        _ => {
            return Err(Error::ActionNotUndoableError {
                action_id: action_id.to_string(),
            })
        }
    };
    let definition = lookup(&action_type).ok_or_else(|| Error::ActionNotRegistered {
        action_type: action_type.clone(),
    })?;

    let params_json: serde_json::Value = match row.columns.get("paramsJson") {
        Some(Value::String(s)) => serde_json::from_str(s)?,
        _ => serde_json::Value::Null,
    };
    let result_data_json: serde_json::Value = match row.columns.get("resultDataJson") {
        Some(Value::String(s)) => serde_json::from_str(s)?,
        _ => serde_json::Value::Null,
    };

    let compensating_input = definition
        .implementation
        .invert(&params_json, &result_data_json)
        .await
        .ok_or_else(|| Error::ActionNotUndoableError {
            action_id: action_id.to_string(),
        })?;

    execute(tx, &definition, SYSTEM_USER_ID, compensating_input, Some(action_id)).await
}

fn json_object_field(input: &serde_json::Value, name: &str) -> Option<serde_json::Value> {
    input.get(name).cloned()
}

fn decoded_properties(data: serde_json::Value) -> Result<HashMap<String, Value>, Error> {
    HashMap::try_from(Value::try_from(data)?)
}

/// A ready-made action that creates a node from an arbitrary label set and a flat property map:
/// `{"labels": ["AstroBody", "VNode"], "data": {"name": "Ceres"}}`. The node is created with its
/// full declared label chain (the first entry of `labels` selects the schema type; redundant
/// entries such as the root label are accepted but not required), and written exactly as supplied
/// -- a missing required property fails validation after `apply` returns, it does not fail early.
///
/// Grounded on the teacher's generated `create_mutation` resolver (`engine/resolvers.rs`), which
/// likewise builds a single `CREATE` from a type descriptor and an input map.
pub struct GenericCreateAction;

#[async_trait]
impl ActionImpl for GenericCreateAction {
    async fn apply(
        &self,
        ctx: &mut ActionContext<'_>,
        input: serde_json::Value,
    ) -> Result<ActionOutcome, Error> {
        let labels = json_object_field(&input, "labels")
            .and_then(|v| v.as_array().cloned())
            .ok_or_else(|| Error::ValidationError {
                field: Some("labels".to_string()),
                reason: "labels must be a non-empty array of strings".to_string(),
            })?;
        let primary_label = labels
            .first()
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::ValidationError {
                field: Some("labels".to_string()),
                reason: "labels must be a non-empty array of strings".to_string(),
            })?;
        let node_type = schema::lookup(primary_label).ok_or_else(|| Error::UnregisteredTypeError {
            label: primary_label.to_string(),
        })?;

        let data = json_object_field(&input, "data").unwrap_or_else(|| serde_json::json!({}));
        let props = decoded_properties(data)?;

        let id = identifier::new_id();
        let label_chain = node_type.label_chain();

        let fragment = Fragment::raw(&format!(
            "CREATE (n:{} {{id: $id}}) SET n += $props RETURN n.id AS id",
            label_chain.join(":")
        ))
        .with_params(hashmap! {
            "id".to_string() => Value::String(id.clone()),
            "props".to_string() => Value::Map(props.clone()),
        })?;
        ctx.run(&fragment).await?;

        ctx.record_change(RecordedChange {
            node_id: id.clone(),
            kind: ChangeKind::Created,
            node_type: Some(NodeTypeRef::from(&node_type)),
            labels: label_chain,
            properties: props,
            relationships: HashMap::new(),
        });

        let result_data = serde_json::json!({"id": id.clone()});
        Ok(ActionOutcome {
            result_data,
            modified_nodes: HashSet::from([id]),
            description: format!("created a {} node", node_type.label()),
        })
    }
}

/// A ready-made action that updates a node's properties in place: `{"id": "_abc", "label":
/// "AstroBody", "data": {"mass": 9.4e20}}`. `label` selects the schema type to validate the node's
/// full resulting property set against -- this action does not sniff the node's existing labels
/// from the store, so the caller must already know what it's updating.
///
/// Relationships are never reported here (the store round-trip this action makes only re-reads
/// the node's own properties and labels, not its edges), so a type with a required relationship
/// will fail I3 validation on every generic update unless a bespoke action supplies its edges.
pub struct GenericUpdateAction;

#[async_trait]
impl ActionImpl for GenericUpdateAction {
    async fn apply(
        &self,
        ctx: &mut ActionContext<'_>,
        input: serde_json::Value,
    ) -> Result<ActionOutcome, Error> {
        let id = json_object_field(&input, "id")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| Error::ValidationError {
                field: Some("id".to_string()),
                reason: "id is required".to_string(),
            })?;
        let label = json_object_field(&input, "label")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| Error::ValidationError {
                field: Some("label".to_string()),
                reason: "label is required".to_string(),
            })?;
        let node_type = schema::lookup(&label).ok_or_else(|| Error::UnregisteredTypeError {
            label: label.clone(),
        })?;

        let data = json_object_field(&input, "data").unwrap_or_else(|| serde_json::json!({}));
        let updates = decoded_properties(data)?;

        let fragment = Fragment::raw(
            "MATCH (n:VNode {id: $id}) SET n += $updates WITH n \
             RETURN n {.*} AS node, labels(n) AS labels",
        )
        .with_params(hashmap! {
            "id".to_string() => Value::String(id.clone()),
            "updates".to_string() => Value::Map(updates),
        })?;
        let mut rows = ctx.run(&fragment).await?;
        if rows.is_empty() {
            return Err(Error::EmptyResultError);
        }
        let row = rows.remove(0);

        let properties = match row.columns.get("node").cloned() {
            Some(Value::Map(m)) => m,
            other => {
                return Err(Error::TypeConversionFailed {
                    src: format!("{:?}", other),
                    dst: "Map".to_string(),
                })
            }
        };
        let node_labels = match row.columns.get("labels").cloned() {
            Some(Value::List(items)) => items
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s),
                    other => Err(Error::TypeConversionFailed {
                        src: format!("{:?}", other),
                        dst: "String".to_string(),
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?,
            other => {
                return Err(Error::TypeConversionFailed {
                    src: format!("{:?}", other),
                    dst: "List".to_string(),
                })
            }
        };

        ctx.record_change(RecordedChange {
            node_id: id.clone(),
            kind: ChangeKind::Updated,
            node_type: Some(NodeTypeRef::from(&node_type)),
            labels: node_labels,
            properties,
            relationships: HashMap::new(),
        });

        let result_data = serde_json::json!({"id": id.clone()});
        Ok(ActionOutcome {
            result_data,
            modified_nodes: HashSet::from([id]),
            description: format!("updated a {} node", node_type.label()),
        })
    }
}
