//! The top-level entry point: an [`Engine`] wires a [`database::DatabasePool`] to the
//! process-wide schema and action registries and exposes the pull/action surfaces (sections 4.E,
//! 4.F) as methods. Schema and action registration are free functions (`schema::register`,
//! `action::register`) operating on process-wide statics, matching spec.md section 5's "written
//! once during module initialization, read-only thereafter" model; `Engine` itself only carries
//! the driver a given embedder configured.

pub mod action;
pub mod database;
pub mod field;
pub mod fragment;
pub mod identifier;
pub mod pull;
pub mod request;
pub mod schema;
pub mod validation;
pub mod validators;
pub mod value;

use crate::engine::action::{Action, ActionDefinition};
use crate::engine::database::{DatabasePool, GraphDriver};
use crate::engine::pull::{pull, pull_one};
use crate::engine::request::{PullFilter, PullRequest};
use crate::engine::schema::NodeType;
use crate::Error;
use log::debug;
use std::sync::Arc;

/// The engine an embedding application constructs once at startup and then shares (typically
/// behind an `Arc`) across requests.
///
/// # Examples
///
/// ```rust
/// use vertexdb::engine::database::DatabasePool;
/// use vertexdb::engine::Engine;
///
/// let engine = Engine::new(DatabasePool::NoDatabase);
/// ```
#[derive(Clone)]
pub struct Engine {
    db_pool: DatabasePool,
}

impl Engine {
    pub fn new(db_pool: DatabasePool) -> Engine {
        debug!("Engine::new called");
        Engine { db_pool }
    }

    pub fn db_pool(&self) -> &DatabasePool {
        &self.db_pool
    }

    /// Runs a declarative pull request (4.D/4.E) and projects the result, expecting exactly one
    /// matching record.
    pub async fn pull_one(
        &self,
        request: &PullRequest,
        filter: &PullFilter,
    ) -> Result<serde_json::Value, Error> {
        debug!("Engine::pull_one called for type {}", request.node_type().label());
        let mut transaction = self.db_pool.read_transaction().await?;
        pull_one(transaction.as_mut(), request, filter).await
    }

    /// Runs a declarative pull request (4.D/4.E) and projects every matching record.
    pub async fn pull(
        &self,
        request: &PullRequest,
        filter: &PullFilter,
    ) -> Result<Vec<serde_json::Value>, Error> {
        debug!("Engine::pull called for type {}", request.node_type().label());
        let mut transaction = self.db_pool.read_transaction().await?;
        pull(transaction.as_mut(), request, filter).await
    }

    /// Runs a registered action (4.F) as the given user id, inside a single write transaction
    /// that commits only if the action and every validation trigger it provokes succeed.
    pub async fn run_as(
        &self,
        action_type: &str,
        user_id: &str,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, Error> {
        debug!("Engine::run_as called -- action_type: {}, user_id: {}", action_type, user_id);
        Action::run_as(&self.db_pool, action_type, user_id, input).await
    }

    /// Reverts a previously committed action (4.F), running its declared inverse as a new action.
    pub async fn undo_action(&self, action_id: &str) -> Result<serde_json::Value, Error> {
        debug!("Engine::undo_action called for {}", action_id);
        Action::undo_action(&self.db_pool, action_id).await
    }

    /// Registers a node type with the process-wide schema registry (4.B). Thin pass-through
    /// kept on `Engine` so embedders don't need a separate `use` for the common case.
    pub fn register_type(&self, node_type: NodeType) -> Result<Arc<NodeType>, Error> {
        debug!("Engine::register_type called for {}", node_type.label());
        schema::register(node_type)
    }

    /// Registers an action definition with the process-wide action registry (4.F).
    pub fn register_action(&self, definition: ActionDefinition) -> Result<(), Error> {
        debug!("Engine::register_action called for {}", definition.action_type());
        action::register(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }

    #[tokio::test]
    async fn pull_against_no_database_fails_without_a_live_store() {
        let engine = Engine::new(DatabasePool::NoDatabase);
        let request = PullRequest::new(
            crate::engine::schema::forward_ref("Movie"),
        );
        let err = engine.pull(&request, &PullFilter::none()).await.unwrap_err();
        assert!(matches!(err, Error::DriverError { .. }));
    }
}
