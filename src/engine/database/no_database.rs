//! An in-memory, scripted graph driver. Always compiled (no feature gate), used by tests that
//! want to exercise schema registration, fragment composition, and the pull compiler without a
//! live Neo4j instance.
//!
//! Rather than interpreting Cypher, a [`NoDatabasePool`] is pre-loaded with the row sets each
//! `run()` call should return, in call order. This mirrors how the pull and action runner code
//! consumes a driver (one `run` per compiled fragment) without requiring a real query engine.

use crate::engine::database::{GraphDriver, ReadTransaction, Row, WriteTransaction};
use crate::engine::fragment::Fragment;
use crate::Error;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A scripted, in-memory driver: each call to `run` pops the next pre-loaded row set.
#[derive(Clone, Default)]
pub struct NoDatabasePool {
    script: Arc<Mutex<VecDeque<Vec<Row>>>>,
    committed: Arc<Mutex<bool>>,
    rolled_back: Arc<Mutex<bool>>,
}

impl NoDatabasePool {
    pub fn new() -> NoDatabasePool {
        NoDatabasePool::default()
    }

    /// Queues `rows` to be returned by the next `run` call, in either a read or write
    /// transaction opened from this pool.
    pub fn push_response(&self, rows: Vec<Row>) {
        self.script.lock().expect("no_database script lock poisoned").push_back(rows);
    }

    pub fn was_committed(&self) -> bool {
        *self.committed.lock().expect("no_database commit flag lock poisoned")
    }

    pub fn was_rolled_back(&self) -> bool {
        *self.rolled_back.lock().expect("no_database rollback flag lock poisoned")
    }

    fn pop(&self) -> Result<Vec<Row>, Error> {
        self.script
            .lock()
            .expect("no_database script lock poisoned")
            .pop_front()
            .ok_or(Error::ResponseSetNotFound)
    }
}

#[async_trait]
impl GraphDriver for NoDatabasePool {
    async fn read_transaction(&self) -> Result<Box<dyn ReadTransaction>, Error> {
        Ok(Box::new(NoDatabaseTransaction { pool: self.clone() }))
    }

    async fn write_transaction(&self) -> Result<Box<dyn WriteTransaction>, Error> {
        Ok(Box::new(NoDatabaseTransaction { pool: self.clone() }))
    }
}

struct NoDatabaseTransaction {
    pool: NoDatabasePool,
}

#[async_trait]
impl ReadTransaction for NoDatabaseTransaction {
    async fn run(&mut self, fragment: &Fragment) -> Result<Vec<Row>, Error> {
        // Force compilation so a malformed fragment still fails the way a live driver call would.
        fragment.query_string()?;
        self.pool.pop()
    }
}

#[async_trait]
impl WriteTransaction for NoDatabaseTransaction {
    async fn run(&mut self, fragment: &Fragment) -> Result<Vec<Row>, Error> {
        fragment.query_string()?;
        self.pool.pop()
    }

    async fn commit(&mut self) -> Result<(), Error> {
        *self.pool.committed.lock().expect("no_database commit flag lock poisoned") = true;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), Error> {
        *self.pool.rolled_back.lock().expect("no_database rollback flag lock poisoned") = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::value::Value;
    use maplit::hashmap;

    #[tokio::test]
    async fn scripted_responses_are_returned_in_order() {
        let pool = NoDatabasePool::new();
        pool.push_response(vec![Row {
            columns: hashmap! {"id".to_string() => Value::String("_a".to_string())},
        }]);

        let mut tx = pool.read_transaction().await.unwrap();
        let rows = tx.run(&Fragment::raw("MATCH (n) RETURN n")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&Value::String("_a".to_string())));
    }

    #[tokio::test]
    async fn empty_script_fails_with_response_set_not_found() {
        let pool = NoDatabasePool::new();
        let mut tx = pool.read_transaction().await.unwrap();
        let err = tx.run(&Fragment::raw("MATCH (n) RETURN n")).await.unwrap_err();
        assert!(matches!(err, Error::ResponseSetNotFound));
    }

    #[tokio::test]
    async fn commit_and_rollback_are_tracked() {
        let pool = NoDatabasePool::new();
        let mut tx = pool.write_transaction().await.unwrap();
        tx.commit().await.unwrap();
        assert!(pool.was_committed());
        assert!(!pool.was_rolled_back());
    }
}
