//! The graph driver boundary (section 6): the `GraphDriver`/`ReadTransaction`/`WriteTransaction`
//! traits every backend implements, plus the `DatabasePool` enum selecting between them.
//!
//! Two concrete drivers ship: [`neo4j`] (Bolt protocol, feature-gated `neo4j`) and
//! [`no_database`] (an in-memory, scripted driver, always compiled, used by tests and by
//! embedders that want schema/composer/pull behavior without a live store).

#[cfg(feature = "neo4j")]
pub mod neo4j;
pub mod no_database;

use crate::engine::fragment::Fragment;
use crate::engine::value::Value;
use crate::Error;
use async_trait::async_trait;
use std::collections::HashMap;
use std::env::var_os;

pub(crate) fn env_string(var_name: &str) -> Result<String, Error> {
    var_os(var_name)
        .map(|osstr| osstr.to_string_lossy().into_owned())
        .ok_or_else(|| Error::EnvironmentVariableNotFound {
            name: var_name.to_string(),
        })
}

pub(crate) fn env_u16(var_name: &str) -> Result<u16, Error> {
    Ok(env_string(var_name)?.parse::<u16>()?)
}

/// One decoded result row: the driver's column-name-to-value mapping for a single record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    pub columns: HashMap<String, Value>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }
}

/// A read-only transaction: runs a compiled [`Fragment`] and returns its rows. Dropped (not
/// explicitly closed) when the caller is done with it.
#[async_trait]
pub trait ReadTransaction: Send {
    async fn run(&mut self, fragment: &Fragment) -> Result<Vec<Row>, Error>;
}

/// A read-write transaction: [`ReadTransaction::run`] plus `commit`/`rollback`. The action runner
/// (component F) is the only caller expected to open one directly; it enforces that a write
/// transaction is never committed without an `Action` node having been created in it.
#[async_trait]
pub trait WriteTransaction: Send {
    async fn run(&mut self, fragment: &Fragment) -> Result<Vec<Row>, Error>;
    async fn commit(&mut self) -> Result<(), Error>;
    async fn rollback(&mut self) -> Result<(), Error>;
}

/// A pooled connection to a graph store, capable of opening read and write transactions.
#[async_trait]
pub trait GraphDriver: Send + Sync {
    async fn read_transaction(&self) -> Result<Box<dyn ReadTransaction>, Error>;
    async fn write_transaction(&self) -> Result<Box<dyn WriteTransaction>, Error>;
}

/// Selects amongst the drivers this crate ships. Construct with the backend-specific endpoint
/// type (e.g. [`neo4j::Neo4jEndpoint`]) and convert with `.into()`, or use
/// [`DatabasePool::NoDatabase`] directly.
#[derive(Clone)]
pub enum DatabasePool {
    #[cfg(feature = "neo4j")]
    Neo4j(neo4j::Neo4jPool),
    /// Serves schema, fragment composition, and request-tree construction without a live store;
    /// reads and writes fail with [`Error::DriverError`].
    NoDatabase,
}

impl Default for DatabasePool {
    fn default() -> Self {
        DatabasePool::NoDatabase
    }
}

#[async_trait]
impl GraphDriver for DatabasePool {
    async fn read_transaction(&self) -> Result<Box<dyn ReadTransaction>, Error> {
        match self {
            #[cfg(feature = "neo4j")]
            DatabasePool::Neo4j(pool) => pool.read_transaction().await,
            DatabasePool::NoDatabase => Err(Error::DriverError {
                message: "no database backend is configured".to_string(),
            }),
        }
    }

    async fn write_transaction(&self) -> Result<Box<dyn WriteTransaction>, Error> {
        match self {
            #[cfg(feature = "neo4j")]
            DatabasePool::Neo4j(pool) => pool.write_transaction().await,
            DatabasePool::NoDatabase => Err(Error::DriverError {
                message: "no database backend is configured".to_string(),
            }),
        }
    }
}
