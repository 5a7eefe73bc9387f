//! Bolt protocol driver (section 6), built on the teacher's declared but previously-unwired
//! `bolt-client`/`bolt-proto`/`mobc`/`mobc-boltrs` stack.

use crate::engine::database::{env_string, env_u16, GraphDriver, ReadTransaction, Row, WriteTransaction};
use crate::engine::fragment::Fragment;
use crate::engine::value::{GraphNode, GraphPath, GraphRelationship, Value};
use crate::Error;
use async_trait::async_trait;
use bolt_client::{Metadata, Params};
use bolt_proto::message::Message;
use bolt_proto::value::Node as BoltNode;
use bolt_proto::value::Relationship as BoltRelationship;
use mobc::{Connection, Pool};
use mobc_boltrs::Manager;
use std::collections::HashMap;
use std::convert::{TryFrom, TryInto};
use std::iter::FromIterator;

/// Collects what's needed to open a connection pool against a Neo4j instance speaking Bolt.
///
/// # Examples
///
/// ```rust,no_run
/// # use vertexdb::engine::database::neo4j::Neo4jEndpoint;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let endpoint = Neo4jEndpoint::from_env()?;
/// # Ok(())
/// # }
/// ```
pub struct Neo4jEndpoint {
    host: String,
    port: u16,
    user: String,
    pass: String,
    pool_size: u16,
}

impl Neo4jEndpoint {
    pub fn new(host: String, port: u16, user: String, pass: String, pool_size: u16) -> Self {
        Neo4jEndpoint { host, port, user, pass, pool_size }
    }

    /// Reads the connection from the environment:
    ///
    /// * `VDB_NEO4J_HOST` - the host address for the Neo4j instance.
    /// * `VDB_NEO4J_PORT` - the Bolt port, typically `7687`.
    /// * `VDB_NEO4J_USER` - the username to authenticate with.
    /// * `VDB_NEO4J_PASS` - the password to authenticate with.
    /// * `VDB_NEO4J_POOL_SIZE` - connection pool size. Optional, defaults to `num_cpus::get()`.
    pub fn from_env() -> Result<Neo4jEndpoint, Error> {
        Ok(Neo4jEndpoint {
            host: env_string("VDB_NEO4J_HOST")?,
            port: env_u16("VDB_NEO4J_PORT")?,
            user: env_string("VDB_NEO4J_USER")?,
            pass: env_string("VDB_NEO4J_PASS")?,
            pool_size: env_u16("VDB_NEO4J_POOL_SIZE")
                .unwrap_or_else(|_| num_cpus::get().try_into().unwrap_or(8)),
        })
    }

    pub async fn pool(&self) -> Result<Neo4jPool, Error> {
        let manager = Manager::new(
            self.host.to_string() + ":" + &self.port.to_string(),
            None,
            [4, 0, 0, 0],
            Metadata::from_iter(vec![
                ("user_agent", "vertexdb/0.1.0"),
                ("scheme", "basic"),
                ("principal", &self.user),
                ("credentials", &self.pass),
            ]),
        )
        .await
        .map_err(|e| Error::DriverError { message: e.to_string() })?;

        Ok(Neo4jPool {
            pool: Pool::builder().max_open(self.pool_size.into()).build(manager),
        })
    }
}

#[derive(Clone)]
pub struct Neo4jPool {
    pool: Pool<Manager>,
}

#[async_trait]
impl GraphDriver for Neo4jPool {
    async fn read_transaction(&self) -> Result<Box<dyn ReadTransaction>, Error> {
        Ok(Box::new(Neo4jTransaction::begin(self.connection().await?).await?))
    }

    async fn write_transaction(&self) -> Result<Box<dyn WriteTransaction>, Error> {
        Ok(Box::new(Neo4jTransaction::begin(self.connection().await?).await?))
    }
}

impl Neo4jPool {
    async fn connection(&self) -> Result<Connection<Manager>, Error> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::DriverError { message: e.to_string() })
    }
}

pub(crate) struct Neo4jTransaction {
    client: Connection<Manager>,
    finished: bool,
}

impl Neo4jTransaction {
    async fn begin(mut client: Connection<Manager>) -> Result<Neo4jTransaction, Error> {
        match client.begin(None).await {
            Ok(Message::Success(_)) => Ok(Neo4jTransaction { client, finished: false }),
            Ok(message) => Err(Error::DriverError {
                message: format!("BEGIN was rejected by the server: {:?}", message),
            }),
            Err(e) => Err(Error::DriverError { message: e.to_string() }),
        }
    }

    async fn run(&mut self, fragment: &Fragment) -> Result<Vec<Row>, Error> {
        if self.finished {
            return Err(Error::TransactionFinished);
        }

        let query = fragment.query_string()?;
        let params = fragment.params()?;

        self.client
            .run(query, Some(Params::from(params)), None)
            .await
            .map_err(|e| Error::DriverError { message: e.to_string() })?;

        let pull_meta = Metadata::from_iter(vec![("n", -1i8)]);
        let (records, response) = self
            .client
            .pull(Some(pull_meta))
            .await
            .map_err(|e| Error::DriverError { message: e.to_string() })?;

        match response {
            Message::Success(_) => (),
            message => {
                return Err(Error::DriverError {
                    message: format!("PULL was rejected by the server: {:?}", message),
                })
            }
        }

        let shape = fragment.return_shape();
        records
            .into_iter()
            .map(|record| decode_row(record.fields(), shape))
            .collect()
    }
}

#[async_trait]
impl ReadTransaction for Neo4jTransaction {
    async fn run(&mut self, fragment: &Fragment) -> Result<Vec<Row>, Error> {
        Neo4jTransaction::run(self, fragment).await
    }
}

#[async_trait]
impl WriteTransaction for Neo4jTransaction {
    async fn run(&mut self, fragment: &Fragment) -> Result<Vec<Row>, Error> {
        Neo4jTransaction::run(self, fragment).await
    }

    async fn commit(&mut self) -> Result<(), Error> {
        if self.finished {
            return Err(Error::TransactionFinished);
        }
        self.finished = true;
        self.client
            .commit()
            .await
            .map(|_| ())
            .map_err(|e| Error::DriverError { message: e.to_string() })
    }

    async fn rollback(&mut self) -> Result<(), Error> {
        if self.finished {
            return Err(Error::TransactionFinished);
        }
        self.finished = true;
        self.client
            .rollback()
            .await
            .map(|_| ())
            .map_err(|e| Error::DriverError { message: e.to_string() })
    }
}

fn decode_row(fields: &[bolt_proto::Value], shape: Option<&[String]>) -> Result<Row, Error> {
    let columns = match shape {
        Some(names) => names
            .iter()
            .zip(fields.iter())
            .map(|(name, value)| Ok((name.clone(), Value::try_from(value.clone())?)))
            .collect::<Result<HashMap<String, Value>, Error>>()?,
        None => fields
            .iter()
            .enumerate()
            .map(|(i, value)| Ok((i.to_string(), Value::try_from(value.clone())?)))
            .collect::<Result<HashMap<String, Value>, Error>>()?,
    };
    Ok(Row { columns })
}

impl TryFrom<bolt_proto::Value> for Value {
    type Error = Error;

    fn try_from(bv: bolt_proto::Value) -> Result<Value, Error> {
        match bv {
            bolt_proto::Value::Null => Ok(Value::Null),
            bolt_proto::Value::Boolean(b) => Ok(Value::Bool(b)),
            bolt_proto::Value::Integer(i) => Ok(Value::Int64(i)),
            bolt_proto::Value::Float(f) => Ok(Value::Float64(f)),
            bolt_proto::Value::String(s) => Ok(Value::String(s)),
            bolt_proto::Value::List(items) => Ok(Value::List(
                items.into_iter().map(Value::try_from).collect::<Result<Vec<_>, _>>()?,
            )),
            bolt_proto::Value::Map(map) => Ok(Value::Map(
                map.into_iter()
                    .map(|(k, v)| Ok((k, Value::try_from(v)?)))
                    .collect::<Result<HashMap<String, Value>, Error>>()?,
            )),
            bolt_proto::Value::Node(n) => Ok(Value::Node(graph_node(n)?)),
            bolt_proto::Value::Relationship(r) => Ok(Value::Relationship(graph_relationship(r)?)),
            bolt_proto::Value::Path(p) => Ok(Value::Path(GraphPath {
                nodes: p
                    .nodes()
                    .iter()
                    .cloned()
                    .map(graph_node)
                    .collect::<Result<Vec<_>, _>>()?,
                relationships: p
                    .relationships()
                    .iter()
                    .cloned()
                    .map(|r| graph_relationship(r.into()))
                    .collect::<Result<Vec<_>, _>>()?,
            })),
            other => Err(Error::TypeConversionFailed {
                src: format!("{:?}", other),
                dst: "Value".to_string(),
            }),
        }
    }
}

fn graph_node(n: BoltNode) -> Result<GraphNode, Error> {
    let id = n
        .properties()
        .get("id")
        .cloned()
        .ok_or_else(|| Error::ResponseItemNotFound { name: "id".to_string() })
        .and_then(Value::try_from)
        .and_then(String::try_from)?;
    let props = n
        .properties()
        .iter()
        .map(|(k, v)| Ok((k.clone(), Value::try_from(v.clone())?)))
        .collect::<Result<HashMap<String, Value>, Error>>()?;
    Ok(GraphNode { id, labels: n.labels().clone(), props })
}

fn graph_relationship(r: BoltRelationship) -> Result<GraphRelationship, Error> {
    let id = r.rel_identity().to_string();
    let props = r
        .properties()
        .iter()
        .map(|(k, v)| Ok((k.clone(), Value::try_from(v.clone())?)))
        .collect::<Result<HashMap<String, Value>, Error>>()?;
    Ok(GraphRelationship {
        id,
        rel_type: r.rel_type().to_string(),
        start_id: r.start_node_identity().to_string(),
        end_id: r.end_node_identity().to_string(),
        props,
    })
}

impl From<Value> for bolt_proto::Value {
    fn from(v: Value) -> bolt_proto::Value {
        match v {
            Value::Null => bolt_proto::Value::Null,
            Value::Bool(b) => b.into(),
            Value::Int64(i) => i.into(),
            Value::Float64(f) => f.into(),
            Value::String(s) => s.into(),
            Value::BigInt(i) => i.to_string().into(),
            Value::Date(d) => d.to_string().into(),
            Value::Timestamp(t) => t.to_rfc3339().into(),
            Value::List(items) => items.into_iter().map(bolt_proto::Value::from).collect::<Vec<_>>().into(),
            Value::Map(m) => m
                .into_iter()
                .map(|(k, v)| (k, bolt_proto::Value::from(v)))
                .collect::<HashMap<String, bolt_proto::Value>>()
                .into(),
            // Graph response shapes are never sent as parameters, only received.
            Value::Node(_) | Value::Relationship(_) | Value::Path(_) => bolt_proto::Value::Null,
        }
    }
}
