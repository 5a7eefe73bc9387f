//! vertexdb is an object-modeling framework for labeled-property-graph stores that speak a
//! Cypher-like query language. Application code declares *node types* — a label, a typed
//! property schema, typed relationships to other node types, and derived "virtual" properties
//! built from graph traversals — then mutates the graph through *actions* (atomic, auditable,
//! undoable commands) and reads it through *pulls* (declarative, tree-shaped data requests
//! compiled to a single query and materialized as typed result trees).
//!
//! The crate is organized around four tightly coupled subsystems:
//!
//! * [`engine::schema`] — the schema registry and field system: typed properties,
//!   relationships, and virtual/derived properties, plus label-inheritance handling.
//! * [`engine::fragment`] — a composable, auto-parameterizing query-string builder with a
//!   `HAS KEY` key-lookup rewriter.
//! * [`engine::action`] — the action runner: a command pipeline that wraps every mutating
//!   transaction with validation, provenance, and undo.
//! * [`engine::pull`] — the pull compiler: lowers a [`engine::request::PullRequest`] tree into a
//!   single query and projects results into typed trees.
//!
//! vertexdb does not dial a database on its own; it consumes a [`engine::database::GraphDriver`]
//! supplied by the embedding application (a Bolt/Neo4j implementation is provided behind the
//! `neo4j` feature, and an in-memory implementation is always available for tests).

pub use engine::Engine;
pub use error::Error;

pub mod engine;
mod error;
