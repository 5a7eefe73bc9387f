//! Provides the [`Error`] type for vertexdb
//!
//! Every error the engine can return is a flat, non-nested enum variant: no layer wraps another
//! layer's error type, matching the propagation policy described for the engine (validation and
//! integrity errors unwind the active transaction and surface directly to the caller; compile-time
//! composer/request-builder errors never reach the store).

use std::fmt::{Display, Formatter};
use std::num::ParseIntError;

/// Error type for vertexdb.
///
/// # Examples
///
/// ```rust
/// use vertexdb::Error;
///
/// let e = Error::EmptyResultError;
/// ```
#[derive(Debug)]
pub enum Error {
    /// Returned by the undo facility when the target action deleted nodes, or declared no
    /// `invert` implementation.
    ActionNotUndoableError { action_id: String },

    /// Returned if `runAs` is given an action type with no matching registration.
    ActionNotRegistered { action_type: String },

    /// Returned if `pullOne` finds more than one matching record.
    AmbiguousResultError { count: usize },

    /// Returned when a wide-integer field's value falls outside the supported 128-bit range.
    BigIntRangeError { field: String },

    /// Returned if two node types are registered under the same label.
    ConfigItemDuplicated { type_name: String },

    /// Returned if a `.env`-style configuration value cannot be read.
    ConfigOpenFailed { source: std::io::Error },

    /// Returned if a value returned by the driver cannot be decoded into the shape the caller
    /// requested.
    DeserializationFailed { source: serde_json::Error },

    /// Returned when a fragment sets a parameter name that is already bound, either because the
    /// caller called `withParams` twice with the same key, or because a nested fragment's
    /// explicit params collide with the outer fragment's.
    DuplicateParamError { name: String },

    /// Wraps an error surfaced by the underlying graph driver (connection, protocol, or
    /// query-execution failure).
    DriverError { message: String },

    /// Returned if an environment variable required to build a `DatabasePool` is not set.
    EnvironmentVariableNotFound { name: String },

    /// Returned if an environment variable that should parse to a port number or pool size does
    /// not.
    EnvironmentVariableNotParsed { source: ParseIntError },

    /// Returned if `pullOne` finds zero matching records.
    EmptyResultError,

    /// Returned if a user id passed to `runAs` does not resolve to a user node (and is not the
    /// well-known system user id).
    InvalidUserError { user_id: String },

    /// Returned at compile time if a `HAS KEY $name` occurrence has no bound value for `$name`.
    MissingKeyParamError { name: String },

    /// Returned when a `ToOneRequired`/`ToOneOrNone` relationship has more than one edge, or a
    /// `ToManyUnique` relationship has parallel edges between the same pair of nodes.
    RelationshipCardinalityError { rel_name: String },

    /// Returned when a `ToOneRequired` relationship has no edge.
    RelationshipRequiredError { rel_name: String },

    /// Returned when a relationship edge targets a node type outside its declared allowed set.
    RelationshipTargetInvalid { rel_name: String, label: String },

    /// Returned if the driver's response is missing an item the engine expected, such as a
    /// returned property or column.
    ResponseItemNotFound { name: String },

    /// Returned if the driver's response set is empty where the engine expected at least one row,
    /// most likely indicating an internal bug.
    ResponseSetNotFound,

    /// Returned if an element of the schema registry (a type, property, or relationship) cannot
    /// be found by name. Most likely indicates an internal bug.
    SchemaItemNotFound { name: String },

    /// Returned if a transaction is used after it has already been committed or rolled back.
    TransactionFinished,

    /// Returned if a value of one type cannot be converted to another, e.g. a driver value that
    /// doesn't match the shape a field declaration expects.
    TypeConversionFailed { src: String, dst: String },

    /// Returned if an action's `apply` mutated a node whose id does not appear in the
    /// `modifiedNodes` set it declared.
    UndeclaredModificationError { kind: String, node_id: String },

    /// Returned if a fragment or request references a node-type label that has not (yet, and
    /// never will be, at compile time) been registered.
    UnregisteredTypeError { label: String },

    /// Returned if a data-request builder method names a property the target node type does not
    /// declare.
    UnknownPropertyError { prop: String },

    /// Returned by the field system when a value does not validate against its field declaration.
    /// No implicit coercion is ever attempted; this is the one variant that is always
    /// user-facing.
    ValidationError {
        field: Option<String>,
        reason: String,
    },
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Error::ActionNotUndoableError { action_id } => write!(
                f,
                "Action {} cannot be undone: it deleted nodes, or declares no inverse",
                action_id
            ),
            Error::ActionNotRegistered { action_type } => {
                write!(f, "No action is registered with type {}", action_type)
            }
            Error::AmbiguousResultError { count } => write!(
                f,
                "Expected exactly one result but found {} matching records",
                count
            ),
            Error::BigIntRangeError { field } => write!(
                f,
                "Value for field {} overflows the supported wide-integer range",
                field
            ),
            Error::ConfigItemDuplicated { type_name } => {
                write!(f, "A node type is already registered under label {}", type_name)
            }
            Error::ConfigOpenFailed { source } => {
                write!(f, "Configuration could not be read. Source error: {}", source)
            }
            Error::DeserializationFailed { source } => {
                write!(f, "Failed to decode a result value. Source error: {}", source)
            }
            Error::DuplicateParamError { name } => {
                write!(f, "Parameter {} is already bound on this fragment", name)
            }
            Error::DriverError { message } => write!(f, "Graph driver error: {}", message),
            Error::EnvironmentVariableNotFound { name } => {
                write!(f, "Could not find environment variable: {}", name)
            }
            Error::EnvironmentVariableNotParsed { source } => write!(
                f,
                "Failed to parse environment variable as an integer. Source error: {}",
                source
            ),
            Error::EmptyResultError => write!(f, "Expected exactly one result but found none"),
            Error::InvalidUserError { user_id } => write!(
                f,
                "User id {} does not resolve to a known user node",
                user_id
            ),
            Error::MissingKeyParamError { name } => write!(
                f,
                "HAS KEY ${} has no bound parameter value at compile time",
                name
            ),
            Error::RelationshipCardinalityError { rel_name } => write!(
                f,
                "Relationship {} violates its declared cardinality",
                rel_name
            ),
            Error::RelationshipRequiredError { rel_name } => {
                write!(f, "Required relationship {} is missing", rel_name)
            }
            Error::RelationshipTargetInvalid { rel_name, label } => write!(
                f,
                "Relationship {} targets a node labeled {}, which is not in its allowed set",
                rel_name, label
            ),
            Error::ResponseItemNotFound { name } => write!(
                f,
                "Could not find an expected item, {}, in the database response",
                name
            ),
            Error::ResponseSetNotFound => {
                write!(f, "Could not find an expected set of results in the database response")
            }
            Error::SchemaItemNotFound { name } => write!(
                f,
                "The following item could not be found in the schema: {}",
                name
            ),
            Error::TransactionFinished => write!(
                f,
                "Cannot use a transaction that has already been committed or rolled back"
            ),
            Error::TypeConversionFailed { src, dst } => {
                write!(f, "The value {} could not be converted to type {}", src, dst)
            }
            Error::UndeclaredModificationError { kind, node_id } => write!(
                f,
                "Action modified node {} ({}) without declaring it in modifiedNodes",
                node_id, kind
            ),
            Error::UnregisteredTypeError { label } => {
                write!(f, "No node type is registered under label {}", label)
            }
            Error::UnknownPropertyError { prop } => write!(
                f,
                "Requested property {} is not declared on this node type",
                prop
            ),
            Error::ValidationError { field, reason } => match field {
                Some(field) => write!(f, "Validation failed for field {}: {}", field, reason),
                None => write!(f, "Validation failed: {}", reason),
            },
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ConfigOpenFailed { source } => Some(source),
            Error::DeserializationFailed { source } => Some(source),
            Error::EnvironmentVariableNotParsed { source } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::ConfigOpenFailed { source: e }
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(e: std::num::ParseIntError) -> Self {
        Error::EnvironmentVariableNotParsed { source: e }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::DeserializationFailed { source: e }
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    /// Passes if a new error with no wrapped source error is created
    #[test]
    fn new_error() {
        let e = Error::EmptyResultError;
        assert!(std::error::Error::source(&e).is_none());
    }

    /// Passes if an error prints a display string correctly
    #[test]
    fn display_fmt() {
        let e = Error::UnregisteredTypeError {
            label: "Movie".to_string(),
        };
        assert_eq!(
            "No node type is registered under label Movie",
            &format!("{}", e)
        );
    }

    /// Passes if Error implements the Send trait
    #[test]
    fn test_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Error>();
    }

    /// Passes if Error implements the Sync trait
    #[test]
    fn test_sync() {
        fn assert_sync<T: Sync>() {}
        assert_sync::<Error>();
    }
}
