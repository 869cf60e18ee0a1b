//! Database error types.
//!
//! [`DbError`] is the single error type of the transaction, index and
//! connection layers. Validation errors are raised before any I/O, so a
//! failed `persist` or `commit` never leaves partial state behind.

use thiserror::Error;

use strand_core::{CoreError, Gid, Hash, InstanceId, Value, ValueType};
use strand_storage::StorageError;

use crate::entity::TempId;

/// Errors produced by strand-db operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// A fact names an attribute that is not in the schema.
    #[error("unknown attribute '{attr}'")]
    UnknownAttribute { attr: String },

    /// A value does not have the attribute's declared type.
    #[error("attribute '{attr}' expects {expected}, got {found}")]
    TypeMismatch {
        attr: String,
        expected: ValueType,
        found: ValueType,
    },

    /// An attribute definition is malformed or tries to change an existing one.
    #[error("invalid attribute '{name}': {reason}")]
    InvalidAttribute { name: String, reason: String },

    /// Another entity already holds this value of a unique attribute.
    #[error("unique attribute '{attr}' value {value} already held by {existing}")]
    UniquenessViolation {
        attr: String,
        value: Value,
        existing: Gid,
    },

    /// A scalar attribute received more than one distinct value.
    #[error("entity {entity} has several values for scalar attribute '{attr}'")]
    MultipleValuesForScalarAttribute { entity: Gid, attr: String },

    /// Two drafts of one entity disagree in the same persist call.
    #[error("conflicting drafts for entity {entity}")]
    ConflictingEntityStates { entity: Gid },

    /// A reference points at a temp id that is not part of the persist call.
    #[error("reference to unknown temp id {temp}")]
    UnresolvedTempId { temp: TempId },

    /// The head moved since the transaction took its snapshot.
    #[error("concurrent modification: expected head {expected}, found {actual}")]
    ConcurrentModification { expected: Hash, actual: Hash },

    /// The transaction already lost a commit race and cannot be reused.
    #[error("transaction failed on a conflicting commit")]
    TransactionConflicted,

    #[error("transaction already rolled back")]
    TransactionAlreadyRolledBack,

    /// A referenced node cannot be resolved.
    #[error("corrupted graph: node {hash} cannot be resolved")]
    CorruptedGraph { hash: Hash },

    /// Appending onto a parent that is not durably stored.
    #[error("node store error: {reason}")]
    NodeStoreError { reason: String },

    /// The database has no `Instance` entity for this instance.
    #[error("unknown instance {instance}")]
    UnknownInstance { instance: InstanceId },

    #[error("instance {instance} has no instance ids left to fork")]
    InstanceSpaceExhausted { instance: InstanceId },

    /// An environment setting could not be parsed.
    #[error("invalid configuration {key}={value}")]
    Config { key: String, value: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Core(CoreError),
}

impl From<CoreError> for DbError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::CorruptedGraph { hash } => DbError::CorruptedGraph { hash },
            CoreError::InvalidAttribute { name, reason } => {
                DbError::InvalidAttribute { name, reason }
            }
            CoreError::InstanceSpaceExhausted { instance } => {
                DbError::InstanceSpaceExhausted { instance }
            }
            other => DbError::Core(other),
        }
    }
}

impl DbError {
    /// Validation failures: the transaction was rejected before any I/O.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DbError::UnknownAttribute { .. }
                | DbError::TypeMismatch { .. }
                | DbError::InvalidAttribute { .. }
                | DbError::UniquenessViolation { .. }
                | DbError::MultipleValuesForScalarAttribute { .. }
                | DbError::ConflictingEntityStates { .. }
                | DbError::UnresolvedTempId { .. }
        )
    }

    /// Lost a commit race; retrying on a fresh transaction may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DbError::ConcurrentModification { .. })
    }
}
