//! Error types for task engine operations.
//!
//! Provides [`TaskError`], the single error type surfaced by every public
//! engine operation, and [`ErrorKind`], a coarse classification suitable
//! for mapping onto transport status codes.

use thiserror::Error;

/// Coarse classification of a [`TaskError`].
///
/// # Examples
///
/// ```
/// use taskscope::{ErrorKind, TaskError};
///
/// let err = TaskError::NotValid("parent task does not exist".to_string());
/// assert_eq!(err.kind(), ErrorKind::BadRequest);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A concurrent writer got there first, or the entity is held by someone else.
    Conflict,
    /// The request itself is malformed or violates a rule.
    BadRequest,
    /// A referenced entity does not exist.
    NotFound,
    /// The operation is disabled or not permitted.
    Forbidden,
    /// An internal or storage failure.
    Internal,
}

/// Errors that can occur during task engine operations.
///
/// Each variant carries enough context to render a caller-facing message.
/// Use [`kind`](TaskError::kind) to classify the failure.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A write was based on a stale revision of the entity.
    #[error(
        "{entity}[{id}] was updated by another transaction concurrently \
         (expected revision {expected}, found {actual})"
    )]
    OptimisticLocking {
        /// Entity type label, e.g. `Task`.
        entity: &'static str,
        /// Entity id.
        id: String,
        /// Revision the writer read.
        expected: u64,
        /// Revision found in storage (0 if the row is gone).
        actual: u64,
    },

    /// The reserved identifier `*` was used where a concrete id is required.
    #[error("{context}: id cannot be *. * is a reserved identifier.")]
    InvalidIdentifier {
        /// Where the identifier was used.
        context: String,
    },

    /// The operation is disabled by configuration or structurally forbidden.
    #[error("{0}")]
    NotAllowed(String),

    /// The request is malformed (bad expression, forbidden expression, oversized value).
    #[error("{0}")]
    BadRequest(String),

    /// A variable was read with an accessor that does not match its stored type.
    #[error("variable '{name}' holds a value of type {actual}, not {expected}")]
    TypeMismatch {
        /// Variable name.
        name: String,
        /// Type requested by the caller.
        expected: &'static str,
        /// Type actually stored.
        actual: &'static str,
    },

    /// A referenced entity does not exist.
    #[error("Cannot find {entity} with id {id}")]
    NotFound {
        /// Entity type label, e.g. `task`.
        entity: &'static str,
        /// Entity id.
        id: String,
    },

    /// Input failed validation (missing parent, bad query usage, empty name).
    #[error("{0}")]
    NotValid(String),

    /// The task is assigned to a different user.
    #[error("Task '{task_id}' is already claimed by someone else.")]
    AlreadyClaimed {
        /// The task being claimed.
        task_id: String,
        /// The user currently holding the task.
        assignee: String,
    },

    /// A generic engine failure, e.g. a stored query violating the expression policy.
    #[error("{0}")]
    Engine(String),

    /// Backend storage or serialization failure.
    #[error("store error: {0}")]
    Store(String),
}

impl TaskError {
    /// Returns the coarse [`ErrorKind`] for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OptimisticLocking { .. } | Self::AlreadyClaimed { .. } => ErrorKind::Conflict,
            Self::InvalidIdentifier { .. }
            | Self::BadRequest(_)
            | Self::TypeMismatch { .. }
            | Self::NotValid(_) => ErrorKind::BadRequest,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::NotAllowed(_) => ErrorKind::Forbidden,
            Self::Engine(_) | Self::Store(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for a missing task.
    pub fn task_not_found(task_id: &str) -> Self {
        Self::NotFound {
            entity: "task",
            id: task_id.to_string(),
        }
    }

    /// Returns `true` for [`TaskError::OptimisticLocking`].
    pub fn is_optimistic_locking(&self) -> bool {
        matches!(self, Self::OptimisticLocking { .. })
    }
}
