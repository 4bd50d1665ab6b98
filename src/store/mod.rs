//! Storage boundary.
//!
//! [`StorageBackend`] is the dumb versioned KV contract; [`InMemoryBackend`]
//! is the bundled implementation. The engine builds one [`WriteBatch`] per
//! operation, after all validation, and hands it to
//! [`StorageBackend::commit`].

pub mod backend;
pub mod memory;

pub use backend::{
    escape_key_part, kind_prefix, make_child_key, make_key, make_prefix, parse_key,
    unescape_key_part, StorageBackend, StorageError, VersionedRecord, WriteBatch, WriteOp,
};
pub use memory::InMemoryBackend;

/// Key kinds used by the engine.
pub mod keys {
    /// Task rows: `task:{task_id}`.
    pub const TASK: &str = "task";
    /// Task-local variables: `variable:{task_id}:{name}`.
    pub const VARIABLE: &str = "variable";
    /// Identity links: `link:{task_id}:{type}:{u|g}:{identity}`.
    pub const LINK: &str = "link";
    /// Audit events: `event:{task_id}:{event_id}`.
    pub const EVENT: &str = "event";
    /// Comments: `comment:{comment_id}`.
    pub const COMMENT: &str = "comment";
    /// Attachments: `attachment:{attachment_id}`.
    pub const ATTACHMENT: &str = "attachment";
    /// Stored filters: `filter:{filter_id}`.
    pub const FILTER: &str = "filter";

    /// Human-readable entity label for a key kind.
    pub fn entity_label(kind: &str) -> &'static str {
        match kind {
            TASK => "Task",
            VARIABLE => "VariableInstance",
            LINK => "IdentityLink",
            EVENT => "Event",
            COMMENT => "Comment",
            ATTACHMENT => "Attachment",
            FILTER => "Filter",
            _ => "Entity",
        }
    }
}
