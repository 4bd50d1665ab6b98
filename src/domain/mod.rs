//! Engine entities.
//!
//! Plain serde types persisted by the engine. They carry no storage or
//! policy logic beyond small in-memory helpers.

pub mod event;
pub mod identity_link;
pub mod task;
pub mod variables;

pub use event::{
    encode_message_parts, summarize_message, Attachment, Comment, Event, EventAction,
    MESSAGE_PARTS_MARKER,
};
pub use identity_link::{IdentityLink, IdentityLinkType, LinkIdentity};
pub use task::{DelegationState, SuspensionState, Task, TaskState, DEFAULT_PRIORITY, RESERVED_ID};
pub use variables::{TypedValue, VariableInstance, VariableMap};
