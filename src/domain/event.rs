//! Audit events, comments and attachments.
//!
//! Events and comments are kept in separate stores. Events are produced by
//! the engine for identity-link and attachment changes; comments are
//! written by users. Nothing the engine logs ever appears as a comment.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Separator between the parts of an event message.
pub const MESSAGE_PARTS_MARKER: &str = "_|_";

/// What an [`Event`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventAction {
    /// A user identity link was added.
    AddUserLink,
    /// A user identity link was removed.
    DeleteUserLink,
    /// A group identity link was added.
    AddGroupLink,
    /// A group identity link was removed.
    DeleteGroupLink,
    /// An attachment was added.
    AddAttachment,
    /// An attachment was removed.
    DeleteAttachment,
}

impl EventAction {
    /// Action code as stored.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AddUserLink => "AddUserLink",
            Self::DeleteUserLink => "DeleteUserLink",
            Self::AddGroupLink => "AddGroupLink",
            Self::DeleteGroupLink => "DeleteGroupLink",
            Self::AddAttachment => "AddAttachment",
            Self::DeleteAttachment => "DeleteAttachment",
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Joins message parts with [`MESSAGE_PARTS_MARKER`].
///
/// # Examples
///
/// ```
/// use taskscope::domain::encode_message_parts;
///
/// assert_eq!(encode_message_parts(&["kermit", "candidate"]), "kermit_|_candidate");
/// ```
pub fn encode_message_parts<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(MESSAGE_PARTS_MARKER)
}

/// An immutable audit record for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Task the event belongs to.
    pub task_id: String,
    /// Owning process instance, if any.
    pub process_instance_id: Option<String>,
    /// What happened.
    pub action: EventAction,
    /// Encoded message parts.
    pub message: String,
    /// When it happened.
    pub time: DateTime<Utc>,
    /// Insertion order across the engine.
    pub sequence: u64,
}

impl Event {
    /// Splits the message back into its parts.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::Utc;
    /// use taskscope::domain::{Event, EventAction};
    ///
    /// let event = Event {
    ///     task_id: "t1".into(),
    ///     process_instance_id: None,
    ///     action: EventAction::AddGroupLink,
    ///     message: "sales_|_candidate".into(),
    ///     time: Utc::now(),
    ///     sequence: 1,
    /// };
    /// assert_eq!(event.message_parts(), vec!["sales", "candidate"]);
    /// ```
    pub fn message_parts(&self) -> Vec<String> {
        self.message
            .split(MESSAGE_PARTS_MARKER)
            .map(String::from)
            .collect()
    }
}

/// Builds the short form of a comment message: whitespace runs collapse
/// to one space and messages longer than `max_len` characters are cut to
/// `max_len - 3` characters followed by `...`.
///
/// # Examples
///
/// ```
/// use taskscope::domain::summarize_message;
///
/// assert_eq!(summarize_message("a \n\t b", 163), "a b");
/// assert_eq!(summarize_message("abcdef", 5), "ab...");
/// ```
pub fn summarize_message(full: &str, max_len: usize) -> String {
    let collapsed = full.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > max_len {
        let keep = max_len.saturating_sub(3);
        let mut short: String = collapsed.chars().take(keep).collect();
        short.push_str("...");
        short
    } else {
        collapsed
    }
}

/// A user comment on a task or process instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Comment id.
    pub id: String,
    /// Task the comment is on, if any.
    pub task_id: Option<String>,
    /// Process instance the comment is on, if any.
    pub process_instance_id: Option<String>,
    /// Author.
    pub user_id: Option<String>,
    /// When written or last edited.
    pub time: DateTime<Utc>,
    /// Short message.
    pub message: String,
    /// Verbatim message.
    pub full_message: String,
    /// Insertion order across the engine.
    pub sequence: u64,
}

/// A file or link attached to a task or process instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Attachment id.
    pub id: String,
    /// Display name; also the message of its audit events.
    pub name: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Free-form type, e.g. a MIME type.
    pub attachment_type: Option<String>,
    /// Task the attachment belongs to, if any.
    pub task_id: Option<String>,
    /// Process instance the attachment belongs to, if any.
    pub process_instance_id: Option<String>,
    /// Location of the attached resource.
    pub url: Option<String>,
    /// When created.
    pub create_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_keeps_short_messages() {
        let msg = "x".repeat(163);
        assert_eq!(summarize_message(&msg, 163), msg);
    }

    #[test]
    fn summary_truncates_long_messages_to_160_plus_ellipsis() {
        let msg = "y".repeat(164);
        let short = summarize_message(&msg, 163);
        assert_eq!(short.chars().count(), 163);
        assert!(short.ends_with("..."));
        assert_eq!(&short[..160], &msg[..160]);
    }

    #[test]
    fn summary_collapses_whitespace() {
        assert_eq!(
            summarize_message("  this   is\n\na\tcomment ", 163),
            "this is a comment"
        );
    }

    #[test]
    fn action_codes() {
        assert_eq!(EventAction::AddUserLink.to_string(), "AddUserLink");
        assert_eq!(EventAction::DeleteAttachment.as_str(), "DeleteAttachment");
    }

    #[test]
    fn single_part_message() {
        let event = Event {
            task_id: "t".into(),
            process_instance_id: None,
            action: EventAction::AddAttachment,
            message: encode_message_parts(&["invoice.pdf"]),
            time: Utc::now(),
            sequence: 0,
        };
        assert_eq!(event.message_parts(), vec!["invoice.pdf".to_string()]);
    }
}
