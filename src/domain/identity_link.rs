//! Identity links: who may work on, owns, or is assigned to a task.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Kind of relation between an identity and a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityLinkType {
    /// May claim the task.
    Candidate,
    /// Currently assigned.
    Assignee,
    /// Owns the task.
    Owner,
}

impl IdentityLinkType {
    /// Wire name of the type, also used in event messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Candidate => "candidate",
            Self::Assignee => "assignee",
            Self::Owner => "owner",
        }
    }
}

impl fmt::Display for IdentityLinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentityLinkType {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "candidate" => Ok(Self::Candidate),
            "assignee" => Ok(Self::Assignee),
            "owner" => Ok(Self::Owner),
            other => Err(TaskError::BadRequest(format!(
                "unknown identity link type '{other}'"
            ))),
        }
    }
}

/// The identity on one end of a link; exactly one of user or group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum LinkIdentity {
    /// A user id.
    User(String),
    /// A group id.
    Group(String),
}

/// Relation between a task and a user or group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityLink {
    /// The linked task.
    pub task_id: String,
    /// Relation kind.
    pub link_type: IdentityLinkType,
    /// The linked user or group.
    pub identity: LinkIdentity,
}

impl IdentityLink {
    /// A link to a user.
    pub fn user(task_id: impl Into<String>, user_id: impl Into<String>, link_type: IdentityLinkType) -> Self {
        Self {
            task_id: task_id.into(),
            link_type,
            identity: LinkIdentity::User(user_id.into()),
        }
    }

    /// A link to a group.
    pub fn group(task_id: impl Into<String>, group_id: impl Into<String>, link_type: IdentityLinkType) -> Self {
        Self {
            task_id: task_id.into(),
            link_type,
            identity: LinkIdentity::Group(group_id.into()),
        }
    }

    /// The user id, for user links.
    pub fn user_id(&self) -> Option<&str> {
        match &self.identity {
            LinkIdentity::User(id) => Some(id),
            LinkIdentity::Group(_) => None,
        }
    }

    /// The group id, for group links.
    pub fn group_id(&self) -> Option<&str> {
        match &self.identity {
            LinkIdentity::Group(id) => Some(id),
            LinkIdentity::User(_) => None,
        }
    }

    /// Returns `true` for a candidate link to `group_id`.
    pub fn is_candidate_group(&self, group_id: &str) -> bool {
        self.link_type == IdentityLinkType::Candidate && self.group_id() == Some(group_id)
    }

    /// Returns `true` for a candidate link to `user_id`.
    pub fn is_candidate_user(&self, user_id: &str) -> bool {
        self.link_type == IdentityLinkType::Candidate && self.user_id() == Some(user_id)
    }

    /// Key suffix under the task's link prefix. Identical links share it,
    /// which makes re-adding a link idempotent.
    pub(crate) fn storage_suffix(&self) -> String {
        match &self.identity {
            LinkIdentity::User(id) => format!("{}:u:{id}", self.link_type),
            LinkIdentity::Group(id) => format!("{}:g:{id}", self.link_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_round_trips_through_str() {
        for t in [
            IdentityLinkType::Candidate,
            IdentityLinkType::Assignee,
            IdentityLinkType::Owner,
        ] {
            assert_eq!(t.as_str().parse::<IdentityLinkType>().unwrap(), t);
        }
        assert!("manager".parse::<IdentityLinkType>().is_err());
    }

    #[test]
    fn user_and_group_are_exclusive() {
        let link = IdentityLink::user("t1", "kermit", IdentityLinkType::Candidate);
        assert_eq!(link.user_id(), Some("kermit"));
        assert_eq!(link.group_id(), None);
        assert!(link.is_candidate_user("kermit"));
        assert!(!link.is_candidate_group("kermit"));

        let link = IdentityLink::group("t1", "sales", IdentityLinkType::Candidate);
        assert_eq!(link.group_id(), Some("sales"));
        assert!(link.is_candidate_group("sales"));
    }

    #[test]
    fn storage_suffix_distinguishes_users_and_groups() {
        let user = IdentityLink::user("t1", "x", IdentityLinkType::Candidate);
        let group = IdentityLink::group("t1", "x", IdentityLinkType::Candidate);
        assert_ne!(user.storage_suffix(), group.storage_suffix());
        assert_eq!(user.storage_suffix(), "candidate:u:x");
    }
}
