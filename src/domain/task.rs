//! The task entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier reserved for "any"; never valid as a concrete id.
pub const RESERVED_ID: &str = "*";

/// Priority given to tasks that do not set one.
pub const DEFAULT_PRIORITY: i32 = 50;

/// Delegation state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DelegationState {
    /// Delegated and waiting to be resolved back to the owner.
    Pending,
    /// Resolved back to the owner.
    Resolved,
}

/// Whether the task may be worked on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuspensionState {
    /// Workable.
    #[default]
    Active,
    /// Suspended along with its process instance.
    Suspended,
}

/// Persistence state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Inserted by its first save.
    Created,
    /// Saved again after creation.
    Updated,
}

/// A human task.
///
/// A task is built in memory with [`Task::new`] and becomes durable on its
/// first save, which assigns revision 1. The revision is never serialized;
/// it is the storage version of the row and is restored on load.
///
/// # Examples
///
/// ```
/// use taskscope::domain::Task;
///
/// let mut task = Task::with_id("approve-invoice");
/// task.name = Some("Approve invoice".to_string());
/// assert!(task.is_standalone());
/// assert!(!task.is_persisted());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task id; assigned on first save when absent.
    pub id: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// Free-text description.
    pub description: Option<String>,
    /// User currently responsible for the task.
    pub assignee: Option<String>,
    /// User who owns the task and receives it back after delegation.
    pub owner: Option<String>,
    /// Priority; higher is more urgent.
    pub priority: i32,
    /// Due date.
    pub due_date: Option<DateTime<Utc>>,
    /// Follow-up date.
    pub follow_up_date: Option<DateTime<Utc>>,
    /// Parent task, for subtasks.
    pub parent_task_id: Option<String>,
    /// Delegation state, if ever delegated.
    pub delegation_state: Option<DelegationState>,
    /// Owning process instance.
    pub process_instance_id: Option<String>,
    /// Owning execution; the entry point into the variable scope chain.
    pub execution_id: Option<String>,
    /// Process definition id.
    pub process_definition_id: Option<String>,
    /// Process definition key, used by definition-level authorizations.
    pub process_definition_key: Option<String>,
    /// Owning case instance.
    pub case_instance_id: Option<String>,
    /// Owning case execution.
    pub case_execution_id: Option<String>,
    /// Tenant.
    pub tenant_id: Option<String>,
    /// Suspension state.
    #[serde(default)]
    pub suspension_state: SuspensionState,
    /// Persistence state.
    pub task_state: Option<TaskState>,
    /// Set once by the first save.
    pub create_time: Option<DateTime<Utc>>,
    /// Null until the first mutation after creation.
    pub last_updated: Option<DateTime<Utc>>,
    /// Storage revision; 0 until first saved.
    #[serde(skip)]
    pub revision: u64,
}

impl Default for Task {
    fn default() -> Self {
        Self {
            id: None,
            name: None,
            description: None,
            assignee: None,
            owner: None,
            priority: DEFAULT_PRIORITY,
            due_date: None,
            follow_up_date: None,
            parent_task_id: None,
            delegation_state: None,
            process_instance_id: None,
            execution_id: None,
            process_definition_id: None,
            process_definition_key: None,
            case_instance_id: None,
            case_execution_id: None,
            tenant_id: None,
            suspension_state: SuspensionState::Active,
            task_state: None,
            create_time: None,
            last_updated: None,
            revision: 0,
        }
    }
}

impl Task {
    /// A new, unsaved task without an id.
    pub fn new() -> Self {
        Self::default()
    }

    /// A new, unsaved task with a caller-chosen id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// The id, or `""` for a task that has none yet.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    /// Returns `true` once the task has been saved.
    pub fn is_persisted(&self) -> bool {
        self.revision > 0
    }

    /// Returns `true` if the task has no process or case context.
    pub fn is_standalone(&self) -> bool {
        self.execution_id.is_none()
            && self.process_instance_id.is_none()
            && self.case_execution_id.is_none()
            && self.case_instance_id.is_none()
    }

    /// Returns `true` if the task is bound to a running execution.
    pub fn is_part_of_execution(&self) -> bool {
        self.execution_id.is_some() || self.case_execution_id.is_some()
    }

    /// Returns `true` if delegated and not yet resolved.
    pub fn is_delegation_pending(&self) -> bool {
        self.delegation_state == Some(DelegationState::Pending)
    }

    /// Returns `true` if suspended.
    pub fn is_suspended(&self) -> bool {
        self.suspension_state == SuspensionState::Suspended
    }

    /// Delegates in memory: the assignee becomes owner if there is none,
    /// then `user_id` becomes assignee.
    pub fn delegate(&mut self, user_id: impl Into<String>) {
        self.delegation_state = Some(DelegationState::Pending);
        if self.owner.is_none() {
            self.owner = self.assignee.clone();
        }
        self.assignee = Some(user_id.into());
    }

    /// Resolves in memory: the owner becomes assignee again.
    pub fn resolve(&mut self) {
        self.delegation_state = Some(DelegationState::Resolved);
        self.assignee = self.owner.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_defaults() {
        let task = Task::new();
        assert_eq!(task.id(), "");
        assert_eq!(task.priority, DEFAULT_PRIORITY);
        assert!(!task.is_persisted());
        assert!(task.is_standalone());
        assert!(!task.is_suspended());
    }

    #[test]
    fn delegate_keeps_existing_owner() {
        let mut task = Task::with_id("t");
        task.owner = Some("fozzie".into());
        task.assignee = Some("kermit".into());
        task.delegate("gonzo");
        assert_eq!(task.owner.as_deref(), Some("fozzie"));
        assert_eq!(task.assignee.as_deref(), Some("gonzo"));
        assert!(task.is_delegation_pending());
    }

    #[test]
    fn delegate_promotes_assignee_to_owner() {
        let mut task = Task::with_id("t");
        task.assignee = Some("kermit".into());
        task.delegate("gonzo");
        assert_eq!(task.owner.as_deref(), Some("kermit"));

        task.resolve();
        assert_eq!(task.assignee.as_deref(), Some("kermit"));
        assert_eq!(task.delegation_state, Some(DelegationState::Resolved));
    }

    #[test]
    fn execution_context_is_not_standalone() {
        let mut task = Task::new();
        task.case_instance_id = Some("case".into());
        assert!(!task.is_standalone());
        assert!(!task.is_part_of_execution());

        task.execution_id = Some("exec".into());
        assert!(task.is_part_of_execution());
    }

    #[test]
    fn revision_is_not_serialized() {
        let mut task = Task::with_id("t");
        task.revision = 7;
        let json = serde_json::to_value(&task).unwrap();
        assert!(json.get("revision").is_none());
        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back.revision, 0);
    }
}
