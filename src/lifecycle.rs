//! Task lifecycle: save, claim, delegation, completion, deletion, subtasks
//! and identity links.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::authorization::{Grant, Grantee, Permission, Resource};
use crate::domain::{
    EventAction, IdentityLink, IdentityLinkType, Task, TaskState, VariableMap, RESERVED_ID,
};
use crate::engine::TaskEngine;
use crate::error::TaskError;
use crate::scope::ScopeHandle;
use crate::store::keys;
use crate::store::{make_child_key, make_key, StorageBackend, WriteBatch};

const STANDALONE_DISABLED: &str =
    "Cannot save standalone task. They are disabled in the process engine configuration.";
const PART_OF_PROCESS: &str = "The task cannot be deleted because is part of a running process";
const DELEGATED_COMPLETION: &str =
    "A delegated task cannot be completed, but should be resolved instead.";

fn link_key(link: &IdentityLink) -> String {
    make_child_key(keys::LINK, &link.task_id, &link.storage_suffix())
}

impl<B: StorageBackend> TaskEngine<B> {
    // ---- Creation and save ----

    /// A new in-memory task without an id; persisted by [`save_task`](Self::save_task).
    pub fn new_task(&self) -> Task {
        Task::new()
    }

    /// A new in-memory task with a caller-chosen id.
    pub fn new_task_with_id(&self, id: impl Into<String>) -> Task {
        Task::with_id(id)
    }

    /// Rejects the reserved identity when default authorizations are on.
    fn check_identity(&self, role: &str, identity: Option<&str>) -> Result<(), TaskError> {
        if self.config().authorization_enabled && identity == Some(RESERVED_ID) {
            warn!(role, "rejected reserved identity");
            return Err(TaskError::InvalidIdentifier {
                context: format!("Cannot create default authorization for {role} {RESERVED_ID}"),
            });
        }
        Ok(())
    }

    /// Grants READ and UPDATE on the task to `grantee` when authorization is on.
    async fn grant_task_access(&self, task_id: &str, grantee: Grantee) -> Result<(), TaskError> {
        if !self.config().authorization_enabled {
            return Ok(());
        }
        self.authorization()
            .grant(Grant {
                grantee,
                resource: Resource::Task,
                resource_id: task_id.to_string(),
                permissions: vec![Permission::Read, Permission::Update],
            })
            .await
    }

    async fn grant_user_access(&self, task_id: &str, user_id: Option<&str>) -> Result<(), TaskError> {
        match user_id {
            Some(user) => self.grant_task_access(task_id, Grantee::User(user.to_string())).await,
            None => Ok(()),
        }
    }

    /// Inserts or updates `task`.
    ///
    /// The first save assigns an id if missing, sets the create time,
    /// leaves `last_updated` empty and yields revision 1. It also drops
    /// local variables left behind under the same id by a non-cascading
    /// [`delete_task`](Self::delete_task). Later saves
    /// require the in-memory revision to match the stored one, set
    /// `last_updated` and increment the revision. On failure `task` is
    /// left untouched.
    ///
    /// # Errors
    ///
    /// - [`TaskError::InvalidIdentifier`] if the id is `*`.
    /// - [`TaskError::NotAllowed`] for a standalone task while standalone tasks are disabled.
    /// - [`TaskError::NotValid`] if the parent task does not exist.
    /// - [`TaskError::OptimisticLocking`] if the task was changed or removed concurrently.
    pub async fn save_task(&self, task: &mut Task) -> Result<(), TaskError> {
        if task.id.as_deref() == Some(RESERVED_ID) {
            warn!("rejected task with reserved id");
            return Err(TaskError::InvalidIdentifier {
                context: format!("Entity Task[{RESERVED_ID}] has an invalid id"),
            });
        }
        if task.is_standalone() && !self.config().standalone_tasks_enabled {
            warn!(task_id = task.id(), "rejected standalone task");
            return Err(TaskError::NotAllowed(STANDALONE_DISABLED.to_string()));
        }
        self.check_identity("assignee", task.assignee.as_deref())?;
        self.check_identity("owner", task.owner.as_deref())?;
        if let Some(parent) = &task.parent_task_id {
            if self.load_task(parent).await?.is_none() {
                return Err(TaskError::NotValid(format!(
                    "Cannot find task with id {parent}: parent task is null"
                )));
            }
        }

        let now = self.now();
        let mut staged = task.clone();
        let mut batch = WriteBatch::new();

        let previous = if task.is_persisted() {
            let stored = self.load_task(task.id()).await?.ok_or_else(|| {
                TaskError::OptimisticLocking {
                    entity: "Task",
                    id: task.id().to_string(),
                    expected: task.revision,
                    actual: 0,
                }
            })?;
            staged.create_time = stored.create_time;
            staged.last_updated = Some(now);
            staged.task_state = Some(TaskState::Updated);
            let data = Self::encode("Task", &staged)?;
            batch.update(make_key(keys::TASK, staged.id()), data, task.revision);
            Some(stored)
        } else {
            staged
                .id
                .get_or_insert_with(|| Uuid::new_v4().to_string());
            staged.create_time = Some(now);
            staged.last_updated = None;
            staged.task_state = Some(TaskState::Created);
            let data = Self::encode("Task", &staged)?;
            batch.insert(make_key(keys::TASK, staged.id()), data);
            // Variables kept by a non-cascading delete of an earlier task
            // with this id do not carry over.
            for name in self.task_local_variables(staged.id()).await?.into_keys() {
                batch.delete(make_child_key(keys::VARIABLE, staged.id(), &name));
            }
            None
        };

        let versions = self.commit(batch).await?;
        staged.revision = versions.first().copied().unwrap_or(task.revision + 1);
        *task = staged;

        let assignee_changed =
            previous.as_ref().map(|p| p.assignee.as_deref()) != Some(task.assignee.as_deref());
        let owner_changed =
            previous.as_ref().map(|p| p.owner.as_deref()) != Some(task.owner.as_deref());
        if assignee_changed {
            self.grant_user_access(task.id(), task.assignee.as_deref()).await?;
        }
        if owner_changed {
            self.grant_user_access(task.id(), task.owner.as_deref()).await?;
        }

        info!(task_id = task.id(), revision = task.revision, "task saved");
        Ok(())
    }

    /// Loads a task by id.
    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>, TaskError> {
        self.load_task(task_id).await
    }

    /// Direct children of `parent_task_id`, ordered by id.
    pub async fn get_sub_tasks(&self, parent_task_id: &str) -> Result<Vec<Task>, TaskError> {
        let mut children: Vec<Task> = self
            .load_all_tasks()
            .await?
            .into_iter()
            .filter(|t| t.parent_task_id.as_deref() == Some(parent_task_id))
            .collect();
        children.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(children)
    }

    fn check_not_suspended(task: &Task, action: &str) -> Result<(), TaskError> {
        if task.is_suspended() {
            warn!(task_id = task.id(), action, "rejected action on suspended task");
            return Err(TaskError::NotAllowed(format!(
                "Cannot {action} task '{}': task is suspended",
                task.id()
            )));
        }
        Ok(())
    }

    // ---- Assignment ----

    /// Claims the task for `user_id`, or unclaims it with `None`.
    ///
    /// Claiming again as the current assignee only touches the task.
    ///
    /// # Errors
    ///
    /// - [`TaskError::AlreadyClaimed`] if another user is assignee.
    pub async fn claim(&self, task_id: &str, user_id: Option<&str>) -> Result<(), TaskError> {
        self.check_identity("assignee", user_id)?;
        self.update_task(task_id, |task| {
            Self::check_not_suspended(task, "claim")?;
            if let (Some(user), Some(current)) = (user_id, task.assignee.as_deref()) {
                if current != user {
                    warn!(task_id, user_id = user, assignee = current, "task already claimed");
                    return Err(TaskError::AlreadyClaimed {
                        task_id: task_id.to_string(),
                        assignee: current.to_string(),
                    });
                }
            }
            task.assignee = user_id.map(String::from);
            Ok(())
        })
        .await?;
        self.grant_user_access(task_id, user_id).await?;
        debug!(task_id, user_id, "task claimed");
        Ok(())
    }

    /// Sets the assignee without the claim check.
    pub async fn set_assignee(&self, task_id: &str, user_id: Option<&str>) -> Result<(), TaskError> {
        self.check_identity("assignee", user_id)?;
        self.update_task(task_id, |task| {
            task.assignee = user_id.map(String::from);
            Ok(())
        })
        .await?;
        self.grant_user_access(task_id, user_id).await?;
        debug!(task_id, user_id, "assignee set");
        Ok(())
    }

    /// Sets the owner.
    pub async fn set_owner(&self, task_id: &str, user_id: Option<&str>) -> Result<(), TaskError> {
        self.check_identity("owner", user_id)?;
        self.update_task(task_id, |task| {
            task.owner = user_id.map(String::from);
            Ok(())
        })
        .await?;
        self.grant_user_access(task_id, user_id).await?;
        debug!(task_id, user_id, "owner set");
        Ok(())
    }

    /// Sets the priority.
    pub async fn set_priority(&self, task_id: &str, priority: i32) -> Result<(), TaskError> {
        self.update_task(task_id, |task| {
            task.priority = priority;
            Ok(())
        })
        .await?;
        debug!(task_id, priority, "priority set");
        Ok(())
    }

    /// Sets the name.
    pub async fn set_name(&self, task_id: &str, name: Option<&str>) -> Result<(), TaskError> {
        self.update_task(task_id, |task| {
            task.name = name.map(String::from);
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Sets the description.
    pub async fn set_description(
        &self,
        task_id: &str,
        description: Option<&str>,
    ) -> Result<(), TaskError> {
        self.update_task(task_id, |task| {
            task.description = description.map(String::from);
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Sets the due date.
    pub async fn set_due_date(
        &self,
        task_id: &str,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<(), TaskError> {
        self.update_task(task_id, |task| {
            task.due_date = due_date;
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Sets the follow-up date.
    pub async fn set_follow_up_date(
        &self,
        task_id: &str,
        follow_up_date: Option<DateTime<Utc>>,
    ) -> Result<(), TaskError> {
        self.update_task(task_id, |task| {
            task.follow_up_date = follow_up_date;
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Delegates the task to `user_id`, keeping the owner for [`resolve`](Self::resolve).
    pub async fn delegate(&self, task_id: &str, user_id: &str) -> Result<(), TaskError> {
        self.check_identity("assignee", Some(user_id))?;
        let task = self
            .update_task(task_id, |task| {
                Self::check_not_suspended(task, "delegate")?;
                task.delegate(user_id);
                Ok(())
            })
            .await?;
        self.grant_user_access(task_id, Some(user_id)).await?;
        self.grant_user_access(task_id, task.owner.as_deref()).await?;
        info!(task_id, user_id, owner = task.owner.as_deref(), "task delegated");
        Ok(())
    }

    /// Hands a delegated task back to its owner.
    pub async fn resolve(&self, task_id: &str) -> Result<(), TaskError> {
        let task = self
            .update_task(task_id, |task| {
                Self::check_not_suspended(task, "resolve")?;
                task.resolve();
                Ok(())
            })
            .await?;
        info!(task_id, assignee = task.assignee.as_deref(), "task resolved");
        Ok(())
    }

    // ---- Completion and deletion ----

    /// Stages removal of the task row, its identity links and, optionally,
    /// its local variables.
    async fn stage_task_removal(
        &self,
        task: &Task,
        remove_variables: bool,
        batch: &mut WriteBatch,
    ) -> Result<(), TaskError> {
        batch.delete_if_version(make_key(keys::TASK, task.id()), task.revision);
        for link in self.load_links(task.id()).await? {
            batch.delete(link_key(&link));
        }
        if remove_variables {
            for name in self.task_local_variables(task.id()).await?.into_keys() {
                batch.delete(make_child_key(keys::VARIABLE, task.id(), &name));
            }
        }
        Ok(())
    }

    /// Completes the task: writes `variables` with `set_variables`
    /// semantics, then removes the task with its links and local variables.
    ///
    /// Variables bound for an execution are handed to the
    /// [`ExecutionScopeProvider`](crate::ExecutionScopeProvider) after the
    /// removal commits. Unknown executions are rejected before anything is
    /// written.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotValid`] if the task is delegated and not resolved.
    pub async fn complete(&self, task_id: &str, variables: VariableMap) -> Result<(), TaskError> {
        let task = self.require_task(task_id).await?;
        Self::check_not_suspended(&task, "complete")?;
        if task.is_delegation_pending() {
            warn!(task_id, "rejected completion of delegated task");
            return Err(TaskError::NotValid(DELEGATED_COMPLETION.to_string()));
        }
        for (name, value) in &variables {
            self.check_variable_length(name, value)?;
        }

        let scope = ScopeHandle::task(task_id);
        let chain = self.scope_chain(&scope).await?;
        let mut writes = Vec::with_capacity(variables.len());
        for (name, value) in variables {
            writes.push(self.plan_set(&chain, name, value).await?);
        }
        // Task-local targets disappear with the task.
        writes.retain(|w| !matches!(w.target, ScopeHandle::Task(_)));

        self.check_execution_targets(&writes).await?;

        let mut batch = WriteBatch::new();
        self.stage_task_removal(&task, true, &mut batch).await?;
        self.commit(batch).await?;
        self.apply_execution_writes(writes).await?;

        info!(task_id, "task completed");
        Ok(())
    }

    /// Deletes a task. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotAllowed`] if the task belongs to a running execution.
    pub async fn delete_task(&self, task_id: &str, cascade: bool) -> Result<(), TaskError> {
        self.delete_tasks(&[task_id], cascade).await
    }

    /// Deletes several tasks in one unit of work. Unknown ids are ignored;
    /// if any task belongs to a running execution nothing is deleted.
    pub async fn delete_tasks<S: AsRef<str>>(
        &self,
        task_ids: &[S],
        cascade: bool,
    ) -> Result<(), TaskError> {
        let mut batch = WriteBatch::new();
        let mut staged = HashSet::new();
        for task_id in task_ids {
            let task_id = task_id.as_ref();
            if !staged.insert(task_id) {
                continue;
            }
            let Some(task) = self.load_task(task_id).await? else {
                debug!(task_id, "ignoring delete of unknown task");
                continue;
            };
            if task.is_part_of_execution() {
                warn!(task_id, "rejected delete of task bound to an execution");
                return Err(TaskError::NotAllowed(PART_OF_PROCESS.to_string()));
            }
            self.stage_task_removal(&task, cascade, &mut batch).await?;
        }
        self.commit(batch).await?;
        info!(requested = staged.len(), cascade, "tasks deleted");
        Ok(())
    }

    // ---- Identity links ----

    /// Adds a candidate user.
    pub async fn add_candidate_user(&self, task_id: &str, user_id: &str) -> Result<(), TaskError> {
        self.add_user_identity_link(task_id, user_id, IdentityLinkType::Candidate)
            .await
    }

    /// Adds a candidate group.
    pub async fn add_candidate_group(&self, task_id: &str, group_id: &str) -> Result<(), TaskError> {
        self.add_group_identity_link(task_id, group_id, IdentityLinkType::Candidate)
            .await
    }

    /// Removes a candidate user.
    pub async fn delete_candidate_user(&self, task_id: &str, user_id: &str) -> Result<(), TaskError> {
        self.delete_user_identity_link(task_id, user_id, IdentityLinkType::Candidate)
            .await
    }

    /// Removes a candidate group.
    pub async fn delete_candidate_group(
        &self,
        task_id: &str,
        group_id: &str,
    ) -> Result<(), TaskError> {
        self.delete_group_identity_link(task_id, group_id, IdentityLinkType::Candidate)
            .await
    }

    /// Links a user. Assignee and owner links set the task field; candidate
    /// links add a row. Every call logs an event.
    pub async fn add_user_identity_link(
        &self,
        task_id: &str,
        user_id: &str,
        link_type: IdentityLinkType,
    ) -> Result<(), TaskError> {
        self.check_identity(link_type.as_str(), Some(user_id))?;
        let mut task = self.require_task(task_id).await?;
        let mut batch = WriteBatch::new();
        match link_type {
            IdentityLinkType::Assignee => task.assignee = Some(user_id.to_string()),
            IdentityLinkType::Owner => task.owner = Some(user_id.to_string()),
            IdentityLinkType::Candidate => {
                let link = IdentityLink::user(task_id, user_id, link_type);
                batch.put(link_key(&link), Self::encode("IdentityLink", &link)?);
            },
        }
        self.stage_event(
            &task,
            EventAction::AddUserLink,
            &[user_id, link_type.as_str()],
            &mut batch,
        )?;
        self.stage_touch(&mut task, &mut batch)?;
        self.commit(batch).await?;
        Self::task_committed(&mut task);

        self.grant_user_access(task_id, Some(user_id)).await?;
        debug!(task_id, user_id, link_type = %link_type, "user link added");
        Ok(())
    }

    /// Links a group.
    pub async fn add_group_identity_link(
        &self,
        task_id: &str,
        group_id: &str,
        link_type: IdentityLinkType,
    ) -> Result<(), TaskError> {
        self.check_identity(link_type.as_str(), Some(group_id))?;
        let mut task = self.require_task(task_id).await?;
        let link = IdentityLink::group(task_id, group_id, link_type);
        let mut batch = WriteBatch::new();
        batch.put(link_key(&link), Self::encode("IdentityLink", &link)?);
        self.stage_event(
            &task,
            EventAction::AddGroupLink,
            &[group_id, link_type.as_str()],
            &mut batch,
        )?;
        self.stage_touch(&mut task, &mut batch)?;
        self.commit(batch).await?;
        Self::task_committed(&mut task);

        self.grant_task_access(task_id, Grantee::Group(group_id.to_string()))
            .await?;
        debug!(task_id, group_id, link_type = %link_type, "group link added");
        Ok(())
    }

    /// Unlinks a user. Assignee and owner links clear the task field.
    pub async fn delete_user_identity_link(
        &self,
        task_id: &str,
        user_id: &str,
        link_type: IdentityLinkType,
    ) -> Result<(), TaskError> {
        let mut task = self.require_task(task_id).await?;
        let mut batch = WriteBatch::new();
        match link_type {
            IdentityLinkType::Assignee => task.assignee = None,
            IdentityLinkType::Owner => task.owner = None,
            IdentityLinkType::Candidate => {
                let link = IdentityLink::user(task_id, user_id, link_type);
                batch.delete(link_key(&link));
            },
        }
        self.stage_event(
            &task,
            EventAction::DeleteUserLink,
            &[user_id, link_type.as_str()],
            &mut batch,
        )?;
        self.stage_touch(&mut task, &mut batch)?;
        self.commit(batch).await?;
        debug!(task_id, user_id, link_type = %link_type, "user link deleted");
        Ok(())
    }

    /// Unlinks a group.
    pub async fn delete_group_identity_link(
        &self,
        task_id: &str,
        group_id: &str,
        link_type: IdentityLinkType,
    ) -> Result<(), TaskError> {
        let mut task = self.require_task(task_id).await?;
        let link = IdentityLink::group(task_id, group_id, link_type);
        let mut batch = WriteBatch::new();
        batch.delete(link_key(&link));
        self.stage_event(
            &task,
            EventAction::DeleteGroupLink,
            &[group_id, link_type.as_str()],
            &mut batch,
        )?;
        self.stage_touch(&mut task, &mut batch)?;
        self.commit(batch).await?;
        debug!(task_id, group_id, link_type = %link_type, "group link deleted");
        Ok(())
    }

    /// Every identity link of the task, with assignee and owner reported as links.
    pub async fn get_identity_links(&self, task_id: &str) -> Result<Vec<IdentityLink>, TaskError> {
        let task = self.require_task(task_id).await?;
        let mut links = Vec::new();
        if let Some(assignee) = &task.assignee {
            links.push(IdentityLink::user(task_id, assignee, IdentityLinkType::Assignee));
        }
        if let Some(owner) = &task.owner {
            links.push(IdentityLink::user(task_id, owner, IdentityLinkType::Owner));
        }
        links.extend(self.load_links(task_id).await?);
        Ok(links)
    }
}
