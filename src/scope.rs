//! Hierarchical variable scopes.
//!
//! A task scope holds task-local variables and, when the task belongs to
//! an execution, chains up through that execution and its ancestors.
//! Execution-side variables live behind [`ExecutionScopeProvider`]; the
//! engine never stores them itself.
//!
//! Reads walk the chain nearest-first. A non-local write updates the
//! nearest scope already holding the name; a new name goes to the first
//! execution of the chain, or to the task itself for a standalone task.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::domain::{TypedValue, VariableInstance, VariableMap};
use crate::engine::TaskEngine;
use crate::error::TaskError;
use crate::store::keys;
use crate::store::{make_child_key, make_prefix, StorageBackend, WriteBatch};

/// Addresses one variable scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeHandle {
    /// Task-local scope.
    Task(String),
    /// Execution scope, owned by the provider.
    Execution(String),
}

impl ScopeHandle {
    /// A task scope.
    pub fn task(task_id: impl Into<String>) -> Self {
        Self::Task(task_id.into())
    }

    /// An execution scope.
    pub fn execution(execution_id: impl Into<String>) -> Self {
        Self::Execution(execution_id.into())
    }

    /// The task or execution id.
    pub fn id(&self) -> &str {
        match self {
            Self::Task(id) | Self::Execution(id) => id,
        }
    }
}

impl fmt::Display for ScopeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(id) => write!(f, "task {id}"),
            Self::Execution(id) => write!(f, "execution {id}"),
        }
    }
}

/// A scope followed by its ancestors, nearest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeChain {
    scopes: Vec<ScopeHandle>,
}

impl ScopeChain {
    /// The scope the chain starts from.
    pub fn local(&self) -> &ScopeHandle {
        &self.scopes[0]
    }

    /// Every scope, nearest first.
    pub fn scopes(&self) -> &[ScopeHandle] {
        &self.scopes
    }

    /// Where a variable unknown to every scope is created.
    fn default_target(&self) -> &ScopeHandle {
        self.scopes
            .iter()
            .find(|s| matches!(s, ScopeHandle::Execution(_)))
            .unwrap_or(&self.scopes[0])
    }
}

/// Source of execution scopes.
///
/// Implemented by the process runtime hosting the engine.
#[async_trait]
pub trait ExecutionScopeProvider: Send + Sync {
    /// Returns `true` if the execution exists.
    async fn exists(&self, execution_id: &str) -> Result<bool, TaskError>;

    /// The parent execution, `None` for a process instance.
    async fn parent_of(&self, execution_id: &str) -> Result<Option<String>, TaskError>;

    /// The execution's own variables.
    async fn local_variables(&self, execution_id: &str) -> Result<VariableMap, TaskError>;

    /// Creates or overwrites one variable of the execution.
    async fn set_local_variable(
        &self,
        execution_id: &str,
        name: &str,
        value: TypedValue,
    ) -> Result<(), TaskError>;

    /// Removes one variable; returns `false` if it did not exist.
    async fn remove_local_variable(&self, execution_id: &str, name: &str)
        -> Result<bool, TaskError>;
}

#[derive(Debug, Default, Clone)]
struct ExecutionNode {
    parent: Option<String>,
    variables: VariableMap,
}

/// [`ExecutionScopeProvider`] over an in-process execution tree.
#[derive(Debug, Default)]
pub struct InMemoryExecutionScopes {
    nodes: DashMap<String, ExecutionNode>,
}

fn execution_not_found(execution_id: &str) -> TaskError {
    TaskError::NotFound {
        entity: "execution",
        id: execution_id.to_string(),
    }
}

impl InMemoryExecutionScopes {
    /// An empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, id: &str, parent: Option<String>) -> Result<(), TaskError> {
        match self.nodes.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(TaskError::Engine(format!(
                "execution with id '{id}' already exists"
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(ExecutionNode {
                    parent,
                    variables: VariableMap::new(),
                });
                Ok(())
            },
        }
    }

    /// Adds a root execution.
    pub fn create_process_instance(&self, id: &str) -> Result<(), TaskError> {
        self.insert(id, None)
    }

    /// Adds an execution below `parent_id`.
    pub fn create_child_execution(&self, parent_id: &str, id: &str) -> Result<(), TaskError> {
        if !self.nodes.contains_key(parent_id) {
            return Err(execution_not_found(parent_id));
        }
        self.insert(id, Some(parent_id.to_string()))
    }
}

#[async_trait]
impl ExecutionScopeProvider for InMemoryExecutionScopes {
    async fn exists(&self, execution_id: &str) -> Result<bool, TaskError> {
        Ok(self.nodes.contains_key(execution_id))
    }

    async fn parent_of(&self, execution_id: &str) -> Result<Option<String>, TaskError> {
        self.nodes
            .get(execution_id)
            .map(|n| n.parent.clone())
            .ok_or_else(|| execution_not_found(execution_id))
    }

    async fn local_variables(&self, execution_id: &str) -> Result<VariableMap, TaskError> {
        self.nodes
            .get(execution_id)
            .map(|n| n.variables.clone())
            .ok_or_else(|| execution_not_found(execution_id))
    }

    async fn set_local_variable(
        &self,
        execution_id: &str,
        name: &str,
        value: TypedValue,
    ) -> Result<(), TaskError> {
        let mut node = self
            .nodes
            .get_mut(execution_id)
            .ok_or_else(|| execution_not_found(execution_id))?;
        node.variables.insert(name.to_string(), value);
        Ok(())
    }

    async fn remove_local_variable(
        &self,
        execution_id: &str,
        name: &str,
    ) -> Result<bool, TaskError> {
        let mut node = self
            .nodes
            .get_mut(execution_id)
            .ok_or_else(|| execution_not_found(execution_id))?;
        Ok(node.variables.remove(name).is_some())
    }
}

/// One staged variable change; `value: None` removes the variable.
#[derive(Debug, Clone)]
pub(crate) struct PlannedWrite {
    pub target: ScopeHandle,
    pub name: String,
    pub value: Option<TypedValue>,
}

impl<B: StorageBackend> TaskEngine<B> {
    /// Rejects values longer than the configured maximum.
    pub(crate) fn check_variable_length(
        &self,
        name: &str,
        value: &TypedValue,
    ) -> Result<(), TaskError> {
        let max = self.config().max_variable_length;
        if value.checked_length() > max {
            warn!(name, max, "rejected oversized variable value");
            return Err(TaskError::BadRequest(format!(
                "Variable value is too long: '{name}' exceeds {max} characters"
            )));
        }
        Ok(())
    }

    async fn require_scope(&self, scope: &ScopeHandle) -> Result<(), TaskError> {
        match scope {
            ScopeHandle::Task(id) => self.require_task(id).await.map(|_| ()),
            ScopeHandle::Execution(id) => {
                if self.execution_scopes().exists(id).await? {
                    Ok(())
                } else {
                    Err(execution_not_found(id))
                }
            },
        }
    }

    /// Resolves `scope` and its ancestors.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] if the task or an execution is unknown.
    /// - [`TaskError::Engine`] if the execution tree has a cycle.
    pub async fn scope_chain(&self, scope: &ScopeHandle) -> Result<ScopeChain, TaskError> {
        let mut next = match scope {
            ScopeHandle::Task(id) => self.require_task(id).await?.execution_id,
            ScopeHandle::Execution(id) => self.execution_scopes().parent_of(id).await?,
        };
        let mut scopes = vec![scope.clone()];
        let mut seen = HashSet::new();
        if let ScopeHandle::Execution(id) = scope {
            seen.insert(id.clone());
        }
        while let Some(execution_id) = next {
            if !seen.insert(execution_id.clone()) {
                return Err(TaskError::Engine(format!(
                    "cycle in execution tree at {execution_id}"
                )));
            }
            next = self.execution_scopes().parent_of(&execution_id).await?;
            scopes.push(ScopeHandle::Execution(execution_id));
        }
        Ok(ScopeChain { scopes })
    }

    pub(crate) async fn task_local_variables(&self, task_id: &str) -> Result<VariableMap, TaskError> {
        let rows = self
            .backend()
            .list_by_prefix(&make_prefix(keys::VARIABLE, task_id))
            .await
            .map_err(Self::map_storage_error)?;
        let mut variables = VariableMap::with_capacity(rows.len());
        for (_, record) in rows {
            let variable: VariableInstance = Self::decode("VariableInstance", &record.data)?;
            if variable.task_id == task_id {
                variables.insert(variable.name, variable.value);
            }
        }
        Ok(variables)
    }

    async fn local_variables_of(&self, scope: &ScopeHandle) -> Result<VariableMap, TaskError> {
        match scope {
            ScopeHandle::Task(id) => self.task_local_variables(id).await,
            ScopeHandle::Execution(id) => self.execution_scopes().local_variables(id).await,
        }
    }

    async fn local_variable_of(
        &self,
        scope: &ScopeHandle,
        name: &str,
    ) -> Result<Option<TypedValue>, TaskError> {
        match scope {
            ScopeHandle::Task(id) => {
                let record = self
                    .backend()
                    .try_get(&make_child_key(keys::VARIABLE, id, name))
                    .await
                    .map_err(Self::map_storage_error)?;
                match record {
                    Some(r) => {
                        let variable: VariableInstance =
                            Self::decode("VariableInstance", &r.data)?;
                        Ok((variable.task_id == *id).then_some(variable.value))
                    },
                    None => Ok(None),
                }
            },
            ScopeHandle::Execution(id) => Ok(self
                .execution_scopes()
                .local_variables(id)
                .await?
                .remove(name)),
        }
    }

    async fn find_holder(
        &self,
        chain: &ScopeChain,
        name: &str,
    ) -> Result<Option<ScopeHandle>, TaskError> {
        for scope in chain.scopes() {
            if self.local_variable_of(scope, name).await?.is_some() {
                return Ok(Some(scope.clone()));
            }
        }
        Ok(None)
    }

    pub(crate) async fn plan_set(
        &self,
        chain: &ScopeChain,
        name: String,
        value: TypedValue,
    ) -> Result<PlannedWrite, TaskError> {
        let target = match self.find_holder(chain, &name).await? {
            Some(holder) => holder,
            None => chain.default_target().clone(),
        };
        Ok(PlannedWrite {
            target,
            name,
            value: Some(value),
        })
    }

    /// Fails if an execution targeted by `writes` no longer exists. Runs
    /// before the task batch is committed.
    pub(crate) async fn check_execution_targets(
        &self,
        writes: &[PlannedWrite],
    ) -> Result<(), TaskError> {
        let mut checked = HashSet::new();
        for write in writes {
            let ScopeHandle::Execution(execution_id) = &write.target else {
                continue;
            };
            if checked.insert(execution_id.as_str())
                && !self.execution_scopes().exists(execution_id).await?
            {
                warn!(execution_id = %execution_id, "rejected write to unknown execution");
                return Err(execution_not_found(execution_id));
            }
        }
        Ok(())
    }

    /// Commits task-scope writes in one batch that also touches the task,
    /// then forwards execution-scope writes to the provider.
    ///
    /// Execution variables are owned by the [`ExecutionScopeProvider`] and
    /// are not part of the storage batch. Every targeted execution is
    /// checked before the batch commits; a provider error raised after
    /// the commit is returned to the caller, and the committed task-scope
    /// writes stay in place.
    async fn apply_writes(&self, writes: Vec<PlannedWrite>) -> Result<(), TaskError> {
        self.check_execution_targets(&writes).await?;
        let (local, remote): (Vec<_>, Vec<_>) = writes
            .into_iter()
            .partition(|w| matches!(w.target, ScopeHandle::Task(_)));

        if let Some(first) = local.first() {
            let mut task = self.require_task(first.target.id()).await?;
            let now = self.now();
            let mut batch = WriteBatch::new();
            for write in &local {
                let key = make_child_key(keys::VARIABLE, task.id(), &write.name);
                match &write.value {
                    Some(value) => {
                        let row = VariableInstance {
                            task_id: task.id().to_string(),
                            name: write.name.clone(),
                            value: value.clone(),
                            last_write: now,
                        };
                        batch.put(key, Self::encode("VariableInstance", &row)?);
                    },
                    None => {
                        batch.delete(key);
                    },
                }
            }
            self.stage_touch(&mut task, &mut batch)?;
            self.commit(batch).await?;
            debug!(task_id = task.id(), count = local.len(), "task variables written");
        }

        self.apply_execution_writes(remote).await
    }

    pub(crate) async fn apply_execution_writes(
        &self,
        writes: Vec<PlannedWrite>,
    ) -> Result<(), TaskError> {
        for write in writes {
            let ScopeHandle::Execution(execution_id) = &write.target else {
                continue;
            };
            match write.value {
                Some(value) => {
                    self.execution_scopes()
                        .set_local_variable(execution_id, &write.name, value)
                        .await?;
                },
                None => {
                    self.execution_scopes()
                        .remove_local_variable(execution_id, &write.name)
                        .await?;
                },
            }
            debug!(execution_id = %execution_id, name = %write.name, "execution variable written");
        }
        Ok(())
    }

    // ---- Reads ----

    /// Nearest value of `name` along the scope chain.
    pub async fn get_variable(
        &self,
        scope: &ScopeHandle,
        name: &str,
    ) -> Result<Option<TypedValue>, TaskError> {
        let chain = self.scope_chain(scope).await?;
        for scope in chain.scopes() {
            if let Some(value) = self.local_variable_of(scope, name).await? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Value of `name` in `scope` only.
    pub async fn get_variable_local(
        &self,
        scope: &ScopeHandle,
        name: &str,
    ) -> Result<Option<TypedValue>, TaskError> {
        self.require_scope(scope).await?;
        self.local_variable_of(scope, name).await
    }

    /// Every visible variable; nearer scopes shadow farther ones.
    pub async fn get_variables(&self, scope: &ScopeHandle) -> Result<VariableMap, TaskError> {
        let chain = self.scope_chain(scope).await?;
        let mut merged = VariableMap::new();
        for scope in chain.scopes().iter().rev() {
            merged.extend(self.local_variables_of(scope).await?);
        }
        Ok(merged)
    }

    /// Variables of `scope` only.
    pub async fn get_variables_local(&self, scope: &ScopeHandle) -> Result<VariableMap, TaskError> {
        self.require_scope(scope).await?;
        self.local_variables_of(scope).await
    }

    /// Reads `name` and deserializes it into `T`.
    ///
    /// Absent and null values yield `None`.
    ///
    /// # Errors
    ///
    /// - [`TaskError::TypeMismatch`] if the stored value cannot become a `T`.
    pub async fn get_variable_typed<T: DeserializeOwned>(
        &self,
        scope: &ScopeHandle,
        name: &str,
    ) -> Result<Option<T>, TaskError> {
        match self.get_variable(scope, name).await? {
            None | Some(TypedValue::Null) => Ok(None),
            Some(value) => value.deserialize(name).map(Some),
        }
    }

    // ---- Writes ----

    /// Writes `name` to the nearest scope holding it, else to the first
    /// execution of the chain, else to `scope` itself.
    pub async fn set_variable(
        &self,
        scope: &ScopeHandle,
        name: &str,
        value: impl Into<TypedValue>,
    ) -> Result<(), TaskError> {
        let value = value.into();
        self.check_variable_length(name, &value)?;
        let chain = self.scope_chain(scope).await?;
        let write = self.plan_set(&chain, name.to_string(), value).await?;
        self.apply_writes(vec![write]).await
    }

    /// Writes `name` to `scope` itself.
    pub async fn set_variable_local(
        &self,
        scope: &ScopeHandle,
        name: &str,
        value: impl Into<TypedValue>,
    ) -> Result<(), TaskError> {
        let value = value.into();
        self.check_variable_length(name, &value)?;
        self.require_scope(scope).await?;
        self.apply_writes(vec![PlannedWrite {
            target: scope.clone(),
            name: name.to_string(),
            value: Some(value),
        }])
        .await
    }

    /// [`set_variable`](Self::set_variable) for each entry. Nothing is
    /// written if any value is too long.
    pub async fn set_variables(
        &self,
        scope: &ScopeHandle,
        variables: VariableMap,
    ) -> Result<(), TaskError> {
        for (name, value) in &variables {
            self.check_variable_length(name, value)?;
        }
        let chain = self.scope_chain(scope).await?;
        let mut writes = Vec::with_capacity(variables.len());
        for (name, value) in variables {
            writes.push(self.plan_set(&chain, name, value).await?);
        }
        self.apply_writes(writes).await
    }

    /// [`set_variable_local`](Self::set_variable_local) for each entry.
    pub async fn set_variables_local(
        &self,
        scope: &ScopeHandle,
        variables: VariableMap,
    ) -> Result<(), TaskError> {
        for (name, value) in &variables {
            self.check_variable_length(name, value)?;
        }
        self.require_scope(scope).await?;
        let writes = variables
            .into_iter()
            .map(|(name, value)| PlannedWrite {
                target: scope.clone(),
                name,
                value: Some(value),
            })
            .collect();
        self.apply_writes(writes).await
    }

    /// Removes `name` from the nearest scope holding it. Unknown names are ignored.
    pub async fn remove_variable(&self, scope: &ScopeHandle, name: &str) -> Result<(), TaskError> {
        let chain = self.scope_chain(scope).await?;
        let Some(target) = self.find_holder(&chain, name).await? else {
            return Ok(());
        };
        self.apply_writes(vec![PlannedWrite {
            target,
            name: name.to_string(),
            value: None,
        }])
        .await
    }

    /// Removes `name` from `scope` itself. Unknown names are ignored.
    pub async fn remove_variable_local(
        &self,
        scope: &ScopeHandle,
        name: &str,
    ) -> Result<(), TaskError> {
        self.require_scope(scope).await?;
        if self.local_variable_of(scope, name).await?.is_none() {
            return Ok(());
        }
        self.apply_writes(vec![PlannedWrite {
            target: scope.clone(),
            name: name.to_string(),
            value: None,
        }])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn execution_tree_rejects_duplicates_and_orphans() {
        let scopes = InMemoryExecutionScopes::new();
        scopes.create_process_instance("pi").unwrap();
        assert!(scopes.create_process_instance("pi").is_err());
        assert!(matches!(
            scopes.create_child_execution("missing", "e1"),
            Err(TaskError::NotFound { .. })
        ));
        scopes.create_child_execution("pi", "e1").unwrap();
        assert_eq!(scopes.parent_of("e1").await.unwrap().as_deref(), Some("pi"));
        assert_eq!(scopes.parent_of("pi").await.unwrap(), None);
    }

    #[tokio::test]
    async fn provider_variables_round_trip() {
        let scopes = InMemoryExecutionScopes::new();
        scopes.create_process_instance("pi").unwrap();
        scopes
            .set_local_variable("pi", "x", TypedValue::from(1))
            .await
            .unwrap();
        let vars = scopes.local_variables("pi").await.unwrap();
        assert_eq!(vars.get("x"), Some(&TypedValue::Integer(1)));
        assert!(scopes.remove_local_variable("pi", "x").await.unwrap());
        assert!(!scopes.remove_local_variable("pi", "x").await.unwrap());
    }

    #[test]
    fn default_target_prefers_first_execution() {
        let chain = ScopeChain {
            scopes: vec![
                ScopeHandle::task("t1"),
                ScopeHandle::execution("e1"),
                ScopeHandle::execution("pi"),
            ],
        };
        assert_eq!(chain.default_target(), &ScopeHandle::execution("e1"));

        let standalone = ScopeChain {
            scopes: vec![ScopeHandle::task("t1")],
        };
        assert_eq!(standalone.default_target(), &ScopeHandle::task("t1"));
    }

    #[test]
    fn handle_display() {
        assert_eq!(ScopeHandle::task("t1").to_string(), "task t1");
        assert_eq!(ScopeHandle::execution("e1").id(), "e1");
    }
}
