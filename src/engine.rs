//! Task engine facade.
//!
//! [`TaskEngine`] implements every domain operation (task lifecycle,
//! identity links, variable scopes, the event log, queries, stored
//! filters and reports) on top of any [`StorageBackend`] implementation.
//! The operations themselves live in per-concern modules as further
//! `impl` blocks on this type.
//!
//! # Construction
//!
//! Use the builder pattern:
//!
//! ```
//! use taskscope::{EngineConfig, TaskEngine};
//! use taskscope::clock::EngineClock;
//! use taskscope::store::InMemoryBackend;
//!
//! let engine = TaskEngine::new(InMemoryBackend::new())
//!     .with_config(EngineConfig::default().with_authorization_enabled(true))
//!     .with_clock(EngineClock::system().shared());
//! assert!(engine.config().authorization_enabled);
//! ```
//!
//! # Unit of Work
//!
//! Every mutating operation validates its input, stages all of its writes
//! into one [`WriteBatch`], and commits that batch once. Writes to tasks
//! are guarded by the task revision, so a stale in-memory copy fails with
//! [`TaskError::OptimisticLocking`] instead of overwriting newer data.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::authorization::{AuthorizationService, InMemoryAuthorizationService};
use crate::clock::{Clock, EngineClock};
use crate::config::EngineConfig;
use crate::domain::{IdentityLink, Task};
use crate::error::TaskError;
use crate::query::{BuiltinExpressionEvaluator, ExpressionEvaluator, ExpressionGuard};
use crate::scope::{ExecutionScopeProvider, InMemoryExecutionScopes};
use crate::store::keys::{self, entity_label};
use crate::store::{
    kind_prefix, make_key, make_prefix, parse_key, unescape_key_part, InMemoryBackend,
    StorageBackend, StorageError, WriteBatch,
};

/// The task engine.
///
/// # Type Parameters
///
/// * `B` - A [`StorageBackend`] implementation.
pub struct TaskEngine<B: StorageBackend> {
    backend: B,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    executions: Arc<dyn ExecutionScopeProvider>,
    authorization: Arc<dyn AuthorizationService>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    sequence: AtomicU64,
}

/// A [`TaskEngine`] over [`InMemoryBackend`].
pub type InMemoryTaskEngine = TaskEngine<InMemoryBackend>;

impl InMemoryTaskEngine {
    /// An in-memory engine with default collaborators.
    pub fn in_memory() -> Self {
        Self::new(InMemoryBackend::new())
    }
}

impl Default for InMemoryTaskEngine {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl<B: StorageBackend> fmt::Debug for TaskEngine<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskEngine")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("evaluator", &self.evaluator)
            .finish_non_exhaustive()
    }
}

impl<B: StorageBackend> TaskEngine<B> {
    /// Creates an engine over `backend`.
    ///
    /// Defaults:
    /// - `EngineConfig::default()`
    /// - a wall-time [`EngineClock`]
    /// - empty [`InMemoryExecutionScopes`] and [`InMemoryAuthorizationService`]
    /// - [`BuiltinExpressionEvaluator`]
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            config: EngineConfig::default(),
            clock: EngineClock::system().shared(),
            executions: Arc::new(InMemoryExecutionScopes::new()),
            authorization: Arc::new(InMemoryAuthorizationService::new()),
            evaluator: Arc::new(BuiltinExpressionEvaluator),
            sequence: AtomicU64::new(0),
        }
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the execution scope provider.
    #[must_use]
    pub fn with_execution_scopes(mut self, executions: Arc<dyn ExecutionScopeProvider>) -> Self {
        self.executions = executions;
        self
    }

    /// Sets the authorization service.
    #[must_use]
    pub fn with_authorization(mut self, authorization: Arc<dyn AuthorizationService>) -> Self {
        self.authorization = authorization;
        self
    }

    /// Sets the expression evaluator.
    #[must_use]
    pub fn with_expression_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// The configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The storage backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The execution scope provider.
    pub fn execution_scopes(&self) -> &Arc<dyn ExecutionScopeProvider> {
        &self.executions
    }

    /// The authorization service.
    pub fn authorization(&self) -> &Arc<dyn AuthorizationService> {
        &self.authorization
    }

    pub(crate) fn evaluator(&self) -> &dyn ExpressionEvaluator {
        self.evaluator.as_ref()
    }

    pub(crate) fn guard(&self) -> ExpressionGuard {
        ExpressionGuard::from_config(&self.config)
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    // ---- Serialization helpers ----

    pub(crate) fn encode<T: Serialize>(entity: &str, value: &T) -> Result<Vec<u8>, TaskError> {
        serde_json::to_vec(value)
            .map_err(|e| TaskError::Store(format!("failed to serialize {entity}: {e}")))
    }

    pub(crate) fn decode<T: DeserializeOwned>(entity: &str, data: &[u8]) -> Result<T, TaskError> {
        serde_json::from_slice(data)
            .map_err(|e| TaskError::Store(format!("failed to deserialize {entity}: {e}")))
    }

    /// Maps backend errors to domain errors.
    pub(crate) fn map_storage_error(err: StorageError) -> TaskError {
        let split = |key: &str| -> (&'static str, String) {
            match parse_key(key) {
                Some((kind, id)) => (entity_label(kind), unescape_key_part(id)),
                None => ("Entity", key.to_string()),
            }
        };
        match err {
            StorageError::VersionConflict {
                key,
                expected,
                actual,
            } => {
                let (entity, id) = split(&key);
                tracing::warn!(
                    entity,
                    id = %id,
                    expected_revision = expected,
                    actual_revision = actual,
                    "optimistic locking failure"
                );
                TaskError::OptimisticLocking {
                    entity,
                    id,
                    expected,
                    actual,
                }
            },
            StorageError::NotFound { key } => {
                let (entity, id) = split(&key);
                TaskError::NotFound { entity, id }
            },
            StorageError::AlreadyExists { key } => {
                let (entity, id) = split(&key);
                TaskError::Engine(format!("{entity} with id '{id}' already exists"))
            },
            StorageError::Backend { message, .. } => TaskError::Store(message),
        }
    }

    pub(crate) async fn commit(&self, batch: WriteBatch) -> Result<Vec<u64>, TaskError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        self.backend
            .commit(batch)
            .await
            .map_err(Self::map_storage_error)
    }

    // ---- Task loading ----

    pub(crate) async fn load_task(&self, task_id: &str) -> Result<Option<Task>, TaskError> {
        let record = self
            .backend
            .try_get(&make_key(keys::TASK, task_id))
            .await
            .map_err(Self::map_storage_error)?;
        record
            .map(|r| {
                let mut task: Task = Self::decode("Task", &r.data)?;
                task.revision = r.version;
                Ok(task)
            })
            .transpose()
    }

    pub(crate) async fn require_task(&self, task_id: &str) -> Result<Task, TaskError> {
        self.load_task(task_id)
            .await?
            .ok_or_else(|| TaskError::task_not_found(task_id))
    }

    pub(crate) async fn load_all_tasks(&self) -> Result<Vec<Task>, TaskError> {
        let rows = self
            .backend
            .list_by_prefix(&kind_prefix(keys::TASK))
            .await
            .map_err(Self::map_storage_error)?;
        rows.into_iter()
            .map(|(_, r)| {
                let mut task: Task = Self::decode("Task", &r.data)?;
                task.revision = r.version;
                Ok(task)
            })
            .collect()
    }

    pub(crate) async fn load_links(&self, task_id: &str) -> Result<Vec<IdentityLink>, TaskError> {
        let rows = self
            .backend
            .list_by_prefix(&make_prefix(keys::LINK, task_id))
            .await
            .map_err(Self::map_storage_error)?;
        let mut links = Vec::with_capacity(rows.len());
        for (_, record) in rows {
            let link: IdentityLink = Self::decode("IdentityLink", &record.data)?;
            if link.task_id == task_id {
                links.push(link);
            }
        }
        Ok(links)
    }

    /// Every identity link, grouped by task id, in one scan.
    pub(crate) async fn load_all_links(
        &self,
    ) -> Result<HashMap<String, Vec<IdentityLink>>, TaskError> {
        let rows = self
            .backend
            .list_by_prefix(&kind_prefix(keys::LINK))
            .await
            .map_err(Self::map_storage_error)?;
        let mut by_task: HashMap<String, Vec<IdentityLink>> = HashMap::new();
        for (_, record) in rows {
            let link: IdentityLink = Self::decode("IdentityLink", &record.data)?;
            by_task.entry(link.task_id.clone()).or_default().push(link);
        }
        Ok(by_task)
    }

    // ---- Task writes ----

    /// Stages a revision-guarded write of `task` with `last_updated` set to now.
    ///
    /// The caller commits the batch and then calls [`Self::task_committed`].
    pub(crate) fn stage_touch(&self, task: &mut Task, batch: &mut WriteBatch) -> Result<(), TaskError> {
        task.last_updated = Some(self.now());
        let data = Self::encode("Task", task)?;
        batch.update(make_key(keys::TASK, task.id()), data, task.revision);
        Ok(())
    }

    /// Records a successful commit of a staged touch.
    pub(crate) fn task_committed(task: &mut Task) {
        task.revision += 1;
    }

    /// Loads a task, applies `mutate`, and commits it with a touch.
    pub(crate) async fn update_task<F>(&self, task_id: &str, mutate: F) -> Result<Task, TaskError>
    where
        F: FnOnce(&mut Task) -> Result<(), TaskError>,
    {
        let mut task = self.require_task(task_id).await?;
        mutate(&mut task)?;
        let mut batch = WriteBatch::new();
        self.stage_touch(&mut task, &mut batch)?;
        self.commit(batch).await?;
        Self::task_committed(&mut task);
        Ok(task)
    }
}
