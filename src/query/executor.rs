//! Query execution against the task store.

use tracing::debug;

use super::builder::TaskQuery;
use super::condition::{MatchContext, TaskRow};
use super::expression::{ExpressionContext, QueryOrigin};
use super::predicate::{sort_tasks, Predicate};
use crate::authorization::{Authentication, TaskVisibility};
use crate::domain::Task;
use crate::engine::TaskEngine;
use crate::error::TaskError;
use crate::store::StorageBackend;

impl<B: StorageBackend> TaskEngine<B> {
    /// Visibility restriction for `auth`, or `None` when unrestricted.
    async fn visibility_for(
        &self,
        auth: Option<&Authentication>,
    ) -> Result<Option<TaskVisibility>, TaskError> {
        let Some(auth) = auth else {
            return Ok(None);
        };
        if !self.config().authorization_enabled || self.config().is_admin(&auth.group_ids) {
            return Ok(None);
        }
        TaskVisibility::resolve(self.authorization().as_ref(), auth)
            .await
            .map(Some)
    }

    /// Runs a query coming from `origin`.
    ///
    /// Expressions are checked by the guard before any is evaluated.
    /// Authorization is AND-ed onto the whole query so OR-groups keep
    /// their meaning. Every stored row is evaluated once.
    pub(crate) async fn run_query(
        &self,
        query: &TaskQuery,
        origin: QueryOrigin,
        auth: Option<&Authentication>,
    ) -> Result<Vec<Task>, TaskError> {
        query.validate()?;
        self.guard().check(origin, query)?;

        let resolved = if query.has_expressions() {
            let ctx = ExpressionContext {
                authentication: auth,
                now: self.now(),
            };
            query.resolve_expressions(self.evaluator(), &ctx)?
        } else {
            query.clone()
        };

        let mut predicate = Predicate::lower(&resolved)?;
        if let Some(visibility) = self.visibility_for(auth).await? {
            predicate = predicate.restrict(visibility);
        }

        let links = self.load_all_links().await?;
        let ctx = MatchContext {
            include_assigned_tasks: resolved.includes_assigned_tasks(),
            user_groups: auth.map(|a| (a.user_id.clone(), a.group_ids.clone())),
        };
        let mut tasks: Vec<Task> = self
            .load_all_tasks()
            .await?
            .into_iter()
            .filter(|task| {
                let row = TaskRow {
                    task,
                    links: links.get(task.id()).map(Vec::as_slice).unwrap_or_default(),
                };
                predicate.matches(&row, &ctx)
            })
            .collect();
        sort_tasks(&mut tasks, resolved.ordering());

        debug!(?origin, matched = tasks.len(), "task query executed");
        Ok(tasks)
    }

    /// Tasks matching `query`, visible to `auth`.
    pub async fn query_tasks(
        &self,
        query: &TaskQuery,
        auth: Option<&Authentication>,
    ) -> Result<Vec<Task>, TaskError> {
        self.run_query(query, QueryOrigin::Adhoc, auth).await
    }

    /// A page of [`query_tasks`](Self::query_tasks).
    pub async fn query_tasks_page(
        &self,
        query: &TaskQuery,
        first_result: usize,
        max_results: usize,
        auth: Option<&Authentication>,
    ) -> Result<Vec<Task>, TaskError> {
        let tasks = self.run_query(query, QueryOrigin::Adhoc, auth).await?;
        Ok(page(tasks, first_result, max_results))
    }

    /// Number of matching tasks.
    pub async fn count_tasks(
        &self,
        query: &TaskQuery,
        auth: Option<&Authentication>,
    ) -> Result<u64, TaskError> {
        let tasks = self.run_query(query, QueryOrigin::Adhoc, auth).await?;
        Ok(tasks.len() as u64)
    }

    /// The only matching task.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotValid`] if more than one task matches.
    pub async fn single_task(
        &self,
        query: &TaskQuery,
        auth: Option<&Authentication>,
    ) -> Result<Option<Task>, TaskError> {
        let tasks = self.run_query(query, QueryOrigin::Adhoc, auth).await?;
        single(tasks)
    }
}

pub(crate) fn page(tasks: Vec<Task>, first_result: usize, max_results: usize) -> Vec<Task> {
    tasks
        .into_iter()
        .skip(first_result)
        .take(max_results)
        .collect()
}

pub(crate) fn single(mut tasks: Vec<Task>) -> Result<Option<Task>, TaskError> {
    match tasks.len() {
        0 => Ok(None),
        1 => Ok(tasks.pop()),
        n => Err(TaskError::NotValid(format!(
            "Query return {n} results instead of max 1"
        ))),
    }
}
