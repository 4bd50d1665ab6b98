//! Stored filters.
//!
//! A filter is a named, persisted [`TaskQuery`]. It can be executed as
//! stored or with a per-call extension whose root conditions replace
//! those of the same kind. Expressions in the stored query follow the
//! stored-query policy when saved; expressions in an extension follow
//! the adhoc policy.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::authorization::Authentication;
use crate::domain::Task;
use crate::engine::TaskEngine;
use crate::error::TaskError;
use crate::query::{page, single, QueryOrigin, TaskQuery};
use crate::store::keys;
use crate::store::{kind_prefix, make_key, StorageBackend, WriteBatch};

/// Resource type of task filters.
pub const TASK_FILTER_RESOURCE: &str = "Task";

/// A named, stored task query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Filter id, assigned on first save if absent.
    pub id: Option<String>,
    /// Kind of entity the query targets.
    pub resource_type: String,
    /// Display name.
    pub name: String,
    /// Owning user.
    pub owner: Option<String>,
    /// The stored query.
    pub query: TaskQuery,
    /// Free-form presentation properties.
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Storage revision; zero until saved.
    #[serde(skip)]
    pub revision: u64,
}

impl Filter {
    /// An unsaved task filter.
    pub fn task(name: impl Into<String>) -> Self {
        Self {
            id: None,
            resource_type: TASK_FILTER_RESOURCE.to_string(),
            name: name.into(),
            owner: None,
            query: TaskQuery::new(),
            properties: Map::new(),
            revision: 0,
        }
    }

    /// Sets the query.
    #[must_use]
    pub fn with_query(mut self, query: TaskQuery) -> Self {
        self.query = query;
        self
    }

    /// Sets the owner.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Sets one presentation property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Filter id or `""` if unsaved.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }
}

fn filter_not_found(filter_id: &str) -> TaskError {
    TaskError::NotFound {
        entity: "filter",
        id: filter_id.to_string(),
    }
}

impl<B: StorageBackend> TaskEngine<B> {
    /// An unsaved task filter.
    pub fn new_task_filter(&self, name: impl Into<String>) -> Filter {
        Filter::task(name)
    }

    /// Inserts or updates a filter.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotValid`] for an empty name or an invalid query.
    /// - [`TaskError::Engine`] if the query has expressions while stored
    ///   expressions are disabled.
    /// - [`TaskError::NotFound`] when updating a filter that no longer exists.
    /// - [`TaskError::OptimisticLocking`] when the filter changed concurrently.
    pub async fn save_filter(&self, filter: &mut Filter) -> Result<(), TaskError> {
        if filter.name.trim().is_empty() {
            return Err(TaskError::NotValid("Filter name must not be null or empty.".to_string()));
        }
        filter.query.validate()?;
        self.guard().check_save(&filter.query)?;

        let mut staged = filter.clone();
        let mut batch = WriteBatch::new();
        if filter.revision > 0 {
            if self.get_filter(filter.id()).await?.is_none() {
                return Err(filter_not_found(filter.id()));
            }
            batch.update(
                make_key(keys::FILTER, staged.id()),
                Self::encode("Filter", &staged)?,
                filter.revision,
            );
        } else {
            staged.id.get_or_insert_with(|| Uuid::new_v4().to_string());
            batch.insert(
                make_key(keys::FILTER, staged.id()),
                Self::encode("Filter", &staged)?,
            );
        }
        let versions = self.commit(batch).await?;
        staged.revision = versions.first().copied().unwrap_or(filter.revision + 1);
        *filter = staged;
        info!(filter_id = filter.id(), name = %filter.name, "filter saved");
        Ok(())
    }

    /// Loads a filter.
    pub async fn get_filter(&self, filter_id: &str) -> Result<Option<Filter>, TaskError> {
        let record = self
            .backend()
            .try_get(&make_key(keys::FILTER, filter_id))
            .await
            .map_err(Self::map_storage_error)?;
        record
            .map(|r| {
                let mut filter: Filter = Self::decode("Filter", &r.data)?;
                filter.revision = r.version;
                Ok(filter)
            })
            .transpose()
    }

    /// Every filter, ordered by name.
    pub async fn list_filters(&self) -> Result<Vec<Filter>, TaskError> {
        let rows = self
            .backend()
            .list_by_prefix(&kind_prefix(keys::FILTER))
            .await
            .map_err(Self::map_storage_error)?;
        let mut filters = rows
            .into_iter()
            .map(|(_, r)| {
                let mut filter: Filter = Self::decode("Filter", &r.data)?;
                filter.revision = r.version;
                Ok(filter)
            })
            .collect::<Result<Vec<_>, TaskError>>()?;
        filters.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(filters)
    }

    /// Deletes a filter.
    pub async fn delete_filter(&self, filter_id: &str) -> Result<(), TaskError> {
        let filter = self
            .get_filter(filter_id)
            .await?
            .ok_or_else(|| filter_not_found(filter_id))?;
        let mut batch = WriteBatch::new();
        batch.delete_if_version(make_key(keys::FILTER, filter_id), filter.revision);
        self.commit(batch).await?;
        info!(filter_id, "filter deleted");
        Ok(())
    }

    async fn run_filter(
        &self,
        filter_id: &str,
        extension: Option<&TaskQuery>,
        auth: Option<&Authentication>,
    ) -> Result<Vec<Task>, TaskError> {
        let filter = self
            .get_filter(filter_id)
            .await?
            .ok_or_else(|| filter_not_found(filter_id))?;
        let query = match extension {
            Some(extension) => {
                extension.validate()?;
                self.guard()
                    .check(QueryOrigin::StoredFilterExtension, extension)?;
                filter.query.extend(extension)
            },
            None => filter.query,
        };
        debug!(filter_id, extended = extension.is_some(), "executing filter");
        self.run_query(&query, QueryOrigin::StoredFilter, auth).await
    }

    /// Tasks matching the stored query.
    pub async fn filter_list(
        &self,
        filter_id: &str,
        auth: Option<&Authentication>,
    ) -> Result<Vec<Task>, TaskError> {
        self.run_filter(filter_id, None, auth).await
    }

    /// A page of [`filter_list`](Self::filter_list).
    pub async fn filter_list_page(
        &self,
        filter_id: &str,
        first_result: usize,
        max_results: usize,
        auth: Option<&Authentication>,
    ) -> Result<Vec<Task>, TaskError> {
        let tasks = self.run_filter(filter_id, None, auth).await?;
        Ok(page(tasks, first_result, max_results))
    }

    /// Number of tasks matching the stored query.
    pub async fn filter_count(
        &self,
        filter_id: &str,
        auth: Option<&Authentication>,
    ) -> Result<u64, TaskError> {
        let tasks = self.run_filter(filter_id, None, auth).await?;
        Ok(tasks.len() as u64)
    }

    /// The only task matching the stored query.
    pub async fn filter_single_result(
        &self,
        filter_id: &str,
        auth: Option<&Authentication>,
    ) -> Result<Option<Task>, TaskError> {
        let tasks = self.run_filter(filter_id, None, auth).await?;
        single(tasks)
    }

    /// Tasks matching the stored query overridden by `extension`.
    pub async fn filter_list_extended(
        &self,
        filter_id: &str,
        extension: &TaskQuery,
        auth: Option<&Authentication>,
    ) -> Result<Vec<Task>, TaskError> {
        self.run_filter(filter_id, Some(extension), auth).await
    }

    /// Number of tasks matching the extended query.
    pub async fn filter_count_extended(
        &self,
        filter_id: &str,
        extension: &TaskQuery,
        auth: Option<&Authentication>,
    ) -> Result<u64, TaskError> {
        let tasks = self.run_filter(filter_id, Some(extension), auth).await?;
        Ok(tasks.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builder_sets_fields() {
        let filter = Filter::task("My tasks")
            .with_owner("kermit")
            .with_property("color", "#3e4d2f")
            .with_query(TaskQuery::new().task_assignee("kermit"));
        assert_eq!(filter.resource_type, TASK_FILTER_RESOURCE);
        assert_eq!(filter.owner.as_deref(), Some("kermit"));
        assert_eq!(filter.properties["color"], Value::from("#3e4d2f"));
        assert_eq!(filter.id(), "");
    }

    #[test]
    fn serde_skips_revision() {
        let mut filter = Filter::task("f");
        filter.revision = 7;
        let json = serde_json::to_string(&filter).unwrap();
        let back: Filter = serde_json::from_str(&json).unwrap();
        assert_eq!(back.revision, 0);
        assert_eq!(back.name, "f");
    }
}
