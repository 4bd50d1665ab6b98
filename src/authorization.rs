//! Authorization collaborator.
//!
//! The engine never asks "may P read task T?" row by row. It asks the
//! [`AuthorizationService`] once per resource type for the set of resource
//! ids the principal holds a permission on ([`GrantSet`]), and folds the
//! answer into the query as a single [`TaskVisibility`] predicate.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::domain::{Task, RESERVED_ID};
use crate::error::TaskError;

/// Resource id matching every resource of a type.
pub const ANY: &str = RESERVED_ID;

/// The calling principal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    /// User id.
    pub user_id: String,
    /// Groups the user belongs to.
    pub group_ids: Vec<String>,
}

impl Authentication {
    /// A principal with the given user id and groups.
    pub fn new<I, S>(user_id: impl Into<String>, group_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user_id: user_id.into(),
            group_ids: group_ids.into_iter().map(Into::into).collect(),
        }
    }

    /// A principal without groups.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Vec::<String>::new())
    }
}

/// Resource types that carry authorizations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resource {
    /// A process definition, identified by key.
    ProcessDefinition,
    /// A task, identified by id.
    Task,
}

/// Permissions checked by this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    /// Every permission.
    All,
    /// Read the resource.
    Read,
    /// Update the resource.
    Update,
    /// Read tasks of a process definition.
    ReadTask,
    /// Update tasks of a process definition.
    UpdateTask,
}

/// Resource ids a principal holds a permission on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantSet {
    /// Every resource of the type.
    All,
    /// Exactly these ids.
    Ids(HashSet<String>),
    /// None.
    Empty,
}

impl GrantSet {
    /// Returns `true` if `id` is covered.
    pub fn contains(&self, id: &str) -> bool {
        match self {
            Self::All => true,
            Self::Ids(ids) => ids.contains(id),
            Self::Empty => false,
        }
    }

    /// Returns `true` if no id is covered.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::All => false,
            Self::Ids(ids) => ids.is_empty(),
            Self::Empty => true,
        }
    }
}

/// One stored authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// The grantee; exactly one of user or group.
    pub grantee: Grantee,
    /// Resource type.
    pub resource: Resource,
    /// Resource id, or [`ANY`].
    pub resource_id: String,
    /// Granted permissions.
    pub permissions: Vec<Permission>,
}

/// Who a [`Grant`] is for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Grantee {
    /// A user.
    User(String),
    /// A group.
    Group(String),
}

impl Grant {
    /// A grant for a user.
    pub fn user(
        user_id: impl Into<String>,
        resource: Resource,
        resource_id: impl Into<String>,
        permissions: impl Into<Vec<Permission>>,
    ) -> Self {
        Self {
            grantee: Grantee::User(user_id.into()),
            resource,
            resource_id: resource_id.into(),
            permissions: permissions.into(),
        }
    }

    /// A grant for a group.
    pub fn group(
        group_id: impl Into<String>,
        resource: Resource,
        resource_id: impl Into<String>,
        permissions: impl Into<Vec<Permission>>,
    ) -> Self {
        Self {
            grantee: Grantee::Group(group_id.into()),
            resource,
            resource_id: resource_id.into(),
            permissions: permissions.into(),
        }
    }

    fn applies_to(&self, auth: &Authentication) -> bool {
        match &self.grantee {
            Grantee::User(user) => user == &auth.user_id || user == ANY,
            Grantee::Group(group) => auth.group_ids.iter().any(|g| g == group),
        }
    }

    fn permits(&self, permission: Permission) -> bool {
        self.permissions
            .iter()
            .any(|p| *p == permission || *p == Permission::All)
    }
}

/// Authorization storage and lookup.
#[async_trait]
pub trait AuthorizationService: Send + Sync {
    /// Resource ids of type `resource` on which `auth` holds `permission`.
    async fn grants(
        &self,
        auth: &Authentication,
        resource: Resource,
        permission: Permission,
    ) -> Result<GrantSet, TaskError>;

    /// Stores a grant. Permissions on an existing grant for the same
    /// grantee and resource are merged.
    async fn grant(&self, grant: Grant) -> Result<(), TaskError>;
}

/// [`AuthorizationService`] over an in-process list of grants.
#[derive(Debug, Default)]
pub struct InMemoryAuthorizationService {
    grants: RwLock<Vec<Grant>>,
}

impl InMemoryAuthorizationService {
    /// An empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored grant.
    pub fn all_grants(&self) -> Vec<Grant> {
        self.grants.read().clone()
    }
}

#[async_trait]
impl AuthorizationService for InMemoryAuthorizationService {
    async fn grants(
        &self,
        auth: &Authentication,
        resource: Resource,
        permission: Permission,
    ) -> Result<GrantSet, TaskError> {
        let grants = self.grants.read();
        let mut ids = HashSet::new();
        for grant in grants
            .iter()
            .filter(|g| g.resource == resource && g.applies_to(auth) && g.permits(permission))
        {
            if grant.resource_id == ANY {
                return Ok(GrantSet::All);
            }
            ids.insert(grant.resource_id.clone());
        }
        Ok(if ids.is_empty() {
            GrantSet::Empty
        } else {
            GrantSet::Ids(ids)
        })
    }

    async fn grant(&self, grant: Grant) -> Result<(), TaskError> {
        let mut grants = self.grants.write();
        if let Some(existing) = grants.iter_mut().find(|g| {
            g.grantee == grant.grantee
                && g.resource == grant.resource
                && g.resource_id == grant.resource_id
        }) {
            for permission in grant.permissions {
                if !existing.permissions.contains(&permission) {
                    existing.permissions.push(permission);
                }
            }
        } else {
            grants.push(grant);
        }
        Ok(())
    }
}

/// Row-level visibility folded into a task query.
///
/// A task is visible when its process definition key is covered by a
/// PROCESS_DEFINITION/READ_TASK grant, or its id by a TASK/READ grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskVisibility {
    /// Definition keys with READ_TASK.
    pub definition_keys: GrantSet,
    /// Task ids with READ.
    pub task_ids: GrantSet,
}

impl TaskVisibility {
    /// Performs one lookup per resource type.
    pub async fn resolve(
        service: &dyn AuthorizationService,
        auth: &Authentication,
    ) -> Result<Self, TaskError> {
        let definition_keys = service
            .grants(auth, Resource::ProcessDefinition, Permission::ReadTask)
            .await?;
        let task_ids = service.grants(auth, Resource::Task, Permission::Read).await?;
        Ok(Self {
            definition_keys,
            task_ids,
        })
    }

    /// Returns `true` if `task` is visible.
    pub fn permits(&self, task: &Task) -> bool {
        task.process_definition_key
            .as_deref()
            .is_some_and(|key| self.definition_keys.contains(key))
            || task
                .id
                .as_deref()
                .is_some_and(|id| self.task_ids.contains(id))
    }
}
