//! Fluent, serializable task query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::condition::{Condition, FilterValue};
use super::expression::{ExpressionContext, ExpressionEvaluator};
use crate::domain::DelegationState;
use crate::error::TaskError;

/// Sort keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    /// Task id.
    Id,
    /// Name.
    Name,
    /// Priority.
    Priority,
    /// Assignee.
    Assignee,
    /// Create time.
    CreateTime,
    /// Last updated.
    LastUpdated,
    /// Due date.
    DueDate,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Smallest first; absent values first.
    #[default]
    Asc,
    /// Largest first; absent values last.
    Desc,
}

/// A task query: AND-ed conditions plus OR-groups.
///
/// Conditions added between [`or`](TaskQuery::or) and
/// [`end_or`](TaskQuery::end_or) form one OR-group; each OR-group is
/// AND-ed with the rest of the query. Misuse (nested `or()`, ordering
/// inside an OR-group) is recorded and reported when the query runs or
/// is saved.
///
/// # Examples
///
/// ```
/// use taskscope::query::TaskQuery;
///
/// let query = TaskQuery::new()
///     .task_unassigned()
///     .or()
///     .task_candidate_group("sales")
///     .task_candidate_group("management")
///     .end_or();
/// assert_eq!(query.conditions().len(), 1);
/// assert_eq!(query.or_groups()[0].len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskQuery {
    conditions: Vec<Condition>,
    or_groups: Vec<Vec<Condition>>,
    include_assigned_tasks: bool,
    ordering: Vec<(OrderBy, Direction)>,
    #[serde(skip)]
    open_or_group: bool,
    #[serde(skip)]
    usage_error: Option<String>,
}

impl TaskQuery {
    /// An empty query matching every task.
    pub fn new() -> Self {
        Self::default()
    }

    /// Root AND-ed conditions.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// OR-groups.
    pub fn or_groups(&self) -> &[Vec<Condition>] {
        &self.or_groups
    }

    /// Requested ordering.
    pub fn ordering(&self) -> &[(OrderBy, Direction)] {
        &self.ordering
    }

    /// Whether candidate conditions also match assigned tasks.
    pub fn includes_assigned_tasks(&self) -> bool {
        self.include_assigned_tasks
    }

    /// Returns `true` if any operand is an expression.
    pub fn has_expressions(&self) -> bool {
        self.conditions
            .iter()
            .chain(self.or_groups.iter().flatten())
            .any(Condition::has_expression)
    }

    fn usage_error(&mut self, message: &str) {
        if self.usage_error.is_none() {
            self.usage_error = Some(format!("Invalid query usage: {message}"));
        }
    }

    /// Adds a condition to the root or to the open OR-group.
    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        if self.open_or_group {
            if let Some(group) = self.or_groups.last_mut() {
                group.push(condition);
                return self;
            }
        }
        self.conditions.push(condition);
        self
    }

    /// Opens an OR-group.
    #[must_use]
    pub fn or(mut self) -> Self {
        if self.open_or_group {
            self.usage_error("cannot set or() within 'or' query");
            return self;
        }
        self.open_or_group = true;
        self.or_groups.push(Vec::new());
        self
    }

    /// Closes the open OR-group.
    #[must_use]
    pub fn end_or(mut self) -> Self {
        if !self.open_or_group {
            self.usage_error("calling endOr() without a matching or()");
        }
        self.open_or_group = false;
        self
    }

    /// Appends a sort key.
    #[must_use]
    pub fn order_by(mut self, key: OrderBy, direction: Direction) -> Self {
        if self.open_or_group {
            self.usage_error("cannot call order_by() within 'or' query");
            return self;
        }
        self.ordering.push((key, direction));
        self
    }

    /// Candidate conditions also match assigned tasks.
    #[must_use]
    pub fn include_assigned_tasks(mut self) -> Self {
        self.include_assigned_tasks = true;
        self
    }

    /// Reports recorded misuse and contradictory conditions.
    pub fn validate(&self) -> Result<(), TaskError> {
        if let Some(message) = &self.usage_error {
            return Err(TaskError::NotValid(message.clone()));
        }
        let has_due = self.conditions.iter().any(Condition::is_due_date_filter);
        let without_due = self
            .conditions
            .iter()
            .any(|c| matches!(c, Condition::WithoutDueDate));
        if has_due && without_due {
            return Err(TaskError::NotValid(
                "Invalid query usage: cannot set both dueDate/dueBefore/dueAfter and withoutDueDate"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Returns this query overridden by `extension`.
    ///
    /// A root condition of the extension replaces root conditions of the
    /// same kind; OR-groups are appended; the extension's ordering, when
    /// present, replaces this query's ordering.
    pub fn extend(&self, extension: &TaskQuery) -> TaskQuery {
        let mut merged = self.clone();
        for condition in &extension.conditions {
            merged.conditions.retain(|c| !c.same_kind(condition));
        }
        merged.conditions.extend(extension.conditions.iter().cloned());
        merged.or_groups.extend(extension.or_groups.iter().cloned());
        merged.include_assigned_tasks |= extension.include_assigned_tasks;
        if !extension.ordering.is_empty() {
            merged.ordering = extension.ordering.clone();
        }
        if merged.usage_error.is_none() {
            merged.usage_error = extension.usage_error.clone();
        }
        merged.open_or_group = false;
        merged
    }

    /// Returns a copy with every expression operand evaluated.
    pub(crate) fn resolve_expressions(
        &self,
        evaluator: &dyn ExpressionEvaluator,
        ctx: &ExpressionContext<'_>,
    ) -> Result<TaskQuery, TaskError> {
        let resolve_all = |conditions: &[Condition]| {
            conditions
                .iter()
                .map(|c| c.resolve(evaluator, ctx))
                .collect::<Result<Vec<_>, _>>()
        };
        let mut resolved = self.clone();
        resolved.conditions = resolve_all(&self.conditions)?;
        resolved.or_groups = self
            .or_groups
            .iter()
            .map(|group| resolve_all(group))
            .collect::<Result<_, _>>()?;
        Ok(resolved)
    }

    // ---- Identity ----

    /// Task id equals.
    #[must_use]
    pub fn task_id(self, id: impl Into<String>) -> Self {
        self.condition(Condition::TaskId(id.into()))
    }

    /// Task id is one of.
    #[must_use]
    pub fn task_id_in<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.condition(Condition::TaskIdIn(ids.into_iter().map(Into::into).collect()))
    }

    /// Name equals.
    #[must_use]
    pub fn task_name(self, name: impl Into<String>) -> Self {
        self.condition(Condition::Name(name.into()))
    }

    /// Name matches a `%`/`_` pattern.
    #[must_use]
    pub fn task_name_like(self, pattern: impl Into<String>) -> Self {
        self.condition(Condition::NameLike(pattern.into()))
    }

    /// Description matches a `%`/`_` pattern.
    #[must_use]
    pub fn task_description_like(self, pattern: impl Into<String>) -> Self {
        self.condition(Condition::DescriptionLike(pattern.into()))
    }

    // ---- Assignment ----

    /// Assignee equals.
    #[must_use]
    pub fn task_assignee(self, user: impl Into<String>) -> Self {
        self.condition(Condition::Assignee(FilterValue::Literal(user.into())))
    }

    /// Assignee equals the result of an expression.
    #[must_use]
    pub fn task_assignee_expression(self, expression: impl Into<String>) -> Self {
        self.condition(Condition::Assignee(FilterValue::Expression(expression.into())))
    }

    /// Assignee matches a `%`/`_` pattern.
    #[must_use]
    pub fn task_assignee_like(self, pattern: impl Into<String>) -> Self {
        self.condition(Condition::AssigneeLike(FilterValue::Literal(pattern.into())))
    }

    /// Assignee matches the pattern an expression evaluates to.
    #[must_use]
    pub fn task_assignee_like_expression(self, expression: impl Into<String>) -> Self {
        self.condition(Condition::AssigneeLike(FilterValue::Expression(
            expression.into(),
        )))
    }

    /// Assignee is one of.
    #[must_use]
    pub fn task_assignee_in<I, S>(self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.condition(Condition::AssigneeIn(users.into_iter().map(Into::into).collect()))
    }

    /// No assignee.
    #[must_use]
    pub fn task_unassigned(self) -> Self {
        self.condition(Condition::Unassigned)
    }

    /// Has an assignee.
    #[must_use]
    pub fn task_assigned(self) -> Self {
        self.condition(Condition::Assigned)
    }

    /// Owner equals.
    #[must_use]
    pub fn task_owner(self, user: impl Into<String>) -> Self {
        self.condition(Condition::Owner(FilterValue::Literal(user.into())))
    }

    /// Owner equals the result of an expression.
    #[must_use]
    pub fn task_owner_expression(self, expression: impl Into<String>) -> Self {
        self.condition(Condition::Owner(FilterValue::Expression(expression.into())))
    }

    /// User is assignee, owner, or linked.
    #[must_use]
    pub fn task_involved_user(self, user: impl Into<String>) -> Self {
        self.condition(Condition::InvolvedUser(FilterValue::Literal(user.into())))
    }

    /// Involved user from an expression.
    #[must_use]
    pub fn task_involved_user_expression(self, expression: impl Into<String>) -> Self {
        self.condition(Condition::InvolvedUser(FilterValue::Expression(
            expression.into(),
        )))
    }

    /// User is a candidate.
    #[must_use]
    pub fn task_candidate_user(self, user: impl Into<String>) -> Self {
        self.condition(Condition::CandidateUser(FilterValue::Literal(user.into())))
    }

    /// Candidate user from an expression.
    #[must_use]
    pub fn task_candidate_user_expression(self, expression: impl Into<String>) -> Self {
        self.condition(Condition::CandidateUser(FilterValue::Expression(
            expression.into(),
        )))
    }

    /// Group is a candidate.
    #[must_use]
    pub fn task_candidate_group(self, group: impl Into<String>) -> Self {
        self.condition(Condition::CandidateGroup(FilterValue::Literal(group.into())))
    }

    /// Candidate group from an expression.
    #[must_use]
    pub fn task_candidate_group_expression(self, expression: impl Into<String>) -> Self {
        self.condition(Condition::CandidateGroup(FilterValue::Expression(
            expression.into(),
        )))
    }

    /// Any of the groups is a candidate.
    #[must_use]
    pub fn task_candidate_group_in<I, S>(self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.condition(Condition::CandidateGroupIn(FilterValue::Literal(
            groups.into_iter().map(Into::into).collect(),
        )))
    }

    /// Candidate groups from an expression.
    #[must_use]
    pub fn task_candidate_group_in_expression(self, expression: impl Into<String>) -> Self {
        self.condition(Condition::CandidateGroupIn(FilterValue::Expression(
            expression.into(),
        )))
    }

    /// Has a candidate group.
    #[must_use]
    pub fn with_candidate_groups(self) -> Self {
        self.condition(Condition::WithCandidateGroups)
    }

    /// Has no candidate group.
    #[must_use]
    pub fn without_candidate_groups(self) -> Self {
        self.condition(Condition::WithoutCandidateGroups)
    }

    /// Delegation state equals.
    #[must_use]
    pub fn task_delegation_state(self, state: DelegationState) -> Self {
        self.condition(Condition::DelegationState(state))
    }

    // ---- Context ----

    /// Process instance equals.
    #[must_use]
    pub fn process_instance_id(self, id: impl Into<String>) -> Self {
        self.condition(Condition::ProcessInstanceId(id.into()))
    }

    /// Execution equals.
    #[must_use]
    pub fn execution_id(self, id: impl Into<String>) -> Self {
        self.condition(Condition::ExecutionId(id.into()))
    }

    /// Process definition key equals.
    #[must_use]
    pub fn process_definition_key(self, key: impl Into<String>) -> Self {
        self.condition(Condition::ProcessDefinitionKey(key.into()))
    }

    /// Process definition key is one of.
    #[must_use]
    pub fn process_definition_key_in<I, S>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.condition(Condition::ProcessDefinitionKeyIn(
            keys.into_iter().map(Into::into).collect(),
        ))
    }

    /// Case instance equals.
    #[must_use]
    pub fn case_instance_id(self, id: impl Into<String>) -> Self {
        self.condition(Condition::CaseInstanceId(id.into()))
    }

    /// Tenant is one of.
    #[must_use]
    pub fn tenant_id_in<I, S>(self, tenants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.condition(Condition::TenantIdIn(tenants.into_iter().map(Into::into).collect()))
    }

    /// No tenant.
    #[must_use]
    pub fn without_tenant_id(self) -> Self {
        self.condition(Condition::WithoutTenantId)
    }

    /// Parent task equals.
    #[must_use]
    pub fn task_parent_task_id(self, id: impl Into<String>) -> Self {
        self.condition(Condition::ParentTaskId(id.into()))
    }

    /// Not suspended.
    #[must_use]
    pub fn active(self) -> Self {
        self.condition(Condition::Active)
    }

    /// Suspended.
    #[must_use]
    pub fn suspended(self) -> Self {
        self.condition(Condition::Suspended)
    }

    // ---- Priority ----

    /// Priority equals.
    #[must_use]
    pub fn task_priority(self, priority: i32) -> Self {
        self.condition(Condition::Priority(priority))
    }

    /// Priority at least.
    #[must_use]
    pub fn task_min_priority(self, priority: i32) -> Self {
        self.condition(Condition::MinPriority(priority))
    }

    /// Priority at most.
    #[must_use]
    pub fn task_max_priority(self, priority: i32) -> Self {
        self.condition(Condition::MaxPriority(priority))
    }

    // ---- Dates ----

    /// Created strictly before.
    #[must_use]
    pub fn task_created_before(self, at: DateTime<Utc>) -> Self {
        self.condition(Condition::CreatedBefore(FilterValue::Literal(at)))
    }

    /// Created before the instant an expression evaluates to.
    #[must_use]
    pub fn task_created_before_expression(self, expression: impl Into<String>) -> Self {
        self.condition(Condition::CreatedBefore(FilterValue::Expression(
            expression.into(),
        )))
    }

    /// Created at exactly.
    #[must_use]
    pub fn task_created_on(self, at: DateTime<Utc>) -> Self {
        self.condition(Condition::CreatedOn(FilterValue::Literal(at)))
    }

    /// Created at the instant an expression evaluates to.
    #[must_use]
    pub fn task_created_on_expression(self, expression: impl Into<String>) -> Self {
        self.condition(Condition::CreatedOn(FilterValue::Expression(expression.into())))
    }

    /// Created strictly after.
    #[must_use]
    pub fn task_created_after(self, at: DateTime<Utc>) -> Self {
        self.condition(Condition::CreatedAfter(FilterValue::Literal(at)))
    }

    /// Created after the instant an expression evaluates to.
    #[must_use]
    pub fn task_created_after_expression(self, expression: impl Into<String>) -> Self {
        self.condition(Condition::CreatedAfter(FilterValue::Expression(
            expression.into(),
        )))
    }

    /// Last updated strictly after.
    #[must_use]
    pub fn task_updated_after(self, at: DateTime<Utc>) -> Self {
        self.condition(Condition::UpdatedAfter(FilterValue::Literal(at)))
    }

    /// Last updated after the instant an expression evaluates to.
    #[must_use]
    pub fn task_updated_after_expression(self, expression: impl Into<String>) -> Self {
        self.condition(Condition::UpdatedAfter(FilterValue::Expression(
            expression.into(),
        )))
    }

    /// Due strictly before.
    #[must_use]
    pub fn due_before(self, at: DateTime<Utc>) -> Self {
        self.condition(Condition::DueBefore(FilterValue::Literal(at)))
    }

    /// Due before the instant an expression evaluates to.
    #[must_use]
    pub fn due_before_expression(self, expression: impl Into<String>) -> Self {
        self.condition(Condition::DueBefore(FilterValue::Expression(expression.into())))
    }

    /// Due at exactly.
    #[must_use]
    pub fn due_date(self, at: DateTime<Utc>) -> Self {
        self.condition(Condition::DueDate(FilterValue::Literal(at)))
    }

    /// Due at the instant an expression evaluates to.
    #[must_use]
    pub fn due_date_expression(self, expression: impl Into<String>) -> Self {
        self.condition(Condition::DueDate(FilterValue::Expression(expression.into())))
    }

    /// Due strictly after.
    #[must_use]
    pub fn due_after(self, at: DateTime<Utc>) -> Self {
        self.condition(Condition::DueAfter(FilterValue::Literal(at)))
    }

    /// Due after the instant an expression evaluates to.
    #[must_use]
    pub fn due_after_expression(self, expression: impl Into<String>) -> Self {
        self.condition(Condition::DueAfter(FilterValue::Expression(expression.into())))
    }

    /// No due date.
    #[must_use]
    pub fn without_due_date(self) -> Self {
        self.condition(Condition::WithoutDueDate)
    }

    /// Follow-up strictly before.
    #[must_use]
    pub fn follow_up_before(self, at: DateTime<Utc>) -> Self {
        self.condition(Condition::FollowUpBefore(FilterValue::Literal(at)))
    }

    /// Follow-up before the instant an expression evaluates to.
    #[must_use]
    pub fn follow_up_before_expression(self, expression: impl Into<String>) -> Self {
        self.condition(Condition::FollowUpBefore(FilterValue::Expression(
            expression.into(),
        )))
    }

    /// Follow-up at exactly.
    #[must_use]
    pub fn follow_up_date(self, at: DateTime<Utc>) -> Self {
        self.condition(Condition::FollowUpDate(FilterValue::Literal(at)))
    }

    /// Follow-up at the instant an expression evaluates to.
    #[must_use]
    pub fn follow_up_date_expression(self, expression: impl Into<String>) -> Self {
        self.condition(Condition::FollowUpDate(FilterValue::Expression(
            expression.into(),
        )))
    }

    /// Follow-up strictly after.
    #[must_use]
    pub fn follow_up_after(self, at: DateTime<Utc>) -> Self {
        self.condition(Condition::FollowUpAfter(FilterValue::Literal(at)))
    }

    /// Follow-up after the instant an expression evaluates to.
    #[must_use]
    pub fn follow_up_after_expression(self, expression: impl Into<String>) -> Self {
        self.condition(Condition::FollowUpAfter(FilterValue::Expression(
            expression.into(),
        )))
    }
}
