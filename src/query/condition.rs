//! Query conditions and their evaluation against a single task row.

use std::mem::discriminant;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::expression::{ExpressionContext, ExpressionEvaluator, ExpressionValue};
use crate::domain::{DelegationState, IdentityLink, IdentityLinkType, SuspensionState, Task};
use crate::error::TaskError;

/// A condition operand: a literal or an expression evaluated at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterValue<T> {
    /// A fixed value.
    Literal(T),
    /// An expression such as `${currentUser()}`.
    Expression(String),
}

impl<T> FilterValue<T> {
    /// Returns `true` for [`FilterValue::Expression`].
    pub fn is_expression(&self) -> bool {
        matches!(self, Self::Expression(_))
    }

    /// The literal, if resolved.
    pub fn literal(&self) -> Option<&T> {
        match self {
            Self::Literal(v) => Some(v),
            Self::Expression(_) => None,
        }
    }
}

impl<T: Clone + FromExpressionValue> FilterValue<T> {
    fn resolve(
        &self,
        evaluator: &dyn ExpressionEvaluator,
        ctx: &ExpressionContext<'_>,
    ) -> Result<Self, TaskError> {
        match self {
            Self::Literal(v) => Ok(Self::Literal(v.clone())),
            Self::Expression(expr) => {
                let value = evaluator.evaluate(expr, ctx)?;
                T::from_expression_value(expr, value).map(Self::Literal)
            },
        }
    }
}

/// Conversion from an evaluated expression into a condition operand.
pub trait FromExpressionValue: Sized {
    /// Converts `value`, the result of evaluating `expression`.
    fn from_expression_value(expression: &str, value: ExpressionValue) -> Result<Self, TaskError>;
}

fn wrong_result(expression: &str, expected: &str) -> TaskError {
    TaskError::BadRequest(format!(
        "Expression '{expression}' does not resolve to a {expected}"
    ))
}

impl FromExpressionValue for String {
    fn from_expression_value(expression: &str, value: ExpressionValue) -> Result<Self, TaskError> {
        match value {
            ExpressionValue::String(s) => Ok(s),
            _ => Err(wrong_result(expression, "string")),
        }
    }
}

impl FromExpressionValue for Vec<String> {
    fn from_expression_value(expression: &str, value: ExpressionValue) -> Result<Self, TaskError> {
        match value {
            ExpressionValue::Strings(list) => Ok(list),
            ExpressionValue::String(s) => Ok(s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()),
            _ => Err(wrong_result(expression, "list of strings")),
        }
    }
}

impl FromExpressionValue for DateTime<Utc> {
    fn from_expression_value(expression: &str, value: ExpressionValue) -> Result<Self, TaskError> {
        match value {
            ExpressionValue::Date(d) => Ok(d),
            ExpressionValue::String(s) => DateTime::parse_from_rfc3339(&s)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|_| wrong_result(expression, "date")),
            _ => Err(wrong_result(expression, "date")),
        }
    }
}

/// A single task filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Condition {
    /// Task id equals.
    TaskId(String),
    /// Task id is one of.
    TaskIdIn(Vec<String>),
    /// Name equals.
    Name(String),
    /// Name matches a `%`/`_` pattern.
    NameLike(String),
    /// Description matches a `%`/`_` pattern.
    DescriptionLike(String),
    /// Assignee equals.
    Assignee(FilterValue<String>),
    /// Assignee matches a `%`/`_` pattern.
    AssigneeLike(FilterValue<String>),
    /// Assignee is one of.
    AssigneeIn(Vec<String>),
    /// No assignee.
    Unassigned,
    /// Has an assignee.
    Assigned,
    /// Owner equals.
    Owner(FilterValue<String>),
    /// User is assignee, owner, or linked in any role.
    InvolvedUser(FilterValue<String>),
    /// User is a candidate directly or through one of their groups.
    CandidateUser(FilterValue<String>),
    /// Group is a candidate.
    CandidateGroup(FilterValue<String>),
    /// Any of the groups is a candidate.
    CandidateGroupIn(FilterValue<Vec<String>>),
    /// Has at least one candidate group.
    WithCandidateGroups,
    /// Has no candidate group.
    WithoutCandidateGroups,
    /// Delegation state equals.
    DelegationState(DelegationState),
    /// Process instance equals.
    ProcessInstanceId(String),
    /// Execution equals.
    ExecutionId(String),
    /// Process definition key equals.
    ProcessDefinitionKey(String),
    /// Process definition key is one of.
    ProcessDefinitionKeyIn(Vec<String>),
    /// Case instance equals.
    CaseInstanceId(String),
    /// Tenant is one of.
    TenantIdIn(Vec<String>),
    /// No tenant.
    WithoutTenantId,
    /// Priority equals.
    Priority(i32),
    /// Priority at least.
    MinPriority(i32),
    /// Priority at most.
    MaxPriority(i32),
    /// Created strictly before.
    CreatedBefore(FilterValue<DateTime<Utc>>),
    /// Created at exactly.
    CreatedOn(FilterValue<DateTime<Utc>>),
    /// Created strictly after.
    CreatedAfter(FilterValue<DateTime<Utc>>),
    /// Last updated strictly after.
    UpdatedAfter(FilterValue<DateTime<Utc>>),
    /// Due strictly before.
    DueBefore(FilterValue<DateTime<Utc>>),
    /// Due at exactly.
    DueDate(FilterValue<DateTime<Utc>>),
    /// Due strictly after.
    DueAfter(FilterValue<DateTime<Utc>>),
    /// No due date.
    WithoutDueDate,
    /// Follow-up strictly before.
    FollowUpBefore(FilterValue<DateTime<Utc>>),
    /// Follow-up at exactly.
    FollowUpDate(FilterValue<DateTime<Utc>>),
    /// Follow-up strictly after.
    FollowUpAfter(FilterValue<DateTime<Utc>>),
    /// Parent task equals.
    ParentTaskId(String),
    /// Not suspended.
    Active,
    /// Suspended.
    Suspended,
}

impl Condition {
    /// Returns `true` if the operand is an unevaluated expression.
    pub fn has_expression(&self) -> bool {
        match self {
            Self::Assignee(v)
            | Self::AssigneeLike(v)
            | Self::Owner(v)
            | Self::InvolvedUser(v)
            | Self::CandidateUser(v)
            | Self::CandidateGroup(v) => v.is_expression(),
            Self::CandidateGroupIn(v) => v.is_expression(),
            Self::CreatedBefore(v)
            | Self::CreatedOn(v)
            | Self::CreatedAfter(v)
            | Self::UpdatedAfter(v)
            | Self::DueBefore(v)
            | Self::DueDate(v)
            | Self::DueAfter(v)
            | Self::FollowUpBefore(v)
            | Self::FollowUpDate(v)
            | Self::FollowUpAfter(v) => v.is_expression(),
            _ => false,
        }
    }

    /// Returns `true` if both conditions filter the same attribute.
    pub fn same_kind(&self, other: &Self) -> bool {
        discriminant(self) == discriminant(other)
    }

    /// Returns `true` for the due-date range conditions.
    pub(crate) fn is_due_date_filter(&self) -> bool {
        matches!(
            self,
            Self::DueBefore(_) | Self::DueDate(_) | Self::DueAfter(_)
        )
    }

    /// Returns `true` for conditions restricted to unassigned tasks.
    pub(crate) fn is_candidate_filter(&self) -> bool {
        matches!(
            self,
            Self::CandidateUser(_)
                | Self::CandidateGroup(_)
                | Self::CandidateGroupIn(_)
                | Self::WithCandidateGroups
        )
    }

    /// Replaces every expression operand with its evaluated literal.
    pub(crate) fn resolve(
        &self,
        evaluator: &dyn ExpressionEvaluator,
        ctx: &ExpressionContext<'_>,
    ) -> Result<Self, TaskError> {
        if !self.has_expression() {
            return Ok(self.clone());
        }
        Ok(match self {
            Self::Assignee(v) => Self::Assignee(v.resolve(evaluator, ctx)?),
            Self::AssigneeLike(v) => Self::AssigneeLike(v.resolve(evaluator, ctx)?),
            Self::Owner(v) => Self::Owner(v.resolve(evaluator, ctx)?),
            Self::InvolvedUser(v) => Self::InvolvedUser(v.resolve(evaluator, ctx)?),
            Self::CandidateUser(v) => Self::CandidateUser(v.resolve(evaluator, ctx)?),
            Self::CandidateGroup(v) => Self::CandidateGroup(v.resolve(evaluator, ctx)?),
            Self::CandidateGroupIn(v) => Self::CandidateGroupIn(v.resolve(evaluator, ctx)?),
            Self::CreatedBefore(v) => Self::CreatedBefore(v.resolve(evaluator, ctx)?),
            Self::CreatedOn(v) => Self::CreatedOn(v.resolve(evaluator, ctx)?),
            Self::CreatedAfter(v) => Self::CreatedAfter(v.resolve(evaluator, ctx)?),
            Self::UpdatedAfter(v) => Self::UpdatedAfter(v.resolve(evaluator, ctx)?),
            Self::DueBefore(v) => Self::DueBefore(v.resolve(evaluator, ctx)?),
            Self::DueDate(v) => Self::DueDate(v.resolve(evaluator, ctx)?),
            Self::DueAfter(v) => Self::DueAfter(v.resolve(evaluator, ctx)?),
            Self::FollowUpBefore(v) => Self::FollowUpBefore(v.resolve(evaluator, ctx)?),
            Self::FollowUpDate(v) => Self::FollowUpDate(v.resolve(evaluator, ctx)?),
            Self::FollowUpAfter(v) => Self::FollowUpAfter(v.resolve(evaluator, ctx)?),
            other => other.clone(),
        })
    }

    /// The `%`/`_` pattern of a like-condition, if any.
    pub(crate) fn like_pattern(&self) -> Option<&str> {
        match self {
            Self::NameLike(p) | Self::DescriptionLike(p) => Some(p),
            Self::AssigneeLike(FilterValue::Literal(p)) => Some(p),
            _ => None,
        }
    }
}

/// Compiles a SQL-style like pattern (`%` any run, `_` any char) into a regex.
pub(crate) fn compile_like(pattern: &str) -> Result<Regex, TaskError> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push_str("(?s)^");
    let mut literal = String::new();
    for c in pattern.chars() {
        match c {
            '%' | '_' => {
                source.push_str(&regex::escape(&literal));
                literal.clear();
                source.push_str(if c == '%' { ".*" } else { "." });
            },
            other => literal.push(other),
        }
    }
    source.push_str(&regex::escape(&literal));
    source.push('$');
    Regex::new(&source).map_err(|e| TaskError::BadRequest(format!("invalid like pattern: {e}")))
}

/// A task together with its identity links.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TaskRow<'a> {
    pub task: &'a Task,
    pub links: &'a [IdentityLink],
}

impl<'a> TaskRow<'a> {
    fn candidate_groups(&self) -> impl Iterator<Item = &'a str> + 'a {
        self.links
            .iter()
            .filter(|l| l.link_type == IdentityLinkType::Candidate)
            .filter_map(IdentityLink::group_id)
    }
}

/// Evaluation settings shared by every leaf of one query.
#[derive(Debug, Clone, Default)]
pub(crate) struct MatchContext {
    /// Candidate filters also match assigned tasks.
    pub include_assigned_tasks: bool,
    /// The authenticated user and their groups, used to widen a
    /// candidate-user filter on that same user to their groups.
    pub user_groups: Option<(String, Vec<String>)>,
}

fn before(value: Option<DateTime<Utc>>, bound: &FilterValue<DateTime<Utc>>) -> bool {
    matches!((value, bound.literal()), (Some(v), Some(b)) if v < *b)
}

fn after(value: Option<DateTime<Utc>>, bound: &FilterValue<DateTime<Utc>>) -> bool {
    matches!((value, bound.literal()), (Some(v), Some(b)) if v > *b)
}

fn on(value: Option<DateTime<Utc>>, bound: &FilterValue<DateTime<Utc>>) -> bool {
    matches!((value, bound.literal()), (Some(v), Some(b)) if v == *b)
}

fn eq(value: Option<&str>, operand: &FilterValue<String>) -> bool {
    matches!((value, operand.literal()), (Some(v), Some(o)) if v == o)
}

impl Condition {
    /// Evaluates the condition. Expressions must already be resolved;
    /// an unresolved operand never matches.
    pub(crate) fn matches(&self, row: &TaskRow<'_>, pattern: Option<&Regex>, ctx: &MatchContext) -> bool {
        let task = row.task;
        if self.is_candidate_filter() && !ctx.include_assigned_tasks && task.assignee.is_some() {
            return false;
        }
        let like = |value: Option<&str>| match (value, pattern) {
            (Some(v), Some(p)) => p.is_match(v),
            _ => false,
        };

        match self {
            Self::TaskId(id) => task.id.as_deref() == Some(id.as_str()),
            Self::TaskIdIn(ids) => task.id.as_ref().is_some_and(|id| ids.contains(id)),
            Self::Name(name) => task.name.as_deref() == Some(name.as_str()),
            Self::NameLike(_) => like(task.name.as_deref()),
            Self::DescriptionLike(_) => like(task.description.as_deref()),
            Self::Assignee(v) => eq(task.assignee.as_deref(), v),
            Self::AssigneeLike(_) => like(task.assignee.as_deref()),
            Self::AssigneeIn(users) => task.assignee.as_ref().is_some_and(|a| users.contains(a)),
            Self::Unassigned => task.assignee.is_none(),
            Self::Assigned => task.assignee.is_some(),
            Self::Owner(v) => eq(task.owner.as_deref(), v),
            Self::InvolvedUser(v) => v.literal().is_some_and(|user| {
                task.assignee.as_deref() == Some(user.as_str())
                    || task.owner.as_deref() == Some(user.as_str())
                    || row.links.iter().any(|l| l.user_id() == Some(user.as_str()))
            }),
            Self::CandidateUser(v) => v.literal().is_some_and(|user| {
                let groups: &[String] = match &ctx.user_groups {
                    Some((current, groups)) if current == user => groups,
                    _ => &[],
                };
                row.links.iter().any(|l| {
                    l.is_candidate_user(user) || groups.iter().any(|g| l.is_candidate_group(g))
                })
            }),
            Self::CandidateGroup(v) => v
                .literal()
                .is_some_and(|group| row.candidate_groups().any(|g| g == group)),
            Self::CandidateGroupIn(v) => v
                .literal()
                .is_some_and(|groups| row.candidate_groups().any(|g| groups.iter().any(|x| x == g))),
            Self::WithCandidateGroups => row.candidate_groups().next().is_some(),
            Self::WithoutCandidateGroups => row.candidate_groups().next().is_none(),
            Self::DelegationState(state) => task.delegation_state == Some(*state),
            Self::ProcessInstanceId(id) => task.process_instance_id.as_deref() == Some(id.as_str()),
            Self::ExecutionId(id) => task.execution_id.as_deref() == Some(id.as_str()),
            Self::ProcessDefinitionKey(key) => {
                task.process_definition_key.as_deref() == Some(key.as_str())
            },
            Self::ProcessDefinitionKeyIn(keys) => task
                .process_definition_key
                .as_ref()
                .is_some_and(|k| keys.contains(k)),
            Self::CaseInstanceId(id) => task.case_instance_id.as_deref() == Some(id.as_str()),
            Self::TenantIdIn(tenants) => task.tenant_id.as_ref().is_some_and(|t| tenants.contains(t)),
            Self::WithoutTenantId => task.tenant_id.is_none(),
            Self::Priority(p) => task.priority == *p,
            Self::MinPriority(p) => task.priority >= *p,
            Self::MaxPriority(p) => task.priority <= *p,
            Self::CreatedBefore(v) => before(task.create_time, v),
            Self::CreatedOn(v) => on(task.create_time, v),
            Self::CreatedAfter(v) => after(task.create_time, v),
            Self::UpdatedAfter(v) => after(task.last_updated, v),
            Self::DueBefore(v) => before(task.due_date, v),
            Self::DueDate(v) => on(task.due_date, v),
            Self::DueAfter(v) => after(task.due_date, v),
            Self::WithoutDueDate => task.due_date.is_none(),
            Self::FollowUpBefore(v) => before(task.follow_up_date, v),
            Self::FollowUpDate(v) => on(task.follow_up_date, v),
            Self::FollowUpAfter(v) => after(task.follow_up_date, v),
            Self::ParentTaskId(id) => task.parent_task_id.as_deref() == Some(id.as_str()),
            Self::Active => task.suspension_state == SuspensionState::Active,
            Self::Suspended => task.suspension_state == SuspensionState::Suspended,
        }
    }
}
