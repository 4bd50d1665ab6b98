//! Query lowering.
//!
//! A [`TaskQuery`] is lowered to a small tree of AND/OR nodes over
//! condition leaves. Authorization is one more AND-ed leaf, so OR-groups
//! written by the caller are never rewritten by it.

use std::cmp::Ordering;

use regex::Regex;

use super::builder::{Direction, OrderBy, TaskQuery};
use super::condition::{compile_like, Condition, MatchContext, TaskRow};
use crate::authorization::TaskVisibility;
use crate::domain::Task;
use crate::error::TaskError;

/// A node of the lowered query.
#[derive(Debug, Clone)]
pub(crate) enum Predicate {
    /// Every child matches; empty is true.
    And(Vec<Predicate>),
    /// Some child matches.
    Or(Vec<Predicate>),
    /// A single condition with its compiled like-pattern.
    Leaf {
        condition: Condition,
        pattern: Option<Regex>,
    },
    /// Row-level authorization.
    Visible(TaskVisibility),
}

impl Predicate {
    fn leaf(condition: &Condition) -> Result<Self, TaskError> {
        let pattern = condition.like_pattern().map(compile_like).transpose()?;
        Ok(Self::Leaf {
            condition: condition.clone(),
            pattern,
        })
    }

    /// Lowers a query whose expressions are already resolved.
    pub(crate) fn lower(query: &TaskQuery) -> Result<Self, TaskError> {
        let mut nodes = query
            .conditions()
            .iter()
            .map(Self::leaf)
            .collect::<Result<Vec<_>, _>>()?;

        for group in query.or_groups().iter().filter(|g| !g.is_empty()) {
            let alternatives = group.iter().map(Self::leaf).collect::<Result<Vec<_>, _>>()?;
            nodes.push(Self::Or(alternatives));
        }

        Ok(Self::And(nodes))
    }

    /// AND-s a visibility leaf onto the tree.
    pub(crate) fn restrict(self, visibility: TaskVisibility) -> Self {
        match self {
            Self::And(mut nodes) => {
                nodes.push(Self::Visible(visibility));
                Self::And(nodes)
            },
            other => Self::And(vec![other, Self::Visible(visibility)]),
        }
    }

    pub(crate) fn matches(&self, row: &TaskRow<'_>, ctx: &MatchContext) -> bool {
        match self {
            Self::And(nodes) => nodes.iter().all(|n| n.matches(row, ctx)),
            Self::Or(nodes) => nodes.iter().any(|n| n.matches(row, ctx)),
            Self::Leaf { condition, pattern } => condition.matches(row, pattern.as_ref(), ctx),
            Self::Visible(visibility) => visibility.permits(row.task),
        }
    }
}

fn compare_key(a: &Task, b: &Task, key: OrderBy) -> Ordering {
    match key {
        OrderBy::Id => a.id.cmp(&b.id),
        OrderBy::Name => a.name.cmp(&b.name),
        OrderBy::Priority => a.priority.cmp(&b.priority),
        OrderBy::Assignee => a.assignee.cmp(&b.assignee),
        OrderBy::CreateTime => a.create_time.cmp(&b.create_time),
        OrderBy::LastUpdated => a.last_updated.cmp(&b.last_updated),
        OrderBy::DueDate => a.due_date.cmp(&b.due_date),
    }
}

/// Sorts by the requested keys, then by id.
pub(crate) fn sort_tasks(tasks: &mut [Task], ordering: &[(OrderBy, Direction)]) {
    tasks.sort_by(|a, b| {
        ordering
            .iter()
            .map(|(key, direction)| {
                let ord = compare_key(a, b, *key);
                match direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            })
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| a.id.cmp(&b.id))
    });
}
