//! Task reports.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::{IdentityLink, IdentityLinkType};
use crate::engine::TaskEngine;
use crate::error::TaskError;
use crate::store::StorageBackend;

/// Number of open, unassigned tasks offered to one candidate group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCountByCandidateGroup {
    /// The group; `None` for tasks without any candidate group.
    pub group_name: Option<String>,
    /// Matching tasks.
    pub task_count: u64,
}

impl<B: StorageBackend> TaskEngine<B> {
    /// Counts unassigned tasks per candidate group.
    ///
    /// A task with several candidate groups counts once for each. The
    /// bucket of tasks without candidate groups comes first, then groups
    /// by name.
    pub async fn task_count_by_candidate_group(
        &self,
    ) -> Result<Vec<TaskCountByCandidateGroup>, TaskError> {
        let links = self.load_all_links().await?;
        let mut counts: BTreeMap<Option<String>, u64> = BTreeMap::new();

        for task in self.load_all_tasks().await? {
            if task.assignee.is_some() {
                continue;
            }
            let groups: BTreeSet<&str> = links
                .get(task.id())
                .into_iter()
                .flatten()
                .filter(|link| link.link_type == IdentityLinkType::Candidate)
                .filter_map(IdentityLink::group_id)
                .collect();
            if groups.is_empty() {
                *counts.entry(None).or_default() += 1;
            }
            for group in groups {
                *counts.entry(Some(group.to_string())).or_default() += 1;
            }
        }

        Ok(counts
            .into_iter()
            .map(|(group_name, task_count)| TaskCountByCandidateGroup {
                group_name,
                task_count,
            })
            .collect())
    }
}
