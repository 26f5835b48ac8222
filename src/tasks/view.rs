//! Board view models — status columns and list filters over the task forest.

use uuid::Uuid;

use super::model::{TaskPriority, TaskStatus};
use super::tree::TaskNode;

/// One kanban column: a status and the root tasks currently in it.
#[derive(Debug, Clone)]
pub struct Column<'a> {
    pub status: TaskStatus,
    pub tasks: Vec<&'a TaskNode>,
}

/// Group root tasks into one column per status, in board order.
///
/// Columns are always present (possibly empty). Within a column tasks are
/// ordered by `position`; ties keep forest order.
pub fn group_by_status(forest: &[TaskNode]) -> Vec<Column<'_>> {
    TaskStatus::ALL
        .into_iter()
        .map(|status| {
            let mut tasks: Vec<&TaskNode> =
                forest.iter().filter(|n| n.task.status == status).collect();
            tasks.sort_by_key(|n| n.task.position);
            Column { status, tasks }
        })
        .collect()
}

/// List-view filter. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub assignee: Option<Uuid>,
    pub priority: Option<TaskPriority>,
    /// Hide `done` tasks unless a status filter asks for them.
    pub hide_done: bool,
}

impl TaskFilter {
    pub fn matches(&self, node: &TaskNode) -> bool {
        let task = &node.task;
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        } else if self.hide_done && task.status == TaskStatus::Done {
            return false;
        }
        if self.assignee.is_some() && task.assignee_id != self.assignee {
            return false;
        }
        if let Some(priority) = self.priority {
            if task.priority != priority {
                return false;
            }
        }
        true
    }

    /// Roots that match. A root also matches if any of its subtasks match, so
    /// assigned subtasks stay visible in context.
    pub fn apply<'a>(&self, forest: &'a [TaskNode]) -> Vec<&'a TaskNode> {
        forest
            .iter()
            .filter(|n| self.matches(n) || n.subtasks.iter().any(|s| self.matches(s)))
            .collect()
    }
}
