//! Task tree — derives the parent/child forest from flat rows.
//!
//! The tree is a disposable view: rows stay flat in the store and the forest
//! is rebuilt on every fetch.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use super::model::Task;

/// A task with its nested subtasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskNode {
    #[serde(flatten)]
    pub task: Task,
    pub subtasks: Vec<TaskNode>,
}

impl TaskNode {
    pub fn leaf(task: Task) -> Self {
        Self {
            task,
            subtasks: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.task.id
    }
}

/// Build a forest from rows ordered by position, then newest first.
///
/// A task whose parent is not in `tasks` becomes a root. Tasks caught in a
/// parent cycle can never be reached from a root; they are emitted as roots at
/// their input position so every row stays visible. Input order is preserved
/// at every level.
pub fn build_tree(tasks: Vec<Task>) -> Vec<TaskNode> {
    let index: HashMap<Uuid, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, task)| (task.id, i))
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
    let mut is_root = vec![false; tasks.len()];
    for (i, task) in tasks.iter().enumerate() {
        match task.parent_id.and_then(|p| index.get(&p).copied()) {
            Some(parent) if parent != i => children[parent].push(i),
            _ => is_root[i] = true,
        }
    }

    // Anything unreachable from a real root sits on a cycle (or hangs off one).
    let mut reachable = vec![false; tasks.len()];
    let mut stack: Vec<usize> = (0..tasks.len()).filter(|&i| is_root[i]).collect();
    while let Some(i) = stack.pop() {
        if reachable[i] {
            continue;
        }
        reachable[i] = true;
        stack.extend(children[i].iter().copied());
    }
    for i in 0..tasks.len() {
        if !reachable[i] {
            is_root[i] = true;
            // Detach from the cycle and claim the subtree hanging below.
            for parent_children in children.iter_mut() {
                parent_children.retain(|&c| c != i);
            }
            let mut stack = vec![i];
            while let Some(j) = stack.pop() {
                if reachable[j] {
                    continue;
                }
                reachable[j] = true;
                stack.extend(children[j].iter().copied());
            }
        }
    }

    let mut slots: Vec<Option<Task>> = tasks.into_iter().map(Some).collect();
    let roots: Vec<usize> = (0..slots.len()).filter(|&i| is_root[i]).collect();
    roots
        .into_iter()
        .filter_map(|i| assemble(i, &children, &mut slots))
        .collect()
}

/// Builds the subtree under `root` bottom-up with an explicit stack, so a long
/// parent chain cannot exhaust the call stack.
fn assemble(root: usize, children: &[Vec<usize>], slots: &mut [Option<Task>]) -> Option<TaskNode> {
    let mut post_order = Vec::new();
    let mut stack = vec![(root, false)];
    while let Some((i, expanded)) = stack.pop() {
        if expanded {
            post_order.push(i);
            continue;
        }
        stack.push((i, true));
        stack.extend(children[i].iter().rev().map(|&c| (c, false)));
    }

    let mut built: HashMap<usize, TaskNode> = HashMap::new();
    for i in post_order {
        let Some(task) = slots[i].take() else {
            continue;
        };
        let subtasks = children[i].iter().filter_map(|c| built.remove(c)).collect();
        built.insert(i, TaskNode { task, subtasks });
    }
    built.remove(&root)
}

/// Find a node anywhere in the forest, in pre-order.
pub fn find(forest: &[TaskNode], id: Uuid) -> Option<&TaskNode> {
    let mut stack: Vec<&TaskNode> = forest.iter().rev().collect();
    while let Some(node) = stack.pop() {
        if node.id() == id {
            return Some(node);
        }
        stack.extend(node.subtasks.iter().rev());
    }
    None
}

/// Mutable variant of [`find`].
pub fn find_mut(forest: &mut [TaskNode], id: Uuid) -> Option<&mut TaskNode> {
    let mut stack: Vec<&mut TaskNode> = forest.iter_mut().rev().collect();
    while let Some(node) = stack.pop() {
        if node.id() == id {
            return Some(node);
        }
        stack.extend(node.subtasks.iter_mut().rev());
    }
    None
}

/// Remove a node (and its subtree) from the forest. Returns it if found.
pub fn remove(forest: &mut Vec<TaskNode>, id: Uuid) -> Option<TaskNode> {
    let mut levels = vec![forest];
    while let Some(level) = levels.pop() {
        if let Some(pos) = level.iter().position(|n| n.id() == id) {
            return Some(level.remove(pos));
        }
        levels.extend(level.iter_mut().map(|n| &mut n.subtasks));
    }
    None
}

/// Pre-order flattening back to rows.
pub fn flatten(forest: &[TaskNode]) -> Vec<&Task> {
    let mut out = Vec::new();
    let mut stack: Vec<&TaskNode> = forest.iter().rev().collect();
    while let Some(node) = stack.pop() {
        out.push(&node.task);
        stack.extend(node.subtasks.iter().rev());
    }
    out
}

/// Number of tasks in the forest, at any depth.
pub fn count(forest: &[TaskNode]) -> usize {
    let mut total = 0;
    let mut stack: Vec<&TaskNode> = forest.iter().collect();
    while let Some(node) = stack.pop() {
        total += 1;
        stack.extend(node.subtasks.iter());
    }
    total
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::Utc;

    use super::*;
    use crate::tasks::model::{NewTask, TaskStatus};

    fn task(id: u128, status: TaskStatus, parent: Option<u128>) -> Task {
        let mut new = NewTask::new(format!("task {id}")).with_status(status);
        if let Some(p) = parent {
            new = new.with_parent(Uuid::from_u128(p));
        }
        new.into_task(Uuid::from_u128(id), Utc::now())
    }

    fn ids(nodes: &[TaskNode]) -> Vec<u128> {
        nodes.iter().map(|n| n.id().as_u128()).collect()
    }

    #[test]
    fn builds_roots_with_subtasks() {
        let tasks = vec![
            task(1, TaskStatus::Todo, None),
            task(2, TaskStatus::Todo, Some(1)),
            task(3, TaskStatus::Done, None),
        ];
        let forest = build_tree(tasks);
        assert_eq!(ids(&forest), vec![1, 3]);
        assert_eq!(ids(&forest[0].subtasks), vec![2]);
        assert!(forest[1].subtasks.is_empty());
    }

    #[test]
    fn missing_parent_becomes_root() {
        let forest = build_tree(vec![
            task(5, TaskStatus::Todo, Some(99)),
            task(6, TaskStatus::Todo, None),
        ]);
        assert_eq!(ids(&forest), vec![5, 6]);
    }

    #[test]
    fn child_before_parent_in_input_still_nests() {
        let forest = build_tree(vec![
            task(2, TaskStatus::Todo, Some(1)),
            task(1, TaskStatus::Todo, None),
        ]);
        assert_eq!(ids(&forest), vec![1]);
        assert_eq!(ids(&forest[0].subtasks), vec![2]);
    }

    #[test]
    fn sibling_order_follows_input() {
        let forest = build_tree(vec![
            task(1, TaskStatus::Todo, None),
            task(4, TaskStatus::Todo, Some(1)),
            task(3, TaskStatus::Todo, Some(1)),
            task(2, TaskStatus::Todo, Some(1)),
        ]);
        assert_eq!(ids(&forest[0].subtasks), vec![4, 3, 2]);
    }

    #[test]
    fn deeper_nesting_is_kept() {
        let forest = build_tree(vec![
            task(1, TaskStatus::Todo, None),
            task(2, TaskStatus::Todo, Some(1)),
            task(3, TaskStatus::Todo, Some(2)),
        ]);
        assert_eq!(ids(&forest[0].subtasks[0].subtasks), vec![3]);
        assert_eq!(find(&forest, Uuid::from_u128(3)).unwrap().task.title, "task 3");
    }

    #[test]
    fn cycles_do_not_drop_rows() {
        let forest = build_tree(vec![
            task(1, TaskStatus::Todo, Some(2)),
            task(2, TaskStatus::Todo, Some(1)),
            task(3, TaskStatus::Todo, Some(3)),
        ]);
        assert_eq!(count(&forest), 3);
        let seen: HashSet<Uuid> = flatten(&forest).iter().map(|t| t.id).collect();
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn every_task_appears_exactly_once() {
        // Mixed shapes: orphans, chains, siblings, a self-loop.
        let tasks: Vec<Task> = (1..=40u128)
            .map(|id| {
                let parent = match id % 5 {
                    0 => None,
                    1 => Some(id + 100),
                    2 => Some(id - 1),
                    3 => Some(id),
                    _ => Some((id / 2).max(1)),
                };
                task(id, TaskStatus::Backlog, parent)
            })
            .collect();
        let forest = build_tree(tasks);
        let flat = flatten(&forest);
        assert_eq!(flat.len(), 40);
        let unique: HashSet<Uuid> = flat.iter().map(|t| t.id).collect();
        assert_eq!(unique.len(), 40);
    }

    #[test]
    fn remove_takes_subtree() {
        let mut forest = build_tree(vec![
            task(1, TaskStatus::Todo, None),
            task(2, TaskStatus::Todo, Some(1)),
            task(3, TaskStatus::Todo, None),
        ]);
        let removed = remove(&mut forest, Uuid::from_u128(1)).unwrap();
        assert_eq!(removed.subtasks.len(), 1);
        assert_eq!(ids(&forest), vec![3]);
        assert!(remove(&mut forest, Uuid::from_u128(42)).is_none());
    }

    #[test]
    fn find_mut_reaches_subtasks() {
        let mut forest = build_tree(vec![
            task(1, TaskStatus::Todo, None),
            task(2, TaskStatus::Todo, Some(1)),
        ]);
        find_mut(&mut forest, Uuid::from_u128(2)).unwrap().task.title = "renamed".into();
        assert_eq!(forest[0].subtasks[0].task.title, "renamed");
    }

    #[test]
    fn long_parent_chain() {
        let depth = 2_000;
        let tasks = (1..=depth)
            .map(|id| task(id, TaskStatus::Todo, (id > 1).then(|| id - 1)))
            .collect();
        let mut forest = build_tree(tasks);
        assert_eq!(ids(&forest), vec![1]);
        assert_eq!(count(&forest), depth as usize);

        let deepest = Uuid::from_u128(depth);
        assert!(find(&forest, deepest).unwrap().subtasks.is_empty());
        find_mut(&mut forest, deepest).unwrap().task.title = "bottom".into();
        let flat = flatten(&forest);
        assert_eq!(flat.len(), depth as usize);
        assert_eq!(flat.last().unwrap().title, "bottom");

        let removed = remove(&mut forest, Uuid::from_u128(depth - 1)).unwrap();
        assert_eq!(removed.subtasks.len(), 1);
        assert_eq!(count(&forest), depth as usize - 2);
    }
}
