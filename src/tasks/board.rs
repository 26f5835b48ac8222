//! Board controller — optimistic task mutations over a shared task forest.
//!
//! Every mutation is projected onto the local forest first, then sent to the
//! backend. On failure the error is surfaced as a banner and the forest is
//! re-fetched, discarding whatever was speculated.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{NaiveDate, Utc};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dnd::{DropIntent, resolve_drop};
use super::model::{NewTask, Task, TaskPatch, TaskPriority, TaskStatus};
use super::tree::{self, TaskNode, build_tree};
use super::view::{TaskFilter, group_by_status};
use crate::config::{BoardConfig, ReorderPolicy};
use crate::error::ApiError;
use crate::store::Backend;
use crate::users::User;

const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Board state changes, fanned out to every view.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    /// A fetch replaced the forest.
    Synced { tasks: usize },
    /// A task was patched locally.
    TaskChanged { id: Uuid },
    /// A placeholder was inserted under `parent_id`.
    TaskAdded { id: Uuid, parent_id: Uuid },
    /// A placeholder was swapped for the stored row.
    TaskConfirmed { placeholder: Uuid, id: Uuid },
    /// A task and its subtree left the board.
    TaskRemoved { id: Uuid },
    /// A banner was raised.
    Failed { message: String },
    ErrorCleared,
}

/// Point-in-time copy of the board for rendering.
#[derive(Debug, Clone, Default)]
pub struct BoardSnapshot {
    pub tasks: Vec<TaskNode>,
    pub users: Vec<User>,
    pub error: Option<String>,
    /// Placeholder ids still waiting for their insert to land.
    pub pending: HashSet<Uuid>,
}

impl BoardSnapshot {
    pub fn find(&self, id: Uuid) -> Option<&TaskNode> {
        tree::find(&self.tasks, id)
    }

    pub fn is_pending(&self, id: Uuid) -> bool {
        self.pending.contains(&id)
    }
}

#[derive(Default)]
struct BoardState {
    tasks: Vec<TaskNode>,
    users: Vec<User>,
    error: Option<String>,
    pending: HashSet<Uuid>,
    /// Sequence number of the last fetch applied to `tasks`.
    applied_seq: u64,
}

/// Apply `patch` to the task `id` wherever it sits in the forest.
///
/// Returns false if the task is not present.
pub fn apply_patch(forest: &mut [TaskNode], id: Uuid, patch: &TaskPatch) -> bool {
    match tree::find_mut(forest, id) {
        Some(node) => {
            patch.apply(&mut node.task);
            true
        }
        None => false,
    }
}

/// Shared board: the task forest, the user directory and the error banner.
pub struct Board {
    backend: Arc<dyn Backend>,
    config: BoardConfig,
    state: RwLock<BoardState>,
    fetch_seq: AtomicU64,
    tx: broadcast::Sender<BoardEvent>,
}

impl Board {
    pub fn new(backend: Arc<dyn Backend>, config: BoardConfig) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self {
            backend,
            config,
            state: RwLock::new(BoardState::default()),
            fetch_seq: AtomicU64::new(0),
            tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.tx.subscribe()
    }

    // ── Fetching ────────────────────────────────────────────────────

    /// Fetch users and tasks concurrently. Whatever succeeds is applied; the
    /// first failure is raised as the banner and returned.
    pub async fn load(&self) -> Result<(), ApiError> {
        let seq = self.next_seq();
        let (users, tasks) =
            futures::join!(self.backend.list_users(), self.backend.list_tasks());

        let mut first_err = None;
        match users {
            Ok(users) => {
                debug!(count = users.len(), "Loaded users");
                self.state.write().await.users = users;
            }
            Err(e) => {
                warn!(error = %e, "Failed to load users");
                self.fail(format!("Failed to load users: {e}")).await;
                first_err = Some(e);
            }
        }
        match tasks {
            Ok(tasks) => self.apply_fetch(seq, tasks).await,
            Err(e) => {
                warn!(error = %e, "Failed to load tasks");
                self.fail(format!("Failed to load tasks: {e}")).await;
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Re-fetch tasks. On failure the previous forest stays visible.
    pub async fn refresh(&self) -> Result<(), ApiError> {
        let seq = self.next_seq();
        match self.backend.list_tasks().await {
            Ok(tasks) => {
                self.apply_fetch(seq, tasks).await;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch tasks");
                self.fail(format!("Failed to fetch tasks: {e}")).await;
                Err(e)
            }
        }
    }

    /// Corrective re-fetch after a failed mutation. If it fails too, the
    /// mutation's banner stays up.
    async fn resync(&self) {
        let seq = self.next_seq();
        match self.backend.list_tasks().await {
            Ok(tasks) => self.apply_fetch(seq, tasks).await,
            Err(e) => warn!(error = %e, "Corrective fetch failed, keeping banner"),
        }
    }

    fn next_seq(&self) -> u64 {
        self.fetch_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn apply_fetch(&self, seq: u64, tasks: Vec<Task>) {
        let count = tasks.len();
        {
            let mut state = self.state.write().await;
            if seq < state.applied_seq {
                debug!(seq, applied = state.applied_seq, "Dropping stale task fetch");
                return;
            }
            state.tasks = build_tree(tasks);
            state.pending.clear();
            state.applied_seq = seq;
        }
        debug!(seq, count, "Task forest replaced");
        let _ = self.tx.send(BoardEvent::Synced { tasks: count });
    }

    // ── Mutations ───────────────────────────────────────────────────

    /// Insert a task, then re-fetch so it lands in its stored order.
    pub async fn create_task(&self, new: NewTask) -> Result<Task, ApiError> {
        match self.backend.insert_task(&new).await {
            Ok(task) => {
                info!(task_id = %task.id, title = %task.title, "Task created");
                // The row exists either way; a failed refresh raises its own banner.
                let _ = self.refresh().await;
                Ok(task)
            }
            Err(e) => {
                warn!(error = %e, title = %new.title, "Failed to create task");
                self.fail(format!("Failed to create task: {e}")).await;
                Err(e)
            }
        }
    }

    /// Add a subtask under `parent_id`.
    ///
    /// A placeholder row appears under the parent at once and is swapped for
    /// the stored row when the insert is confirmed.
    pub async fn create_subtask(&self, parent_id: Uuid, new: NewTask) -> Result<Task, ApiError> {
        let new = new.with_parent(parent_id);
        let placeholder = Uuid::new_v4();
        {
            let mut state = self.state.write().await;
            if state.pending.contains(&parent_id) {
                debug!(parent_id = %parent_id, "Parent is still being created");
                return Err(ApiError::NotFound {
                    entity: "task".into(),
                    id: parent_id.to_string(),
                });
            }
            let Some(parent) = tree::find_mut(&mut state.tasks, parent_id) else {
                warn!(parent_id = %parent_id, "Cannot add subtask to unknown task");
                return Err(ApiError::NotFound {
                    entity: "task".into(),
                    id: parent_id.to_string(),
                });
            };
            parent
                .subtasks
                .push(TaskNode::leaf(new.clone().into_task(placeholder, Utc::now())));
            state.pending.insert(placeholder);
        }
        let _ = self.tx.send(BoardEvent::TaskAdded {
            id: placeholder,
            parent_id,
        });

        match self.backend.insert_task(&new).await {
            Ok(task) => {
                info!(task_id = %task.id, parent_id = %parent_id, "Subtask created");
                self.confirm_placeholder(placeholder, task.clone()).await;
                Ok(task)
            }
            Err(e) => {
                warn!(error = %e, parent_id = %parent_id, "Failed to create subtask");
                self.fail(format!("Failed to create subtask: {e}")).await;
                self.resync().await;
                Err(e)
            }
        }
    }

    async fn confirm_placeholder(&self, placeholder: Uuid, task: Task) {
        let id = task.id;
        {
            let mut state = self.state.write().await;
            state.pending.remove(&placeholder);
            if let Some(node) = tree::find_mut(&mut state.tasks, placeholder) {
                node.task = task;
            } else if tree::find(&state.tasks, id).is_none() {
                // A fetch replaced the forest while the insert was in flight.
                let parent = task
                    .parent_id
                    .and_then(|p| tree::find_mut(&mut state.tasks, p));
                match parent {
                    Some(parent) => parent.subtasks.push(TaskNode::leaf(task)),
                    None => state.tasks.push(TaskNode::leaf(task)),
                }
            }
        }
        let _ = self.tx.send(BoardEvent::TaskConfirmed { placeholder, id });
    }

    /// Optimistic partial update of one task.
    pub async fn update_task(&self, id: Uuid, patch: TaskPatch) -> Result<(), ApiError> {
        if patch.is_empty() {
            debug!(task_id = %id, "Empty patch, nothing to do");
            return Ok(());
        }
        {
            let mut state = self.state.write().await;
            if state.pending.contains(&id) {
                debug!(task_id = %id, "Task is still being created");
                return Err(ApiError::NotFound {
                    entity: "task".into(),
                    id: id.to_string(),
                });
            }
            if !apply_patch(&mut state.tasks, id, &patch) {
                debug!(task_id = %id, "Task not on the board, sending update anyway");
            }
        }
        let _ = self.tx.send(BoardEvent::TaskChanged { id });

        match self.backend.update_task(id, &patch).await {
            Ok(()) => {
                info!(task_id = %id, "Task updated");
                Ok(())
            }
            Err(e) => {
                warn!(task_id = %id, error = %e, "Task update failed, re-fetching");
                self.fail(format!("Failed to update task: {e}")).await;
                self.resync().await;
                Err(e)
            }
        }
    }

    pub async fn set_status(&self, id: Uuid, status: TaskStatus) -> Result<(), ApiError> {
        self.update_task(id, TaskPatch::status(status)).await
    }

    pub async fn set_priority(&self, id: Uuid, priority: TaskPriority) -> Result<(), ApiError> {
        self.update_task(id, TaskPatch::priority(priority)).await
    }

    pub async fn set_assignee(&self, id: Uuid, assignee: Option<Uuid>) -> Result<(), ApiError> {
        self.update_task(id, TaskPatch::assignee(assignee)).await
    }

    pub async fn set_due_date(&self, id: Uuid, due: Option<NaiveDate>) -> Result<(), ApiError> {
        self.update_task(id, TaskPatch::due_date(due)).await
    }

    pub async fn set_position(&self, id: Uuid, position: i32) -> Result<(), ApiError> {
        self.update_task(id, TaskPatch::position(position)).await
    }

    /// Remove a task and its subtree. The backend cascades to subtasks.
    pub async fn delete_task(&self, id: Uuid) -> Result<(), ApiError> {
        {
            let mut state = self.state.write().await;
            if state.pending.contains(&id) {
                debug!(task_id = %id, "Task is still being created");
                return Err(ApiError::NotFound {
                    entity: "task".into(),
                    id: id.to_string(),
                });
            }
            if let Some(removed) = tree::remove(&mut state.tasks, id) {
                debug!(task_id = %id, subtasks = tree::count(&removed.subtasks), "Removed locally");
            }
        }
        let _ = self.tx.send(BoardEvent::TaskRemoved { id });

        match self.backend.delete_task(id).await {
            Ok(()) => {
                info!(task_id = %id, "Task deleted");
                Ok(())
            }
            Err(e) => {
                warn!(task_id = %id, error = %e, "Task delete failed, re-fetching");
                self.fail(format!("Failed to delete task: {e}")).await;
                self.resync().await;
                Err(e)
            }
        }
    }

    /// Handle a kanban drop of `dragged` over `over` (a column id or a task id).
    ///
    /// A cross-column drop issues exactly one status update. A same-column drop
    /// only writes positions under [`ReorderPolicy::Persist`].
    pub async fn handle_drop(&self, dragged: Uuid, over: &str) -> Result<DropIntent, ApiError> {
        let intent = {
            let state = self.state.read().await;
            resolve_drop(&group_by_status(&state.tasks), dragged, over)
        };

        match &intent {
            DropIntent::ChangeStatus { task_id, from, to } => {
                debug!(task_id = %task_id, from = %from, to = %to, "Drop changes status");
                self.set_status(*task_id, *to).await?;
            }
            DropIntent::Reorder {
                task_id, positions, ..
            } => match self.config.reorder_policy {
                ReorderPolicy::Ignore => {
                    debug!(task_id = %task_id, "Same-column drop, order not persisted");
                }
                ReorderPolicy::Persist => {
                    for (id, position) in positions {
                        self.set_position(*id, *position).await?;
                    }
                }
            },
            DropIntent::Noop => {
                debug!(task_id = %dragged, over = %over, "Drop resolved to nothing");
            }
        }
        Ok(intent)
    }

    // ── Reading ─────────────────────────────────────────────────────

    pub async fn snapshot(&self) -> BoardSnapshot {
        let state = self.state.read().await;
        BoardSnapshot {
            tasks: state.tasks.clone(),
            users: state.users.clone(),
            error: state.error.clone(),
            pending: state.pending.clone(),
        }
    }

    /// Kanban columns in board order, each holding its root tasks.
    pub async fn columns(&self) -> Vec<(TaskStatus, Vec<TaskNode>)> {
        let state = self.state.read().await;
        group_by_status(&state.tasks)
            .into_iter()
            .map(|c| (c.status, c.tasks.into_iter().cloned().collect()))
            .collect()
    }

    /// List view: roots matching `filter`, in forest order.
    pub async fn filtered(&self, filter: &TaskFilter) -> Vec<TaskNode> {
        let state = self.state.read().await;
        filter.apply(&state.tasks).into_iter().cloned().collect()
    }

    pub async fn users(&self) -> Vec<User> {
        self.state.read().await.users.clone()
    }

    pub async fn error(&self) -> Option<String> {
        self.state.read().await.error.clone()
    }

    pub async fn dismiss_error(&self) {
        let cleared = self.state.write().await.error.take().is_some();
        if cleared {
            let _ = self.tx.send(BoardEvent::ErrorCleared);
        }
    }

    async fn fail(&self, message: String) {
        self.state.write().await.error = Some(message.clone());
        let _ = self.tx.send(BoardEvent::Failed { message });
    }
}
