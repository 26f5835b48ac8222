//! Drag/drop resolver — maps a drop gesture to a board intent.
//!
//! Pure function of (dragged id, drop target id, column membership); knows
//! nothing about pointers or animation.

use uuid::Uuid;

use super::model::TaskStatus;
use super::view::Column;

/// What a drop means for the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropIntent {
    /// Task moved to another column.
    ChangeStatus {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },
    /// Task moved within its own column. `positions` holds only the tasks
    /// whose position would change.
    Reorder {
        task_id: Uuid,
        status: TaskStatus,
        positions: Vec<(Uuid, i32)>,
    },
    /// Nothing to do (unknown target, dropped on itself, order unchanged).
    Noop,
}

/// Resolve a drop of `dragged` over the element identified by `over`.
///
/// `over` is either a column identifier (`"todo"`, `"done"`, ...) or the id of
/// a task card. A column id wins; otherwise the column containing the task
/// card is used.
pub fn resolve_drop(columns: &[Column<'_>], dragged: Uuid, over: &str) -> DropIntent {
    let Some((from, slots)) = columns
        .iter()
        .find(|c| c.tasks.iter().any(|n| n.id() == dragged))
        .map(|c| {
            let slots: Vec<(Uuid, i32)> =
                c.tasks.iter().map(|n| (n.id(), n.task.position)).collect();
            (c.status, slots)
        })
    else {
        return DropIntent::Noop;
    };

    let over = over.trim();
    let (to, drop_index) = if let Ok(status) = over.parse::<TaskStatus>() {
        (status, None)
    } else {
        let Ok(over_id) = over.parse::<Uuid>() else {
            return DropIntent::Noop;
        };
        let Some((status, index)) = columns.iter().find_map(|c| {
            c.tasks
                .iter()
                .position(|n| n.id() == over_id)
                .map(|i| (c.status, i))
        }) else {
            return DropIntent::Noop;
        };
        (status, Some(index))
    };

    if to != from {
        return DropIntent::ChangeStatus {
            task_id: dragged,
            from,
            to,
        };
    }

    // Same column: dropping on the column itself moves the card to the end.
    let target = drop_index.unwrap_or(slots.len().saturating_sub(1));
    let positions = reorder_positions(&slots, dragged, target);
    if positions.is_empty() {
        DropIntent::Noop
    } else {
        DropIntent::Reorder {
            task_id: dragged,
            status: from,
            positions,
        }
    }
}

/// Move `dragged` to `target` within the column and renumber from zero.
///
/// `slots` holds `(id, current_position)` in display order. Returns the
/// `(id, new_position)` pairs whose stored position would change.
fn reorder_positions(slots: &[(Uuid, i32)], dragged: Uuid, target: usize) -> Vec<(Uuid, i32)> {
    let Some(current) = slots.iter().position(|&(id, _)| id == dragged) else {
        return Vec::new();
    };
    if current == target {
        return Vec::new();
    }
    let mut order = slots.to_vec();
    let moved = order.remove(current);
    order.insert(target.min(order.len()), moved);

    order
        .into_iter()
        .enumerate()
        .filter(|&(i, (_, position))| position != i as i32)
        .map(|(i, (id, _))| (id, i as i32))
        .collect()
}
