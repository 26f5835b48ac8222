//! Tasks — rows, the derived subtask forest, board views and the optimistic
//! board controller.

pub mod board;
pub mod dnd;
pub mod model;
pub mod tree;
pub mod view;

pub use board::{Board, BoardEvent, BoardSnapshot};
pub use dnd::DropIntent;
pub use model::{NewTask, Task, TaskPatch, TaskPriority, TaskStatus};
pub use tree::TaskNode;
pub use view::TaskFilter;
